// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.
mod cli;

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use scx_pstate::cpu;
use scx_pstate::sim::SimulatedAffinity;
use scx_pstate::sim::SimulatedPlatform;
use scx_pstate::Affinity;
use scx_pstate::Cpumask;
use scx_pstate::FilePlatform;
use scx_pstate::Platform;
use scx_pstate::PlatformDescription;
use scx_pstate::PstateDriver;
use tracing::{debug, warn};
use tracing_subscriber::filter::EnvFilter;

fn init_logging(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| match EnvFilter::try_new(log_level) {
            Ok(filter) => Ok(filter),
            Err(e) => {
                eprintln!(
                    "invalid log envvar: {}, using info, err is: {}",
                    log_level, e
                );
                EnvFilter::try_new("info")
            }
        })
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
    {
        Ok(()) => {}
        Err(e) => eprintln!("failed to init logger: {}", e),
    }
}

fn activate<P: Platform, A: Affinity>(driver: &PstateDriver<P, A>, cpu: usize) -> Result<()> {
    driver
        .init(cpu)
        .with_context(|| format!("CPU{cpu} is not frequency-manageable"))?;
    Ok(())
}

fn cmd_list<P: Platform, A: Affinity>(driver: &PstateDriver<P, A>, cpus: &[usize]) -> Result<()> {
    let mut managed = Cpumask::new();
    for &cpu in cpus {
        let act = match driver.init(cpu) {
            Ok(act) => act,
            Err(e) => {
                warn!("{}", e);
                continue;
            }
        };
        managed.set_cpu(cpu)?;
        let table = driver.state_table(cpu)?;
        println!(
            "CPU{}: {} states, transition latency {} ns",
            cpu,
            act.freq_table.len(),
            act.transition_latency_ns
        );
        print!("{}", table);
    }
    if managed.is_empty() {
        bail!("no CPU could be activated");
    }
    println!("managed CPUs: {} ({:x})", managed, managed);
    Ok(())
}

fn cmd_get<P: Platform, A: Affinity>(driver: &PstateDriver<P, A>, cpu: usize) -> Result<()> {
    activate(driver, cpu)?;
    match driver.get(cpu) {
        0 => println!("CPU{}: frequency unavailable", cpu),
        hz => println!("CPU{}: {} Hz", cpu, hz),
    }
    Ok(())
}

fn cmd_set<P: Platform, A: Affinity>(
    driver: &PstateDriver<P, A>,
    cpu: usize,
    index: usize,
) -> Result<()> {
    activate(driver, cpu)?;
    driver.target(cpu, index)?;
    let table = driver.state_table(cpu)?;
    println!(
        "CPU{}: P{} ({} KHz)",
        cpu,
        index,
        table.current().core_frequency_khz
    );
    Ok(())
}

fn cmd_monitor<P: Platform, A: Affinity>(
    driver: &PstateDriver<P, A>,
    cpu: usize,
    interval: Duration,
) -> Result<()> {
    activate(driver, cpu)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    ctrlc::set_handler(move || {
        shutdown_clone.store(true, Ordering::Relaxed);
    })
    .context("Error setting Ctrl-C handler")?;

    while !shutdown.load(Ordering::Relaxed) {
        println!("CPU{}: {} Hz", cpu, driver.get(cpu));
        std::thread::sleep(interval);
    }

    driver.exit(cpu);
    Ok(())
}

fn run<P: Platform, A: Affinity>(
    driver: PstateDriver<P, A>,
    described: Vec<usize>,
    command: Commands,
) -> Result<()> {
    match command {
        Commands::List { cpus } => {
            let cpus: Vec<usize> = match cpus {
                Some(mask) => Cpumask::parse(&mask)?.iter().collect(),
                None => described,
            };
            cmd_list(&driver, &cpus)
        }
        Commands::Get { cpu } => cmd_get(&driver, cpu),
        Commands::Set { cpu, index } => cmd_set(&driver, cpu, index),
        Commands::Monitor { cpu, interval_ms } => {
            cmd_monitor(&driver, cpu, Duration::from_millis(interval_ms))
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);
    debug!("cli={:?}", &cli);

    let desc = PlatformDescription::load(&cli.platform)?;

    if cli.simulate {
        let platform = SimulatedPlatform::from_description(&desc)?;
        let cpus: Vec<usize> = platform.cpus().collect();
        let mut mask = Cpumask::new();
        for &cpu in cpus.iter() {
            mask.set_cpu(cpu)?;
        }
        let driver = PstateDriver::with_affinity(platform, SimulatedAffinity::new(mask));
        return run(driver, cpus, cli.command);
    }

    let platform = FilePlatform::new(&desc)?;
    let cpus: Vec<usize> = match cpu::online_cpus() {
        Ok(online) => platform.cpus().filter(|&c| online.test_cpu(c)).collect(),
        Err(e) => {
            warn!("{:#}, assuming every described CPU is online", e);
            platform.cpus().collect()
        }
    };
    run(PstateDriver::new(platform), cpus, cli.command)
}
