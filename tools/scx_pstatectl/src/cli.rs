use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Platform performance description (JSON).
    #[arg(short, long, env = "SCX_PSTATE_PLATFORM")]
    pub platform: PathBuf,

    /// Drive simulated hardware and affinity instead of MSRs.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub simulate: bool,

    /// Specify the logging level. Accepts rust's envfilter syntax for modular
    /// logging. Examples: ["info", "warn,scx_pstate=debug"]
    #[arg(long, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(about = "Show the P-state tables of managed CPUs")]
    List {
        #[arg(
            short,
            long,
            help = "Only these CPUs, as a cpulist (\"0-3\") or hex mask (\"0xf\")"
        )]
        cpus: Option<String>,
    },
    #[command(about = "Read the current frequency of a CPU")]
    Get {
        #[arg(short, long)]
        cpu: usize,
    },
    #[command(about = "Switch a CPU to a P-state index")]
    Set {
        #[arg(short, long)]
        cpu: usize,
        #[arg(help = "P-state index, 0 is the highest performance state")]
        index: usize,
    },
    #[command(about = "Periodically print the current frequency until interrupted")]
    Monitor {
        #[arg(short, long)]
        cpu: usize,
        #[arg(long, default_value = "1000")]
        interval_ms: u64,
    },
}
