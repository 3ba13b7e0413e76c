use std::collections::BTreeMap;

use scx_pstate::sim::SimulatedAffinity;
use scx_pstate::sim::SimulatedPlatform;
use scx_pstate::AddressSpace;
use scx_pstate::Cpumask;
use scx_pstate::PlatformPerformance;
use scx_pstate::PstateDriver;
use scx_pstate::RawPerformanceState;

pub type SimDriver = PstateDriver<SimulatedPlatform, SimulatedAffinity>;

/// Build platform data from (KHz, control, status) triples.
pub fn perf(states: &[(u64, u64, u64)], active: usize) -> PlatformPerformance {
    PlatformPerformance {
        control_register: AddressSpace::FixedHardware,
        status_register: AddressSpace::FixedHardware,
        states: states
            .iter()
            .map(|&(khz, control, status)| RawPerformanceState {
                core_frequency_khz: khz,
                power_mw: khz * 10,
                transition_latency_us: 10,
                bus_master_latency_us: 10,
                control,
                status,
            })
            .collect(),
        state: active,
    }
}

/// Four states, [3000, 2600, 2200, 1800] KHz, P0 active.
pub fn four_states() -> PlatformPerformance {
    perf(
        &[
            (3000, 0x0a, 0x10),
            (2600, 0x0b, 0x20),
            (2200, 0x0c, 0x30),
            (1800, 0x0d, 0x40),
        ],
        0,
    )
}

/// Driver over CPUs 0-3, all described by `p`, with the simulated thread
/// allowed on CPUs 0-3.
pub fn driver(p: PlatformPerformance) -> (SimDriver, SimulatedPlatform, SimulatedAffinity) {
    let mut processors = BTreeMap::new();
    for cpu in 0..4 {
        processors.insert(cpu, p.clone());
    }
    let platform = SimulatedPlatform::new(processors);
    let affinity = SimulatedAffinity::new(Cpumask::from_cpulist("0-3").unwrap());
    let driver = PstateDriver::with_affinity(platform.clone(), affinity.clone());
    (driver, platform, affinity)
}
