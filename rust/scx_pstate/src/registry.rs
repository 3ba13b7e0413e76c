// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Per-processor ownership of state tables and hardware bindings.

use crate::error::PstateError;
use crate::error::Result;
use crate::freq_table::FrequencyTable;
use crate::hw::HardwareAccess;
use crate::pstate::PlatformPerformance;
use crate::pstate::StateTable;
use log::debug;
use log::info;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::RwLock;

/// What the frequency scaling framework learns when a processor is activated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activation {
    pub freq_table: FrequencyTable,
    pub transition_latency_ns: u64,
}

pub struct ProcessorEntry {
    table: StateTable,
    hw: Box<dyn HardwareAccess>,
    freq_table: FrequencyTable,
}

impl ProcessorEntry {
    pub fn table(&self) -> &StateTable {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut StateTable {
        &mut self.table
    }

    pub fn freq_table(&self) -> &FrequencyTable {
        &self.freq_table
    }

    /// Split borrow of the table and the hardware binding.
    pub fn parts(&mut self) -> (&mut StateTable, &mut dyn HardwareAccess) {
        (&mut self.table, &mut *self.hw)
    }
}

/// Map of managed processors.
///
/// The map itself only changes on activate/deactivate. Each entry has its own
/// lock so operations on different processors never contend.
#[derive(Default)]
pub struct Registry {
    entries: RwLock<BTreeMap<usize, Mutex<ProcessorEntry>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate `perf` and take `cpu` under management.
    ///
    /// `bind` is only called once the platform data has been accepted. On
    /// error no entry is created.
    pub fn activate<F>(
        &self,
        cpu: usize,
        perf: &PlatformPerformance,
        bind: F,
    ) -> Result<Activation>
    where
        F: FnOnce() -> Result<Box<dyn HardwareAccess>>,
    {
        debug!("CPU{cpu}: activate");

        if self.is_managed(cpu) {
            return Err(PstateError::AlreadyManaged { cpu });
        }

        let table = StateTable::build(cpu, perf)?;
        let freq_table = table.frequency_table(cpu)?;
        let hw = bind()?;

        let activation = Activation {
            freq_table: freq_table.clone(),
            transition_latency_ns: table.transition_latency_ns(),
        };

        info!("CPU{cpu}: P-state management activated");
        for line in table.to_string().lines() {
            debug!("     {line}");
        }

        let entry = ProcessorEntry {
            table,
            hw,
            freq_table,
        };
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries.contains_key(&cpu) {
            return Err(PstateError::AlreadyManaged { cpu });
        }
        entries.insert(cpu, Mutex::new(entry));

        Ok(activation)
    }

    /// Release everything owned for `cpu`. Returns whether it was managed.
    pub fn deactivate(&self, cpu: usize) -> bool {
        debug!("CPU{cpu}: deactivate");
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(&cpu).is_some()
    }

    pub fn is_managed(&self, cpu: usize) -> bool {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.contains_key(&cpu)
    }

    pub fn cpus(&self) -> Vec<usize> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.keys().copied().collect()
    }

    /// Run `f` with exclusive access to the entry of `cpu`.
    pub fn with_entry<T, F>(&self, cpu: usize, f: F) -> Result<T>
    where
        F: FnOnce(&mut ProcessorEntry) -> T,
    {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let entry = entries.get(&cpu).ok_or(PstateError::NotManaged { cpu })?;
        let mut entry: MutexGuard<'_, ProcessorEntry> =
            entry.lock().unwrap_or_else(|e| e.into_inner());
        Ok(f(&mut entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pstate::AddressSpace;
    use crate::pstate::RawPerformanceState;
    use crate::sim::SimulatedHardware;

    fn perf(n: usize) -> PlatformPerformance {
        PlatformPerformance {
            control_register: AddressSpace::FixedHardware,
            status_register: AddressSpace::FixedHardware,
            states: (0..n as u64)
                .map(|i| RawPerformanceState {
                    core_frequency_khz: 3000 - i * 400,
                    power_mw: 1000,
                    transition_latency_us: 10 + i,
                    bus_master_latency_us: 10,
                    control: i,
                    status: 0x10 * (i + 1),
                })
                .collect(),
            state: 0,
        }
    }

    fn bind(p: &PlatformPerformance) -> impl FnOnce() -> Result<Box<dyn HardwareAccess>> {
        let hw = SimulatedHardware::new(p);
        move || Ok(Box::new(hw) as Box<dyn HardwareAccess>)
    }

    #[test]
    fn activate_exports_table_and_latency() {
        let reg = Registry::new();
        let p = perf(3);
        let act = reg.activate(4, &p, bind(&p)).unwrap();
        assert_eq!(
            act.freq_table.iter().collect::<Vec<_>>(),
            vec![3_000_000, 2_600_000, 2_200_000]
        );
        assert_eq!(act.transition_latency_ns, 12_000);
        assert_eq!(reg.cpus(), vec![4]);
        reg.with_entry(4, |e| assert_eq!(e.freq_table(), &act.freq_table))
            .unwrap();
    }

    #[test]
    fn failed_activation_leaves_no_entry_and_skips_bind() {
        let reg = Registry::new();
        let mut bound = false;
        let err = reg
            .activate(0, &perf(1), || {
                bound = true;
                Err(PstateError::NotManaged { cpu: 0 })
            })
            .unwrap_err();
        assert!(matches!(err, PstateError::InsufficientStates { .. }));
        assert!(!bound);
        assert!(!reg.is_managed(0));
    }

    #[test]
    fn bind_failure_leaves_no_entry() {
        let reg = Registry::new();
        let err = reg
            .activate(0, &perf(2), || {
                Err(PstateError::PlatformData {
                    cpu: 0,
                    reason: "no msr".to_string(),
                })
            })
            .unwrap_err();
        assert!(matches!(err, PstateError::PlatformData { .. }));
        assert!(!reg.is_managed(0));
        assert!(!reg.deactivate(0));
    }

    #[test]
    fn one_entry_per_cpu() {
        let reg = Registry::new();
        let p = perf(2);
        reg.activate(1, &p, bind(&p)).unwrap();
        assert!(matches!(
            reg.activate(1, &p, bind(&p)),
            Err(PstateError::AlreadyManaged { cpu: 1 })
        ));
        assert!(reg.deactivate(1));
        assert!(matches!(
            reg.with_entry(1, |_| ()),
            Err(PstateError::NotManaged { cpu: 1 })
        ));
        reg.activate(1, &p, bind(&p)).unwrap();
    }
}
