// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! # Transition engine
//!
//! Moves one processor between the states of its [`StateTable`] and reads
//! back the state it is running at. Every hardware access happens with the
//! calling thread pinned to that processor.
//!
//! The engine keeps no per-processor state of its own; callers lend it the
//! table and hardware binding for the duration of one operation and are
//! responsible for serializing operations on the same processor.

use crate::affinity::with_affinity_pinned_to;
use crate::affinity::Affinity;
use crate::error::PstateError;
use crate::error::Result;
use crate::hw::HardwareAccess;
use crate::pstate::StateTable;
use log::debug;
use log::warn;

pub struct TransitionEngine<A: Affinity> {
    affinity: A,
}

impl<A: Affinity> TransitionEngine<A> {
    pub fn new(affinity: A) -> Self {
        Self { affinity }
    }

    pub fn affinity(&self) -> &A {
        &self.affinity
    }

    /// Move `cpu` to state `index`.
    ///
    /// A request for the current state is a no-op unless the table needs
    /// re-initialization, in which case the flag is consumed and the control
    /// value is written again. Moves to another state leave the flag alone.
    /// The believed-current state only changes once the hardware accepted
    /// the new control value.
    pub fn request_transition(
        &self,
        cpu: usize,
        table: &mut StateTable,
        hw: &mut dyn HardwareAccess,
        index: usize,
    ) -> Result<()> {
        debug!("CPU{cpu}: request_transition P{index}");

        let control = match table.get(index) {
            Some(state) => state.control,
            None => {
                return Err(PstateError::InvalidIndex {
                    cpu,
                    index,
                    count: table.len(),
                })
            }
        };

        with_affinity_pinned_to(&self.affinity, cpu, || {
            if index == table.current_index() {
                if table.needs_reinit() {
                    debug!("CPU{cpu}: called after resume, resetting to P{index}");
                    table.clear_needs_reinit();
                } else {
                    debug!("CPU{cpu}: already at target state (P{index})");
                    return Ok(());
                }
            }

            debug!(
                "CPU{cpu}: transitioning from P{} to P{index}, control {control:#010x}",
                table.current_index()
            );

            if let Err(source) = hw.commit(control) {
                warn!("CPU{cpu}: transition to P{index} (control {control:#010x}) failed: {source}");
                return Err(PstateError::HardwareCommitFailure {
                    cpu,
                    index,
                    control,
                    source,
                });
            }

            table.set_current(index);
            Ok(())
        })
    }

    /// Read the frequency `cpu` is running at, in Hz.
    pub fn read_current_frequency(
        &self,
        cpu: usize,
        table: &StateTable,
        hw: &mut dyn HardwareAccess,
    ) -> Result<u64> {
        debug!("CPU{cpu}: read_current_frequency");

        let status = with_affinity_pinned_to(&self.affinity, cpu, || {
            hw.read_status()
                .map_err(|source| PstateError::HardwareReadFailure { cpu, source })
        })?;

        let state = table.lookup_status(status);
        debug!(
            "CPU{cpu}: status {status:#x} -> {} KHz",
            state.core_frequency_khz
        );
        Ok(state.frequency_hz())
    }

    /// Like [`Self::read_current_frequency`] but reports 0 when the frequency
    /// is unavailable.
    pub fn query_current_frequency(
        &self,
        cpu: usize,
        table: &StateTable,
        hw: &mut dyn HardwareAccess,
    ) -> u64 {
        match self.read_current_frequency(cpu, table, hw) {
            Ok(freq) => freq,
            Err(e) => {
                warn!("get performance failed: {e}");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpumask::Cpumask;
    use crate::pstate::AddressSpace;
    use crate::pstate::PlatformPerformance;
    use crate::pstate::RawPerformanceState;
    use crate::sim::SimulatedAffinity;
    use crate::sim::SimulatedHardware;

    fn perf() -> PlatformPerformance {
        let states = [(3000, 0x1, 0x10), (2600, 0x2, 0x20), (2200, 0x3, 0x30)]
            .iter()
            .map(|&(khz, control, status)| RawPerformanceState {
                core_frequency_khz: khz,
                power_mw: 1000,
                transition_latency_us: 10,
                bus_master_latency_us: 10,
                control,
                status,
            })
            .collect();
        PlatformPerformance {
            control_register: AddressSpace::FixedHardware,
            status_register: AddressSpace::FixedHardware,
            states,
            state: 0,
        }
    }

    fn setup() -> (TransitionEngine<SimulatedAffinity>, StateTable, SimulatedHardware) {
        let p = perf();
        let aff = SimulatedAffinity::new(Cpumask::from_cpulist("0-3").unwrap());
        (
            TransitionEngine::new(aff),
            StateTable::build(1, &p).unwrap(),
            SimulatedHardware::new(&p),
        )
    }

    #[test]
    fn out_of_range_index_is_rejected_without_pinning() {
        let (engine, mut table, mut hw) = setup();
        let err = engine
            .request_transition(1, &mut table, &mut hw, 3)
            .unwrap_err();
        assert!(matches!(err, PstateError::InvalidIndex { index: 3, count: 3, .. }));
        assert_eq!(engine.affinity().set_calls(), 0);
        assert!(hw.commits().is_empty());
    }

    #[test]
    fn failed_resync_consumes_flag() {
        let (engine, mut table, mut hw) = setup();
        hw.fail_commits(true);
        assert!(engine.request_transition(1, &mut table, &mut hw, 0).is_err());
        assert!(!table.needs_reinit());
        assert_eq!(table.current_index(), 0);

        hw.fail_commits(false);
        engine.request_transition(1, &mut table, &mut hw, 0).unwrap();
        assert!(hw.commits().is_empty());
    }

    #[test]
    fn move_keeps_resync_pending() {
        let (engine, mut table, mut hw) = setup();
        engine.request_transition(1, &mut table, &mut hw, 2).unwrap();
        assert_eq!(table.current_index(), 2);
        assert!(table.needs_reinit());

        engine.request_transition(1, &mut table, &mut hw, 2).unwrap();
        assert!(!table.needs_reinit());
        engine.request_transition(1, &mut table, &mut hw, 2).unwrap();
        assert_eq!(hw.commits(), vec![0x3, 0x3]);
    }

    #[test]
    fn read_failure_reports_zero() {
        let (engine, table, mut hw) = setup();
        hw.fail_reads(true);
        assert!(matches!(
            engine.read_current_frequency(1, &table, &mut hw),
            Err(PstateError::HardwareReadFailure { cpu: 1, .. })
        ));
        assert_eq!(engine.query_current_frequency(1, &table, &mut hw), 0);
    }

    #[test]
    fn read_follows_committed_state() {
        let (engine, mut table, mut hw) = setup();
        engine.request_transition(1, &mut table, &mut hw, 2).unwrap();
        assert_eq!(
            engine.query_current_frequency(1, &table, &mut hw),
            2_200_000
        );
    }
}
