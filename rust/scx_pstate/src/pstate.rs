// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! # P-state tables
//!
//! The platform describes each processor's performance states as an ordered
//! list of {control, status, frequency, power, latency} tuples together with
//! the address spaces of the control and status registers. A [`StateTable`]
//! is built once from that description and is never re-sorted or extended;
//! index 0 is the highest performance state by platform convention.

use crate::error::PstateError;
use crate::error::Result;
use crate::freq_table::FrequencyTable;
use serde::Deserialize;
use serde::Serialize;
use std::fmt;

/// ACPI generic address space identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressSpace {
    SystemMemory,
    SystemIo,
    PciConfig,
    EmbeddedController,
    Smbus,
    /// Functional fixed hardware, e.g. MSRs on x86.
    FixedHardware,
    Other(u8),
}

impl AddressSpace {
    pub fn from_id(id: u8) -> AddressSpace {
        match id {
            0x00 => AddressSpace::SystemMemory,
            0x01 => AddressSpace::SystemIo,
            0x02 => AddressSpace::PciConfig,
            0x03 => AddressSpace::EmbeddedController,
            0x04 => AddressSpace::Smbus,
            0x7f => AddressSpace::FixedHardware,
            other => AddressSpace::Other(other),
        }
    }

    pub fn id(&self) -> u8 {
        match self {
            AddressSpace::SystemMemory => 0x00,
            AddressSpace::SystemIo => 0x01,
            AddressSpace::PciConfig => 0x02,
            AddressSpace::EmbeddedController => 0x03,
            AddressSpace::Smbus => 0x04,
            AddressSpace::FixedHardware => 0x7f,
            AddressSpace::Other(id) => *id,
        }
    }
}

/// One performance state exactly as the platform reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPerformanceState {
    pub core_frequency_khz: u64,
    pub power_mw: u64,
    pub transition_latency_us: u64,
    pub bus_master_latency_us: u64,
    pub control: u64,
    pub status: u64,
}

/// Everything the platform knows about one processor's P-states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformPerformance {
    pub control_register: AddressSpace,
    pub status_register: AddressSpace,
    pub states: Vec<RawPerformanceState>,
    /// Index of the state the platform believes is active.
    #[serde(default)]
    pub state: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatingPoint {
    pub control: u64,
    pub status: u64,
    pub core_frequency_khz: u64,
    pub power_mw: u64,
    pub transition_latency_us: u64,
    pub bus_master_latency_us: u64,
}

impl From<&RawPerformanceState> for OperatingPoint {
    fn from(raw: &RawPerformanceState) -> Self {
        OperatingPoint {
            control: raw.control,
            status: raw.status,
            core_frequency_khz: raw.core_frequency_khz,
            power_mw: raw.power_mw,
            transition_latency_us: raw.transition_latency_us,
            bus_master_latency_us: raw.bus_master_latency_us,
        }
    }
}

impl OperatingPoint {
    pub fn frequency_hz(&self) -> u64 {
        self.core_frequency_khz.saturating_mul(1000)
    }
}

/// Ordered operating points of one processor plus the believed-active state.
#[derive(Debug, Clone)]
pub struct StateTable {
    states: Vec<OperatingPoint>,
    current: usize,
    needs_reinit: bool,
}

impl StateTable {
    /// Validate platform data for `cpu` and build its table.
    ///
    /// The table starts with the re-initialization flag set so that the first
    /// transition always reaches the hardware.
    pub fn build(cpu: usize, perf: &PlatformPerformance) -> Result<StateTable> {
        let count = perf.states.len();
        if count <= 1 {
            return Err(PstateError::InsufficientStates { cpu, count });
        }

        if perf.control_register != AddressSpace::FixedHardware
            || perf.status_register != AddressSpace::FixedHardware
        {
            return Err(PstateError::UnsupportedAccessMethod {
                cpu,
                control: perf.control_register,
                status: perf.status_register,
            });
        }

        if perf.state >= count {
            return Err(PstateError::InvalidInitialState {
                cpu,
                index: perf.state,
                count,
            });
        }

        let mut states = Vec::new();
        states
            .try_reserve_exact(count)
            .map_err(|_| PstateError::AllocationFailure { cpu })?;
        states.extend(perf.states.iter().map(OperatingPoint::from));

        Ok(StateTable {
            states,
            current: perf.state,
            needs_reinit: true,
        })
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn states(&self) -> &[OperatingPoint] {
        &self.states
    }

    pub fn get(&self, index: usize) -> Option<&OperatingPoint> {
        self.states.get(index)
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current(&self) -> &OperatingPoint {
        &self.states[self.current]
    }

    pub fn needs_reinit(&self) -> bool {
        self.needs_reinit
    }

    /// Force the next transition to write the hardware, e.g. after resume.
    pub fn mark_needs_reinit(&mut self) {
        self.needs_reinit = true;
    }

    pub(crate) fn clear_needs_reinit(&mut self) {
        self.needs_reinit = false;
    }

    /// Only called once the hardware accepted the control value of `index`.
    pub(crate) fn set_current(&mut self, index: usize) {
        debug_assert!(index < self.states.len());
        self.current = index;
    }

    /// Worst-case transition latency in nanoseconds.
    pub fn transition_latency_ns(&self) -> u64 {
        self.states
            .iter()
            .map(|s| s.transition_latency_us.saturating_mul(1000))
            .max()
            .unwrap_or(0)
    }

    /// Map a status register value back to an operating point.
    ///
    /// The status register may report a code outside of the table while a
    /// transition is in flight, in which case the last state is returned.
    pub fn lookup_status(&self, status: u64) -> &OperatingPoint {
        match self.states.iter().find(|s| s.status == status) {
            Some(state) => state,
            None => &self.states[self.states.len() - 1],
        }
    }

    /// Export the table in Hz for the frequency scaling framework.
    pub fn frequency_table(&self, cpu: usize) -> Result<FrequencyTable> {
        FrequencyTable::from_states(&self.states)
            .map_err(|_| PstateError::AllocationFailure { cpu })
    }
}

impl fmt::Display for StateTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, s) in self.states.iter().enumerate() {
            writeln!(
                f,
                "{}P{}: {} KHz, {} mW, {} uS, {} uS, {:#x} {:#x}",
                if i == self.current { '*' } else { ' ' },
                i,
                s.core_frequency_khz,
                s.power_mw,
                s.transition_latency_us,
                s.bus_master_latency_us,
                s.status,
                s.control
            )?;
        }
        Ok(())
    }
}
