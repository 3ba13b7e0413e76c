// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use crate::pstate::AddressSpace;
use std::fmt;
use std::io;

/// Errors raised while activating a processor or moving it between P-states.
///
/// Activation errors (`UnsupportedAccessMethod`, `InsufficientStates`,
/// `AllocationFailure`, `InvalidInitialState`, `PlatformData`) only exclude
/// the processor they were raised for. Request errors (`MigrationRace`,
/// `HardwareCommitFailure`) only fail the request they were raised for.
#[derive(Debug)]
pub enum PstateError {
    /// Control or status register is not reachable through fixed hardware.
    UnsupportedAccessMethod {
        cpu: usize,
        control: AddressSpace,
        status: AddressSpace,
    },
    /// Fewer than two operating points, nothing to scale between.
    InsufficientStates { cpu: usize, count: usize },
    /// Internal tables could not be allocated.
    AllocationFailure { cpu: usize },
    /// The platform reported an active state outside of its own table.
    InvalidInitialState {
        cpu: usize,
        index: usize,
        count: usize,
    },
    /// The calling thread could not be pinned to `cpu`.
    MigrationRace {
        cpu: usize,
        running_on: Option<usize>,
    },
    /// The hardware rejected the control value for state `index`.
    HardwareCommitFailure {
        cpu: usize,
        index: usize,
        control: u64,
        source: io::Error,
    },
    /// The instantaneous status value could not be read.
    HardwareReadFailure { cpu: usize, source: io::Error },
    /// Target index does not exist in the processor's table.
    InvalidIndex {
        cpu: usize,
        index: usize,
        count: usize,
    },
    /// No registry entry for `cpu`.
    NotManaged { cpu: usize },
    /// `cpu` already has a registry entry.
    AlreadyManaged { cpu: usize },
    /// The platform could not supply performance data or a hardware binding.
    PlatformData { cpu: usize, reason: String },
}

impl PstateError {
    /// Processor the error was raised for.
    pub fn cpu(&self) -> usize {
        match self {
            PstateError::UnsupportedAccessMethod { cpu, .. }
            | PstateError::InsufficientStates { cpu, .. }
            | PstateError::AllocationFailure { cpu }
            | PstateError::InvalidInitialState { cpu, .. }
            | PstateError::MigrationRace { cpu, .. }
            | PstateError::HardwareCommitFailure { cpu, .. }
            | PstateError::HardwareReadFailure { cpu, .. }
            | PstateError::InvalidIndex { cpu, .. }
            | PstateError::NotManaged { cpu }
            | PstateError::AlreadyManaged { cpu }
            | PstateError::PlatformData { cpu, .. } => *cpu,
        }
    }
}

impl fmt::Display for PstateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PstateError::UnsupportedAccessMethod {
                cpu,
                control,
                status,
            } => write!(
                f,
                "CPU{cpu}: unsupported address space [{:#x}, {:#x}]",
                control.id(),
                status.id()
            ),
            PstateError::InsufficientStates { cpu, count } => {
                write!(f, "CPU{cpu}: no P-states ({count} reported)")
            }
            PstateError::AllocationFailure { cpu } => {
                write!(f, "CPU{cpu}: failed to allocate P-state tables")
            }
            PstateError::InvalidInitialState { cpu, index, count } => write!(
                f,
                "CPU{cpu}: platform reports active state P{index} but only {count} states exist"
            ),
            PstateError::MigrationRace { cpu, running_on } => match running_on {
                Some(other) => write!(f, "CPU{cpu}: pinned thread is running on CPU{other}"),
                None => write!(f, "CPU{cpu}: failed to pin thread"),
            },
            PstateError::HardwareCommitFailure {
                cpu,
                index,
                control,
                source,
            } => write!(
                f,
                "CPU{cpu}: transition to P{index} (control {control:#010x}) failed: {source}"
            ),
            PstateError::HardwareReadFailure { cpu, source } => {
                write!(f, "CPU{cpu}: failed to read performance status: {source}")
            }
            PstateError::InvalidIndex { cpu, index, count } => {
                write!(f, "CPU{cpu}: P{index} out of range, {count} states")
            }
            PstateError::NotManaged { cpu } => {
                write!(f, "CPU{cpu}: not under performance management")
            }
            PstateError::AlreadyManaged { cpu } => {
                write!(f, "CPU{cpu}: already under performance management")
            }
            PstateError::PlatformData { cpu, reason } => {
                write!(f, "CPU{cpu}: no platform performance data: {reason}")
            }
        }
    }
}

impl std::error::Error for PstateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PstateError::HardwareCommitFailure { source, .. }
            | PstateError::HardwareReadFailure { source, .. } => Some(source),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, PstateError>;
