// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! # P-state control for fixed-hardware processors
//!
//! This crate discovers a processor's performance states from platform
//! supplied data, publishes them as a frequency table and moves processors
//! between them on request.
//!
//! ## Building blocks
//!
//! - [`StateTable`]: the validated, ordered operating points of one processor
//!   and the state it is believed to run at.
//! - [`HardwareAccess`]: commit a control value, read the status value.
//!   [`MsrAccess`] implements it on x86 through the msr driver.
//! - [`AffinityGuard`]: pins the calling thread to a processor for the
//!   duration of a hardware access and restores its affinity afterwards.
//! - [`TransitionEngine`]: idempotent, rollback-safe transitions and
//!   read-back of the current frequency.
//! - [`Registry`] and [`PstateDriver`]: per-processor lifecycle and the
//!   init/exit/target/get surface a frequency scaling framework drives.
//!
//! The [`sim`] module provides simulated hardware, affinity and platform
//! implementations for hosts without fixed-hardware P-states.

mod affinity;
pub use affinity::with_affinity_pinned_to;
pub use affinity::Affinity;
pub use affinity::AffinityGuard;
pub use affinity::ThreadAffinity;

pub mod cpu;

mod cpumask;
pub use cpumask::read_cpulist;
pub use cpumask::Cpumask;
pub use cpumask::MAX_CPUS;

mod driver;
pub use driver::PstateDriver;
pub use driver::DRIVER_NAME;

mod engine;
pub use engine::TransitionEngine;

mod error;
pub use error::PstateError;
pub use error::Result;

mod freq_table;
pub use freq_table::FrequencyTable;
pub use freq_table::PolicyLimits;
pub use freq_table::TABLE_END;

pub mod hw;
pub use hw::HardwareAccess;
pub use hw::MsrAccess;

pub mod platform;
pub use platform::FilePlatform;
pub use platform::Platform;
pub use platform::PlatformDescription;

mod pstate;
pub use pstate::AddressSpace;
pub use pstate::OperatingPoint;
pub use pstate::PlatformPerformance;
pub use pstate::RawPerformanceState;
pub use pstate::StateTable;

mod registry;
pub use registry::Activation;
pub use registry::ProcessorEntry;
pub use registry::Registry;

pub mod sim;
