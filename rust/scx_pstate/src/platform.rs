// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! # Platform performance data
//!
//! Firmware describes P-states per processor. Userspace has no direct view of
//! the firmware objects, so the description is supplied as JSON, grouping
//! processors that share a table under a cpulist:
//!
//!```json
//! {
//!   "domains": [
//!     {
//!       "cpus": "0-3",
//!       "control_register": "fixed_hardware",
//!       "status_register": "fixed_hardware",
//!       "state": 0,
//!       "states": [
//!         { "core_frequency_khz": 3000, "power_mw": 35000,
//!           "transition_latency_us": 10, "bus_master_latency_us": 10,
//!           "control": 1, "status": 16 }
//!       ]
//!     }
//!   ]
//! }
//!```

use crate::cpumask::read_cpulist;
use crate::error::PstateError;
use crate::error::Result;
use crate::hw::HardwareAccess;
use crate::hw::MsrAccess;
use crate::pstate::PlatformPerformance;
use anyhow::bail;
use anyhow::Context;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Source of per-processor performance data and hardware bindings.
pub trait Platform: Send + Sync {
    fn performance(&self, cpu: usize) -> Result<PlatformPerformance>;
    fn bind_hardware(&self, cpu: usize) -> Result<Box<dyn HardwareAccess>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainDescription {
    /// Processors sharing this description, in cpulist syntax.
    pub cpus: String,
    #[serde(flatten)]
    pub perf: PlatformPerformance,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlatformDescription {
    pub domains: Vec<DomainDescription>,
}

impl PlatformDescription {
    pub fn from_json(json: &str) -> anyhow::Result<PlatformDescription> {
        serde_json::from_str(json).context("Failed to parse platform description")
    }

    pub fn load(path: &Path) -> anyhow::Result<PlatformDescription> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("Invalid platform file {}", path.display()))
    }

    /// Expand the domains into one entry per processor.
    pub fn processors(&self) -> anyhow::Result<BTreeMap<usize, PlatformPerformance>> {
        let mut processors = BTreeMap::new();
        for domain in self.domains.iter() {
            for cpu in read_cpulist(&domain.cpus)? {
                if processors.insert(cpu, domain.perf.clone()).is_some() {
                    bail!("CPU{} is described by more than one domain", cpu);
                }
            }
        }
        Ok(processors)
    }
}

/// Platform data from a description file, with MSR hardware access.
#[derive(Debug)]
pub struct FilePlatform {
    processors: BTreeMap<usize, PlatformPerformance>,
}

impl FilePlatform {
    pub fn new(desc: &PlatformDescription) -> anyhow::Result<FilePlatform> {
        Ok(FilePlatform {
            processors: desc.processors()?,
        })
    }

    pub fn load(path: &Path) -> anyhow::Result<FilePlatform> {
        Self::new(&PlatformDescription::load(path)?)
    }

    pub fn cpus(&self) -> impl Iterator<Item = usize> + '_ {
        self.processors.keys().copied()
    }
}

impl Platform for FilePlatform {
    fn performance(&self, cpu: usize) -> Result<PlatformPerformance> {
        self.processors
            .get(&cpu)
            .cloned()
            .ok_or_else(|| PstateError::PlatformData {
                cpu,
                reason: "not described".to_string(),
            })
    }

    fn bind_hardware(&self, cpu: usize) -> Result<Box<dyn HardwareAccess>> {
        match MsrAccess::open(cpu) {
            Ok(msr) => Ok(Box::new(msr)),
            Err(e) => Err(PstateError::PlatformData {
                cpu,
                reason: format!("failed to open msr device: {e}"),
            }),
        }
    }
}
