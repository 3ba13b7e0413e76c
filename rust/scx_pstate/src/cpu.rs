// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Processor enumeration from sysfs.

use crate::cpumask::Cpumask;
use anyhow::Context;
use anyhow::Result;
use std::env;
use std::path::PathBuf;

lazy_static::lazy_static! {
    /// Prefix prepended to every `/sys` and `/dev` path, empty on a live host.
    pub static ref ROOT_PREFIX: String =
        env::var("SCX_PSTATE_ROOT_PREFIX").unwrap_or("".to_string());
}

/// Resolve an absolute host path against `ROOT_PREFIX`.
pub fn host_path(path: &str) -> PathBuf {
    PathBuf::from(format!("{}{}", *ROOT_PREFIX, path))
}

fn read_cpu_file(name: &str) -> Result<Cpumask> {
    let path = host_path(&format!("/sys/devices/system/cpu/{name}"));
    let cpulist = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Cpumask::from_cpulist(&cpulist).with_context(|| format!("Failed to parse {}", path.display()))
}

/// CPUs currently online.
pub fn online_cpus() -> Result<Cpumask> {
    read_cpu_file("online")
}

/// CPUs that could ever be brought online.
pub fn possible_cpus() -> Result<Cpumask> {
    read_cpu_file("possible")
}
