// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! # Frequency scaling driver
//!
//! The callbacks a frequency scaling framework drives: `init` and `exit` when
//! a processor's policy comes and goes, `target` to switch to a table index,
//! `get` to read the current frequency, plus `resume` and `verify`.
//!
//! The framework is expected to issue at most one request per processor at a
//! time. Requests for different processors may run concurrently.

use crate::affinity::Affinity;
use crate::affinity::ThreadAffinity;
use crate::engine::TransitionEngine;
use crate::error::Result;
use crate::freq_table::PolicyLimits;
use crate::platform::Platform;
use crate::pstate::StateTable;
use crate::registry::Activation;
use crate::registry::Registry;
use log::debug;
use log::warn;

pub const DRIVER_NAME: &str = "scx_pstate";

pub struct PstateDriver<P: Platform, A: Affinity = ThreadAffinity> {
    platform: P,
    registry: Registry,
    engine: TransitionEngine<A>,
}

impl<P: Platform> PstateDriver<P, ThreadAffinity> {
    pub fn new(platform: P) -> Self {
        Self::with_affinity(platform, ThreadAffinity)
    }
}

impl<P: Platform, A: Affinity> PstateDriver<P, A> {
    pub fn with_affinity(platform: P, affinity: A) -> Self {
        Self {
            platform,
            registry: Registry::new(),
            engine: TransitionEngine::new(affinity),
        }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn engine(&self) -> &TransitionEngine<A> {
        &self.engine
    }

    /// Take `cpu` under management and export its frequency table.
    pub fn init(&self, cpu: usize) -> Result<Activation> {
        debug!("{DRIVER_NAME}: init CPU{cpu}");
        let perf = self.platform.performance(cpu)?;
        self.registry
            .activate(cpu, &perf, || self.platform.bind_hardware(cpu))
            .inspect_err(|e| warn!("{DRIVER_NAME}: {e}"))
    }

    pub fn exit(&self, cpu: usize) {
        debug!("{DRIVER_NAME}: exit CPU{cpu}");
        self.registry.deactivate(cpu);
    }

    pub fn target(&self, cpu: usize, index: usize) -> Result<()> {
        self.registry.with_entry(cpu, |entry| {
            let (table, hw) = entry.parts();
            self.engine.request_transition(cpu, table, hw, index)
        })?
    }

    /// Current frequency of `cpu` in Hz, 0 if unknown.
    pub fn get(&self, cpu: usize) -> u64 {
        self.registry
            .with_entry(cpu, |entry| {
                let (table, hw) = entry.parts();
                self.engine.query_current_frequency(cpu, table, hw)
            })
            .unwrap_or(0)
    }

    /// Hardware state of `cpu` is unknown after a sleep cycle: force the
    /// next `target` to write it.
    pub fn resume(&self, cpu: usize) -> Result<()> {
        debug!("{DRIVER_NAME}: resume CPU{cpu}");
        self.registry
            .with_entry(cpu, |entry| entry.table_mut().mark_needs_reinit())
    }

    pub fn verify(&self, cpu: usize, limits: &mut PolicyLimits) -> Result<()> {
        self.registry
            .with_entry(cpu, |entry| entry.freq_table().verify(limits))
    }

    /// Snapshot of the state table of `cpu`.
    pub fn state_table(&self, cpu: usize) -> Result<StateTable> {
        self.registry.with_entry(cpu, |entry| entry.table().clone())
    }
}
