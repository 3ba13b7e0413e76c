// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! # Simulated collaborators
//!
//! Stand-ins for the hardware, the scheduler's affinity control and the
//! platform firmware. They allow the transition engine to be driven on hosts
//! without fixed-hardware P-states and let tests inject failures. All types
//! are cheap handles around shared state: clones observe the same state.

use crate::affinity::Affinity;
use crate::cpumask::Cpumask;
use crate::error::PstateError;
use crate::error::Result;
use crate::hw::HardwareAccess;
use crate::platform::Platform;
use crate::platform::PlatformDescription;
use crate::pstate::PlatformPerformance;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::thread;
use std::thread::ThreadId;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, Default)]
struct HwState {
    /// control -> status reported once that control is in effect
    status_of: BTreeMap<u64, u64>,
    status: u64,
    forced_status: Option<u64>,
    commits: Vec<u64>,
    reads: usize,
    fail_commits: bool,
    fail_reads: bool,
}

/// Simulated fixed-hardware P-state registers of one processor.
#[derive(Debug, Clone, Default)]
pub struct SimulatedHardware {
    state: Arc<Mutex<HwState>>,
}

impl SimulatedHardware {
    /// Hardware running in state `perf.state` of `perf.states`.
    pub fn new(perf: &PlatformPerformance) -> SimulatedHardware {
        let status_of = perf.states.iter().map(|s| (s.control, s.status)).collect();
        let status = perf.states.get(perf.state).map(|s| s.status).unwrap_or(0);
        SimulatedHardware {
            state: Arc::new(Mutex::new(HwState {
                status_of,
                status,
                ..Default::default()
            })),
        }
    }

    /// Control values committed so far, oldest first.
    pub fn commits(&self) -> Vec<u64> {
        lock(&self.state).commits.clone()
    }

    pub fn reads(&self) -> usize {
        lock(&self.state).reads
    }

    pub fn fail_commits(&self, fail: bool) {
        lock(&self.state).fail_commits = fail;
    }

    pub fn fail_reads(&self, fail: bool) {
        lock(&self.state).fail_reads = fail;
    }

    /// Report `status` regardless of the committed control value.
    pub fn force_status(&self, status: Option<u64>) {
        lock(&self.state).forced_status = status;
    }
}

impl HardwareAccess for SimulatedHardware {
    fn commit(&mut self, control: u64) -> io::Result<()> {
        let mut st = lock(&self.state);
        if st.fail_commits {
            return Err(io::Error::other("simulated commit failure"));
        }
        st.commits.push(control);
        if let Some(&status) = st.status_of.get(&control) {
            st.status = status;
        }
        Ok(())
    }

    fn read_status(&mut self) -> io::Result<u64> {
        let mut st = lock(&self.state);
        st.reads += 1;
        if st.fail_reads {
            return Err(io::Error::other("simulated read failure"));
        }
        Ok(st.forced_status.unwrap_or(st.status))
    }
}

#[derive(Debug, Clone)]
struct ThreadState {
    mask: Cpumask,
    running_on: usize,
    set_calls: usize,
}

#[derive(Debug)]
struct AffinityState {
    initial: ThreadState,
    threads: HashMap<ThreadId, ThreadState>,
    races: usize,
}

impl AffinityState {
    fn current(&mut self) -> &mut ThreadState {
        let initial = &self.initial;
        self.threads
            .entry(thread::current().id())
            .or_insert_with(|| initial.clone())
    }
}

/// Affinity of simulated threads.
///
/// Every OS thread using the handle gets its own simulated mask, starting
/// from the one passed to [`SimulatedAffinity::new`]. Setting a mask that
/// excludes the CPU the thread runs on migrates it to the lowest CPU in the
/// mask, unless a migration race was injected with
/// [`SimulatedAffinity::race_next_pin`].
#[derive(Debug, Clone)]
pub struct SimulatedAffinity {
    state: Arc<Mutex<AffinityState>>,
}

impl SimulatedAffinity {
    pub fn new(mask: Cpumask) -> SimulatedAffinity {
        let running_on = mask.iter().next().unwrap_or(0);
        SimulatedAffinity {
            state: Arc::new(Mutex::new(AffinityState {
                initial: ThreadState {
                    mask,
                    running_on,
                    set_calls: 0,
                },
                threads: HashMap::new(),
                races: 0,
            })),
        }
    }

    /// Leave the pinning thread where it is on the next `n` mask changes.
    pub fn race_next_pin(&self, n: usize) {
        lock(&self.state).races = n;
    }

    pub fn mask(&self) -> Cpumask {
        lock(&self.state).current().mask.clone()
    }

    pub fn running_on(&self) -> usize {
        lock(&self.state).current().running_on
    }

    pub fn set_calls(&self) -> usize {
        lock(&self.state).current().set_calls
    }
}

impl Affinity for SimulatedAffinity {
    fn get_affinity(&self) -> io::Result<Cpumask> {
        Ok(self.mask())
    }

    fn set_affinity(&self, mask: &Cpumask) -> io::Result<()> {
        let first = match mask.iter().next() {
            Some(cpu) => cpu,
            None => return Err(io::Error::from_raw_os_error(libc::EINVAL)),
        };
        let mut st = lock(&self.state);
        let racing = st.races > 0;
        if racing {
            st.races -= 1;
        }
        let thread = st.current();
        thread.set_calls += 1;
        thread.mask = mask.clone();
        if !racing && !mask.test_cpu(thread.running_on) {
            thread.running_on = first;
        }
        Ok(())
    }

    fn current_cpu(&self) -> io::Result<usize> {
        Ok(self.running_on())
    }
}

/// Platform backed by a description with simulated hardware per processor.
#[derive(Debug, Clone, Default)]
pub struct SimulatedPlatform {
    processors: Arc<BTreeMap<usize, PlatformPerformance>>,
    hardware: Arc<Mutex<BTreeMap<usize, SimulatedHardware>>>,
}

impl SimulatedPlatform {
    pub fn new(processors: BTreeMap<usize, PlatformPerformance>) -> SimulatedPlatform {
        SimulatedPlatform {
            processors: Arc::new(processors),
            hardware: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    pub fn from_description(desc: &PlatformDescription) -> anyhow::Result<SimulatedPlatform> {
        Ok(Self::new(desc.processors()?))
    }

    pub fn cpus(&self) -> impl Iterator<Item = usize> + '_ {
        self.processors.keys().copied()
    }

    /// Hardware bound to `cpu`, once it has been bound.
    pub fn hardware(&self, cpu: usize) -> Option<SimulatedHardware> {
        lock(&self.hardware).get(&cpu).cloned()
    }
}

impl Platform for SimulatedPlatform {
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
        let perf = self.performance(cpu)?;
        let hw = lock(&self.hardware)
            .entry(cpu)
            .or_insert_with(|| SimulatedHardware::new(&perf))
            .clone();
        Ok(Box::new(hw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn affinity_migrates_unless_racing() {
        let aff = SimulatedAffinity::new(Cpumask::from_cpulist("0-3").unwrap());
        assert_eq!(aff.running_on(), 0);

        aff.set_affinity(&Cpumask::of(2).unwrap()).unwrap();
        assert_eq!(aff.current_cpu().unwrap(), 2);

        aff.race_next_pin(1);
        aff.set_affinity(&Cpumask::of(3).unwrap()).unwrap();
        assert_eq!(aff.current_cpu().unwrap(), 2);
        assert_eq!(aff.mask(), Cpumask::of(3).unwrap());

        assert!(aff.set_affinity(&Cpumask::new()).is_err());
        assert_eq!(aff.set_calls(), 2);
    }

    #[test]
    fn affinity_is_per_thread() {
        let aff = SimulatedAffinity::new(Cpumask::from_cpulist("0-3").unwrap());
        aff.set_affinity(&Cpumask::of(2).unwrap()).unwrap();

        let other = aff.clone();
        let (mask, cpu) = std::thread::spawn(move || (other.mask(), other.running_on()))
            .join()
            .unwrap();
        assert_eq!(mask, Cpumask::from_cpulist("0-3").unwrap());
        assert_eq!(cpu, 0);
        assert_eq!(aff.running_on(), 2);
    }
}
