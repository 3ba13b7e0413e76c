// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! # Affinity pinning
//!
//! P-state registers are per processor and can only be driven from the
//! processor they belong to. [`AffinityGuard`] narrows the calling thread's
//! affinity to one CPU, verifies that the thread actually landed there and
//! restores the captured mask when dropped, whichever way the pinned section
//! is left.

use crate::cpumask::Cpumask;
use crate::error::PstateError;
use crate::error::Result;
use log::warn;
use std::io;
use std::mem::size_of;

/// Affinity control over the calling thread of execution.
pub trait Affinity {
    fn get_affinity(&self) -> io::Result<Cpumask>;
    fn set_affinity(&self, mask: &Cpumask) -> io::Result<()>;
    /// CPU the caller is executing on right now.
    fn current_cpu(&self) -> io::Result<usize>;
}

/// The calling OS thread, through `sched_{get,set}affinity(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadAffinity;

impl Affinity for ThreadAffinity {
    fn get_affinity(&self) -> io::Result<Cpumask> {
        let mut set: libc::cpu_set_t = unsafe { std::mem::zeroed() };
        let ret = unsafe { libc::sched_getaffinity(0, size_of::<libc::cpu_set_t>(), &mut set) };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Cpumask::from_cpu_set(&set))
    }

    fn set_affinity(&self, mask: &Cpumask) -> io::Result<()> {
        let set = mask.to_cpu_set();
        let ret = unsafe { libc::sched_setaffinity(0, size_of::<libc::cpu_set_t>(), &set) };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn current_cpu(&self) -> io::Result<usize> {
        let cpu = unsafe { libc::sched_getcpu() };
        if cpu < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(cpu as usize)
    }
}

/// Keeps the calling thread pinned to one CPU until dropped.
pub struct AffinityGuard<'a, A: Affinity + ?Sized> {
    affinity: &'a A,
    saved: Cpumask,
    cpu: usize,
}

impl<'a, A: Affinity + ?Sized> AffinityGuard<'a, A> {
    /// Pin the caller to `cpu`.
    ///
    /// Fails with `MigrationRace` if the pin could not be applied or the
    /// caller is not running on `cpu` afterwards. The original mask is
    /// already restored when this returns an error.
    pub fn pin(affinity: &'a A, cpu: usize) -> Result<AffinityGuard<'a, A>> {
        let saved = affinity.get_affinity().map_err(|e| {
            warn!("CPU{cpu}: failed to read affinity: {e}");
            PstateError::MigrationRace {
                cpu,
                running_on: None,
            }
        })?;
        let guard = AffinityGuard {
            affinity,
            saved,
            cpu,
        };

        let target = Cpumask::of(cpu).map_err(|e| {
            warn!("CPU{cpu}: {e}");
            PstateError::MigrationRace {
                cpu,
                running_on: None,
            }
        })?;
        if let Err(e) = affinity.set_affinity(&target) {
            warn!("CPU{cpu}: failed to set affinity: {e}");
            return Err(PstateError::MigrationRace {
                cpu,
                running_on: None,
            });
        }

        match affinity.current_cpu() {
            Ok(running) if running == cpu => Ok(guard),
            Ok(running) => {
                warn!("CPU{cpu}: pinned but still running on CPU{running}");
                Err(PstateError::MigrationRace {
                    cpu,
                    running_on: Some(running),
                })
            }
            Err(e) => {
                warn!("CPU{cpu}: failed to read current CPU: {e}");
                Err(PstateError::MigrationRace {
                    cpu,
                    running_on: None,
                })
            }
        }
    }
}

impl<A: Affinity + ?Sized> Drop for AffinityGuard<'_, A> {
    fn drop(&mut self) {
        if let Err(e) = self.affinity.set_affinity(&self.saved) {
            warn!(
                "CPU{}: failed to restore affinity to {}: {}",
                self.cpu, self.saved, e
            );
        }
    }
}

/// Run `op` pinned to `cpu`, restoring the caller's affinity afterwards.
///
/// `op` is not invoked when the pin fails.
pub fn with_affinity_pinned_to<A, T, F>(affinity: &A, cpu: usize, op: F) -> Result<T>
where
    A: Affinity + ?Sized,
    F: FnOnce() -> Result<T>,
{
    let _guard = AffinityGuard::pin(affinity, cpu)?;
    op()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_pin_restores_mask() {
        let affinity = ThreadAffinity;
        let before = affinity.get_affinity().unwrap();
        let cpu = before.iter().last().unwrap();

        let seen = with_affinity_pinned_to(&affinity, cpu, || {
            Ok((affinity.current_cpu().unwrap(), affinity.get_affinity().unwrap()))
        })
        .unwrap();
        assert_eq!(seen.0, cpu);
        assert_eq!(seen.1, Cpumask::of(cpu).unwrap());
        assert_eq!(affinity.get_affinity().unwrap(), before);
    }

    #[test]
    fn thread_pin_restores_mask_on_error() {
        let affinity = ThreadAffinity;
        let before = affinity.get_affinity().unwrap();
        let cpu = before.iter().next().unwrap();

        let res: Result<()> = with_affinity_pinned_to(&affinity, cpu, || {
            Err(PstateError::NotManaged { cpu })
        });
        assert!(matches!(res, Err(PstateError::NotManaged { .. })));
        assert_eq!(affinity.get_affinity().unwrap(), before);
    }

    #[test]
    fn thread_pin_to_impossible_cpu_is_race() {
        let affinity = ThreadAffinity;
        let before = affinity.get_affinity().unwrap();
        let mut called = false;
        let res = with_affinity_pinned_to(&affinity, crate::cpumask::MAX_CPUS, || {
            called = true;
            Ok(())
        });
        assert!(matches!(res, Err(PstateError::MigrationRace { .. })));
        assert!(!called);
        assert_eq!(affinity.get_affinity().unwrap(), before);
    }
}
