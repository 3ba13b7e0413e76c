// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use crate::pstate::OperatingPoint;
use std::collections::TryReserveError;

/// Terminates a [`FrequencyTable`].
pub const TABLE_END: u64 = u64::MAX;

/// Frequencies in Hz, in state table order, terminated by [`TABLE_END`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrequencyTable {
    entries: Vec<u64>,
}

/// Frequency limits requested for a processor, in Hz.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyLimits {
    pub min: u64,
    pub max: u64,
}

impl FrequencyTable {
    pub(crate) fn from_states(states: &[OperatingPoint]) -> Result<Self, TryReserveError> {
        let mut entries = Vec::new();
        entries.try_reserve_exact(states.len() + 1)?;
        entries.extend(states.iter().map(|s| s.frequency_hz()));
        entries.push(TABLE_END);
        Ok(FrequencyTable { entries })
    }

    /// Raw entries including the trailing sentinel.
    pub fn as_slice(&self) -> &[u64] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.entries.iter().copied().take_while(|&f| f != TABLE_END)
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn min_freq(&self) -> Option<u64> {
        self.iter().min()
    }

    pub fn max_freq(&self) -> Option<u64> {
        self.iter().max()
    }

    /// Adjust `limits` so that at least one table frequency lies within them.
    ///
    /// Limits are first clamped to the table's range. If no frequency falls
    /// inside, `max` is raised to the lowest frequency above it.
    pub fn verify(&self, limits: &mut PolicyLimits) {
        let (lo, hi) = match (self.min_freq(), self.max_freq()) {
            (Some(lo), Some(hi)) => (lo, hi),
            _ => return,
        };
        clamp_limits(limits, lo, hi);

        let mut next_larger = TABLE_END;
        for freq in self.iter() {
            if freq >= limits.min && freq <= limits.max {
                return;
            }
            if freq > limits.max && freq < next_larger {
                next_larger = freq;
            }
        }

        limits.max = next_larger;
        clamp_limits(limits, lo, hi);
    }
}

fn clamp_limits(limits: &mut PolicyLimits, lo: u64, hi: u64) {
    limits.min = limits.min.clamp(lo, hi);
    limits.max = limits.max.clamp(lo, hi);
    if limits.min > limits.max {
        limits.min = limits.max;
    }
}
