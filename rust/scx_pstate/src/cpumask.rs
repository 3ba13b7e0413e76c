// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! # Cpumask
//!
//! A Cpumask is a BitVec of u64's wide enough to describe every CPU the
//! kernel's affinity syscalls accept (`CPU_SETSIZE`). It is used to capture
//! and restore thread affinity around P-state operations.
//!
//!```rust
//!     use scx_pstate::Cpumask;
//!     let mut mask = Cpumask::from_cpulist("0-3,8").unwrap();
//!     assert!(mask.test_cpu(8));
//!     mask.clear_cpu(8).unwrap();
//!     assert_eq!(mask.weight(), 4);
//!     assert_eq!(mask.to_string(), "0-3");
//!     assert_eq!(format!("{:x}", mask), "0xf");
//!```

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use bitvec::prelude::*;
use sscanf::sscanf;
use std::fmt;

/// Number of CPUs a `libc::cpu_set_t` can describe.
pub const MAX_CPUS: usize = libc::CPU_SETSIZE as usize;

#[derive(Debug, Eq, Clone, Hash, PartialEq)]
pub struct Cpumask {
    mask: BitVec<u64, Lsb0>,
}

impl Default for Cpumask {
    fn default() -> Self {
        Self::new()
    }
}

impl Cpumask {
    fn check_cpu(&self, cpu: usize) -> Result<()> {
        if cpu >= MAX_CPUS {
            bail!("Invalid CPU {} passed, max {}", cpu, MAX_CPUS);
        }

        Ok(())
    }

    /// Build a new empty Cpumask object.
    pub fn new() -> Cpumask {
        Cpumask {
            mask: bitvec![u64, Lsb0; 0; MAX_CPUS],
        }
    }

    /// Build a Cpumask containing only `cpu`.
    pub fn of(cpu: usize) -> Result<Cpumask> {
        let mut mask = Cpumask::new();
        mask.set_cpu(cpu)?;
        Ok(mask)
    }

    /// Build a Cpumask object from a hexadecimal string.
    pub fn from_hex(cpumask: &str) -> Result<Cpumask> {
        let hex_str = {
            let mut tmp_str = cpumask
                .strip_prefix("0x")
                .unwrap_or(cpumask)
                .replace([',', '_'], "");
            if tmp_str.len() % 2 != 0 {
                tmp_str = "0".to_string() + &tmp_str;
            }
            tmp_str
        };
        let byte_vec =
            hex::decode(&hex_str).with_context(|| format!("Failed to parse cpumask: {cpumask}"))?;

        let mut mask = Cpumask::new();
        for (index, &val) in byte_vec.iter().rev().enumerate() {
            let mut v = val;
            while v != 0 {
                let lsb = v.trailing_zeros() as usize;
                v &= !(1 << lsb);
                mask.set_cpu(index * 8 + lsb)
                    .with_context(|| format!("cpumask {cpumask} is too wide"))?;
            }
        }

        Ok(mask)
    }

    /// Parse either a hexadecimal mask ("0xf0") or a cpulist ("4-7").
    pub fn parse(cpumask: &str) -> Result<Cpumask> {
        let cpumask = cpumask.trim();
        if cpumask.starts_with("0x") {
            Self::from_hex(cpumask)
        } else {
            Self::from_cpulist(cpumask)
        }
    }

    /// Build a Cpumask object from a kernel cpulist such as "0-3,8".
    pub fn from_cpulist(cpulist: &str) -> Result<Cpumask> {
        let mut mask = Cpumask::new();
        for cpu in read_cpulist(cpulist)? {
            mask.set_cpu(cpu)?;
        }

        Ok(mask)
    }

    /// Convert a raw affinity set returned by the kernel.
    pub fn from_cpu_set(set: &libc::cpu_set_t) -> Cpumask {
        let mut mask = Cpumask::new();
        for cpu in 0..MAX_CPUS {
            if unsafe { libc::CPU_ISSET(cpu, set) } {
                mask.mask.set(cpu, true);
            }
        }
        mask
    }

    /// Convert into the raw affinity set the kernel expects.
    pub fn to_cpu_set(&self) -> libc::cpu_set_t {
        let mut set: libc::cpu_set_t = unsafe { std::mem::zeroed() };
        for cpu in self.iter() {
            unsafe { libc::CPU_SET(cpu, &mut set) };
        }
        set
    }

    /// Return a slice of u64's whose bits reflect the Cpumask.
    pub fn as_raw_slice(&self) -> &[u64] {
        self.mask.as_raw_slice()
    }

    /// Set a bit in the Cpumask. Returns an error if the specified CPU exceeds
    /// the size of the Cpumask.
    pub fn set_cpu(&mut self, cpu: usize) -> Result<()> {
        self.check_cpu(cpu)?;
        self.mask.set(cpu, true);
        Ok(())
    }

    /// Clear a bit from the Cpumask. Returns an error if the specified CPU
    /// exceeds the size of the Cpumask.
    pub fn clear_cpu(&mut self, cpu: usize) -> Result<()> {
        self.check_cpu(cpu)?;
        self.mask.set(cpu, false);
        Ok(())
    }

    /// Test whether the specified CPU bit is set in the Cpumask.
    pub fn test_cpu(&self, cpu: usize) -> bool {
        match self.mask.get(cpu) {
            Some(bit) => *bit,
            None => false,
        }
    }

    /// Count the number of bits set in the Cpumask.
    pub fn weight(&self) -> usize {
        self.mask.count_ones()
    }

    pub fn is_empty(&self) -> bool {
        self.mask.not_any()
    }

    /// Iterate over the indices of the set bits.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.mask.iter_ones()
    }
}

pub fn read_cpulist(cpulist: &str) -> Result<Vec<usize>> {
    let cpulist = cpulist.trim_end_matches('\0').trim();
    let mut cpu_ids = vec![];
    if cpulist.is_empty() {
        return Ok(cpu_ids);
    }
    for group in cpulist.split(',') {
        let (min, max) = match sscanf!(group.trim(), "{usize}-{usize}") {
            Ok((x, y)) => (x, y),
            Err(_) => match sscanf!(group.trim(), "{usize}") {
                Ok(x) => (x, x),
                Err(_) => {
                    bail!("Failed to parse cpulist {}", group.trim());
                }
            },
        };
        if min > max {
            bail!("Invalid cpulist range {}", group.trim());
        }
        if max >= MAX_CPUS {
            bail!("Invalid CPU {} in cpulist, max {}", max, MAX_CPUS);
        }
        cpu_ids.extend(min..=max);
    }

    Ok(cpu_ids)
}

impl fmt::Display for Cpumask {
    /// Formats the mask in cpulist syntax.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        let mut cpus = self.iter().peekable();
        while let Some(start) = cpus.next() {
            let mut end = start;
            while cpus.peek() == Some(&(end + 1)) {
                end += 1;
                cpus.next();
            }
            if !first {
                write!(f, ",")?;
            }
            first = false;
            if start == end {
                write!(f, "{start}")?;
            } else {
                write!(f, "{start}-{end}")?;
            }
        }
        Ok(())
    }
}

impl fmt::LowerHex for Cpumask {
    /// Formats the mask as a single hexadecimal number, highest CPU first.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes: Vec<u8> = self
            .as_raw_slice()
            .iter()
            .rev()
            .flat_map(|word| word.to_be_bytes())
            .collect();
        let encoded = hex::encode(bytes);
        match encoded.trim_start_matches('0') {
            "" => write!(f, "0x0"),
            digits => write!(f, "0x{digits}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpulist_ranges() {
        assert_eq!(read_cpulist("0-2,5\n").unwrap(), vec![0, 1, 2, 5]);
        assert_eq!(read_cpulist("7").unwrap(), vec![7]);
        assert!(read_cpulist("").unwrap().is_empty());
        assert!(read_cpulist("3-1").is_err());
        assert!(read_cpulist("a-b").is_err());
    }

    #[test]
    fn cpulist_rejects_cpus_beyond_cpu_set() {
        assert!(read_cpulist("0-18446744073709551615").is_err());
        assert!(read_cpulist("0-4000000000").is_err());
        assert!(read_cpulist(&MAX_CPUS.to_string()).is_err());
        let last = MAX_CPUS - 1;
        assert_eq!(read_cpulist(&last.to_string()).unwrap(), vec![last]);
    }

    #[test]
    fn hex_formatting() {
        assert_eq!(format!("{:x}", Cpumask::from_cpulist("0-3").unwrap()), "0xf");
        assert_eq!(
            format!("{:x}", Cpumask::from_cpulist("4,64").unwrap()),
            "0x10000000000000010"
        );
        assert_eq!(format!("{:x}", Cpumask::new()), "0x0");

        let mask = Cpumask::from_cpulist("1,9,70").unwrap();
        assert_eq!(Cpumask::parse(&format!("{mask:x}")).unwrap(), mask);
        assert_eq!(Cpumask::parse(" 0-2 ").unwrap().weight(), 3);
    }

    #[test]
    fn hex_parsing() {
        let mask = Cpumask::from_hex("0xf0").unwrap();
        assert_eq!(mask.iter().collect::<Vec<_>>(), vec![4, 5, 6, 7]);
        let mask = Cpumask::from_hex("1,00000001").unwrap();
        assert_eq!(mask.iter().collect::<Vec<_>>(), vec![0, 32]);
        assert!(Cpumask::from_hex("xyz").is_err());
    }

    #[test]
    fn single_cpu_mask() {
        let mask = Cpumask::of(3).unwrap();
        assert_eq!(mask.weight(), 1);
        assert!(mask.test_cpu(3));
        assert!(!mask.test_cpu(2));
        assert!(Cpumask::of(MAX_CPUS).is_err());
    }

    #[test]
    fn cpu_set_conversion() {
        let mask = Cpumask::from_cpulist("1,4-6").unwrap();
        let set = mask.to_cpu_set();
        assert_eq!(Cpumask::from_cpu_set(&set), mask);
    }

    #[test]
    fn display_collapses_ranges() {
        let mask = Cpumask::from_cpulist("0,1,2,4,6-7").unwrap();
        assert_eq!(mask.to_string(), "0-2,4,6-7");
        assert_eq!(Cpumask::new().to_string(), "");
    }
}
