// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Hardware access for fixed-hardware P-state registers.

use crate::cpu::host_path;
use log::debug;
use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;

pub const MSR_IA32_PERF_STATUS: u64 = 0x198;
pub const MSR_IA32_PERF_CTL: u64 = 0x199;

/// Bits of PERF_CTL / PERF_STATUS carrying the P-state code.
pub const PERF_CTL_MASK: u64 = 0xffff;

/// The two primitives the transition engine needs from the hardware.
///
/// Both are executed by the engine while the calling thread is pinned to the
/// processor the binding belongs to.
pub trait HardwareAccess: Send {
    /// Request the operating point identified by `control`.
    fn commit(&mut self, control: u64) -> io::Result<()>;

    /// Read the instantaneous status value.
    fn read_status(&mut self) -> io::Result<u64>;
}

/// P-state access through the msr driver's `/dev/cpu/<n>/msr`.
pub struct MsrAccess {
    cpu: usize,
    dev: File,
}

impl MsrAccess {
    pub fn open(cpu: usize) -> io::Result<MsrAccess> {
        let path = host_path(&format!("/dev/cpu/{cpu}/msr"));
        Self::open_path(cpu, &path)
    }

    pub fn open_path(cpu: usize, path: &Path) -> io::Result<MsrAccess> {
        let dev = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(MsrAccess { cpu, dev })
    }

    fn rdmsr(&self, reg: u64) -> io::Result<u64> {
        let mut buf = [0u8; 8];
        self.dev.read_exact_at(&mut buf, reg)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn wrmsr(&self, reg: u64, val: u64) -> io::Result<()> {
        self.dev.write_all_at(&val.to_le_bytes(), reg)
    }
}

impl HardwareAccess for MsrAccess {
    fn commit(&mut self, control: u64) -> io::Result<()> {
        let cur = self.rdmsr(MSR_IA32_PERF_CTL)?;
        let val = (cur & !PERF_CTL_MASK) | (control & PERF_CTL_MASK);
        debug!("CPU{}: PERF_CTL {:#x} -> {:#x}", self.cpu, cur, val);
        self.wrmsr(MSR_IA32_PERF_CTL, val)
    }

    fn read_status(&mut self) -> io::Result<u64> {
        Ok(self.rdmsr(MSR_IA32_PERF_STATUS)? & PERF_CTL_MASK)
    }
}
