// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Host simulation of a GCQ register block and the ring memory it shares
//! with a peer.
//!
//! A [`SharedRegion`] holds two sparse 32-bit address spaces (registers and
//! memory). Any number of [`SimIo`] views can be attached to it, typically
//! one per side of a queue. Words that were never written read back as zero.
//!
//! The GCQ block exposes its two queues at offsets `0x000` and `0x100`, and
//! the peer sees them in the opposite order. [`SimIo::crossed`] models that
//! second aperture so register-mode tail pointers can be exercised on the
//! host.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::vec::Vec;

use parking_lot::Mutex;

use crate::IoAccess;

/// Distance between the two queue blocks of one GCQ register aperture.
pub const PEER_BLOCK_STRIDE: u64 = 0x100;
/// Size of one GCQ register aperture.
pub const APERTURE_LEN: u64 = 2 * PEER_BLOCK_STRIDE;

/// Kind of access recorded by the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    /// Register read.
    RegRead,
    /// Register write.
    RegWrite,
    /// Memory read.
    MemRead,
    /// Memory write.
    MemWrite,
}

/// One recorded access. Addresses are physical (after aperture crossing).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Access {
    /// What kind of access happened.
    pub kind: AccessKind,
    /// Physical address of the access.
    pub addr: u64,
    /// Value read or written.
    pub value: u32,
}

#[derive(Default)]
struct Spaces {
    regs: BTreeMap<u64, u32>,
    mem: BTreeMap<u64, u32>,
    log: Vec<Access>,
    recording: bool,
}

/// Backing store shared by every [`SimIo`] view.
#[derive(Default)]
pub struct SharedRegion {
    inner: Mutex<Spaces>,
}

impl SharedRegion {
    /// Creates an empty region wrapped for sharing between views.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns the raw value of a register without logging the access.
    pub fn peek_reg(&self, addr: u64) -> u32 {
        self.inner.lock().regs.get(&addr).copied().unwrap_or(0)
    }

    /// Overwrites a register without logging the access.
    pub fn poke_reg(&self, addr: u64, value: u32) {
        self.inner.lock().regs.insert(addr, value);
    }

    /// Returns the raw value of a memory word without logging the access.
    pub fn peek_mem(&self, addr: u64) -> u32 {
        self.inner.lock().mem.get(&addr).copied().unwrap_or(0)
    }

    /// Overwrites a memory word without logging the access.
    pub fn poke_mem(&self, addr: u64, value: u32) {
        self.inner.lock().mem.insert(addr, value);
    }

    /// Copies `len` bytes of memory starting at `addr` (little-endian words).
    pub fn snapshot(&self, addr: u64, len: usize) -> Vec<u8> {
        let inner = self.inner.lock();
        let mut out = Vec::with_capacity(len);
        let mut cursor = addr;
        while out.len() < len {
            let word = inner.mem.get(&cursor).copied().unwrap_or(0);
            for byte in word.to_le_bytes() {
                if out.len() < len {
                    out.push(byte);
                }
            }
            cursor += 4;
        }
        out
    }

    /// Starts (or restarts) recording accesses, discarding earlier records.
    pub fn start_recording(&self) {
        let mut inner = self.inner.lock();
        inner.log.clear();
        inner.recording = true;
    }

    /// Stops recording and returns everything captured since the last start.
    pub fn take_recording(&self) -> Vec<Access> {
        let mut inner = self.inner.lock();
        inner.recording = false;
        core::mem::take(&mut inner.log)
    }

    fn read(&self, kind: AccessKind, addr: u64) -> u32 {
        let mut inner = self.inner.lock();
        let space = match kind {
            AccessKind::RegRead => &inner.regs,
            _ => &inner.mem,
        };
        let value = space.get(&addr).copied().unwrap_or(0);
        if inner.recording {
            inner.log.push(Access { kind, addr, value });
        }
        value
    }

    fn write(&self, kind: AccessKind, addr: u64, value: u32) {
        let mut inner = self.inner.lock();
        match kind {
            AccessKind::RegWrite => inner.regs.insert(addr, value),
            _ => inner.mem.insert(addr, value),
        };
        if inner.recording {
            inner.log.push(Access { kind, addr, value });
        }
    }
}

/// One side's view of a [`SharedRegion`].
#[derive(Clone)]
pub struct SimIo {
    region: Arc<SharedRegion>,
    crossed_base: Option<u64>,
}

impl SimIo {
    /// Direct view: register offsets are used as given.
    pub fn new(region: Arc<SharedRegion>) -> Self {
        Self { region, crossed_base: None }
    }

    /// Peer view of the aperture at `base`: the two queue blocks are swapped.
    pub fn crossed(region: Arc<SharedRegion>, base: u64) -> Self {
        Self { region, crossed_base: Some(base) }
    }

    /// Returns the shared backing region.
    pub fn region(&self) -> &Arc<SharedRegion> {
        &self.region
    }

    fn translate(&self, addr: u64) -> u64 {
        match self.crossed_base {
            Some(base) if addr >= base && addr - base < APERTURE_LEN => {
                let offset = addr - base;
                if offset < PEER_BLOCK_STRIDE {
                    addr + PEER_BLOCK_STRIDE
                } else {
                    addr - PEER_BLOCK_STRIDE
                }
            }
            _ => addr,
        }
    }
}

impl IoAccess for SimIo {
    fn read_reg32(&self, addr: u64) -> u32 {
        self.region.read(AccessKind::RegRead, self.translate(addr))
    }

    fn write_reg32(&self, addr: u64, value: u32) {
        self.region.write(AccessKind::RegWrite, self.translate(addr), value)
    }

    fn read_mem32(&self, addr: u64) -> u32 {
        self.region.read(AccessKind::MemRead, addr)
    }

    fn write_mem32(&self, addr: u64, value: u32) {
        self.region.write(AccessKind::MemWrite, addr, value)
    }
}
