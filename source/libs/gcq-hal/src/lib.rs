// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Register and shared-memory access seam for the GCQ queue drivers
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: Unit tests (trait forwarding + host simulator)
//!
//! PUBLIC API:
//!   - IoAccess: 32-bit register and memory accessors injected into the drivers
//!   - sim::{SharedRegion, SimIo}: host-side simulation of a register block plus
//!     a shared ring region (feature `backend-host`)
//!
//! DEPENDENCIES:
//!   - parking_lot: host simulator locking (feature `backend-host`)
//!
//! ADR: docs/adr/0001-gcq-ring-protocol.md

#![cfg_attr(not(any(test, feature = "backend-host")), no_std)]
#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

#[cfg(feature = "backend-host")]
pub mod sim;

/// 32-bit access to device registers and to the memory shared with a peer.
///
/// Register and memory accessors are separate because some platforms map the
/// queue registers through a different aperture than the ring memory. An
/// implementation is bound once per driver context and shared by every queue
/// instance created from it.
pub trait IoAccess {
    /// Reads a 32-bit device register.
    fn read_reg32(&self, addr: u64) -> u32;
    /// Writes a 32-bit device register.
    fn write_reg32(&self, addr: u64, value: u32);
    /// Reads a 32-bit word of shared memory.
    fn read_mem32(&self, addr: u64) -> u32;
    /// Writes a 32-bit word of shared memory.
    fn write_mem32(&self, addr: u64, value: u32);
}

impl<T: IoAccess + ?Sized> IoAccess for &T {
    fn read_reg32(&self, addr: u64) -> u32 {
        (**self).read_reg32(addr)
    }

    fn write_reg32(&self, addr: u64, value: u32) {
        (**self).write_reg32(addr, value)
    }

    fn read_mem32(&self, addr: u64) -> u32 {
        (**self).read_mem32(addr)
    }

    fn write_mem32(&self, addr: u64, value: u32) {
        (**self).write_mem32(addr, value)
    }
}

#[cfg(feature = "backend-host")]
impl<T: IoAccess + ?Sized> IoAccess for std::sync::Arc<T> {
    fn read_reg32(&self, addr: u64) -> u32 {
        (**self).read_reg32(addr)
    }

    fn write_reg32(&self, addr: u64, value: u32) {
        (**self).write_reg32(addr, value)
    }

    fn read_mem32(&self, addr: u64) -> u32 {
        (**self).read_mem32(addr)
    }

    fn write_mem32(&self, addr: u64, value: u32) {
        (**self).write_mem32(addr, value)
    }
}
