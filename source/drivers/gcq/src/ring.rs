// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Ring cursors, slot arithmetic and the shared header.

use gcq_hal::IoAccess;

use crate::features::{read32, read_index, write32, GcqFlags, Space};
use crate::regmap::*;

/// Largest power of two `n` with `n * (sq_slot_size + cq_slot_size) <= ring_len`.
///
/// `ring_len` covers the slot region only; the header sits in front of it.
/// Returns 0 when not even one slot of each queue fits.
pub fn alloc_num_slots(ring_len: u64, sq_slot_size: u32, cq_slot_size: u32) -> u32 {
    let per_slot = u64::from(sq_slot_size) + u64::from(cq_slot_size);
    if per_slot == 0 || per_slot > ring_len {
        return 0;
    }
    let mut slots: u64 = 1;
    while slots < (1 << 31) && (slots << 1) * per_slot <= ring_len {
        slots <<= 1;
    }
    slots as u32
}

/// Local view of one queue (SQ or CQ) of a ring.
#[derive(Debug, Clone)]
pub(crate) struct Ring {
    pub(crate) slot_num: u32,
    pub(crate) slot_size: u32,
    pub(crate) produced: u32,
    pub(crate) consumed: u32,
    produced_addr: u64,
    produced_space: Space,
    consumed_addr: u64,
    slot_addr: u64,
}

impl Ring {
    pub(crate) fn new(
        produced_addr: u64,
        produced_space: Space,
        consumed_addr: u64,
        slot_addr: u64,
        slot_num: u32,
        slot_size: u32,
    ) -> Self {
        Self {
            slot_num,
            slot_size,
            produced: 0,
            consumed: 0,
            produced_addr,
            produced_space,
            consumed_addr,
            slot_addr,
        }
    }

    pub(crate) fn slot_addr(&self) -> u64 {
        self.slot_addr
    }

    pub(crate) fn read_produced<I: IoAccess>(&mut self, io: &I, flags: GcqFlags) {
        self.produced = read_index(io, flags, self.produced_space, self.produced_addr);
    }

    pub(crate) fn write_produced<I: IoAccess>(&self, io: &I) {
        write32(io, self.produced_space, self.produced_addr, self.produced);
    }

    // Consumed indices never raise interrupts, so they always live in the header.
    pub(crate) fn read_consumed<I: IoAccess>(&mut self, io: &I, flags: GcqFlags) {
        self.consumed = read_index(io, flags, Space::Memory, self.consumed_addr);
    }

    pub(crate) fn write_consumed<I: IoAccess>(&self, io: &I) {
        write32(io, Space::Memory, self.consumed_addr, self.consumed);
    }

    pub(crate) fn is_full(&self) -> bool {
        self.produced.wrapping_sub(self.consumed) >= self.slot_num
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.produced == self.consumed
    }

    fn slot_at(&self, index: u32) -> u64 {
        self.slot_addr + u64::from(self.slot_size) * u64::from(index & (self.slot_num - 1))
    }

    pub(crate) fn produced_slot(&self) -> u64 {
        self.slot_at(self.produced)
    }

    pub(crate) fn consumed_slot(&self) -> u64 {
        self.slot_at(self.consumed)
    }

    /// Refreshes the peer's consumed index only when the ring looks full.
    pub(crate) fn can_produce<I: IoAccess>(&mut self, io: &I, flags: GcqFlags) -> bool {
        if !self.is_full() {
            return true;
        }
        self.read_consumed(io, flags);
        !self.is_full()
    }

    /// Refreshes the peer's produced index only when the ring looks empty.
    pub(crate) fn can_consume<I: IoAccess>(&mut self, io: &I, flags: GcqFlags) -> bool {
        if !self.is_empty() {
            return true;
        }
        self.read_produced(io, flags);
        !self.is_empty()
    }

    /// Discards anything pending: consumed catches up with produced.
    pub(crate) fn soft_reset<I: IoAccess>(&mut self, io: &I, flags: GcqFlags) {
        self.read_produced(io, flags);
        self.consumed = self.produced;
        self.write_consumed(io);
    }

    /// Adopts whatever indices the peer has already published.
    pub(crate) fn fast_forward<I: IoAccess>(&mut self, io: &I, flags: GcqFlags) {
        self.read_produced(io, flags);
        self.read_consumed(io, flags);
    }
}

/// Decoded copy of the shared ring header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingHeader {
    /// [`ALLOC_MAGIC`] once published.
    pub magic: u32,
    /// Packed protocol version, see [`version_word`].
    pub version: u32,
    /// Slot count shared by both queues.
    pub slot_num: u32,
    /// SQ slot region offset from the header.
    pub sq_offset: u32,
    /// SQ slot size in bytes.
    pub sq_slot_size: u32,
    /// CQ slot region offset from the header.
    pub cq_offset: u32,
    /// SQ consumed index.
    pub sq_consumed: u32,
    /// CQ consumed index.
    pub cq_consumed: u32,
    /// Producer flags at publication time.
    pub flags: u32,
    /// In-memory SQ produced index.
    pub sq_produced: u32,
    /// In-memory CQ produced index.
    pub cq_produced: u32,
}

impl RingHeader {
    const FIELDS: [u64; 11] = [
        HDR_MAGIC,
        HDR_VERSION,
        HDR_SLOT_NUM,
        HDR_SQ_OFFSET,
        HDR_SQ_SLOT_SIZE,
        HDR_CQ_OFFSET,
        HDR_SQ_CONSUMED,
        HDR_CQ_CONSUMED,
        HDR_FLAGS,
        HDR_SQ_PRODUCED,
        HDR_CQ_PRODUCED,
    ];

    fn words(&self) -> [u32; 11] {
        [
            self.magic,
            self.version,
            self.slot_num,
            self.sq_offset,
            self.sq_slot_size,
            self.cq_offset,
            self.sq_consumed,
            self.cq_consumed,
            self.flags,
            self.sq_produced,
            self.cq_produced,
        ]
    }

    /// Reads the full header at `ring_addr`.
    pub fn read<I: IoAccess>(io: &I, ring_addr: u64) -> Self {
        let mut w = [0u32; 11];
        for (word, offset) in w.iter_mut().zip(Self::FIELDS) {
            *word = read32(io, Space::Memory, ring_addr + offset);
        }
        Self {
            magic: w[0],
            version: w[1],
            slot_num: w[2],
            sq_offset: w[3],
            sq_slot_size: w[4],
            cq_offset: w[5],
            sq_consumed: w[6],
            cq_consumed: w[7],
            flags: w[8],
            sq_produced: w[9],
            cq_produced: w[10],
        }
    }

    /// Writes every header word at `ring_addr`, magic first.
    pub(crate) fn write<I: IoAccess>(&self, io: &I, ring_addr: u64) {
        for (value, offset) in self.words().into_iter().zip(Self::FIELDS) {
            write32(io, Space::Memory, ring_addr + offset, value);
        }
    }
}
