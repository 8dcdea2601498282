// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! GCQ register block and ring header layout.
//!
//! Each side sees the block it drives at offset `0x000` and the peer's block
//! at `0x100`; the hardware swaps the two halves between the producer and the
//! consumer apertures.

// Register offsets (bytes from the instance base address).
pub(crate) const REG_TAIL_POINTER: u64 = 0x000;
pub(crate) const REG_INTERRUPT: u64 = 0x004;
pub(crate) const REG_QUEUE_MEM_ADDR_LOW: u64 = 0x008;
pub(crate) const REG_RESET_INTERRUPT_CTRL: u64 = 0x00c;
pub(crate) const REG_QUEUE_MEM_ADDR_HIGH: u64 = 0x010;
pub(crate) const REG_PEER_TAIL_POINTER: u64 = 0x100;

// Reset / interrupt control bits.
pub(crate) const CTRL_INTERRUPT_ENABLE: u32 = 1 << 0;
pub(crate) const CTRL_INTERRUPT_TYPE_REGISTER: u32 = 1 << 1; // 0 = tail pointer write
pub(crate) const CTRL_RESET: u32 = 1 << 31; // self clearing

pub(crate) const INTERRUPT_TRIGGER: u32 = 1 << 0;

/// Both tail pointers read as all ones when the PCIe link is down.
pub(crate) const LINK_DOWN_PATTERN: u32 = u32::MAX;

/// Magic word published last by the producer once the header is complete.
pub const ALLOC_MAGIC: u32 = 0x5847_513f;

/// Size of the ring header in bytes.
pub const HEADER_LEN: u64 = 11 * 4;

// Header word offsets.
pub(crate) const HDR_MAGIC: u64 = 0x00;
pub(crate) const HDR_VERSION: u64 = 0x04;
pub(crate) const HDR_SLOT_NUM: u64 = 0x08;
pub(crate) const HDR_SQ_OFFSET: u64 = 0x0c;
pub(crate) const HDR_SQ_SLOT_SIZE: u64 = 0x10;
pub(crate) const HDR_CQ_OFFSET: u64 = 0x14;
pub(crate) const HDR_SQ_CONSUMED: u64 = 0x18;
pub(crate) const HDR_CQ_CONSUMED: u64 = 0x1c;
pub(crate) const HDR_FLAGS: u64 = 0x20;
pub(crate) const HDR_SQ_PRODUCED: u64 = 0x24;
pub(crate) const HDR_CQ_PRODUCED: u64 = 0x28;

/// Packs a protocol version into the header word.
pub const fn version_word(major: u8, minor: u8) -> u32 {
    ((major as u32) << 16) | minor as u32
}

/// Extracts the major version from a header word.
pub const fn version_major(word: u32) -> u32 {
    word >> 16
}

/// Extracts the minor version from a header word.
pub const fn version_minor(word: u32) -> u32 {
    word & 0xffff
}
