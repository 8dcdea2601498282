// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Programming of the GCQ IP block registers.

use gcq_hal::IoAccess;
use log::debug;

use crate::regmap::*;
use crate::{InterruptMode, Role};

/// Records the ring location in the block; the producer also soft-resets it.
///
/// The consumer never resets: the block is owned by the producer side.
pub(crate) fn init<I: IoAccess>(io: &I, role: Role, base: u64, ring_addr: u64) {
    if role == Role::Producer {
        let ctrl = io.read_reg32(base + REG_RESET_INTERRUPT_CTRL);
        io.write_reg32(base + REG_RESET_INTERRUPT_CTRL, ctrl | CTRL_RESET);
    }
    io.write_reg32(base + REG_QUEUE_MEM_ADDR_LOW, ring_addr as u32);
    io.write_reg32(base + REG_QUEUE_MEM_ADDR_HIGH, (ring_addr >> 32) as u32);
    debug!("gcq: hw init complete ({role:?}) base={base:#x}");
}

pub(crate) fn configure_interrupt_mode<I: IoAccess>(io: &I, mode: InterruptMode, base: u64) {
    let value = match mode {
        InterruptMode::Polling => 0,
        InterruptMode::TailPointer => CTRL_INTERRUPT_ENABLE,
        InterruptMode::InterruptRegister => CTRL_INTERRUPT_ENABLE | CTRL_INTERRUPT_TYPE_REGISTER,
    };
    io.write_reg32(base + REG_RESET_INTERRUPT_CTRL, value);
    debug!("gcq: interrupt mode {mode:?}");
}

pub(crate) fn trigger_interrupt<I: IoAccess>(io: &I, base: u64) {
    io.write_reg32(base + REG_INTERRUPT, INTERRUPT_TRIGGER);
}

/// Reading the interrupt register acknowledges an asserted interrupt.
pub(crate) fn clear_interrupt<I: IoAccess>(io: &I, base: u64) {
    let _ = io.read_reg32(base + REG_INTERRUPT);
}

pub(crate) fn link_down<I: IoAccess>(io: &I, base: u64) -> bool {
    io.read_reg32(base + REG_TAIL_POINTER) == LINK_DOWN_PATTERN
        && io.read_reg32(base + REG_PEER_TAIL_POINTER) == LINK_DOWN_PATTERN
}
