// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Platform accommodation switches and the index accessors that honour them.

use gcq_hal::IoAccess;
use log::warn;

/// Upper bound on re-reads before giving up on a stable value.
pub const DOUBLE_READ_RETRY_COUNT: usize = 1000;

bitflags::bitflags! {
    /// Behaviour flags for a queue instance.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct GcqFlags: u32 {
        /// Re-read ring indices until two consecutive reads agree.
        const DOUBLE_READ = 1 << 0;
        /// Keep produced indices in the ring header instead of registers.
        const IN_MEM_PTR = 1 << 1;
    }
}

/// Address space an index lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Space {
    Register,
    Memory,
}

pub(crate) fn read32<I: IoAccess>(io: &I, space: Space, addr: u64) -> u32 {
    match space {
        Space::Register => io.read_reg32(addr),
        Space::Memory => io.read_mem32(addr),
    }
}

pub(crate) fn write32<I: IoAccess>(io: &I, space: Space, addr: u64, value: u32) {
    match space {
        Space::Register => io.write_reg32(addr, value),
        Space::Memory => io.write_mem32(addr, value),
    }
}

/// Reads a word until two consecutive reads return the same value.
///
/// Gives up after [`DOUBLE_READ_RETRY_COUNT`] extra reads and returns the
/// most recent value.
pub(crate) fn double_read32<I: IoAccess>(io: &I, space: Space, addr: u64) -> u32 {
    let mut previous = read32(io, space, addr);
    for _ in 0..DOUBLE_READ_RETRY_COUNT {
        let current = read32(io, space, addr);
        if current == previous {
            return current;
        }
        previous = current;
    }
    warn!("gcq: value at {addr:#x} did not settle after {DOUBLE_READ_RETRY_COUNT} reads");
    previous
}

/// Reads a ring index, applying [`GcqFlags::DOUBLE_READ`] when set.
pub(crate) fn read_index<I: IoAccess>(io: &I, flags: GcqFlags, space: Space, addr: u64) -> u32 {
    if flags.contains(GcqFlags::DOUBLE_READ) {
        double_read32(io, space, addr)
    } else {
        read32(io, space, addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::{Cell, RefCell};
    use std::collections::VecDeque;

    /// Serves queued values, then repeats the last one.
    struct Unsettled {
        values: RefCell<VecDeque<u32>>,
        last: Cell<u32>,
        reads: Cell<usize>,
    }

    impl Unsettled {
        fn new(values: &[u32]) -> Self {
            Self {
                values: RefCell::new(values.iter().copied().collect()),
                last: Cell::new(0),
                reads: Cell::new(0),
            }
        }

        fn next(&self) -> u32 {
            self.reads.set(self.reads.get() + 1);
            if let Some(v) = self.values.borrow_mut().pop_front() {
                self.last.set(v);
            }
            self.last.get()
        }
    }

    impl IoAccess for Unsettled {
        fn read_reg32(&self, _addr: u64) -> u32 {
            self.next()
        }
        fn write_reg32(&self, _addr: u64, _value: u32) {}
        fn read_mem32(&self, _addr: u64) -> u32 {
            self.next()
        }
        fn write_mem32(&self, _addr: u64, _value: u32) {}
    }

    #[test]
    fn double_read_waits_for_agreement() {
        let io = Unsettled::new(&[3, 4, 5, 5]);
        assert_eq!(double_read32(&io, Space::Memory, 0), 5);
        assert_eq!(io.reads.get(), 4);
    }

    #[test]
    fn single_read_without_flag() {
        let io = Unsettled::new(&[3, 4]);
        assert_eq!(read_index(&io, GcqFlags::empty(), Space::Register, 0), 3);
        assert_eq!(io.reads.get(), 1);
    }

    #[test]
    fn double_read_gives_up_on_flapping_value() {
        let flapping: std::vec::Vec<u32> =
            (0..(DOUBLE_READ_RETRY_COUNT as u32 + 10)).collect();
        let io = Unsettled::new(&flapping);
        let value = read_index(&io, GcqFlags::DOUBLE_READ, Space::Memory, 0);
        assert_eq!(value, DOUBLE_READ_RETRY_COUNT as u32);
        assert_eq!(io.reads.get(), DOUBLE_READ_RETRY_COUNT + 1);
    }
}
