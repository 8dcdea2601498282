// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Generic Communication Queue (GCQ) shared-memory ring protocol
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable (wire layout), Unstable (Rust API)
//! TEST_COVERAGE: Unit tests per module + tests/protocol.rs (two-peer host simulation)
//!
//! PUBLIC API:
//!   - Gcq: driver context owning a bounded arena of queue instances
//!   - Gcq::init()/deinit(): instance lifecycle
//!   - Gcq::attach_consumer(): magic + version handshake
//!   - Gcq::produce_data()/consume_data(): slot level data path
//!   - version(): protocol implementation version
//!
//! A ring is one shared region holding a header and two queues, the
//! submission queue (SQ) and the completion queue (CQ). Both queues carry
//! the same power-of-two number of slots. The producer role produces onto
//! the CQ and consumes from the SQ; the consumer role does the opposite and
//! must attach before it may consume.
//!
//! DEPENDENCIES:
//!   - gcq-hal::IoAccess: every hardware-visible effect
//!   - bitflags: GcqFlags
//!   - log: protocol diagnostics
//!
//! ADR: docs/adr/0001-gcq-ring-protocol.md

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

mod features;
mod hw;
pub mod regmap;
mod ring;

pub use features::{GcqFlags, DOUBLE_READ_RETRY_COUNT};
pub use regmap::{ALLOC_MAGIC, HEADER_LEN};
pub use ring::{alloc_num_slots, RingHeader};

use gcq_hal::IoAccess;
use log::{debug, warn};

use crate::features::Space;
use crate::regmap::*;
use crate::ring::Ring;

/// Number of queue instances a single [`Gcq`] context can host.
pub const MAX_INSTANCES: usize = 4;
/// Smallest usable slot count.
pub const MIN_NUM_SLOTS: u32 = 1;
/// Largest supported slot count.
pub const MAX_NUM_SLOTS: u32 = 1024;
/// Largest supported slot size in bytes.
pub const MAX_SLOT_SIZE: u32 = 4096;

const UPPER_FIREWALL: u32 = 0xbeef_cafe;
const LOWER_FIREWALL: u32 = 0xdead_face;

/// Result alias for protocol operations.
pub type Result<T> = core::result::Result<T, GcqError>;

/// Errors reported by the ring protocol.
#[derive(Debug, Clone, Copy, thiserror::Error, PartialEq, Eq, Hash)]
#[must_use = "gcq errors must be handled"]
pub enum GcqError {
    /// The driver context is corrupted or was never set up.
    #[error("gcq driver not initialised")]
    DriverNotInitialised,
    /// Every instance slot of the context is in use.
    #[error("no free gcq instances")]
    NoFreeInstances,
    /// The instance id is unknown or stale.
    #[error("invalid gcq instance")]
    InvalidInstance,
    /// An argument is malformed or contradicts the instance role.
    #[error("invalid argument")]
    InvalidArg,
    /// A slot size is zero, unaligned, too large or disagrees with the peer.
    #[error("invalid slot size")]
    InvalidSlotSize,
    /// The peer published an incompatible major version.
    #[error("incompatible ring version")]
    InvalidVersion,
    /// The derived slot count is out of range or disagrees with the peer.
    #[error("invalid number of slots")]
    InvalidNumSlots,
    /// Consume attempted before the consumer attached.
    #[error("consumer not attached")]
    ConsumerNotAttached,
    /// The producer has not published a valid header yet.
    #[error("producer not available")]
    ConsumerNotAvailable,
    /// The incoming queue is empty (or the link is down).
    #[error("no data received")]
    ConsumerNoDataReceived,
    /// The outgoing queue is full.
    #[error("no free producer slots")]
    ProducerNoFreeSlots,
}

impl GcqError {
    /// Stable numeric code; `0` is reserved for success.
    pub const fn code(self) -> u32 {
        match self {
            Self::DriverNotInitialised => 1,
            Self::NoFreeInstances => 2,
            Self::InvalidInstance => 3,
            Self::InvalidArg => 4,
            Self::InvalidSlotSize => 5,
            Self::InvalidVersion => 6,
            Self::InvalidNumSlots => 7,
            Self::ConsumerNotAttached => 8,
            Self::ConsumerNotAvailable => 9,
            Self::ConsumerNoDataReceived => 10,
            Self::ProducerNoFreeSlots => 11,
        }
    }
}

/// Side of the ring an instance drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Publishes the header; produces onto the CQ, consumes from the SQ.
    Producer,
    /// Attaches to a published ring; produces onto the SQ, consumes from the CQ.
    Consumer,
}

/// Peer notification scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterruptMode {
    /// No interrupts; the peer polls.
    Polling,
    /// Interrupt raised by the tail pointer write.
    TailPointer,
    /// Interrupt raised explicitly through the interrupt register.
    InterruptRegister,
}

/// Protocol implementation version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    /// Major version; must match the peer.
    pub major: u8,
    /// Minor version.
    pub minor: u8,
    /// Patch level.
    pub patch: u8,
    /// Commits since the release tag.
    pub dev_commits: u8,
}

const fn parse_u8(s: &str) -> u8 {
    let bytes = s.as_bytes();
    let mut value: u8 = 0;
    let mut i = 0;
    while i < bytes.len() {
        value = value * 10 + (bytes[i] - b'0');
        i += 1;
    }
    value
}

const VERSION: Version = Version {
    major: parse_u8(env!("CARGO_PKG_VERSION_MAJOR")),
    minor: parse_u8(env!("CARGO_PKG_VERSION_MINOR")),
    patch: parse_u8(env!("CARGO_PKG_VERSION_PATCH")),
    dev_commits: 0,
};

/// Returns the version of this protocol implementation.
pub const fn version() -> Version {
    VERSION
}

/// Header word published by producers built from this crate.
pub const fn header_version_word() -> u32 {
    version_word(VERSION.major, VERSION.minor)
}

/// Parameters of a new queue instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceConfig {
    /// Ring side.
    pub role: Role,
    /// Notification scheme.
    pub interrupt_mode: InterruptMode,
    /// Platform accommodations.
    pub flags: GcqFlags,
    /// Register block base address.
    pub base_addr: u64,
    /// Address of the ring header.
    pub ring_addr: u64,
    /// Length of the slot region following the header.
    pub ring_len: u64,
    /// Submission queue slot size in bytes.
    pub sq_slot_size: u32,
    /// Completion queue slot size in bytes.
    pub cq_slot_size: u32,
}

/// Generation-checked reference to a live instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceId {
    index: u8,
    generation: u32,
}

impl InstanceId {
    /// Arena slot backing the instance.
    pub fn index(self) -> usize {
        usize::from(self.index)
    }
}

struct Instance {
    role: Role,
    interrupt_mode: InterruptMode,
    flags: GcqFlags,
    base_addr: u64,
    ring_addr: u64,
    num_slots: u32,
    sq: Ring,
    cq: Ring,
    attached: bool,
}

impl Instance {
    fn outgoing(&mut self) -> &mut Ring {
        match self.role {
            Role::Producer => &mut self.cq,
            Role::Consumer => &mut self.sq,
        }
    }

    fn incoming(&mut self) -> &mut Ring {
        match self.role {
            Role::Producer => &mut self.sq,
            Role::Consumer => &mut self.cq,
        }
    }
}

#[derive(Default)]
struct Entry {
    generation: u32,
    instance: Option<Instance>,
}

/// Driver context: the injected I/O bundle plus the instance arena.
pub struct Gcq<I: IoAccess> {
    upper_firewall: u32,
    io: I,
    entries: [Entry; MAX_INSTANCES],
    allocated: usize,
    lower_firewall: u32,
}

fn check_slot_size(size: u32) -> Result<()> {
    if size == 0 || size % 4 != 0 || size > MAX_SLOT_SIZE {
        warn!("gcq: invalid slot size {size}");
        return Err(GcqError::InvalidSlotSize);
    }
    Ok(())
}

fn lookup(entries: &mut [Entry; MAX_INSTANCES], id: InstanceId) -> Result<&mut Instance> {
    let entry = entries.get_mut(id.index()).ok_or(GcqError::InvalidInstance)?;
    if entry.generation != id.generation {
        return Err(GcqError::InvalidInstance);
    }
    entry.instance.as_mut().ok_or(GcqError::InvalidInstance)
}

fn check_len(len: usize, slot_size: u32) -> Result<()> {
    if len % 4 != 0 {
        debug!("gcq: length {len:#x} is not 32-bit aligned");
        return Err(GcqError::InvalidArg);
    }
    if len > slot_size as usize {
        debug!("gcq: length {len:#x} exceeds slot size {slot_size}");
        return Err(GcqError::InvalidArg);
    }
    Ok(())
}

impl<I: IoAccess> Gcq<I> {
    /// Creates a context bound to `io`.
    pub fn new(io: I) -> Self {
        Self {
            upper_firewall: UPPER_FIREWALL,
            io,
            entries: Default::default(),
            allocated: 0,
            lower_firewall: LOWER_FIREWALL,
        }
    }

    /// Returns the bound I/O bundle.
    pub fn io(&self) -> &I {
        &self.io
    }

    /// Number of live instances.
    pub fn live_instances(&self) -> usize {
        self.allocated
    }

    fn check_guard(&self) -> Result<()> {
        if self.upper_firewall != UPPER_FIREWALL || self.lower_firewall != LOWER_FIREWALL {
            return Err(GcqError::DriverNotInitialised);
        }
        Ok(())
    }

    fn instance(&self, id: InstanceId) -> Result<&Instance> {
        self.check_guard()?;
        let entry = self.entries.get(id.index()).ok_or(GcqError::InvalidInstance)?;
        if entry.generation != id.generation {
            return Err(GcqError::InvalidInstance);
        }
        entry.instance.as_ref().ok_or(GcqError::InvalidInstance)
    }

    /// Creates a queue instance and, for a producer, publishes the ring header.
    pub fn init(&mut self, cfg: &InstanceConfig) -> Result<InstanceId> {
        self.check_guard()?;
        if cfg.base_addr % 4 != 0 || cfg.ring_addr % 4 != 0 {
            return Err(GcqError::InvalidArg);
        }
        let index = self
            .entries
            .iter()
            .position(|e| e.instance.is_none())
            .ok_or(GcqError::NoFreeInstances)?;

        check_slot_size(cfg.sq_slot_size)?;
        check_slot_size(cfg.cq_slot_size)?;
        let num_slots = alloc_num_slots(cfg.ring_len, cfg.sq_slot_size, cfg.cq_slot_size);
        if !(MIN_NUM_SLOTS..=MAX_NUM_SLOTS).contains(&num_slots) {
            warn!("gcq: {num_slots} slots derived from ring length {}", cfg.ring_len);
            return Err(GcqError::InvalidNumSlots);
        }

        hw::init(&self.io, cfg.role, cfg.base_addr, cfg.ring_addr);
        hw::configure_interrupt_mode(&self.io, cfg.interrupt_mode, cfg.base_addr);

        // Each side writes its own produced index at 0x000 and reads the
        // peer's at 0x100.
        let (sq_produced, cq_produced, space) = if cfg.flags.contains(GcqFlags::IN_MEM_PTR) {
            (cfg.ring_addr + HDR_SQ_PRODUCED, cfg.ring_addr + HDR_CQ_PRODUCED, Space::Memory)
        } else {
            match cfg.role {
                Role::Producer => (
                    cfg.base_addr + REG_PEER_TAIL_POINTER,
                    cfg.base_addr + REG_TAIL_POINTER,
                    Space::Register,
                ),
                Role::Consumer => (
                    cfg.base_addr + REG_TAIL_POINTER,
                    cfg.base_addr + REG_PEER_TAIL_POINTER,
                    Space::Register,
                ),
            }
        };
        let sq_slots = cfg.ring_addr + HEADER_LEN;
        let cq_slots = sq_slots + u64::from(num_slots) * u64::from(cfg.sq_slot_size);
        let sq = Ring::new(
            sq_produced,
            space,
            cfg.ring_addr + HDR_SQ_CONSUMED,
            sq_slots,
            num_slots,
            cfg.sq_slot_size,
        );
        let cq = Ring::new(
            cq_produced,
            space,
            cfg.ring_addr + HDR_CQ_CONSUMED,
            cq_slots,
            num_slots,
            cfg.cq_slot_size,
        );
        let mut instance = Instance {
            role: cfg.role,
            interrupt_mode: cfg.interrupt_mode,
            flags: cfg.flags,
            base_addr: cfg.base_addr,
            ring_addr: cfg.ring_addr,
            num_slots,
            sq,
            cq,
            attached: false,
        };
        if cfg.role == Role::Producer {
            self.publish_header(&mut instance);
        }
        debug!(
            "gcq: init {:?} ring={:#x} slots={} sq={} cq={}",
            cfg.role, cfg.ring_addr, num_slots, cfg.sq_slot_size, cfg.cq_slot_size
        );

        let entry = &mut self.entries[index];
        entry.generation = entry.generation.wrapping_add(1);
        entry.instance = Some(instance);
        self.allocated += 1;
        Ok(InstanceId { index: index as u8, generation: entry.generation })
    }

    // Header first with a zero magic, then both rings reset, magic last so a
    // consumer never sees a half written header.
    fn publish_header(&self, instance: &mut Instance) {
        let mut header = RingHeader {
            magic: 0,
            version: header_version_word(),
            slot_num: instance.num_slots,
            sq_offset: (instance.sq.slot_addr() - instance.ring_addr) as u32,
            sq_slot_size: instance.sq.slot_size,
            cq_offset: (instance.cq.slot_addr() - instance.ring_addr) as u32,
            flags: instance.flags.bits(),
            ..RingHeader::default()
        };
        header.write(&self.io, instance.ring_addr);
        instance.sq.soft_reset(&self.io, instance.flags);
        instance.cq.soft_reset(&self.io, instance.flags);
        header.magic = ALLOC_MAGIC;
        self.io.write_mem32(instance.ring_addr + HDR_MAGIC, header.magic);
    }

    /// Releases an instance; its id (and every copy of it) becomes stale.
    pub fn deinit(&mut self, id: InstanceId) -> Result<()> {
        self.check_guard()?;
        let entry = self.entries.get_mut(id.index()).ok_or(GcqError::InvalidInstance)?;
        if entry.generation != id.generation || entry.instance.is_none() {
            return Err(GcqError::InvalidInstance);
        }
        entry.instance = None;
        self.allocated -= 1;
        debug!("gcq: deinit instance {}", id.index());
        Ok(())
    }

    /// Validates the producer's header and marks a consumer instance attached.
    pub fn attach_consumer(&mut self, id: InstanceId) -> Result<()> {
        self.check_guard()?;
        let io = &self.io;
        let instance = lookup(&mut self.entries, id)?;
        if instance.role != Role::Consumer {
            return Err(GcqError::InvalidArg);
        }
        if io.read_mem32(instance.ring_addr + HDR_MAGIC) != ALLOC_MAGIC {
            return Err(GcqError::ConsumerNotAvailable);
        }
        let header = RingHeader::read(io, instance.ring_addr);
        if version_major(header.version) != u32::from(VERSION.major) {
            warn!("gcq: unexpected version {:#x} in ring header", header.version);
            return Err(GcqError::InvalidVersion);
        }
        debug!(
            "gcq: peer version {}.{}",
            version_major(header.version),
            version_minor(header.version)
        );
        if header.slot_num != instance.num_slots {
            warn!(
                "gcq: header announces {} slots, expected {}",
                header.slot_num, instance.num_slots
            );
            return Err(GcqError::InvalidNumSlots);
        }
        if header.sq_slot_size != instance.sq.slot_size {
            warn!(
                "gcq: header announces slot size {}, expected {}",
                header.sq_slot_size, instance.sq.slot_size
            );
            return Err(GcqError::InvalidSlotSize);
        }
        let flags = instance.flags;
        instance.sq.fast_forward(io, flags);
        instance.cq.fast_forward(io, flags);
        instance.attached = true;
        Ok(())
    }

    /// Copies `data` into the next free slot of the outgoing queue.
    pub fn produce_data(&mut self, id: InstanceId, data: &[u8]) -> Result<()> {
        self.check_guard()?;
        let io = &self.io;
        let instance = lookup(&mut self.entries, id)?;
        let flags = instance.flags;
        let (base, mode) = (instance.base_addr, instance.interrupt_mode);
        let ring = instance.outgoing();
        check_len(data.len(), ring.slot_size)?;
        if !ring.can_produce(io, flags) {
            debug!("gcq: no free slots (produced={} consumed={})", ring.produced, ring.consumed);
            return Err(GcqError::ProducerNoFreeSlots);
        }
        let slot = ring.produced_slot();
        ring.produced = ring.produced.wrapping_add(1);
        for (offset, word) in (0u64..).step_by(4).zip(data.chunks_exact(4)) {
            let value = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
            io.write_mem32(slot + offset, value);
        }
        ring.write_produced(io);
        if mode == InterruptMode::InterruptRegister {
            hw::trigger_interrupt(io, base);
        }
        Ok(())
    }

    /// Copies the next pending slot of the incoming queue into `buf`.
    ///
    /// Reads exactly `buf.len()` bytes and returns that count.
    pub fn consume_data(&mut self, id: InstanceId, buf: &mut [u8]) -> Result<usize> {
        self.check_guard()?;
        let io = &self.io;
        let instance = lookup(&mut self.entries, id)?;
        if instance.role == Role::Consumer && !instance.attached {
            return Err(GcqError::ConsumerNotAttached);
        }
        let flags = instance.flags;
        let (base, mode) = (instance.base_addr, instance.interrupt_mode);
        let ring = instance.incoming();
        check_len(buf.len(), ring.slot_size)?;
        if hw::link_down(io, base) {
            debug!("gcq: link down, nothing to consume");
            return Err(GcqError::ConsumerNoDataReceived);
        }
        if !ring.can_consume(io, flags) {
            return Err(GcqError::ConsumerNoDataReceived);
        }
        let slot = ring.consumed_slot();
        ring.consumed = ring.consumed.wrapping_add(1);
        for (offset, word) in (0u64..).step_by(4).zip(buf.chunks_exact_mut(4)) {
            word.copy_from_slice(&io.read_mem32(slot + offset).to_le_bytes());
        }
        ring.write_consumed(io);
        if mode == InterruptMode::InterruptRegister {
            hw::clear_interrupt(io, base);
        }
        Ok(buf.len())
    }

    /// Slot count derived at creation.
    pub fn num_slots(&self, id: InstanceId) -> Result<u32> {
        self.instance(id).map(|i| i.num_slots)
    }

    /// Whether a consumer instance completed the handshake.
    pub fn is_attached(&self, id: InstanceId) -> Result<bool> {
        self.instance(id).map(|i| i.attached)
    }

    /// Role of a live instance.
    pub fn role(&self, id: InstanceId) -> Result<Role> {
        self.instance(id).map(|i| i.role)
    }
}
