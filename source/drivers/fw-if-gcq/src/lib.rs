// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: FW_IF transport backed by a GCQ shared-memory ring
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests per module + tests/adapter.rs (host simulator peers)
//!
//! PUBLIC API:
//!   - FwIfGcq: adapter context (I/O binding, profile pool, statistics)
//!   - FwIfGcq::create(): binds a GcqCfg to a profile and returns a GcqFwIf handle
//!   - GcqFwIf: fw_if::FwIf implementation (open/close/read/write/ioctl/bind_callback)
//!   - config::load_channels(): TOML channel files
//!
//! Handles move through `Init -> Opened [-> Attached] -> Closed`. A consumer
//! handle attaches as part of `open`. Reads and writes only run on an open
//! handle and retry ring-full/ring-empty outcomes until their timeout.
//!
//! DEPENDENCIES:
//!   - gcq: ring protocol
//!   - fw-if: transport contract, timeouts
//!   - parking_lot: context lock
//!   - serde/toml: channel files
//!
//! ADR: docs/adr/0002-fw-if-contract.md

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

pub mod config;
pub mod error;
pub mod pool;
pub mod stats;

pub use config::{load_channels, Channel, ConfigError, GcqCfg, GcqInterruptMode, GcqMode};
pub use error::{FwIfGcqError, Result};
pub use pool::{ProfileId, ProfilePool, ProfileState, MAX_PROFILES};
pub use stats::{ErrorStat, Stat, Statistics};

use std::sync::Arc;

use fw_if::budget::{self, HostClock};
use fw_if::{
    Callback, CommonIoctl, Firewall, FwIf, FwIfError, RxMode, Timeout, COMMON_EVENT_MAX,
    COMMON_IOCTL_MAX,
};
use gcq::{Gcq, InstanceConfig, InterruptMode, Role};
use gcq_hal::IoAccess;
use log::{debug, info, warn};
use parking_lot::Mutex;

/// I/O bundle shared by every instance of a context.
pub type SharedIo = Arc<dyn IoAccess + Send + Sync>;

/// GCQ specific ioctl options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum GcqIoctl {
    /// Stores the caller's correlation value on the profile.
    SetOpaqueHandle = COMMON_IOCTL_MAX,
    /// Returns the stored correlation value.
    GetOpaqueHandle = COMMON_IOCTL_MAX + 1,
}

impl GcqIoctl {
    /// Decodes a raw option.
    pub const fn from_raw(option: u32) -> Option<Self> {
        match option {
            o if o == Self::SetOpaqueHandle as u32 => Some(Self::SetOpaqueHandle),
            o if o == Self::GetOpaqueHandle as u32 => Some(Self::GetOpaqueHandle),
            _ => None,
        }
    }
}

/// GCQ specific event ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum GcqEvent {
    /// The peer raised the queue interrupt.
    InterruptTriggered = COMMON_EVENT_MAX,
}

impl GcqEvent {
    /// Numeric id passed to callbacks.
    pub const fn id(self) -> u16 {
        self as u16
    }
}

struct Shared {
    gcq: Option<Gcq<SharedIo>>,
    pool: ProfilePool,
    stats: Statistics,
}

impl Shared {
    fn fail(&mut self, stat: ErrorStat, err: impl Into<FwIfGcqError>) -> FwIfGcqError {
        self.stats.bump_error(stat);
        err.into()
    }

    fn gcq(&mut self) -> Result<&mut Gcq<SharedIo>> {
        match self.gcq.as_mut() {
            Some(gcq) => Ok(gcq),
            None => {
                self.stats.bump_error(ErrorStat::DriverNotInitialised);
                Err(FwIfError::DriverNotInitialised.into())
            }
        }
    }
}

/// Adapter context; share it through [`Arc`] and create handles from it.
pub struct FwIfGcq {
    shared: Mutex<Shared>,
}

impl Default for FwIfGcq {
    fn default() -> Self {
        Self::new()
    }
}

impl FwIfGcq {
    /// Context without an I/O binding.
    pub fn new() -> Self {
        Self {
            shared: Mutex::new(Shared {
                gcq: None,
                pool: ProfilePool::new(),
                stats: Statistics::default(),
            }),
        }
    }

    /// Binds the I/O bundle; a context can be bound once.
    pub fn init(&self, io: impl IoAccess + Send + Sync + 'static) -> Result<()> {
        let mut shared = self.shared.lock();
        if shared.gcq.is_some() {
            warn!("fw_if_gcq: init called twice");
            return Err(shared.fail(ErrorStat::DriverInUse, FwIfError::DriverInUse));
        }
        let io: SharedIo = Arc::new(io);
        shared.gcq = Some(Gcq::new(io));
        shared.stats.bump(Stat::InitOverallComplete);
        debug!("fw_if_gcq: initialised");
        Ok(())
    }

    /// Whether [`FwIfGcq::init`] has run.
    pub fn is_initialised(&self) -> bool {
        self.shared.lock().gcq.is_some()
    }

    /// Binds `cfg` to a free profile and returns its handle in `Init` state.
    pub fn create(self: &Arc<Self>, cfg: GcqCfg) -> Result<GcqFwIf> {
        let mut shared = self.shared.lock();
        shared.gcq()?;
        if let Err(err) = cfg.validate() {
            warn!("fw_if_gcq: rejected configuration {cfg:?}");
            return Err(shared.fail(ErrorStat::InvalidCfg, err));
        }
        let profile = match shared.pool.allocate() {
            Ok(profile) => profile,
            Err(err) => return Err(shared.fail(ErrorStat::NoFreeProfiles, err)),
        };
        shared.stats.bump(Stat::InstanceCreate);
        debug!("fw_if_gcq: created profile {} ({:?})", profile.index(), cfg.mode);
        Ok(GcqFwIf {
            firewall: Firewall::new(),
            ctx: Arc::clone(self),
            cfg,
            profile,
            verbose: false,
            callback: None,
            clock: HostClock::new(),
        })
    }

    /// Snapshot of the counters.
    pub fn statistics(&self) -> Statistics {
        self.shared.lock().stats
    }

    /// Logs the counters at info level.
    pub fn print_statistics(&self) {
        self.statistics().print();
    }

    /// Resets every counter.
    pub fn clear_statistics(&self) {
        self.shared.lock().stats.clear();
    }

    /// Profiles currently handed out.
    pub fn profiles_in_use(&self) -> usize {
        self.shared.lock().pool.allocated()
    }
}

/// FW_IF handle bound to one GCQ channel.
pub struct GcqFwIf {
    firewall: Firewall,
    ctx: Arc<FwIfGcq>,
    cfg: GcqCfg,
    profile: ProfileId,
    verbose: bool,
    callback: Option<Callback>,
    clock: HostClock,
}

impl GcqFwIf {
    /// Configuration the handle was created with.
    pub fn cfg(&self) -> &GcqCfg {
        &self.cfg
    }

    /// Current profile state; `Closed` once the profile went back to the pool.
    pub fn state(&self) -> ProfileState {
        let shared = self.ctx.shared.lock();
        shared.pool.get(self.profile).map(|p| p.state()).unwrap_or(ProfileState::Closed)
    }

    /// Invokes the bound callback; returns `None` when none is bound.
    pub fn notify(&mut self, event: u16, data: &[u8]) -> Option<u32> {
        self.callback.as_mut().map(|callback| callback(event, data))
    }

    fn trace(&self, op: &str) {
        if self.verbose {
            info!("fw_if_gcq[{}]: {op}", self.profile.index());
        } else {
            debug!("fw_if_gcq[{}]: {op}", self.profile.index());
        }
    }

    fn check_handle(&self) -> Result<()> {
        if let Err(err) = self.firewall.check() {
            let mut shared = self.ctx.shared.lock();
            return Err(shared.fail(ErrorStat::InvalidHandle, err));
        }
        Ok(())
    }

    fn instance_config(&self) -> InstanceConfig {
        InstanceConfig {
            role: match self.cfg.mode {
                GcqMode::Producer => Role::Producer,
                GcqMode::Consumer => Role::Consumer,
            },
            interrupt_mode: InterruptMode::Polling,
            flags: self.cfg.flags(),
            base_addr: self.cfg.base_address,
            ring_addr: self.cfg.ring_address,
            ring_len: u64::from(self.cfg.ring_length),
            sq_slot_size: self.cfg.sq_slot_size,
            cq_slot_size: self.cfg.cq_slot_size,
        }
    }

    /// One non-blocking attempt against the ring.
    fn transfer<T>(
        &self,
        op: impl FnOnce(&mut Gcq<SharedIo>, gcq::InstanceId) -> gcq::Result<T>,
    ) -> Result<T> {
        let mut shared = self.ctx.shared.lock();
        shared.gcq()?;
        let instance = match shared.pool.get(self.profile) {
            Ok(profile) if profile.state().is_live() => profile.instance(),
            Ok(_) => return Err(shared.fail(ErrorStat::NotSupported, FwIfGcqError::NotSupported)),
            Err(err) => return Err(shared.fail(ErrorStat::InvalidProfile, err)),
        };
        let instance = instance.ok_or(FwIfGcqError::InvalidProfile)?;
        let gcq = shared.gcq()?;
        Ok(op(gcq, instance)?)
    }
}

impl FwIf for GcqFwIf {
    type Error = FwIfGcqError;

    fn open(&mut self) -> Result<()> {
        self.check_handle()?;
        let instance_cfg = self.instance_config();
        let mut shared = self.ctx.shared.lock();
        shared.gcq()?;
        match shared.pool.get(self.profile) {
            Ok(profile) if profile.state() == ProfileState::Init => {}
            Ok(_) => return Err(shared.fail(ErrorStat::NotSupported, FwIfGcqError::NotSupported)),
            Err(err) => return Err(shared.fail(ErrorStat::InvalidProfile, err)),
        }
        if self.cfg.interrupt_mode != GcqInterruptMode::None {
            warn!("fw_if_gcq: interrupt mode {:?} not supported", self.cfg.interrupt_mode);
            return Err(shared.fail(ErrorStat::NotSupported, FwIfGcqError::NotSupported));
        }

        let gcq = shared.gcq()?;
        let instance = match gcq.init(&instance_cfg) {
            Ok(instance) => instance,
            Err(err) => return Err(shared.fail(ErrorStat::ValidationFailed, err)),
        };
        shared.pool.get_mut(self.profile)?.open(instance);
        shared.stats.bump(Stat::Open);
        debug!("fw_if_gcq: open ({:?})", self.cfg.mode);

        if self.cfg.mode == GcqMode::Consumer {
            let gcq = shared.gcq()?;
            if let Err(err) = gcq.attach_consumer(instance) {
                warn!("fw_if_gcq: attach failed: {err}");
                return Err(shared.fail(ErrorStat::ValidationFailed, err));
            }
            shared.pool.get_mut(self.profile)?.mark_attached();
            shared.stats.bump(Stat::Attached);
            debug!("fw_if_gcq: attached");
        }
        drop(shared);
        self.trace("open");
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.check_handle()?;
        let mut shared = self.ctx.shared.lock();
        shared.gcq()?;
        let instance = match shared.pool.get(self.profile) {
            Ok(profile) if profile.state().is_live() => profile.instance(),
            Ok(_) => return Err(shared.fail(ErrorStat::NotSupported, FwIfGcqError::NotSupported)),
            Err(err) => return Err(shared.fail(ErrorStat::InvalidProfile, err)),
        };
        if let Some(instance) = instance {
            shared.gcq()?.deinit(instance)?;
        }
        shared.pool.release(self.profile)?;
        shared.stats.bump(Stat::Close);
        drop(shared);
        self.trace("close");
        Ok(())
    }

    fn write(&mut self, _dest_port: u32, data: &[u8], timeout: Timeout) -> Result<()> {
        self.check_handle()?;
        if data.is_empty() {
            let mut shared = self.ctx.shared.lock();
            return Err(shared.fail(ErrorStat::Params, FwIfError::Params));
        }
        budget::with_timeout(&self.clock, timeout, FwIfGcqError::would_block, || {
            self.transfer(|gcq, id| gcq.produce_data(id, data))
        })?;
        self.ctx.shared.lock().stats.bump(Stat::Write);
        self.trace("write");
        Ok(())
    }

    fn read(&mut self, _src_port: u32, buf: &mut [u8], timeout: Timeout) -> Result<usize> {
        self.check_handle()?;
        if buf.is_empty() {
            let mut shared = self.ctx.shared.lock();
            return Err(shared.fail(ErrorStat::Params, FwIfError::Params));
        }
        let len = budget::with_timeout(&self.clock, timeout, FwIfGcqError::would_block, || {
            self.transfer(|gcq, id| gcq.consume_data(id, buf))
        })?;
        self.ctx.shared.lock().stats.bump(Stat::Read);
        self.trace("read");
        Ok(len)
    }

    fn ioctl(&mut self, option: u32, value: &mut u32) -> Result<()> {
        self.check_handle()?;
        {
            let mut shared = self.ctx.shared.lock();
            shared.gcq()?;
            if let Err(err) = shared.pool.get(self.profile) {
                return Err(shared.fail(ErrorStat::InvalidProfile, err));
            }
        }
        if let Some(common) = CommonIoctl::from_raw(option) {
            match common {
                CommonIoctl::FlushTx | CommonIoctl::FlushRx => {}
                CommonIoctl::GetRxMode => {
                    let mode = if self.cfg.interrupt_mode == GcqInterruptMode::None {
                        RxMode::Polling
                    } else {
                        RxMode::Event
                    };
                    *value = mode as u32;
                }
                CommonIoctl::EnableDebugPrint => self.verbose = true,
                CommonIoctl::DisableDebugPrint => self.verbose = false,
            }
            return Ok(());
        }
        let mut shared = self.ctx.shared.lock();
        let profile = shared.pool.get_mut(self.profile)?;
        match GcqIoctl::from_raw(option) {
            Some(GcqIoctl::SetOpaqueHandle) => {
                profile.set_opaque(*value);
                debug!("fw_if_gcq: set opaque handle {value:#x}");
                Ok(())
            }
            Some(GcqIoctl::GetOpaqueHandle) => {
                *value = profile.opaque();
                Ok(())
            }
            None => {
                warn!("fw_if_gcq: unrecognised ioctl option {option}");
                Err(FwIfError::UnrecognisedOption.into())
            }
        }
    }

    fn bind_callback(&mut self, callback: Callback) -> Result<()> {
        self.check_handle()?;
        {
            let mut shared = self.ctx.shared.lock();
            shared.gcq()?;
            shared.stats.bump(Stat::BindCallbackCalled);
        }
        self.callback = Some(callback);
        self.trace("bind callback");
        Ok(())
    }
}

impl Drop for GcqFwIf {
    /// Returns the profile and any live instance of an unclosed handle.
    fn drop(&mut self) {
        if self.firewall.check().is_err() {
            return;
        }
        let mut shared = self.ctx.shared.lock();
        // A closed or reused entry belongs to someone else now.
        let instance = match shared.pool.release(self.profile) {
            Ok(instance) => instance,
            Err(_) => return,
        };
        if let (Some(instance), Some(gcq)) = (instance, shared.gcq.as_mut()) {
            if let Err(err) = gcq.deinit(instance) {
                warn!("fw_if_gcq: deinit on drop failed: {err}");
            }
        }
        debug!("fw_if_gcq: released profile {} on drop", self.profile.index());
    }
}
