// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Transport-agnostic firmware interface (FW_IF) contract
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable (numbering), Unstable (Rust API)
//! TEST_COVERAGE: Unit tests + stub transport tests
//!
//! PUBLIC API:
//!   - FwIf: open/close/write/read/ioctl/bind_callback implemented per transport
//!   - FwIfError / ErrorCode: common error space, transports extend it from COMMON_ERROR_MAX
//!   - CommonIoctl / Event / RxMode: shared numbering
//!   - Firewall: sentinel words guarding every handle
//!   - Timeout + budget: deadline handling for blocking reads and writes
//!   - stub::TestTransport: in-memory transport for upper-layer tests
//!
//! Upper layers hold a handle implementing [`FwIf`] and never learn which
//! transport backs it. Numeric codes are part of the contract: they cross
//! the management boundary unchanged.
//!
//! DEPENDENCIES:
//!   - thiserror: error enums
//!   - log: debug printing
//!
//! ADR: docs/adr/0002-fw-if-contract.md

#![cfg_attr(not(feature = "std"), no_std)]
#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

extern crate alloc;

pub mod budget;
pub mod stub;

use alloc::boxed::Box;

/// First error code available to transport specific errors.
pub const COMMON_ERROR_MAX: u32 = 15;
/// First ioctl option available to transport specific options.
pub const COMMON_IOCTL_MAX: u32 = 5;
/// First event id available to transport specific events.
pub const COMMON_EVENT_MAX: u16 = 4;

/// Upper sentinel stored in every handle.
pub const UPPER_FIREWALL: u32 = 0xbeef_cafe;
/// Lower sentinel stored in every handle.
pub const LOWER_FIREWALL: u32 = 0xdead_face;

/// Errors shared by every transport. `0` is reserved for success.
#[derive(Debug, Clone, Copy, thiserror::Error, PartialEq, Eq, Hash)]
#[must_use = "fw_if errors must be handled"]
pub enum FwIfError {
    /// Invalid parameter.
    #[error("invalid parameter")]
    Params,
    /// Handle sentinels are corrupted.
    #[error("invalid handle")]
    InvalidHandle,
    /// Transport configuration rejected.
    #[error("invalid configuration")]
    InvalidCfg,
    /// Unknown ioctl option.
    #[error("unrecognised option")]
    UnrecognisedOption,
    /// Transport already initialised.
    #[error("driver in use")]
    DriverInUse,
    /// Transport not initialised.
    #[error("driver not initialised")]
    DriverNotInitialised,
    /// Operation not available in the current RX mode.
    #[error("operation not allowed in current rx mode")]
    DriverRxMode,
    /// Deadline expired.
    #[error("timed out")]
    Timeout,
    /// Callback binding failed.
    #[error("callback binding failed")]
    Binding,
    /// Open failed.
    #[error("open failed")]
    Open,
    /// Close failed.
    #[error("close failed")]
    Close,
    /// Write failed.
    #[error("write failed")]
    Write,
    /// Read failed.
    #[error("read failed")]
    Read,
    /// Ioctl failed.
    #[error("ioctl failed")]
    Ioctrl,
}

/// Stable numeric code of an error value.
pub trait ErrorCode {
    /// Code reported across the management boundary; never `0`.
    fn code(&self) -> u32;
}

impl ErrorCode for FwIfError {
    fn code(&self) -> u32 {
        match self {
            Self::Params => 1,
            Self::InvalidHandle => 2,
            Self::InvalidCfg => 3,
            Self::UnrecognisedOption => 4,
            Self::DriverInUse => 5,
            Self::DriverNotInitialised => 6,
            Self::DriverRxMode => 7,
            Self::Timeout => 8,
            Self::Binding => 9,
            Self::Open => 10,
            Self::Close => 11,
            Self::Write => 12,
            Self::Read => 13,
            Self::Ioctrl => 14,
        }
    }
}

/// Ioctl options every transport understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum CommonIoctl {
    /// Drop anything queued for transmission.
    FlushTx = 0,
    /// Drop anything received but unread.
    FlushRx = 1,
    /// Report the [`RxMode`].
    GetRxMode = 2,
    /// Raise per-handle logging.
    EnableDebugPrint = 3,
    /// Restore per-handle logging.
    DisableDebugPrint = 4,
}

impl CommonIoctl {
    /// Decodes a raw option; `None` for transport specific values.
    pub const fn from_raw(option: u32) -> Option<Self> {
        match option {
            0 => Some(Self::FlushTx),
            1 => Some(Self::FlushRx),
            2 => Some(Self::GetRxMode),
            3 => Some(Self::EnableDebugPrint),
            4 => Some(Self::DisableDebugPrint),
            _ => None,
        }
    }
}

/// Events every transport may raise through the bound callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Event {
    /// Data is waiting to be read.
    NewRxData = 0,
    /// A transmission completed.
    NewTxComplete = 1,
    /// Non-fatal condition.
    Warning = 2,
    /// Fatal condition.
    Error = 3,
}

impl Event {
    /// Numeric id passed to callbacks.
    pub const fn id(self) -> u16 {
        self as u16
    }
}

/// How received data is surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum RxMode {
    /// The caller polls with `read`.
    Polling = 1,
    /// The transport raises events.
    Event = 2,
}

/// Event callback: `(event id, payload) -> status`.
pub type Callback = Box<dyn FnMut(u16, &[u8]) -> u32 + Send>;

/// Sentinel words placed around a handle's contents.
///
/// A handle whose sentinels were overwritten is rejected before any of its
/// state is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Firewall {
    /// Expected to hold [`UPPER_FIREWALL`].
    pub upper: u32,
    /// Expected to hold [`LOWER_FIREWALL`].
    pub lower: u32,
}

impl Firewall {
    /// Intact sentinel pair.
    pub const fn new() -> Self {
        Self { upper: UPPER_FIREWALL, lower: LOWER_FIREWALL }
    }

    /// Fails with [`FwIfError::InvalidHandle`] when either word is corrupted.
    pub fn check(&self) -> Result<(), FwIfError> {
        if self.upper != UPPER_FIREWALL || self.lower != LOWER_FIREWALL {
            return Err(FwIfError::InvalidHandle);
        }
        Ok(())
    }
}

impl Default for Firewall {
    fn default() -> Self {
        Self::new()
    }
}

/// How long a read or write may wait for the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timeout {
    /// A single attempt.
    NoWait,
    /// Keep trying for this many milliseconds.
    Millis(u32),
    /// Keep trying until the operation completes.
    Forever,
}

impl Timeout {
    /// Decodes the raw encoding: `0` is no wait, `u32::MAX` waits forever.
    pub const fn from_raw(ms: u32) -> Self {
        match ms {
            0 => Self::NoWait,
            u32::MAX => Self::Forever,
            ms => Self::Millis(ms),
        }
    }

    /// Inverse of [`Timeout::from_raw`].
    pub const fn as_raw(self) -> u32 {
        match self {
            Self::NoWait => 0,
            Self::Millis(ms) => ms,
            Self::Forever => u32::MAX,
        }
    }
}

impl From<u32> for Timeout {
    fn from(ms: u32) -> Self {
        Self::from_raw(ms)
    }
}

/// Operation set of a firmware interface handle.
///
/// Ports are transport specific; transports without ports ignore them.
pub trait FwIf {
    /// Transport error space; embeds the common errors.
    type Error: From<FwIfError> + ErrorCode + core::fmt::Debug;

    /// Opens the channel.
    fn open(&mut self) -> Result<(), Self::Error>;
    /// Closes the channel.
    fn close(&mut self) -> Result<(), Self::Error>;
    /// Sends `data` to `dest_port`.
    fn write(&mut self, dest_port: u32, data: &[u8], timeout: Timeout) -> Result<(), Self::Error>;
    /// Receives into `buf` from `src_port`, returning the byte count.
    fn read(&mut self, src_port: u32, buf: &mut [u8], timeout: Timeout)
        -> Result<usize, Self::Error>;
    /// Runs a control option; `value` is both input and output.
    fn ioctl(&mut self, option: u32, value: &mut u32) -> Result<(), Self::Error>;
    /// Binds the event callback, replacing any previous one.
    fn bind_callback(&mut self, callback: Callback) -> Result<(), Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn common_codes_stay_below_transport_range() {
        let all = [
            FwIfError::Params,
            FwIfError::InvalidHandle,
            FwIfError::InvalidCfg,
            FwIfError::UnrecognisedOption,
            FwIfError::DriverInUse,
            FwIfError::DriverNotInitialised,
            FwIfError::DriverRxMode,
            FwIfError::Timeout,
            FwIfError::Binding,
            FwIfError::Open,
            FwIfError::Close,
            FwIfError::Write,
            FwIfError::Read,
            FwIfError::Ioctrl,
        ];
        for (i, err) in all.iter().enumerate() {
            assert_eq!(err.code(), i as u32 + 1);
        }
        assert_eq!(all.len() as u32 + 1, COMMON_ERROR_MAX);
    }

    #[test]
    fn ioctl_numbering() {
        assert_eq!(CommonIoctl::from_raw(2), Some(CommonIoctl::GetRxMode));
        assert_eq!(CommonIoctl::DisableDebugPrint as u32 + 1, COMMON_IOCTL_MAX);
        assert_eq!(CommonIoctl::from_raw(COMMON_IOCTL_MAX), None);
    }

    #[test]
    fn event_numbering() {
        assert_eq!(Event::NewRxData.id(), 0);
        assert_eq!(Event::Error.id() + 1, COMMON_EVENT_MAX);
    }

    #[test]
    fn either_sentinel_invalidates() {
        assert_eq!(Firewall::new().check(), Ok(()));
        let mut fw = Firewall::new();
        fw.upper = 0;
        assert_eq!(fw.check(), Err(FwIfError::InvalidHandle));
        let mut fw = Firewall::new();
        fw.lower ^= 1;
        assert_eq!(fw.check(), Err(FwIfError::InvalidHandle));
    }

    #[test]
    fn timeout_extremes() {
        assert_eq!(Timeout::from(0), Timeout::NoWait);
        assert_eq!(Timeout::from(u32::MAX), Timeout::Forever);
        assert_eq!(Timeout::from(250), Timeout::Millis(250));
    }

    proptest! {
        #[test]
        fn timeout_raw_round_trips(ms in any::<u32>()) {
            prop_assert_eq!(Timeout::from_raw(ms).as_raw(), ms);
        }
    }
}
