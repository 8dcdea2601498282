// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! In-memory transport for exercising FW_IF users without hardware.
//!
//! Writes are recorded, reads are served from data staged by the test, and a
//! transport specific ioctl raises events through the bound callback.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use log::{debug, info};

use crate::{
    Callback, CommonIoctl, Firewall, FwIf, FwIfError, RxMode, Timeout, COMMON_IOCTL_MAX,
};

/// Options understood by [`TestTransport`] on top of [`CommonIoctl`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum TestIoctl {
    /// Invokes the bound callback with the event id passed in `value`.
    TriggerEvent = COMMON_IOCTL_MAX,
    /// Returns the number of recorded writes in `value`.
    GetWriteCount = COMMON_IOCTL_MAX + 1,
}

impl TestIoctl {
    /// Decodes a raw option.
    pub const fn from_raw(option: u32) -> Option<Self> {
        match option {
            o if o == Self::TriggerEvent as u32 => Some(Self::TriggerEvent),
            o if o == Self::GetWriteCount as u32 => Some(Self::GetWriteCount),
            _ => None,
        }
    }
}

/// A write captured by [`TestTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Written {
    /// Destination port given by the caller.
    pub port: u32,
    /// Copied payload.
    pub data: Vec<u8>,
}

/// Loopback-free fake transport.
#[derive(Default)]
pub struct TestTransport {
    /// Handle sentinels.
    pub firewall: Firewall,
    initialised: bool,
    open: bool,
    verbose: bool,
    written: Vec<Written>,
    staged: VecDeque<Vec<u8>>,
    callback: Option<Callback>,
}

impl TestTransport {
    /// Uninitialised transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// One-time initialisation; a second call fails with `DriverInUse`.
    pub fn init(&mut self) -> Result<(), FwIfError> {
        if self.initialised {
            return Err(FwIfError::DriverInUse);
        }
        self.initialised = true;
        Ok(())
    }

    /// Queues a message returned by a later `read`.
    pub fn stage_rx(&mut self, data: &[u8]) {
        self.staged.push_back(data.to_vec());
    }

    /// Writes captured so far.
    pub fn written(&self) -> &[Written] {
        &self.written
    }

    /// Whether the channel is open.
    pub fn is_open(&self) -> bool {
        self.open
    }

    fn ready(&self) -> Result<(), FwIfError> {
        self.firewall.check()?;
        if !self.initialised {
            return Err(FwIfError::DriverNotInitialised);
        }
        Ok(())
    }

    fn trace(&self, op: &str) {
        if self.verbose {
            info!("fw_if stub: {op}");
        } else {
            debug!("fw_if stub: {op}");
        }
    }
}

impl FwIf for TestTransport {
    type Error = FwIfError;

    fn open(&mut self) -> Result<(), FwIfError> {
        self.ready()?;
        if self.open {
            return Err(FwIfError::Open);
        }
        self.open = true;
        self.trace("open");
        Ok(())
    }

    fn close(&mut self) -> Result<(), FwIfError> {
        self.ready()?;
        if !self.open {
            return Err(FwIfError::Close);
        }
        self.open = false;
        self.trace("close");
        Ok(())
    }

    fn write(&mut self, dest_port: u32, data: &[u8], _timeout: Timeout) -> Result<(), FwIfError> {
        self.ready()?;
        if data.is_empty() {
            return Err(FwIfError::Params);
        }
        if !self.open {
            return Err(FwIfError::Write);
        }
        self.written.push(Written { port: dest_port, data: data.to_vec() });
        self.trace("write");
        Ok(())
    }

    fn read(
        &mut self,
        _src_port: u32,
        buf: &mut [u8],
        _timeout: Timeout,
    ) -> Result<usize, FwIfError> {
        self.ready()?;
        if buf.is_empty() {
            return Err(FwIfError::Params);
        }
        if !self.open {
            return Err(FwIfError::Read);
        }
        let msg = self.staged.pop_front().ok_or(FwIfError::Timeout)?;
        let len = msg.len().min(buf.len());
        buf[..len].copy_from_slice(&msg[..len]);
        self.trace("read");
        Ok(len)
    }

    fn ioctl(&mut self, option: u32, value: &mut u32) -> Result<(), FwIfError> {
        self.ready()?;
        if let Some(common) = CommonIoctl::from_raw(option) {
            match common {
                CommonIoctl::FlushTx => self.written.clear(),
                CommonIoctl::FlushRx => self.staged.clear(),
                CommonIoctl::GetRxMode => {
                    let mode =
                        if self.callback.is_some() { RxMode::Event } else { RxMode::Polling };
                    *value = mode as u32;
                }
                CommonIoctl::EnableDebugPrint => self.verbose = true,
                CommonIoctl::DisableDebugPrint => self.verbose = false,
            }
            return Ok(());
        }
        match TestIoctl::from_raw(option) {
            Some(TestIoctl::TriggerEvent) => {
                let event = u16::try_from(*value).map_err(|_| FwIfError::Params)?;
                let callback = self.callback.as_mut().ok_or(FwIfError::Binding)?;
                *value = callback(event, &[]);
                Ok(())
            }
            Some(TestIoctl::GetWriteCount) => {
                *value = self.written.len() as u32;
                Ok(())
            }
            None => Err(FwIfError::UnrecognisedOption),
        }
    }

    fn bind_callback(&mut self, callback: Callback) -> Result<(), FwIfError> {
        self.ready()?;
        self.callback = Some(callback);
        self.trace("bind callback");
        Ok(())
    }
}
