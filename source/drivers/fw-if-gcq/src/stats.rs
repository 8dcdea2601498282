// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Per-context operation and error counters.

use log::info;

/// Successful operations counted by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stat {
    /// Context bound to its I/O bundle.
    InitOverallComplete,
    /// Handle opened.
    Open,
    /// Consumer handle attached.
    Attached,
    /// Handle closed.
    Close,
    /// Callback bound.
    BindCallbackCalled,
    /// Handle created.
    InstanceCreate,
    /// Read completed.
    Read,
    /// Write completed.
    Write,
}

impl Stat {
    /// Every counter, in reporting order.
    pub const ALL: [Stat; 8] = [
        Stat::InitOverallComplete,
        Stat::Open,
        Stat::Attached,
        Stat::Close,
        Stat::BindCallbackCalled,
        Stat::InstanceCreate,
        Stat::Read,
        Stat::Write,
    ];

    fn name(self) -> &'static str {
        match self {
            Stat::InitOverallComplete => "init_overall_complete",
            Stat::Open => "open",
            Stat::Attached => "attached",
            Stat::Close => "close",
            Stat::BindCallbackCalled => "bind_callback_called",
            Stat::InstanceCreate => "instance_create",
            Stat::Read => "read",
            Stat::Write => "write",
        }
    }
}

/// Failures counted by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorStat {
    /// Empty buffer or out of range argument.
    Params,
    /// Context initialised twice.
    DriverInUse,
    /// Context used before initialisation.
    DriverNotInitialised,
    /// Configuration rejected by `create`.
    InvalidCfg,
    /// Handle sentinels corrupted.
    InvalidHandle,
    /// Profile pool exhausted.
    NoFreeProfiles,
    /// Protocol rejected an open or attach.
    ValidationFailed,
    /// Stale profile reference.
    InvalidProfile,
    /// Operation refused in the current state.
    NotSupported,
}

impl ErrorStat {
    /// Every counter, in reporting order.
    pub const ALL: [ErrorStat; 9] = [
        ErrorStat::Params,
        ErrorStat::DriverInUse,
        ErrorStat::DriverNotInitialised,
        ErrorStat::InvalidCfg,
        ErrorStat::InvalidHandle,
        ErrorStat::NoFreeProfiles,
        ErrorStat::ValidationFailed,
        ErrorStat::InvalidProfile,
        ErrorStat::NotSupported,
    ];

    fn name(self) -> &'static str {
        match self {
            ErrorStat::Params => "params",
            ErrorStat::DriverInUse => "driver_in_use",
            ErrorStat::DriverNotInitialised => "driver_not_initialised",
            ErrorStat::InvalidCfg => "invalid_cfg",
            ErrorStat::InvalidHandle => "invalid_handle",
            ErrorStat::NoFreeProfiles => "no_free_profiles",
            ErrorStat::ValidationFailed => "validation_failed",
            ErrorStat::InvalidProfile => "invalid_profile",
            ErrorStat::NotSupported => "not_supported",
        }
    }
}

/// Snapshot of the adapter counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Statistics {
    stats: [u32; Stat::ALL.len()],
    errors: [u32; ErrorStat::ALL.len()],
}

impl Statistics {
    /// Value of an operation counter.
    pub fn stat(&self, stat: Stat) -> u32 {
        self.stats[stat as usize]
    }

    /// Value of an error counter.
    pub fn error(&self, error: ErrorStat) -> u32 {
        self.errors[error as usize]
    }

    pub(crate) fn bump(&mut self, stat: Stat) {
        let slot = &mut self.stats[stat as usize];
        *slot = slot.saturating_add(1);
    }

    pub(crate) fn bump_error(&mut self, error: ErrorStat) {
        let slot = &mut self.errors[error as usize];
        *slot = slot.saturating_add(1);
    }

    pub(crate) fn clear(&mut self) {
        *self = Self::default();
    }

    /// Logs every counter at info level.
    pub fn print(&self) {
        info!("fw_if_gcq statistics:");
        for stat in Stat::ALL {
            info!("{:>40} . . . . {}", stat.name(), self.stat(stat));
        }
        info!("fw_if_gcq errors:");
        for error in ErrorStat::ALL {
            info!("{:>40} . . . . {}", error.name(), self.error(error));
        }
    }
}
