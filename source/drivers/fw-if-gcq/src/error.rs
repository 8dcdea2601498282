// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Error space of the GCQ transport: the common FW_IF codes, adapter codes
//! and one code per protocol failure.

use fw_if::{ErrorCode, FwIfError, COMMON_ERROR_MAX};
use gcq::GcqError;

/// Result alias for adapter operations.
pub type Result<T> = core::result::Result<T, FwIfGcqError>;

/// Errors returned by GCQ FW_IF handles.
#[derive(Debug, Clone, Copy, thiserror::Error, PartialEq, Eq, Hash)]
#[must_use = "fw_if_gcq errors must be handled"]
pub enum FwIfGcqError {
    /// Error shared with every transport.
    #[error(transparent)]
    Common(#[from] FwIfError),
    /// Every profile is in use.
    #[error("no free gcq profiles")]
    NoFreeProfiles,
    /// The handle's profile was released or never allocated.
    #[error("invalid gcq profile")]
    InvalidProfile,
    /// Operation not valid in the profile's state or configuration.
    #[error("operation not supported")]
    NotSupported,
    /// Protocol context corrupted.
    #[error("gcq driver not initialised")]
    DriverNotInitialised,
    /// Protocol instance arena exhausted.
    #[error("gcq driver has no free instances")]
    DriverNoFreeInstances,
    /// Protocol instance unknown.
    #[error("gcq driver instance invalid")]
    DriverInvalidInstance,
    /// Protocol rejected an argument.
    #[error("gcq driver argument invalid")]
    DriverInvalidArg,
    /// Protocol rejected a slot size.
    #[error("gcq driver slot size invalid")]
    DriverInvalidSlotSize,
    /// Peer runs an incompatible protocol version.
    #[error("gcq driver version mismatch")]
    DriverInvalidVersion,
    /// Protocol rejected the slot count.
    #[error("gcq driver slot count invalid")]
    DriverInvalidNumSlots,
    /// Consumer has not attached.
    #[error("gcq driver consumer not attached")]
    DriverConsumerNotAttached,
    /// Producer has not published the ring.
    #[error("gcq driver producer not available")]
    DriverConsumerNotAvailable,
    /// Nothing to read.
    #[error("gcq driver received no data")]
    DriverConsumerNoDataReceived,
    /// Ring full.
    #[error("gcq driver has no free slots")]
    DriverProducerNoFreeSlots,
}

impl FwIfGcqError {
    /// Whether a retry may succeed once the peer makes progress.
    pub fn would_block(&self) -> bool {
        matches!(self, Self::DriverConsumerNoDataReceived | Self::DriverProducerNoFreeSlots)
    }
}

impl From<GcqError> for FwIfGcqError {
    fn from(err: GcqError) -> Self {
        match err {
            GcqError::DriverNotInitialised => Self::DriverNotInitialised,
            GcqError::NoFreeInstances => Self::DriverNoFreeInstances,
            GcqError::InvalidInstance => Self::DriverInvalidInstance,
            GcqError::InvalidArg => Self::DriverInvalidArg,
            GcqError::InvalidSlotSize => Self::DriverInvalidSlotSize,
            GcqError::InvalidVersion => Self::DriverInvalidVersion,
            GcqError::InvalidNumSlots => Self::DriverInvalidNumSlots,
            GcqError::ConsumerNotAttached => Self::DriverConsumerNotAttached,
            GcqError::ConsumerNotAvailable => Self::DriverConsumerNotAvailable,
            GcqError::ConsumerNoDataReceived => Self::DriverConsumerNoDataReceived,
            GcqError::ProducerNoFreeSlots => Self::DriverProducerNoFreeSlots,
        }
    }
}

impl ErrorCode for FwIfGcqError {
    fn code(&self) -> u32 {
        match self {
            Self::Common(common) => common.code(),
            Self::NoFreeProfiles => COMMON_ERROR_MAX,
            Self::InvalidProfile => COMMON_ERROR_MAX + 1,
            Self::NotSupported => COMMON_ERROR_MAX + 2,
            Self::DriverNotInitialised => COMMON_ERROR_MAX + 3,
            Self::DriverNoFreeInstances => COMMON_ERROR_MAX + 4,
            Self::DriverInvalidInstance => COMMON_ERROR_MAX + 5,
            Self::DriverInvalidArg => COMMON_ERROR_MAX + 6,
            Self::DriverInvalidSlotSize => COMMON_ERROR_MAX + 7,
            Self::DriverInvalidVersion => COMMON_ERROR_MAX + 8,
            Self::DriverInvalidNumSlots => COMMON_ERROR_MAX + 9,
            Self::DriverConsumerNotAttached => COMMON_ERROR_MAX + 10,
            Self::DriverConsumerNotAvailable => COMMON_ERROR_MAX + 11,
            Self::DriverConsumerNoDataReceived => COMMON_ERROR_MAX + 12,
            Self::DriverProducerNoFreeSlots => COMMON_ERROR_MAX + 13,
        }
    }
}
