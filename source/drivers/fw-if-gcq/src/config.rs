// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Channel configuration: the per-handle [`GcqCfg`] record and the TOML
//! channel file it can be loaded from.
//!
//! ```toml
//! [[channel]]
//! name = "ami"
//! base_address = "0x8000_1000"
//! mode = "consumer"
//! ring_address = "0x9000_0000"
//! ring_length = 4096
//! sq_slot_size = 64
//! cq_slot_size = 64
//! ```

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use fw_if::{ErrorCode, FwIfError};
use gcq::GcqFlags;
use serde::{Deserialize, Deserializer};
use thiserror::Error;

use crate::error::FwIfGcqError;

/// Length of the unique device identifier carried by a channel.
pub const UDID_LEN: usize = 16;

/// Ring side driven by a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GcqMode {
    /// Publishes the ring.
    Producer = 0,
    /// Attaches to a published ring on open.
    Consumer = 1,
}

impl TryFrom<u32> for GcqMode {
    type Error = FwIfGcqError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(Self::Producer),
            1 => Ok(Self::Consumer),
            _ => Err(FwIfError::InvalidCfg.into()),
        }
    }
}

/// Interrupt scheme requested for a handle. Only `None` can be opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GcqInterruptMode {
    /// Polling only.
    #[default]
    None = 0,
    /// Interrupt on tail pointer write.
    TailPointer = 1,
    /// Interrupt through the interrupt register.
    ManualTrigger = 2,
}

impl TryFrom<u32> for GcqInterruptMode {
    type Error = FwIfGcqError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(Self::None),
            1 => Ok(Self::TailPointer),
            2 => Ok(Self::ManualTrigger),
            _ => Err(FwIfError::InvalidCfg.into()),
        }
    }
}

/// Configuration of one GCQ channel.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GcqCfg {
    /// Register block base address.
    #[serde(deserialize_with = "address")]
    pub base_address: u64,
    /// Ring side.
    pub mode: GcqMode,
    /// Interrupt scheme.
    #[serde(default)]
    pub interrupt_mode: GcqInterruptMode,
    /// Address of the ring header.
    #[serde(deserialize_with = "address")]
    pub ring_address: u64,
    /// Length of the slot region.
    pub ring_length: u32,
    /// Completion queue slot size in bytes.
    pub cq_slot_size: u32,
    /// Submission queue slot size in bytes.
    pub sq_slot_size: u32,
    /// Unique device identifier, opaque to the transport.
    #[serde(default)]
    pub udid: [u8; UDID_LEN],
    /// Re-read ring indices until stable.
    #[serde(default)]
    pub double_read: bool,
    /// Keep produced indices in the ring header instead of registers.
    #[serde(default)]
    pub in_mem_ptr: bool,
}

impl GcqCfg {
    /// Polling configuration with the given geometry.
    pub fn new(
        mode: GcqMode,
        base_address: u64,
        ring_address: u64,
        ring_length: u32,
        sq_slot_size: u32,
        cq_slot_size: u32,
    ) -> Self {
        Self {
            base_address,
            mode,
            interrupt_mode: GcqInterruptMode::None,
            ring_address,
            ring_length,
            cq_slot_size,
            sq_slot_size,
            udid: [0; UDID_LEN],
            double_read: false,
            in_mem_ptr: false,
        }
    }

    /// Rejects records the protocol could never accept.
    pub fn validate(&self) -> Result<(), FwIfGcqError> {
        if self.ring_length == 0 || self.sq_slot_size == 0 || self.cq_slot_size == 0 {
            return Err(FwIfError::InvalidCfg.into());
        }
        Ok(())
    }

    /// Protocol flags selected by this record.
    pub fn flags(&self) -> GcqFlags {
        let mut flags = GcqFlags::empty();
        flags.set(GcqFlags::DOUBLE_READ, self.double_read);
        flags.set(GcqFlags::IN_MEM_PTR, self.in_mem_ptr);
        flags
    }
}

/// Named channel from a channel file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Channel {
    /// Unique channel name.
    pub name: String,
    /// Transport settings.
    #[serde(flatten)]
    pub cfg: GcqCfg,
}

#[derive(Debug, Deserialize)]
struct ChannelFile {
    #[serde(default)]
    channel: Vec<Channel>,
}

/// Errors raised while loading a channel file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read.
    #[error("failed to read channel file {path}: {source}")]
    Read {
        /// Offending file.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },
    /// File is not valid TOML or does not match the schema.
    #[error("failed to parse channel file {path}: {source}")]
    Parse {
        /// Offending file.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: toml::de::Error,
    },
    /// File parsed but describes unusable channels.
    #[error("invalid channel file {path}: {reason}")]
    Invalid {
        /// Offending file.
        path: PathBuf,
        /// What is wrong.
        reason: String,
    },
}

impl ErrorCode for ConfigError {
    /// Channel file problems surface as [`FwIfError::InvalidCfg`].
    fn code(&self) -> u32 {
        FwIfError::InvalidCfg.code()
    }
}

/// Loads and validates every `[[channel]]` table of `path`.
pub fn load_channels(path: &Path) -> Result<Vec<Channel>, ConfigError> {
    let data = fs::read_to_string(path)
        .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
    let parsed: ChannelFile = toml::from_str(&data)
        .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
    let invalid = |reason: String| ConfigError::Invalid { path: path.to_path_buf(), reason };

    if parsed.channel.is_empty() {
        return Err(invalid("no [[channel]] tables".to_string()));
    }
    let mut names = BTreeSet::new();
    for channel in &parsed.channel {
        if !names.insert(channel.name.as_str()) {
            return Err(invalid(format!("duplicate channel `{}`", channel.name)));
        }
        channel
            .cfg
            .validate()
            .map_err(|err| invalid(format!("channel `{}`: {err}", channel.name)))?;
    }
    Ok(parsed.channel)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawAddress {
    Number(u64),
    Text(String),
}

fn parse_address(text: &str) -> Option<u64> {
    let cleaned: String = text.trim().chars().filter(|c| *c != '_').collect();
    match cleaned.strip_prefix("0x").or_else(|| cleaned.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => cleaned.parse().ok(),
    }
}

fn address<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    match RawAddress::deserialize(deserializer)? {
        RawAddress::Number(value) => Ok(value),
        RawAddress::Text(text) => parse_address(&text).ok_or_else(|| {
            serde::de::Error::custom(format!("`{text}` is not an address"))
        }),
    }
}
