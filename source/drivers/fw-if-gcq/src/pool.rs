// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Bounded pool of channel profiles.
//!
//! A profile is the adapter-side record behind a handle: its lifecycle state,
//! the caller's opaque correlation value and, while open, the protocol
//! instance. Entries are reused after close; each reuse bumps the entry's
//! generation so handles to the previous occupant are rejected.

use gcq::InstanceId;

use crate::error::{FwIfGcqError, Result};

/// Number of profiles a context can hand out at once.
pub const MAX_PROFILES: usize = 4;

/// Lifecycle state of a profile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ProfileState {
    /// Free.
    #[default]
    Closed,
    /// Allocated by `create`, not yet opened.
    Init,
    /// Protocol instance live.
    Opened,
    /// Consumer instance attached to its producer.
    Attached,
}

impl ProfileState {
    /// States in which a protocol instance exists.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Opened | Self::Attached)
    }
}

/// Generation-checked reference to a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProfileId {
    index: u8,
    generation: u32,
}

impl ProfileId {
    /// Pool entry backing the profile.
    pub fn index(self) -> usize {
        usize::from(self.index)
    }
}

/// One pool entry.
#[derive(Debug, Default)]
pub struct Profile {
    state: ProfileState,
    generation: u32,
    opaque: u32,
    instance: Option<InstanceId>,
}

impl Profile {
    /// Current lifecycle state.
    pub fn state(&self) -> ProfileState {
        self.state
    }

    /// Caller correlation value; never interpreted.
    pub fn opaque(&self) -> u32 {
        self.opaque
    }

    pub(crate) fn set_opaque(&mut self, value: u32) {
        self.opaque = value;
    }

    pub(crate) fn instance(&self) -> Option<InstanceId> {
        self.instance
    }

    /// Records a freshly created protocol instance.
    pub(crate) fn open(&mut self, instance: InstanceId) {
        self.instance = Some(instance);
        self.state = ProfileState::Opened;
    }

    pub(crate) fn mark_attached(&mut self) {
        self.state = ProfileState::Attached;
    }
}

/// Fixed-capacity profile table.
#[derive(Debug, Default)]
pub struct ProfilePool {
    profiles: [Profile; MAX_PROFILES],
    allocated: usize,
}

impl ProfilePool {
    /// Empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Profiles currently handed out.
    pub fn allocated(&self) -> usize {
        self.allocated
    }

    /// Claims the first closed entry and moves it to `Init`.
    pub fn allocate(&mut self) -> Result<ProfileId> {
        let index = self
            .profiles
            .iter()
            .position(|p| p.state == ProfileState::Closed)
            .ok_or(FwIfGcqError::NoFreeProfiles)?;
        let profile = &mut self.profiles[index];
        profile.generation = profile.generation.wrapping_add(1);
        profile.state = ProfileState::Init;
        profile.opaque = 0;
        profile.instance = None;
        self.allocated += 1;
        Ok(ProfileId { index: index as u8, generation: profile.generation })
    }

    /// Resolves a profile by generation.
    ///
    /// A closed entry still resolves until it is handed out again, so callers
    /// can tell a closed handle from one whose entry was reused.
    pub fn get(&self, id: ProfileId) -> Result<&Profile> {
        self.profiles
            .get(id.index())
            .filter(|p| p.generation == id.generation)
            .ok_or(FwIfGcqError::InvalidProfile)
    }

    /// Resolves a profile by generation for mutation.
    pub fn get_mut(&mut self, id: ProfileId) -> Result<&mut Profile> {
        self.profiles
            .get_mut(id.index())
            .filter(|p| p.generation == id.generation)
            .ok_or(FwIfGcqError::InvalidProfile)
    }

    /// Returns an entry to the pool, yielding the instance it still held.
    pub fn release(&mut self, id: ProfileId) -> Result<Option<InstanceId>> {
        let profile = self.get_mut(id)?;
        if profile.state == ProfileState::Closed {
            return Err(FwIfGcqError::InvalidProfile);
        }
        let instance = profile.instance.take();
        profile.state = ProfileState::Closed;
        self.allocated -= 1;
        Ok(instance)
    }
}
