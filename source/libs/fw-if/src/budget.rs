// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Deadline-bounded retry loops for FW_IF reads and writes.
//!
//! Transports attempt an operation without blocking and report "would block"
//! (ring full, nothing received) through their own error values. The loops
//! here retry those attempts until a deadline taken from a [`Clock`].
//!
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests (synthetic clock)

use core::time::Duration;

use crate::{FwIfError, Timeout};

const SPIN_CHECK_MASK: usize = 0x7f; // check time every 128 spins

/// Clock source used for budgeted loops.
pub trait Clock {
    /// Returns the current time in nanoseconds, or `None` if not available.
    fn now_ns(&self) -> Option<u64>;
    /// Cooperative yield to allow other work to make progress.
    fn yield_now(&self);
}

/// Host clock backed by `std::time::Instant`.
#[cfg(feature = "std")]
pub struct HostClock {
    start: std::time::Instant,
}

#[cfg(feature = "std")]
impl HostClock {
    /// Creates a new host clock.
    pub fn new() -> Self {
        Self { start: std::time::Instant::now() }
    }
}

#[cfg(feature = "std")]
impl Default for HostClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "std")]
impl Clock for HostClock {
    fn now_ns(&self) -> Option<u64> {
        Some(duration_to_ns(self.start.elapsed()))
    }

    fn yield_now(&self) {
        std::thread::yield_now();
    }
}

fn duration_to_ns(d: Duration) -> u64 {
    d.as_secs().saturating_mul(1_000_000_000).saturating_add(d.subsec_nanos() as u64)
}

/// Computes a deadline timestamp based on `clock.now_ns() + budget`.
///
/// A clock that cannot tell the time cannot honour a deadline either, so it
/// reports [`FwIfError::Timeout`].
pub fn deadline_after(clock: &impl Clock, budget: Duration) -> Result<u64, FwIfError> {
    let now = clock.now_ns().ok_or(FwIfError::Timeout)?;
    Ok(now.saturating_add(duration_to_ns(budget)))
}

/// Runs `op` until it succeeds, fails with an error `would_block` rejects,
/// or `deadline_ns` passes. `None` retries without a deadline.
pub fn retry_until<T, E: From<FwIfError>>(
    clock: &impl Clock,
    deadline_ns: Option<u64>,
    would_block: impl Fn(&E) -> bool,
    mut op: impl FnMut() -> Result<T, E>,
) -> Result<T, E> {
    let mut spins: usize = 0;
    loop {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) if would_block(&e) => {
                if let Some(deadline) = deadline_ns {
                    if (spins & SPIN_CHECK_MASK) == 0 {
                        let now = clock.now_ns().ok_or(FwIfError::Timeout)?;
                        if now >= deadline {
                            return Err(FwIfError::Timeout.into());
                        }
                    }
                }
                clock.yield_now();
            }
            Err(e) => return Err(e),
        }
        spins = spins.wrapping_add(1);
    }
}

/// Runs `op` under a [`Timeout`].
///
/// [`Timeout::NoWait`] makes exactly one attempt and returns its error as is.
pub fn with_timeout<T, E: From<FwIfError>>(
    clock: &impl Clock,
    timeout: Timeout,
    would_block: impl Fn(&E) -> bool,
    mut op: impl FnMut() -> Result<T, E>,
) -> Result<T, E> {
    match timeout {
        Timeout::NoWait => op(),
        Timeout::Millis(ms) => {
            let deadline = deadline_after(clock, Duration::from_millis(u64::from(ms)))?;
            retry_until(clock, Some(deadline), would_block, op)
        }
        Timeout::Forever => retry_until(clock, None, would_block, op),
    }
}
