// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

use std::sync::Arc;

use fw_if::{FwIf, Timeout};
use fw_if_gcq::{FwIfGcq, GcqCfg, GcqFwIf};
use gcq_hal::sim::{SharedRegion, SimIo};
use log::debug;

/// Both ends of one simulated GCQ link.
///
/// The firmware side sees the register block as laid out in the address map;
/// the host side sees it through the crossed view a real peer would have.
pub struct Link {
    /// Backing memory and registers.
    pub region: Arc<SharedRegion>,
    /// Context owning the producer end.
    pub firmware: Arc<FwIfGcq>,
    /// Context owning the consumer end.
    pub host: Arc<FwIfGcq>,
}

impl Link {
    /// Initialises both contexts over a fresh region with registers at `base`.
    pub fn new(base: u64) -> Self {
        let region = SharedRegion::new();
        let firmware = Arc::new(FwIfGcq::new());
        firmware.init(SimIo::new(region.clone())).expect("firmware context init");
        let host = Arc::new(FwIfGcq::new());
        host.init(SimIo::crossed(region.clone(), base)).expect("host context init");
        Self { region, firmware, host }
    }
}

/// Creates and opens a handle on `ctx`.
pub fn open_channel(ctx: &Arc<FwIfGcq>, cfg: GcqCfg) -> GcqFwIf {
    let mut handle = ctx.create(cfg).expect("create handle");
    handle.open().expect("open handle");
    handle
}

/// Sends `request` and waits for one reply frame of `reply_len` bytes.
pub fn call<T: FwIf>(
    handle: &mut T,
    request: &[u8],
    reply_len: usize,
) -> Result<Vec<u8>, T::Error> {
    handle.write(0, request, Timeout::Millis(1000))?;
    let mut reply = vec![0u8; reply_len];
    let len = handle.read(0, &mut reply, Timeout::Millis(1000))?;
    reply.truncate(len);
    Ok(reply)
}

/// Serves `frames` requests by sending each one back with every byte inverted.
pub fn serve_inverted<T: FwIf>(
    handle: &mut T,
    frame_len: usize,
    frames: usize,
) -> Result<usize, T::Error> {
    let mut buf = vec![0u8; frame_len];
    for served in 0..frames {
        let len = handle.read(0, &mut buf, Timeout::Millis(1000))?;
        let reply: Vec<u8> = buf[..len].iter().map(|b| !b).collect();
        handle.write(0, &reply, Timeout::Millis(1000))?;
        debug!("gcq-e2e: served frame {served}");
    }
    Ok(frames)
}
