// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Host and firmware ends configured from one channel file
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: 3 integration tests
//!
//! TEST_SCOPE:
//!   - Channel file loading feeding handle creation
//!   - Request/reply traffic across both queues
//!   - Statistics after a full session
//!
//! TEST_SCENARIOS:
//!   - test_request_reply_session(): firmware thread answers host requests
//!   - test_header_published_before_host_open(): magic visible once firmware opens
//!   - test_reopen_after_close(): both ends cycle without leaking profiles
//!
//! DEPENDENCIES:
//!   - gcq_e2e: link and call helpers
//!   - tempfile: channel file fixtures
//!
//! ADR: docs/adr/0002-fw-if-contract.md

use std::io::Write;
use std::path::PathBuf;
use std::thread;

use fw_if::FwIf;
use fw_if_gcq::{load_channels, Channel, GcqCfg, ProfileState, Stat};
use gcq::ALLOC_MAGIC;
use gcq_e2e::{call, open_channel, serve_inverted, Link};
use tempfile::TempDir;

const BASE: u64 = 0x8000_1000;
const RING: u64 = 0x9000_0000;

const CHANNELS: &str = r#"
[[channel]]
name = "firmware"
base_address = "0x8000_1000"
mode = "producer"
ring_address = "0x9000_0000"
ring_length = 4096
sq_slot_size = 64
cq_slot_size = 64
double_read = true

[[channel]]
name = "host"
base_address = "0x8000_1000"
mode = "consumer"
ring_address = "0x9000_0000"
ring_length = 4096
sq_slot_size = 64
cq_slot_size = 64
double_read = true
"#;

fn channel_file(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("channels.toml");
    let mut file = std::fs::File::create(&path).expect("create channel file");
    file.write_all(CHANNELS.as_bytes()).expect("write channel file");
    path
}

fn cfg_named(channels: &[Channel], name: &str) -> GcqCfg {
    channels
        .iter()
        .find(|c| c.name == name)
        .map(|c| c.cfg.clone())
        .unwrap_or_else(|| panic!("channel {name} missing"))
}

fn load() -> (GcqCfg, GcqCfg) {
    let dir = TempDir::new().expect("tempdir");
    let channels = load_channels(&channel_file(&dir)).expect("load channels");
    (cfg_named(&channels, "firmware"), cfg_named(&channels, "host"))
}

#[test]
fn request_reply_session() {
    let (fw_cfg, host_cfg) = load();
    let link = Link::new(BASE);
    let mut firmware = open_channel(&link.firmware, fw_cfg);
    let mut host = open_channel(&link.host, host_cfg);
    assert_eq!(host.state(), ProfileState::Attached);

    let server = thread::spawn(move || serve_inverted(&mut firmware, 48, 40).expect("serve"));
    // More frames than slots so both rings wrap.
    for i in 0..40u8 {
        let request = [i; 48];
        let reply = call(&mut host, &request, 48).expect("call");
        assert_eq!(reply, [!i; 48]);
    }
    assert_eq!(server.join().expect("server thread"), 40);

    let h = link.host.statistics();
    assert_eq!(h.stat(Stat::Write), 40);
    assert_eq!(h.stat(Stat::Read), 40);
    let f = link.firmware.statistics();
    assert_eq!(f.stat(Stat::Write), 40);
    assert_eq!(f.stat(Stat::Read), 40);
}

#[test]
fn header_published_before_host_open() {
    let (fw_cfg, host_cfg) = load();
    let link = Link::new(BASE);
    assert_eq!(link.region.peek_mem(RING), 0);
    let _firmware = open_channel(&link.firmware, fw_cfg);
    assert_eq!(link.region.peek_mem(RING), ALLOC_MAGIC);
    let host = open_channel(&link.host, host_cfg);
    assert_eq!(host.state(), ProfileState::Attached);
}

#[test]
fn reopen_after_close() {
    let (fw_cfg, host_cfg) = load();
    let link = Link::new(BASE);
    for round in 0..3u8 {
        let mut firmware = open_channel(&link.firmware, fw_cfg.clone());
        let mut host = open_channel(&link.host, host_cfg.clone());
        host.write(0, &[round; 8], fw_if::Timeout::NoWait).expect("write");
        let mut buf = [0u8; 8];
        assert_eq!(firmware.read(0, &mut buf, fw_if::Timeout::NoWait), Ok(8));
        assert_eq!(buf, [round; 8]);
        host.close().expect("close host");
        firmware.close().expect("close firmware");
    }
    assert_eq!(link.host.profiles_in_use(), 0);
    assert_eq!(link.firmware.profiles_in_use(), 0);
    assert_eq!(link.host.statistics().stat(Stat::Attached), 3);
}
