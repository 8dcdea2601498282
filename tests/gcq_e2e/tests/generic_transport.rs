// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Transport-agnostic FW_IF users over the stub and the GCQ adapter
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: 4 integration tests
//!
//! TEST_SCOPE:
//!   - Same generic helper driving two transports
//!   - Error codes observed through the trait
//!   - Opaque handle round trip through ioctl
//!
//! TEST_SCENARIOS:
//!   - test_stub_serves_staged_requests(): serve_inverted over TestTransport
//!   - test_error_codes_through_trait(): common codes agree across transports
//!   - test_opaque_handle_ioctl(): GCQ specific options keep the caller value
//!   - test_payloads_cross_the_link(): proptest over payload sizes
//!
//! DEPENDENCIES:
//!   - fw_if::stub: in-memory transport
//!   - proptest: payload generation
//!
//! ADR: docs/adr/0002-fw-if-contract.md

use fw_if::stub::TestTransport;
use fw_if::{ErrorCode, FwIf, FwIfError, Timeout};
use fw_if_gcq::{GcqCfg, GcqIoctl, GcqMode};
use gcq_e2e::{open_channel, serve_inverted, Link};
use proptest::prelude::*;

const BASE: u64 = 0x1000;
const RING: u64 = 0x2000;

fn cfg(mode: GcqMode) -> GcqCfg {
    GcqCfg::new(mode, BASE, RING, 4096, 64, 64)
}

fn first_read_code<T: FwIf>(handle: &mut T) -> u32 {
    let mut empty = [0u8; 0];
    handle.read(0, &mut empty, Timeout::NoWait).map(|_| 0).unwrap_or_else(|e| e.code())
}

#[test]
fn stub_serves_staged_requests() {
    let mut stub = TestTransport::new();
    stub.init().expect("init");
    stub.open().expect("open");
    stub.stage_rx(&[0x0f, 0xf0]);
    stub.stage_rx(&[0x00, 0xff]);
    assert_eq!(serve_inverted(&mut stub, 2, 2), Ok(2));
    let written: Vec<_> = stub.written().iter().map(|w| w.data.clone()).collect();
    assert_eq!(written, vec![vec![0xf0, 0x0f], vec![0xff, 0x00]]);
    assert_eq!(serve_inverted(&mut stub, 2, 1), Err(FwIfError::Timeout));
}

#[test]
fn error_codes_through_trait() {
    let mut stub = TestTransport::new();
    stub.init().expect("init");
    stub.open().expect("open");
    let link = Link::new(BASE);
    let mut firmware = open_channel(&link.firmware, cfg(GcqMode::Producer));
    assert_eq!(first_read_code(&mut stub), FwIfError::Params.code());
    assert_eq!(first_read_code(&mut firmware), FwIfError::Params.code());
}

#[test]
fn opaque_handle_ioctl() {
    let link = Link::new(BASE);
    let mut host = link.host.create(cfg(GcqMode::Consumer)).expect("create");
    let mut value = 0xfeed_f00d;
    host.ioctl(GcqIoctl::SetOpaqueHandle as u32, &mut value).expect("set");
    let mut read_back = 0;
    host.ioctl(GcqIoctl::GetOpaqueHandle as u32, &mut read_back).expect("get");
    assert_eq!(read_back, 0xfeed_f00d);
    let mut unused = 0;
    let err = host.ioctl(0x7fff, &mut unused).expect_err("unknown option");
    assert_eq!(err.code(), FwIfError::UnrecognisedOption.code());
}

/// Payloads the ring accepts: whole 32-bit words, at most one 64 byte slot.
fn word_payload() -> impl Strategy<Value = Vec<u8>> {
    (1usize..=16).prop_flat_map(|words| proptest::collection::vec(any::<u8>(), words * 4))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]
    #[test]
    fn payloads_cross_the_link(payloads in proptest::collection::vec(word_payload(), 1..48)) {
        let link = Link::new(BASE);
        let mut firmware = open_channel(&link.firmware, cfg(GcqMode::Producer));
        let mut host = open_channel(&link.host, cfg(GcqMode::Consumer));
        for payload in &payloads {
            host.write(0, payload, Timeout::NoWait).expect("host write");
            prop_assert_eq!(serve_inverted(&mut firmware, payload.len(), 1), Ok(1));
            let mut reply = vec![0u8; payload.len()];
            prop_assert_eq!(host.read(0, &mut reply, Timeout::NoWait), Ok(payload.len()));
            let inverted: Vec<u8> = payload.iter().map(|b| !b).collect();
            prop_assert_eq!(reply, inverted);
        }
    }
}
