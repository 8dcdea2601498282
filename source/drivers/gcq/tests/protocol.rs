// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Two-peer tests for the GCQ ring protocol over the host simulator
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: 7 integration tests
//!
//! TEST_SCOPE:
//!   - Producer/consumer handshake on a shared region
//!   - FIFO delivery in both directions
//!   - Full and empty ring behaviour
//!   - Register-mode tail pointers through the crossed aperture
//!   - DOUBLE_READ on a settled region
//!
//! TEST_SCENARIOS:
//!   - test_reference_round_trip(): 64 bytes 0x01..=0x40 producer -> consumer
//!   - test_fifo_order_across_wrap(): ordered delivery past the slot count
//!   - test_full_ring_keeps_queued_slots(): ProducerNoFreeSlots leaves slots intact
//!   - test_empty_and_unattached(): ConsumerNotAttached then ConsumerNoDataReceived
//!   - test_register_mode_tail_pointers(): indices in registers, not in the header
//!   - test_submission_queue_flows_back(): consumer -> producer direction
//!   - test_consumer_attaches_mid_stream(): fast-forward skips nothing unread
//!
//! DEPENDENCIES:
//!   - gcq::Gcq: protocol under test
//!   - gcq_hal::sim: shared region and peer views
//!
//! ADR: docs/adr/0001-gcq-ring-protocol.md

use std::sync::Arc;

use gcq::{
    Gcq, GcqError, GcqFlags, InstanceConfig, InstanceId, InterruptMode, Role, HEADER_LEN,
};
use gcq_hal::sim::{SharedRegion, SimIo};

const BASE: u64 = 0x1000;
const RING: u64 = 0x2000;

fn config(role: Role, flags: GcqFlags) -> InstanceConfig {
    InstanceConfig {
        role,
        interrupt_mode: InterruptMode::Polling,
        flags,
        base_addr: BASE,
        ring_addr: RING,
        ring_len: 4096,
        sq_slot_size: 64,
        cq_slot_size: 64,
    }
}

struct Peers {
    region: Arc<SharedRegion>,
    producer: Gcq<SimIo>,
    p: InstanceId,
    consumer: Gcq<SimIo>,
    c: InstanceId,
}

fn attached_peers(flags: GcqFlags) -> Peers {
    let region = SharedRegion::new();
    let mut producer = Gcq::new(SimIo::new(region.clone()));
    let mut consumer = Gcq::new(SimIo::crossed(region.clone(), BASE));
    let p = producer.init(&config(Role::Producer, flags)).expect("producer init");
    let c = consumer.init(&config(Role::Consumer, flags)).expect("consumer init");
    consumer.attach_consumer(c).expect("attach");
    Peers { region, producer, p, consumer, c }
}

fn message(tag: u8) -> [u8; 16] {
    let mut msg = [0u8; 16];
    for (i, byte) in msg.iter_mut().enumerate() {
        *byte = tag.wrapping_add(i as u8);
    }
    msg
}

#[test]
fn reference_round_trip() {
    let mut peers = attached_peers(GcqFlags::IN_MEM_PTR);
    assert_eq!(peers.producer.num_slots(peers.p), Ok(32));
    assert_eq!(peers.consumer.is_attached(peers.c), Ok(true));

    let payload: Vec<u8> = (0x01..=0x40).collect();
    peers.producer.produce_data(peers.p, &payload).expect("produce");
    let mut buf = [0u8; 64];
    assert_eq!(peers.consumer.consume_data(peers.c, &mut buf), Ok(64));
    assert_eq!(buf.as_slice(), payload.as_slice());

    // The first CQ slot sits right after the SQ slots.
    let cq_slot0 = RING + HEADER_LEN + 32 * 64;
    assert_eq!(peers.region.snapshot(cq_slot0, 64), payload);
}

#[test]
fn fifo_order_across_wrap() {
    let mut peers = attached_peers(GcqFlags::IN_MEM_PTR | GcqFlags::DOUBLE_READ);
    let mut buf = [0u8; 16];
    for round in 0..3u8 {
        for i in 0..20u8 {
            peers.producer.produce_data(peers.p, &message(round * 20 + i)).expect("produce");
        }
        for i in 0..20u8 {
            peers.consumer.consume_data(peers.c, &mut buf).expect("consume");
            assert_eq!(buf, message(round * 20 + i));
        }
    }
    assert_eq!(
        peers.consumer.consume_data(peers.c, &mut buf),
        Err(GcqError::ConsumerNoDataReceived)
    );
}

#[test]
fn full_ring_keeps_queued_slots() {
    let mut peers = attached_peers(GcqFlags::IN_MEM_PTR);
    for i in 0..32u8 {
        peers.producer.produce_data(peers.p, &message(i)).expect("produce");
    }
    let cq_slots = RING + HEADER_LEN + 32 * 64;
    let before = peers.region.snapshot(cq_slots, 32 * 64);
    assert_eq!(
        peers.producer.produce_data(peers.p, &message(0xee)),
        Err(GcqError::ProducerNoFreeSlots)
    );
    assert_eq!(peers.region.snapshot(cq_slots, 32 * 64), before);

    let mut buf = [0u8; 16];
    peers.consumer.consume_data(peers.c, &mut buf).expect("consume");
    assert_eq!(buf, message(0));
    peers.producer.produce_data(peers.p, &message(0xee)).expect("slot freed");
}

#[test]
fn empty_and_unattached() {
    let region = SharedRegion::new();
    let mut producer = Gcq::new(SimIo::new(region.clone()));
    let mut consumer = Gcq::new(SimIo::crossed(region.clone(), BASE));
    producer.init(&config(Role::Producer, GcqFlags::IN_MEM_PTR)).expect("producer init");
    let c = consumer.init(&config(Role::Consumer, GcqFlags::IN_MEM_PTR)).expect("consumer init");
    let mut buf = [0u8; 4];
    assert_eq!(consumer.consume_data(c, &mut buf), Err(GcqError::ConsumerNotAttached));
    consumer.attach_consumer(c).expect("attach");
    assert_eq!(consumer.consume_data(c, &mut buf), Err(GcqError::ConsumerNoDataReceived));
}

#[test]
fn register_mode_tail_pointers() {
    let mut peers = attached_peers(GcqFlags::empty());
    peers.producer.produce_data(peers.p, &message(1)).expect("produce");
    peers.producer.produce_data(peers.p, &message(2)).expect("produce");
    // The producer's CQ tail pointer is its own block at 0x000.
    assert_eq!(peers.region.peek_reg(BASE), 2);
    assert_eq!(peers.region.peek_mem(RING + 0x28), 0);

    let mut buf = [0u8; 16];
    peers.consumer.consume_data(peers.c, &mut buf).expect("consume");
    assert_eq!(buf, message(1));
    assert_eq!(peers.region.peek_mem(RING + 0x1c), 1);

    peers.consumer.produce_data(peers.c, &message(9)).expect("consumer produce");
    // The consumer's SQ tail pointer lands in the producer's 0x100 block.
    assert_eq!(peers.region.peek_reg(BASE + 0x100), 1);
    peers.producer.consume_data(peers.p, &mut buf).expect("producer consume");
    assert_eq!(buf, message(9));
}

#[test]
fn submission_queue_flows_back() {
    let mut peers = attached_peers(GcqFlags::IN_MEM_PTR);
    let mut buf = [0u8; 16];
    assert_eq!(
        peers.producer.consume_data(peers.p, &mut buf),
        Err(GcqError::ConsumerNoDataReceived)
    );
    peers.consumer.produce_data(peers.c, &message(7)).expect("request");
    peers.producer.consume_data(peers.p, &mut buf).expect("receive request");
    assert_eq!(buf, message(7));
    peers.producer.produce_data(peers.p, &message(8)).expect("response");
    peers.consumer.consume_data(peers.c, &mut buf).expect("receive response");
    assert_eq!(buf, message(8));
}

#[test]
fn consumer_attaches_mid_stream() {
    let region = SharedRegion::new();
    let mut producer = Gcq::new(SimIo::new(region.clone()));
    let p = producer.init(&config(Role::Producer, GcqFlags::IN_MEM_PTR)).expect("producer init");
    producer.produce_data(p, &message(3)).expect("produce before attach");

    let mut consumer = Gcq::new(SimIo::crossed(region.clone(), BASE));
    let c = consumer.init(&config(Role::Consumer, GcqFlags::IN_MEM_PTR)).expect("consumer init");
    consumer.attach_consumer(c).expect("attach");
    let mut buf = [0u8; 16];
    consumer.consume_data(c, &mut buf).expect("pending slot still delivered");
    assert_eq!(buf, message(3));
}
