//! Routing of inbound single-frame PDUs: default queue, node inboxes,
//! filters and control PGNs.
mod helpers {
    include!("../../helpers/mod.rs");
}

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use helpers::{j1939_frame, MockCanBus, MockTimer, MockTx};
use korri_j1939::protocol::engine::{EngineConfig, J1939Engine, J1939Filter};
use korri_j1939::protocol::managment::node::Node;
use korri_j1939::protocol::managment::node_name::NodeName;
use korri_j1939::protocol::transport::can_frame::CanFrame;
use korri_j1939::protocol::transport::traits::can_bus::CanTx;
use embedded_can::{Frame, StandardId};

type TestEngine = J1939Engine<CriticalSectionRawMutex, MockTx>;

const PGN_PROPRIETARY_B: u32 = 0xFF10;
const PGN_ELECTRONIC_ENGINE_1: u32 = 0xF004;
const PGN_PROPRIETARY_A: u32 = 0xEF00;

fn name(identity: u32) -> NodeName {
    NodeName::builder().identity_number(identity).build()
}

#[tokio::test]
async fn broadcast_reaches_default_queue_and_nodes() {
    let (dut, host) = MockCanBus::create_pair();
    let (dut_tx, dut_rx) = dut.split();
    let (mut host_tx, _host_rx) = host.split();
    let engine = TestEngine::new(dut_tx, EngineConfig::default());
    let node = Node::new(&engine, name(1), &[0x80]);
    engine.connect(&node).expect("first node registers");

    tokio::select! {
        result = engine.run_receiver(dut_rx) => panic!("receiver stopped: {:?}", result),
        _ = async {
            host_tx
                .send(&j1939_frame(PGN_ELECTRONIC_ENGINE_1, 0x00, None, &[1, 2, 3, 4, 5, 6, 7, 8]))
                .await
                .unwrap();

            let pdu = engine
                .recv(&mut MockTimer, Some(500))
                .await
                .expect("default queue gets broadcasts");
            assert_eq!(pdu.pgn(), PGN_ELECTRONIC_ENGINE_1);
            assert_eq!(pdu.source(), 0x00);
            assert_eq!(pdu.payload(), &[1, 2, 3, 4, 5, 6, 7, 8]);

            let copy = node
                .recv(&mut MockTimer, Some(500))
                .await
                .expect("node gets broadcasts too");
            assert_eq!(copy, pdu);
        } => {}
    }
}

#[tokio::test]
async fn disabled_default_queue_counts_undeliverable() {
    let (dut, host) = MockCanBus::create_pair();
    let (dut_tx, dut_rx) = dut.split();
    let (mut host_tx, _host_rx) = host.split();
    let engine = TestEngine::new(dut_tx, EngineConfig::default().with_broadcast(false));

    tokio::select! {
        result = engine.run_receiver(dut_rx) => panic!("receiver stopped: {:?}", result),
        _ = async {
            host_tx
                .send(&j1939_frame(PGN_PROPRIETARY_B, 0x21, None, &[0; 8]))
                .await
                .unwrap();

            assert!(engine.recv(&mut MockTimer, Some(100)).await.is_none());
            assert_eq!(engine.stats().undeliverable_pdus, 1);
        } => {}
    }
}

#[tokio::test]
async fn pgn_filter_drops_other_groups() {
    let (dut, host) = MockCanBus::create_pair();
    let (dut_tx, dut_rx) = dut.split();
    let (mut host_tx, _host_rx) = host.split();
    let config = EngineConfig::default().with_filter(J1939Filter::pgn(PGN_PROPRIETARY_B));
    let engine = TestEngine::new(dut_tx, config);

    tokio::select! {
        result = engine.run_receiver(dut_rx) => panic!("receiver stopped: {:?}", result),
        _ = async {
            host_tx
                .send(&j1939_frame(PGN_ELECTRONIC_ENGINE_1, 0x00, None, &[0xAA; 8]))
                .await
                .unwrap();
            host_tx
                .send(&j1939_frame(PGN_PROPRIETARY_B, 0x00, None, &[0xBB; 8]))
                .await
                .unwrap();

            // Frames are dispatched in order: the first one was filtered.
            let pdu = engine.recv(&mut MockTimer, Some(500)).await.expect("filtered-in PDU");
            assert_eq!(pdu.pgn(), PGN_PROPRIETARY_B);
            assert!(engine.try_recv().is_none());
            assert_eq!(engine.stats().filtered_pdus, 1);
        } => {}
    }
}

#[tokio::test]
async fn source_filter_keeps_one_sender() {
    let (dut, host) = MockCanBus::create_pair();
    let (dut_tx, dut_rx) = dut.split();
    let (mut host_tx, _host_rx) = host.split();
    let config = EngineConfig::default().with_filter(J1939Filter::source(0x42));
    let engine = TestEngine::new(dut_tx, config);

    tokio::select! {
        result = engine.run_receiver(dut_rx) => panic!("receiver stopped: {:?}", result),
        _ = async {
            for source in [0x41, 0x42, 0x43] {
                host_tx
                    .send(&j1939_frame(PGN_PROPRIETARY_B, source, None, &[source; 8]))
                    .await
                    .unwrap();
            }

            let pdu = engine.recv(&mut MockTimer, Some(500)).await.expect("0x42 passes");
            assert_eq!(pdu.source(), 0x42);
            assert!(engine.recv(&mut MockTimer, Some(100)).await.is_none());
            assert_eq!(engine.stats().filtered_pdus, 2);
        } => {}
    }
}

#[tokio::test]
async fn destination_specific_reaches_owner_only() {
    let (dut, host) = MockCanBus::create_pair();
    let (dut_tx, dut_rx) = dut.split();
    let (mut host_tx, _host_rx) = host.split();
    let engine = TestEngine::new(dut_tx, EngineConfig::default());
    let owner = Node::new(&engine, name(1), &[0x80]);
    let bystander = Node::new(&engine, name(2), &[0x81]);
    engine.connect(&owner).unwrap();
    engine.connect(&bystander).unwrap();

    tokio::select! {
        result = engine.run_receiver(dut_rx) => panic!("receiver stopped: {:?}", result),
        _ = async {
            host_tx
                .send(&j1939_frame(PGN_PROPRIETARY_A, 0x10, Some(0x80), &[1, 2, 3]))
                .await
                .unwrap();
            host_tx
                .send(&j1939_frame(PGN_PROPRIETARY_A, 0x10, Some(0x99), &[4, 5, 6]))
                .await
                .unwrap();

            let pdu = owner.recv(&mut MockTimer, Some(500)).await.expect("owner inbox");
            assert_eq!(pdu.pgn(), PGN_PROPRIETARY_A);
            assert_eq!(pdu.destination(), Some(0x80));
            assert_eq!(pdu.payload(), &[1, 2, 3]);

            // Wait for the second frame to be dispatched.
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            assert!(bystander.try_recv().is_none());
            assert!(engine.try_recv().is_none());
            assert_eq!(engine.stats().undeliverable_pdus, 1);
        } => {}
    }
}

#[tokio::test]
async fn control_pgns_skip_filters_and_default_queue() {
    let (dut, host) = MockCanBus::create_pair();
    let (dut_tx, dut_rx) = dut.split();
    let (mut host_tx, _host_rx) = host.split();
    // The filter would reject a Request if it applied.
    let config = EngineConfig::default().with_filter(J1939Filter::pgn(PGN_PROPRIETARY_B));
    let engine = TestEngine::new(dut_tx, config);
    let node = Node::new(&engine, name(1), &[0x80]);
    engine.connect(&node).unwrap();

    tokio::select! {
        result = engine.run_receiver(dut_rx) => panic!("receiver stopped: {:?}", result),
        _ = async {
            // Request (PGN 0xEA00) for PGN 0xFEF1, global.
            host_tx
                .send(&j1939_frame(0xEA00, 0x10, Some(0xFF), &[0xF1, 0xFE, 0x00]))
                .await
                .unwrap();

            let pdu = node.recv(&mut MockTimer, Some(500)).await.expect("node gets requests");
            assert_eq!(pdu.pgn(), 0xEA00);
            assert!(engine.try_recv().is_none());
            assert_eq!(engine.stats().filtered_pdus, 0);
        } => {}
    }
}

#[tokio::test]
async fn standard_frames_are_counted_and_dropped() {
    let (dut, host) = MockCanBus::create_pair();
    let (dut_tx, dut_rx) = dut.split();
    let (mut host_tx, _host_rx) = host.split();
    let engine = TestEngine::new(dut_tx, EngineConfig::default());

    tokio::select! {
        result = engine.run_receiver(dut_rx) => panic!("receiver stopped: {:?}", result),
        _ = async {
            let id = StandardId::new(0x123).unwrap();
            let standard = CanFrame::new(id, &[1, 2]).unwrap();
            host_tx.send(&standard).await.unwrap();
            host_tx
                .send(&j1939_frame(PGN_PROPRIETARY_B, 0x10, None, &[9]))
                .await
                .unwrap();

            let pdu = engine.recv(&mut MockTimer, Some(500)).await.expect("J1939 frame");
            assert_eq!(pdu.payload(), &[9]);
            assert_eq!(engine.stats().non_j1939_frames, 1);
        } => {}
    }
}

#[tokio::test]
async fn second_node_on_same_address_is_rejected() {
    let (dut, _host) = MockCanBus::create_pair();
    let (dut_tx, _dut_rx) = dut.split();
    let engine = TestEngine::new(dut_tx, EngineConfig::default());
    let first = Node::new(&engine, name(1), &[0x80, 0x81]);
    let second = Node::new(&engine, name(2), &[0x81]);

    engine.connect(&first).unwrap();
    // Registering twice is harmless.
    engine.connect(&first).unwrap();
    let err = engine.connect(&second).unwrap_err();
    assert!(matches!(
        err,
        korri_j1939::error::J1939Error::ConflictingClaim { address: 0x81 }
    ));

    engine.disconnect(&first);
    engine.connect(&second).expect("address free once disconnected");
}

#[tokio::test]
async fn oversized_driver_length_is_clamped() {
    let (dut, host) = MockCanBus::create_pair();
    let (dut_tx, dut_rx) = dut.split();
    let (mut host_tx, _host_rx) = host.split();
    let engine = TestEngine::new(dut_tx, EngineConfig::default());

    tokio::select! {
        result = engine.run_receiver(dut_rx) => panic!("receiver stopped: {:?}", result),
        _ = async {
            let mut frame = j1939_frame(PGN_PROPRIETARY_B, 0x21, None, &[7; 8]);
            frame.len = 12;
            host_tx.send(&frame).await.unwrap();
            let pdu = engine.recv(&mut MockTimer, Some(500)).await.expect("PDU");
            assert_eq!(pdu.payload(), &[7; 8]);

            // The receiver is still running.
            host_tx
                .send(&j1939_frame(PGN_PROPRIETARY_B, 0x22, None, &[1]))
                .await
                .unwrap();
            let pdu = engine.recv(&mut MockTimer, Some(500)).await.expect("second PDU");
            assert_eq!(pdu.source(), 0x22);
        } => {}
    }
}
