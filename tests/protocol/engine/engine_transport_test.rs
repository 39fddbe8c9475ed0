//! Transport protocol through the engine: RTS/CTS both ways, BAM pacing,
//! session replacement, aborts and protocol violations.
mod helpers {
    include!("../../helpers/mod.rs");
}

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use helpers::{j1939_frame, pattern, MockCanBus, MockTimer, MockTx};
use korri_j1939::error::{J1939Error, ProtocolViolation};
use korri_j1939::protocol::engine::{EngineConfig, J1939Engine};
use korri_j1939::protocol::managment::node::Node;
use korri_j1939::protocol::managment::node_name::NodeName;
use korri_j1939::protocol::transport::can_frame::CanFrame;
use korri_j1939::protocol::transport::can_id::ArbitrationId;
use korri_j1939::protocol::transport::pdu::Pdu;
use korri_j1939::protocol::transport::tp::{AbortReason, ConnectionManagement};
use korri_j1939::protocol::transport::traits::can_bus::CanTx;
use std::time::{Duration, Instant};

type TestEngine = J1939Engine<CriticalSectionRawMutex, MockTx>;

const PGN_TP_CM: u32 = 0xEC00;
const PGN_TP_DT: u32 = 0xEB00;
const PGN_PROPRIETARY_A: u32 = 0xEF00;
const PGN_PROPRIETARY_B: u32 = 0xFF10;

fn name(identity: u32) -> NodeName {
    NodeName::builder().identity_number(identity).build()
}

fn directed_pdu(source: u8, destination: u8, payload: &[u8]) -> Pdu {
    let id = ArbitrationId::builder(PGN_PROPRIETARY_A, source)
        .to_destination(destination)
        .build()
        .unwrap();
    Pdu::new(id, payload).unwrap()
}

fn control(frame: &CanFrame) -> ConnectionManagement {
    ConnectionManagement::decode(frame.payload()).expect("TP.CM frame")
}

fn data_transfer(source: u8, destination: u8, sequence: u8, bytes: &[u8]) -> CanFrame {
    let mut data = [0xFF; 8];
    data[0] = sequence;
    data[1..1 + bytes.len()].copy_from_slice(bytes);
    j1939_frame(PGN_TP_DT, source, Some(destination), &data)
}

fn cm_frame(control: ConnectionManagement, source: u8, destination: u8) -> CanFrame {
    control.to_frame(source, destination)
}

#[tokio::test]
async fn outbound_rts_sends_exactly_the_cts_window() {
    let (dut, host) = MockCanBus::create_pair();
    let (dut_tx, dut_rx) = dut.split();
    let (mut host_tx, mut host_rx) = host.split();
    let engine = TestEngine::new(dut_tx, EngineConfig::default());
    let payload = pattern(35);

    tokio::select! {
        result = engine.run_receiver(dut_rx) => panic!("receiver stopped: {:?}", result),
        _ = async {
            engine.send(&directed_pdu(0x80, 0x30, &payload)).await.unwrap();

            let rts = host_rx.next_frame(500).await.expect("RTS");
            let id = rts.arbitration_id().unwrap();
            assert_eq!(id.priority(), 7);
            assert_eq!(id.pgn().broadcast_form(), PGN_TP_CM);
            assert_eq!(id.source_address(), 0x80);
            assert_eq!(id.destination_address(), Some(0x30));
            assert_eq!(
                rts.payload(),
                &[16, 35, 0, 5, 0xFF, 0x00, 0xEF, 0x00]
            );
            assert_eq!(engine.transmissions_in_progress(), 1);

            let cts = ConnectionManagement::ClearToSend {
                packets: 2,
                next_packet: 3,
                pgn: PGN_PROPRIETARY_A,
            };
            host_tx.send(&cm_frame(cts, 0x30, 0x80)).await.unwrap();

            let third = host_rx.next_frame(500).await.expect("segment 3");
            let fourth = host_rx.next_frame(500).await.expect("segment 4");
            assert_eq!(third.payload()[0], 3);
            assert_eq!(&third.payload()[1..], &payload[14..21]);
            assert_eq!(fourth.payload()[0], 4);
            assert_eq!(&fourth.payload()[1..], &payload[21..28]);
            assert!(host_rx.next_frame(100).await.is_none(), "nothing past the window");

            let ack = ConnectionManagement::EndOfMessageAck {
                total_size: 35,
                total_packets: 5,
                pgn: PGN_PROPRIETARY_A,
            };
            host_tx.send(&cm_frame(ack, 0x30, 0x80)).await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            assert_eq!(engine.transmissions_in_progress(), 0);
        } => {}
    }
}

#[tokio::test]
async fn duplicate_outbound_transfer_is_replaced_and_counted() {
    let (dut, host) = MockCanBus::create_pair();
    let (dut_tx, _dut_rx) = dut.split();
    let (_host_tx, mut host_rx) = host.split();
    let engine = TestEngine::new(dut_tx, EngineConfig::default());

    engine.send(&directed_pdu(0x80, 0x30, &pattern(20))).await.unwrap();
    engine.send(&directed_pdu(0x80, 0x30, &pattern(30))).await.unwrap();

    assert_eq!(engine.transmissions_in_progress(), 1);
    let stats = engine.stats();
    assert_eq!(stats.protocol_violations, 1);
    assert_eq!(
        stats.last_violation,
        Some(ProtocolViolation::DuplicateTransfer { sender: 0x80, receiver: 0x30 })
    );
    assert!(host_rx.next_frame(100).await.is_some());
    assert!(host_rx.next_frame(100).await.is_some());
}

#[tokio::test]
async fn inbound_rts_to_local_node_is_acknowledged() {
    let (dut, host) = MockCanBus::create_pair();
    let (dut_tx, dut_rx) = dut.split();
    let (mut host_tx, mut host_rx) = host.split();
    let engine = TestEngine::new(dut_tx, EngineConfig::default());
    let node = Node::new(&engine, name(1), &[0x80]);
    engine.connect(&node).unwrap();
    let payload = pattern(16);

    tokio::select! {
        result = engine.run_receiver(dut_rx) => panic!("receiver stopped: {:?}", result),
        _ = async {
            let rts = ConnectionManagement::RequestToSend {
                total_size: 16,
                total_packets: 3,
                max_packets: 0xFF,
                pgn: PGN_PROPRIETARY_A,
            };
            host_tx.send(&cm_frame(rts, 0x30, 0x80)).await.unwrap();

            let cts = host_rx.next_frame(500).await.expect("CTS");
            let id = cts.arbitration_id().unwrap();
            assert_eq!(id.source_address(), 0x80);
            assert_eq!(id.destination_address(), Some(0x30));
            assert_eq!(
                control(&cts),
                ConnectionManagement::ClearToSend { packets: 3, next_packet: 1, pgn: PGN_PROPRIETARY_A }
            );

            for (index, chunk) in payload.chunks(7).enumerate() {
                host_tx
                    .send(&data_transfer(0x30, 0x80, index as u8 + 1, chunk))
                    .await
                    .unwrap();
            }

            let ack = host_rx.next_frame(500).await.expect("EOM-ACK");
            assert_eq!(
                control(&ack),
                ConnectionManagement::EndOfMessageAck { total_size: 16, total_packets: 3, pgn: PGN_PROPRIETARY_A }
            );

            let pdu = node.recv(&mut MockTimer, Some(500)).await.expect("reassembled PDU");
            assert_eq!(pdu.pgn(), PGN_PROPRIETARY_A);
            assert_eq!(pdu.source(), 0x30);
            assert_eq!(pdu.destination(), Some(0x80));
            assert_eq!(pdu.payload(), payload.as_slice());
            assert_eq!(engine.receptions_in_progress(), 0);
        } => {}
    }
}

#[tokio::test]
async fn inbound_rts_to_foreign_address_is_not_answered() {
    let (dut, host) = MockCanBus::create_pair();
    let (dut_tx, dut_rx) = dut.split();
    let (mut host_tx, mut host_rx) = host.split();
    let engine = TestEngine::new(dut_tx, EngineConfig::default());

    tokio::select! {
        result = engine.run_receiver(dut_rx) => panic!("receiver stopped: {:?}", result),
        _ = async {
            let rts = ConnectionManagement::RequestToSend {
                total_size: 9,
                total_packets: 2,
                max_packets: 0xFF,
                pgn: PGN_PROPRIETARY_A,
            };
            host_tx.send(&cm_frame(rts, 0x30, 0x55)).await.unwrap();
            assert!(host_rx.next_frame(100).await.is_none());
            assert_eq!(engine.receptions_in_progress(), 1);
        } => {}
    }
}

#[tokio::test]
async fn inbound_bam_is_reassembled_without_handshake() {
    let (dut, host) = MockCanBus::create_pair();
    let (dut_tx, dut_rx) = dut.split();
    let (mut host_tx, mut host_rx) = host.split();
    let engine = TestEngine::new(dut_tx, EngineConfig::default());
    let payload = pattern(10);

    tokio::select! {
        result = engine.run_receiver(dut_rx) => panic!("receiver stopped: {:?}", result),
        _ = async {
            let bam = ConnectionManagement::BroadcastAnnounce {
                total_size: 10,
                total_packets: 2,
                pgn: PGN_PROPRIETARY_B,
            };
            host_tx.send(&cm_frame(bam, 0x31, 0xFF)).await.unwrap();
            host_tx.send(&data_transfer(0x31, 0xFF, 1, &payload[..7])).await.unwrap();
            host_tx.send(&data_transfer(0x31, 0xFF, 2, &payload[7..])).await.unwrap();

            let pdu = engine.recv(&mut MockTimer, Some(500)).await.expect("BAM PDU");
            assert_eq!(pdu.pgn(), PGN_PROPRIETARY_B);
            assert_eq!(pdu.source(), 0x31);
            assert_eq!(pdu.payload(), payload.as_slice());
            assert!(host_rx.next_frame(100).await.is_none(), "BAM gets no CTS");
        } => {}
    }
}

#[tokio::test]
async fn new_announce_discards_partial_buffer() {
    let (dut, host) = MockCanBus::create_pair();
    let (dut_tx, dut_rx) = dut.split();
    let (mut host_tx, _host_rx) = host.split();
    let engine = TestEngine::new(dut_tx, EngineConfig::default());
    let stale = [0xEE; 7];
    let fresh = pattern(10);

    tokio::select! {
        result = engine.run_receiver(dut_rx) => panic!("receiver stopped: {:?}", result),
        _ = async {
            let bam = ConnectionManagement::BroadcastAnnounce {
                total_size: 10,
                total_packets: 2,
                pgn: PGN_PROPRIETARY_B,
            };
            host_tx.send(&cm_frame(bam, 0x31, 0xFF)).await.unwrap();
            host_tx.send(&data_transfer(0x31, 0xFF, 1, &stale)).await.unwrap();

            host_tx.send(&cm_frame(bam, 0x31, 0xFF)).await.unwrap();
            host_tx.send(&data_transfer(0x31, 0xFF, 1, &fresh[..7])).await.unwrap();
            host_tx.send(&data_transfer(0x31, 0xFF, 2, &fresh[7..])).await.unwrap();

            let pdu = engine.recv(&mut MockTimer, Some(500)).await.expect("PDU");
            assert_eq!(pdu.payload(), fresh.as_slice());
            assert!(engine.recv(&mut MockTimer, Some(100)).await.is_none());
        } => {}
    }
}

#[tokio::test]
async fn orphan_frames_are_counted_as_violations() {
    let (dut, host) = MockCanBus::create_pair();
    let (dut_tx, dut_rx) = dut.split();
    let (mut host_tx, mut host_rx) = host.split();
    let engine = TestEngine::new(dut_tx, EngineConfig::default());

    tokio::select! {
        result = engine.run_receiver(dut_rx) => panic!("receiver stopped: {:?}", result),
        _ = async {
            host_tx.send(&data_transfer(0x31, 0x80, 1, &[1; 7])).await.unwrap();
            tokio::time::sleep(Duration::from_millis(30)).await;
            assert_eq!(
                engine.stats().last_violation,
                Some(ProtocolViolation::OrphanData { sender: 0x31, receiver: 0x80 })
            );

            let cts = ConnectionManagement::ClearToSend { packets: 1, next_packet: 1, pgn: PGN_PROPRIETARY_A };
            host_tx.send(&cm_frame(cts, 0x31, 0x80)).await.unwrap();
            tokio::time::sleep(Duration::from_millis(30)).await;
            assert_eq!(
                engine.stats().last_violation,
                Some(ProtocolViolation::OrphanCts { sender: 0x31, receiver: 0x80 })
            );

            let ack = ConnectionManagement::EndOfMessageAck { total_size: 9, total_packets: 2, pgn: PGN_PROPRIETARY_A };
            host_tx.send(&cm_frame(ack, 0x31, 0x80)).await.unwrap();
            tokio::time::sleep(Duration::from_millis(30)).await;
            assert_eq!(
                engine.stats().last_violation,
                Some(ProtocolViolation::OrphanEomAck { sender: 0x31, receiver: 0x80 })
            );

            let mut garbage = [0xFF; 8];
            garbage[0] = 0x42;
            host_tx.send(&j1939_frame(PGN_TP_CM, 0x31, Some(0x80), &garbage)).await.unwrap();
            tokio::time::sleep(Duration::from_millis(30)).await;
            let stats = engine.stats();
            assert_eq!(stats.last_violation, Some(ProtocolViolation::MalformedControl { sender: 0x31 }));
            assert_eq!(stats.protocol_violations, 4);
            assert!(host_rx.next_frame(50).await.is_none(), "violations are never answered");
        } => {}
    }
}

#[tokio::test]
async fn abort_releases_both_directions() {
    let (dut, host) = MockCanBus::create_pair();
    let (dut_tx, dut_rx) = dut.split();
    let (mut host_tx, mut host_rx) = host.split();
    let engine = TestEngine::new(dut_tx, EngineConfig::default());
    let node = Node::new(&engine, name(1), &[0x80]);
    engine.connect(&node).unwrap();

    tokio::select! {
        result = engine.run_receiver(dut_rx) => panic!("receiver stopped: {:?}", result),
        _ = async {
            // Outbound transfer 0x80 -> 0x30 and inbound transfer 0x30 -> 0x80.
            engine.send(&directed_pdu(0x80, 0x30, &pattern(20))).await.unwrap();
            host_rx.next_with_pgn(PGN_TP_CM, 500).await.expect("RTS");
            let rts = ConnectionManagement::RequestToSend {
                total_size: 20,
                total_packets: 3,
                max_packets: 0xFF,
                pgn: PGN_PROPRIETARY_A,
            };
            host_tx.send(&cm_frame(rts, 0x30, 0x80)).await.unwrap();
            host_rx.next_with_pgn(PGN_TP_CM, 500).await.expect("CTS");
            assert_eq!(engine.outbound_in_progress(), 1);
            assert_eq!(engine.receptions_in_progress(), 1);
            assert_eq!(engine.transmissions_in_progress(), 2);

            let abort = ConnectionManagement::Abort { reason: AbortReason::Timeout, pgn: PGN_PROPRIETARY_A };
            host_tx.send(&cm_frame(abort, 0x30, 0x80)).await.unwrap();
            tokio::time::sleep(Duration::from_millis(30)).await;
            assert_eq!(engine.outbound_in_progress(), 0);
            assert_eq!(engine.receptions_in_progress(), 0);
            assert_eq!(engine.transmissions_in_progress(), 0);

            host_tx.send(&data_transfer(0x30, 0x80, 1, &[0; 7])).await.unwrap();
            tokio::time::sleep(Duration::from_millis(30)).await;
            assert_eq!(
                engine.stats().last_violation,
                Some(ProtocolViolation::OrphanData { sender: 0x30, receiver: 0x80 })
            );
            assert!(host_rx.next_frame(50).await.is_none(), "aborts are never answered");
        } => {}
    }
}

#[tokio::test]
async fn outbound_bam_is_paced_by_the_throttler() {
    let (dut, host) = MockCanBus::create_pair();
    let (dut_tx, _dut_rx) = dut.split();
    let (_host_tx, mut host_rx) = host.split();
    let interval = 20;
    let engine = TestEngine::new(dut_tx, EngineConfig::default().with_bam_interval_ms(interval));
    let id = ArbitrationId::builder(PGN_PROPRIETARY_B, 0x80).build().unwrap();
    let payload = pattern(20);
    let pdu = Pdu::new(id, &payload).unwrap();

    tokio::select! {
        result = engine.run_throttler(MockTimer) => panic!("throttler stopped: {:?}", result),
        _ = async {
            engine.send(&pdu).await.unwrap();
            let bam = host_rx.next_frame(500).await.expect("BAM");
            let start = Instant::now();
            assert_eq!(
                control(&bam),
                ConnectionManagement::BroadcastAnnounce { total_size: 20, total_packets: 3, pgn: PGN_PROPRIETARY_B }
            );
            assert_eq!(bam.arbitration_id().unwrap().destination_address(), Some(0xFF));

            let mut received = Vec::new();
            for sequence in 1..=3u8 {
                let frame = host_rx.next_frame(500).await.expect("TP.DT");
                assert_eq!(frame.payload()[0], sequence);
                received.extend_from_slice(&frame.payload()[1..]);
            }
            assert!(start.elapsed() >= Duration::from_millis(3 * interval as u64 - 5));
            assert_eq!(&received[..20], payload.as_slice());
            assert_eq!(&received[20..], &[0xFF]);
            assert_eq!(engine.transmissions_in_progress(), 0);
        } => {}
    }
}

#[tokio::test]
async fn send_errors_propagate_unless_ignored() {
    let (dut, _host) = MockCanBus::create_pair();
    let (dut_tx, _dut_rx) = dut.split();
    dut_tx.refuse_sends(true);
    let strict = TestEngine::new(dut_tx.clone(), EngineConfig::default());
    let lenient = TestEngine::new(dut_tx, EngineConfig::default().with_ignore_send_errors(true));
    let pdu = directed_pdu(0x80, 0x30, &[1, 2, 3]);

    assert!(matches!(
        strict.send(&pdu).await,
        Err(J1939Error::Transport(helpers::MockBusError::Refused))
    ));

    lenient.send(&pdu).await.expect("error swallowed");
    assert_eq!(lenient.stats().send_errors_ignored, 1);

    // A refused RTS leaves no pending transfer behind.
    assert!(strict.send(&directed_pdu(0x80, 0x30, &pattern(20))).await.is_err());
    assert_eq!(strict.transmissions_in_progress(), 0);
}
