//! Receive worker: frame decoding, transport protocol state machine and PDU
//! routing.
use super::{J1939Engine, Worker};
use crate::error::{ProtocolViolation, ReceiverError};
use crate::protocol::managment::node::NodeShared;
use crate::protocol::security::build_key_response;
use crate::protocol::transport::can_frame::CanFrame;
use crate::protocol::transport::can_id::ArbitrationId;
use crate::protocol::transport::pdu::Pdu;
use crate::protocol::transport::pgn::{
    PGN_ADDRESS_CLAIMED, PGN_COMMANDED_ADDRESS, PGN_DATA_SECURITY, PGN_REQUEST,
    PGN_TP_CONNECTION_MANAGEMENT, PGN_TP_DATA_TRANSFER,
};
use crate::protocol::transport::tp::session::{ProcessResult, SessionKind, SessionTable};
use crate::protocol::transport::tp::ConnectionManagement;
use crate::protocol::transport::traits::can_bus::{CanRx, CanTx};
use crate::protocol::transport::ADDRESS_GLOBAL;
use alloc::sync::Arc;
use embassy_sync::blocking_mutex::raw::RawMutex;
use futures_util::future::{select, Either};
use futures_util::pin_mut;

impl<M: RawMutex, T: CanTx> J1939Engine<M, T> {
    /// Receive worker. Reads `rx` until [`shutdown`](Self::shutdown) or a bus
    /// error, dispatching every frame inline.
    ///
    /// Returns `Ok(())` on shutdown (or immediately when the engine is already
    /// stopped). A failed protocol response (CTS, EOM-ACK, retransmission,
    /// key) stops the worker with [`ReceiverError::Transport`] unless
    /// `ignore_send_errors` is set.
    pub async fn run_receiver<R: CanRx>(
        &self,
        mut rx: R,
    ) -> Result<(), ReceiverError<T::Error, R::Error>> {
        if !self.start_worker(Worker::Receiver) {
            return Ok(());
        }

        #[cfg(feature = "defmt")]
        defmt::info!("J1939 receiver started");

        let mut sessions = SessionTable::new();
        let result = loop {
            let frame = {
                let stop = self.receiver_stop.wait();
                let next = rx.recv();
                pin_mut!(stop);
                pin_mut!(next);
                match select(stop, next).await {
                    Either::Left(_) => break Ok(()),
                    Either::Right((Ok(frame), _)) => frame,
                    Either::Right((Err(err), _)) => break Err(ReceiverError::Receive(err)),
                }
            };

            if let Err(err) = self.dispatch_frame(&mut sessions, &frame).await {
                break Err(ReceiverError::Transport(err));
            }
            let in_flight = sessions.len();
            self.update_stats(|stats| stats.rx_in_flight = in_flight);
        };

        self.update_stats(|stats| stats.rx_in_flight = 0);
        self.receiver_done.signal(());

        #[cfg(feature = "defmt")]
        defmt::info!("J1939 receiver stopped");

        result
    }

    /// Route one frame. Only transmit failures are returned; everything
    /// else is counted and dropped.
    async fn dispatch_frame(
        &self,
        sessions: &mut SessionTable,
        frame: &CanFrame,
    ) -> Result<(), T::Error> {
        let Some(id) = frame.arbitration_id() else {
            self.update_stats(|stats| {
                stats.non_j1939_frames = stats.non_j1939_frames.wrapping_add(1)
            });
            return Ok(());
        };

        match id.pgn().broadcast_form() {
            PGN_TP_CONNECTION_MANAGEMENT => self.on_connection_management(sessions, id, frame).await,
            PGN_TP_DATA_TRANSFER => self.on_data_transfer(sessions, id, frame).await,
            _ => match Pdu::from_frame(frame) {
                Some(pdu) => self.route(pdu).await,
                None => Ok(()),
            },
        }
    }

    //==================================================================================TP_CM
    async fn on_connection_management(
        &self,
        sessions: &mut SessionTable,
        id: ArbitrationId,
        frame: &CanFrame,
    ) -> Result<(), T::Error> {
        let source = id.source_address();
        let destination = id.destination_address().unwrap_or(ADDRESS_GLOBAL);
        let Ok(control) = ConnectionManagement::decode(frame.payload()) else {
            self.record_violation(ProtocolViolation::MalformedControl { sender: source });
            return Ok(());
        };

        match control {
            ConnectionManagement::RequestToSend { total_packets, .. }
            | ConnectionManagement::BroadcastAnnounce { total_packets, .. } => {
                let _replaced = match sessions.open(
                    source,
                    destination,
                    &control,
                    id.priority(),
                    frame.timestamp_us,
                ) {
                    Ok(replaced) => replaced,
                    Err(violation) => {
                        self.record_violation(violation);
                        return Ok(());
                    }
                };

                #[cfg(feature = "defmt")]
                defmt::debug!(
                    "TP session {=u8} -> {=u8} opened (replaced: {=bool})",
                    source,
                    destination,
                    _replaced
                );

                let is_rts = matches!(control, ConnectionManagement::RequestToSend { .. });
                if is_rts && destination != ADDRESS_GLOBAL && self.is_local_address(destination) {
                    let cts = ConnectionManagement::ClearToSend {
                        packets: total_packets,
                        next_packet: 1,
                        pgn: control.pgn(),
                    };

                    #[cfg(feature = "defmt")]
                    defmt::debug!("CTS {=u8} -> {=u8}: {=u8} packets", destination, source, total_packets);

                    self.transmit(&cts.to_frame(destination, source)).await?;
                }
                Ok(())
            }
            ConnectionManagement::ClearToSend {
                packets,
                next_packet,
                ..
            } => {
                // We are the sender: the session is keyed (us, peer).
                let window = self.tx_sessions.lock(|tx_sessions| {
                    tx_sessions
                        .borrow()
                        .get(destination, source)
                        .map(|session| session.window(packets, next_packet).to_vec())
                });
                let Some(window) = window else {
                    self.record_violation(ProtocolViolation::OrphanCts {
                        sender: source,
                        receiver: destination,
                    });
                    return Ok(());
                };
                for data_frame in &window {
                    self.transmit(data_frame).await?;
                }
                Ok(())
            }
            ConnectionManagement::EndOfMessageAck { .. } => {
                let released = self
                    .tx_sessions
                    .lock(|tx_sessions| tx_sessions.borrow_mut().remove(destination, source));
                match released {
                    Some(_) => {
                        #[cfg(feature = "defmt")]
                        defmt::debug!("Transfer {=u8} -> {=u8} acknowledged", destination, source);
                    }
                    None => self.record_violation(ProtocolViolation::OrphanEomAck {
                        sender: source,
                        receiver: destination,
                    }),
                }
                Ok(())
            }
            ConnectionManagement::Abort { .. } => {
                sessions.abort(source, destination);
                self.tx_sessions
                    .lock(|tx_sessions| tx_sessions.borrow_mut().remove(destination, source));

                #[cfg(feature = "defmt")]
                defmt::info!("Transfer between {=u8} and {=u8} aborted", source, destination);

                Ok(())
            }
        }
    }

    //==================================================================================TP_DT
    async fn on_data_transfer(
        &self,
        sessions: &mut SessionTable,
        id: ArbitrationId,
        frame: &CanFrame,
    ) -> Result<(), T::Error> {
        let source = id.source_address();
        let destination = id.destination_address().unwrap_or(ADDRESS_GLOBAL);

        let message = match sessions.process_frame(source, destination, frame.payload()) {
            Ok(ProcessResult::FragmentConsumed) => return Ok(()),
            Ok(ProcessResult::MessageComplete(message)) => message,
            Err(violation) => {
                self.record_violation(violation);
                return Ok(());
            }
        };

        #[cfg(feature = "defmt")]
        defmt::debug!(
            "TP message {=u32:#x} from {=u8} complete ({=usize} bytes)",
            message.message_pgn,
            message.source,
            message.payload.len()
        );

        if message.kind == SessionKind::Rts
            && message.destination != ADDRESS_GLOBAL
            && self.is_local_address(message.destination)
        {
            let ack = message.end_of_message_ack();
            self.transmit(&ack.to_frame(message.destination, message.source))
                .await?;
        }
        self.route(message.into_pdu()).await
    }

    //==================================================================================ROUTING
    async fn route(&self, pdu: Pdu) -> Result<(), T::Error> {
        if pdu.pgn() == PGN_DATA_SECURITY {
            if let Some(generator) = &self.key_generator {
                if let Some(response) = build_key_response(&pdu, &**generator) {
                    if let Some(frame) = response.to_frame() {
                        self.transmit(&frame).await?;
                        self.update_stats(|stats| {
                            stats.keys_sent = stats.keys_sent.wrapping_add(1)
                        });
                    }
                    return Ok(());
                }
            }
        }

        if matches!(
            pdu.pgn(),
            PGN_ADDRESS_CLAIMED | PGN_COMMANDED_ADDRESS | PGN_REQUEST
        ) {
            self.deliver_to_nodes(&pdu, |_| true);
            return Ok(());
        }

        if !self.config.accepts(&pdu) {
            self.update_stats(|stats| stats.filtered_pdus = stats.filtered_pdus.wrapping_add(1));
            return Ok(());
        }

        match pdu.destination() {
            Some(destination) if destination != ADDRESS_GLOBAL => {
                if self.deliver_to_nodes(&pdu, |node| node.holds(destination)) == 0 {
                    self.update_stats(|stats| {
                        stats.undeliverable_pdus = stats.undeliverable_pdus.wrapping_add(1)
                    });
                }
            }
            _ => {
                let mut delivered = self.deliver_to_nodes(&pdu, |_| true);
                if self.config.broadcast {
                    self.enqueue_default(pdu);
                    delivered += 1;
                }
                if delivered == 0 {
                    self.update_stats(|stats| {
                        stats.undeliverable_pdus = stats.undeliverable_pdus.wrapping_add(1)
                    });
                }
            }
        }
        Ok(())
    }

    /// Copy `pdu` into every selected node inbox. Returns the number of
    /// nodes selected, overflowing inboxes included.
    fn deliver_to_nodes(
        &self,
        pdu: &Pdu,
        select_node: impl Fn(&Arc<NodeShared<M>>) -> bool,
    ) -> usize {
        let mut selected = 0;
        for node in self.listeners_snapshot() {
            if !select_node(&node) {
                continue;
            }
            selected += 1;
            if node.inbox.try_send(pdu.clone()).is_err() {
                #[cfg(feature = "defmt")]
                defmt::warn!("Node inbox full, PDU {=u32:#x} dropped", pdu.pgn());

                self.update_stats(|stats| {
                    stats.queue_overflows = stats.queue_overflows.wrapping_add(1)
                });
            }
        }
        selected
    }

    fn enqueue_default(&self, pdu: Pdu) {
        if self.default_queue.try_send(pdu).is_err() {
            #[cfg(feature = "defmt")]
            defmt::warn!("Default queue full, PDU dropped");

            self.update_stats(|stats| {
                stats.queue_overflows = stats.queue_overflows.wrapping_add(1)
            });
        }
    }
}
