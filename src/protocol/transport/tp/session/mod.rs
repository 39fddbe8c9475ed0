//! Transport protocol session tables.
//!
//! [`SessionTable`] rebuilds inbound multi-packet messages; it is owned by the
//! receive worker alone. [`TxSessions`] keeps the TP.DT frames of outbound
//! RTS/CTS transfers until the receiver acknowledges them.
//! Both are keyed by `(source, destination)`, destination 0xFF for broadcasts.
use crate::error::ProtocolViolation;
use crate::protocol::transport::can_frame::CanFrame;
use crate::protocol::transport::can_id::ArbitrationId;
use crate::protocol::transport::pdu::Pdu;
use crate::protocol::transport::pgn::Pgn;
use crate::protocol::transport::tp::ConnectionManagement;
use crate::protocol::transport::{ADDRESS_GLOBAL, MAX_PDU_PAYLOAD};
use alloc::collections::BTreeMap;
use alloc::vec::Vec;

/// `(source, destination)` pair identifying a transfer.
pub type SessionKey = (u8, u8);

//==================================================================================RX
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionKind {
    /// Connection mode (RTS/CTS).
    Rts,
    /// Broadcast announce.
    Bam,
}

#[derive(Debug, Clone)]
/// Inbound transfer being reassembled.
pub struct RxSession {
    pub source: u8,
    pub destination: u8,
    pub total_length: usize,
    pub total_segments: u8,
    pub message_pgn: u32,
    pub priority: u8,
    pub kind: SessionKind,
    pub timestamp_us: u64,
    buffer: Vec<u8>,
}

impl RxSession {
    /// Bytes received so far.
    pub fn received(&self) -> usize {
        self.buffer.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Reassembled message handed back to the dispatcher.
pub struct CompletedMessage {
    pub source: u8,
    pub destination: u8,
    pub message_pgn: u32,
    pub priority: u8,
    pub kind: SessionKind,
    pub total_segments: u8,
    pub timestamp_us: u64,
    pub payload: Vec<u8>,
}

impl CompletedMessage {
    /// EOM-ACK answering this transfer (connection mode only).
    pub fn end_of_message_ack(&self) -> ConnectionManagement {
        ConnectionManagement::EndOfMessageAck {
            total_size: self.payload.len() as u16,
            total_packets: self.total_segments,
            pgn: self.message_pgn,
        }
    }

    /// Logical message carried by the transfer.
    pub fn into_pdu(self) -> Pdu {
        let arbitration_id = ArbitrationId::from_parts(
            self.priority,
            Pgn::from_value(self.message_pgn),
            self.source,
            self.destination,
        );
        Pdu::assembled(arbitration_id, self.payload, self.timestamp_us)
    }
}

#[derive(Debug)]
/// Result of feeding a TP.DT frame to the table.
pub enum ProcessResult {
    /// Frame integrated but additional packets are still missing.
    FragmentConsumed,
    /// The announced length was reached; the session is closed.
    MessageComplete(CompletedMessage),
}

#[derive(Debug, Default)]
/// Inbound reassembly sessions.
pub struct SessionTable {
    sessions: BTreeMap<SessionKey, RxSession>,
}

impl SessionTable {
    pub const fn new() -> Self {
        Self {
            sessions: BTreeMap::new(),
        }
    }

    /// Open a session from an RTS or BAM, replacing (and discarding) any
    /// partial transfer of the same pair. Returns `Ok(true)` on replacement.
    ///
    /// BAM sessions are always keyed with destination 0xFF.
    pub fn open(
        &mut self,
        source: u8,
        destination: u8,
        announce: &ConnectionManagement,
        priority: u8,
        timestamp_us: u64,
    ) -> Result<bool, ProtocolViolation> {
        let (total_size, total_packets, kind, destination) = match *announce {
            ConnectionManagement::RequestToSend {
                total_size,
                total_packets,
                ..
            } => (total_size, total_packets, SessionKind::Rts, destination),
            ConnectionManagement::BroadcastAnnounce {
                total_size,
                total_packets,
                ..
            } => (total_size, total_packets, SessionKind::Bam, ADDRESS_GLOBAL),
            _ => return Err(ProtocolViolation::MalformedControl { sender: source }),
        };

        let total_length = usize::from(total_size);
        if total_length == 0 || total_length > MAX_PDU_PAYLOAD {
            return Err(ProtocolViolation::MalformedControl { sender: source });
        }

        let session = RxSession {
            source,
            destination,
            total_length,
            total_segments: total_packets,
            message_pgn: announce.pgn(),
            priority,
            kind,
            timestamp_us,
            buffer: Vec::with_capacity(total_length),
        };
        Ok(self.sessions.insert((source, destination), session).is_some())
    }

    /// Append the seven data bytes of a TP.DT frame. Completion is length
    /// based: once the buffer holds the announced total, it is truncated and
    /// the session removed.
    pub fn process_frame(
        &mut self,
        source: u8,
        destination: u8,
        data: &[u8],
    ) -> Result<ProcessResult, ProtocolViolation> {
        let key = (source, destination);
        let session = self
            .sessions
            .get_mut(&key)
            .ok_or(ProtocolViolation::OrphanData {
                sender: source,
                receiver: destination,
            })?;

        if let Some(bytes) = data.get(1..) {
            session.buffer.extend_from_slice(bytes);
        }
        if session.buffer.len() < session.total_length {
            return Ok(ProcessResult::FragmentConsumed);
        }

        let Some(mut session) = self.sessions.remove(&key) else {
            return Ok(ProcessResult::FragmentConsumed);
        };
        session.buffer.truncate(session.total_length);
        Ok(ProcessResult::MessageComplete(CompletedMessage {
            source: session.source,
            destination: session.destination,
            message_pgn: session.message_pgn,
            priority: session.priority,
            kind: session.kind,
            total_segments: session.total_segments,
            timestamp_us: session.timestamp_us,
            payload: session.buffer,
        }))
    }

    /// Drop a session after an Abort. Returns `true` when one existed.
    pub fn abort(&mut self, source: u8, destination: u8) -> bool {
        self.sessions.remove(&(source, destination)).is_some()
    }

    pub fn get(&self, source: u8, destination: u8) -> Option<&RxSession> {
        self.sessions.get(&(source, destination))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn clear(&mut self) {
        self.sessions.clear();
    }
}

//==================================================================================TX
#[derive(Debug, Clone)]
/// Outbound connection-mode transfer waiting for CTS / EOM-ACK.
pub struct TxSession {
    pub frames: Vec<CanFrame>,
    pub message_pgn: u32,
    pub total_length: usize,
}

impl TxSession {
    /// Frames `next..next + count - 1` (1-based), clamped to the transfer.
    pub fn window(&self, count: u8, next: u8) -> &[CanFrame] {
        let start = usize::from(next.max(1)) - 1;
        let end = start.saturating_add(usize::from(count)).min(self.frames.len());
        self.frames.get(start..end).unwrap_or(&[])
    }
}

#[derive(Debug, Default)]
/// Pending outbound transfers keyed by `(source, destination)`.
pub struct TxSessions {
    sessions: BTreeMap<SessionKey, TxSession>,
}

impl TxSessions {
    pub const fn new() -> Self {
        Self {
            sessions: BTreeMap::new(),
        }
    }

    /// Store a transfer; returns the one it replaced, if any.
    pub fn insert(&mut self, source: u8, destination: u8, session: TxSession) -> Option<TxSession> {
        self.sessions.insert((source, destination), session)
    }

    pub fn get(&self, source: u8, destination: u8) -> Option<&TxSession> {
        self.sessions.get(&(source, destination))
    }

    pub fn remove(&mut self, source: u8, destination: u8) -> Option<TxSession> {
        self.sessions.remove(&(source, destination))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
