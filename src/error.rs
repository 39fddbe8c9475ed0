//! Error definitions shared across library modules.
//! Each type models a specific failure scenario (identifier encoding,
//! payload construction, transport, address management, etc.).
use thiserror_no_std::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Malformed PGN, identifier, or payload byte.
pub enum EncodingError {
    /// J1939 priorities are three bits wide.
    #[error("Priority out of range: {priority}")]
    PriorityOutOfRange { priority: u8 },
    /// PGN values are eighteen bits wide.
    #[error("PGN out of range: {value:#X}")]
    PgnOutOfRange { value: u32 },
    /// Attempt to address a broadcast-only (PDU2) parameter group.
    #[error("Invalid operation: PGN {pgn:#X} is not destination specific")]
    DestinationNotAllowed { pgn: u32 },
    /// A payload element does not fit in a byte.
    #[error("Invalid byte at index {index}: {value}")]
    InvalidByte { index: usize, value: i32 },
    /// Standard (11-bit) identifiers carry no J1939 semantics.
    #[error("Not an extended identifier: {id:#X}")]
    NotExtended { id: u32 },
    /// TP.CM payload is truncated or has an unknown control byte.
    #[error("Invalid transport control frame")]
    InvalidControlFrame,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Errors raised while building a [`Pdu`](crate::protocol::transport::pdu::Pdu).
pub enum PduError {
    /// Payload exceeds the 1785 bytes the transport protocol can carry.
    #[error("Data too large: {len} bytes (max 1785)")]
    DataTooLarge { len: usize },
    /// Payload or identifier encoding failure.
    #[error(transparent)]
    Encoding(#[from] EncodingError),
}

//==================================================================================J1939_ERROR
#[derive(Error, Debug)]
/// Errors returned by the engine and node APIs. `E` is the CAN transmit error.
pub enum J1939Error<E: core::fmt::Debug> {
    /// Identifier or payload could not be encoded.
    #[error(transparent)]
    Encoding(#[from] EncodingError),

    /// Payload exceeds the transport protocol limit.
    #[error("Data too large: {len} bytes")]
    DataTooLarge { len: usize },

    /// The CAN layer refused or failed to send a frame.
    #[error("CAN bus send error: {0:?}")]
    Transport(E),

    /// An application-level request exhausted its retry budget.
    #[error("No response for PGN {pgn:#X}")]
    NoResponse { pgn: u32 },

    /// Another node of this engine already claims the address.
    #[error("Address {address} already claimed by another local node")]
    ConflictingClaim { address: u8 },

    /// The node holds no usable source address.
    #[error("Node has no claimed address")]
    NoAddress,

    /// The engine was shut down.
    #[error("Engine is not running")]
    NotRunning,
}

impl<E: core::fmt::Debug> From<PduError> for J1939Error<E> {
    fn from(err: PduError) -> Self {
        match err {
            PduError::DataTooLarge { len } => J1939Error::DataTooLarge { len },
            PduError::Encoding(err) => J1939Error::Encoding(err),
        }
    }
}

//==================================================================================PROTOCOL_VIOLATION
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Transport protocol anomalies. Logged and counted by the engine, the
/// offending frame is dropped; they never surface as call failures.
pub enum ProtocolViolation {
    /// A transfer to the same peer pair was still pending when a new one started.
    #[error("Duplicate transfer {sender} -> {receiver}")]
    DuplicateTransfer { sender: u8, receiver: u8 },
    /// CTS received without a matching pending transfer.
    #[error("Orphan CTS from {sender} to {receiver}")]
    OrphanCts { sender: u8, receiver: u8 },
    /// EOM-ACK received without a matching pending transfer.
    #[error("Orphan EOM-ACK from {sender} to {receiver}")]
    OrphanEomAck { sender: u8, receiver: u8 },
    /// TP.DT received without an open reassembly session.
    #[error("Orphan data transfer from {sender} to {receiver}")]
    OrphanData { sender: u8, receiver: u8 },
    /// TP.CM payload could not be decoded.
    #[error("Malformed connection management frame from {sender}")]
    MalformedControl { sender: u8 },
}

//==================================================================================WORKER_ERRORS
#[derive(Error, Debug)]
/// Reasons for the receive worker to stop before shutdown.
pub enum ReceiverError<TxE: core::fmt::Debug, RxE: core::fmt::Debug> {
    /// Unable to receive frames from the bus.
    #[error("CAN bus receive error: {0:?}")]
    Receive(RxE),
    /// A protocol response (CTS, EOM-ACK, retransmission, key) could not be sent.
    #[error("CAN bus send error: {0:?}")]
    Transport(TxE),
}
