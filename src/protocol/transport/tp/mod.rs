//! SAE J1939-21 transport protocol: carries payloads of 9 to 1785 bytes as a
//! connection management frame (TP.CM) followed by numbered data frames (TP.DT).
//!
//! ```text
//! TP.CM  RTS/BAM/EOM : [type, len_lsb, len_msb, packets, 0xFF, pgn_lsb, pgn_mid, pgn_msb]
//!        CTS         : [17, count, next, 0xFF, 0xFF, pgn_lsb, pgn_mid, pgn_msb]
//!        Abort       : [255, reason, 0xFF, 0xFF, 0xFF, pgn_lsb, pgn_mid, pgn_msb]
//! TP.DT              : [sequence (1-based), 7 data bytes padded with 0xFF]
//! ```
//!
//! Destination-specific transfers use RTS/CTS flow control and end with an
//! EOM-ACK from the receiver; broadcast transfers are announced with BAM and
//! paced by the sender.
use crate::error::EncodingError;
use crate::protocol::transport::can_frame::CanFrame;
use crate::protocol::transport::can_id::ArbitrationId;
use crate::protocol::transport::pgn::{Pgn, PGN_TP_CONNECTION_MANAGEMENT, PGN_TP_DATA_TRANSFER};

pub mod segmenter;
pub mod session;

//==================================================================================CONSTANTS
/// Priority of every TP.CM and TP.DT frame.
pub const TP_PRIORITY: u8 = 7;
/// Payload bytes carried by one TP.DT frame.
pub const TP_SEGMENT_SIZE: usize = 7;
/// Sequence numbers are one byte wide and start at 1.
pub const TP_MAX_PACKETS: usize = 255;
/// Padding for unused bytes.
pub const TP_PADDING: u8 = 0xFF;
/// Default gap between two BAM data frames.
pub const BAM_INTERVAL_MS: u32 = 50;

const CM_REQUEST_TO_SEND: u8 = 16;
const CM_CLEAR_TO_SEND: u8 = 17;
const CM_END_OF_MESSAGE_ACK: u8 = 19;
const CM_BROADCAST_ANNOUNCE: u8 = 32;
const CM_ABORT: u8 = 255;

//==================================================================================ABORT_REASON
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Connection abort reason (TP.CM Abort byte 1).
pub enum AbortReason {
    /// Already in one or more connection managed sessions.
    AlreadyInSession,
    /// System resources were needed for another task.
    ResourcesNeeded,
    /// A timeout occurred.
    Timeout,
    /// CTS received while a data transfer was in progress.
    CtsWhileTransferring,
    /// Maximum retransmit request limit reached.
    RetransmitLimit,
    /// Any other (reserved or manufacturer) value.
    Other(u8),
}

impl From<u8> for AbortReason {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::AlreadyInSession,
            2 => Self::ResourcesNeeded,
            3 => Self::Timeout,
            4 => Self::CtsWhileTransferring,
            5 => Self::RetransmitLimit,
            other => Self::Other(other),
        }
    }
}

impl From<AbortReason> for u8 {
    fn from(reason: AbortReason) -> Self {
        match reason {
            AbortReason::AlreadyInSession => 1,
            AbortReason::ResourcesNeeded => 2,
            AbortReason::Timeout => 3,
            AbortReason::CtsWhileTransferring => 4,
            AbortReason::RetransmitLimit => 5,
            AbortReason::Other(other) => other,
        }
    }
}

//==================================================================================CONNECTION_MANAGEMENT
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Decoded TP.CM frame. `pgn` is always the message PGN being transported.
pub enum ConnectionManagement {
    RequestToSend {
        total_size: u16,
        total_packets: u8,
        max_packets: u8,
        pgn: u32,
    },
    ClearToSend {
        packets: u8,
        next_packet: u8,
        pgn: u32,
    },
    EndOfMessageAck {
        total_size: u16,
        total_packets: u8,
        pgn: u32,
    },
    BroadcastAnnounce {
        total_size: u16,
        total_packets: u8,
        pgn: u32,
    },
    Abort {
        reason: AbortReason,
        pgn: u32,
    },
}

impl ConnectionManagement {
    /// Decode the eight bytes of a TP.CM frame.
    pub fn decode(data: &[u8]) -> Result<Self, EncodingError> {
        let data: &[u8; 8] = data
            .get(..8)
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or(EncodingError::InvalidControlFrame)?;
        let size = u16::from_le_bytes([data[1], data[2]]);
        let pgn = u32::from_le_bytes([data[5], data[6], data[7], 0]);

        match data[0] {
            CM_REQUEST_TO_SEND => Ok(Self::RequestToSend {
                total_size: size,
                total_packets: data[3],
                max_packets: data[4],
                pgn,
            }),
            CM_CLEAR_TO_SEND => Ok(Self::ClearToSend {
                packets: data[1],
                next_packet: data[2],
                pgn,
            }),
            CM_END_OF_MESSAGE_ACK => Ok(Self::EndOfMessageAck {
                total_size: size,
                total_packets: data[3],
                pgn,
            }),
            CM_BROADCAST_ANNOUNCE => Ok(Self::BroadcastAnnounce {
                total_size: size,
                total_packets: data[3],
                pgn,
            }),
            CM_ABORT => Ok(Self::Abort {
                reason: AbortReason::from(data[1]),
                pgn,
            }),
            _ => Err(EncodingError::InvalidControlFrame),
        }
    }

    /// Encode to the eight bytes of a TP.CM frame.
    pub fn encode(&self) -> [u8; 8] {
        let mut data = [TP_PADDING; 8];
        let pgn = self.pgn().to_le_bytes();
        data[5..8].copy_from_slice(&pgn[..3]);

        match *self {
            Self::RequestToSend {
                total_size,
                total_packets,
                max_packets,
                ..
            } => {
                data[0] = CM_REQUEST_TO_SEND;
                data[1..3].copy_from_slice(&total_size.to_le_bytes());
                data[3] = total_packets;
                data[4] = max_packets;
            }
            Self::ClearToSend {
                packets,
                next_packet,
                ..
            } => {
                data[0] = CM_CLEAR_TO_SEND;
                data[1] = packets;
                data[2] = next_packet;
            }
            Self::EndOfMessageAck {
                total_size,
                total_packets,
                ..
            } => {
                data[0] = CM_END_OF_MESSAGE_ACK;
                data[1..3].copy_from_slice(&total_size.to_le_bytes());
                data[3] = total_packets;
            }
            Self::BroadcastAnnounce {
                total_size,
                total_packets,
                ..
            } => {
                data[0] = CM_BROADCAST_ANNOUNCE;
                data[1..3].copy_from_slice(&total_size.to_le_bytes());
                data[3] = total_packets;
            }
            Self::Abort { reason, .. } => {
                data[0] = CM_ABORT;
                data[1] = reason.into();
            }
        }
        data
    }

    /// Message PGN carried in bytes 5..8.
    pub fn pgn(&self) -> u32 {
        match *self {
            Self::RequestToSend { pgn, .. }
            | Self::ClearToSend { pgn, .. }
            | Self::EndOfMessageAck { pgn, .. }
            | Self::BroadcastAnnounce { pgn, .. }
            | Self::Abort { pgn, .. } => pgn,
        }
    }

    /// TP.CM frame from `source` to `destination` (0xFF for BAM).
    pub fn to_frame(&self, source: u8, destination: u8) -> CanFrame {
        CanFrame::from_id_bytes(
            &tp_id(PGN_TP_CONNECTION_MANAGEMENT, source, destination),
            self.encode(),
        )
    }
}

//==================================================================================HELPERS
/// Identifier of a TP.CM or TP.DT frame.
pub(crate) fn tp_id(pgn: u32, source: u8, destination: u8) -> ArbitrationId {
    ArbitrationId::from_parts(TP_PRIORITY, Pgn::from_value(pgn), source, destination)
}

/// TP.DT frame carrying `segment` (at most seven bytes) as packet `sequence`.
pub(crate) fn data_transfer_frame(
    source: u8,
    destination: u8,
    sequence: u8,
    segment: &[u8],
) -> CanFrame {
    let mut data = [TP_PADDING; 8];
    data[0] = sequence;
    let len = segment.len().min(TP_SEGMENT_SIZE);
    data[1..1 + len].copy_from_slice(&segment[..len]);
    CanFrame::from_id_bytes(&tp_id(PGN_TP_DATA_TRANSFER, source, destination), data)
}

/// Number of TP.DT packets for `len` payload bytes.
pub const fn packet_count(len: usize) -> usize {
    len.div_ceil(TP_SEGMENT_SIZE)
}
