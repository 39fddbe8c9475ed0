//! TP.DT frame generator. Splits an outbound payload into 7-byte packets and
//! produces the matching RTS or BAM announcement.
use crate::protocol::transport::can_frame::CanFrame;
use crate::protocol::transport::pdu::Pdu;
use crate::protocol::transport::tp::{
    data_transfer_frame, packet_count, ConnectionManagement, TP_MAX_PACKETS, TP_SEGMENT_SIZE,
};
use crate::protocol::transport::ADDRESS_GLOBAL;

#[derive(Debug, Clone, Copy)]
/// Shared parameters for all frames composing one transfer.
pub struct TpSegmenter<'a> {
    source: u8,
    destination: u8,
    message_pgn: u32,
    payload: &'a [u8],
}

impl<'a> TpSegmenter<'a> {
    /// Segment a PDU. PDU2 messages and PDU1 messages addressed to 0xFF
    /// become broadcast (BAM) transfers.
    pub fn new(pdu: &'a Pdu) -> Self {
        Self {
            source: pdu.source(),
            destination: pdu.destination().unwrap_or(ADDRESS_GLOBAL),
            message_pgn: pdu.pgn(),
            payload: pdu.payload(),
        }
    }

    pub fn source(&self) -> u8 {
        self.source
    }

    /// Peer address, 0xFF for broadcast transfers.
    pub fn destination(&self) -> u8 {
        self.destination
    }

    pub fn message_pgn(&self) -> u32 {
        self.message_pgn
    }

    pub fn is_broadcast(&self) -> bool {
        self.destination == ADDRESS_GLOBAL
    }

    /// Number of TP.DT packets, capped at 255.
    pub fn total_packets(&self) -> u8 {
        packet_count(self.payload.len()).min(TP_MAX_PACKETS) as u8
    }

    /// RTS for destination-specific transfers, BAM otherwise. The announced
    /// length is the unpadded payload length.
    pub fn announce(&self) -> ConnectionManagement {
        let total_size = self.payload.len() as u16;
        let total_packets = self.total_packets();
        if self.is_broadcast() {
            ConnectionManagement::BroadcastAnnounce {
                total_size,
                total_packets,
                pgn: self.message_pgn,
            }
        } else {
            ConnectionManagement::RequestToSend {
                total_size,
                total_packets,
                max_packets: 0xFF,
                pgn: self.message_pgn,
            }
        }
    }

    /// TP.CM frame carrying [`announce`](Self::announce).
    pub fn announce_frame(&self) -> CanFrame {
        self.announce().to_frame(self.source, self.destination)
    }

    /// Start the iteration; each call to `next` yields the next TP.DT frame.
    pub fn frames(&self) -> DataTransferFrames<'a> {
        DataTransferFrames {
            source: self.source,
            destination: self.destination,
            segments: self.payload.chunks(TP_SEGMENT_SIZE),
            sequence: 0,
        }
    }
}

#[derive(Debug, Clone)]
/// Lazy iterator returning TP.DT frames one by one, padded with 0xFF.
pub struct DataTransferFrames<'a> {
    source: u8,
    destination: u8,
    segments: core::slice::Chunks<'a, u8>,
    sequence: u8,
}

impl Iterator for DataTransferFrames<'_> {
    type Item = CanFrame;

    fn next(&mut self) -> Option<Self::Item> {
        if usize::from(self.sequence) >= TP_MAX_PACKETS {
            return None;
        }
        let segment = self.segments.next()?;
        self.sequence += 1;
        Some(data_transfer_frame(
            self.source,
            self.destination,
            self.sequence,
            segment,
        ))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = TP_MAX_PACKETS - usize::from(self.sequence);
        let (low, high) = self.segments.size_hint();
        (low.min(remaining), high.map(|high| high.min(remaining)))
    }
}
