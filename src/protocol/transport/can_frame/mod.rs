//! In-memory representation of a classic CAN frame as seen by the J1939 layer.
use crate::protocol::transport::can_id::ArbitrationId;
use embedded_can::{ExtendedId, Frame, Id};

#[derive(Clone, Debug, PartialEq, Eq)]
/// Raw CAN frame as read from or written to the bus.
pub struct CanFrame {
    /// Standard or extended identifier. Only extended identifiers carry J1939 traffic.
    pub id: Id,
    /// Payload buffer. Bytes past `len` are unspecified.
    pub data: [u8; 8],
    /// Number of valid payload bytes (Data Length Code, 0 to 8).
    pub len: usize,
    /// Reception time in microseconds, as stamped by the driver (0 when unknown).
    pub timestamp_us: u64,
    /// Remote transmission request.
    pub remote: bool,
}

impl CanFrame {
    /// Build an extended data frame for a J1939 identifier. `None` above 8 bytes.
    pub fn new_j1939(id: &ArbitrationId, data: &[u8]) -> Option<Self> {
        // can_id() never exceeds 29 bits
        let raw = ExtendedId::new(id.can_id()).unwrap_or(ExtendedId::MAX);
        <Self as Frame>::new(raw, data)
    }

    /// Full eight-byte extended frame, as used by the transport protocol.
    pub(crate) fn from_id_bytes(id: &ArbitrationId, data: [u8; 8]) -> Self {
        Self {
            id: Id::Extended(ExtendedId::new(id.can_id()).unwrap_or(ExtendedId::MAX)),
            data,
            len: 8,
            timestamp_us: 0,
            remote: false,
        }
    }

    /// Attach a reception timestamp.
    pub fn with_timestamp(mut self, timestamp_us: u64) -> Self {
        self.timestamp_us = timestamp_us;
        self
    }

    /// J1939 identifier of an extended frame, `None` for standard frames.
    pub fn arbitration_id(&self) -> Option<ArbitrationId> {
        match self.id {
            Id::Extended(id) => Some(ArbitrationId::from_can_id(id.as_raw())),
            Id::Standard(_) => None,
        }
    }

    /// Raw identifier bits (11 or 29 bits wide).
    pub fn raw_id(&self) -> u32 {
        match self.id {
            Id::Extended(id) => id.as_raw(),
            Id::Standard(id) => id.as_raw() as u32,
        }
    }

    /// Valid payload bytes. A `len` above 8 is clamped to the buffer.
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len.min(8)]
    }
}

impl Frame for CanFrame {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        if data.len() > 8 {
            return None;
        }
        let mut buffer = [0u8; 8];
        buffer[..data.len()].copy_from_slice(data);
        Some(Self {
            id: id.into(),
            data: buffer,
            len: data.len(),
            timestamp_us: 0,
            remote: false,
        })
    }

    fn new_remote(id: impl Into<Id>, dlc: usize) -> Option<Self> {
        if dlc > 8 {
            return None;
        }
        Some(Self {
            id: id.into(),
            data: [0u8; 8],
            len: dlc,
            timestamp_us: 0,
            remote: true,
        })
    }

    fn is_extended(&self) -> bool {
        matches!(self.id, Id::Extended(_))
    }

    fn is_remote_frame(&self) -> bool {
        self.remote
    }

    fn id(&self) -> Id {
        self.id
    }

    fn dlc(&self) -> usize {
        self.len.min(8)
    }

    fn data(&self) -> &[u8] {
        self.payload()
    }
}
