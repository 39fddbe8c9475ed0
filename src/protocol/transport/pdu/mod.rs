//! Logical J1939 message: an identifier plus up to 1785 payload bytes.
//!
//! A `Pdu` is what the application sends and receives. Payloads above eight
//! bytes travel through the transport protocol; the engine hides the
//! segmentation, so a received `Pdu` is always complete.
use crate::error::{EncodingError, PduError};
use crate::protocol::transport::can_frame::CanFrame;
use crate::protocol::transport::can_id::ArbitrationId;
use crate::protocol::transport::pgn::PGN_ADDRESS_CLAIMED;
use crate::protocol::transport::{MAX_PDU_PAYLOAD, MAX_SINGLE_FRAME_PAYLOAD};
use alloc::{string::String, vec::Vec};
use core::fmt;

//==================================================================================DISPLAY_RADIX
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Base used to render payload bytes. Display only.
pub enum DisplayRadix {
    #[default]
    Decimal,
    Hex,
}

impl DisplayRadix {
    /// Parse `"decimal"` or `"hex"` (case insensitive).
    pub fn parse(radix: &str) -> Option<Self> {
        if radix.eq_ignore_ascii_case("decimal") {
            Some(Self::Decimal)
        } else if radix.eq_ignore_ascii_case("hex") {
            Some(Self::Hex)
        } else {
            None
        }
    }
}

//==================================================================================PDU
#[derive(Clone, Debug)]
pub struct Pdu {
    /// Bus time in microseconds (first frame of a multi-packet message).
    pub timestamp_us: u64,
    pub arbitration_id: ArbitrationId,
    payload: Vec<u8>,
    /// Free-form annotations attached by diagnostics tooling.
    pub info: Vec<String>,
    pub radix: DisplayRadix,
}

impl Pdu {
    /// Build a PDU from raw bytes.
    pub fn new(arbitration_id: ArbitrationId, payload: &[u8]) -> Result<Self, PduError> {
        Self::from_vec(arbitration_id, payload.to_vec())
    }

    /// Build a PDU taking ownership of the payload.
    pub fn from_vec(arbitration_id: ArbitrationId, payload: Vec<u8>) -> Result<Self, PduError> {
        if payload.len() > MAX_PDU_PAYLOAD {
            return Err(PduError::DataTooLarge { len: payload.len() });
        }
        Ok(Self {
            timestamp_us: 0,
            arbitration_id,
            payload,
            info: Vec::new(),
            radix: DisplayRadix::Decimal,
        })
    }

    /// Build a PDU from untyped integers (command line, JSON), checking each
    /// element fits in a byte.
    pub fn from_values(arbitration_id: ArbitrationId, values: &[i32]) -> Result<Self, PduError> {
        if values.len() > MAX_PDU_PAYLOAD {
            return Err(PduError::DataTooLarge { len: values.len() });
        }
        let payload = values
            .iter()
            .enumerate()
            .map(|(index, &value)| {
                u8::try_from(value).map_err(|_| EncodingError::InvalidByte { index, value })
            })
            .collect::<Result<Vec<u8>, _>>()?;
        Self::from_vec(arbitration_id, payload)
    }

    /// Decode a single extended frame. `None` for standard identifiers.
    pub fn from_frame(frame: &CanFrame) -> Option<Self> {
        let arbitration_id = frame.arbitration_id()?;
        Some(Self {
            timestamp_us: frame.timestamp_us,
            arbitration_id,
            payload: frame.payload().to_vec(),
            info: Vec::new(),
            radix: DisplayRadix::Decimal,
        })
    }

    /// Internally built payloads (reassembled transfers, claims) already
    /// known to respect the 1785-byte limit.
    pub(crate) fn assembled(arbitration_id: ArbitrationId, payload: Vec<u8>, timestamp_us: u64) -> Self {
        debug_assert!(payload.len() <= MAX_PDU_PAYLOAD);
        Self {
            timestamp_us,
            arbitration_id,
            payload,
            info: Vec::new(),
            radix: DisplayRadix::Decimal,
        }
    }

    /// Single CAN frame carrying this PDU, `None` when the payload needs the
    /// transport protocol.
    pub fn to_frame(&self) -> Option<CanFrame> {
        if self.payload.len() > MAX_SINGLE_FRAME_PAYLOAD {
            return None;
        }
        CanFrame::new_j1939(&self.arbitration_id, &self.payload)
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut Vec<u8> {
        &mut self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Replace the payload, enforcing the transport limit.
    pub fn set_payload(&mut self, payload: Vec<u8>) -> Result<(), PduError> {
        if payload.len() > MAX_PDU_PAYLOAD {
            return Err(PduError::DataTooLarge { len: payload.len() });
        }
        self.payload = payload;
        Ok(())
    }

    /// Message PGN: PS cleared for destination-specific groups.
    pub fn pgn(&self) -> u32 {
        self.arbitration_id.pgn().broadcast_form()
    }

    pub fn source(&self) -> u8 {
        self.arbitration_id.source_address()
    }

    /// Destination for PDU1 messages, `None` for PDU2.
    pub fn destination(&self) -> Option<u8> {
        self.arbitration_id.destination_address()
    }

    pub fn is_address_claim(&self) -> bool {
        self.pgn() == PGN_ADDRESS_CLAIMED
    }

    pub fn push_info(&mut self, info: impl Into<String>) {
        self.info.push(info.into());
    }

    /// Restartable chunks of `segment_length` bytes, the last possibly shorter.
    /// A zero length is treated as one.
    pub fn data_segments(&self, segment_length: usize) -> core::slice::Chunks<'_, u8> {
        self.payload.chunks(segment_length.max(1))
    }
}

impl PartialEq for Pdu {
    /// PGN, payload, source and destination. Timestamp, info and radix are ignored.
    fn eq(&self, other: &Self) -> bool {
        self.pgn() == other.pgn()
            && self.payload == other.payload
            && self.source() == other.source()
            && self.destination() == other.destination()
    }
}

impl Eq for Pdu {}

impl fmt::Display for Pdu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:>8}.{:06}    {}   ",
            self.timestamp_us / 1_000_000,
            self.timestamp_us % 1_000_000,
            self.arbitration_id
        )?;
        for byte in &self.payload {
            match self.radix {
                DisplayRadix::Hex => write!(f, " {byte:02x}")?,
                DisplayRadix::Decimal => write!(f, " {byte:3}")?,
            }
        }
        Ok(())
    }
}
