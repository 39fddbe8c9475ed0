//! Parameter Group Number (PGN): the 18-bit message type identifier carried
//! in bits 8..26 of every J1939 CAN identifier.
//!
//! # Bit layout
//!
//! ```text
//! Bit  17     ( 1 bit ) : Reserved (extended data page)
//! Bit  16     ( 1 bit ) : Data page
//! Bits  8-15  ( 8 bits) : PDU format (PF)
//! Bits  0-7   ( 8 bits) : PDU specific (PS) – destination (PDU1) or group extension (PDU2)
//! ```
use crate::error::EncodingError;
use core::fmt;

//==================================================================================CONTROL_PGNS
/// Acknowledgement (ACK/NACK) answering a request.
pub const PGN_ACKNOWLEDGEMENT: u32 = 0x00E800;
/// Request for a PGN; payload carries the requested PGN on three bytes.
pub const PGN_REQUEST: u32 = 0x00EA00;
/// Transport protocol data transfer (TP.DT).
pub const PGN_TP_DATA_TRANSFER: u32 = 0x00EB00;
/// Transport protocol connection management (TP.CM).
pub const PGN_TP_CONNECTION_MANAGEMENT: u32 = 0x00EC00;
/// Address claimed / cannot claim; payload carries the 64-bit NAME.
pub const PGN_ADDRESS_CLAIMED: u32 = 0x00EE00;
/// Commanded address; payload carries the target NAME and the new address.
pub const PGN_COMMANDED_ADDRESS: u32 = 0x00FED8;
/// DM18 data security: seed requests and key responses for protected memory access.
pub const PGN_DATA_SECURITY: u32 = 0x00D400;

/// Largest encodable PGN value.
pub const PGN_MAX: u32 = 0x3FFFF;

/// PDU format values at or above this threshold are broadcast-only (PDU2).
const PDU2_THRESHOLD: u8 = 240;

//==================================================================================PGN
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Decomposed Parameter Group Number.
pub struct Pgn {
    reserved: bool,
    data_page: bool,
    pdu_format: u8,
    pdu_specific: u8,
}

impl Pgn {
    /// Build a PGN from its four fields.
    pub const fn new(reserved: bool, data_page: bool, pdu_format: u8, pdu_specific: u8) -> Self {
        Self {
            reserved,
            data_page,
            pdu_format,
            pdu_specific,
        }
    }

    /// Decode an 18-bit value. Bits above 17 are ignored.
    pub const fn from_value(value: u32) -> Self {
        Self {
            reserved: (value >> 17) & 0x01 == 1,
            data_page: (value >> 16) & 0x01 == 1,
            pdu_format: ((value >> 8) & 0xFF) as u8,
            pdu_specific: (value & 0xFF) as u8,
        }
    }

    /// Decode an 18-bit value, rejecting anything wider.
    pub fn try_from_value(value: u32) -> Result<Self, EncodingError> {
        if value > PGN_MAX {
            return Err(EncodingError::PgnOutOfRange { value });
        }
        Ok(Self::from_value(value))
    }

    /// Extract the PGN carried in bits 8..26 of a 29-bit CAN identifier.
    pub const fn from_can_id(can_id: u32) -> Self {
        Self::from_value((can_id >> 8) & PGN_MAX)
    }

    /// Packed 18-bit value.
    pub const fn value(&self) -> u32 {
        ((self.reserved as u32) << 17)
            | ((self.data_page as u32) << 16)
            | ((self.pdu_format as u32) << 8)
            | (self.pdu_specific as u32)
    }

    /// Message PGN: PS cleared for PDU1 (where it holds the destination),
    /// full value for PDU2.
    pub const fn broadcast_form(&self) -> u32 {
        if self.is_destination_specific() {
            self.value() & 0x3FF00
        } else {
            self.value()
        }
    }

    pub const fn reserved(&self) -> bool {
        self.reserved
    }

    pub const fn data_page(&self) -> bool {
        self.data_page
    }

    pub const fn pdu_format(&self) -> u8 {
        self.pdu_format
    }

    pub const fn pdu_specific(&self) -> u8 {
        self.pdu_specific
    }

    /// Replace the PS byte (destination for PDU1, group extension for PDU2).
    pub fn set_pdu_specific(&mut self, pdu_specific: u8) {
        self.pdu_specific = pdu_specific;
    }

    /// Copy of this PGN with another PS byte.
    pub const fn with_pdu_specific(self, pdu_specific: u8) -> Self {
        Self {
            pdu_specific,
            ..self
        }
    }

    /// PDU1: PF < 240, or either page flag set.
    pub const fn is_pdu1(&self) -> bool {
        self.pdu_format < PDU2_THRESHOLD || self.reserved || self.data_page
    }

    pub const fn is_pdu2(&self) -> bool {
        !self.is_pdu1()
    }

    /// `true` when PS carries a destination address (PDU1).
    pub const fn is_destination_specific(&self) -> bool {
        self.is_pdu1()
    }
}

impl From<u32> for Pgn {
    #[inline]
    fn from(value: u32) -> Self {
        Self::from_value(value)
    }
}

impl From<Pgn> for u32 {
    #[inline]
    fn from(pgn: Pgn) -> Self {
        pgn.value()
    }
}

impl fmt::Display for Pgn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:05x} ", self.value())?;
        f.write_str(if self.reserved { "R " } else { "  " })?;
        f.write_str(if self.data_page { "P" } else { " " })
    }
}
