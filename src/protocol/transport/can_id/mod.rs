//! Creation and extraction of the 29-bit CAN identifiers used by SAE J1939.
//!
//! ```text
//! Bits 26-28 : priority (0 highest, 7 lowest)
//! Bits  8-25 : PGN (PS byte carries the destination for PDU1)
//! Bits  0-7  : source address
//! ```
use crate::error::EncodingError;
use crate::protocol::transport::pgn::Pgn;
use crate::protocol::transport::{ADDRESS_GLOBAL, DEFAULT_PRIORITY};
use core::fmt;

/// Mask of the 29 meaningful identifier bits.
pub const CAN_ID_MASK: u32 = 0x1FFF_FFFF;

const PRIORITY_MAX: u8 = 7;

//==================================================================================ARBITRATION_ID
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Decomposed J1939 identifier: priority, PGN, source and (PDU1 only) destination.
///
/// The PGN stored for a PDU1 identifier always has its PS byte cleared; the
/// destination lives in its own field and defaults to [`ADDRESS_GLOBAL`].
pub struct ArbitrationId {
    priority: u8,
    pgn: Pgn,
    source: u8,
    destination: u8,
}

impl ArbitrationId {
    // Builder entry point
    /// Creates a pre-configured `ArbitrationIdBuilder` for a PGN and source address.
    pub fn builder(pgn: impl Into<Pgn>, source_address: u8) -> ArbitrationIdBuilder {
        ArbitrationIdBuilder::new(pgn.into(), source_address)
    }

    /// Decompose a raw 29-bit identifier. Bits above 28 are ignored.
    pub fn from_can_id(can_id: u32) -> Self {
        let can_id = can_id & CAN_ID_MASK;
        let mut pgn = Pgn::from_can_id(can_id);
        let mut destination = ADDRESS_GLOBAL;
        if pgn.is_destination_specific() {
            destination = pgn.pdu_specific();
            pgn.set_pdu_specific(0);
        }
        Self {
            priority: ((can_id >> 26) & 0x07) as u8,
            pgn,
            source: (can_id & 0xFF) as u8,
            destination,
        }
    }

    /// Infallible constructor for internally generated identifiers: priority
    /// is masked to 3 bits and PS is cleared for PDU1.
    pub(crate) fn from_parts(priority: u8, mut pgn: Pgn, source: u8, destination: u8) -> Self {
        if pgn.is_destination_specific() {
            pgn.set_pdu_specific(0);
        }
        Self {
            priority: priority & 0x07,
            pgn,
            source,
            destination,
        }
    }

    /// Canonical 29-bit identifier.
    pub fn can_id(&self) -> u32 {
        let mut id = ((self.priority as u32) << 26) | (self.pgn.value() << 8) | self.source as u32;
        if self.pgn.is_destination_specific() {
            id |= (self.destination as u32) << 8;
        }
        id
    }

    /// Priority (3 bits, 0-7).
    pub fn priority(&self) -> u8 {
        self.priority
    }

    /// Identifier PGN; PS is zero for PDU1.
    pub fn pgn(&self) -> Pgn {
        self.pgn
    }

    /// Eight-bit source address.
    pub fn source_address(&self) -> u8 {
        self.source
    }

    /// Destination address for PDU1 identifiers, `None` for PDU2.
    pub fn destination_address(&self) -> Option<u8> {
        self.pgn.is_destination_specific().then_some(self.destination)
    }

    /// `true` for PDU2 identifiers and PDU1 identifiers addressed to 0xFF.
    pub fn is_broadcast(&self) -> bool {
        !matches!(self.destination_address(), Some(da) if da != ADDRESS_GLOBAL)
    }

    pub fn set_priority(&mut self, priority: u8) -> Result<(), EncodingError> {
        if priority > PRIORITY_MAX {
            return Err(EncodingError::PriorityOutOfRange { priority });
        }
        self.priority = priority;
        Ok(())
    }

    pub fn set_source_address(&mut self, source_address: u8) {
        self.source = source_address;
    }

    /// Address the identifier. PDU2 identifiers only accept the global address.
    pub fn set_destination(&mut self, destination: u8) -> Result<(), EncodingError> {
        if self.pgn.is_destination_specific() {
            self.destination = destination;
            Ok(())
        } else if destination == ADDRESS_GLOBAL {
            Ok(())
        } else {
            Err(EncodingError::DestinationNotAllowed {
                pgn: self.pgn.value(),
            })
        }
    }
}

impl fmt::Display for ArbitrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.destination_address() {
            Some(destination) => write!(
                f,
                "PRI={} PGN={:6} DST=0x{:02x} SRC=0x{:02x}",
                self.priority,
                self.pgn.value(),
                destination,
                self.source
            ),
            None => write!(
                f,
                "PRI={} PGN={:6}          SRC=0x{:02x}",
                self.priority,
                self.pgn.value(),
                self.source
            ),
        }
    }
}

//==================================================================================ARBITRATION_ID_BUILDER
#[derive(Debug, Clone, Copy)]
/// Fluent builder that enforces the PDU1/PDU2 rules.
pub struct ArbitrationIdBuilder {
    priority: u8,
    pgn: Pgn,
    source_address: u8,
    destination: Option<u8>,
}

impl ArbitrationIdBuilder {
    /// Initializes the builder for a given PGN and source address.
    pub fn new(pgn: Pgn, source_address: u8) -> Self {
        Self {
            priority: DEFAULT_PRIORITY,
            pgn,
            source_address,
            destination: None,
        }
    }

    /// Sets the priority (3 bits) to use during construction.
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Assigns a destination address (PDU1).
    pub fn to_destination(mut self, destination_address: u8) -> Self {
        self.destination = Some(destination_address);
        self
    }

    /// Same as `to_destination`, accepting an optional address.
    pub fn with_destination(mut self, destination: Option<u8>) -> Self {
        self.destination = destination;
        self
    }

    /// Builds the identifier while applying J1939 rules:
    /// - priority must fit in 3 bits
    /// - PDU1: PS of the PGN is cleared, destination defaults to 0xFF
    /// - PDU2: only the global destination (or none) is accepted
    pub fn build(self) -> Result<ArbitrationId, EncodingError> {
        if self.priority > PRIORITY_MAX {
            return Err(EncodingError::PriorityOutOfRange {
                priority: self.priority,
            });
        }

        let mut pgn = self.pgn;
        if pgn.is_destination_specific() {
            pgn.set_pdu_specific(0);
        } else if self.destination.is_some_and(|da| da != ADDRESS_GLOBAL) {
            return Err(EncodingError::DestinationNotAllowed { pgn: pgn.value() });
        }

        Ok(ArbitrationId {
            priority: self.priority,
            pgn,
            source: self.source_address,
            destination: self.destination.unwrap_or(ADDRESS_GLOBAL),
        })
    }
}
