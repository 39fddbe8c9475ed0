//! SAE J1939-81 network management messages: Address Claimed, Cannot Claim,
//! Request, Commanded Address, and the rules that arbitrate claim conflicts.
//!
//! These helpers are pure; the claiming state lives in
//! [`Node`](crate::protocol::managment::node::Node).
use crate::error::PduError;
use crate::protocol::managment::node_name::NodeName;
use crate::protocol::transport::can_id::ArbitrationId;
use crate::protocol::transport::pdu::Pdu;
use crate::protocol::transport::pgn::{
    Pgn, PGN_ACKNOWLEDGEMENT, PGN_ADDRESS_CLAIMED, PGN_COMMANDED_ADDRESS, PGN_REQUEST,
};
use crate::protocol::transport::{ADDRESS_GLOBAL, ADDRESS_NULL, DEFAULT_PRIORITY};

/// First address of the self-configurable range.
pub const ARBITRARY_ADDRESS_FIRST: u8 = 128;
/// Last address of the self-configurable range.
pub const ARBITRARY_ADDRESS_LAST: u8 = 247;

//==================================================================================CLAIM_PDUS
/// Address Claimed from `address`, broadcast, priority 6, NAME little-endian.
pub fn build_address_claim(name: NodeName, address: u8) -> Pdu {
    let id = ArbitrationId::from_parts(
        DEFAULT_PRIORITY,
        Pgn::from_value(PGN_ADDRESS_CLAIMED),
        address,
        ADDRESS_GLOBAL,
    );
    Pdu::assembled(id, name.to_le_bytes().to_vec(), 0)
}

/// Cannot Claim: an Address Claimed sent from the NULL address.
pub fn build_cannot_claim(name: NodeName) -> Pdu {
    build_address_claim(name, ADDRESS_NULL)
}

/// NAME carried by an Address Claimed PDU.
pub fn extract_name_from_claim(pdu: &Pdu) -> Option<NodeName> {
    if !pdu.is_address_claim() {
        return None;
    }
    let bytes: [u8; 8] = pdu.payload().get(..8)?.try_into().ok()?;
    Some(NodeName::from_le_bytes(bytes))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Outcome of a competing claim for one of our addresses.
pub enum ClaimContest {
    /// Not a contest: other address, same NAME, or not a claim.
    NoConflict,
    /// Our NAME is lower: keep the address and re-send our claim.
    Defend,
    /// Their NAME is lower: release the address.
    Yield,
}

/// Arbitrate an incoming Address Claimed against our claim of `address`.
pub fn resolve_claim(pdu: &Pdu, my_name: NodeName, address: u8) -> ClaimContest {
    if pdu.source() != address {
        return ClaimContest::NoConflict;
    }
    match extract_name_from_claim(pdu) {
        Some(their_name) if their_name == my_name => ClaimContest::NoConflict,
        Some(their_name) if my_name.has_priority_over(&their_name) => ClaimContest::Defend,
        Some(_) => ClaimContest::Yield,
        None => ClaimContest::NoConflict,
    }
}

//==================================================================================REQUEST
/// Request for `pgn` (three bytes, little-endian).
pub fn build_request(pgn: u32, source: u8, destination: u8) -> Result<Pdu, PduError> {
    let id = ArbitrationId::builder(PGN_REQUEST, source)
        .to_destination(destination)
        .build()?;
    let bytes = pgn.to_le_bytes();
    Pdu::new(id, &bytes[..3])
}

/// PGN asked for by a Request PDU.
pub fn requested_pgn(pdu: &Pdu) -> Option<u32> {
    if pdu.pgn() != PGN_REQUEST {
        return None;
    }
    let bytes = pdu.payload().get(..3)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0]))
}

/// `true` for an Acknowledgement answering a request for `pgn`. The
/// acknowledged PGN sits in bytes 5..8.
pub fn is_acknowledgement_for(pdu: &Pdu, pgn: u32) -> bool {
    if pdu.pgn() != PGN_ACKNOWLEDGEMENT {
        return false;
    }
    match pdu.payload().get(5..8) {
        Some(bytes) => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0]) == pgn,
        None => true,
    }
}

//==================================================================================COMMANDED_ADDRESS
/// Target NAME and new address of a Commanded Address PDU (9 bytes).
pub fn parse_commanded_address(pdu: &Pdu) -> Option<(NodeName, u8)> {
    if pdu.pgn() != PGN_COMMANDED_ADDRESS {
        return None;
    }
    let payload = pdu.payload();
    let name: [u8; 8] = payload.get(..8)?.try_into().ok()?;
    let address = *payload.get(8)?;
    Some((NodeName::from_le_bytes(name), address))
}

/// Commanded Address for `name`, sent from `source`.
pub fn build_commanded_address(
    name: NodeName,
    new_address: u8,
    source: u8,
) -> Result<Pdu, PduError> {
    let id = ArbitrationId::builder(PGN_COMMANDED_ADDRESS, source).build()?;
    let mut payload = [0u8; 9];
    payload[..8].copy_from_slice(&name.to_le_bytes());
    payload[8] = new_address;
    Pdu::new(id, &payload)
}

//==================================================================================ARBITRARY_ADDRESSES
/// Candidate addresses for an arbitrary-address-capable node that lost
/// `lost_address`: the 128-247 range starting after it, wrapping around to
/// 128. `lost_address` itself is never yielded.
pub fn arbitrary_addresses_after(lost_address: u8) -> impl Iterator<Item = u8> {
    let first = ARBITRARY_ADDRESS_FIRST;
    let last = ARBITRARY_ADDRESS_LAST;
    let start = if (first..last).contains(&lost_address) {
        lost_address + 1
    } else {
        first
    };
    (start..=last)
        .chain(first..start)
        .filter(move |&address| address != lost_address)
}
