//! J1939 transport layer: PGN and 29-bit identifier management, CAN frame
//! representation, logical messages (PDU), the multi-packet transport
//! protocol, and bus abstraction traits.
//!
//! ## J1939 Addressing Constants
//!
//! Reserved addresses and the payload ceiling shared by every layer.

pub mod can_frame;
pub mod can_id;
pub mod pdu;
pub mod pgn;
pub mod tp;
pub mod traits;

/// Global (broadcast) destination address.
pub const ADDRESS_GLOBAL: u8 = 0xFF;

/// NULL address, used as source by a node that cannot claim an address.
pub const ADDRESS_NULL: u8 = 0xFE;

/// Largest payload the transport protocol can carry (255 packets × 7 bytes).
pub const MAX_PDU_PAYLOAD: usize = 1785;

/// Largest payload sent as a single CAN frame.
pub const MAX_SINGLE_FRAME_PAYLOAD: usize = 8;

/// Default priority for application messages built without an explicit one.
///
/// J1939 priorities run from 0 (highest) to 7 (lowest).
pub const DEFAULT_PRIORITY: u8 = 6;
