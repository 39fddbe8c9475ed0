//! DM18 seed/key handshake guarding protected memory access.
//!
//! A tool sends a seed on the data security PGN; the engine answers with the
//! key computed by an application supplied [`SeedKeyGenerator`]:
//!
//! ```text
//! Seed (inbound) : [4 (long seed), x, seed_b0, seed_b1, seed_b2, seed_b3, x, x]
//! Key  (reply)   : [1 (key),       x, key_b0,  key_b1,  key_b2,  key_b3,  x, x]
//! ```
//! Bytes marked `x` are echoed unchanged; source and destination are swapped.
use crate::protocol::transport::can_id::ArbitrationId;
use crate::protocol::transport::pdu::Pdu;
use crate::protocol::transport::pgn::{Pgn, PGN_DATA_SECURITY};

/// Byte 0 of a long seed message.
pub const SECURITY_TYPE_LONG_SEED: u8 = 4;
/// Byte 0 of a key response.
pub const SECURITY_TYPE_KEY: u8 = 1;

/// Computes the key answering a seed. Any `Fn(u32) -> u32` qualifies.
pub trait SeedKeyGenerator {
    fn seed_to_key(&self, seed: u32) -> u32;
}

impl<F> SeedKeyGenerator for F
where
    F: Fn(u32) -> u32,
{
    fn seed_to_key(&self, seed: u32) -> u32 {
        self(seed)
    }
}

/// Seed carried by a long-seed data security PDU addressed to a node.
pub fn extract_seed(pdu: &Pdu) -> Option<u32> {
    if pdu.pgn() != PGN_DATA_SECURITY {
        return None;
    }
    let payload = pdu.payload();
    if payload.len() != 8 || payload[0] != SECURITY_TYPE_LONG_SEED {
        return None;
    }
    Some(u32::from_le_bytes([payload[2], payload[3], payload[4], payload[5]]))
}

/// Key response to a seed request, or `None` when `request` is not a long seed.
pub fn build_key_response<G>(request: &Pdu, generator: &G) -> Option<Pdu>
where
    G: SeedKeyGenerator + ?Sized,
{
    let seed = extract_seed(request)?;
    let key = generator.seed_to_key(seed);

    #[cfg(feature = "defmt")]
    defmt::info!("Seed {=u32:#x} yields key {=u32:#x}", seed, key);

    let request_id = request.arbitration_id;
    let id = ArbitrationId::from_parts(
        request_id.priority(),
        Pgn::from_value(PGN_DATA_SECURITY),
        request_id.destination_address()?,
        request_id.source_address(),
    );

    let mut payload = request.payload().to_vec();
    payload[0] = SECURITY_TYPE_KEY;
    payload[2..6].copy_from_slice(&key.to_le_bytes());
    Some(Pdu::assembled(id, payload, 0))
}
