//! `korri-j1939` library: SAE J1939 protocol engine for `no_std` targets with
//! an allocator. The crate exposes the identifier codec (PGN, 29-bit
//! arbitration identifiers), the logical message (PDU) abstraction, the
//! transport protocol (RTS/CTS/BAM segmentation and reassembly), node address
//! management, and the dispatcher engine routing traffic between them.
#![no_std]
//==================================================================================
extern crate alloc;
//==================================================================================
/// Domain and low-level errors (identifier encoding, payload limits,
/// transport failures, protocol violations).
pub mod error;
/// J1939 protocol implementation: transport, address management,
/// security handshake, and the dispatch engine.
pub mod protocol;
//==================================================================================
