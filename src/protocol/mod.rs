//! High-level components of the J1939 protocol: identifier and transport
//! layer, network management, seed/key security, and the dispatch engine.
pub mod engine;
pub mod managment;
pub mod security;
pub mod transport;
