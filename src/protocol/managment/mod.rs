//! Network management logic: NAME field manipulation, address claiming,
//! and the logical nodes owning claimed addresses.
pub mod address_claiming;
pub mod node;
pub mod node_name;
