//! SAE J1939-81 NAME field (64 bits). The NAME uniquely identifies an ECU
//! function on the network and arbitrates address conflicts: the numerically
//! lower NAME wins.
//!
//! # Bit layout (Little Endian order)
//!
//! ```text
//! Bits  0-20  (21 bits) : Identity number
//! Bits 21-31  (11 bits) : Manufacturer code
//! Bits 32-34  ( 3 bits) : ECU instance
//! Bits 35-39  ( 5 bits) : Function instance
//! Bits 40-47  ( 8 bits) : Function
//! Bit  48     ( 1 bit ) : Reserved
//! Bits 49-55  ( 7 bits) : Vehicle system
//! Bits 56-59  ( 4 bits) : Vehicle system instance
//! Bits 60-62  ( 3 bits) : Industry group
//! Bit  63     ( 1 bit ) : Arbitrary Address Capable
//! ```
use core::fmt;

/// Wrapper around the J1939 NAME field (64 bits).
///
/// # Example
///
/// ```
/// use korri_j1939::protocol::managment::node_name::NodeName;
///
/// let name = NodeName::builder()
///     .identity_number(123456)
///     .manufacturer_code(0x123)
///     .function(130)
///     .arbitrary_address_capable(true)
///     .build();
///
/// assert_eq!(name.identity_number(), 123456);
/// assert!(name.is_arbitrary_address_capable());
/// assert_eq!(NodeName::from_le_bytes(name.to_le_bytes()), name);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NodeName(u64);

impl NodeName {
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(&self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn builder() -> NodeNameBuilder {
        NodeNameBuilder::new()
    }

    /// Decode the eight bytes of an Address Claimed payload.
    #[inline]
    pub const fn from_le_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_le_bytes(bytes))
    }

    /// Address Claimed payload.
    #[inline]
    pub const fn to_le_bytes(&self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    /// Identity number (bits 0-20).
    #[inline]
    pub const fn identity_number(&self) -> u32 {
        (self.0 & 0x1F_FFFF) as u32
    }

    /// Manufacturer code (bits 21-31).
    #[inline]
    pub const fn manufacturer_code(&self) -> u16 {
        ((self.0 >> 21) & 0x7FF) as u16
    }

    #[inline]
    pub const fn ecu_instance(&self) -> u8 {
        ((self.0 >> 32) & 0x07) as u8
    }

    #[inline]
    pub const fn function_instance(&self) -> u8 {
        ((self.0 >> 35) & 0x1F) as u8
    }

    #[inline]
    pub const fn function(&self) -> u8 {
        ((self.0 >> 40) & 0xFF) as u8
    }

    #[inline]
    pub const fn reserved(&self) -> bool {
        ((self.0 >> 48) & 0x01) != 0
    }

    #[inline]
    pub const fn vehicle_system(&self) -> u8 {
        ((self.0 >> 49) & 0x7F) as u8
    }

    #[inline]
    pub const fn vehicle_system_instance(&self) -> u8 {
        ((self.0 >> 56) & 0x0F) as u8
    }

    /// Industry group (bits 60-62); 0 is global, 1 on-highway.
    #[inline]
    pub const fn industry_group(&self) -> u8 {
        ((self.0 >> 60) & 0x07) as u8
    }

    /// Arbitrary Address Capable bit (bit 63).
    ///
    /// Indicates whether the node may move to another address (128-247)
    /// after losing a claim.
    #[inline]
    pub const fn is_arbitrary_address_capable(&self) -> bool {
        ((self.0 >> 63) & 0x01) != 0
    }

    /// `true` when `self` wins an address contest against `other`.
    #[inline]
    pub fn has_priority_over(&self, other: &NodeName) -> bool {
        self.0 < other.0
    }
}

impl From<u64> for NodeName {
    #[inline]
    fn from(raw: u64) -> Self {
        Self::from_raw(raw)
    }
}

impl From<NodeName> for u64 {
    #[inline]
    fn from(name: NodeName) -> Self {
        name.raw()
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "NodeName {{ identity: {}, mfg: {}, func: {}, system: {}, ecu: {}, aac: {} }}",
            self.identity_number(),
            self.manufacturer_code(),
            self.function(),
            self.vehicle_system(),
            self.ecu_instance(),
            self.is_arbitrary_address_capable()
        )
    }
}

/// Fluent builder used to construct a `NodeName`. Values wider than their
/// field are masked.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeNameBuilder {
    raw: u64,
}

impl NodeNameBuilder {
    #[inline]
    pub const fn new() -> Self {
        Self { raw: 0 }
    }

    #[inline]
    const fn field(mut self, shift: u32, mask: u64, value: u64) -> Self {
        self.raw = (self.raw & !(mask << shift)) | ((value & mask) << shift);
        self
    }

    #[inline]
    pub const fn identity_number(self, value: u32) -> Self {
        self.field(0, 0x1F_FFFF, value as u64)
    }

    #[inline]
    pub const fn manufacturer_code(self, value: u16) -> Self {
        self.field(21, 0x7FF, value as u64)
    }

    #[inline]
    pub const fn ecu_instance(self, value: u8) -> Self {
        self.field(32, 0x07, value as u64)
    }

    #[inline]
    pub const fn function_instance(self, value: u8) -> Self {
        self.field(35, 0x1F, value as u64)
    }

    #[inline]
    pub const fn function(self, value: u8) -> Self {
        self.field(40, 0xFF, value as u64)
    }

    #[inline]
    pub const fn reserved(self, value: bool) -> Self {
        self.field(48, 0x01, value as u64)
    }

    #[inline]
    pub const fn vehicle_system(self, value: u8) -> Self {
        self.field(49, 0x7F, value as u64)
    }

    #[inline]
    pub const fn vehicle_system_instance(self, value: u8) -> Self {
        self.field(56, 0x0F, value as u64)
    }

    #[inline]
    pub const fn industry_group(self, value: u8) -> Self {
        self.field(60, 0x07, value as u64)
    }

    #[inline]
    pub const fn arbitrary_address_capable(self, value: bool) -> Self {
        self.field(63, 0x01, value as u64)
    }

    #[inline]
    pub const fn build(self) -> NodeName {
        NodeName(self.raw)
    }
}
