//! Constants and configuration for the allocation engine

/// Separates the two endpoints of a range (`10.0.0.0-10.0.0.255`).
pub const RANGE_DELIMITER: char = '-';
/// Separates address and length of a prefix (`10.0.0.0/8`).
pub const PREFIX_DELIMITER: char = '/';

pub const V4_BITS: u8 = 32;
pub const V6_BITS: u8 = 128;

// Flag bits as exposed through the C ABI
pub const FLAG_PREFIX: u8 = 0b001;
pub const FLAG_RANGE: u8 = 0b010;
pub const FLAG_ADDRESS: u8 = 0b100;

/// Longest textual key is `ffff:ffff:ffff:ffff:ffff:ffff:ffff:ffff/128` (43 bytes + NUL).
pub const KEY_MAX_LEN: usize = 64;
