//! Packing of two 32-bit values into one 64-bit RPU register.
//!
//! Every parameter register is a `u64` split into two halves. The first
//! ("low") component lives in bits `[0, 32)` and the second ("high")
//! component in bits `[32, 64)`. Floats are stored as their IEEE-754
//! binary32 bit pattern, integers as-is.
//!
//! On the wire the full 64-bit value is little-endian, which puts the low
//! component's bytes first. Use [`to_wire_bytes`] / [`from_wire_bytes`] when
//! a transport hands out raw bytes instead of integers.

const HALF_MASK: u64 = 0xFFFF_FFFF;

/// Pack two `f32` values into one register value.
///
/// NaN and infinities pass through as their bit patterns.
///
/// # Example
///
/// ```
/// use rpu_proto::codec::{decode_float_pair, encode_float_pair};
///
/// let raw = encode_float_pair(0.25, 1.0);
/// assert_eq!(raw, 0x3F80_0000_3E80_0000);
/// assert_eq!(decode_float_pair(raw), (0.25, 1.0));
/// ```
pub fn encode_float_pair(low: f32, high: f32) -> u64 {
    encode_uint_pair(low.to_bits(), high.to_bits())
}

/// Unpack a register value into its two `f32` halves.
pub fn decode_float_pair(value: u64) -> (f32, f32) {
    let (low, high) = decode_uint_pair(value);
    (f32::from_bits(low), f32::from_bits(high))
}

/// Pack two `u32` values into one register value.
pub fn encode_uint_pair(low: u32, high: u32) -> u64 {
    (low as u64) | ((high as u64) << 32)
}

/// Split a register value into its two `u32` halves without reinterpretation.
pub fn decode_uint_pair(value: u64) -> (u32, u32) {
    ((value & HALF_MASK) as u32, (value >> 32) as u32)
}

/// Little-endian byte representation of a register value.
pub fn to_wire_bytes(value: u64) -> [u8; 8] {
    value.to_le_bytes()
}

/// Register value from its little-endian byte representation.
pub fn from_wire_bytes(bytes: [u8; 8]) -> u64 {
    u64::from_le_bytes(bytes)
}
