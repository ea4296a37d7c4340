//! Variable-length unsigned integers.
//!
//! Uses the QUIC encoding: the two most significant bits of the first byte
//! select a total length of 1, 2, 4 or 8 bytes, and the remaining bits carry
//! the value in network byte order.

use crate::error::{TypesError, TypesResult};

/// Largest value representable in 62 bits.
pub const MAX_VARINT: u64 = (1 << 62) - 1;

/// Number of bytes needed to encode `value`.
pub fn encoded_len(value: u64) -> usize {
    if value < (1 << 6) {
        1
    } else if value < (1 << 14) {
        2
    } else if value < (1 << 30) {
        4
    } else {
        8
    }
}

/// Append `value` to `out`.
pub fn encode(value: u64, out: &mut Vec<u8>) -> TypesResult<()> {
    if value > MAX_VARINT {
        return Err(TypesError::Varint(format!("{value} exceeds 62 bits")));
    }
    match encoded_len(value) {
        1 => out.push(value as u8),
        2 => out.extend_from_slice(&((value as u16) | 0x4000).to_be_bytes()),
        4 => out.extend_from_slice(&((value as u32) | 0x8000_0000).to_be_bytes()),
        _ => out.extend_from_slice(&(value | 0xC000_0000_0000_0000).to_be_bytes()),
    }
    Ok(())
}

/// Decode a varint from the front of `buf`.
///
/// Returns `None` when `buf` holds only part of the integer, otherwise the
/// value and the number of bytes consumed.
pub fn decode(buf: &[u8]) -> Option<(u64, usize)> {
    let &first = buf.first()?;
    let len = 1usize << (first >> 6);
    if buf.len() < len {
        return None;
    }
    let mut value = u64::from(first & 0x3F);
    for byte in &buf[1..len] {
        value = (value << 8) | u64::from(*byte);
    }
    Some((value, len))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(value: u64) -> Vec<u8> {
        let mut out = Vec::new();
        encode(value, &mut out).unwrap();
        out
    }

    #[test]
    fn test_length_boundaries() {
        assert_eq!(encoded(63), vec![0x3F]);
        assert_eq!(encoded(64), vec![0x40, 0x40]);
        assert_eq!(encoded(16383).len(), 2);
        assert_eq!(encoded(16384).len(), 4);
        assert_eq!(encoded((1 << 30) - 1).len(), 4);
        assert_eq!(encoded(1 << 30).len(), 8);
    }

    #[test]
    fn test_rfc9000_sample_values() {
        assert_eq!(
            decode(&[0xc2, 0x19, 0x7c, 0x5e, 0xff, 0x14, 0xe8, 0x8c]),
            Some((151_288_809_941_952_652, 8))
        );
        assert_eq!(decode(&[0x9d, 0x7f, 0x3e, 0x7d]), Some((494_878_333, 4)));
        assert_eq!(decode(&[0x7b, 0xbd]), Some((15_293, 2)));
        assert_eq!(decode(&[0x25]), Some((37, 1)));
    }

    #[test]
    fn test_type_keys_used_on_the_wire() {
        let bytes = encoded(1005);
        assert_eq!(bytes, vec![0x43, 0xED]);
        assert_eq!(decode(&bytes), Some((1005, 2)));
        let bytes = encoded(99001);
        assert_eq!(decode(&bytes), Some((99001, 4)));
    }

    #[test]
    fn test_partial_input_needs_more() {
        assert_eq!(decode(&[]), None);
        assert_eq!(decode(&[0x80, 0x01]), None);
    }

    #[test]
    fn test_rejects_oversized_value() {
        let mut out = Vec::new();
        assert!(encode(u64::MAX, &mut out).is_err());
        assert!(out.is_empty());
    }
}
