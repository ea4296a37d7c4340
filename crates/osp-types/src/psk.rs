//! Human-presentable PSK encoding.
//!
//! A PSK is shown to the user as a decimal number split into hyphenated
//! groups: groups of three digits below nine digits, groups of four above.
//! The number is always zero-padded on the left, by a whole group when its
//! length is already a multiple of the group size.

use crate::error::{TypesError, TypesResult};
use rand::RngCore;

/// Length of a PSK as handed to the PAKE.
pub const PSK_LEN: usize = 8;

/// Generate a PSK carrying at least `min_entropy_bits` random bits.
///
/// The random bytes are right-aligned in a zeroed 8-byte buffer so the value
/// survives a trip through [`encode_numeric`] and [`decode_numeric`].
pub fn generate_psk(min_entropy_bits: u8) -> [u8; PSK_LEN] {
    let len = ((usize::from(min_entropy_bits) + 7) / 8).clamp(1, PSK_LEN);
    let mut psk = [0u8; PSK_LEN];
    rand::thread_rng().fill_bytes(&mut psk[PSK_LEN - len..]);
    psk
}

/// Render raw PSK bytes (at most 8, big-endian) as grouped digits.
pub fn encode_numeric(raw: &[u8]) -> TypesResult<String> {
    if raw.len() > PSK_LEN {
        return Err(TypesError::InvalidPskCode(format!(
            "{} bytes exceed the {PSK_LEN}-byte numeric range",
            raw.len()
        )));
    }
    let value = raw.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
    let digits = value.to_string();
    let group = if digits.len() < 9 { 3 } else { 4 };
    // Always at least one leading zero; a full group when already aligned.
    let padded_len = digits.len() + group - digits.len() % group;
    let padded = format!("{digits:0>padded_len$}");

    let mut out = String::with_capacity(padded_len + padded_len / group);
    for (i, ch) in padded.chars().enumerate() {
        if i > 0 && i % group == 0 {
            out.push('-');
        }
        out.push(ch);
    }
    Ok(out)
}

/// Parse a grouped code back into the 8-byte big-endian PSK.
pub fn decode_numeric(code: &str) -> TypesResult<[u8; PSK_LEN]> {
    let digits: String = code.chars().filter(|c| *c != '-').collect();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(TypesError::InvalidPskCode(format!("not a numeric code: {code:?}")));
    }
    let trimmed = digits.trim_start_matches('0');
    let value = if trimmed.is_empty() {
        0
    } else {
        trimmed
            .parse::<u64>()
            .map_err(|e| TypesError::InvalidPskCode(format!("{code:?}: {e}")))?
    };
    Ok(value.to_be_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_values_use_groups_of_three() {
        assert_eq!(encode_numeric(&[0x01, 0xE2, 0x40]).unwrap(), "000-123-456");
        assert_eq!(encode_numeric(&[0x30, 0x39]).unwrap(), "012-345");
        assert_eq!(encode_numeric(&[]).unwrap(), "000");
    }

    #[test]
    fn test_long_values_use_groups_of_four() {
        let raw = 1_234_567_890u64.to_be_bytes();
        assert_eq!(encode_numeric(&raw).unwrap(), "0012-3456-7890");
        let raw = 12_345_678u64.to_be_bytes();
        assert_eq!(encode_numeric(&raw).unwrap(), "012-345-678");
        let raw = 123_456_789_012u64.to_be_bytes();
        assert_eq!(encode_numeric(&raw).unwrap(), "0000-1234-5678-9012");
    }

    #[test]
    fn test_aligned_digits_get_a_full_group_of_zeros() {
        let raw = 123_456u64.to_be_bytes();
        let code = encode_numeric(&raw).unwrap();
        assert_eq!(code, "000-123-456");
        assert_eq!(decode_numeric(&code).unwrap(), raw);
    }

    #[test]
    fn test_decode_inverts_encode() {
        for _ in 0..64 {
            let psk = generate_psk(60);
            let code = encode_numeric(&psk).unwrap();
            assert_eq!(decode_numeric(&code).unwrap(), psk, "code {code}");
        }
        assert_eq!(decode_numeric("000").unwrap(), [0u8; 8]);
    }

    #[test]
    fn test_generate_respects_entropy_width() {
        let psk = generate_psk(20);
        assert_eq!(&psk[..5], &[0u8; 5]);
        let psk = generate_psk(60);
        assert_eq!(psk[0], 0);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(decode_numeric("12a-456").is_err());
        assert!(decode_numeric("").is_err());
        assert!(decode_numeric("9999-9999-9999-9999-9999").is_err());
        assert!(encode_numeric(&[0u8; 9]).is_err());
    }
}
