//! Lowercase RFC 4648 base32 without padding
//!
//! This is the multibase `b` encoding used for the text form of CIDs.

use crate::error::FormatError;

const ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz234567";

/// Encode bytes as unpadded lowercase base32
pub fn encode(data: &[u8]) -> String {
    let mut out = String::with_capacity((data.len() * 8).div_ceil(5));
    let mut buffer = 0u16;
    let mut bits = 0u32;
    for &byte in data {
        buffer = (buffer << 8) | u16::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(ALPHABET[((buffer >> bits) & 0x1f) as usize] as char);
        }
        buffer &= (1 << bits) - 1;
    }
    if bits > 0 {
        out.push(ALPHABET[((buffer << (5 - bits)) & 0x1f) as usize] as char);
    }
    out
}

fn value_of(c: u8) -> Option<u8> {
    match c {
        b'a'..=b'z' => Some(c - b'a'),
        b'2'..=b'7' => Some(c - b'2' + 26),
        _ => None,
    }
}

/// Decode unpadded lowercase base32
///
/// Exact inverse of [`encode`]: rejects uppercase, padding, impossible lengths
/// and non-zero leftover bits.
pub fn decode(text: &str) -> Result<Vec<u8>, FormatError> {
    if matches!(text.len() % 8, 1 | 3 | 6) {
        return Err(FormatError::Base32Trailing);
    }
    let mut out = Vec::with_capacity(text.len() * 5 / 8);
    let mut buffer = 0u16;
    let mut bits = 0u32;
    for c in text.chars() {
        let v = u8::try_from(c)
            .ok()
            .and_then(value_of)
            .ok_or(FormatError::Base32Char(c))?;
        buffer = (buffer << 5) | u16::from(v);
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push((buffer >> bits) as u8);
            buffer &= (1 << bits) - 1;
        }
    }
    if buffer != 0 {
        return Err(FormatError::Base32Trailing);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc4648_vectors() {
        // RFC 4648 section 10, lowercased and unpadded
        let cases: &[(&[u8], &str)] = &[
            (b"", ""),
            (b"f", "my"),
            (b"fo", "mzxq"),
            (b"foo", "mzxw6"),
            (b"foob", "mzxw6yq"),
            (b"fooba", "mzxw6ytb"),
            (b"foobar", "mzxw6ytboi"),
        ];
        for (raw, text) in cases {
            assert_eq!(encode(raw), *text);
            assert_eq!(decode(text).unwrap(), raw.to_vec());
        }
    }

    #[test]
    fn test_roundtrip_all_lengths() {
        let data: Vec<u8> = (0..=255u8).collect();
        for len in 0..40 {
            let slice = &data[..len];
            assert_eq!(decode(&encode(slice)).unwrap(), slice);
        }
    }

    #[test]
    fn test_rejects_uppercase_and_padding() {
        assert_eq!(decode("MZXW6"), Err(FormatError::Base32Char('M')));
        assert_eq!(decode("my======"), Err(FormatError::Base32Char('=')));
        assert_eq!(decode("m1"), Err(FormatError::Base32Char('1')));
    }

    #[test]
    fn test_rejects_impossible_length() {
        assert_eq!(decode("m"), Err(FormatError::Base32Trailing));
        assert_eq!(decode("mzx"), Err(FormatError::Base32Trailing));
    }

    #[test]
    fn test_rejects_nonzero_trailing_bits() {
        // "mz" would carry 2 leftover bits set; "my" is the only valid encoding of "f"
        assert_eq!(decode("mz"), Err(FormatError::Base32Trailing));
    }
}
