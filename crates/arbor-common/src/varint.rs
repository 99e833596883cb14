//! Unsigned LEB128 integers
//!
//! Used for CID prefixes and CAR block framing. Seven data bits per byte,
//! least significant group first, high bit set on every byte except the last.

use std::io::Read;

use bytes::BufMut;

use crate::error::{FormatError, StreamError};

/// Longest encoding of a `u64`
pub const MAX_LEN: usize = 10;

/// Append the encoding of `value` to `buf`
pub fn encode(mut value: u64, buf: &mut impl BufMut) {
    while value >= 0x80 {
        buf.put_u8((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

/// Encode `value` into a fresh vector
pub fn to_vec(value: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded_len(value));
    encode(value, &mut out);
    out
}

/// Number of bytes `encode` writes for `value`
pub fn encoded_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.div_ceil(7).max(1)
}

/// Decode a VarInt from the front of `input`
///
/// Returns the value and the number of bytes consumed.
pub fn decode(input: &[u8]) -> Result<(u64, usize), FormatError> {
    let mut value = 0u64;
    for (i, &byte) in input.iter().enumerate() {
        let group = u64::from(byte & 0x7f);
        if i == MAX_LEN - 1 && byte > 0x01 {
            return Err(FormatError::VarIntOverflow);
        }
        value |= group << (7 * i);
        if byte & 0x80 == 0 {
            if i > 0 && byte == 0 {
                return Err(FormatError::VarIntNonMinimal);
            }
            return Ok((value, i + 1));
        }
    }
    Err(FormatError::VarIntTruncated { read: input.len() })
}

/// Read one VarInt from a stream
///
/// Returns `Ok(None)` on a clean end of stream (no bytes available at all),
/// which is how CAR readers detect the last block.
pub fn read<R: Read + ?Sized>(reader: &mut R) -> Result<Option<u64>, StreamError> {
    let mut buf = [0u8; MAX_LEN];
    for i in 0..MAX_LEN {
        let mut byte = [0u8; 1];
        let n = loop {
            match reader.read(&mut byte) {
                Ok(n) => break n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        };
        if n == 0 {
            if i == 0 {
                return Ok(None);
            }
            return Err(FormatError::VarIntTruncated { read: i }.into());
        }
        buf[i] = byte[0];
        if byte[0] & 0x80 == 0 {
            let (value, _) = decode(&buf[..=i])?;
            return Ok(Some(value));
        }
    }
    Err(FormatError::VarIntOverflow.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_encodings() {
        assert_eq!(to_vec(0), vec![0x00]);
        assert_eq!(to_vec(1), vec![0x01]);
        assert_eq!(to_vec(127), vec![0x7f]);
        assert_eq!(to_vec(128), vec![0x80, 0x01]);
        assert_eq!(to_vec(300), vec![0xac, 0x02]);
        assert_eq!(to_vec(16383), vec![0xff, 0x7f]);
        assert_eq!(to_vec(16384), vec![0x80, 0x80, 0x01]);
    }

    #[test]
    fn test_roundtrip_boundaries() {
        let values = [
            0u64,
            1,
            127,
            128,
            16383,
            16384,
            i32::MAX as u64,
            u32::MAX as u64,
            i64::MAX as u64,
            u64::MAX,
        ];
        for value in values {
            let bytes = to_vec(value);
            assert_eq!(bytes.len(), encoded_len(value), "length of {}", value);
            assert_eq!(decode(&bytes).unwrap(), (value, bytes.len()));
        }
    }

    #[test]
    fn test_decode_leaves_trailing_bytes() {
        let (value, used) = decode(&[0x80, 0x01, 0xff, 0xff]).unwrap();
        assert_eq!(value, 128);
        assert_eq!(used, 2);
    }

    #[test]
    fn test_truncated() {
        assert_eq!(decode(&[]), Err(FormatError::VarIntTruncated { read: 0 }));
        assert_eq!(
            decode(&[0x80, 0x80]),
            Err(FormatError::VarIntTruncated { read: 2 })
        );
    }

    #[test]
    fn test_overflow() {
        let mut bytes = vec![0xff; 9];
        bytes.push(0x02);
        assert_eq!(decode(&bytes), Err(FormatError::VarIntOverflow));
    }

    #[test]
    fn test_non_minimal() {
        assert_eq!(decode(&[0x81, 0x00]), Err(FormatError::VarIntNonMinimal));
    }

    #[test]
    fn test_read_stream() {
        let data = [0xac, 0x02, 0x05];
        let mut reader = &data[..];
        assert_eq!(read(&mut reader).unwrap(), Some(300));
        assert_eq!(read(&mut reader).unwrap(), Some(5));
        assert_eq!(read(&mut reader).unwrap(), None);
    }

    #[test]
    fn test_read_stream_truncated() {
        let data = [0x80];
        let mut reader = &data[..];
        assert!(matches!(
            read(&mut reader),
            Err(StreamError::Format(FormatError::VarIntTruncated { read: 1 }))
        ));
    }
}
