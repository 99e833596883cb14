//! MST utility functions

use crate::error::{MstError, Result};
use sha2::{Digest, Sha256};

/// Longest record path accepted by [`validate_key`]
pub const MAX_KEY_LEN: usize = 256;

/// Calculate layer (depth) for a key based on its hash
///
/// Per atproto spec: depth = floor(leading_zero_bits / 2)
/// This gives a fanout of 4 (counting 2-bit chunks of zeros).
/// More leading zeros = higher layer.
pub fn layer_for_key(key: &str) -> usize {
    let hash = Sha256::digest(key.as_bytes());
    leading_zeros(&hash) / 2
}

/// Count leading zero bits in hash
fn leading_zeros(hash: &[u8]) -> usize {
    let mut count = 0;
    for byte in hash {
        if *byte == 0 {
            count += 8;
        } else {
            count += byte.leading_zeros() as usize;
            break;
        }
    }
    count
}

/// Count shared prefix length in bytes between two keys
pub fn common_prefix_len(a: &str, b: &str) -> usize {
    a.bytes().zip(b.bytes()).take_while(|(x, y)| x == y).count()
}

fn valid_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '~' | '-')
}

/// Validate a record path
///
/// Paths are `<collection>/<rkey>`: exactly one `/`, both halves non-empty,
/// each made of `[a-zA-Z0-9._:~-]`, at most 256 bytes overall.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(MstError::EmptyKey.into());
    }

    if key.len() > MAX_KEY_LEN {
        return Err(MstError::KeyTooLong {
            len: key.len(),
            max: MAX_KEY_LEN,
        }
        .into());
    }

    let well_formed = match key.split_once('/') {
        Some((collection, rkey)) => {
            !collection.is_empty()
                && !rkey.is_empty()
                && collection.chars().all(valid_key_char)
                && rkey.chars().all(valid_key_char)
        }
        None => false,
    };
    if !well_formed {
        return Err(MstError::InvalidKeyChars {
            key: key.to_string(),
        }
        .into());
    }

    Ok(())
}
