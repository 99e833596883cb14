//! Content identifiers
//!
//! A [`Cid`] is `version ‖ codec ‖ hash function ‖ digest size ‖ digest`, each
//! header field a VarInt. Only CIDv1 is supported. The text form is the
//! multibase `b` prefix followed by lowercase base32 of the binary form.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error as _};
use sha2::{Digest, Sha256};

use crate::error::FormatError;
use crate::{base32, varint};

/// DAG-CBOR multicodec
pub const DAG_CBOR: u64 = 0x71;

/// Raw bytes multicodec
pub const RAW: u64 = 0x55;

/// SHA2-256 multihash code
pub const SHA2_256: u64 = 0x12;

/// Largest digest a [`Cid`] can hold
pub const MAX_DIGEST_LEN: usize = 64;

/// Self-describing content identifier (CIDv1)
///
/// Immutable once computed. Equality, ordering and hashing all follow the
/// binary form, so two CIDs are equal exactly when their bytes are.
#[derive(Clone, Copy)]
pub struct Cid {
    codec: u64,
    hash: u64,
    size: u8,
    digest: [u8; MAX_DIGEST_LEN],
}

impl Cid {
    /// CIDv1 of a DAG-CBOR block hashed with SHA2-256
    pub fn compute(data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        Self::from_parts(DAG_CBOR, SHA2_256, &digest)
    }

    /// Build a CIDv1 from its parts
    pub fn new_v1(codec: u64, hash: u64, digest: &[u8]) -> Result<Self, FormatError> {
        if digest.len() > MAX_DIGEST_LEN {
            return Err(FormatError::DigestSize(digest.len() as u64));
        }
        Ok(Self::from_parts(codec, hash, digest))
    }

    fn from_parts(codec: u64, hash: u64, digest: &[u8]) -> Self {
        let mut buf = [0u8; MAX_DIGEST_LEN];
        buf[..digest.len()].copy_from_slice(digest);
        Self {
            codec,
            hash,
            size: digest.len() as u8,
            digest: buf,
        }
    }

    /// CID version (always 1)
    pub fn version(&self) -> u64 {
        1
    }

    /// Multicodec of the addressed content
    pub fn codec(&self) -> u64 {
        self.codec
    }

    /// Multihash function code
    pub fn hash_code(&self) -> u64 {
        self.hash
    }

    /// Raw digest bytes
    pub fn digest(&self) -> &[u8] {
        &self.digest[..self.size as usize]
    }

    /// Check that `data` hashes to this CID
    ///
    /// Only SHA2-256 digests can be checked; other hash functions return `false`.
    pub fn verify(&self, data: &[u8]) -> bool {
        self.hash == SHA2_256 && Sha256::digest(data).as_slice() == self.digest()
    }

    /// Append the binary form to `out`
    pub fn write_bytes(&self, out: &mut Vec<u8>) {
        varint::encode(self.version(), out);
        varint::encode(self.codec, out);
        varint::encode(self.hash, out);
        varint::encode(u64::from(self.size), out);
        out.extend_from_slice(self.digest());
    }

    /// Binary form
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.size as usize);
        self.write_bytes(&mut out);
        out
    }

    /// Parse a CID from the front of `input`, returning it and the bytes consumed
    ///
    /// CAR blocks store the CID immediately followed by the payload, so
    /// trailing bytes are expected here.
    pub fn read_bytes(input: &[u8]) -> Result<(Self, usize), FormatError> {
        let mut pos = 0;
        let mut next = |input: &[u8]| -> Result<u64, FormatError> {
            let (value, used) = varint::decode(&input[pos..])?;
            pos += used;
            Ok(value)
        };
        let version = next(input)?;
        if version != 1 {
            return Err(FormatError::CidVersion(version));
        }
        let codec = next(input)?;
        let hash = next(input)?;
        let size = next(input)?;
        if size > MAX_DIGEST_LEN as u64 {
            return Err(FormatError::DigestSize(size));
        }
        let size = size as usize;
        let available = input.len() - pos;
        if available < size {
            return Err(FormatError::CidTruncated {
                expected: size,
                found: available,
            });
        }
        let cid = Self::from_parts(codec, hash, &input[pos..pos + size]);
        Ok((cid, pos + size))
    }

    /// Parse a CID that occupies all of `input`
    pub fn from_bytes(input: &[u8]) -> Result<Self, FormatError> {
        let (cid, used) = Self::read_bytes(input)?;
        if used != input.len() {
            return Err(FormatError::CidTrailing(input.len() - used));
        }
        Ok(cid)
    }

    /// Multibase base32 text form
    pub fn to_base32(&self) -> String {
        let mut s = String::from("b");
        s.push_str(&base32::encode(&self.to_bytes()));
        s
    }

    /// Parse the multibase base32 text form
    pub fn from_base32(text: &str) -> Result<Self, FormatError> {
        match text.chars().next() {
            Some('b') => Self::from_bytes(&base32::decode(&text[1..])?),
            other => Err(FormatError::Multibase(other)),
        }
    }

    /// Convert into the `cid` crate's representation
    pub fn to_ipld(&self) -> Result<cid::Cid, cid::Error> {
        cid::Cid::try_from(self.to_bytes().as_slice())
    }

    /// Convert from the `cid` crate's representation
    pub fn from_ipld(cid: &cid::Cid) -> Result<Self, FormatError> {
        Self::from_bytes(&cid.to_bytes())
    }
}

impl PartialEq for Cid {
    fn eq(&self, other: &Self) -> bool {
        self.codec == other.codec && self.hash == other.hash && self.digest() == other.digest()
    }
}

impl Eq for Cid {}

impl Hash for Cid {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.codec.hash(state);
        self.hash.hash(state);
        self.digest().hash(state);
    }
}

impl Ord for Cid {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_bytes().cmp(&other.to_bytes())
    }
}

impl PartialOrd for Cid {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base32())
    }
}

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cid({})", self.to_base32())
    }
}

impl FromStr for Cid {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_base32(s)
    }
}

impl Serialize for Cid {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_base32())
    }
}

impl<'de> Deserialize<'de> for Cid {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Self::from_base32(&value).map_err(D::Error::custom)
    }
}
