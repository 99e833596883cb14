//! Canonical DAG-CBOR
//!
//! [`DagCbor`] is the data model: one variant per kind of value atproto
//! allows. [`encode`] always produces the canonical form (minimal-width
//! arguments, map keys sorted length-first), and [`decode`] accepts only that
//! form, so any bytes that decode successfully re-encode to themselves and
//! hash to the same [`Cid`].

use std::cmp::Ordering;
use std::collections::BTreeMap;

use bytes::Bytes;
use smol_str::SmolStr;

use crate::cid::Cid;
use crate::error::DecodeError;

mod decode;
mod encode;

pub use decode::{MAX_DEPTH, decode};
pub use encode::{encode, encode_into};

/// CBOR tag marking a CID link
pub const CID_TAG: u64 = 42;

/// A DAG-CBOR value
///
/// Maps are keyed by text and held in a `BTreeMap` for cheap lookup; the
/// encoder applies canonical key order itself, so map construction order never
/// affects the bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DagCbor {
    /// `null`
    Null,
    /// `true` / `false`
    Bool(bool),
    /// Signed 64-bit integer (major types 0 and 1)
    Integer(i64),
    /// UTF-8 text string
    Text(SmolStr),
    /// Byte string
    Bytes(Bytes),
    /// Array of values
    Array(Vec<DagCbor>),
    /// Map with text keys
    Map(BTreeMap<SmolStr, DagCbor>),
    /// CID link (tag 42)
    Link(Cid),
}

/// Canonical DAG-CBOR map key order: shorter keys first, then bytewise
pub fn key_order(a: &str, b: &str) -> Ordering {
    a.len()
        .cmp(&b.len())
        .then_with(|| a.as_bytes().cmp(b.as_bytes()))
}

impl DagCbor {
    /// Build a map from key/value pairs
    pub fn map<K, I>(entries: I) -> Self
    where
        K: Into<SmolStr>,
        I: IntoIterator<Item = (K, DagCbor)>,
    {
        DagCbor::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Canonical encoding
    pub fn to_vec(&self) -> Vec<u8> {
        encode(self)
    }

    /// Decode a single canonical value occupying all of `data`
    pub fn from_slice(data: &[u8]) -> Result<Self, DecodeError> {
        decode(data)
    }

    /// CID of the canonical encoding
    pub fn cid(&self) -> Cid {
        Cid::compute(&self.to_vec())
    }

    /// Map contents, if this is a map
    pub fn as_map(&self) -> Option<&BTreeMap<SmolStr, DagCbor>> {
        match self {
            DagCbor::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Look up a key, if this is a map
    pub fn get(&self, key: &str) -> Option<&DagCbor> {
        self.as_map().and_then(|m| m.get(key))
    }

    /// Array contents, if this is an array
    pub fn as_array(&self) -> Option<&[DagCbor]> {
        match self {
            DagCbor::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Linked CID, if this is a link
    pub fn as_link(&self) -> Option<&Cid> {
        match self {
            DagCbor::Link(c) => Some(c),
            _ => None,
        }
    }

    /// Byte string contents
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            DagCbor::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Text contents
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DagCbor::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Integer value
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            DagCbor::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Boolean value
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DagCbor::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Whether this is `null`
    pub fn is_null(&self) -> bool {
        matches!(self, DagCbor::Null)
    }
}

impl From<bool> for DagCbor {
    fn from(b: bool) -> Self {
        DagCbor::Bool(b)
    }
}

impl From<i64> for DagCbor {
    fn from(i: i64) -> Self {
        DagCbor::Integer(i)
    }
}

impl From<&str> for DagCbor {
    fn from(s: &str) -> Self {
        DagCbor::Text(SmolStr::new(s))
    }
}

impl From<SmolStr> for DagCbor {
    fn from(s: SmolStr) -> Self {
        DagCbor::Text(s)
    }
}

impl From<String> for DagCbor {
    fn from(s: String) -> Self {
        DagCbor::Text(SmolStr::from(s))
    }
}

impl From<Bytes> for DagCbor {
    fn from(b: Bytes) -> Self {
        DagCbor::Bytes(b)
    }
}

impl From<Cid> for DagCbor {
    fn from(c: Cid) -> Self {
        DagCbor::Link(c)
    }
}

impl From<Option<Cid>> for DagCbor {
    fn from(c: Option<Cid>) -> Self {
        c.map_or(DagCbor::Null, DagCbor::Link)
    }
}

impl From<Vec<DagCbor>> for DagCbor {
    fn from(a: Vec<DagCbor>) -> Self {
        DagCbor::Array(a)
    }
}
