//! MST node wire format
//!
//! In memory the tree keeps full keys (see [`super::tree`]); on the wire each
//! node is a DAG-CBOR map with prefix-compressed entries:
//!
//! ```text
//! { "l": CID | null, "e": [ { "p": int, "k": bytes, "v": CID, "t": CID | null }, ... ] }
//! ```
//!
//! Absent subtree links are written as explicit `null`, never omitted;
//! omitting them would change the bytes and so the CID.

use arbor_common::{Cid, DagCbor};
use bytes::Bytes;
use smol_str::SmolStr;

use super::util::common_prefix_len;
use crate::error::{MstError, Result};

/// Wire format entry (prefix-compressed leaf with optional subtree pointer)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    /// Bytes shared with the previous key in the node
    pub prefix_len: usize,
    /// Key bytes after the shared prefix
    pub key_suffix: Bytes,
    /// CID of the record value
    pub value: Cid,
    /// Subtree holding keys between this entry and the next
    pub tree: Option<Cid>,
}

/// Wire format node data
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NodeData {
    /// Left-most subtree pointer
    pub left: Option<Cid>,
    /// Entries in this node (sorted by full key, prefix-compressed)
    pub entries: Vec<TreeEntry>,
}

impl NodeData {
    /// Build wire data from full keys, applying prefix compression
    pub fn from_entries<'a>(
        left: Option<Cid>,
        entries: impl IntoIterator<Item = (&'a str, Cid, Option<Cid>)>,
    ) -> Self {
        let mut last_key = "";
        let entries = entries
            .into_iter()
            .map(|(key, value, tree)| {
                let prefix_len = common_prefix_len(last_key, key);
                last_key = key;
                TreeEntry {
                    prefix_len,
                    key_suffix: Bytes::copy_from_slice(&key.as_bytes()[prefix_len..]),
                    value,
                    tree,
                }
            })
            .collect();
        Self { left, entries }
    }

    /// Expand prefix compression into full keys
    ///
    /// Fails when a prefix reaches past the previous key, the first entry has
    /// a non-zero prefix, or a key is not UTF-8.
    pub fn keys(&self) -> std::result::Result<Vec<SmolStr>, MstError> {
        let mut keys = Vec::with_capacity(self.entries.len());
        let mut last: Vec<u8> = Vec::new();
        for (i, entry) in self.entries.iter().enumerate() {
            if i == 0 && entry.prefix_len != 0 {
                return Err(MstError::InvalidNode(
                    "first entry must have prefix length 0".into(),
                ));
            }
            if entry.prefix_len > last.len() {
                return Err(MstError::InvalidNode(format!(
                    "prefix length {} exceeds previous key length {}",
                    entry.prefix_len,
                    last.len()
                )));
            }
            last.truncate(entry.prefix_len);
            last.extend_from_slice(&entry.key_suffix);
            let key = std::str::from_utf8(&last)
                .map_err(|_| MstError::InvalidNode("key is not UTF-8".into()))?;
            keys.push(SmolStr::new(key));
        }
        Ok(keys)
    }

    /// DAG-CBOR value of this node
    pub fn to_dag_cbor(&self) -> DagCbor {
        let entries = self
            .entries
            .iter()
            .map(|e| {
                DagCbor::map([
                    ("p", DagCbor::Integer(e.prefix_len as i64)),
                    ("k", DagCbor::Bytes(e.key_suffix.clone())),
                    ("v", DagCbor::Link(e.value)),
                    ("t", DagCbor::from(e.tree)),
                ])
            })
            .collect();
        DagCbor::map([
            ("l", DagCbor::from(self.left)),
            ("e", DagCbor::Array(entries)),
        ])
    }

    /// Canonical bytes of this node
    pub fn encode(&self) -> Vec<u8> {
        self.to_dag_cbor().to_vec()
    }

    /// Read a node out of a decoded DAG-CBOR value
    pub fn from_dag_cbor(value: &DagCbor) -> std::result::Result<Self, MstError> {
        let map = value
            .as_map()
            .ok_or_else(|| MstError::NotANode("not a map".into()))?;
        let entries = map
            .get("e")
            .ok_or_else(|| MstError::NotANode("missing \"e\"".into()))?
            .as_array()
            .ok_or_else(|| MstError::NotANode("\"e\" is not an array".into()))?;
        let left = match map.get("l") {
            None | Some(DagCbor::Null) => None,
            Some(DagCbor::Link(cid)) => Some(*cid),
            Some(_) => return Err(MstError::NotANode("\"l\" is not a link".into())),
        };
        if map.len() != if map.contains_key("l") { 2 } else { 1 } {
            return Err(MstError::NotANode("unexpected fields".into()));
        }

        let entries = entries
            .iter()
            .map(parse_entry)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self { left, entries })
    }

    /// Decode node bytes
    ///
    /// Malformed CBOR is a `Format` error; well-formed CBOR that is not a
    /// node is an `Integrity` error.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let value = DagCbor::from_slice(bytes)?;
        Ok(Self::from_dag_cbor(&value)?)
    }

    /// Whether `bytes` decode to something shaped like an MST node
    pub fn is_node(bytes: &[u8]) -> bool {
        DagCbor::from_slice(bytes)
            .ok()
            .is_some_and(|v| Self::from_dag_cbor(&v).is_ok())
    }
}

fn parse_entry(value: &DagCbor) -> std::result::Result<TreeEntry, MstError> {
    let field = |name: &str| {
        value
            .get(name)
            .ok_or_else(|| MstError::InvalidNode(format!("entry missing \"{}\"", name)))
    };
    let prefix_len = field("p")?
        .as_integer()
        .and_then(|p| usize::try_from(p).ok())
        .ok_or_else(|| MstError::InvalidNode("\"p\" is not a non-negative integer".into()))?;
    let key_suffix = field("k")?
        .as_bytes()
        .cloned()
        .ok_or_else(|| MstError::InvalidNode("\"k\" is not bytes".into()))?;
    let value_cid = *field("v")?
        .as_link()
        .ok_or_else(|| MstError::InvalidNode("\"v\" is not a link".into()))?;
    let tree = match field("t")? {
        DagCbor::Null => None,
        DagCbor::Link(cid) => Some(*cid),
        _ => return Err(MstError::InvalidNode("\"t\" is not a link".into())),
    };
    if value.as_map().map_or(0, |m| m.len()) != 4 {
        return Err(MstError::InvalidNode("unexpected entry fields".into()));
    }
    Ok(TreeEntry {
        prefix_len,
        key_suffix,
        value: value_cid,
        tree,
    })
}
