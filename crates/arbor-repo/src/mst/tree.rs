//! Merkle Search Tree over an arena of nodes
//!
//! Nodes live in a `Vec` and refer to their children by [`NodeId`]; CIDs are
//! only computed when the tree is hashed. Every mutation clears the cached
//! CID of each node on the path it touched, and [`Mst::recompute`] re-hashes
//! those nodes bottom-up so stored child links always match current children.
//!
//! The shape is a pure function of the key set: a key lives in the node whose
//! layer equals [`layer_for_key`], children of a layer `L` node are layer
//! `L - 1` nodes, and a range holding only lower-layer keys is bridged by a
//! node with no entries and a left link.

use std::collections::HashSet;
use std::fmt;

use arbor_common::Cid;
use bytes::Bytes;
use smol_str::SmolStr;

use super::node::NodeData;
use super::util::layer_for_key;
use crate::error::{MstError, Result};
use crate::storage::BlockStore;

/// Index of a node in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
struct Entry {
    key: SmolStr,
    value: Cid,
    tree: Option<NodeId>,
}

#[derive(Debug, Clone, Default)]
struct Node {
    layer: usize,
    left: Option<NodeId>,
    entries: Vec<Entry>,
    /// CID and bytes as of the last hash; `None` once dirty
    cached: Option<(Cid, Bytes)>,
}

impl Node {
    fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.left.is_none()
    }

    /// Child link between `entries[i - 1]` and `entries[i]`
    fn slot(&self, i: usize) -> Option<NodeId> {
        if i == 0 {
            self.left
        } else {
            self.entries[i - 1].tree
        }
    }

    fn set_slot(&mut self, i: usize, child: Option<NodeId>) {
        if i == 0 {
            self.left = child;
        } else {
            self.entries[i - 1].tree = child;
        }
    }

    fn search(&self, key: &str) -> std::result::Result<usize, usize> {
        self.entries
            .binary_search_by(|e| e.key.as_bytes().cmp(key.as_bytes()))
    }
}

/// One node on the path from the root towards a key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathStep {
    /// Layer of the node
    pub layer: usize,
    /// Number of entries in the node
    pub entries: usize,
    /// Node CID, or `None` if the node changed since the last hash
    pub cid: Option<Cid>,
}

/// Result of [`Mst::lookup`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup {
    /// Value stored under the key
    pub value: Option<Cid>,
    /// Nodes visited from the root down, ending at the node that holds or
    /// would hold the key
    pub path: Vec<PathStep>,
}

/// Merkle Search Tree
///
/// Cloning is cheap enough to use as a transaction: mutate a clone, swap it in
/// on success.
#[derive(Debug, Clone)]
pub struct Mst {
    nodes: Vec<Node>,
    free: Vec<NodeId>,
    root: NodeId,
    len: usize,
}

impl Default for Mst {
    fn default() -> Self {
        Self::new()
    }
}

impl Mst {
    /// Create an empty tree
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::default()],
            free: Vec::new(),
            root: NodeId(0),
            len: 0,
        }
    }

    /// Build a tree from key/value pairs in one pass
    ///
    /// The root layer is the highest key layer, fixed before any insertion,
    /// so the root never has to grow. Later pairs win on duplicate keys.
    pub fn from_entries<K: AsRef<str>>(items: impl IntoIterator<Item = (K, Cid)>) -> Self {
        let items: Vec<(K, Cid)> = items.into_iter().collect();
        let mut mst = Self::new();
        let root_layer = items
            .iter()
            .map(|(k, _)| layer_for_key(k.as_ref()))
            .max()
            .unwrap_or(0);
        mst.nodes[mst.root.0].layer = root_layer;
        for (key, value) in &items {
            mst.insert(key.as_ref(), *value);
        }
        mst
    }

    fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        match self.free.pop() {
            Some(id) => {
                self.nodes[id.0] = node;
                id
            }
            None => {
                self.nodes.push(node);
                NodeId(self.nodes.len() - 1)
            }
        }
    }

    fn release(&mut self, id: NodeId) {
        self.nodes[id.0] = Node::default();
        self.free.push(id);
    }

    fn dirty(&mut self, id: NodeId) {
        self.node_mut(id).cached = None;
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the tree holds no records
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Layer of the root node
    pub fn layer(&self) -> usize {
        self.node(self.root).layer
    }

    /// Number of nodes reachable from the root, including an empty root
    pub fn node_count(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            count += 1;
            let node = self.node(id);
            stack.extend(node.left);
            stack.extend(node.entries.iter().filter_map(|e| e.tree));
        }
        count
    }

    /// Value stored under `key`
    pub fn get(&self, key: &str) -> Option<Cid> {
        self.lookup(key).value
    }

    /// Find `key`, returning its value and the chain of nodes traversed
    pub fn lookup(&self, key: &str) -> Lookup {
        let layer = layer_for_key(key);
        let mut path = Vec::new();
        let mut current = Some(self.root);
        while let Some(id) = current {
            let node = self.node(id);
            path.push(PathStep {
                layer: node.layer,
                entries: node.entries.len(),
                cid: node.cached.as_ref().map(|(cid, _)| *cid),
            });
            if node.layer < layer {
                break;
            }
            match node.search(key) {
                Ok(i) if node.layer == layer => {
                    return Lookup {
                        value: Some(node.entries[i].value),
                        path,
                    };
                }
                Ok(_) => break,
                Err(i) if node.layer > layer => current = node.slot(i),
                Err(_) => break,
            }
        }
        Lookup { value: None, path }
    }

    /// All records in ascending key order
    pub fn entries(&self) -> Vec<(SmolStr, Cid)> {
        let mut out = Vec::with_capacity(self.len);
        self.collect(Some(self.root), &mut out);
        out
    }

    fn collect(&self, id: Option<NodeId>, out: &mut Vec<(SmolStr, Cid)>) {
        let Some(id) = id else { return };
        let node = self.node(id);
        self.collect(node.left, out);
        for entry in &node.entries {
            out.push((entry.key.clone(), entry.value));
            self.collect(entry.tree, out);
        }
    }

    /// All keys in ascending order
    pub fn keys(&self) -> Vec<SmolStr> {
        self.entries().into_iter().map(|(k, _)| k).collect()
    }

    /// Insert or replace a record, returning the value it replaced
    pub fn insert(&mut self, key: &str, value: Cid) -> Option<Cid> {
        let layer = layer_for_key(key);
        let root = self.root;
        if self.is_empty() && self.node(root).is_empty() {
            let grown = self.node(root).layer.max(layer);
            self.node_mut(root).layer = grown;
        }
        // Root growth: push the whole tree down until the root sits at the
        // key's layer. The insertion below then splits it around the key.
        while self.layer() < layer {
            let old_root = self.root;
            let old_layer = self.layer();
            self.root = self.alloc(Node {
                layer: old_layer + 1,
                left: Some(old_root),
                entries: Vec::new(),
                cached: None,
            });
        }
        let previous = self.insert_at(self.root, key, value, layer);
        if previous.is_none() {
            self.len += 1;
        }
        previous
    }

    fn insert_at(&mut self, id: NodeId, key: &str, value: Cid, layer: usize) -> Option<Cid> {
        self.dirty(id);
        let node_layer = self.node(id).layer;
        match self.node(id).search(key) {
            Ok(i) => {
                let entry = &mut self.node_mut(id).entries[i];
                Some(std::mem::replace(&mut entry.value, value))
            }
            Err(i) if node_layer == layer => {
                let slot = self.node(id).slot(i);
                let (lo, hi) = self.split(slot, key);
                let node = self.node_mut(id);
                node.set_slot(i, lo);
                node.entries.insert(
                    i,
                    Entry {
                        key: SmolStr::new(key),
                        value,
                        tree: hi,
                    },
                );
                None
            }
            Err(i) => {
                let child = match self.node(id).slot(i) {
                    Some(child) => child,
                    None => {
                        let child = self.alloc(Node {
                            layer: node_layer - 1,
                            ..Node::default()
                        });
                        self.node_mut(id).set_slot(i, Some(child));
                        child
                    }
                };
                self.insert_at(child, key, value, layer)
            }
        }
    }

    /// Split a subtree into the parts below and above `key`
    ///
    /// Both halves keep the subtree's layer; halves left with nothing at all
    /// are dropped.
    fn split(&mut self, id: Option<NodeId>, key: &str) -> (Option<NodeId>, Option<NodeId>) {
        let Some(id) = id else {
            return (None, None);
        };
        let idx = match self.node(id).search(key) {
            Ok(i) | Err(i) => i,
        };
        let middle = self.node(id).slot(idx);
        let (mid_lo, mid_hi) = self.split(middle, key);

        let node = self.node_mut(id);
        let upper = node.entries.split_off(idx);
        node.set_slot(idx, mid_lo);
        node.cached = None;
        let layer = node.layer;
        let lower_empty = node.is_empty();

        let right = Node {
            layer,
            left: mid_hi,
            entries: upper,
            cached: None,
        };
        let hi = if right.is_empty() {
            None
        } else {
            Some(self.alloc(right))
        };
        let lo = if lower_empty {
            self.release(id);
            None
        } else {
            Some(id)
        };
        (lo, hi)
    }

    /// Remove a record, returning its value
    pub fn remove(&mut self, key: &str) -> Option<Cid> {
        let layer = layer_for_key(key);
        let removed = self.remove_at(self.root, key, layer)?;
        self.len -= 1;
        // Trim: a root that is only a link to a lower layer is replaced by it
        loop {
            let root = self.node(self.root);
            match (root.entries.is_empty(), root.left) {
                (true, Some(child)) => {
                    let old = self.root;
                    self.root = child;
                    self.release(old);
                }
                _ => break,
            }
        }
        if self.is_empty() {
            self.node_mut(self.root).layer = 0;
        }
        Some(removed)
    }

    fn remove_at(&mut self, id: NodeId, key: &str, layer: usize) -> Option<Cid> {
        let node = self.node(id);
        if node.layer < layer {
            return None;
        }
        let found = node.search(key);
        let node_layer = node.layer;
        match found {
            Ok(i) if node_layer == layer => {
                self.dirty(id);
                let entry = self.node_mut(id).entries.remove(i);
                let before = self.node(id).slot(i);
                let merged = self.merge(before, entry.tree);
                self.node_mut(id).set_slot(i, merged);
                Some(entry.value)
            }
            Ok(_) => None,
            Err(i) => {
                let child = self.node(id).slot(i)?;
                let removed = self.remove_at(child, key, layer)?;
                self.dirty(id);
                if self.node(child).is_empty() {
                    self.release(child);
                    self.node_mut(id).set_slot(i, None);
                }
                Some(removed)
            }
        }
    }

    /// Join two adjacent sibling subtrees, every key in `a` below every key in `b`
    fn merge(&mut self, a: Option<NodeId>, b: Option<NodeId>) -> Option<NodeId> {
        let (a, b) = match (a, b) {
            (None, x) | (x, None) => return x,
            (Some(a), Some(b)) => (a, b),
        };
        let a_last = self.node(a).slot(self.node(a).entries.len());
        let b_left = self.node(b).left;
        let joined = self.merge(a_last, b_left);

        let b_node = std::mem::take(self.node_mut(b));
        self.release(b);
        let a_node = self.node_mut(a);
        let last = a_node.entries.len();
        a_node.set_slot(last, joined);
        a_node.entries.extend(b_node.entries);
        a_node.cached = None;
        Some(a)
    }

    /// Re-hash every dirty node, returning the blocks that were produced
    pub fn recompute(&mut self) -> Vec<(Cid, Bytes)> {
        let mut fresh = Vec::new();
        self.hash_node(self.root, &mut fresh);
        fresh
    }

    fn hash_node(&mut self, id: NodeId, fresh: &mut Vec<(Cid, Bytes)>) -> Cid {
        if let Some((cid, _)) = &self.node(id).cached {
            return *cid;
        }
        let left = self.node(id).left;
        let left = left.map(|child| self.hash_node(child, fresh));
        let trees: Vec<Option<NodeId>> = self.node(id).entries.iter().map(|e| e.tree).collect();
        let tree_cids: Vec<Option<Cid>> = trees
            .into_iter()
            .map(|t| t.map(|child| self.hash_node(child, fresh)))
            .collect();

        let node = self.node(id);
        let data = NodeData::from_entries(
            left,
            node.entries
                .iter()
                .zip(tree_cids)
                .map(|(e, tree)| (e.key.as_str(), e.value, tree)),
        );
        let bytes = Bytes::from(data.encode());
        let cid = Cid::compute(&bytes);
        fresh.push((cid, bytes.clone()));
        self.node_mut(id).cached = Some((cid, bytes));
        cid
    }

    /// Root CID, hashing any dirty nodes first
    pub fn root_cid(&mut self) -> Cid {
        self.hash_node(self.root, &mut Vec::new())
    }

    /// Root CID if the tree has no unhashed changes
    pub fn cached_root(&self) -> Option<Cid> {
        self.node(self.root).cached.as_ref().map(|(cid, _)| *cid)
    }

    /// Every node block, root first
    pub fn blocks(&mut self) -> Vec<(Cid, Bytes)> {
        self.recompute();
        let mut out = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            let node = self.node(id);
            if let Some(block) = &node.cached {
                out.push(block.clone());
            }
            for entry in node.entries.iter().rev() {
                stack.extend(entry.tree);
            }
            stack.extend(node.left);
        }
        out
    }

    /// CIDs of every node
    pub fn node_cids(&mut self) -> HashSet<Cid> {
        self.blocks().into_iter().map(|(cid, _)| cid).collect()
    }

    /// Node blocks on the path from the root to where `key` lives or would live
    ///
    /// Together with the commit these prove inclusion or absence of the key.
    pub fn proof_blocks(&mut self, key: &str) -> Vec<(Cid, Bytes)> {
        self.recompute();
        let layer = layer_for_key(key);
        let mut out = Vec::new();
        let mut current = Some(self.root);
        while let Some(id) = current {
            let node = self.node(id);
            if let Some(block) = &node.cached {
                out.push(block.clone());
            }
            current = match node.search(key) {
                Err(i) if node.layer > layer => node.slot(i),
                _ => None,
            };
        }
        out
    }

    /// Wire form of the node with the given CID
    pub fn node_by_cid(&mut self, cid: &Cid) -> Option<NodeData> {
        self.blocks()
            .into_iter()
            .find(|(c, _)| c == cid)
            .and_then(|(_, bytes)| NodeData::decode(&bytes).ok())
    }

    /// Rebuild a tree from node blocks
    ///
    /// Every node reachable from `root` must be present. Structure is checked
    /// as nodes are loaded: keys strictly ascending across the whole tree,
    /// each key in a node of its own layer, children exactly one layer down,
    /// and no empty nodes below the root.
    pub fn load<S: BlockStore>(root: &Cid, store: &S) -> Result<Self> {
        let mut mst = Self {
            nodes: Vec::new(),
            free: Vec::new(),
            root: NodeId(0),
            len: 0,
        };
        let mut last_key: Option<SmolStr> = None;
        mst.root = mst.load_node(root, None, store, &mut last_key)?;
        Ok(mst)
    }

    fn load_node<S: BlockStore>(
        &mut self,
        cid: &Cid,
        expected_layer: Option<usize>,
        store: &S,
        last_key: &mut Option<SmolStr>,
    ) -> Result<NodeId> {
        let bytes = store
            .get(cid)?
            .ok_or_else(|| MstError::MissingNode(cid.to_string()))?;
        let data = NodeData::decode(&bytes)?;
        let keys = data.keys()?;

        let layer = match (keys.first(), expected_layer) {
            (Some(first), _) => layer_for_key(first),
            (None, Some(layer)) => layer,
            (None, None) => match &data.left {
                Some(left) => probe_layer(left, store)? + 1,
                None => 0,
            },
        };
        if let Some(expected) = expected_layer {
            if expected != layer {
                return Err(MstError::InvalidNode(format!(
                    "node {} at layer {} where layer {} was expected",
                    cid, layer, expected
                ))
                .into());
            }
            if data.left.is_none() && data.entries.is_empty() {
                return Err(MstError::InvalidNode(format!("empty child node {}", cid)).into());
            }
        }
        if let Some(key) = keys.iter().find(|k| layer_for_key(k) != layer) {
            return Err(MstError::InvalidNode(format!(
                "key {} does not belong on layer {}",
                key, layer
            ))
            .into());
        }
        let child_layer = |what: &Cid| {
            layer.checked_sub(1).ok_or_else(|| {
                MstError::InvalidNode(format!("layer 0 node links to child {}", what))
            })
        };

        let left = match &data.left {
            Some(left) => Some(self.load_node(left, Some(child_layer(left)?), store, last_key)?),
            None => None,
        };
        let mut entries = Vec::with_capacity(keys.len());
        for (key, wire) in keys.into_iter().zip(&data.entries) {
            if last_key.as_ref().is_some_and(|last| last.as_bytes() >= key.as_bytes()) {
                return Err(MstError::InvalidNode(format!("key {} out of order", key)).into());
            }
            *last_key = Some(key.clone());
            self.len += 1;
            let tree = match &wire.tree {
                Some(t) => Some(self.load_node(t, Some(child_layer(t)?), store, last_key)?),
                None => None,
            };
            entries.push(Entry {
                key,
                value: wire.value,
                tree,
            });
        }
        Ok(self.alloc(Node {
            layer,
            left,
            entries,
            cached: Some((*cid, bytes)),
        }))
    }

    fn fmt_node(&self, f: &mut fmt::Formatter<'_>, id: NodeId, depth: usize) -> fmt::Result {
        let node = self.node(id);
        let indent = "  ".repeat(depth);
        match &node.cached {
            Some((cid, _)) => writeln!(f, "{}node L{} {}", indent, node.layer, cid)?,
            None => writeln!(f, "{}node L{} (dirty)", indent, node.layer)?,
        }
        if let Some(left) = node.left {
            self.fmt_node(f, left, depth + 1)?;
        }
        for entry in &node.entries {
            writeln!(f, "{}- {} -> {}", indent, entry.key, entry.value)?;
            if let Some(tree) = entry.tree {
                self.fmt_node(f, tree, depth + 1)?;
            }
        }
        Ok(())
    }
}

/// Layer of a node found by following left links down to the first key
///
/// Only needed for a root with no entries, whose layer the wire form does not
/// record.
fn probe_layer<S: BlockStore>(cid: &Cid, store: &S) -> Result<usize> {
    let mut above = 0;
    let mut current = *cid;
    loop {
        let bytes = store
            .get(&current)?
            .ok_or_else(|| MstError::MissingNode(current.to_string()))?;
        let data = NodeData::decode(&bytes)?;
        if let Some(first) = data.keys()?.first() {
            return Ok(layer_for_key(first) + above);
        }
        match data.left {
            Some(left) => {
                current = left;
                above += 1;
            }
            None => return Ok(above),
        }
    }
}

impl fmt::Display for Mst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_node(f, self.root, 0)
    }
}
