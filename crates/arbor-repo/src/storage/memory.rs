//! In-memory block storage implementation

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use arbor_common::Cid;
use bytes::Bytes;

use crate::error::Result;
use crate::storage::BlockStore;

/// In-memory block storage using BTreeMap
///
/// Clones share the same underlying map. Blocks are `Bytes`, so handing them
/// out is a reference-count bump rather than a copy.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlockStore {
    blocks: Arc<RwLock<BTreeMap<Cid, Bytes>>>,
}

impl MemoryBlockStore {
    /// Create new empty memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create new memory store from a map of blocks
    pub fn new_from_blocks(blocks: BTreeMap<Cid, Bytes>) -> Self {
        Self {
            blocks: Arc::new(RwLock::new(blocks)),
        }
    }

    // A panic while holding the lock cannot leave the map half-written:
    // every mutation is a single insert or remove.
    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<Cid, Bytes>> {
        self.blocks.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<Cid, Bytes>> {
        self.blocks.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get number of blocks stored
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Check if store is empty
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Clear all blocks
    pub fn clear(&self) {
        self.write().clear();
    }

    /// Every CID in the store, in CID byte order
    pub fn cids(&self) -> Vec<Cid> {
        self.read().keys().copied().collect()
    }
}

impl BlockStore for MemoryBlockStore {
    fn get(&self, cid: &Cid) -> Result<Option<Bytes>> {
        Ok(self.read().get(cid).cloned())
    }

    fn put(&self, data: &[u8]) -> Result<Cid> {
        let cid = Cid::compute(data);
        self.write().insert(cid, Bytes::copy_from_slice(data));
        Ok(cid)
    }

    fn put_with_cid(&self, cid: Cid, data: Bytes) -> Result<()> {
        self.write().insert(cid, data);
        Ok(())
    }

    fn has(&self, cid: &Cid) -> Result<bool> {
        Ok(self.read().contains_key(cid))
    }

    fn get_many(&self, cids: &[Cid]) -> Result<Vec<Option<Bytes>>> {
        let blocks = self.read();
        Ok(cids.iter().map(|cid| blocks.get(cid).cloned()).collect())
    }

    fn put_many(&self, blocks: impl IntoIterator<Item = (Cid, Bytes)>) -> Result<()> {
        let mut store = self.write();
        store.extend(blocks);
        Ok(())
    }

    fn remove(&self, cid: &Cid) -> Result<bool> {
        Ok(self.write().remove(cid).is_some())
    }
}
