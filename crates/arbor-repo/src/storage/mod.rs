//! Block storage abstraction for MST nodes and records

use arbor_common::Cid;
use bytes::Bytes;

use crate::error::Result;

/// CID-keyed block storage
///
/// Holds MST nodes, commits and record data. The in-memory
/// [`MemoryBlockStore`] is what CAR import/export and [`crate::Repository`]
/// use by default; other backends (a key-value database, a SQL table of
/// blocks) plug in behind the same calls.
///
/// Clone is required so a repository and the trees loaded from it can share
/// one store.
///
/// # Example
///
/// ```rust
/// use arbor_repo::storage::{BlockStore, MemoryBlockStore};
///
/// # fn example() -> arbor_repo::Result<()> {
/// let storage = MemoryBlockStore::new();
///
/// let cid = storage.put(b"\xa1\x61a\x01")?;
/// assert_eq!(storage.get(&cid)?.as_deref(), Some(&b"\xa1\x61a\x01"[..]));
/// # Ok(())
/// # }
/// ```
pub trait BlockStore: Clone {
    /// Get a block by CID
    ///
    /// Returns `None` if the block is not found.
    fn get(&self, cid: &Cid) -> Result<Option<Bytes>>;

    /// Put a block, returning its DAG-CBOR/SHA-256 CID
    fn put(&self, data: &[u8]) -> Result<Cid>;

    /// Put a block under a CID the caller already computed
    ///
    /// The CID is trusted; use [`Cid::verify`] first for untrusted input.
    fn put_with_cid(&self, cid: Cid, data: Bytes) -> Result<()>;

    /// Check if a block exists without retrieving it
    fn has(&self, cid: &Cid) -> Result<bool>;

    /// Get multiple blocks at once
    ///
    /// Returns a vec of the same length as the input, with `None` for missing
    /// blocks.
    fn get_many(&self, cids: &[Cid]) -> Result<Vec<Option<Bytes>>> {
        cids.iter().map(|cid| self.get(cid)).collect()
    }

    /// Put many blocks at once
    fn put_many(&self, blocks: impl IntoIterator<Item = (Cid, Bytes)>) -> Result<()> {
        for (cid, data) in blocks {
            self.put_with_cid(cid, data)?;
        }
        Ok(())
    }

    /// Remove a block, returning whether it was present
    fn remove(&self, cid: &Cid) -> Result<bool>;
}

pub mod memory;

pub use memory::MemoryBlockStore;
