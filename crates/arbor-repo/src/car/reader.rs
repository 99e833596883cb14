//! CAR file reading utilities
//!
//! Reads CAR archives into memory and rebuilds the repository they hold.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use arbor_common::error::FormatError;
use arbor_common::{Cid, varint};
use bytes::Bytes;
use smol_str::SmolStr;
use tracing::trace;

use super::CarHeader;
use crate::commit::Commit;
use crate::error::{RepoError, Result};
use crate::mst::{Mst, NodeData};
use crate::storage::{BlockStore, MemoryBlockStore};

/// Largest block (CID plus payload) accepted when reading
pub const MAX_BLOCK_SIZE: usize = 2 * 1024 * 1024;

/// Streaming CAR reader
///
/// Reads the header on construction, then yields blocks one at a time.
/// Blocks are checked against their CID unless verification is turned off.
#[derive(Debug)]
pub struct CarReader<R> {
    reader: R,
    header: CarHeader,
    verify: bool,
}

impl<R: Read> CarReader<R> {
    /// Read the header and prepare to stream blocks
    pub fn new(mut reader: R) -> Result<Self> {
        let len = varint::read(&mut reader)?
            .ok_or_else(|| RepoError::car("empty CAR stream"))?;
        let len = frame_len(len, "header")?;
        let bytes = read_frame(&mut reader, len)?;
        let header = CarHeader::decode(&bytes)?;
        Ok(Self {
            reader,
            header,
            verify: true,
        })
    }

    /// Whether to check every block's digest against its CID (default on)
    pub fn verify_blocks(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    /// The CAR header
    pub fn header(&self) -> &CarHeader {
        &self.header
    }

    /// Next block, or `None` at a clean end of stream
    pub fn next_block(&mut self) -> Result<Option<(Cid, Bytes)>> {
        let Some(len) = varint::read(&mut self.reader)? else {
            return Ok(None);
        };
        let len = frame_len(len, "block")?;
        let frame = read_frame(&mut self.reader, len)?;

        let (cid, cid_len) = Cid::read_bytes(&frame)?;
        let data = Bytes::from(frame).slice(cid_len..);
        if self.verify && !cid.verify(&data) {
            return Err(RepoError::integrity(format!(
                "block content does not match CID {}",
                cid
            )));
        }
        trace!(%cid, len = data.len(), "read CAR block");
        Ok(Some((cid, data)))
    }
}

impl<R: Read> Iterator for CarReader<R> {
    type Item = Result<(Cid, Bytes)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_block().transpose()
    }
}

fn frame_len(len: u64, what: &str) -> Result<usize> {
    match usize::try_from(len) {
        Ok(0) => Err(RepoError::car(format!("zero-length CAR {}", what))),
        Ok(len) if len <= MAX_BLOCK_SIZE => Ok(len),
        _ => Err(RepoError::car(format!(
            "CAR {} of {} bytes exceeds the {} byte limit",
            what, len, MAX_BLOCK_SIZE
        ))),
    }
}

fn read_frame<R: Read>(reader: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut frame = Vec::with_capacity(len);
    reader.take(len as u64).read_to_end(&mut frame)?;
    if frame.len() < len {
        return Err(FormatError::FrameTruncated {
            expected: len,
            found: frame.len(),
        }
        .into());
    }
    Ok(frame)
}

/// Parsed CAR file data
#[derive(Debug, Clone)]
pub struct ParsedCar {
    /// The first root CID from the CAR header
    pub root: Cid,
    /// All blocks in the CAR file
    pub blocks: BTreeMap<Cid, Bytes>,
}

/// Repository state rebuilt from a CAR archive
#[derive(Debug, Clone)]
pub struct LoadedRepo {
    /// CID of the commit block (the CAR root)
    pub commit_cid: Cid,
    /// The decoded commit
    pub commit: Commit,
    /// Tree rooted at the commit's `data`
    pub mst: Mst,
    /// Every block from the archive
    pub storage: MemoryBlockStore,
}

impl ParsedCar {
    /// Decode the root block as a commit
    pub fn commit(&self) -> Result<(Cid, Commit)> {
        let bytes = self.blocks.get(&self.root).ok_or_else(|| {
            RepoError::not_found("commit block", self.root)
                .with_help("the first CAR root must be the commit block")
        })?;
        Ok((self.root, Commit::from_cbor(bytes)?))
    }

    /// Split non-root blocks into MST nodes and opaque records
    ///
    /// Anything decoding to a map with an `"e"` entry list is a node.
    pub fn classify(&self) -> (BTreeMap<Cid, Bytes>, BTreeMap<Cid, Bytes>) {
        self.blocks
            .iter()
            .filter(|(cid, _)| **cid != self.root)
            .map(|(cid, bytes)| (*cid, bytes.clone()))
            .partition(|(_, bytes)| NodeData::is_node(bytes))
    }

    /// Rebuild the repository: commit, tree and block store
    ///
    /// Every node reachable from the commit's data root and every record the
    /// tree points at must be present.
    pub fn load(self) -> Result<LoadedRepo> {
        let (commit_cid, commit) = self.commit()?;
        let storage = MemoryBlockStore::new_from_blocks(self.blocks);
        let mst = Mst::load(commit.data(), &storage)?;

        let missing: Vec<(SmolStr, Cid)> = mst
            .entries()
            .into_iter()
            .filter(|(_, cid)| !storage.has(cid).unwrap_or(false))
            .collect();
        if let Some((path, cid)) = missing.first() {
            return Err(RepoError::not_found("record block", cid)
                .with_help(format!("{} records missing, first at {}", missing.len(), path)));
        }

        Ok(LoadedRepo {
            commit_cid,
            commit,
            mst,
            storage,
        })
    }
}

/// Read a whole CAR stream into memory, verifying every block
pub fn read_car<R: Read>(reader: R) -> Result<ParsedCar> {
    read_car_with(CarReader::new(reader)?)
}

pub(crate) fn read_car_with<R: Read>(reader: CarReader<R>) -> Result<ParsedCar> {
    let root = reader
        .header()
        .roots()
        .first()
        .copied()
        .ok_or_else(|| RepoError::car("CAR file has no roots"))?;

    let mut blocks = BTreeMap::new();
    for block in reader {
        let (cid, data) = block?;
        blocks.insert(cid, data);
    }
    trace!(%root, blocks = blocks.len(), "read CAR");
    Ok(ParsedCar { root, blocks })
}

/// Parse CAR bytes into root and block map
///
/// For in-memory CAR data (e.g., firehose event payloads).
pub fn parse_car_bytes(data: &[u8]) -> Result<ParsedCar> {
    read_car(data)
}

/// Read CAR file header (roots only)
pub fn read_car_header(path: impl AsRef<Path>) -> Result<Vec<Cid>> {
    let file = File::open(path)?;
    let reader = CarReader::new(BufReader::new(file))?;
    Ok(reader.header().roots().to_vec())
}
