//! CAR file writing utilities
//!
//! Provides functions for writing blocks to CAR (Content Addressable aRchive) files.

use std::collections::HashSet;
use std::io::Write;

use arbor_common::{Cid, varint};
use bytes::Bytes;
use tracing::trace;

use super::CarHeader;
use crate::error::{RepoError, Result};
use crate::mst::Mst;
use crate::storage::BlockStore;

/// Streaming CAR writer
///
/// The header goes out with the first block, or on [`CarWriter::finish`] for
/// an archive with no blocks.
#[derive(Debug)]
pub struct CarWriter<W> {
    writer: W,
    header: Option<CarHeader>,
    scratch: Vec<u8>,
}

impl<W: Write> CarWriter<W> {
    /// Create a writer; nothing is written until the first block
    pub fn new(header: CarHeader, writer: W) -> Self {
        Self {
            writer,
            header: Some(header),
            scratch: Vec::new(),
        }
    }

    fn write_header(&mut self) -> Result<()> {
        if let Some(header) = self.header.take() {
            let bytes = header.encode();
            self.scratch.clear();
            varint::encode(bytes.len() as u64, &mut self.scratch);
            self.writer.write_all(&self.scratch)?;
            self.writer.write_all(&bytes)?;
        }
        Ok(())
    }

    /// Write one block
    pub fn write(&mut self, cid: Cid, data: &[u8]) -> Result<()> {
        self.write_header()?;
        let cid_bytes = cid.to_bytes();
        self.scratch.clear();
        varint::encode((cid_bytes.len() + data.len()) as u64, &mut self.scratch);
        self.scratch.extend_from_slice(&cid_bytes);
        self.writer.write_all(&self.scratch)?;
        self.writer.write_all(data)?;
        trace!(%cid, len = data.len(), "wrote CAR block");
        Ok(())
    }

    /// Write the header if still pending, flush and return the inner writer
    pub fn finish(mut self) -> Result<W> {
        self.write_header()?;
        self.writer.flush()?;
        Ok(self.writer)
    }
}

/// Write blocks to a CAR stream
///
/// Blocks are written in iteration order. Roots should contain the commit CID.
pub fn write_car<W: Write>(
    writer: W,
    roots: Vec<Cid>,
    blocks: impl IntoIterator<Item = (Cid, Bytes)>,
) -> Result<W> {
    let mut writer = CarWriter::new(CarHeader::new_v1(roots), writer);
    for (cid, data) in blocks {
        writer.write(cid, &data)?;
    }
    writer.finish()
}

/// Write blocks to CAR bytes (in-memory)
///
/// Like [`write_car`] with a single root and a `Vec<u8>` sink.
pub fn write_car_bytes(root: Cid, blocks: impl IntoIterator<Item = (Cid, Bytes)>) -> Result<Vec<u8>> {
    write_car(Vec::new(), vec![root], blocks)
}

/// Write a commit followed by a caller-chosen subset of blocks
///
/// The diff form used for firehose event payloads. `commit_bytes` must be the
/// signed commit whose CID is `commit_cid`.
pub fn write_car_diff<W: Write>(
    writer: W,
    commit_cid: Cid,
    commit_bytes: Bytes,
    blocks: impl IntoIterator<Item = (Cid, Bytes)>,
) -> Result<W> {
    write_car(
        writer,
        vec![commit_cid],
        std::iter::once((commit_cid, commit_bytes)).chain(blocks),
    )
}

/// Write MST + commit to a CAR stream
///
/// Order:
/// - Commit block
/// - All MST node blocks, root first
/// - All record blocks, in key order, each distinct CID once
///
/// Record bytes come from `records`; a record the tree points at but the
/// store lacks is a `NotFound` error.
pub fn export_repo_car<W: Write, S: BlockStore>(
    writer: W,
    commit_cid: Cid,
    commit_bytes: Bytes,
    mst: &mut Mst,
    records: &S,
) -> Result<W> {
    let mut writer = CarWriter::new(CarHeader::new_v1(vec![commit_cid]), writer);
    writer.write(commit_cid, &commit_bytes)?;

    for (cid, data) in mst.blocks() {
        writer.write(cid, &data)?;
    }

    let mut written = HashSet::new();
    for (path, cid) in mst.entries() {
        if !written.insert(cid) {
            continue;
        }
        let data = records.get(&cid)?.ok_or_else(|| {
            RepoError::not_found("record block", cid).with_context(format!("record {}", path))
        })?;
        writer.write(cid, &data)?;
    }

    writer.finish()
}
