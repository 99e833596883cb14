//! CAR (Content Addressable aRchive) file I/O
//!
//! CAR v1 framing, used for full repository export/import and for the
//! `blocks` payload of firehose events:
//!
//! ```text
//! varint(header_len) | DAG-CBOR { "roots": [CID, ...], "version": 1 }
//! varint(block_len)  | CID bytes | block bytes      (repeated)
//! ```
//!
//! `block_len` covers the CID and the payload. All I/O is synchronous over
//! `std::io::Read`/`Write`; archives are buffered in memory.
//!
//! # Examples
//!
//! ```rust
//! use arbor_common::Cid;
//! use arbor_repo::car::{parse_car_bytes, write_car_bytes};
//! use bytes::Bytes;
//!
//! # fn example() -> arbor_repo::Result<()> {
//! let data = Bytes::from_static(b"\xa1\x61a\x01");
//! let cid = Cid::compute(&data);
//! let car = write_car_bytes(cid, [(cid, data.clone())])?;
//!
//! let parsed = parse_car_bytes(&car)?;
//! assert_eq!(parsed.root, cid);
//! assert_eq!(parsed.blocks[&cid], data);
//! # Ok(())
//! # }
//! ```

use arbor_common::{Cid, DagCbor};

use crate::error::{RepoError, Result};

pub mod reader;
pub mod writer;

// Re-export commonly used functions and types
pub use reader::{
    CarReader, LoadedRepo, MAX_BLOCK_SIZE, ParsedCar, parse_car_bytes, read_car,
    read_car_header,
};
pub use writer::{CarWriter, export_repo_car, write_car, write_car_bytes, write_car_diff};

/// CAR v1 header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CarHeader {
    roots: Vec<Cid>,
}

impl CarHeader {
    /// Version 1 header with the given roots
    pub fn new_v1(roots: Vec<Cid>) -> Self {
        Self { roots }
    }

    /// Root CIDs, the first one is the repository commit
    pub fn roots(&self) -> &[Cid] {
        &self.roots
    }

    /// Canonical header bytes (without the length prefix)
    pub fn encode(&self) -> Vec<u8> {
        DagCbor::map([
            (
                "roots",
                DagCbor::Array(self.roots.iter().copied().map(DagCbor::Link).collect()),
            ),
            ("version", DagCbor::Integer(1)),
        ])
        .to_vec()
    }

    /// Parse header bytes
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let value = DagCbor::from_slice(bytes)?;
        match value.get("version").and_then(DagCbor::as_integer) {
            Some(1) => {}
            Some(v) => return Err(RepoError::car(format!("unsupported CAR version {}", v))),
            None => return Err(RepoError::car("CAR header has no version")),
        }
        let roots = value
            .get("roots")
            .and_then(DagCbor::as_array)
            .ok_or_else(|| RepoError::car("CAR header has no roots array"))?
            .iter()
            .map(|root| {
                root.as_link()
                    .copied()
                    .ok_or_else(|| RepoError::car("CAR root is not a CID link"))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { roots })
    }
}
