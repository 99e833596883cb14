//! AT Protocol repository primitives
//!
//! This crate provides building blocks for working with AT Protocol repositories:
//!
//! - **MST (Merkle Search Tree)**: arena-backed tree whose shape and root hash
//!   depend only on the key set
//! - **Commits**: signed commit objects (version 3, reads version 2) with
//!   P-256 and secp256k1 signing and verification
//! - **Firehose events**: one per commit, carrying the ops and a CAR diff of
//!   the changed blocks
//! - **CAR I/O**: import and export repositories in CAR (Content Addressable
//!   aRchive) format
//! - **Storage**: block storage trait with an in-memory implementation
//! - **Repository**: staged CRUD, transactional commit, file save/load
//!
//! The codecs underneath (VarInt, DAG-CBOR, CID, Base32) and the protocol
//! string types live in `arbor-common`.
//!
//! # Example
//!
//! ```rust
//! use arbor_common::{DagCbor, Did};
//! use arbor_repo::commit::identity_signer;
//! use arbor_repo::{RepoOptions, Repository};
//!
//! # fn example() -> arbor_repo::Result<()> {
//! let did = Did::new("did:plc:test123").unwrap();
//! let mut repo = Repository::create_for_new_user(did, &identity_signer())?;
//!
//! repo.create_record(
//!     "app.bsky.actor.profile/self",
//!     &DagCbor::map([("displayName", DagCbor::from("Alice"))]),
//! )?;
//! let event = repo.commit(&identity_signer())?;
//! assert_eq!(event.seq, 1);
//!
//! let car = repo.write_car(Vec::new())?;
//! let copy = Repository::read_from_car(&car[..], RepoOptions::default())?;
//! assert_eq!(copy.root_cid(), repo.root_cid());
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

/// CAR (Content Addressable aRchive) utilities
pub mod car;
/// Commit structures and signature verification
pub mod commit;
pub mod error;
/// Merkle Search Tree implementation
pub mod mst;
/// High-level repository operations
pub mod repo;
/// Block storage abstraction
pub mod storage;

pub use commit::firehose::{FirehoseEvent, RepoAction, RepoOp};
pub use commit::{Commit, CommitSigner, CommitVerifier, signer_fn};
pub use error::{RepoError, RepoErrorKind, Result};
pub use mst::Mst;
pub use repo::{CommitData, RepoOptions, RepoStats, Repository};
pub use storage::{BlockStore, MemoryBlockStore};
