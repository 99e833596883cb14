//! High-level repository operations
//!
//! Convenience layer over the MST, commit and CAR primitives: staged record
//! writes, transactional commits that emit firehose events, and CAR
//! import/export.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use arbor_common::{Cid, DagCbor, Datetime, Did, Ticker, Tid};
use bytes::Bytes;
use smol_str::SmolStr;
use tracing::{debug, warn};

use crate::car::reader::read_car_with;
use crate::car::{CarReader, export_repo_car, write_car_bytes, write_car_diff};
use crate::commit::firehose::{FirehoseEvent, RepoAction, RepoOp};
use crate::commit::{Commit, CommitSigner};
use crate::error::{RepoError, Result};
use crate::mst::{Mst, validate_key};
use crate::storage::{BlockStore, MemoryBlockStore};

/// Repository configuration
///
/// Threaded explicitly into constructors and CAR loading; the engine holds no
/// global state.
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder)]
#[builder(start_fn = new)]
pub struct RepoOptions {
    /// Reject record paths that are not `<collection>/<rkey>` with
    /// `[a-zA-Z0-9._:~-]` characters and at most 256 bytes
    #[builder(default = true)]
    pub validate_keys: bool,

    /// Reject CAR blocks whose digest does not match their CID
    #[builder(default = true)]
    pub verify_blocks: bool,

    /// TID clock identifier, masked to 10 bits
    #[builder(default)]
    pub clock_id: u16,
}

impl Default for RepoOptions {
    fn default() -> Self {
        Self::new().build()
    }
}

/// A staged change to one record path
#[derive(Debug, Clone, PartialEq, Eq)]
enum PendingOp {
    Write(Bytes),
    Delete,
}

/// Commit data for repository updates
///
/// Contains the signed commit and every block the new state adds. Produced by
/// [`Repository::format_commit`] without touching the repository, then
/// applied by [`Repository::commit`].
#[derive(Debug, Clone)]
pub struct CommitData {
    /// Commit CID
    pub cid: Cid,

    /// The signed commit
    pub commit: Commit,

    /// Signed commit bytes
    pub commit_bytes: Bytes,

    /// Previous revision TID (None for the first commit)
    pub since: Option<Tid>,

    /// Previous MST root CID
    pub prev_data: Option<Cid>,

    /// New MST node blocks and record blocks, excluding the commit block
    pub blocks: Vec<(Cid, Bytes)>,

    /// Record operations in path order
    pub ops: Vec<RepoOp>,
}

/// Node and record counts over the committed tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepoStats {
    /// MST nodes, including an empty root
    pub node_count: usize,
    /// Records
    pub record_count: usize,
}

/// High-level repository
///
/// Owns the committed tree, the current commit, a buffer of staged changes
/// and the firehose sequence counter. One logical owner per instance; callers
/// needing concurrent mutation must serialize [`Repository::commit`].
///
/// # Example
///
/// ```rust
/// use arbor_common::{DagCbor, Did};
/// use arbor_repo::Repository;
///
/// # fn example() -> arbor_repo::Result<()> {
/// let key = p256::ecdsa::SigningKey::from_slice(&[1u8; 32]).unwrap();
/// let did = Did::new("did:plc:example").unwrap();
/// let mut repo = Repository::create_for_new_user(did, &key)?;
///
/// let post = DagCbor::map([("text", DagCbor::from("hello"))]);
/// repo.create_record("app.bsky.feed.post/3l5yhcgz7y42y", &post)?;
/// let event = repo.commit(&key)?;
///
/// assert_eq!(event.ops.len(), 1);
/// assert_eq!(repo.list_records().len(), 1);
/// # Ok(())
/// # }
/// # example().unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct Repository<S: BlockStore = MemoryBlockStore> {
    did: Did,
    options: RepoOptions,
    storage: S,
    mst: Mst,
    head: Option<(Cid, Commit)>,
    pending: BTreeMap<SmolStr, PendingOp>,
    seq: i64,
    ticker: Ticker,
}

impl Repository<MemoryBlockStore> {
    /// Empty in-memory repository with no commit yet
    pub fn new(did: Did, options: RepoOptions) -> Self {
        Self::with_storage(did, MemoryBlockStore::new(), options)
    }

    /// New in-memory repository with a signed genesis commit over the empty tree
    pub fn create_for_new_user(did: Did, signer: &impl CommitSigner) -> Result<Self> {
        let mut repo = Self::new(did, RepoOptions::default());
        repo.initialize(signer)?;
        Ok(repo)
    }

    /// Load a repository from a CAR stream
    ///
    /// The first CAR root must be the commit; every node and record it
    /// reaches must be in the archive. The sequence counter starts at 0.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn read_from_car<R: Read>(reader: R, options: RepoOptions) -> Result<Self> {
        let reader = CarReader::new(reader)?.verify_blocks(options.verify_blocks);
        let loaded = read_car_with(reader)?.load()?;
        if options.validate_keys {
            for key in loaded.mst.keys() {
                validate_key(&key)?;
            }
        }
        debug!(
            did = %loaded.commit.did,
            rev = %loaded.commit.rev,
            records = loaded.mst.len(),
            "loaded repository from CAR"
        );
        Ok(Self {
            did: loaded.commit.did.clone(),
            ticker: Ticker::new(options.clock_id),
            options,
            storage: loaded.storage,
            mst: loaded.mst,
            head: Some((loaded.commit_cid, loaded.commit)),
            pending: BTreeMap::new(),
            seq: 0,
        })
    }

    /// Load a repository from a CAR file
    #[tracing::instrument(level = "debug", skip_all, fields(path = %path.as_ref().display()))]
    pub fn load_from_file(path: impl AsRef<Path>, options: RepoOptions) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Self::read_from_car(BufReader::new(file), options)
    }
}

impl<S: BlockStore> Repository<S> {
    /// Empty repository over the given block store, with no commit yet
    pub fn with_storage(did: Did, storage: S, options: RepoOptions) -> Self {
        Self {
            did,
            ticker: Ticker::new(options.clock_id),
            options,
            storage,
            mst: Mst::new(),
            head: None,
            pending: BTreeMap::new(),
            seq: 0,
        }
    }

    /// Reopen a repository whose blocks are already in `storage`
    pub fn open(storage: S, commit_cid: Cid, options: RepoOptions) -> Result<Self> {
        let bytes = storage
            .get(&commit_cid)?
            .ok_or_else(|| RepoError::not_found("commit block", commit_cid))?;
        let commit = Commit::from_cbor(&bytes)?;
        let mst = Mst::load(commit.data(), &storage)?;
        Ok(Self {
            did: commit.did.clone(),
            ticker: Ticker::new(options.clock_id),
            options,
            storage,
            mst,
            head: Some((commit_cid, commit)),
            pending: BTreeMap::new(),
            seq: 0,
        })
    }

    /// Sign a genesis commit over the current tree
    ///
    /// Fails with a `State` error if the repository already has a commit.
    #[tracing::instrument(level = "debug", skip_all, fields(did = %self.did))]
    pub fn initialize(&mut self, signer: &impl CommitSigner) -> Result<Cid> {
        if self.head.is_some() {
            return Err(RepoError::state("Repository already has a commit"));
        }
        let mut mst = self.mst.clone();
        let mut ticker = self.ticker.clone();
        let nodes = mst.blocks();
        let rev = ticker
            .next(None)
            .ok_or_else(|| RepoError::state("TID clock exhausted"))?;
        let commit = Commit::new_unsigned(self.did.clone(), mst.root_cid(), rev, None).sign(signer)?;
        let commit_bytes = Bytes::from(commit.to_cbor());
        let cid = Cid::compute(&commit_bytes);

        self.storage
            .put_many(nodes.into_iter().chain(std::iter::once((cid, commit_bytes))))?;
        debug!(%cid, rev = %commit.rev, "genesis commit");
        self.mst = mst;
        self.ticker = ticker;
        self.head = Some((cid, commit));
        Ok(cid)
    }

    fn check_key(&self, path: &str) -> Result<()> {
        if self.options.validate_keys {
            validate_key(path)?;
        }
        Ok(())
    }

    fn stage(&mut self, path: &str, op: PendingOp) -> Result<()> {
        self.check_key(path)?;
        self.pending.insert(SmolStr::new(path), op);
        Ok(())
    }

    /// Stage a new record, returning its CID
    pub fn create_record(&mut self, path: &str, record: &DagCbor) -> Result<Cid> {
        let bytes = Bytes::from(record.to_vec());
        let cid = Cid::compute(&bytes);
        self.stage(path, PendingOp::Write(bytes))?;
        Ok(cid)
    }

    /// Stage a replacement record, returning its CID
    pub fn update_record(&mut self, path: &str, record: &DagCbor) -> Result<Cid> {
        self.create_record(path, record)
    }

    /// Stage removal of a record
    pub fn delete_record(&mut self, path: &str) -> Result<()> {
        self.stage(path, PendingOp::Delete)
    }

    /// Record bytes at `path`, staged changes first
    ///
    /// A staged delete reads as `None`. An absent path is `Ok(None)`.
    pub fn get_record(&self, path: &str) -> Result<Option<Bytes>> {
        match self.pending.get(path) {
            Some(PendingOp::Write(bytes)) => return Ok(Some(bytes.clone())),
            Some(PendingOp::Delete) => return Ok(None),
            None => {}
        }
        let Some(cid) = self.mst.get(path) else {
            return Ok(None);
        };
        let bytes = self
            .storage
            .get(&cid)?
            .ok_or_else(|| RepoError::not_found("record block", cid))?;
        Ok(Some(bytes))
    }

    /// Record at `path` decoded as DAG-CBOR
    pub fn get_record_value(&self, path: &str) -> Result<Option<DagCbor>> {
        match self.get_record(path)? {
            Some(bytes) => Ok(Some(DagCbor::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Committed records in ascending path order
    ///
    /// Staged changes are not visible here until committed.
    pub fn list_records(&self) -> Vec<(SmolStr, Cid)> {
        self.mst.entries()
    }

    /// Node and record counts over the committed tree
    pub fn stats(&self) -> RepoStats {
        RepoStats {
            node_count: self.mst.node_count(),
            record_count: self.mst.len(),
        }
    }

    /// Build and sign the next commit without changing the repository
    ///
    /// Fails with a `State` error if nothing is staged.
    pub fn format_commit(&self, signer: &impl CommitSigner) -> Result<(CommitData, Mst, Ticker)> {
        if self.pending.is_empty() {
            return Err(RepoError::state("No pending changes to commit"));
        }

        let mut mst = self.mst.clone();
        let mut ops = Vec::with_capacity(self.pending.len());
        let mut records = Vec::new();
        for (path, op) in &self.pending {
            match op {
                PendingOp::Write(bytes) => {
                    let cid = Cid::compute(bytes);
                    let prev = mst.insert(path, cid);
                    ops.push(RepoOp {
                        action: if prev.is_some() {
                            RepoAction::Update
                        } else {
                            RepoAction::Create
                        },
                        path: path.clone(),
                        cid: Some(cid),
                        prev,
                    });
                    records.push((cid, bytes.clone()));
                }
                PendingOp::Delete => match mst.remove(path) {
                    Some(prev) => ops.push(RepoOp {
                        action: RepoAction::Delete,
                        path: path.clone(),
                        cid: None,
                        prev: Some(prev),
                    }),
                    None => warn!(%path, "staged delete of a record that does not exist"),
                },
            }
        }

        let mut blocks = mst.recompute();
        blocks.extend(records);
        let data = mst.root_cid();

        let since = self.head.as_ref().map(|(_, c)| c.rev.clone());
        let mut ticker = self.ticker.clone();
        let rev = ticker.next(since.as_ref()).ok_or_else(|| {
            RepoError::state("No revision greater than the current one can be issued")
                .with_help("the current rev already holds the largest TID timestamp")
        })?;
        let commit = Commit::new_unsigned(self.did.clone(), data, rev, None).sign(signer)?;
        let commit_bytes = Bytes::from(commit.to_cbor());
        let cid = Cid::compute(&commit_bytes);

        let data = CommitData {
            cid,
            commit,
            commit_bytes,
            since,
            prev_data: self.head.as_ref().map(|(_, c)| c.data),
            blocks,
            ops,
        };
        Ok((data, mst, ticker))
    }

    /// Apply every staged change, sign a new commit and return its firehose event
    ///
    /// Either the tree, commit, sequence number and staged changes all move
    /// forward, or none of them do.
    #[tracing::instrument(level = "debug", skip_all, fields(did = %self.did, pending = self.pending.len()))]
    pub fn commit(&mut self, signer: &impl CommitSigner) -> Result<FirehoseEvent> {
        let (data, mst, ticker) = self.format_commit(signer)?;

        let car = write_car_diff(
            Vec::new(),
            data.cid,
            data.commit_bytes.clone(),
            data.blocks.iter().cloned(),
        )?;
        self.storage.put_many(
            data.blocks
                .iter()
                .cloned()
                .chain(std::iter::once((data.cid, data.commit_bytes.clone()))),
        )?;

        let event = FirehoseEvent {
            seq: self.seq + 1,
            repo: self.did.clone(),
            commit: data.cid,
            rev: data.commit.rev.clone(),
            since: data.since,
            ops: data.ops,
            blocks: Bytes::from(car),
            prev_data: data.prev_data,
            rebase: false,
            too_big: false,
            time: Datetime::now(),
        };
        debug!(
            seq = event.seq,
            rev = %event.rev,
            commit = %event.commit,
            ops = event.ops.len(),
            blocks = data.blocks.len(),
            "committed"
        );

        self.mst = mst;
        self.ticker = ticker;
        self.head = Some((data.cid, data.commit));
        self.seq = event.seq;
        self.pending.clear();
        Ok(event)
    }

    /// Export commit, nodes and records as a CAR stream
    #[tracing::instrument(level = "debug", skip_all, fields(did = %self.did))]
    pub fn write_car<W: Write>(&self, writer: W) -> Result<W> {
        let (cid, _) = self.head.as_ref().ok_or_else(|| {
            RepoError::state("Repository has no commit to export")
                .with_help("commit at least once before exporting")
        })?;
        let commit_bytes = self
            .storage
            .get(cid)?
            .ok_or_else(|| RepoError::not_found("commit block", cid))?;
        let mut mst = self.mst.clone();
        export_repo_car(writer, *cid, commit_bytes, &mut mst, &self.storage)
    }

    /// Export the repository to a CAR file
    #[tracing::instrument(level = "debug", skip_all, fields(path = %path.as_ref().display()))]
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        if self.head.is_none() {
            return Err(RepoError::state("Repository has no commit to save"));
        }
        let file = File::create(path.as_ref())?;
        self.write_car(BufWriter::new(file))?
            .into_inner()
            .map_err(|e| RepoError::io(e.into_error()))?;
        Ok(())
    }

    /// CAR holding the commit, the node path to `path` and the record if present
    ///
    /// Enough for a reader holding only the commit to check inclusion or
    /// absence of the record.
    pub fn prove_record(&self, path: &str) -> Result<Vec<u8>> {
        let (cid, _) = self
            .head
            .as_ref()
            .ok_or_else(|| RepoError::state("Repository has no commit"))?;
        let commit_bytes = self
            .storage
            .get(cid)?
            .ok_or_else(|| RepoError::not_found("commit block", cid))?;
        let mut mst = self.mst.clone();
        let mut blocks = vec![(*cid, commit_bytes)];
        blocks.extend(mst.proof_blocks(path));
        if let Some(record) = mst.get(path) {
            let bytes = self
                .storage
                .get(&record)?
                .ok_or_else(|| RepoError::not_found("record block", record))?;
            blocks.push((record, bytes));
        }
        write_car_bytes(*cid, blocks)
    }

    /// Repository DID
    pub fn did(&self) -> &Did {
        &self.did
    }

    /// Options the repository was created with
    pub fn options(&self) -> &RepoOptions {
        &self.options
    }

    /// Underlying block store
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Current commit, if any
    pub fn current_commit(&self) -> Option<&Commit> {
        self.head.as_ref().map(|(_, c)| c)
    }

    /// CID of the current commit, if any
    pub fn commit_cid(&self) -> Option<Cid> {
        self.head.as_ref().map(|(cid, _)| *cid)
    }

    /// Revision of the current commit, if any
    pub fn rev(&self) -> Option<&Tid> {
        self.head.as_ref().map(|(_, c)| &c.rev)
    }

    /// Committed MST root CID, if any commit exists
    pub fn root_cid(&self) -> Option<Cid> {
        self.head.as_ref().map(|(_, c)| c.data)
    }

    /// Sequence number of the last emitted event (0 before the first commit)
    pub fn seq(&self) -> i64 {
        self.seq
    }

    /// Number of staged changes
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// The committed tree
    pub fn mst(&self) -> &Mst {
        &self.mst
    }
}
