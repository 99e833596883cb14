//! Firehose commit events
//!
//! One event is emitted per successful [`crate::Repository::commit`]. It
//! carries the new commit CID, the record operations it applied and a CAR
//! diff holding only the blocks that changed. The event is DISTINCT from the
//! repository commit object it points at.

use std::fmt;

use arbor_common::{Cid, DagCbor, Datetime, Did, Tid};
use bytes::Bytes;
use smol_str::SmolStr;

use super::{Commit, CommitVerifier};
use crate::car::{ParsedCar, parse_car_bytes};
use crate::error::{RepoError, Result};

/// Firehose commit event (sync v1.1 shape)
///
/// **Sync v1.0 vs v1.1:**
/// - v1.0: `prev_data` is None, consumers must hold the previous repository
///   state to validate
/// - v1.1: `prev_data` carries the previous MST root and ops carry `prev`
///   CIDs, so the change can be checked inductively
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirehoseEvent {
    /// The stream sequence number of this message
    pub seq: i64,

    /// The repo this event comes from
    pub repo: Did,

    /// Repo commit object CID
    ///
    /// Also the first root of the `blocks` CAR header.
    pub commit: Cid,

    /// The rev of the emitted commit
    pub rev: Tid,

    /// The rev of the previous commit from this repo, if any
    pub since: Option<Tid>,

    /// Operations in this commit
    pub ops: Vec<RepoOp>,

    /// CAR file with the commit block, changed MST nodes and new records
    pub blocks: Bytes,

    /// Previous MST root CID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_data: Option<Cid>,

    /// DEPRECATED: Unused, always false
    pub rebase: bool,

    /// DEPRECATED: Replaced by data limits, always false
    pub too_big: bool,

    /// Timestamp of when this event was produced
    pub time: Datetime,
}

/// Kind of change applied to one record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoAction {
    /// Path did not exist before
    Create,
    /// Path existed and now has a new value
    Update,
    /// Path was removed
    Delete,
}

impl RepoAction {
    /// Wire name of the action
    pub fn as_str(&self) -> &'static str {
        match self {
            RepoAction::Create => "create",
            RepoAction::Update => "update",
            RepoAction::Delete => "delete",
        }
    }
}

impl fmt::Display for RepoAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A repository operation (mutation of a single record)
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoOp {
    /// Operation type
    pub action: RepoAction,

    /// Collection/rkey path (e.g., "app.bsky.feed.post/abc123")
    pub path: SmolStr,

    /// For creates and updates, the new record CID. For deletions, None (null).
    pub cid: Option<Cid>,

    /// For updates and deletes, the previous record CID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev: Option<Cid>,
}

impl RepoOp {
    fn to_dag_cbor(&self) -> DagCbor {
        let mut fields = vec![
            ("action", DagCbor::from(self.action.as_str())),
            ("path", DagCbor::from(self.path.clone())),
            ("cid", DagCbor::from(self.cid)),
        ];
        if let Some(prev) = self.prev {
            fields.push(("prev", DagCbor::Link(prev)));
        }
        DagCbor::map(fields)
    }
}

impl FirehoseEvent {
    /// The event as a DAG-CBOR map, as published on the wire
    pub fn to_dag_cbor(&self) -> DagCbor {
        let mut fields = vec![
            ("seq", DagCbor::Integer(self.seq)),
            ("repo", DagCbor::from(self.repo.as_str())),
            ("commit", DagCbor::Link(self.commit)),
            ("rev", DagCbor::from(self.rev.as_str())),
            (
                "since",
                self.since
                    .as_ref()
                    .map_or(DagCbor::Null, |since| DagCbor::from(since.as_str())),
            ),
            (
                "ops",
                DagCbor::Array(self.ops.iter().map(RepoOp::to_dag_cbor).collect()),
            ),
            ("blocks", DagCbor::Bytes(self.blocks.clone())),
            ("rebase", DagCbor::Bool(self.rebase)),
            ("tooBig", DagCbor::Bool(self.too_big)),
            ("time", DagCbor::from(self.time.as_str())),
        ];
        if let Some(prev_data) = self.prev_data {
            fields.push(("prevData", DagCbor::Link(prev_data)));
        }
        DagCbor::map(fields)
    }

    /// Parse the `blocks` CAR
    pub fn parse_blocks(&self) -> Result<ParsedCar> {
        parse_car_bytes(&self.blocks)
    }

    /// Decode the commit object carried in `blocks`
    ///
    /// Checks that the CAR root is the event's commit and that the commit
    /// belongs to the event's repo.
    pub fn commit_object(&self) -> Result<Commit> {
        let parsed = self.parse_blocks()?;
        if parsed.root != self.commit {
            return Err(RepoError::invalid_commit(format!(
                "CAR root {} does not match event commit {}",
                parsed.root, self.commit
            )));
        }
        let (_, commit) = parsed.commit()?;
        if commit.did != self.repo {
            return Err(RepoError::invalid_commit(format!(
                "DID mismatch: commit has {}, event has {}",
                commit.did, self.repo
            ))
            .with_help("the commit was signed for a different repository"));
        }
        if commit.rev != self.rev {
            return Err(RepoError::invalid_commit(format!(
                "rev mismatch: commit has {}, event has {}",
                commit.rev, self.rev
            )));
        }
        Ok(commit)
    }

    /// Decode the commit object and check its signature
    pub fn verify(&self, key: &impl CommitVerifier) -> Result<Commit> {
        let commit = self.commit_object()?;
        commit.verify(key)?;
        Ok(commit)
    }
}
