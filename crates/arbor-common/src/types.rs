//! Protocol string types: revisions, identities and timestamps

/// RFC 3339 timestamps
pub mod datetime;
/// Decentralized identifiers
pub mod did;
/// Timestamp identifiers and the revision ticker
pub mod tid;

pub use datetime::Datetime;
pub use did::Did;
pub use tid::{Ticker, Tid};
