//! Core codecs and protocol types for Arbor
//!
//! Everything content-addressed in an atproto repository bottoms out here:
//! [`varint`] framing, [`base32`] text, [`cid::Cid`] identifiers and the
//! canonical [`dag_cbor`] codec whose bytes those identifiers hash. The
//! [`types`] module carries the protocol strings a repository needs
//! ([`Tid`] revisions, [`Did`] owners, [`Datetime`] stamps).

#![warn(missing_docs)]
pub use bytes;
pub use smol_str;

pub mod base32;
pub mod cid;
pub mod dag_cbor;
pub mod error;
pub mod types;
pub mod varint;

pub use cid::Cid;
pub use dag_cbor::DagCbor;
pub use error::{DecodeError, FormatError, StrError, StreamError};
pub use types::{Datetime, Did, Ticker, Tid};
