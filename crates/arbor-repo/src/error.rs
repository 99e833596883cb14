//! Error types for repository operations

use std::error::Error;
use std::fmt;

use arbor_common::error::{DecodeError, FormatError, StreamError};

/// Boxed error type for error sources
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// Result type alias for repository operations
pub type Result<T> = std::result::Result<T, RepoError>;

/// Repository operation error with rich diagnostics
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub struct RepoError {
    kind: RepoErrorKind,
    #[source]
    source: Option<BoxError>,
    #[help]
    help: Option<String>,
    context: Option<String>,
}

/// Error categories for repository operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoErrorKind {
    /// Malformed VarInt, DAG-CBOR, CID or CAR framing
    Format,
    /// A referenced block or the commit root is missing
    NotFound,
    /// Operation not valid in the repository's current state
    State,
    /// Well-formed bytes that violate a structural invariant
    Integrity,
    /// Record path rejected by key validation
    InvalidKey,
    /// Invalid commit structure
    InvalidCommit,
    /// Signing or verification failed
    Crypto,
    /// CAR file operation failed
    Car,
    /// I/O error
    Io,
}

impl RepoError {
    /// Create a new error with the given kind and optional source
    pub fn new(kind: RepoErrorKind, source: Option<BoxError>) -> Self {
        Self {
            kind,
            source,
            help: None,
            context: None,
        }
    }

    /// Add a help message to the error
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Add context information to the error
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Get the error kind
    pub fn kind(&self) -> &RepoErrorKind {
        &self.kind
    }

    /// Create a format error
    pub fn format(source: impl Error + Send + Sync + 'static) -> Self {
        Self::new(RepoErrorKind::Format, Some(Box::new(source)))
    }

    /// Create a not found error
    pub fn not_found(resource: &str, id: impl fmt::Display) -> Self {
        Self::new(RepoErrorKind::NotFound, None)
            .with_context(format!("{} not found: {}", resource, id))
    }

    /// Create a state error
    pub fn state(msg: impl Into<String>) -> Self {
        Self::new(RepoErrorKind::State, None).with_context(msg)
    }

    /// Create an integrity error
    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::new(RepoErrorKind::Integrity, Some(msg.into().into()))
    }

    /// Create an invalid key error
    pub fn invalid_key(key: impl Into<String>) -> Self {
        Self::new(RepoErrorKind::InvalidKey, None)
            .with_help("record paths look like <collection>/<rkey>, use [a-zA-Z0-9._:~-], max 256 bytes")
            .with_context(format!("key: {}", key.into()))
    }

    /// Create an invalid commit error
    pub fn invalid_commit(msg: impl Into<String>) -> Self {
        Self::new(RepoErrorKind::InvalidCommit, Some(msg.into().into()))
    }

    /// Create a crypto error
    pub fn crypto(source: impl Into<BoxError>) -> Self {
        Self::new(RepoErrorKind::Crypto, Some(source.into()))
    }

    /// Create a CAR file error
    pub fn car(msg: impl Into<String>) -> Self {
        Self::new(RepoErrorKind::Car, Some(msg.into().into()))
    }

    /// Create an I/O error
    pub fn io(source: std::io::Error) -> Self {
        Self::new(RepoErrorKind::Io, Some(Box::new(source)))
    }
}

impl fmt::Display for RepoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;

        if let Some(ctx) = &self.context {
            write!(f, ": {}", ctx)?;
        }

        if let Some(src) = &self.source {
            write!(f, ": {}", src)?;
        }

        Ok(())
    }
}

impl From<FormatError> for RepoError {
    fn from(e: FormatError) -> Self {
        RepoError::format(e)
    }
}

impl From<DecodeError> for RepoError {
    fn from(e: DecodeError) -> Self {
        RepoError::format(e)
    }
}

impl From<std::io::Error> for RepoError {
    fn from(e: std::io::Error) -> Self {
        RepoError::io(e)
    }
}

impl From<StreamError> for RepoError {
    fn from(e: StreamError) -> Self {
        match e {
            StreamError::Io(e) => RepoError::io(e),
            StreamError::Format(e) => RepoError::format(e),
        }
    }
}

// Internal granular errors

/// MST-specific errors
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum MstError {
    /// Empty key not allowed
    #[error("Empty key not allowed")]
    EmptyKey,

    /// Key too long
    #[error("Key too long: {len} bytes (max {max})")]
    KeyTooLong {
        /// Actual key length
        len: usize,
        /// Maximum allowed length
        max: usize,
    },

    /// Invalid key characters or shape
    #[error("Invalid key: {key}")]
    InvalidKeyChars {
        /// The invalid key
        key: String,
    },

    /// A decoded map is not an MST node
    #[error("Not an MST node: {0}")]
    #[diagnostic(help("MST nodes are maps with an \"e\" entry list and an \"l\" link"))]
    NotANode(String),

    /// Node contents break the tree invariants
    #[error("Node structure invalid: {0}")]
    InvalidNode(String),

    /// A linked node is absent from the block set
    #[error("MST node block missing: {0}")]
    MissingNode(String),
}

impl From<MstError> for RepoError {
    fn from(e: MstError) -> Self {
        match e {
            MstError::EmptyKey => RepoError::invalid_key(""),
            MstError::KeyTooLong { len, max } => {
                RepoError::invalid_key(format!("length {}/{}", len, max))
            }
            MstError::InvalidKeyChars { key } => RepoError::invalid_key(key),
            e @ MstError::MissingNode(_) => {
                RepoError::new(RepoErrorKind::NotFound, Some(Box::new(e)))
            }
            e @ (MstError::NotANode(_) | MstError::InvalidNode(_)) => {
                RepoError::new(RepoErrorKind::Integrity, Some(Box::new(e)))
                    .with_help("MST nodes must follow protocol structure")
            }
        }
    }
}

/// Commit-specific errors
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum CommitError {
    /// Invalid commit version
    #[error("Invalid commit version: {0}")]
    InvalidVersion(i64),

    /// Field missing or of the wrong type
    #[error("Invalid commit field `{0}`")]
    InvalidField(&'static str),

    /// Invalid signature format
    #[error("Invalid signature format: {0}")]
    InvalidSignature(String),

    /// Signature verification failed
    #[error("Signature verification failed")]
    SignatureVerificationFailed,

    /// Commit has no signature to verify
    #[error("Commit is unsigned")]
    Unsigned,

    /// The signing callback failed
    #[error("Signer failed")]
    Signer(#[source] BoxError),
}

impl From<CommitError> for RepoError {
    fn from(e: CommitError) -> Self {
        match e {
            CommitError::InvalidVersion(v) => {
                RepoError::invalid_commit(format!("unsupported version {}", v))
            }
            CommitError::InvalidField(field) => {
                RepoError::invalid_commit(format!("missing or mistyped field `{}`", field))
            }
            CommitError::InvalidSignature(msg) => {
                RepoError::new(RepoErrorKind::Crypto, Some(msg.into()))
                    .with_context("invalid signature format".to_string())
            }
            CommitError::SignatureVerificationFailed => RepoError::new(RepoErrorKind::Crypto, None)
                .with_context("signature verification failed".to_string()),
            CommitError::Unsigned => RepoError::new(RepoErrorKind::InvalidCommit, None)
                .with_context("commit has no signature".to_string()),
            CommitError::Signer(e) => {
                RepoError::new(RepoErrorKind::Crypto, Some(e)).with_context("signing failed")
            }
        }
    }
}
