//! Error types for the low-level codecs
//!
//! [`FormatError`] covers framing problems (VarInt, Base32, binary CIDs),
//! [`DecodeError`] covers DAG-CBOR decoding. Both are terminal: a malformed
//! block cannot be partially trusted, so callers should propagate them.

use smol_str::SmolStr;

/// Malformed VarInt, Base32 or CID framing
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, miette::Diagnostic)]
pub enum FormatError {
    /// Input ended in the middle of a VarInt
    #[error("VarInt truncated after {read} bytes")]
    #[diagnostic(code(arbor::varint::truncated))]
    VarIntTruncated {
        /// Bytes consumed before the input ran out
        read: usize,
    },

    /// VarInt does not fit in 64 bits
    #[error("VarInt overflows u64")]
    #[diagnostic(code(arbor::varint::overflow))]
    VarIntOverflow,

    /// VarInt has redundant trailing zero groups
    #[error("VarInt is not minimally encoded")]
    #[diagnostic(
        code(arbor::varint::non_minimal),
        help("each value has exactly one valid encoding; trailing 0x80 0x00 groups are rejected")
    )]
    VarIntNonMinimal,

    /// Character outside the lowercase RFC 4648 alphabet
    #[error("invalid base32 character {0:?}")]
    #[diagnostic(code(arbor::base32::invalid_char))]
    Base32Char(char),

    /// Encoded length cannot come from whole bytes, or padding bits are set
    #[error("invalid base32 length or trailing bits")]
    #[diagnostic(code(arbor::base32::trailing))]
    Base32Trailing,

    /// Text CID without the `b` multibase prefix
    #[error("unsupported multibase prefix {0:?}, expected 'b'")]
    #[diagnostic(code(arbor::cid::multibase))]
    Multibase(Option<char>),

    /// Binary CID with a version other than 1
    #[error("unsupported CID version {0}")]
    #[diagnostic(code(arbor::cid::version))]
    CidVersion(u64),

    /// Digest longer than a CID can carry
    #[error("CID digest of {0} bytes exceeds the 64 byte maximum")]
    #[diagnostic(code(arbor::cid::digest_size))]
    DigestSize(u64),

    /// Binary CID shorter than its declared digest
    #[error("CID truncated: expected {expected} digest bytes, found {found}")]
    #[diagnostic(code(arbor::cid::truncated))]
    CidTruncated {
        /// Declared digest size
        expected: usize,
        /// Bytes actually available
        found: usize,
    },

    /// Stream ended inside a length-prefixed frame
    #[error("frame truncated: expected {expected} bytes, found {found}")]
    #[diagnostic(code(arbor::car::truncated))]
    FrameTruncated {
        /// Declared frame length
        expected: usize,
        /// Bytes actually available
        found: usize,
    },

    /// Extra bytes after an exact-length CID
    #[error("{0} trailing bytes after CID")]
    #[diagnostic(code(arbor::cid::trailing))]
    CidTrailing(usize),
}

/// Malformed or non-canonical DAG-CBOR
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, miette::Diagnostic)]
pub enum DecodeError {
    /// Input ended before the current item was complete
    #[error("unexpected end of input at offset {offset}")]
    #[diagnostic(code(arbor::cbor::eof))]
    UnexpectedEof {
        /// Offset where more bytes were needed
        offset: usize,
    },

    /// Major type / additional info combination outside the DAG-CBOR subset
    #[error("unsupported item (major type {major}, additional info {info}) at offset {offset}")]
    #[diagnostic(
        code(arbor::cbor::unsupported),
        help("DAG-CBOR for atproto has no floats, undefined, or indefinite-length items")
    )]
    Unsupported {
        /// CBOR major type
        major: u8,
        /// Additional information bits
        info: u8,
        /// Offset of the initial byte
        offset: usize,
    },

    /// Tag other than 42
    #[error("unsupported CBOR tag {0}")]
    #[diagnostic(code(arbor::cbor::tag), help("only tag 42 (CID link) is allowed"))]
    UnsupportedTag(u64),

    /// Length or value not encoded in its minimal width
    #[error("non-canonical argument width at offset {offset}")]
    #[diagnostic(code(arbor::cbor::non_canonical))]
    NonMinimal {
        /// Offset of the initial byte
        offset: usize,
    },

    /// Map key is not text
    #[error("map key at offset {offset} is not a text string")]
    #[diagnostic(code(arbor::cbor::map_key))]
    MapKeyNotText {
        /// Offset of the offending key
        offset: usize,
    },

    /// Map keys out of canonical order, or repeated
    #[error("map keys unsorted or duplicated at {key:?}")]
    #[diagnostic(
        code(arbor::cbor::map_order),
        help("canonical maps sort keys by length first, then bytewise, without duplicates")
    )]
    MapKeyOrder {
        /// The key that broke the ordering
        key: String,
    },

    /// Text string is not UTF-8
    #[error("invalid UTF-8 in text string at offset {offset}")]
    #[diagnostic(code(arbor::cbor::utf8))]
    InvalidUtf8 {
        /// Offset of the string payload
        offset: usize,
    },

    /// Integer outside the signed 64-bit data model range
    #[error("integer out of range at offset {offset}")]
    #[diagnostic(code(arbor::cbor::integer_range))]
    IntegerRange {
        /// Offset of the initial byte
        offset: usize,
    },

    /// Length prefix larger than the remaining input or addressable memory
    #[error("length {len} exceeds remaining input at offset {offset}")]
    #[diagnostic(code(arbor::cbor::length))]
    Length {
        /// Declared length
        len: u64,
        /// Offset of the initial byte
        offset: usize,
    },

    /// Tag 42 payload is not a 0x00-prefixed binary CID
    #[error("invalid CID link: {0}")]
    #[diagnostic(code(arbor::cbor::link))]
    InvalidLink(String),

    /// Bytes left after the top-level item
    #[error("{0} trailing bytes after top-level item")]
    #[diagnostic(code(arbor::cbor::trailing))]
    TrailingBytes(usize),

    /// Nesting exceeds the decoder limit
    #[error("nesting deeper than {0} levels")]
    #[diagnostic(code(arbor::cbor::depth))]
    DepthLimit(usize),
}

impl From<FormatError> for DecodeError {
    fn from(e: FormatError) -> Self {
        DecodeError::InvalidLink(e.to_string())
    }
}

/// Failure while pulling framed data off a byte stream
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum StreamError {
    /// Underlying reader failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Bytes were read but are not well-formed
    #[error(transparent)]
    #[diagnostic(transparent)]
    Format(#[from] FormatError),
}

/// Parse failure for protocol string types (TIDs, DIDs, datetimes)
///
/// `spec` is the final path segment of the type's page on atproto.com/specs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, miette::Diagnostic)]
#[error("invalid {spec} `{source}`: {kind}")]
#[diagnostic(url("https://atproto.com/specs/{spec}"))]
pub struct StrError {
    /// Which string type failed to parse
    pub spec: SmolStr,
    /// The rejected input
    #[source_code]
    pub source: String,
    /// What was wrong with it
    #[source]
    #[diagnostic_source]
    pub kind: StrParseKind,
}

impl StrError {
    /// Build an error for the string type `spec`
    pub fn new(spec: &'static str, source: impl Into<String>, kind: StrParseKind) -> Self {
        Self {
            spec: SmolStr::new_static(spec),
            source: source.into(),
            kind,
        }
    }
}

/// Reason a protocol string was rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, miette::Diagnostic)]
pub enum StrParseKind {
    /// Longer than the format allows
    #[error("too long (allowed: {max}, actual: {actual})")]
    #[diagnostic(code(arbor::string::too_long))]
    TooLong {
        /// Maximum length
        max: usize,
        /// Input length
        actual: usize,
    },

    /// Shorter than the format allows
    #[error("too short (allowed: {min}, actual: {actual})")]
    #[diagnostic(code(arbor::string::too_short))]
    TooShort {
        /// Minimum length
        min: usize,
        /// Input length
        actual: usize,
    },

    /// Did not match the format's grammar
    #[error("does not match the expected syntax: {message}")]
    #[diagnostic(code(arbor::string::syntax))]
    Syntax {
        /// Which rule failed
        message: SmolStr,
    },
}
