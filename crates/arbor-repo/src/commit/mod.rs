//! Commit structures and signature verification for AT Protocol repositories.
//!
//! A commit is a small DAG-CBOR map pointing at the MST root:
//!
//! ```text
//! { "did": text, "version": 3, "data": CID, "rev": TID, "prev": CID | null, "sig": bytes }
//! ```
//!
//! The signature covers the SHA-256 digest of the same map without `"sig"`.
//! The commit CID is computed over the signed bytes.

pub mod firehose;

use std::convert::Infallible;

use arbor_common::{Cid, DagCbor, Did, Tid};
use bytes::Bytes;
use sha2::{Digest, Sha256};

use crate::error::{BoxError, CommitError, Result};

/// Commit version written by this crate
pub const COMMIT_VERSION: i64 = 3;

/// Repository commit object
///
/// Stored as a block in CAR files, identified by its CID.
///
/// **Version compatibility**: v2 and v3 commits differ only in whether `prev`
/// may be omitted. Both are read; `prev` is always written, as an explicit
/// null when absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    /// Repository DID
    pub did: Did,

    /// Commit version (2 or 3)
    pub version: i64,

    /// MST root CID
    pub data: Cid,

    /// Revision TID
    pub rev: Tid,

    /// Previous commit CID
    pub prev: Option<Cid>,

    /// Signature bytes, `None` until signed
    pub sig: Option<Bytes>,
}

impl Commit {
    /// Create new unsigned commit (version = 3)
    pub fn new_unsigned(did: Did, data: Cid, rev: Tid, prev: Option<Cid>) -> Self {
        Self {
            did,
            version: COMMIT_VERSION,
            data,
            rev,
            prev,
            sig: None,
        }
    }

    /// Sign this commit
    ///
    /// The signer receives the SHA-256 digest of the unsigned bytes. Any
    /// existing signature is replaced.
    pub fn sign(mut self, signer: &impl CommitSigner) -> Result<Self> {
        let digest = self.unsigned_digest();
        let sig = signer.sign_digest(&digest).map_err(CommitError::Signer)?;
        self.sig = Some(sig);
        Ok(self)
    }

    /// Get the repository DID
    pub fn did(&self) -> &Did {
        &self.did
    }

    /// Get the MST root CID
    pub fn data(&self) -> &Cid {
        &self.data
    }

    /// Get the revision TID
    pub fn rev(&self) -> &Tid {
        &self.rev
    }

    /// Get the previous commit CID
    pub fn prev(&self) -> Option<&Cid> {
        self.prev.as_ref()
    }

    /// Get the signature bytes
    pub fn sig(&self) -> Option<&Bytes> {
        self.sig.as_ref()
    }

    fn to_dag_cbor(&self, with_sig: bool) -> DagCbor {
        let mut fields = vec![
            ("did", DagCbor::from(self.did.as_str())),
            ("version", DagCbor::Integer(self.version)),
            ("data", DagCbor::Link(self.data)),
            ("rev", DagCbor::from(self.rev.as_str())),
            ("prev", DagCbor::from(self.prev)),
        ];
        if with_sig {
            if let Some(sig) = &self.sig {
                fields.push(("sig", DagCbor::Bytes(sig.clone())));
            }
        }
        DagCbor::map(fields)
    }

    /// Commit bytes without the signature (what gets signed)
    pub fn unsigned_bytes(&self) -> Vec<u8> {
        self.to_dag_cbor(false).to_vec()
    }

    /// SHA-256 digest of [`Self::unsigned_bytes`]
    pub fn unsigned_digest(&self) -> [u8; 32] {
        Sha256::digest(self.unsigned_bytes()).into()
    }

    /// Serialize to DAG-CBOR, including the signature if present
    pub fn to_cbor(&self) -> Vec<u8> {
        self.to_dag_cbor(true).to_vec()
    }

    /// Deserialize from DAG-CBOR
    pub fn from_cbor(data: &[u8]) -> Result<Self> {
        let value = DagCbor::from_slice(data)?;
        Ok(Self::from_dag_cbor(&value)?)
    }

    fn from_dag_cbor(value: &DagCbor) -> std::result::Result<Self, CommitError> {
        let map = value.as_map().ok_or(CommitError::InvalidField("commit"))?;
        let field = |name: &'static str| map.get(name).ok_or(CommitError::InvalidField(name));

        let version = field("version")?
            .as_integer()
            .ok_or(CommitError::InvalidField("version"))?;
        if version != 2 && version != 3 {
            return Err(CommitError::InvalidVersion(version));
        }
        let did = field("did")?
            .as_str()
            .and_then(|s| Did::new(s).ok())
            .ok_or(CommitError::InvalidField("did"))?;
        let data = *field("data")?
            .as_link()
            .ok_or(CommitError::InvalidField("data"))?;
        let rev = field("rev")?
            .as_str()
            .and_then(|s| Tid::new(s).ok())
            .ok_or(CommitError::InvalidField("rev"))?;
        let prev = match map.get("prev") {
            None if version == 2 => None,
            None => return Err(CommitError::InvalidField("prev")),
            Some(DagCbor::Null) => None,
            Some(DagCbor::Link(cid)) => Some(*cid),
            Some(_) => return Err(CommitError::InvalidField("prev")),
        };
        let sig = match map.get("sig") {
            None => None,
            Some(DagCbor::Bytes(sig)) => Some(sig.clone()),
            Some(_) => return Err(CommitError::InvalidField("sig")),
        };

        Ok(Self {
            did,
            version,
            data,
            rev,
            prev,
            sig,
        })
    }

    /// Compute CID of this commit (over the signed bytes)
    pub fn cid(&self) -> Cid {
        Cid::compute(&self.to_cbor())
    }

    /// Verify the signature against a public key
    pub fn verify(&self, key: &impl CommitVerifier) -> std::result::Result<(), CommitError> {
        let sig = self.sig.as_ref().ok_or(CommitError::Unsigned)?;
        key.verify_digest(&self.unsigned_digest(), sig)
    }
}

/// Produces raw signatures over a commit digest
///
/// Implemented for `p256::ecdsa::SigningKey` and `k256::ecdsa::SigningKey`
/// (64-byte compact, low-S signatures) and for closures via [`signer_fn`].
pub trait CommitSigner {
    /// Sign a 32-byte SHA-256 digest
    fn sign_digest(&self, digest: &[u8; 32]) -> std::result::Result<Bytes, BoxError>;
}

impl<T: CommitSigner + ?Sized> CommitSigner for &T {
    fn sign_digest(&self, digest: &[u8; 32]) -> std::result::Result<Bytes, BoxError> {
        (**self).sign_digest(digest)
    }
}

// P-256 implementation
impl CommitSigner for p256::ecdsa::SigningKey {
    fn sign_digest(&self, digest: &[u8; 32]) -> std::result::Result<Bytes, BoxError> {
        use p256::ecdsa::Signature;
        use p256::ecdsa::signature::hazmat::PrehashSigner;
        let sig: Signature = self.sign_prehash(digest)?;
        let sig = sig.normalize_s().unwrap_or(sig);
        Ok(Bytes::copy_from_slice(&sig.to_bytes()))
    }
}

// K-256 (secp256k1) implementation
impl CommitSigner for k256::ecdsa::SigningKey {
    fn sign_digest(&self, digest: &[u8; 32]) -> std::result::Result<Bytes, BoxError> {
        use k256::ecdsa::Signature;
        use k256::ecdsa::signature::hazmat::PrehashSigner;
        let sig: Signature = self.sign_prehash(digest)?;
        let sig = sig.normalize_s().unwrap_or(sig);
        Ok(Bytes::copy_from_slice(&sig.to_bytes()))
    }
}

/// Signer backed by a closure, see [`signer_fn`]
#[derive(Clone, Copy)]
pub struct SignerFn<F>(F);

impl<F> std::fmt::Debug for SignerFn<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SignerFn")
    }
}

/// Wrap a `digest -> signature` closure as a [`CommitSigner`]
///
/// For HSM or remote signers, and for tests:
///
/// ```rust
/// use arbor_repo::commit::signer_fn;
///
/// let identity = signer_fn(|digest: &[u8]| Ok::<_, std::convert::Infallible>(digest.to_vec()));
/// # let _ = identity;
/// ```
pub fn signer_fn<F, E>(f: F) -> SignerFn<F>
where
    F: Fn(&[u8]) -> std::result::Result<Vec<u8>, E>,
    E: Into<BoxError>,
{
    SignerFn(f)
}

impl<F, E> CommitSigner for SignerFn<F>
where
    F: Fn(&[u8]) -> std::result::Result<Vec<u8>, E>,
    E: Into<BoxError>,
{
    fn sign_digest(&self, digest: &[u8; 32]) -> std::result::Result<Bytes, BoxError> {
        (self.0)(digest).map(Bytes::from).map_err(Into::into)
    }
}

/// Signer that returns the digest itself as the "signature"
///
/// Only useful where signatures are never checked.
pub fn identity_signer() -> SignerFn<fn(&[u8]) -> std::result::Result<Vec<u8>, Infallible>> {
    SignerFn(|digest: &[u8]| Ok(digest.to_vec()))
}

/// Checks commit signatures against a public key
pub trait CommitVerifier {
    /// Verify a raw signature over a 32-byte SHA-256 digest
    fn verify_digest(&self, digest: &[u8; 32], sig: &[u8]) -> std::result::Result<(), CommitError>;
}

impl CommitVerifier for p256::ecdsa::VerifyingKey {
    fn verify_digest(&self, digest: &[u8; 32], sig: &[u8]) -> std::result::Result<(), CommitError> {
        use p256::ecdsa::Signature;
        use p256::ecdsa::signature::hazmat::PrehashVerifier;
        let sig = Signature::from_slice(sig)
            .map_err(|e| CommitError::InvalidSignature(e.to_string()))?;
        self.verify_prehash(digest, &sig)
            .map_err(|_| CommitError::SignatureVerificationFailed)
    }
}

impl CommitVerifier for k256::ecdsa::VerifyingKey {
    fn verify_digest(&self, digest: &[u8; 32], sig: &[u8]) -> std::result::Result<(), CommitError> {
        use k256::ecdsa::Signature;
        use k256::ecdsa::signature::hazmat::PrehashVerifier;
        let sig = Signature::from_slice(sig)
            .map_err(|e| CommitError::InvalidSignature(e.to_string()))?;
        self.verify_prehash(digest, &sig)
            .map_err(|_| CommitError::SignatureVerificationFailed)
    }
}
