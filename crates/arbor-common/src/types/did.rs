use crate::error::{StrError, StrParseKind};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, de::Error};
use smol_str::SmolStr;
use std::fmt;
use std::sync::LazyLock;
use std::{ops::Deref, str::FromStr};

/// A [Decentralized Identifier], the stable identity a repository belongs to.
///
/// [Decentralized Identifier]: https://atproto.com/specs/did
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Hash)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Did(SmolStr);

/// Regex for DID validation per AT Protocol spec.
///
/// Allows `%` inside the identifier but not at the end; percent-escapes are
/// not checked for well-formedness.
pub static DID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^did:[a-z]+:[a-zA-Z0-9._:%-]*[a-zA-Z0-9._-]$").unwrap());

const MAX_LEN: usize = 2048;

impl Did {
    /// Fallible constructor, validates
    pub fn new(did: impl AsRef<str>) -> Result<Self, StrError> {
        let did = did.as_ref();
        if did.len() > MAX_LEN {
            Err(StrError::new(
                "did",
                did,
                StrParseKind::TooLong {
                    max: MAX_LEN,
                    actual: did.len(),
                },
            ))
        } else if !DID_REGEX.is_match(did) {
            Err(StrError::new(
                "did",
                did,
                StrParseKind::Syntax {
                    message: SmolStr::new_static("expected did:<method>:<identifier>"),
                },
            ))
        } else {
            Ok(Self(SmolStr::new(did)))
        }
    }

    /// DID method, e.g. `plc` or `web`
    pub fn method(&self) -> &str {
        self.0
            .strip_prefix("did:")
            .and_then(|rest| rest.split(':').next())
            .unwrap_or_default()
    }

    /// Returns the DID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Did {
    type Err = StrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for Did {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = SmolStr::deserialize(deserializer)?;
        Self::new(value).map_err(D::Error::custom)
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Did> for SmolStr {
    fn from(value: Did) -> Self {
        value.0
    }
}

impl AsRef<str> for Did {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl Deref for Did {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_dids() {
        for did in [
            "did:plc:test123",
            "did:plc:z72i7hdynmk6r22z27h6tvur",
            "did:web:example.com",
            "did:web:localhost%3A8080",
            "did:method:val:two",
        ] {
            assert!(Did::new(did).is_ok(), "{}", did);
        }
    }

    #[test]
    fn invalid_dids() {
        for did in [
            "",
            "did",
            "did:",
            "did:plc:",
            "did:PLC:abc",
            "did:plc:abc:",
            "did:plc:abc%",
            "plc:abc",
            "did:plc:a b",
        ] {
            assert!(Did::new(did).is_err(), "{}", did);
        }
    }

    #[test]
    fn too_long() {
        let long = format!("did:plc:{}", "a".repeat(2048));
        assert!(matches!(
            Did::new(&long).unwrap_err().kind,
            StrParseKind::TooLong { max: 2048, .. }
        ));
    }

    #[test]
    fn method() {
        assert_eq!(Did::new("did:plc:abc").unwrap().method(), "plc");
        assert_eq!(Did::new("did:web:example.com").unwrap().method(), "web");
    }
}
