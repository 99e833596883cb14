use chrono::{SecondsFormat, SubsecRound};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error};
use smol_str::SmolStr;
use std::sync::LazyLock;
use std::hash::{Hash, Hasher};
use std::{cmp, fmt, str::FromStr};

use crate::error::{StrError, StrParseKind};
use regex::Regex;

/// Regex for ISO 8601 datetime validation per AT Protocol spec
pub static ISO8601_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9]{4}-[0-9]{2}-[0-9]{2}T[0-9]{2}:[0-9]{2}:[0-9]{2}(\.[0-9]+)?(Z|(\+[0-9]{2}|\-[0-9][1-9]):[0-9]{2})$").unwrap()
});

/// AT Protocol datetime
///
/// Always carries a timezone and whole-second precision at minimum. Values
/// produced here are UTC with microseconds, e.g. `"2024-05-01T12:00:00.123456Z"`.
/// The serialized form is preserved from parsing so it round-trips exactly.
#[derive(Clone, Debug, Eq)]
pub struct Datetime {
    serialized: SmolStr,
    dt: chrono::DateTime<chrono::FixedOffset>,
}

impl PartialEq for Datetime {
    fn eq(&self, other: &Self) -> bool {
        self.dt == other.dt
    }
}

impl Hash for Datetime {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.dt.hash(state);
    }
}

impl Ord for Datetime {
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        self.dt.cmp(&other.dt)
    }
}

impl PartialOrd for Datetime {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Datetime {
    /// Current date and time in UTC, microsecond precision
    pub fn now() -> Self {
        Self::new(chrono::Utc::now().fixed_offset())
    }

    /// Wrap an existing chrono value, truncated to microseconds
    pub fn new(dt: chrono::DateTime<chrono::FixedOffset>) -> Self {
        let dt = dt.trunc_subsecs(6);
        let serialized = SmolStr::new(dt.to_rfc3339_opts(SecondsFormat::Micros, true));
        Self { serialized, dt }
    }

    /// Parse and validate, keeping the original text
    pub fn parse(s: impl AsRef<str>) -> Result<Self, StrError> {
        let s = s.as_ref();
        let syntax = |message: &'static str| {
            StrError::new(
                "lexicon#datetime",
                s,
                StrParseKind::Syntax {
                    message: SmolStr::new_static(message),
                },
            )
        };
        if !ISO8601_REGEX.is_match(s) {
            return Err(syntax("not an RFC 3339 datetime with timezone"));
        }
        let dt = chrono::DateTime::parse_from_rfc3339(s)
            .map_err(|_| syntax("date or time out of range"))?;
        Ok(Self {
            serialized: SmolStr::new(s),
            dt,
        })
    }

    /// Underlying chrono value
    pub fn as_chrono(&self) -> &chrono::DateTime<chrono::FixedOffset> {
        &self.dt
    }

    /// Serialized form
    pub fn as_str(&self) -> &str {
        &self.serialized
    }
}

impl FromStr for Datetime {
    type Err = StrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Datetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialized)
    }
}

impl Serialize for Datetime {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.serialized)
    }
}

impl<'de> Deserialize<'de> for Datetime {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = SmolStr::deserialize(deserializer)?;
        Self::parse(value).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_has_micros_and_z() {
        let now = Datetime::now();
        let s = now.as_str();
        assert!(s.ends_with('Z'), "{}", s);
        let frac = s.split('.').nth(1).unwrap();
        assert_eq!(frac.len(), "123456Z".len());
        assert_eq!(Datetime::parse(s).unwrap(), now);
    }

    #[test]
    fn new_drops_sub_microsecond_digits() {
        let dt = chrono::DateTime::parse_from_rfc3339("2024-05-01T12:00:00.123456789Z").unwrap();
        let value = Datetime::new(dt);
        assert_eq!(value.as_str(), "2024-05-01T12:00:00.123456Z");
        assert_eq!(value.as_chrono().timestamp_subsec_nanos(), 123_456_000);

        let json = serde_json::to_string(&value).unwrap();
        let back: Datetime = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn parse_preserves_text() {
        for s in [
            "1985-04-12T23:20:50.123Z",
            "2023-01-01T00:00:00+00:00",
            "2023-01-01T00:00:00.000000Z",
        ] {
            assert_eq!(Datetime::parse(s).unwrap().as_str(), s);
        }
    }

    #[test]
    fn parse_rejects_bad_input() {
        for s in [
            "2023-01-01",
            "2023-01-01T00:00:00",
            "2023-01-01t00:00:00Z",
            "2023-13-01T00:00:00Z",
            "not a date",
        ] {
            assert!(Datetime::parse(s).is_err(), "{}", s);
        }
    }

    #[test]
    fn ordering_ignores_offset_spelling() {
        let a = Datetime::parse("2023-01-01T01:00:00+01:00").unwrap();
        let b = Datetime::parse("2023-01-01T00:00:00Z").unwrap();
        assert_eq!(a, b);
        let c = Datetime::parse("2023-01-01T00:00:01Z").unwrap();
        assert!(c > b);
    }
}
