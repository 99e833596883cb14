use serde::{Deserialize, Deserializer, Serialize, de::Error};
use smol_str::{SmolStr, SmolStrBuilder};
use std::fmt;
use std::sync::LazyLock;
use std::{ops::Deref, str::FromStr};

use crate::error::{StrError, StrParseKind};
use regex::Regex;

const S32_CHAR: &[u8; 32] = b"234567abcdefghijklmnopqrstuvwxyz";

/// Bits below the timestamp that hold the clock identifier
const CLOCK_BITS: u32 = 10;
const CLOCK_MASK: u64 = (1 << CLOCK_BITS) - 1;
const TIMESTAMP_MASK: u64 = (1 << 53) - 1;

fn s32_encode(mut i: u64) -> SmolStr {
    let mut chars = [0u8; 13];
    for slot in chars.iter_mut().rev() {
        *slot = S32_CHAR[(i & 0x1F) as usize];
        i >>= 5;
    }
    let mut builder = SmolStrBuilder::new();
    for c in chars {
        builder.push(c as char);
    }
    builder.finish()
}

fn s32_decode(s: &str) -> u64 {
    s.bytes().fold(0u64, |acc, c| {
        let v = S32_CHAR.iter().position(|&x| x == c).unwrap_or(0) as u64;
        (acc << 5) | v
    })
}

static TID_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[234567abcdefghij][234567abcdefghijklmnopqrstuvwxyz]{12}$").unwrap()
});

/// A [Timestamp Identifier].
///
/// 13 characters of sortable base32 over a 64-bit integer: a zero top bit,
/// 53 bits of microseconds since the UNIX epoch, then a 10-bit clock id.
/// String order equals numeric order, so TIDs compare chronologically.
///
/// [Timestamp Identifier]: https://atproto.com/specs/tid
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Hash)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Tid(SmolStr);

impl Tid {
    /// Parses a `TID` from the given string.
    pub fn new(tid: impl AsRef<str>) -> Result<Self, StrError> {
        let tid = tid.as_ref();
        if tid.len() > 13 {
            Err(StrError::new(
                "tid",
                tid,
                StrParseKind::TooLong {
                    max: 13,
                    actual: tid.len(),
                },
            ))
        } else if tid.len() < 13 {
            Err(StrError::new(
                "tid",
                tid,
                StrParseKind::TooShort {
                    min: 13,
                    actual: tid.len(),
                },
            ))
        } else if !TID_REGEX.is_match(tid) {
            Err(StrError::new(
                "tid",
                tid,
                StrParseKind::Syntax {
                    message: SmolStr::new_static("not sortable base32 with a clear top bit"),
                },
            ))
        } else {
            Ok(Self(SmolStr::new_inline(tid)))
        }
    }

    /// Build a TID from a microsecond timestamp and a clock id.
    ///
    /// Both are masked to their field widths.
    pub fn from_parts(timestamp_micros: u64, clock_id: u16) -> Self {
        let value = ((timestamp_micros & TIMESTAMP_MASK) << CLOCK_BITS)
            | (u64::from(clock_id) & CLOCK_MASK);
        Self(s32_encode(value))
    }

    /// TID for a point in time.
    ///
    /// If you have multiple clock sources, `clock_id` distinguishes them; with a
    /// single source just use `0`.
    pub fn from_datetime(clock_id: u16, time: chrono::DateTime<chrono::Utc>) -> Self {
        Self::from_parts(time.timestamp_micros().max(0) as u64, clock_id)
    }

    /// TID for the current time.
    ///
    /// Two calls in the same microsecond return the same value; use a
    /// [`Ticker`] when successive TIDs must differ.
    pub fn now(clock_id: u16) -> Self {
        Self::from_datetime(clock_id, chrono::Utc::now())
    }

    /// The 64-bit integer this TID encodes
    pub fn as_u64(&self) -> u64 {
        s32_decode(&self.0)
    }

    /// Microseconds since the UNIX epoch
    pub fn timestamp_micros(&self) -> u64 {
        self.as_u64() >> CLOCK_BITS
    }

    /// Clock identifier
    pub fn clock_id(&self) -> u16 {
        (self.as_u64() & CLOCK_MASK) as u16
    }

    /// Returns the TID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Source of strictly increasing [`Tid`]s.
///
/// Wall-clock time is only a lower bound: if the clock stalls or steps
/// backwards the ticker keeps counting up from the last value it issued.
#[derive(Debug, Clone)]
pub struct Ticker {
    clock_id: u16,
    last: u64,
}

impl Ticker {
    /// New ticker issuing TIDs tagged with `clock_id` (masked to 10 bits)
    pub fn new(clock_id: u16) -> Self {
        Self {
            clock_id: clock_id & CLOCK_MASK as u16,
            last: 0,
        }
    }

    /// Next TID, strictly greater than everything this ticker issued before
    /// and strictly greater than `prev` when given.
    ///
    /// `None` once the 53-bit timestamp field is exhausted, e.g. when `prev`
    /// is already the largest TID.
    pub fn next(&mut self, prev: Option<&Tid>) -> Option<Tid> {
        let now = chrono::Utc::now().timestamp_micros().max(0) as u64;
        let floor = match prev {
            Some(p) => p.timestamp_micros() + 1,
            None => 0,
        };
        let timestamp = now.max(self.last + 1).max(floor);
        if timestamp > TIMESTAMP_MASK {
            return None;
        }
        self.last = timestamp;
        Some(Tid::from_parts(timestamp, self.clock_id))
    }

    /// Clock id stamped into every TID
    pub fn clock_id(&self) -> u16 {
        self.clock_id
    }
}

impl Default for Ticker {
    fn default() -> Self {
        Self::new(0)
    }
}

impl FromStr for Tid {
    type Err = StrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for Tid {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = SmolStr::deserialize(deserializer)?;
        Self::new(value).map_err(D::Error::custom)
    }
}

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Tid> for String {
    fn from(value: Tid) -> Self {
        value.0.to_string()
    }
}

impl From<Tid> for SmolStr {
    fn from(value: Tid) -> Self {
        value.0
    }
}

impl AsRef<str> for Tid {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl Deref for Tid {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}
