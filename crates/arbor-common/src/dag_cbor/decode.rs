use std::cmp::Ordering;
use std::collections::BTreeMap;

use bytes::Bytes;
use smol_str::SmolStr;

use super::{CID_TAG, DagCbor, key_order};
use crate::cid::Cid;
use crate::error::DecodeError;

/// Deepest nesting of arrays, maps and tags the decoder accepts
pub const MAX_DEPTH: usize = 128;

/// Decode one canonical value that occupies all of `data`
pub fn decode(data: &[u8]) -> Result<DagCbor, DecodeError> {
    let mut decoder = Decoder { input: data, pos: 0 };
    let value = decoder.value(0)?;
    if decoder.pos != data.len() {
        return Err(DecodeError::TrailingBytes(data.len() - decoder.pos));
    }
    Ok(value)
}

struct Decoder<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn remaining(&self) -> usize {
        self.input.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < n {
            return Err(DecodeError::UnexpectedEof {
                offset: self.input.len(),
            });
        }
        let input = self.input;
        let slice = &input[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn byte(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    /// Read an initial byte and its argument, enforcing the shortest width.
    ///
    /// Returns `(major, info, argument, offset)`. Major type 7 items return
    /// their additional info unchanged as the argument.
    fn header(&mut self) -> Result<(u8, u8, u64, usize), DecodeError> {
        let offset = self.pos;
        let initial = self.byte()?;
        let major = initial >> 5;
        let info = initial & 0x1f;
        if major == 7 {
            return Ok((major, info, u64::from(info), offset));
        }
        let (value, min) = match info {
            0..=23 => return Ok((major, info, u64::from(info), offset)),
            24 => (u64::from(self.byte()?), 24),
            25 => (u64::from(u16::from_be_bytes(self.array()?)), 0x100),
            26 => (u64::from(u32::from_be_bytes(self.array()?)), 0x1_0000),
            27 => (u64::from_be_bytes(self.array()?), 0x1_0000_0000),
            _ => {
                return Err(DecodeError::Unsupported {
                    major,
                    info,
                    offset,
                });
            }
        };
        if value < min {
            return Err(DecodeError::NonMinimal { offset });
        }
        Ok((major, info, value, offset))
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.take(N)?);
        Ok(buf)
    }

    fn length(&self, len: u64, offset: usize) -> Result<usize, DecodeError> {
        match usize::try_from(len) {
            Ok(n) if n <= self.remaining() => Ok(n),
            _ => Err(DecodeError::Length { len, offset }),
        }
    }

    fn text(&mut self, len: u64, offset: usize) -> Result<SmolStr, DecodeError> {
        let n = self.length(len, offset)?;
        let start = self.pos;
        let raw = self.take(n)?;
        std::str::from_utf8(raw)
            .map(SmolStr::new)
            .map_err(|_| DecodeError::InvalidUtf8 { offset: start })
    }

    fn value(&mut self, depth: usize) -> Result<DagCbor, DecodeError> {
        let (major, info, arg, offset) = self.header()?;
        match major {
            0 => i64::try_from(arg)
                .map(DagCbor::Integer)
                .map_err(|_| DecodeError::IntegerRange { offset }),
            1 => i64::try_from(arg)
                .map(|n| DagCbor::Integer(-1 - n))
                .map_err(|_| DecodeError::IntegerRange { offset }),
            2 => {
                let n = self.length(arg, offset)?;
                Ok(DagCbor::Bytes(Bytes::copy_from_slice(self.take(n)?)))
            }
            3 => self.text(arg, offset).map(DagCbor::Text),
            4 => {
                let depth = self.descend(depth)?;
                // every element needs at least one byte
                let n = self.length(arg, offset)?;
                let mut items = Vec::with_capacity(n);
                for _ in 0..n {
                    items.push(self.value(depth)?);
                }
                Ok(DagCbor::Array(items))
            }
            5 => {
                let depth = self.descend(depth)?;
                let n = self.length(arg, offset)?;
                let mut map = BTreeMap::new();
                let mut previous: Option<SmolStr> = None;
                for _ in 0..n {
                    let (key_major, _, key_len, key_offset) = self.header()?;
                    if key_major != 3 {
                        return Err(DecodeError::MapKeyNotText { offset: key_offset });
                    }
                    let key = self.text(key_len, key_offset)?;
                    if let Some(prev) = &previous {
                        if key_order(prev, &key) != Ordering::Less {
                            return Err(DecodeError::MapKeyOrder {
                                key: key.to_string(),
                            });
                        }
                    }
                    let item = self.value(depth)?;
                    previous = Some(key.clone());
                    map.insert(key, item);
                }
                Ok(DagCbor::Map(map))
            }
            6 => {
                if arg != CID_TAG {
                    return Err(DecodeError::UnsupportedTag(arg));
                }
                self.descend(depth)?;
                self.link()
            }
            _ => match info {
                20 => Ok(DagCbor::Bool(false)),
                21 => Ok(DagCbor::Bool(true)),
                22 => Ok(DagCbor::Null),
                _ => Err(DecodeError::Unsupported {
                    major,
                    info,
                    offset,
                }),
            },
        }
    }

    fn descend(&self, depth: usize) -> Result<usize, DecodeError> {
        if depth >= MAX_DEPTH {
            return Err(DecodeError::DepthLimit(MAX_DEPTH));
        }
        Ok(depth + 1)
    }

    /// Tag 42 payload: a byte string holding `0x00 ‖ binary CID`
    fn link(&mut self) -> Result<DagCbor, DecodeError> {
        let (major, _, len, offset) = self.header()?;
        if major != 2 {
            return Err(DecodeError::InvalidLink(format!(
                "expected byte string, found major type {}",
                major
            )));
        }
        let n = self.length(len, offset)?;
        let payload = self.take(n)?;
        match payload.split_first() {
            Some((0x00, raw)) => Ok(DagCbor::Link(Cid::from_bytes(raw)?)),
            _ => Err(DecodeError::InvalidLink(
                "missing 0x00 multibase prefix".into(),
            )),
        }
    }
}
