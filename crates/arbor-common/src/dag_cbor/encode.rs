use super::{CID_TAG, DagCbor, key_order};

const MAJOR_UNSIGNED: u8 = 0;
const MAJOR_NEGATIVE: u8 = 1;
const MAJOR_BYTES: u8 = 2;
const MAJOR_TEXT: u8 = 3;
const MAJOR_ARRAY: u8 = 4;
const MAJOR_MAP: u8 = 5;
const MAJOR_TAG: u8 = 6;

const FALSE: u8 = 0xf4;
const TRUE: u8 = 0xf5;
const NULL: u8 = 0xf6;

/// Canonical encoding of `value`
pub fn encode(value: &DagCbor) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(value, &mut out);
    out
}

/// Append the canonical encoding of `value` to `out`
pub fn encode_into(value: &DagCbor, out: &mut Vec<u8>) {
    match value {
        DagCbor::Null => out.push(NULL),
        DagCbor::Bool(false) => out.push(FALSE),
        DagCbor::Bool(true) => out.push(TRUE),
        DagCbor::Integer(i) if *i >= 0 => write_header(out, MAJOR_UNSIGNED, *i as u64),
        // -1 - n, which for negative n is the bitwise complement
        DagCbor::Integer(i) => write_header(out, MAJOR_NEGATIVE, !(*i) as u64),
        DagCbor::Text(s) => {
            write_header(out, MAJOR_TEXT, s.len() as u64);
            out.extend_from_slice(s.as_bytes());
        }
        DagCbor::Bytes(b) => {
            write_header(out, MAJOR_BYTES, b.len() as u64);
            out.extend_from_slice(b);
        }
        DagCbor::Array(items) => {
            write_header(out, MAJOR_ARRAY, items.len() as u64);
            for item in items {
                encode_into(item, out);
            }
        }
        DagCbor::Map(map) => {
            write_header(out, MAJOR_MAP, map.len() as u64);
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| key_order(a, b));
            for (key, item) in entries {
                write_header(out, MAJOR_TEXT, key.len() as u64);
                out.extend_from_slice(key.as_bytes());
                encode_into(item, out);
            }
        }
        DagCbor::Link(cid) => {
            write_header(out, MAJOR_TAG, CID_TAG);
            let raw = cid.to_bytes();
            write_header(out, MAJOR_BYTES, raw.len() as u64 + 1);
            out.push(0x00);
            out.extend_from_slice(&raw);
        }
    }
}

/// Initial byte plus the argument in its shortest width
fn write_header(out: &mut Vec<u8>, major: u8, value: u64) {
    let major = major << 5;
    if value < 24 {
        out.push(major | value as u8);
    } else if value <= u64::from(u8::MAX) {
        out.push(major | 24);
        out.push(value as u8);
    } else if value <= u64::from(u16::MAX) {
        out.push(major | 25);
        out.extend_from_slice(&(value as u16).to_be_bytes());
    } else if value <= u64::from(u32::MAX) {
        out.push(major | 26);
        out.extend_from_slice(&(value as u32).to_be_bytes());
    } else {
        out.push(major | 27);
        out.extend_from_slice(&value.to_be_bytes());
    }
}
