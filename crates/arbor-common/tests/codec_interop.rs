//! Cross-checks against the IPLD ecosystem crates
//!
//! Our DAG-CBOR bytes must be identical to `serde_ipld_dagcbor`'s and our CIDs
//! identical to the `cid` crate's, or repositories would hash differently
//! depending on which implementation wrote them.

use std::collections::BTreeMap;

use arbor_common::bytes::Bytes;
use arbor_common::{Cid, DagCbor};
use ipld_core::ipld::Ipld;
use multihash::Multihash;
use sha2::{Digest, Sha256};

fn to_ipld(value: &DagCbor) -> Ipld {
    match value {
        DagCbor::Null => Ipld::Null,
        DagCbor::Bool(b) => Ipld::Bool(*b),
        DagCbor::Integer(i) => Ipld::Integer(i128::from(*i)),
        DagCbor::Text(s) => Ipld::String(s.to_string()),
        DagCbor::Bytes(b) => Ipld::Bytes(b.to_vec()),
        DagCbor::Array(items) => Ipld::List(items.iter().map(to_ipld).collect()),
        DagCbor::Map(map) => Ipld::Map(
            map.iter()
                .map(|(k, v)| (k.to_string(), to_ipld(v)))
                .collect::<BTreeMap<_, _>>(),
        ),
        DagCbor::Link(cid) => Ipld::Link(cid.to_ipld().unwrap()),
    }
}

fn sample_record() -> DagCbor {
    DagCbor::map([
        ("$type", DagCbor::from("app.bsky.feed.post")),
        ("text", DagCbor::from("hello world, with a longer body of text")),
        ("createdAt", DagCbor::from("2024-05-01T12:00:00.000Z")),
        ("langs", DagCbor::Array(vec!["en".into(), "fr".into()])),
        ("count", DagCbor::Integer(70000)),
        ("delta", DagCbor::Integer(-300)),
        ("pinned", DagCbor::Bool(true)),
        ("reply", DagCbor::Null),
        ("blob", DagCbor::Bytes(Bytes::from(vec![7u8; 300]))),
        ("embed", DagCbor::map([("ref", DagCbor::Link(Cid::compute(b"image")))])),
    ])
}

#[test]
fn dag_cbor_bytes_match_serde_ipld_dagcbor() {
    let value = sample_record();
    let ours = value.to_vec();
    let theirs = serde_ipld_dagcbor::to_vec(&to_ipld(&value)).unwrap();
    assert_eq!(hex::encode(&ours), hex::encode(&theirs));
}

#[test]
fn serde_ipld_dagcbor_reads_our_bytes() {
    let value = sample_record();
    let decoded: Ipld = serde_ipld_dagcbor::from_slice(&value.to_vec()).unwrap();
    assert_eq!(decoded, to_ipld(&value));
}

#[test]
fn we_read_serde_ipld_dagcbor_bytes() {
    let value = sample_record();
    let theirs = serde_ipld_dagcbor::to_vec(&to_ipld(&value)).unwrap();
    assert_eq!(DagCbor::from_slice(&theirs).unwrap(), value);
}

#[test]
fn cid_matches_cid_crate() {
    let data = b"arbor block";
    let ours = Cid::compute(data);

    let digest = Sha256::digest(data);
    let mh = Multihash::<64>::wrap(0x12, &digest).unwrap();
    let theirs = cid::Cid::new_v1(0x71, mh);

    assert_eq!(ours.to_bytes(), theirs.to_bytes());
    assert_eq!(ours.to_string(), theirs.to_string());
    assert_eq!(ours.to_ipld().unwrap(), theirs);
    assert_eq!(Cid::from_ipld(&theirs).unwrap(), ours);
}

#[test]
fn cid_parses_foreign_text() {
    let text = "bafyreie5737gdxlw5i64vzichcalba3z2v5n6icifvx5xytvske7mr3hpm";
    let theirs: cid::Cid = text.parse().unwrap();
    let ours: Cid = text.parse().unwrap();
    assert_eq!(ours.to_bytes(), theirs.to_bytes());
}

#[test]
fn cid_serde_is_text() {
    let cid = Cid::compute(b"x");
    let json = serde_json::to_string(&cid).unwrap();
    assert_eq!(json, format!("\"{}\"", cid));
    let back: Cid = serde_json::from_str(&json).unwrap();
    assert_eq!(back, cid);
}
