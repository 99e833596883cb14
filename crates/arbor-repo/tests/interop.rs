//! Interoperability tests using vectors from atproto-interop-tests and
//! cross-checks against the IPLD ecosystem crates
//!
//! See: https://github.com/bluesky-social/atproto-interop-tests/tree/main/mst

use std::collections::BTreeMap;

use arbor_common::{Cid, DagCbor, Did, Tid};
use arbor_repo::car::parse_car_bytes;
use arbor_repo::commit::identity_signer;
use arbor_repo::mst::util::{common_prefix_len, layer_for_key};
use arbor_repo::mst::{Mst, NodeData};
use arbor_repo::{Commit, RepoOptions, Repository};
use ipld_core::ipld::Ipld;
use n0_future::stream::StreamExt;
use rand::Rng;
use rand::seq::SliceRandom;
use tokio::io::AsyncWriteExt;

/// Test helper: Generate a random key at a specific layer
///
/// Generates keys like "A0/123456" that hash to a specific MST layer.
fn gen_key_at_layer(letter: char, layer: usize) -> String {
    let mut rng = rand::thread_rng();
    loop {
        let num: u32 = rng.gen_range(0..1_000_000);
        let key = format!("{}{}/{:06}", letter, layer, num);
        if layer_for_key(&key) == layer {
            return key;
        }
    }
}

fn leaf_cid() -> Cid {
    "bafyreie5cvv4h45feadgeuwhbcutmh6t2ceseocckahdoe6uat64zmz454"
        .parse()
        .unwrap()
}

fn test_cid(n: u32) -> Cid {
    Cid::compute(&n.to_le_bytes())
}

#[test]
fn test_common_prefix_interop() {
    let cases: &[(&str, &str, usize)] = &[
        ("", "", 0),
        ("abc", "abc", 3),
        ("", "abc", 0),
        ("abc", "", 0),
        ("ab", "abc", 2),
        ("abc", "ab", 2),
        ("abcde", "abc", 3),
        ("abc", "abcde", 3),
        ("abcde", "abc1", 3),
        ("abcde", "abb", 2),
        ("abcde", "qbb", 0),
        ("abc", "abc\u{0}", 3),
        ("abc\u{0}", "abc", 3),
    ];
    for &(left, right, len) in cases {
        assert_eq!(
            common_prefix_len(left, right),
            len,
            "common_prefix_len({:?}, {:?})",
            left,
            right
        );
    }
}

#[test]
fn test_layer_for_key_interop() {
    let cases: &[(&str, usize)] = &[
        ("2653ae71", 0),
        ("blue", 1),
        ("app.bsky.feed.post/454397e440ec", 4),
        ("app.bsky.feed.post/9adeb165882c", 8),
    ];
    for &(key, height) in cases {
        assert_eq!(layer_for_key(key), height, "layer_for_key({:?})", key);
    }
}

#[test]
fn test_empty_tree_root() {
    let mut mst = Mst::new();
    assert_eq!(
        mst.root_cid().to_string(),
        "bafyreie5737gdxlw5i64vzichcalba3z2v5n6icifvx5xytvske7mr3hpm"
    );
}

#[test]
fn test_two_sibling_keys() {
    // Two keys at layer 0
    let mut mst = Mst::new();
    mst.insert("com.example.record/3jqfcqzm3ft2j", leaf_cid());
    mst.insert("com.example.record/3jqfcqzm3fz2j", leaf_cid());
    assert_eq!(
        mst.root_cid().to_string(),
        "bafyreidfcktqnfmykz2ps3dbul35pepleq7kvv526g47xahuz3rqtptmky"
    );
}

#[test]
fn test_generated_keys_at_specific_layers() {
    let keys: Vec<String> = (0..=5).map(|layer| gen_key_at_layer('T', layer)).collect();

    let mut mst = Mst::new();
    for (i, key) in keys.iter().enumerate() {
        mst.insert(key, test_cid(i as u32));
    }
    assert_eq!(mst.layer(), 5);
    for (i, key) in keys.iter().enumerate() {
        assert_eq!(mst.get(key), Some(test_cid(i as u32)));
    }

    // Removing the only top-layer key trims the root back down
    mst.remove(&keys[5]);
    assert_eq!(mst.layer(), 4);
}

#[test]
fn test_determinism_with_shuffled_keys() {
    let mut rng = rand::thread_rng();
    let keys: Vec<String> = (0..300)
        .map(|i| format!("com.example.record/{:08x}", i * 7919))
        .collect();

    let mut forward = Mst::new();
    for (i, key) in keys.iter().enumerate() {
        forward.insert(key, test_cid(i as u32));
    }

    for _ in 0..5 {
        let mut order: Vec<usize> = (0..keys.len()).collect();
        order.shuffle(&mut rng);
        let mut shuffled = Mst::new();
        for i in order {
            shuffled.insert(&keys[i], test_cid(i as u32));
        }
        assert_eq!(shuffled.root_cid(), forward.root_cid());
    }

    let mut bulk = Mst::from_entries(
        keys.iter()
            .enumerate()
            .map(|(i, k)| (k.as_str(), test_cid(i as u32))),
    );
    assert_eq!(bulk.root_cid(), forward.root_cid());
}

#[test]
fn test_delete_half_matches_fresh_build() {
    let keys: Vec<String> = (0..200).map(|i| format!("app.bsky.feed.like/{:05}", i)).collect();
    let mut mst = Mst::new();
    for (i, key) in keys.iter().enumerate() {
        mst.insert(key, test_cid(i as u32));
    }
    for key in keys.iter().step_by(2) {
        assert!(mst.remove(key).is_some());
    }

    let mut fresh = Mst::new();
    for (i, key) in keys.iter().enumerate().skip(1).step_by(2) {
        fresh.insert(key, test_cid(i as u32));
    }
    assert_eq!(mst.root_cid(), fresh.root_cid());
    assert_eq!(mst.len(), 100);
}

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

#[test]
fn test_node_bytes_match_serde_ipld_dagcbor() {
    let mut mst = Mst::new();
    for i in 0..50u32 {
        mst.insert(&format!("app.bsky.feed.post/{:04}", i), test_cid(i));
    }
    for (cid, bytes) in mst.blocks() {
        let ipld: Ipld = serde_ipld_dagcbor::from_slice(&bytes).unwrap();
        let theirs = serde_ipld_dagcbor::to_vec(&ipld).unwrap();
        assert_eq!(theirs, bytes.to_vec());
        let node = NodeData::decode(&bytes).unwrap();
        assert_eq!(Cid::compute(&node.encode()), cid);
    }
}

#[test]
fn test_commit_bytes_match_serde_ipld_dagcbor() {
    let key = p256::ecdsa::SigningKey::from_slice(&[5u8; 32]).unwrap();
    let commit = Commit::new_unsigned(
        Did::new("did:plc:test123").unwrap(),
        leaf_cid(),
        Tid::new("3jzfcijpj2z2a").unwrap(),
        None,
    )
    .sign(&key)
    .unwrap();

    let mut map = BTreeMap::new();
    map.insert("did".to_string(), Ipld::String("did:plc:test123".into()));
    map.insert("version".to_string(), Ipld::Integer(3));
    map.insert("data".to_string(), Ipld::Link(leaf_cid().to_ipld().unwrap()));
    map.insert("rev".to_string(), Ipld::String("3jzfcijpj2z2a".into()));
    map.insert("prev".to_string(), Ipld::Null);
    map.insert(
        "sig".to_string(),
        Ipld::Bytes(commit.sig().unwrap().to_vec()),
    );
    let theirs = serde_ipld_dagcbor::to_vec(&Ipld::Map(map)).unwrap();
    assert_eq!(hex::encode(commit.to_cbor()), hex::encode(&theirs));

    let value = DagCbor::from_slice(&commit.to_cbor()).unwrap();
    assert_eq!(to_ipld(&value), serde_ipld_dagcbor::from_slice::<Ipld>(&theirs).unwrap());
}

fn sample_repo() -> Repository {
    let mut repo = Repository::create_for_new_user(
        Did::new("did:plc:test123").unwrap(),
        &identity_signer(),
    )
    .unwrap();
    for i in 0..25 {
        repo.create_record(
            &format!("app.bsky.feed.post/3l{:011}", i),
            &DagCbor::map([
                ("$type", DagCbor::from("app.bsky.feed.post")),
                ("text", DagCbor::from(format!("post number {}", i))),
            ]),
        )
        .unwrap();
    }
    repo.commit(&identity_signer()).unwrap();
    repo
}

#[tokio::test]
async fn test_iroh_car_reads_our_export() {
    let repo = sample_repo();
    let car = repo.write_car(Vec::new()).unwrap();
    let ours = parse_car_bytes(&car).unwrap();

    let reader = iroh_car::CarReader::new(&car[..]).await.unwrap();
    assert_eq!(
        reader.header().roots(),
        &[repo.commit_cid().unwrap().to_ipld().unwrap()]
    );

    let stream = reader.stream();
    n0_future::pin!(stream);
    let mut count = 0;
    while let Some(result) = stream.next().await {
        let (cid, data) = result.unwrap();
        let cid = Cid::from_ipld(&cid).unwrap();
        assert_eq!(ours.blocks[&cid].as_ref(), &data[..]);
        count += 1;
    }
    assert_eq!(count, ours.blocks.len());
}

#[tokio::test]
async fn test_we_read_iroh_car_output() {
    let repo = sample_repo();
    let ours = parse_car_bytes(&repo.write_car(Vec::new()).unwrap()).unwrap();

    let mut buf = Vec::new();
    let header = iroh_car::CarHeader::new_v1(vec![ours.root.to_ipld().unwrap()]);
    let mut writer = iroh_car::CarWriter::new(header, &mut buf);
    // commit first, then the rest in CID order
    writer
        .write(ours.root.to_ipld().unwrap(), &ours.blocks[&ours.root])
        .await
        .unwrap();
    for (cid, data) in ours.blocks.iter().filter(|(cid, _)| **cid != ours.root) {
        writer.write(cid.to_ipld().unwrap(), data).await.unwrap();
    }
    writer.finish().await.unwrap();
    buf.flush().await.unwrap();

    let copy = Repository::read_from_car(&buf[..], RepoOptions::default()).unwrap();
    assert_eq!(copy.root_cid(), repo.root_cid());
    assert_eq!(copy.list_records(), repo.list_records());
}

#[test]
fn test_firehose_blocks_are_valid_car() {
    let mut repo = sample_repo();
    repo.update_record(
        "app.bsky.feed.post/3l00000000003",
        &DagCbor::map([("text", DagCbor::from("edited"))]),
    )
    .unwrap();
    let event = repo.commit(&identity_signer()).unwrap();

    let parsed = event.parse_blocks().unwrap();
    assert_eq!(parsed.root, event.commit);
    let (_, commit) = parsed.commit().unwrap();
    assert_eq!(Some(*commit.data()), repo.root_cid());

    // new root node travels with the event
    assert!(parsed.blocks.contains_key(commit.data()));
    let record_cid = event.ops[0].cid.unwrap();
    assert_eq!(
        parsed.blocks[&record_cid],
        repo.get_record("app.bsky.feed.post/3l00000000003")
            .unwrap()
            .unwrap()
    );

    // only the changed path, never more nodes than the tree has
    let (nodes, records) = parsed.classify();
    assert!(!nodes.is_empty());
    assert!(nodes.len() <= repo.stats().node_count);
    assert_eq!(records.len(), 1);
}
