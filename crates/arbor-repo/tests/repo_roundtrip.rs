//! End-to-end repository tests: staged writes, commits, CAR round trips

use arbor_common::{DagCbor, Did};
use arbor_repo::commit::identity_signer;
use arbor_repo::{RepoAction, RepoErrorKind, RepoOptions, Repository};
use rand::seq::SliceRandom;
use smol_str::SmolStr;

fn did() -> Did {
    Did::new("did:plc:test123").unwrap()
}

fn post(text: &str) -> DagCbor {
    DagCbor::map([
        ("$type", DagCbor::from("app.bsky.feed.post")),
        ("text", DagCbor::from(text)),
        ("createdAt", DagCbor::from("2024-01-01T00:00:00.000Z")),
    ])
}

fn fresh_repo() -> Repository {
    Repository::create_for_new_user(did(), &identity_signer()).unwrap()
}

#[test]
fn test_pending_writes_visible_before_commit() {
    let mut repo = fresh_repo();
    let path = "app.bsky.feed.post/3kabc0000001";
    repo.create_record(path, &post("hello")).unwrap();

    assert_eq!(
        repo.get_record(path).unwrap().unwrap().as_ref(),
        post("hello").to_vec().as_slice()
    );
    assert!(repo.list_records().is_empty());
    assert_eq!(repo.pending_len(), 1);

    repo.commit(&identity_signer()).unwrap();
    assert_eq!(repo.list_records().len(), 1);

    repo.delete_record(path).unwrap();
    assert_eq!(repo.get_record(path).unwrap(), None);
    assert_eq!(repo.list_records().len(), 1);
}

#[test]
fn test_empty_commit_rejected() {
    let mut repo = fresh_repo();
    let before = repo.commit_cid();
    let err = repo.commit(&identity_signer()).unwrap_err();
    assert_eq!(*err.kind(), RepoErrorKind::State);
    assert_eq!(repo.seq(), 0);
    assert_eq!(repo.commit_cid(), before);
}

#[test]
fn test_seq_since_and_rev_advance() {
    let mut repo = fresh_repo();
    let genesis_rev = repo.rev().cloned().unwrap();

    let mut events = Vec::new();
    for i in 0..5 {
        repo.create_record(&format!("app.bsky.feed.post/3kabc000000{}", i), &post("x"))
            .unwrap();
        events.push(repo.commit(&identity_signer()).unwrap());
    }

    assert_eq!(events[0].since.as_ref(), Some(&genesis_rev));
    for (i, pair) in events.windows(2).enumerate() {
        assert_eq!(pair[0].seq, i as i64 + 1);
        assert_eq!(pair[1].seq, pair[0].seq + 1);
        assert!(pair[1].rev > pair[0].rev);
        assert_eq!(pair[1].since.as_ref(), Some(&pair[0].rev));
        assert_eq!(pair[1].prev_data, Some(*pair[0].commit_object().unwrap().data()));
    }
    assert_eq!(repo.seq(), 5);
    assert_eq!(repo.rev(), Some(&events[4].rev));
}

#[test]
fn test_full_round_trip_through_car() {
    let mut repo = fresh_repo();
    let paths = [
        "app.bsky.feed.post/3kabc0000003",
        "app.bsky.feed.post/3kabc0000001",
        "app.bsky.actor.profile/self",
        "app.bsky.feed.post/3kabc0000002",
    ];
    for (i, path) in paths.iter().enumerate() {
        let record = if path.contains("profile") {
            DagCbor::map([("displayName", DagCbor::from("Test User"))])
        } else {
            post(&format!("post {}", i))
        };
        repo.create_record(path, &record).unwrap();
    }
    let event = repo.commit(&identity_signer()).unwrap();
    assert_eq!(event.ops.len(), 4);
    assert!(event.ops.iter().all(|op| op.action == RepoAction::Create));

    let car = repo.write_car(Vec::new()).unwrap();
    let copy = Repository::read_from_car(&car[..], RepoOptions::default()).unwrap();

    let mut sorted: Vec<SmolStr> = paths.iter().map(|p| SmolStr::new(p)).collect();
    sorted.sort();
    let keys: Vec<SmolStr> = copy.list_records().into_iter().map(|(k, _)| k).collect();
    assert_eq!(keys, sorted);

    for path in paths {
        assert_eq!(copy.get_record(path).unwrap(), repo.get_record(path).unwrap());
    }
    assert_eq!(
        copy.root_cid().unwrap().to_string(),
        repo.root_cid().unwrap().to_string()
    );
    assert_eq!(copy.did(), repo.did());
    assert_eq!(copy.rev(), repo.rev());
    assert_eq!(copy.seq(), 0);
}

#[test]
fn test_mixed_commit_reports_each_op() {
    let mut repo = fresh_repo();
    repo.create_record("app.bsky.feed.post/3kabc0000001", &post("one"))
        .unwrap();
    repo.create_record("app.bsky.feed.post/3kabc0000002", &post("two"))
        .unwrap();
    repo.commit(&identity_signer()).unwrap();

    repo.create_record("app.bsky.feed.post/3kabc0000003", &post("three"))
        .unwrap();
    repo.update_record("app.bsky.feed.post/3kabc0000001", &post("one, edited"))
        .unwrap();
    repo.delete_record("app.bsky.feed.post/3kabc0000002").unwrap();
    let event = repo.commit(&identity_signer()).unwrap();

    let actions: Vec<(RepoAction, &str)> = event
        .ops
        .iter()
        .map(|op| (op.action, op.path.as_str()))
        .collect();
    assert_eq!(
        actions,
        vec![
            (RepoAction::Update, "app.bsky.feed.post/3kabc0000001"),
            (RepoAction::Delete, "app.bsky.feed.post/3kabc0000002"),
            (RepoAction::Create, "app.bsky.feed.post/3kabc0000003"),
        ]
    );
    assert!(event.ops[0].prev.is_some());
    assert!(event.ops[1].cid.is_none());
    assert!(event.ops[2].prev.is_none());
    assert_eq!(repo.stats().record_count, 2);
}

#[test]
fn test_save_and_load_file() {
    let mut repo = fresh_repo();
    for i in 0..10 {
        repo.create_record(&format!("app.bsky.feed.like/3kabc00000{:02}", i), &post("like"))
            .unwrap();
    }
    repo.commit(&identity_signer()).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("repo.car");
    repo.save_to_file(&path).unwrap();

    let loaded = Repository::load_from_file(&path, RepoOptions::default()).unwrap();
    assert_eq!(loaded.list_records(), repo.list_records());
    assert_eq!(loaded.commit_cid(), repo.commit_cid());

    let roots = arbor_repo::car::read_car_header(&path).unwrap();
    assert_eq!(roots, vec![repo.commit_cid().unwrap()]);
}

#[test]
fn test_save_without_commit_fails() {
    let repo = Repository::new(did(), RepoOptions::default());
    let dir = tempfile::tempdir().unwrap();
    let err = repo.save_to_file(dir.path().join("none.car")).unwrap_err();
    assert_eq!(*err.kind(), RepoErrorKind::State);
}

#[test]
fn test_random_insertion_order_lists_sorted() {
    let mut rng = rand::thread_rng();
    let mut paths: Vec<String> = (0..100)
        .map(|i| format!("app.bsky.feed.post/3kz{:09}", i * 37))
        .collect();
    paths.shuffle(&mut rng);

    let mut repo = fresh_repo();
    for (i, chunk) in paths.chunks(25).enumerate() {
        for path in chunk {
            repo.create_record(path, &post(&format!("batch {}", i))).unwrap();
        }
        repo.commit(&identity_signer()).unwrap();
    }

    let listed: Vec<SmolStr> = repo.list_records().into_iter().map(|(k, _)| k).collect();
    let mut expected = paths.clone();
    expected.sort();
    assert_eq!(listed, expected);

    let mut other = fresh_repo();
    for path in &expected {
        let bytes = repo.get_record_value(path).unwrap().unwrap();
        other.create_record(path, &bytes).unwrap();
    }
    other.commit(&identity_signer()).unwrap();
    assert_eq!(other.root_cid(), repo.root_cid());
}

#[test]
fn test_signed_commit_verifies_after_reload() {
    let key = p256::ecdsa::SigningKey::from_slice(&[7u8; 32]).unwrap();
    let mut repo = Repository::create_for_new_user(did(), &key).unwrap();
    repo.create_record("app.bsky.actor.profile/self", &post("me"))
        .unwrap();
    let event = repo.commit(&key).unwrap();
    event.verify(key.verifying_key()).unwrap();

    let car = repo.write_car(Vec::new()).unwrap();
    let copy = Repository::read_from_car(&car[..], RepoOptions::default()).unwrap();
    copy.current_commit()
        .unwrap()
        .verify(key.verifying_key())
        .unwrap();

    let other = p256::ecdsa::SigningKey::from_slice(&[8u8; 32]).unwrap();
    assert!(
        copy.current_commit()
            .unwrap()
            .verify(other.verifying_key())
            .is_err()
    );
}

#[test]
fn test_invalid_keys_rejected_when_validating() {
    let mut repo = fresh_repo();
    let err = repo.create_record("no-slash", &post("x")).unwrap_err();
    assert_eq!(*err.kind(), RepoErrorKind::InvalidKey);
    assert_eq!(repo.pending_len(), 0);

    let mut lax = Repository::new(did(), RepoOptions::new().validate_keys(false).build());
    lax.initialize(&identity_signer()).unwrap();
    lax.create_record("no-slash", &post("x")).unwrap();
    lax.commit(&identity_signer()).unwrap();
    assert_eq!(lax.list_records().len(), 1);
}

#[test]
fn test_prove_record_contains_path() {
    let mut repo = fresh_repo();
    for i in 0..40 {
        repo.create_record(&format!("app.bsky.feed.post/3kabc00000{:02}", i), &post("p"))
            .unwrap();
    }
    repo.commit(&identity_signer()).unwrap();

    let proof = repo.prove_record("app.bsky.feed.post/3kabc0000017").unwrap();
    let parsed = arbor_repo::car::parse_car_bytes(&proof).unwrap();
    assert_eq!(Some(parsed.root), repo.commit_cid());
    let record_cid = repo
        .mst()
        .get("app.bsky.feed.post/3kabc0000017")
        .unwrap();
    assert!(parsed.blocks.contains_key(&record_cid));
}
