use ed25519_dalek::SigningKey;
use rand::Rng;
use vds::verify::{
    verify_consistency, verify_inclusion, verify_log_entries, verify_log_extension,
    verify_signed_tree_head,
};
use vds::{
    leaf_hash, node_hash, AllowAllPolicy, Hash32, InMemoryStorage, LeafRef, LogRef, LogTreeHead,
    MapRef, Permission, ServiceConfig, StaticPolicy, VdsError, VerifiableService,
};

fn service() -> VerifiableService<InMemoryStorage> {
    VerifiableService::new(InMemoryStorage::new())
}

/// RFC 6962 MTH straight from the definition.
fn reference_root(leaves: &[Hash32]) -> Hash32 {
    if leaves.is_empty() {
        return vds::empty_tree_hash();
    }
    if leaves.len() == 1 {
        return leaves[0];
    }
    let mut k = 1;
    while k * 2 < leaves.len() {
        k *= 2;
    }
    node_hash(&reference_root(&leaves[..k]), &reference_root(&leaves[k..]))
}

fn fill(db: &VerifiableService<InMemoryStorage>, log: &LogRef, n: usize) -> Vec<Vec<u8>> {
    let entries: Vec<Vec<u8>> = (0..n).map(|i| format!("entry {}", i).into_bytes()).collect();
    for e in &entries {
        let resp = db.add_entry(log, e).unwrap();
        assert!(!resp.duplicate);
        assert_eq!(resp.leaf_hash, leaf_hash(e));
    }
    entries
}

#[test]
fn test_append_matches_reference_root() {
    for n in [0usize, 1, 2, 3, 5, 8, 17] {
        let db = service();
        let log = LogRef::user("acme", format!("log-{}", n));
        let entries = fill(&db, &log, n);
        let leaves: Vec<Hash32> = entries.iter().map(|e| leaf_hash(e)).collect();

        let head = db.tree_hash(&log, 0).unwrap();
        assert_eq!(head.tree_size, n as i64);
        assert_eq!(head.root_hash, reference_root(&leaves), "n = {}", n);
    }
}

#[test]
fn test_duplicate_append_is_idempotent() {
    let db = service();
    let log = LogRef::user("acme", "dups");
    db.add_entry(&log, b"same").unwrap();
    let before = db.tree_hash(&log, 0).unwrap();

    let resp = db.add_entry(&log, b"same").unwrap();
    assert!(resp.duplicate);
    assert_eq!(db.tree_hash(&log, 0).unwrap(), before);
}

#[test]
fn test_abc_scenario() {
    let db = service();
    let log = LogRef::user("acme", "abc");
    for e in [b"a", b"b", b"c"] {
        db.add_entry(&log, e).unwrap();
    }

    let (a, b, c) = (leaf_hash(b"a"), leaf_hash(b"b"), leaf_hash(b"c"));
    let head3 = db.tree_hash(&log, 3).unwrap();
    assert_eq!(head3.root_hash, node_hash(&node_hash(&a, &b), &c));

    let proof = db.inclusion_proof(&log, 3, LeafRef::Index(1)).unwrap();
    assert_eq!(proof.audit_path, vec![a, c]);
    verify_inclusion(&proof, &b, &head3).unwrap();

    let head2 = db.tree_hash(&log, 2).unwrap();
    let proof = db.consistency_proof(&log, 2, 3).unwrap();
    verify_consistency(&proof, &head2, &head3).unwrap();
}

#[test]
fn test_inclusion_round_trip_and_tamper() {
    let db = service();
    let log = LogRef::user("acme", "incl");
    let entries = fill(&db, &log, 17);

    for size in 1..=17i64 {
        let head = db.tree_hash(&log, size).unwrap();
        for idx in 0..size {
            let leaf = leaf_hash(&entries[idx as usize]);
            let proof = db.inclusion_proof(&log, size, LeafRef::Index(idx)).unwrap();
            verify_inclusion(&proof, &leaf, &head).unwrap();

            for i in 0..proof.audit_path.len() {
                for byte in [0usize, 31] {
                    let mut bad = proof.clone();
                    bad.audit_path[i][byte] ^= 0x01;
                    let rv = verify_inclusion(&bad, &leaf, &head);
                    assert_eq!(rv, Err(VdsError::VerificationFailed));
                }
            }
            assert!(verify_inclusion(&proof, &leaf_hash(b"other"), &head).is_err());
        }
    }
}

#[test]
fn test_inclusion_by_hash_and_errors() {
    let db = service();
    let log = LogRef::user("acme", "incl-errors");
    fill(&db, &log, 3);

    let by_hash = db.inclusion_proof(&log, 0, LeafRef::Hash(leaf_hash(b"entry 2"))).unwrap();
    assert_eq!(by_hash.leaf_index, 2);
    assert_eq!(by_hash.tree_size, 3);

    assert_eq!(
        db.inclusion_proof(&log, 0, LeafRef::Hash(leaf_hash(b"nope"))),
        Err(VdsError::NotFound)
    );
    assert_eq!(db.inclusion_proof(&log, 0, LeafRef::Index(3)), Err(VdsError::NotFound));
    assert_eq!(db.inclusion_proof(&log, 0, LeafRef::Index(-1)), Err(VdsError::NotFound));
    assert_eq!(db.inclusion_proof(&log, 2, LeafRef::Index(2)), Err(VdsError::InvalidRange));
    assert_eq!(db.inclusion_proof(&log, 4, LeafRef::Index(0)), Err(VdsError::InvalidRange));
    assert_eq!(db.tree_hash(&log, 4), Err(VdsError::InvalidRange));
    assert_eq!(db.tree_hash(&log, -1), Err(VdsError::InvalidRange));
}

#[test]
fn test_consistency_round_trip() {
    let db = service();
    let log = LogRef::user("acme", "cons");
    fill(&db, &log, 17);

    let heads: Vec<LogTreeHead> = (1..=17).map(|s| db.tree_hash(&log, s).unwrap()).collect();
    for first in 1..17i64 {
        for second in (first + 1)..=17 {
            let proof = db.consistency_proof(&log, first, second).unwrap();
            let (h1, h2) = (&heads[first as usize - 1], &heads[second as usize - 1]);
            verify_consistency(&proof, h1, h2).unwrap();

            // swapping in an unrelated head must fail
            let fake = LogTreeHead { tree_size: h1.tree_size, root_hash: leaf_hash(b"fake") };
            assert!(verify_consistency(&proof, &fake, h2).is_err());

            for i in 0..proof.audit_path.len() {
                for byte in [0usize, 31] {
                    let mut bad = proof.clone();
                    bad.audit_path[i][byte] ^= 0x01;
                    let rv = verify_consistency(&bad, h1, h2);
                    assert_eq!(rv, Err(VdsError::VerificationFailed), "{} -> {}", first, second);
                }
            }
        }
    }

    // second = 0 means current
    let proof = db.consistency_proof(&log, 5, 0).unwrap();
    assert_eq!(proof.second_size, 17);
}

#[test]
fn test_consistency_rejects_bad_ranges() {
    let db = service();
    let log = LogRef::user("acme", "cons-errors");
    fill(&db, &log, 5);

    assert_eq!(db.consistency_proof(&log, 3, 3), Err(VdsError::InvalidRange));
    assert_eq!(db.consistency_proof(&log, 4, 3), Err(VdsError::InvalidRange));
    assert_eq!(db.consistency_proof(&log, 0, 3), Err(VdsError::InvalidRange));
    assert_eq!(db.consistency_proof(&log, 2, 6), Err(VdsError::InvalidRange));
    assert_eq!(db.consistency_proof(&log, 5, 0), Err(VdsError::InvalidRange));
}

#[test]
fn test_random_entries_rebuild_from_fetch() {
    let db = VerifiableService::with_policy(
        InMemoryStorage::new(),
        AllowAllPolicy,
        ServiceConfig { max_fetch_entries: 7, ..ServiceConfig::default() },
    );
    let log = LogRef::user("acme", "random");
    let mut rng = rand::thread_rng();
    let n = rng.gen_range(20..60);
    for _ in 0..n {
        let data: [u8; 24] = rng.gen();
        db.add_entry(&log, &data).unwrap();
    }
    let head = db.tree_hash(&log, 0).unwrap();

    let mut entries = Vec::new();
    while (entries.len() as i64) < head.tree_size {
        let batch = db.fetch_entries(&log, entries.len() as i64, 0).unwrap();
        assert!(batch.len() <= 7);
        entries.extend(batch);
    }
    verify_log_entries(&entries, &head).unwrap();

    entries.swap(0, 1);
    assert_eq!(verify_log_entries(&entries, &head), Err(VdsError::VerificationFailed));
}

#[test]
fn test_unbounded_fetch_limit() {
    let db = VerifiableService::with_policy(
        InMemoryStorage::new(),
        AllowAllPolicy,
        ServiceConfig { max_fetch_entries: i64::MAX, ..ServiceConfig::default() },
    );
    let log = LogRef::user("acme", "unbounded");
    let entries = fill(&db, &log, 3);

    assert_eq!(db.fetch_entries(&log, 1, 0).unwrap(), entries[1..].to_vec());
    assert_eq!(db.fetch_entries(&log, 2, 3).unwrap(), entries[2..].to_vec());
}

#[test]
fn test_incremental_audit_from_previous_head() {
    let db = service();
    let log = LogRef::user("acme", "incremental");
    let entries = fill(&db, &log, 23);
    let head = db.tree_hash(&log, 0).unwrap();

    // an empty starting point falls back to a full rebuild
    let empty = LogTreeHead { tree_size: 0, root_hash: vds::empty_tree_hash() };
    let boundary = db.inclusion_proof(&log, 1, LeafRef::Index(0)).unwrap();
    verify_log_extension(&empty, &boundary, &entries, &head).unwrap();

    for prev_size in 1..23i64 {
        let prev = db.tree_hash(&log, prev_size).unwrap();
        let boundary = db.inclusion_proof(&log, prev_size + 1, LeafRef::Index(prev_size)).unwrap();
        let tail = db.fetch_entries(&log, prev_size, 0).unwrap();
        assert_eq!(tail, entries[prev_size as usize..].to_vec());
        verify_log_extension(&prev, &boundary, &tail, &head).unwrap();

        let mut bad = tail.clone();
        bad[0].push(b'!');
        let rv = verify_log_extension(&prev, &boundary, &bad, &head);
        assert_eq!(rv, Err(VdsError::VerificationFailed));

        let fork = LogTreeHead { root_hash: leaf_hash(b"fork"), ..prev };
        let rv = verify_log_extension(&fork, &boundary, &tail, &head);
        assert_eq!(rv, Err(VdsError::VerificationFailed));
    }
}

#[test]
fn test_signed_tree_heads() {
    let db = service().with_signing_key(SigningKey::from_bytes(&[7u8; 32]));
    let log = LogRef::user("acme", "signed");
    fill(&db, &log, 4);

    let sth = db.signed_tree_hash(&log, 0).unwrap();
    assert_eq!(sth.head.tree_size, 4);
    let vk = db.verifying_key().unwrap();
    verify_signed_tree_head(&sth, &vk).unwrap();

    let mut forged = sth.clone();
    forged.head.tree_size = 3;
    assert_eq!(verify_signed_tree_head(&forged, &vk), Err(VdsError::VerificationFailed));

    let unsigned = service();
    assert!(matches!(unsigned.signed_tree_hash(&log, 0), Err(VdsError::InvalidRequest(_))));
}

#[test]
fn test_account_registry() {
    let db = service();
    db.create_log("acme", "b-log").unwrap();
    db.create_log("acme", "a-log").unwrap();
    db.create_map("acme", "m").unwrap();
    assert_eq!(db.create_log("acme", "a-log"), Err(VdsError::AlreadyExists));

    assert_eq!(db.list_logs("acme").unwrap(), vec!["a-log".to_string(), "b-log".to_string()]);
    assert_eq!(db.list_maps("acme").unwrap(), vec!["m".to_string()]);
    assert!(db.list_logs("other").unwrap().is_empty());

    let log = LogRef::user("acme", "a-log");
    db.add_entry(&log, b"x").unwrap();
    db.delete_log("acme", "a-log").unwrap();
    assert_eq!(db.list_logs("acme").unwrap(), vec!["b-log".to_string()]);
    assert_eq!(db.tree_hash(&log, 0).unwrap().tree_size, 0);
    assert_eq!(db.delete_log("acme", "a-log"), Err(VdsError::NotFound));
}

#[test]
fn test_static_policy_surfaces_unauthorized() {
    let policy = StaticPolicy::default()
        .grant("acme", "public", &[Permission::LogReadHash, Permission::LogProveInclusion])
        .grant("acme", "*", &[Permission::LogRawAdd]);
    let db =
        VerifiableService::with_policy(InMemoryStorage::new(), policy, ServiceConfig::default());

    let public = LogRef::user("acme", "public");
    db.add_entry(&public, b"hello").unwrap();
    assert_eq!(db.tree_hash(&public, 0).unwrap().tree_size, 1);
    assert_eq!(db.fetch_entries(&public, 0, 0), Err(VdsError::Unauthorized));

    let private = LogRef::user("acme", "private");
    db.add_entry(&private, b"hello").unwrap();
    assert_eq!(db.tree_hash(&private, 0), Err(VdsError::Unauthorized));

    let map = MapRef::new("acme", "m");
    assert_eq!(db.map_set_value(&map, b"k", b"v"), Err(VdsError::Unauthorized));
    assert_eq!(db.create_log("acme", "new"), Err(VdsError::Unauthorized));
}
