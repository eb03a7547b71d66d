//! B+tree integration tests.

use std::collections::BTreeSet;
use std::sync::Arc;

use quarry_common::{PageId, RecordId};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use quarry_storage::buffer::{BufferPoolConfig, BufferPoolManager};
use quarry_storage::disk::MemoryDiskManager;
use quarry_storage::index::{BPlusTree, BPlusTreeConfig};

fn tree(pool_size: usize, leaf_max: usize, internal_max: usize) -> BPlusTree {
    let bpm = Arc::new(
        BufferPoolManager::new(
            BufferPoolConfig::new(pool_size),
            Arc::new(MemoryDiskManager::new()),
        )
        .unwrap(),
    );
    BPlusTree::new(bpm, BPlusTreeConfig::new(leaf_max, internal_max)).unwrap()
}

fn rid(key: i64) -> RecordId {
    RecordId::new(PageId::new(key as u32), key as u32)
}

/// Insert 1..=10 with leaf_max 5 / internal_max 3, query everything,
/// delete a subset, and check exactly the survivors remain while the tree
/// stays balanced.
#[test]
fn test_round_trip_with_deletes() {
    let tree = tree(32, 5, 3);

    for key in 1..=10 {
        assert!(tree.insert(key, rid(key)).unwrap());
    }
    tree.verify().unwrap();
    for key in 1..=10 {
        assert_eq!(tree.get(key).unwrap(), Some(rid(key)), "key {key}");
    }

    for key in [1, 4, 3, 2, 5, 6] {
        tree.remove(key).unwrap();
        tree.verify().unwrap();
    }
    for key in [1, 4, 3, 2, 5, 6] {
        assert_eq!(tree.get(key).unwrap(), None, "deleted key {key}");
    }
    for key in 7..=10 {
        assert_eq!(tree.get(key).unwrap(), Some(rid(key)), "kept key {key}");
    }
}

/// Sequential, reverse, and shuffled insert orders all produce the same
/// sorted scan.
#[test]
fn test_insert_orders_converge() {
    let expected: Vec<i64> = (1..=60).collect();

    let ascending = tree(64, 4, 4);
    for &key in &expected {
        ascending.insert(key, rid(key)).unwrap();
    }

    let descending = tree(64, 4, 4);
    for &key in expected.iter().rev() {
        descending.insert(key, rid(key)).unwrap();
    }

    let shuffled = tree(64, 4, 4);
    let mut keys = expected.clone();
    keys.shuffle(&mut rand::rngs::StdRng::seed_from_u64(7));
    for &key in &keys {
        shuffled.insert(key, rid(key)).unwrap();
    }

    for t in [&ascending, &descending, &shuffled] {
        t.verify().unwrap();
        let scanned: Vec<i64> = t.iter().unwrap().map(|(k, _)| k).collect();
        assert_eq!(scanned, expected);
    }
}

/// Randomized workload: interleaved inserts and deletes checked against a
/// model, with structural verification along the way.
#[test]
fn test_randomized_against_model() {
    let tree = tree(64, 5, 4);
    let mut model = BTreeSet::new();
    let mut rng = rand::rngs::StdRng::seed_from_u64(15445);

    for step in 0..2_000 {
        let key = rng.gen_range(0..500);
        if rng.gen_bool(0.6) {
            let inserted = tree.insert(key, rid(key)).unwrap();
            assert_eq!(inserted, model.insert(key), "insert {key} at step {step}");
        } else {
            tree.remove(key).unwrap();
            model.remove(&key);
        }
        if step % 250 == 0 {
            tree.verify().unwrap();
        }
    }
    tree.verify().unwrap();

    let scanned: Vec<i64> = tree.iter().unwrap().map(|(k, _)| k).collect();
    let expected: Vec<i64> = model.iter().copied().collect();
    assert_eq!(scanned, expected);

    for key in 0..500 {
        let expected = model.contains(&key).then(|| rid(key));
        assert_eq!(tree.get(key).unwrap(), expected, "key {key}");
    }
}

/// Range scans start exactly at the requested key.
#[test]
fn test_range_scan_from_key() {
    let tree = tree(32, 4, 4);
    for key in (0..100).step_by(5) {
        tree.insert(key, rid(key)).unwrap();
    }

    let from_exact: Vec<i64> = tree.iter_from(50).unwrap().map(|(k, _)| k).collect();
    assert_eq!(from_exact, (50..100).step_by(5).collect::<Vec<i64>>());

    let from_between: Vec<i64> = tree.iter_from(51).unwrap().map(|(k, _)| k).collect();
    assert_eq!(from_between, (55..100).step_by(5).collect::<Vec<i64>>());
}

/// The tree stays correct when the pool is far too small to hold it,
/// forcing every operation through eviction and re-reads. The pool still
/// holds the worst-case pin chain of a cascading split.
#[test]
fn test_heavy_eviction_pressure() {
    let tree = tree(16, 4, 4);
    for key in 0..300 {
        assert!(tree.insert(key, rid(key)).unwrap());
    }
    tree.verify().unwrap();

    for key in (0..300).step_by(2) {
        tree.remove(key).unwrap();
    }
    tree.verify().unwrap();

    for key in 0..300 {
        let expected = (key % 2 == 1).then(|| rid(key));
        assert_eq!(tree.get(key).unwrap(), expected);
    }
}

/// Negative keys sort below positive ones.
#[test]
fn test_negative_keys() {
    let tree = tree(16, 4, 4);
    for key in [-5, 3, -1, 0, 7, -9] {
        tree.insert(key, rid(key.unsigned_abs() as i64)).unwrap();
    }
    let scanned: Vec<i64> = tree.iter().unwrap().map(|(k, _)| k).collect();
    assert_eq!(scanned, vec![-9, -5, -1, 0, 3, 7]);
}
