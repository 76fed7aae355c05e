//! Structural-modification scenarios with forced thresholds.
//!
//! Each test pins down one concrete protocol behavior: where a split
//! lands, how merges collapse a leaf away, how consolidation caps chain
//! height. Assertions go through the public surface (`get`, `range`,
//! `stats`, `validate`) so the tests survive representation changes.

#![expect(clippy::unwrap_used, reason = "fail fast in tests")]

mod common;

use bwtree::{BwTree, DeleteOutcome, TreeConfig};

/// Five ascending keys with `split_threshold = 4`: exactly one split, at
/// the middle key, leaving `[-inf, 30)` and `[30, +inf)` leaves routed by
/// a fresh root.
#[test]
fn five_keys_split_once_at_pivot() {
    common::init_tracing();
    let tree: BwTree<u64, u64> = BwTree::with_config(
        TreeConfig::default()
            .with_table_size(1 << 10)
            .with_split_threshold(4)
            .with_merge_threshold(2)
            .with_chain_threshold(8),
    )
    .unwrap();

    common::fill(&tree, [10, 20, 30, 40, 50]);

    let stats = tree.stats();
    assert_eq!(stats.splits, 1, "exactly one split");
    assert_eq!(stats.merges, 0);

    // The split pivots on the middle key: 30 starts the right leaf, so a
    // scan from 30 up never touches the left leaf.
    assert_eq!(
        tree.range(30..).collect::<Vec<_>>(),
        vec![(30, 300), (40, 400), (50, 500)]
    );
    assert_eq!(
        common::dump(&tree),
        vec![(10, 100), (20, 200), (30, 300), (40, 400), (50, 500)]
    );

    tree.validate();
}

/// Sequential fill of 1..=1000 under default thresholds: every key
/// readable, ranges exact.
#[test]
fn sequential_thousand() {
    common::init_tracing();
    let tree: BwTree<u64, u64> = BwTree::new();

    for key in 1..=1000 {
        assert!(tree.insert(key, key).unwrap().is_inserted());
    }
    assert_eq!(tree.len(), 1000);

    for key in 1..=1000 {
        assert_eq!(tree.get(&key), Some(key), "key {key} lost");
    }
    assert_eq!(tree.get(&0), None);
    assert_eq!(tree.get(&1001), None);

    let window: Vec<(u64, u64)> = tree.range(200..210).collect();
    let expected: Vec<(u64, u64)> = (200..210).map(|k| (k, k)).collect();
    assert_eq!(window, expected);

    tree.validate();
}

/// Deletes are visible to both point reads and range scans.
#[test]
fn delete_is_visible() {
    common::init_tracing();
    let tree = common::tiny_tree();
    common::fill(&tree, [5, 15, 25]);

    assert_eq!(tree.delete(&15).unwrap(), DeleteOutcome::Deleted);

    assert_eq!(tree.get(&15), None);
    assert_eq!(
        tree.range(0..30).collect::<Vec<_>>(),
        vec![(5, 50), (25, 250)]
    );

    tree.validate();
}

/// Forced merge: after a split, draining the right leaf posts exactly one
/// remove + merge + routing-delete triple and the survivor serves the
/// remaining keys.
#[test]
fn drained_leaf_merges_left() {
    common::init_tracing();
    let tree: BwTree<u64, u64> = BwTree::with_config(
        TreeConfig::default()
            .with_table_size(1 << 10)
            .with_split_threshold(4)
            .with_merge_threshold(3)
            .with_chain_threshold(8),
    )
    .unwrap();

    // Six keys: one split, leaving {10, 20} and {30, 40, 50, 60}.
    common::fill(&tree, [10, 20, 30, 40, 50, 60]);
    assert_eq!(tree.stats().splits, 1);

    // Drain the right leaf below the merge threshold.
    for key in [30, 40, 50, 60] {
        assert_eq!(tree.delete(&key).unwrap(), DeleteOutcome::Deleted);
    }

    let stats = tree.stats();
    assert_eq!(stats.merges, 1, "exactly one merge triple");

    assert_eq!(common::dump(&tree), vec![(10, 100), (20, 200)]);
    assert_eq!(tree.get(&30), None);
    assert_eq!(tree.get(&10), Some(100));
    assert_eq!(tree.len(), 2);

    // The surviving leaf covers the full key space again: inserts on the
    // old right range land without a new split.
    assert!(tree.insert(45, 450).unwrap().is_inserted());
    assert_eq!(tree.get(&45), Some(450));

    tree.validate();
}

/// Chain-length cap: with `chain_threshold = 3`, ten inserts into one
/// leaf consolidate at least twice and leave a short chain.
#[test]
fn chains_are_consolidated() {
    common::init_tracing();
    let tree: BwTree<u64, u64> = BwTree::with_config(
        TreeConfig::default()
            .with_table_size(1 << 10)
            .with_split_threshold(64)
            .with_merge_threshold(2)
            .with_chain_threshold(3),
    )
    .unwrap();

    common::fill(&tree, (1..=10).map(|k| k * 7));

    let stats = tree.stats();
    assert!(
        stats.consolidations >= 2,
        "expected at least two consolidations, saw {}",
        stats.consolidations
    );

    // Every chain is back under the cap (only the root leaf is live).
    let tall: u64 = stats.chain_histogram[4..].iter().sum();
    assert_eq!(tall, 0, "no chain may exceed the threshold after quiesce");

    tree.validate();
}

/// Splits cascade through inner nodes and grow the root more than once.
#[test]
fn deep_tree_from_tiny_thresholds() {
    common::init_tracing();
    let tree = common::tiny_tree();

    common::fill(&tree, 0..200);
    let stats = tree.stats();
    assert!(stats.splits >= 40, "tiny thresholds force many splits");

    for key in 0..200 {
        assert_eq!(tree.get(&key), Some(key * 10));
    }
    assert_eq!(common::dump(&tree).len(), 200);

    tree.validate();
}

/// Interleaved deletes against tiny thresholds force merges at several
/// levels while staying consistent.
#[test]
fn churn_with_merges() {
    common::init_tracing();
    let tree = common::tiny_tree();

    common::fill(&tree, 0..120);
    for key in (0..120).filter(|k| k % 3 != 0) {
        assert_eq!(tree.delete(&key).unwrap(), DeleteOutcome::Deleted);
    }

    let expected: Vec<(u64, u64)> = (0..120).step_by(3).map(|k| (k, k * 10)).collect();
    assert_eq!(common::dump(&tree), expected);
    assert!(tree.stats().merges >= 1, "churn must trigger merges");

    tree.validate();
}

/// A tree whose mapping table fills up keeps absorbing writes: splits are
/// abandoned but chains and consolidation still work.
#[test]
fn full_table_degrades_gracefully() {
    common::init_tracing();
    let tree: BwTree<u64, u64> = BwTree::with_config(
        TreeConfig::default()
            .with_table_size(1)
            .with_split_threshold(4)
            .with_merge_threshold(2)
            .with_chain_threshold(3),
    )
    .unwrap();

    for key in 0..64 {
        assert!(tree.insert(key, key).unwrap().is_inserted());
    }
    for key in 0..64 {
        assert_eq!(tree.get(&key), Some(key));
    }

    let stats = tree.stats();
    assert_eq!(stats.splits, 0, "no id left to split with");
    assert!(stats.consolidations > 0);
    assert_eq!(stats.nid_high_water, 1);

    tree.validate();
}
