//! Benchmarks for `BwTree` using Divan.
//!
//! Run with: `cargo bench --bench tree`

use divan::{black_box, Bencher};

use bwtree::{BwTree, TreeConfig};

fn main() {
    divan::main();
}

fn filled_tree(keys: u64) -> BwTree<u64, u64> {
    let tree: BwTree<u64, u64> = BwTree::new();
    for key in 0..keys {
        tree.insert(key, key).unwrap();
    }
    tree
}

// =============================================================================
// Construction
// =============================================================================

#[divan::bench]
fn new_tree() -> BwTree<u64, u64> {
    BwTree::new()
}

// =============================================================================
// Point operations
// =============================================================================

#[divan::bench(args = [1_000, 100_000])]
fn insert_sequential(bencher: Bencher, keys: u64) {
    bencher
        .with_inputs(|| BwTree::<u64, u64>::new())
        .bench_values(|tree| {
            for key in 0..keys {
                tree.insert(black_box(key), key).unwrap();
            }
            tree
        });
}

#[divan::bench(args = [1_000, 100_000])]
fn get_hit(bencher: Bencher, keys: u64) {
    let tree = filled_tree(keys);
    let mut next: u64 = 0;

    bencher.bench_local(|| {
        next = (next + 7) % keys;
        black_box(tree.get(&next))
    });
}

#[divan::bench]
fn get_miss(bencher: Bencher) {
    let tree = filled_tree(100_000);

    bencher.bench_local(|| black_box(tree.get(&u64::MAX)));
}

// =============================================================================
// Scans
// =============================================================================

#[divan::bench]
fn range_100_of_100k(bencher: Bencher) {
    let tree = filled_tree(100_000);
    let mut lo: u64 = 0;

    bencher.bench_local(|| {
        lo = (lo + 997) % 99_000;
        black_box(tree.range(lo..lo + 100).count())
    });
}

// =============================================================================
// Forced structural modifications
// =============================================================================

#[divan::bench]
fn insert_with_tiny_thresholds(bencher: Bencher) {
    let config = TreeConfig::default()
        .with_table_size(1 << 16)
        .with_split_threshold(8)
        .with_merge_threshold(2)
        .with_chain_threshold(4);

    bencher
        .with_inputs(|| BwTree::<u64, u64>::with_config(config).unwrap())
        .bench_values(|tree| {
            for key in 0..10_000 {
                tree.insert(black_box(key), key).unwrap();
            }
            tree
        });
}
