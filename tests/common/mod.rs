//! Common test utilities: tracing setup and tree configurations.
//!
//! ```rust,ignore
//! mod common;
//!
//! #[test]
//! fn my_test() {
//!     common::init_tracing();
//!     let tree = common::tiny_tree();
//!     // ...
//! }
//! ```
//!
//! Set `RUST_LOG` (e.g. `RUST_LOG=bwtree=trace`) to see SMO events when
//! the crate is built with the `tracing` feature.

#![allow(dead_code)]

use std::sync::Once;

use bwtree::{BwTree, TreeConfig};

/// Ensures tracing is only initialized once across all tests.
static INIT: Once = Once::new();

/// Initialize the tracing subscriber from `RUST_LOG`.
///
/// Safe to call multiple times - only the first call takes effect.
pub fn init_tracing() {
    INIT.call_once(|| {
        use tracing_subscriber::layer::SubscriberExt;
        use tracing_subscriber::util::SubscriberInitExt;
        use tracing_subscriber::EnvFilter;

        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .init();
    });
}

/// Forced-SMO configuration: splits at 4, merges below 2, consolidates
/// chains over 3. A handful of keys exercises every structural path.
#[must_use]
pub fn tiny_config() -> TreeConfig {
    TreeConfig::default()
        .with_table_size(1 << 16)
        .with_split_threshold(4)
        .with_merge_threshold(2)
        .with_chain_threshold(3)
}

/// A tree with the forced-SMO configuration.
#[must_use]
pub fn tiny_tree() -> BwTree<u64, u64> {
    BwTree::with_config(tiny_config()).expect("table has room for the root")
}

/// Insert `keys` with `value = key * 10`, asserting each one is new.
pub fn fill(tree: &BwTree<u64, u64>, keys: impl IntoIterator<Item = u64>) {
    for key in keys {
        assert!(
            tree.insert(key, key * 10).unwrap().is_inserted(),
            "key {key} inserted twice"
        );
    }
}

/// Collect the full contents of the tree in ascending key order.
#[must_use]
pub fn dump(tree: &BwTree<u64, u64>) -> Vec<(u64, u64)> {
    tree.range(..).collect()
}
