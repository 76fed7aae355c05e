//! # Bw-tree
//!
//! A lock-free, in-memory, ordered key-value index.
//!
//! Logical tree nodes are **delta chains**: immutable change records
//! stacked over an immutable base node. All coordination goes through a
//! **mapping table** of node id to chain head; every mutation - a data
//! write or a structural modification - commits via a single
//! compare-and-swap on one table slot. Losers retry, and any thread that
//! observes a half-done structural modification completes it before
//! proceeding, so no operation ever waits on another thread.
//!
//! ## Design
//!
//! - Readers walk a chain from head to base; the first record that speaks
//!   for their key fixes the answer.
//! - Writers post a one-record delta on the owning leaf's slot.
//! - Oversized nodes split in two phases (split delta, then a parent
//!   routing entry), underpopulated nodes merge leftward in three
//!   (remove, merge delta on the left sibling, parent routing delete).
//! - Tall chains are consolidated into fresh base nodes; displaced
//!   records go to an epoch-based reclaimer so in-flight readers stay
//!   safe.
//!
//! ## Example
//!
//! ```rust
//! use bwtree::BwTree;
//!
//! let tree: BwTree<u64, String> = BwTree::new();
//!
//! tree.insert(2, "two".into()).unwrap();
//! tree.insert(1, "one".into()).unwrap();
//!
//! assert_eq!(tree.get(&1).as_deref(), Some("one"));
//!
//! let keys: Vec<u64> = tree.range(..).map(|(k, _)| k).collect();
//! assert_eq!(keys, vec![1, 2]);
//! ```

pub mod base;
pub mod bound;
pub mod config;
pub mod error;
pub mod mapping;
pub mod node;
pub mod reclaim;
pub mod stats;
pub mod tree;

mod ordering;
mod tracing_helpers;
mod traverse;
mod view;

pub use bound::BoundKey;
pub use config::TreeConfig;
pub use error::{DeleteOutcome, InsertOutcome, TreeError};
pub use mapping::{Nid, INVALID_NID};
pub use reclaim::{DisplacedChain, EpochReclaimer, LeakReclaimer, Reclaimer};
pub use stats::StatsSnapshot;
pub use tree::{BwTree, Range};
