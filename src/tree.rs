//! Filepath: src/tree.rs
//! `BwTree` - a lock-free ordered index built from delta chains.
//!
//! This module provides the main [`BwTree`] type and its public
//! operations; the heavier machinery lives in submodules (descent, write
//! path, structural modifications, consolidation, range scans).

use std::fmt as StdFmt;
use std::sync::atomic::{AtomicU64, AtomicUsize};

use seize::{Collector, LocalGuard};

use crate::base::LeafEntries;
use crate::bound::BoundKey;
use crate::config::TreeConfig;
use crate::error::TreeError;
use crate::mapping::{MappingTable, Nid};
use crate::node::{DeltaAccounting, Node};
use crate::ordering::{COUNTER, SLOT_LOAD};
use crate::reclaim::{drop_chain, EpochReclaimer, Reclaimer};
use crate::stats::{StatsSnapshot, TreeCounters};
use crate::traverse::{walk_chain, Abort};
use crate::view::{PointReadHandler, RouteTarget};

mod consolidate;
mod descent;
mod range;
mod smo;
mod validate;
mod write;

pub use range::Range;


// ============================================================================
//  BwTree
// ============================================================================

/// A lock-free, in-memory, ordered key-value index.
///
/// Logical nodes are delta chains over immutable base nodes, coordinated
/// through a mapping table of atomic pointers. Every mutation - a data
/// write or a structural modification - commits through one
/// compare-and-swap on the affected node's table slot; losers retry and
/// any thread that observes a half-done structural modification completes
/// it before proceeding.
///
/// # Type Parameters
///
/// * `K` - key type; its `Ord` is the comparator of the index
/// * `V` - value type, opaque to the index
/// * `R` - reclamation policy for displaced chains
///
/// # Example
///
/// ```rust
/// use bwtree::BwTree;
///
/// let tree: BwTree<u64, &str> = BwTree::new();
/// tree.insert(1, "one").unwrap();
///
/// assert_eq!(tree.get(&1), Some("one"));
/// assert_eq!(tree.get(&2), None);
/// ```
pub struct BwTree<K, V, R = EpochReclaimer> {
    table: MappingTable<K, V>,

    /// The distinguished root node id; CAS-swapped when the root splits.
    root: AtomicU64,

    config: TreeConfig,

    collector: Collector,

    reclaimer: R,

    counters: TreeCounters,

    /// Live pair count, maintained incrementally for O(1) `len`.
    count: AtomicUsize,

    deltas: DeltaAccounting,
}

// SAFETY: all shared state is reached through atomics and immutable
// records; K and V cross threads both inside nodes (Send) and through
// shared references during traversal (Sync).
unsafe impl<K: Send + Sync, V: Send + Sync, R: Send> Send for BwTree<K, V, R> {}
unsafe impl<K: Send + Sync, V: Send + Sync, R: Sync> Sync for BwTree<K, V, R> {}

impl<K, V, R> BwTree<K, V, R>
where
    K: Ord + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    R: Reclaimer<K, V> + Default,
{
    /// Create an empty tree with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        match Self::with_config(TreeConfig::default()) {
            Ok(tree) => tree,

            // The default table always has room for the root slot.
            Err(_) => unreachable!("default configuration allocates the root"),
        }
    }

    /// Create an empty tree with the given configuration.
    ///
    /// # Errors
    ///
    /// [`TreeError::MappingTableFull`] when `config.table_size` cannot
    /// hold even the root node.
    pub fn with_config(config: TreeConfig) -> Result<Self, TreeError> {
        Self::with_config_and_reclaimer(config, R::default())
    }
}

impl<K, V, R> Default for BwTree<K, V, R>
where
    K: Ord + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    R: Reclaimer<K, V> + Default,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, R> BwTree<K, V, R>
where
    K: Ord + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    R: Reclaimer<K, V>,
{
    /// Create an empty tree with an explicit configuration and reclaimer.
    ///
    /// # Errors
    ///
    /// [`TreeError::MappingTableFull`] when `config.table_size` cannot
    /// hold even the root node.
    pub fn with_config_and_reclaimer(config: TreeConfig, reclaimer: R) -> Result<Self, TreeError> {
        config.check();

        let table: MappingTable<K, V> = MappingTable::new(config.table_size);
        let root_leaf = Node::leaf_base(
            LeafEntries::from_sorted(Vec::new()),
            BoundKey::Infinite,
            BoundKey::Infinite,
        );
        let root_nid: Nid = table.allocate(root_leaf)?;

        Ok(Self {
            table,
            root: AtomicU64::new(root_nid),
            config,
            collector: Collector::new(),
            reclaimer,
            counters: TreeCounters::new(),
            count: AtomicUsize::new(0),
            deltas: DeltaAccounting::new(),
        })
    }

    /// Enter a protected region and return a guard.
    ///
    /// The guard keeps any chain loaded during its lifetime from being
    /// reclaimed. Public operations manage their own guards; this is for
    /// callers that want to amortize guard entry over many operations.
    #[must_use]
    #[inline]
    pub fn guard(&self) -> LocalGuard<'_> {
        self.collector.enter()
    }

    /// Look up the value stored under `key`.
    ///
    /// Lock-free: the verdict is fixed by the first chain record that
    /// speaks for the key, or by the base node.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<V> {
        let guard: LocalGuard<'_> = self.collector.enter();

        loop {
            let target = self.descend_to_leaf(RouteTarget::Key(key), &guard);
            let mut nid: Nid = target.nid;

            loop {
                let head: *mut Node<K, V> = self.table.at(nid);
                // SAFETY: slot heads stay live under the guard.
                let node: &Node<K, V> = unsafe { &*head };

                if node.is_remove() {
                    self.help_merge(&target.parents, nid, &guard);
                    break;
                }

                let mut read = PointReadHandler::new(key);
                // SAFETY: `head` is a published chain head, guard held.
                match unsafe { walk_chain(head, &mut read) } {
                    Ok(()) => {
                        if let Some((split_key, right)) = read.observed_split.take() {
                            self.help_split(&target.parents, nid, &split_key, right, &guard);
                        }
                        return read.verdict.flatten();
                    }

                    Err(Abort::GoRight(right)) => {
                        if let Some((split_key, r)) = read.observed_split.take() {
                            self.help_split(&target.parents, nid, &split_key, r, &guard);
                        }
                        nid = right;
                    }

                    Err(Abort::Removed) => {
                        self.help_merge(&target.parents, nid, &guard);
                        break;
                    }
                }
            }
        }
    }

    /// Number of live pairs.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.count.load(COUNTER)
    }

    /// Whether the tree holds no pairs.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Point-in-time statistics.
    ///
    /// The chain histogram and node count come from a racy table scan;
    /// they are exact only on a quiesced tree.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        let _guard: LocalGuard<'_> = self.collector.enter();

        let high_water: u64 = self.table.high_water();
        let mut chain_histogram: Vec<u64> = vec![0; self.config.chain_threshold + 2];
        let mut node_count: u64 = 0;

        for nid in 0..high_water {
            let head: *mut Node<K, V> = self.table.at(nid);
            if head.is_null() {
                // Allocation in flight: id handed out, slot not yet
                // published.
                continue;
            }

            // SAFETY: non-null slot heads stay live under the guard.
            let node: &Node<K, V> = unsafe { &*head };
            if node.is_remove() {
                continue;
            }

            node_count += 1;
            let bucket: usize = (node.height() as usize).min(chain_histogram.len() - 1);
            chain_histogram[bucket] += 1;
        }

        StatsSnapshot {
            chain_histogram,
            node_count,
            nid_high_water: high_water,
            consolidations: TreeCounters::read(&self.counters.consolidations),
            splits: TreeCounters::read(&self.counters.splits),
            merges: TreeCounters::read(&self.counters.merges),
        }
    }

    #[inline]
    pub(crate) fn root_nid(&self) -> Nid {
        self.root.load(SLOT_LOAD)
    }
}

impl<K, V, R> StdFmt::Debug for BwTree<K, V, R> {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        f.debug_struct("BwTree")
            .field("len", &self.count.load(COUNTER))
            .field("nid_high_water", &self.table.high_water())
            .finish_non_exhaustive()
    }
}

impl<K, V, R> Drop for BwTree<K, V, R> {
    fn drop(&mut self) {
        // Teardown is single-threaded: free every chain still owned by a
        // slot. Chains displaced earlier were retired through the
        // reclaimer and are freed when the collector drops.
        let high_water: u64 = self.table.high_water();
        for nid in 0..high_water {
            let head: *mut Node<K, V> = self.table.at(nid);
            if !head.is_null() {
                // SAFETY: exclusive access; each slot owns its chain
                // through `next` edges only.
                unsafe { drop_chain(head) };
            }
        }
    }
}
