//! Whole-tree invariant checking, for tests and debugging.
//!
//! Walks the tree from the root and asserts the structural invariants
//! the protocol promises after every public operation: well-formed
//! chains, consistent bounds, strictly ascending keys, seamless leaf
//! coverage, and no half-done structural modification left reachable.
//! Exact only on a quiesced tree.

use seize::LocalGuard;

use crate::bound::BoundKey;
use crate::mapping::Nid;
use crate::node::Node;
use crate::reclaim::Reclaimer;
use crate::traverse::walk_chain;
use crate::view::{InnerScanHandler, LeafScanHandler};

use super::BwTree;

impl<K, V, R> BwTree<K, V, R>
where
    K: Ord + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    R: Reclaimer<K, V>,
{
    /// Check every structural invariant, panicking on the first
    /// violation.
    ///
    /// Intended for tests and debugging on a quiesced tree; concurrent
    /// writers can make the bound checks race benignly.
    ///
    /// # Panics
    ///
    /// On any violated invariant, with a description of the violation.
    pub fn validate(&self) {
        let guard: LocalGuard<'_> = self.collector.enter();

        let mut leaf_ranges: Vec<(BoundKey<K>, BoundKey<K>)> = Vec::new();
        self.validate_node(
            self.root_nid(),
            &BoundKey::Infinite,
            &BoundKey::Infinite,
            &mut leaf_ranges,
            &guard,
        );

        // Coverage: the leaf ranges tile (-inf, +inf) left to right with
        // no gaps or overlaps.
        assert!(!leaf_ranges.is_empty(), "a tree always has a leaf");
        let (first_low, _) = &leaf_ranges[0];
        assert!(first_low.is_infinite(), "leftmost leaf must start at -inf");
        let (_, last_high) = &leaf_ranges[leaf_ranges.len() - 1];
        assert!(last_high.is_infinite(), "rightmost leaf must end at +inf");

        for window in leaf_ranges.windows(2) {
            let (_, high) = &window[0];
            let (low, _) = &window[1];
            assert!(
                high == low && !high.is_infinite(),
                "adjacent leaves must meet at one finite bound"
            );
        }
    }

    fn validate_node(
        &self,
        nid: Nid,
        low: &BoundKey<K>,
        high: &BoundKey<K>,
        leaf_ranges: &mut Vec<(BoundKey<K>, BoundKey<K>)>,
        guard: &LocalGuard<'_>,
    ) {
        let head: *mut Node<K, V> = self.table.at(nid);
        assert!(!head.is_null(), "reachable slot {nid} must be published");

        // Chain well-formedness: heights strictly decrease to exactly one
        // base, and no reachable node is frozen by an unfinished merge.
        let mut cur: *mut Node<K, V> = head;
        let mut prev_height: Option<u16> = None;
        let mut bases: usize = 0;
        while !cur.is_null() {
            // SAFETY: chain records stay live under the guard.
            let record: &Node<K, V> = unsafe { &*cur };

            assert!(
                !record.is_remove(),
                "node {nid}: remove delta reachable from the root (unrepaired merge)"
            );
            if let Some(above) = prev_height {
                assert!(
                    record.height() < above,
                    "node {nid}: chain heights must strictly decrease"
                );
            }
            prev_height = Some(record.height());

            if record.is_base() {
                bases += 1;
                assert!(
                    record.next.is_null(),
                    "node {nid}: base record must terminate the chain"
                );
            }
            cur = record.next;
        }
        assert_eq!(bases, 1, "node {nid}: a chain ends at exactly one base");

        // SAFETY: slot heads stay live under the guard.
        let node: &Node<K, V> = unsafe { &*head };

        if node.is_leaf() {
            let mut scan = LeafScanHandler::new();
            // SAFETY: `head` is a published chain head, guard held.
            unsafe { walk_chain(head, &mut scan) }
                .unwrap_or_else(|_| panic!("leaf {nid}: chain aborted during validation"));
            let view = scan.finish();

            assert!(&view.low == low, "leaf {nid}: low bound mismatch");
            assert!(&view.high == high, "leaf {nid}: high bound mismatch");
            assert_eq!(
                node.size() as usize,
                view.entries.len(),
                "leaf {nid}: header size must match the virtual view"
            );

            for window in view.entries.windows(2) {
                assert!(
                    window[0].0 < window[1].0,
                    "leaf {nid}: keys must be strictly ascending"
                );
            }
            for (key, _) in &view.entries {
                assert!(
                    BoundKey::contains(&view.low, &view.high, key),
                    "leaf {nid}: key outside the node's range"
                );
            }

            leaf_ranges.push((view.low, view.high));
        } else {
            let mut scan = InnerScanHandler::new();
            // SAFETY: `head` is a published chain head, guard held.
            unsafe { walk_chain(head, &mut scan) }
                .unwrap_or_else(|_| panic!("inner {nid}: chain aborted during validation"));
            let view = scan.finish();

            assert!(&view.low == low, "inner {nid}: low bound mismatch");
            assert!(&view.high == high, "inner {nid}: high bound mismatch");
            assert_eq!(
                node.size() as usize,
                view.child_count(),
                "inner {nid}: header size must match the child count"
            );

            for window in view.entries.windows(2) {
                assert!(
                    window[0].0 < window[1].0,
                    "inner {nid}: separators must be strictly ascending"
                );
            }

            // Parent/child consistency: each child's range is delimited
            // by its separator and the next one.
            let mut ids: Vec<Nid> = Vec::with_capacity(view.child_count());
            ids.push(view.first_child);
            ids.extend(view.entries.iter().map(|&(_, child)| child));

            let mut lows: Vec<BoundKey<K>> = Vec::with_capacity(view.child_count());
            lows.push(view.low.clone());
            lows.extend(
                view.entries
                    .iter()
                    .map(|(sep, _)| BoundKey::Finite(sep.clone())),
            );

            for (index, &child) in ids.iter().enumerate() {
                let child_high: &BoundKey<K> = lows.get(index + 1).unwrap_or(&view.high);
                self.validate_node(child, &lows[index], child_high, leaf_ranges, guard);
            }
        }
    }
}
