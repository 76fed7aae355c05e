//! Logical-node views: the handlers that interpret delta chains.
//!
//! Four handler archetypes cover every use of the generic walk:
//!
//! - [`PointReadHandler`]: verdict for a single key, terminating at the
//!   first record that decides it.
//! - [`WriteIntentHandler`]: membership probe preparing an insert or
//!   delete posting.
//! - [`ChildSelectHandler`]: routing through an inner chain during
//!   descent.
//! - [`LeafScanHandler`] / [`InnerScanHandler`]: full materialization of
//!   the virtual node, used by range scans, consolidation, splitting, and
//!   SMO helping.
//!
//! All of them follow the same mid-walk rules: a split whose key is at or
//! left of the target aborts with the right sibling, a merge whose key is
//! at or left of the target redirects into the absorbed chain, a remove
//! aborts for a retry via the parent. Split deltas passed on the way down
//! are reported back so the caller can verify the parent-side fix-up was
//! posted (helping).

use std::collections::BTreeMap;

use crate::base::{InnerEntries, LeafEntries};
use crate::bound::BoundKey;
use crate::mapping::{Nid, INVALID_NID};
use crate::node::{Node, NodeHeader};
use crate::traverse::{Abort, Advance, ChainHandler};

// ============================================================================
//  RouteTarget
// ============================================================================

/// Descent target: a concrete key, or the leftmost edge of the tree
/// (range scans starting from an unbounded lower end).
#[derive(Clone, Copy)]
pub(crate) enum RouteTarget<'a, K> {
    LeftEdge,
    Key(&'a K),
}

impl<K: Ord> RouteTarget<'_, K> {
    /// `target >= sep` for a concrete separator.
    #[inline]
    fn at_or_beyond(&self, sep: &K) -> bool {
        match self {
            Self::LeftEdge => false,

            Self::Key(key) => *key >= sep,
        }
    }

    /// `target < bound` for a high bound.
    #[inline]
    fn below(&self, bound: &BoundKey<K>) -> bool {
        match self {
            Self::LeftEdge => true,

            Self::Key(key) => bound.admits_from_above(key),
        }
    }

    /// `target >= bound` for a low bound.
    #[inline]
    fn at_or_beyond_low(&self, bound: &BoundKey<K>) -> bool {
        match self {
            Self::LeftEdge => bound.is_infinite(),

            Self::Key(key) => bound.admits_from_below(key),
        }
    }
}

// ============================================================================
//  PointReadHandler
// ============================================================================

/// Resolves `get(key)` over one leaf chain.
///
/// The first insert or delete for the key fixes the verdict; the base
/// node answers only for keys no delta spoke for.
pub(crate) struct PointReadHandler<'a, K, V> {
    key: &'a K,

    /// `Some(Some(v))` present, `Some(None)` absent, `None` undecided.
    pub verdict: Option<Option<V>>,

    /// First split delta passed with the key left of the split point.
    pub observed_split: Option<(K, Nid)>,
}

impl<'a, K, V> PointReadHandler<'a, K, V> {
    pub(crate) fn new(key: &'a K) -> Self {
        Self {
            key,
            verdict: None,
            observed_split: None,
        }
    }
}

impl<K: Ord + Clone, V: Clone> ChainHandler<K, V> for PointReadHandler<'_, K, V> {
    fn leaf_base(&mut self, _node: &Node<K, V>, base: &LeafEntries<K, V>) -> Advance<K, V> {
        self.verdict = Some(
            base.point_search(self.key)
                .map(|index| base.value_at(index).clone()),
        );
        Advance::Finished
    }

    fn leaf_insert(&mut self, _node: &Node<K, V>, key: &K, value: &V) -> Advance<K, V> {
        if key == self.key {
            self.verdict = Some(Some(value.clone()));
            return Advance::Finished;
        }
        Advance::Next
    }

    fn leaf_delete(&mut self, _node: &Node<K, V>, key: &K) -> Advance<K, V> {
        if key == self.key {
            self.verdict = Some(None);
            return Advance::Finished;
        }
        Advance::Next
    }

    fn leaf_split(&mut self, _node: &Node<K, V>, split_key: &K, right: Nid) -> Advance<K, V> {
        if self.observed_split.is_none() {
            self.observed_split = Some((split_key.clone(), right));
        }
        if self.key >= split_key {
            return Advance::Abort(Abort::GoRight(right));
        }
        Advance::Next
    }

    fn leaf_remove(&mut self, _node: &Node<K, V>) -> Advance<K, V> {
        Advance::Abort(Abort::Removed)
    }

    fn leaf_merge(
        &mut self,
        _node: &Node<K, V>,
        merge_key: &K,
        right_chain: *mut Node<K, V>,
        _right: Nid,
    ) -> Advance<K, V> {
        if self.key >= merge_key {
            return Advance::Jump(right_chain);
        }
        Advance::Next
    }
}

// ============================================================================
//  WriteIntentHandler
// ============================================================================

/// Membership probe for a pending insert or delete.
///
/// Same walk as a point read, but only records presence; no value clone.
pub(crate) struct WriteIntentHandler<'a, K> {
    key: &'a K,

    pub present: Option<bool>,

    pub observed_split: Option<(K, Nid)>,
}

impl<'a, K> WriteIntentHandler<'a, K> {
    pub(crate) fn new(key: &'a K) -> Self {
        Self {
            key,
            present: None,
            observed_split: None,
        }
    }
}

impl<K: Ord + Clone, V> ChainHandler<K, V> for WriteIntentHandler<'_, K> {
    fn leaf_base(&mut self, _node: &Node<K, V>, base: &LeafEntries<K, V>) -> Advance<K, V> {
        self.present = Some(base.point_search(self.key).is_some());
        Advance::Finished
    }

    fn leaf_insert(&mut self, _node: &Node<K, V>, key: &K, _value: &V) -> Advance<K, V> {
        if key == self.key {
            self.present = Some(true);
            return Advance::Finished;
        }
        Advance::Next
    }

    fn leaf_delete(&mut self, _node: &Node<K, V>, key: &K) -> Advance<K, V> {
        if key == self.key {
            self.present = Some(false);
            return Advance::Finished;
        }
        Advance::Next
    }

    fn leaf_split(&mut self, _node: &Node<K, V>, split_key: &K, right: Nid) -> Advance<K, V> {
        if self.observed_split.is_none() {
            self.observed_split = Some((split_key.clone(), right));
        }
        if self.key >= split_key {
            return Advance::Abort(Abort::GoRight(right));
        }
        Advance::Next
    }

    fn leaf_remove(&mut self, _node: &Node<K, V>) -> Advance<K, V> {
        Advance::Abort(Abort::Removed)
    }

    fn leaf_merge(
        &mut self,
        _node: &Node<K, V>,
        merge_key: &K,
        right_chain: *mut Node<K, V>,
        _right: Nid,
    ) -> Advance<K, V> {
        if self.key >= merge_key {
            return Advance::Jump(right_chain);
        }
        Advance::Next
    }
}

// ============================================================================
//  ChildSelectHandler
// ============================================================================

/// Picks the child whose range contains the target during root descent.
///
/// Insert and delete deltas carry their neighboring separators, so routing
/// through a delta is exact and the walk only reaches the base for targets
/// no delta spoke for.
pub(crate) struct ChildSelectHandler<'a, K> {
    target: RouteTarget<'a, K>,

    pub child: Option<Nid>,

    pub observed_split: Option<(K, Nid)>,
}

impl<'a, K> ChildSelectHandler<'a, K> {
    pub(crate) fn new(target: RouteTarget<'a, K>) -> Self {
        Self {
            target,
            child: None,
            observed_split: None,
        }
    }
}

impl<K: Ord + Clone, V> ChainHandler<K, V> for ChildSelectHandler<'_, K> {
    fn inner_base(&mut self, _node: &Node<K, V>, base: &InnerEntries<K>) -> Advance<K, V> {
        self.child = Some(match self.target {
            RouteTarget::LeftEdge => base.first_child(),

            RouteTarget::Key(key) => base.child_for(key),
        });
        Advance::Finished
    }

    fn inner_insert(
        &mut self,
        _node: &Node<K, V>,
        sep: &K,
        child: Nid,
        next_sep: &BoundKey<K>,
        _next_child: Nid,
    ) -> Advance<K, V> {
        if self.target.at_or_beyond(sep) && self.target.below(next_sep) {
            self.child = Some(child);
            return Advance::Finished;
        }
        Advance::Next
    }

    fn inner_delete(
        &mut self,
        _node: &Node<K, V>,
        _sep: &K,
        _child: Nid,
        prev_sep: &BoundKey<K>,
        prev_child: Nid,
        next_sep: &BoundKey<K>,
        _next_child: Nid,
    ) -> Advance<K, V> {
        if self.target.at_or_beyond_low(prev_sep) && self.target.below(next_sep) {
            self.child = Some(prev_child);
            return Advance::Finished;
        }
        Advance::Next
    }

    fn inner_split(&mut self, _node: &Node<K, V>, split_key: &K, right: Nid) -> Advance<K, V> {
        if self.observed_split.is_none() {
            self.observed_split = Some((split_key.clone(), right));
        }
        if self.target.at_or_beyond(split_key) {
            return Advance::Abort(Abort::GoRight(right));
        }
        Advance::Next
    }

    fn inner_remove(&mut self, _node: &Node<K, V>) -> Advance<K, V> {
        Advance::Abort(Abort::Removed)
    }

    fn inner_merge(
        &mut self,
        _node: &Node<K, V>,
        merge_key: &K,
        right_chain: *mut Node<K, V>,
        _right: Nid,
    ) -> Advance<K, V> {
        if self.target.at_or_beyond(merge_key) {
            return Advance::Jump(right_chain);
        }
        Advance::Next
    }
}

// ============================================================================
//  Materialized views
// ============================================================================

/// Fully materialized state of a leaf virtual node.
pub(crate) struct LeafView<K, V> {
    pub low: BoundKey<K>,
    pub high: BoundKey<K>,
    /// Sorted, deduplicated live pairs.
    pub entries: Vec<(K, V)>,
}

/// Fully materialized state of an inner virtual node.
pub(crate) struct InnerView<K> {
    pub low: BoundKey<K>,
    pub high: BoundKey<K>,
    pub first_child: Nid,
    /// Sorted separator/child pairs after the leftmost child.
    pub entries: Vec<(K, Nid)>,
}

impl<K: Ord + Clone> InnerView<K> {
    /// Number of children routed by this view.
    pub(crate) fn child_count(&self) -> usize {
        self.entries.len() + 1
    }

    /// Child registered under the exact separator `sep`, if any.
    pub(crate) fn child_at_sep(&self, sep: &K) -> Option<Nid> {
        self.entries
            .binary_search_by(|(k, _)| k.cmp(sep))
            .ok()
            .map(|index| self.entries[index].1)
    }

    /// The entry following `sep`: its separator as a bound (the view's
    /// high bound when `sep` is last) and its child (`INVALID_NID` when
    /// none).
    pub(crate) fn successor_of(&self, sep: &K) -> (BoundKey<K>, Nid) {
        let index: usize = self.entries.partition_point(|(k, _)| k <= sep);
        match self.entries.get(index) {
            Some((next_sep, next_child)) => (BoundKey::Finite(next_sep.clone()), *next_child),

            None => (self.high.clone(), INVALID_NID),
        }
    }

    /// Position of `child` in the separator entries, if routed there.
    pub(crate) fn position_of_child(&self, child: Nid) -> Option<usize> {
        self.entries.iter().position(|&(_, c)| c == child)
    }

    /// Left neighbor of the entry at `index`: `(low bound, leftmost
    /// child)` for the first entry, else the preceding entry.
    pub(crate) fn left_neighbor(&self, index: usize) -> (BoundKey<K>, Nid) {
        match index.checked_sub(1) {
            None => (self.low.clone(), self.first_child),

            Some(prev) => (
                BoundKey::Finite(self.entries[prev].0.clone()),
                self.entries[prev].1,
            ),
        }
    }

    /// Right neighbor of the entry at `index`, as for [`successor_of`].
    ///
    /// [`successor_of`]: Self::successor_of
    pub(crate) fn right_neighbor(&self, index: usize) -> (BoundKey<K>, Nid) {
        match self.entries.get(index + 1) {
            Some((next_sep, next_child)) => (BoundKey::Finite(next_sep.clone()), *next_child),

            None => (self.high.clone(), INVALID_NID),
        }
    }
}

// ============================================================================
//  LeafScanHandler
// ============================================================================

/// Materializes a leaf virtual node by replaying its chain.
///
/// Pending insert/delete effects are buffered by key (first seen wins) and
/// merged into the base output at base time; absorbed sibling chains are
/// queued at their merge deltas and drained after the primary base.
///
/// Contributions are filtered through a **narrowing window**: the filter
/// high starts at the head's bound, narrows to the split key when the
/// walk passes a split delta, and resets to the merge delta's widened
/// high when an absorbed branch is entered. The window thereby tracks
/// exactly the range the records below each point were posted under, so
/// keys a split moved away never resurface from an old base even when a
/// later merge widened the node again.
pub(crate) struct LeafScanHandler<K, V> {
    low: Option<BoundKey<K>>,
    head_high: Option<BoundKey<K>>,
    window_high: Option<BoundKey<K>>,

    pending: BTreeMap<K, Option<V>>,
    out: BTreeMap<K, V>,
    branches: Vec<(*mut Node<K, V>, BoundKey<K>)>,

    pub observed_split: Option<(K, Nid)>,
    pub observed_merges: Vec<(K, Nid)>,
}

impl<K: Ord + Clone, V: Clone> LeafScanHandler<K, V> {
    pub(crate) fn new() -> Self {
        Self {
            low: None,
            head_high: None,
            window_high: None,
            pending: BTreeMap::new(),
            out: BTreeMap::new(),
            branches: Vec::new(),
            observed_split: None,
            observed_merges: Vec::new(),
        }
    }

    fn in_window(&self, key: &K) -> bool {
        let low = self.low.as_ref().expect("init captured the bounds");
        let high = self.window_high.as_ref().expect("init captured the bounds");
        BoundKey::contains(low, high, key)
    }

    fn buffer(&mut self, key: &K, effect: Option<V>) {
        if self.in_window(key) && !self.pending.contains_key(key) {
            self.pending.insert(key.clone(), effect);
        }
    }

    pub(crate) fn finish(mut self) -> LeafView<K, V> {
        for (key, effect) in self.pending {
            if let Some(value) = effect {
                self.out.insert(key, value);
            }
        }

        LeafView {
            low: self.low.expect("init captured the bounds"),
            high: self.head_high.expect("init captured the bounds"),
            entries: self.out.into_iter().collect(),
        }
    }
}

impl<K: Ord + Clone, V: Clone> ChainHandler<K, V> for LeafScanHandler<K, V> {
    fn init(&mut self, head: &Node<K, V>) {
        let NodeHeader { low, high, .. } = head.header();
        self.low = Some(low.clone());
        self.head_high = Some(high.clone());
        self.window_high = Some(high.clone());
    }

    fn leaf_base(&mut self, _node: &Node<K, V>, base: &LeafEntries<K, V>) -> Advance<K, V> {
        for (key, value) in base.iter() {
            if self.in_window(key) && !self.pending.contains_key(key) {
                self.out.insert(key.clone(), value.clone());
            }
        }

        match self.branches.pop() {
            Some((branch, branch_high)) => {
                self.window_high = Some(branch_high);
                Advance::Jump(branch)
            }

            None => Advance::Finished,
        }
    }

    fn leaf_insert(&mut self, _node: &Node<K, V>, key: &K, value: &V) -> Advance<K, V> {
        self.buffer(key, Some(value.clone()));
        Advance::Next
    }

    fn leaf_delete(&mut self, _node: &Node<K, V>, key: &K) -> Advance<K, V> {
        self.buffer(key, None);
        Advance::Next
    }

    fn leaf_split(&mut self, _node: &Node<K, V>, split_key: &K, right: Nid) -> Advance<K, V> {
        if self.observed_split.is_none() {
            self.observed_split = Some((split_key.clone(), right));
        }
        // Records below this point were posted while the node ended at
        // the split key.
        let window = self.window_high.as_ref().expect("init captured the bounds");
        self.window_high = Some(BoundKey::min_upper(
            window,
            &BoundKey::Finite(split_key.clone()),
        ));
        Advance::Next
    }

    fn leaf_remove(&mut self, _node: &Node<K, V>) -> Advance<K, V> {
        Advance::Abort(Abort::Removed)
    }

    fn leaf_merge(
        &mut self,
        node: &Node<K, V>,
        merge_key: &K,
        right_chain: *mut Node<K, V>,
        right: Nid,
    ) -> Advance<K, V> {
        self.observed_merges.push((merge_key.clone(), right));
        // The absorbed chain is filtered by its own high bound, never
        // wider than the window the merge record itself sits under.
        let window = self.window_high.as_ref().expect("init captured the bounds");
        let branch_high = BoundKey::min_upper(window, &node.header().high);
        self.branches.push((right_chain, branch_high));
        Advance::Next
    }
}

// ============================================================================
//  InnerScanHandler
// ============================================================================

/// Materializes an inner virtual node by replaying its chain.
///
/// Mirrors [`LeafScanHandler`] over routing entries, including the
/// narrowing window. The leftmost child of an absorbed sibling's base
/// re-enters the view as an entry under that sibling's merge key; a later
/// delete of that separator suppresses it.
pub(crate) struct InnerScanHandler<K, V> {
    low: Option<BoundKey<K>>,
    head_high: Option<BoundKey<K>>,
    window_high: Option<BoundKey<K>>,

    pending: BTreeMap<K, Option<Nid>>,
    out: BTreeMap<K, Nid>,
    first_child: Option<Nid>,
    branches: Vec<(*mut Node<K, V>, K, BoundKey<K>)>,
    current_branch_key: Option<K>,

    pub observed_split: Option<(K, Nid)>,
    pub observed_merges: Vec<(K, Nid)>,
}

impl<K: Ord + Clone, V> InnerScanHandler<K, V> {
    pub(crate) fn new() -> Self {
        Self {
            low: None,
            head_high: None,
            window_high: None,
            pending: BTreeMap::new(),
            out: BTreeMap::new(),
            first_child: None,
            branches: Vec::new(),
            current_branch_key: None,
            observed_split: None,
            observed_merges: Vec::new(),
        }
    }

    fn in_window(&self, key: &K) -> bool {
        let low = self.low.as_ref().expect("init captured the bounds");
        let high = self.window_high.as_ref().expect("init captured the bounds");
        BoundKey::contains(low, high, key)
    }

    fn buffer(&mut self, sep: &K, effect: Option<Nid>) {
        if self.in_window(sep) && !self.pending.contains_key(sep) {
            self.pending.insert(sep.clone(), effect);
        }
    }

    pub(crate) fn finish(mut self) -> InnerView<K> {
        for (sep, effect) in self.pending {
            if let Some(child) = effect {
                self.out.insert(sep, child);
            }
        }

        InnerView {
            low: self.low.expect("init captured the bounds"),
            high: self.head_high.expect("init captured the bounds"),
            first_child: self.first_child.expect("inner chain ends at a base"),
            entries: self.out.into_iter().collect(),
        }
    }
}

impl<K: Ord + Clone, V> ChainHandler<K, V> for InnerScanHandler<K, V> {
    fn init(&mut self, head: &Node<K, V>) {
        let NodeHeader { low, high, .. } = head.header();
        self.low = Some(low.clone());
        self.head_high = Some(high.clone());
        self.window_high = Some(high.clone());
    }

    fn inner_base(&mut self, _node: &Node<K, V>, base: &InnerEntries<K>) -> Advance<K, V> {
        match self.current_branch_key.take() {
            // Primary base: its leftmost child is the view's.
            None => self.first_child = Some(base.first_child()),

            // Absorbed sibling: its leftmost child re-enters under the
            // merge key, unless a newer delta already spoke for it or a
            // split above the merge moved the whole branch away.
            Some(merge_key) => {
                if self.in_window(&merge_key) && !self.pending.contains_key(&merge_key) {
                    self.out.insert(merge_key, base.first_child());
                }
            }
        }

        for (sep, child) in base.separators() {
            if self.in_window(sep) && !self.pending.contains_key(sep) {
                self.out.insert(sep.clone(), *child);
            }
        }

        match self.branches.pop() {
            Some((branch, merge_key, branch_high)) => {
                self.current_branch_key = Some(merge_key);
                self.window_high = Some(branch_high);
                Advance::Jump(branch)
            }

            None => Advance::Finished,
        }
    }

    fn inner_insert(
        &mut self,
        _node: &Node<K, V>,
        sep: &K,
        child: Nid,
        _next_sep: &BoundKey<K>,
        _next_child: Nid,
    ) -> Advance<K, V> {
        self.buffer(sep, Some(child));
        Advance::Next
    }

    fn inner_delete(
        &mut self,
        _node: &Node<K, V>,
        sep: &K,
        _child: Nid,
        _prev_sep: &BoundKey<K>,
        _prev_child: Nid,
        _next_sep: &BoundKey<K>,
        _next_child: Nid,
    ) -> Advance<K, V> {
        self.buffer(sep, None);
        Advance::Next
    }

    fn inner_split(&mut self, _node: &Node<K, V>, split_key: &K, right: Nid) -> Advance<K, V> {
        if self.observed_split.is_none() {
            self.observed_split = Some((split_key.clone(), right));
        }
        let window = self.window_high.as_ref().expect("init captured the bounds");
        self.window_high = Some(BoundKey::min_upper(
            window,
            &BoundKey::Finite(split_key.clone()),
        ));
        Advance::Next
    }

    fn inner_remove(&mut self, _node: &Node<K, V>) -> Advance<K, V> {
        Advance::Abort(Abort::Removed)
    }

    fn inner_merge(
        &mut self,
        node: &Node<K, V>,
        merge_key: &K,
        right_chain: *mut Node<K, V>,
        right: Nid,
    ) -> Advance<K, V> {
        self.observed_merges.push((merge_key.clone(), right));
        let window = self.window_high.as_ref().expect("init captured the bounds");
        let branch_high = BoundKey::min_upper(window, &node.header().high);
        self.branches.push((right_chain, merge_key.clone(), branch_high));
        Advance::Next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeBody;
    use crate::reclaim::drop_chain;
    use crate::traverse::walk_chain;

    type N = Node<u64, u64>;

    fn leaf_base_node(keys: &[u64], low: BoundKey<u64>, high: BoundKey<u64>) -> *mut N {
        Box::into_raw(Node::leaf_base(
            LeafEntries::from_sorted(keys.iter().map(|&k| (k, k * 10)).collect()),
            low,
            high,
        ))
    }

    fn stack(next: *mut N, size: u32, body: NodeBody<u64, u64>) -> *mut N {
        // SAFETY: `next` is a test-owned live node.
        let below = unsafe { &(*next).header };
        Box::into_raw(Node::delta(below, next, size, body))
    }

    /// Stack a split or merge delta, rebounding the high key the way the
    /// posting code does.
    fn stack_rebounded(
        next: *mut N,
        size: u32,
        high: BoundKey<u64>,
        body: NodeBody<u64, u64>,
    ) -> *mut N {
        // SAFETY: `next` is a test-owned live node.
        let below = unsafe { &(*next).header };
        Box::into_raw(Node::delta_rebounded(below, next, size, high, body))
    }

    fn point_read(head: *mut N, key: u64) -> Result<Option<u64>, Abort> {
        let mut handler = PointReadHandler::new(&key);
        // SAFETY: test-owned chain, single-threaded.
        unsafe { walk_chain(head, &mut handler) }?;
        Ok(handler.verdict.expect("walk finished with a verdict"))
    }

    #[test]
    fn point_read_first_effect_wins() {
        let base = leaf_base_node(&[10, 20], BoundKey::Infinite, BoundKey::Infinite);
        let del = stack(base, 1, NodeBody::LeafDelete { key: 20 });
        let ins = stack(del, 2, NodeBody::LeafInsert { key: 20, value: 999 });

        assert_eq!(point_read(ins, 20), Ok(Some(999)));
        assert_eq!(point_read(ins, 10), Ok(Some(100)));
        assert_eq!(point_read(del, 20), Ok(None));
        assert_eq!(point_read(ins, 30), Ok(None));

        // SAFETY: test-owned chain.
        unsafe { drop_chain(ins) };
    }

    #[test]
    fn point_read_follows_split_to_the_right() {
        let base = leaf_base_node(&[10, 20, 30, 40], BoundKey::Infinite, BoundKey::Infinite);
        let split = stack_rebounded(
            base,
            2,
            BoundKey::Finite(30),
            NodeBody::LeafSplit { split_key: 30, right: 7 },
        );

        assert_eq!(point_read(split, 30), Err(Abort::GoRight(7)));
        assert_eq!(point_read(split, 10), Ok(Some(100)));

        // SAFETY: test-owned chain.
        unsafe { drop_chain(split) };
    }

    #[test]
    fn point_read_descends_into_merged_sibling() {
        let victim = leaf_base_node(&[30, 40], BoundKey::Finite(30), BoundKey::Infinite);
        let left = leaf_base_node(&[10, 20], BoundKey::Infinite, BoundKey::Finite(30));
        let merge = stack_rebounded(
            left,
            4,
            BoundKey::Infinite,
            NodeBody::LeafMerge { merge_key: 30, right_chain: victim, right: 9 },
        );

        assert_eq!(point_read(merge, 40), Ok(Some(400)));
        assert_eq!(point_read(merge, 10), Ok(Some(100)));
        assert_eq!(point_read(merge, 35), Ok(None));

        // SAFETY: the merge edge is non-owning, so the victim chain is
        // dropped separately.
        unsafe {
            drop_chain(merge);
            drop_chain(victim);
        }
    }

    #[test]
    fn scan_merges_deltas_bases_and_branches() {
        let victim = leaf_base_node(&[30, 40], BoundKey::Finite(30), BoundKey::Infinite);
        let left = leaf_base_node(&[10, 20], BoundKey::Infinite, BoundKey::Finite(30));
        let merge = stack_rebounded(
            left,
            4,
            BoundKey::Infinite,
            NodeBody::LeafMerge { merge_key: 30, right_chain: victim, right: 9 },
        );
        let del = stack(merge, 3, NodeBody::LeafDelete { key: 40 });
        let ins = stack(del, 4, NodeBody::LeafInsert { key: 35, value: 350 });

        let mut handler = LeafScanHandler::new();
        // SAFETY: test-owned chain.
        unsafe { walk_chain(ins, &mut handler) }.expect("live chain");
        let view = handler.finish();

        assert_eq!(view.entries, vec![(10, 100), (20, 200), (30, 300), (35, 350)]);

        // SAFETY: as above, victim dropped separately.
        unsafe {
            drop_chain(ins);
            drop_chain(victim);
        }
    }

    #[test]
    fn scan_window_excludes_keys_split_away() {
        let base = leaf_base_node(&[10, 20, 30, 40], BoundKey::Infinite, BoundKey::Infinite);
        let split = stack_rebounded(
            base,
            2,
            BoundKey::Finite(30),
            NodeBody::LeafSplit { split_key: 30, right: 7 },
        );
        let ins = stack(split, 3, NodeBody::LeafInsert { key: 25, value: 250 });

        let mut handler = LeafScanHandler::new();
        // SAFETY: test-owned chain.
        unsafe { walk_chain(ins, &mut handler) }.expect("live chain");
        assert_eq!(handler.observed_split, Some((30, 7)));

        let view = handler.finish();
        assert_eq!(view.entries, vec![(10, 100), (20, 200), (25, 250)]);
        assert_eq!(view.high, BoundKey::Finite(30));

        // SAFETY: test-owned chain.
        unsafe { drop_chain(ins) };
    }

    #[test]
    fn child_select_routes_through_deltas() {
        let base = Box::into_raw(Node::<u64, u64>::inner_base(
            InnerEntries::from_sorted(1, vec![(10, 2), (30, 3)]),
            BoundKey::Infinite,
            BoundKey::Infinite,
        ));
        let ins = stack(
            base,
            4,
            NodeBody::InnerInsert {
                sep: 20,
                child: 5,
                next_sep: BoundKey::Finite(30),
                next_child: 3,
            },
        );

        let route = |key: u64| -> Nid {
            let mut handler = ChildSelectHandler::new(RouteTarget::Key(&key));
            // SAFETY: test-owned chain.
            unsafe { walk_chain(ins, &mut handler) }.expect("live chain");
            handler.child.expect("routing finished")
        };

        assert_eq!(route(5), 1);
        assert_eq!(route(10), 2);
        assert_eq!(route(20), 5);
        assert_eq!(route(25), 5);
        assert_eq!(route(30), 3);

        let mut handler = ChildSelectHandler::new(RouteTarget::LeftEdge);
        // SAFETY: test-owned chain.
        unsafe { walk_chain(ins, &mut handler) }.expect("live chain");
        assert_eq!(handler.child, Some(1));

        // SAFETY: test-owned chain.
        unsafe { drop_chain(ins) };
    }

    #[test]
    fn inner_scan_lifts_absorbed_first_child() {
        let victim = Box::into_raw(Node::<u64, u64>::inner_base(
            InnerEntries::from_sorted(6, vec![(40, 7)]),
            BoundKey::Finite(30),
            BoundKey::Infinite,
        ));
        let left = Box::into_raw(Node::<u64, u64>::inner_base(
            InnerEntries::from_sorted(1, vec![(10, 2)]),
            BoundKey::Infinite,
            BoundKey::Finite(30),
        ));
        let merge = stack_rebounded(
            left,
            4,
            BoundKey::Infinite,
            NodeBody::InnerMerge { merge_key: 30, right_chain: victim, right: 9 },
        );

        let mut handler = InnerScanHandler::new();
        // SAFETY: test-owned chain.
        unsafe { walk_chain(merge, &mut handler) }.expect("live chain");
        let view = handler.finish();

        assert_eq!(view.first_child, 1);
        assert_eq!(view.entries, vec![(10, 2), (30, 6), (40, 7)]);
        assert_eq!(view.child_count(), 4);

        // SAFETY: victim dropped separately, as in the leaf tests.
        unsafe {
            drop_chain(merge);
            drop_chain(victim);
        }
    }
}
