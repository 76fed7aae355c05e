//! Range scans: a lazy ascending iterator over `[lo, hi)`-style bounds.
//!
//! The iterator buffers one leaf's worth of pairs at a time. Each refill
//! re-descends from the last yielded position under a fresh epoch guard,
//! so a scan holds no chain pinned between `next` calls and survives any
//! interleaved splits, merges, and consolidations; it simply resumes at
//! the first key it has not yet passed.

use std::collections::VecDeque;
use std::ops::{Bound, RangeBounds};

use seize::LocalGuard;

use crate::bound::BoundKey;
use crate::mapping::Nid;
use crate::node::Node;
use crate::reclaim::Reclaimer;
use crate::traverse::{walk_chain, Abort};
use crate::view::{LeafScanHandler, LeafView, RouteTarget};

use super::BwTree;

/// Resume position of a scan.
#[derive(Clone)]
enum Cursor<K> {
    /// Not started: the caller's lower bound applies.
    Start(Bound<K>),

    /// Resume at the first key `>= resume` (a leaf high bound).
    At(K),
}

/// Lazy ascending iterator over a key range.
///
/// Created by [`BwTree::range`]. Yields owned pairs; the scan is
/// restartable by construction, picking up after the last yielded key on
/// every refill.
pub struct Range<'t, K, V, R> {
    tree: &'t BwTree<K, V, R>,
    cursor: Option<Cursor<K>>,
    end: Bound<K>,
    buf: VecDeque<(K, V)>,
}

impl<K, V, R> BwTree<K, V, R>
where
    K: Ord + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    R: Reclaimer<K, V>,
{
    /// Iterate pairs whose keys fall within `bounds`, in ascending order.
    ///
    /// ```rust
    /// use bwtree::BwTree;
    ///
    /// let tree: BwTree<u64, u64> = BwTree::new();
    /// for k in [5, 1, 3] {
    ///     tree.insert(k, k * 10).unwrap();
    /// }
    ///
    /// let pairs: Vec<(u64, u64)> = tree.range(2..=5).collect();
    /// assert_eq!(pairs, vec![(3, 30), (5, 50)]);
    /// ```
    pub fn range<B: RangeBounds<K>>(&self, bounds: B) -> Range<'_, K, V, R> {
        Range {
            tree: self,
            cursor: Some(Cursor::Start(bounds.start_bound().cloned())),
            end: bounds.end_bound().cloned(),
            buf: VecDeque::new(),
        }
    }
}

impl<K, V, R> Range<'_, K, V, R>
where
    K: Ord + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    R: Reclaimer<K, V>,
{
    fn refill(&mut self) {
        while self.buf.is_empty() {
            let Some(cursor) = self.cursor.clone() else {
                return;
            };

            let guard: LocalGuard<'_> = self.tree.collector.enter();
            let view: LeafView<K, V> = self.scan_owning_leaf(&cursor, &guard);

            for (key, value) in view.entries {
                if past_end(&self.end, &key) {
                    self.cursor = None;
                    return;
                }
                if !before_cursor(&cursor, &key) {
                    self.buf.push_back((key, value));
                }
            }

            match view.high {
                BoundKey::Infinite => {
                    self.cursor = None;
                    return;
                }

                BoundKey::Finite(high) => {
                    // Every unseen key is >= high; once that clears the
                    // end bound the scan is done.
                    if past_end(&self.end, &high) {
                        self.cursor = None;
                        return;
                    }
                    self.cursor = Some(Cursor::At(high));
                }
            }
        }
    }

    /// Descend to the leaf owning the cursor position and materialize it,
    /// helping and retrying through any structural changes on the way.
    fn scan_owning_leaf(&self, cursor: &Cursor<K>, guard: &LocalGuard<'_>) -> LeafView<K, V> {
        loop {
            let route: RouteTarget<'_, K> = match cursor {
                Cursor::Start(Bound::Unbounded) => RouteTarget::LeftEdge,

                Cursor::Start(Bound::Included(key) | Bound::Excluded(key))
                | Cursor::At(key) => RouteTarget::Key(key),
            };

            let target = self.tree.descend_to_leaf(route, guard);
            let nid: Nid = target.nid;

            let head: *mut Node<K, V> = self.tree.table.at(nid);
            // SAFETY: slot heads stay live under the guard.
            let node: &Node<K, V> = unsafe { &*head };
            if node.is_remove() {
                self.tree.help_merge(&target.parents, nid, guard);
                continue;
            }

            let mut scan = LeafScanHandler::new();
            // SAFETY: `head` is a published chain head, guard held.
            match unsafe { walk_chain(head, &mut scan) } {
                Ok(()) => {
                    if let Some((split_key, right)) = scan.observed_split.take() {
                        self.tree
                            .help_split(&target.parents, nid, &split_key, right, guard);
                    }
                    return scan.finish();
                }

                Err(abort) => {
                    debug_assert!(
                        matches!(abort, Abort::Removed),
                        "leaf scans do not abort rightward"
                    );
                    self.tree.help_merge(&target.parents, nid, guard);
                    continue;
                }
            }
        }
    }
}

impl<K, V, R> Iterator for Range<'_, K, V, R>
where
    K: Ord + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    R: Reclaimer<K, V>,
{
    type Item = (K, V);

    fn next(&mut self) -> Option<(K, V)> {
        if self.buf.is_empty() {
            self.refill();
        }
        self.buf.pop_front()
    }
}

impl<K, V, R> std::iter::FusedIterator for Range<'_, K, V, R>
where
    K: Ord + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    R: Reclaimer<K, V>,
{
}

/// Whether `key` falls beyond the caller's end bound.
fn past_end<K: Ord>(end: &Bound<K>, key: &K) -> bool {
    match end {
        Bound::Unbounded => false,

        Bound::Included(e) => key > e,

        Bound::Excluded(e) => key >= e,
    }
}

/// Whether `key` was already covered before the cursor position.
fn before_cursor<K: Ord>(cursor: &Cursor<K>, key: &K) -> bool {
    match cursor {
        Cursor::Start(Bound::Unbounded) => false,

        Cursor::Start(Bound::Included(start)) => key < start,

        Cursor::Start(Bound::Excluded(start)) => key <= start,

        Cursor::At(resume) => key < resume,
    }
}
