//! Structural modification operations: split, remove + merge, and their
//! cooperative completion.
//!
//! Every SMO is multi-phase and every phase commits through one CAS, so a
//! thread can die between phases without blocking anyone: the first
//! thread to observe an incomplete SMO finishes it before proceeding.
//!
//! Split: (1) post a split delta on the source, handing the upper half to
//! a freshly allocated sibling id; (2) post a routing entry for the
//! sibling on the parent (or grow a new root).
//!
//! Remove + merge: (1) post a remove delta on the victim, freezing its
//! chain; (2) post a merge delta on the left sibling, widening it over
//! the victim's range; (3) post a routing delete on the parent.
//!
//! The helping checks are what make re-execution safe. A split entry is
//! only posted while the sibling is not remove-marked: the sibling can
//! only become a merge victim after its entry exists, so an absent entry
//! plus a live sibling means "not posted yet", never "posted and gone".
//! A merge delta is only posted while the left sibling's high bound still
//! equals the merge key and the parent head is unchanged since the scan
//! that saw the victim still linked; any competing completion moves one
//! of the two, and the slot CAS then fails.

use seize::LocalGuard;

use crate::bound::BoundKey;
use crate::mapping::Nid;
use crate::node::{Node, NodeBody};
use crate::ordering::{CAS_FAILURE, CAS_SUCCESS};
use crate::reclaim::Reclaimer;
use crate::stats::TreeCounters;
use crate::tracing_helpers::{debug_log, trace_log, warn_log};
use crate::traverse::walk_chain;
use crate::view::{InnerScanHandler, LeafScanHandler};

use super::BwTree;

/// Right sibling named by the first split delta of a chain, if any.
///
/// # Safety
///
/// `head` must be a live chain head under the caller's guard.
unsafe fn pending_split_right<K, V>(head: *mut Node<K, V>) -> Option<Nid> {
    let mut cur: *mut Node<K, V> = head;
    while !cur.is_null() {
        // SAFETY: `next` edges of a live chain stay live under the guard.
        let node: &Node<K, V> = unsafe { &*cur };
        match node.body {
            NodeBody::LeafSplit { right, .. } | NodeBody::InnerSplit { right, .. } => {
                return Some(right);
            }

            _ => cur = node.next,
        }
    }
    None
}

impl<K, V, R> BwTree<K, V, R>
where
    K: Ord + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    R: Reclaimer<K, V>,
{
    // ========================================================================
    //  Split
    // ========================================================================

    /// Split `nid` if it is still oversized: phase 1 of the split
    /// protocol, followed by an immediate attempt at phase 2.
    ///
    /// Opportunistic: any precondition that no longer holds simply drops
    /// the attempt - a later write will re-trigger it.
    pub(crate) fn try_split(&self, ancestors: &[Nid], nid: Nid, guard: &LocalGuard<'_>) {
        let head: *mut Node<K, V> = self.table.at(nid);
        // SAFETY: slot heads stay live under the guard.
        let node: &Node<K, V> = unsafe { &*head };

        if node.is_remove() || node.size() as usize <= self.config.split_threshold {
            return;
        }

        if node.is_leaf() {
            self.try_split_leaf(ancestors, nid, head, guard);
        } else {
            self.try_split_inner(ancestors, nid, head, guard);
        }
    }

    fn try_split_leaf(
        &self,
        ancestors: &[Nid],
        nid: Nid,
        head: *mut Node<K, V>,
        guard: &LocalGuard<'_>,
    ) {
        let mut scan = LeafScanHandler::new();
        // SAFETY: `head` is a published chain head, guard held.
        if unsafe { walk_chain(head, &mut scan) }.is_err() {
            return;
        }

        // One split delta per chain: finish the pending one instead of
        // stacking another.
        if let Some((split_key, right)) = scan.observed_split.take() {
            self.help_split(ancestors, nid, &split_key, right, guard);
            return;
        }

        let view = scan.finish();
        if view.entries.len() < 2 {
            return;
        }

        let pivot: usize = view.entries.len() / 2;
        let mut entries = view.entries;
        let right_entries = entries.split_off(pivot);
        let split_key: K = right_entries[0].0.clone();

        let right_base = Node::leaf_base(
            crate::base::LeafEntries::from_sorted(right_entries),
            BoundKey::Finite(split_key.clone()),
            view.high.clone(),
        );
        let Ok(right_nid) = self.table.allocate(right_base) else {
            warn_log!(nid, "split abandoned: mapping table full");
            return;
        };

        let delta = Node::delta_rebounded(
            // SAFETY: `head` is still live under the guard.
            unsafe { &(*head).header },
            head,
            pivot as u32,
            BoundKey::Finite(split_key.clone()),
            NodeBody::LeafSplit { split_key: split_key.clone(), right: right_nid },
        );
        let raw: *mut Node<K, V> = Box::into_raw(delta);

        match self.table.cas(nid, head, raw) {
            Ok(()) => {
                TreeCounters::bump(&self.counters.splits);
                debug_log!(nid, right_nid, "leaf split posted");
                self.help_split(ancestors, nid, &split_key, right_nid, guard);
            }

            Err(_) => {
                // SAFETY: CAS failed, the delta is still ours. The sibling
                // id and node leak under the base allocation policy.
                unsafe { drop(Box::from_raw(raw)) };
            }
        }
    }

    fn try_split_inner(
        &self,
        ancestors: &[Nid],
        nid: Nid,
        head: *mut Node<K, V>,
        guard: &LocalGuard<'_>,
    ) {
        let mut scan = InnerScanHandler::new();
        // SAFETY: `head` is a published chain head, guard held.
        if unsafe { walk_chain(head, &mut scan) }.is_err() {
            return;
        }

        if let Some((split_key, right)) = scan.observed_split.take() {
            self.help_split(ancestors, nid, &split_key, right, guard);
            return;
        }

        let view = scan.finish();
        if view.entries.is_empty() {
            return;
        }

        // Pivot over children: the left half keeps `keep` children, the
        // separator at `keep - 1` becomes the split key and its child the
        // sibling's leftmost.
        let keep: usize = view.child_count() / 2;
        let Some(keep_seps) = keep.checked_sub(1) else {
            return;
        };

        let mut entries = view.entries;
        let right_entries = entries.split_off(keep);
        let Some((split_key, right_first)) = entries.pop() else {
            return;
        };
        debug_assert_eq!(entries.len(), keep_seps);

        let right_base = Node::inner_base(
            crate::base::InnerEntries::from_sorted(right_first, right_entries),
            BoundKey::Finite(split_key.clone()),
            view.high.clone(),
        );
        let Ok(right_nid) = self.table.allocate(right_base) else {
            warn_log!(nid, "split abandoned: mapping table full");
            return;
        };

        let delta = Node::delta_rebounded(
            // SAFETY: `head` is still live under the guard.
            unsafe { &(*head).header },
            head,
            keep as u32,
            BoundKey::Finite(split_key.clone()),
            NodeBody::InnerSplit { split_key: split_key.clone(), right: right_nid },
        );
        let raw: *mut Node<K, V> = Box::into_raw(delta);

        match self.table.cas(nid, head, raw) {
            Ok(()) => {
                TreeCounters::bump(&self.counters.splits);
                debug_log!(nid, right_nid, "inner split posted");
                self.help_split(ancestors, nid, &split_key, right_nid, guard);
            }

            Err(_) => {
                // SAFETY: CAS failed, the delta is still ours.
                unsafe { drop(Box::from_raw(raw)) };
            }
        }
    }

    /// Phase 2 of a split observed on `child`: make sure the parent
    /// routes `[split_key, ..)` to `right`.
    ///
    /// Returns true when the routing entry is known to exist (or the
    /// sibling has since been removed, in which case the merge protocol
    /// owns the entry's fate). A false return means the helper could not
    /// verify completion; callers that need certainty retry later.
    pub(crate) fn help_split(
        &self,
        ancestors: &[Nid],
        child: Nid,
        split_key: &K,
        right: Nid,
        guard: &LocalGuard<'_>,
    ) -> bool {
        // SAFETY: slot heads stay live under the guard.
        if unsafe { &*self.table.at(right) }.is_remove() {
            // Entry existed and is being (or has been) unlinked; do not
            // resurrect it.
            return true;
        }

        let Some((&parent, grand)) = ancestors.split_last() else {
            return self.grow_root(child, split_key, right);
        };

        let mut pnid: Nid = parent;
        loop {
            let phead: *mut Node<K, V> = self.table.at(pnid);
            // SAFETY: slot heads stay live under the guard.
            let pnode: &Node<K, V> = unsafe { &*phead };

            if pnode.is_remove() {
                // Parent is mid-merge; the descent restarts above it.
                return false;
            }

            let mut scan = InnerScanHandler::new();
            // SAFETY: `phead` is a published chain head, guard held.
            if unsafe { walk_chain(phead, &mut scan) }.is_err() {
                return false;
            }
            let parent_split = scan.observed_split.take();
            let view = scan.finish();

            if !view.high.admits_from_above(split_key) {
                // The separator belongs to the parent's right sibling.
                match parent_split {
                    Some((_, parent_right)) => {
                        pnid = parent_right;
                        continue;
                    }

                    None => return false,
                }
            }

            if view.child_at_sep(split_key).is_some() {
                return true;
            }

            // Re-check the sibling now that the entry is known absent in
            // this head: a removed sibling here means the entry was
            // already posted and unlinked through an older head.
            // SAFETY: slot heads stay live under the guard.
            if unsafe { &*self.table.at(right) }.is_remove() {
                return true;
            }

            let (next_sep, next_child) = view.successor_of(split_key);
            let new_size: u32 = (view.child_count() + 1) as u32;
            let delta = Node::delta(
                pnode.header(),
                phead,
                new_size,
                NodeBody::InnerInsert {
                    sep: split_key.clone(),
                    child: right,
                    next_sep,
                    next_child,
                },
            );
            let raw: *mut Node<K, V> = Box::into_raw(delta);

            match self.table.cas(pnid, phead, raw) {
                Ok(()) => {
                    debug_log!(parent = pnid, child, right, "split entry posted");
                    self.after_update(grand, pnid, new_size, pnode.height() + 1, false, guard);
                    return true;
                }

                Err(_) => {
                    // SAFETY: CAS failed, the delta is still ours.
                    unsafe { drop(Box::from_raw(raw)) };
                }
            }
        }
    }

    /// Root split: allocate a two-entry inner root over the old root and
    /// its new sibling, then swing the distinguished root id.
    ///
    /// Returns true only when this call's CAS installed the new root;
    /// a stale or lost race returns false and the caller must not assume
    /// the entry exists on this path.
    fn grow_root(&self, old_root: Nid, split_key: &K, right: Nid) -> bool {
        if self.root_nid() != old_root {
            // Either another helper grew the root for this same split, or
            // the stack was stale; only the descent can tell.
            return false;
        }

        let entries = crate::base::InnerEntries::from_sorted(
            old_root,
            vec![(split_key.clone(), right)],
        );
        let new_root = Node::inner_base(entries, BoundKey::Infinite, BoundKey::Infinite);

        let Ok(new_nid) = self.table.allocate(new_root) else {
            warn_log!("root growth abandoned: mapping table full");
            return false;
        };

        match self
            .root
            .compare_exchange(old_root, new_nid, CAS_SUCCESS, CAS_FAILURE)
        {
            Ok(_) => {
                debug_log!(old_root, new_root = new_nid, right, "root grown");
                true
            }

            // Lost the race; the freshly allocated root leaks under the
            // base allocation policy.
            Err(_) => false,
        }
    }

    // ========================================================================
    //  Remove + merge
    // ========================================================================

    /// Start a merge of `nid` into its left sibling if it is still
    /// underpopulated: phase 1 (remove), then phases 2 and 3.
    pub(crate) fn try_start_merge(&self, ancestors: &[Nid], nid: Nid, guard: &LocalGuard<'_>) {
        let Some((&parent, grand)) = ancestors.split_last() else {
            // The root has no sibling to merge into.
            return;
        };

        let head: *mut Node<K, V> = self.table.at(nid);
        // SAFETY: slot heads stay live under the guard.
        let node: &Node<K, V> = unsafe { &*head };

        if node.is_remove() {
            self.complete_merge(grand, parent, nid, guard);
            return;
        }

        if node.size() as usize >= self.config.merge_threshold {
            return;
        }

        // A chain with an unfinished split must not be frozen: the
        // sibling's routing entry still has to be posted through it.
        // SAFETY: `head` is live under the guard.
        if unsafe { pending_split_right(head) }.is_some() {
            return;
        }

        // The victim needs a left sibling under the current parent.
        let phead: *mut Node<K, V> = self.table.at(parent);
        // SAFETY: slot heads stay live under the guard.
        if unsafe { &*phead }.is_remove() {
            return;
        }
        let mut scan = InnerScanHandler::new();
        // SAFETY: `phead` is a published chain head, guard held.
        if unsafe { walk_chain(phead, &mut scan) }.is_err() {
            return;
        }
        if scan.finish().position_of_child(nid).is_none() {
            return;
        }

        // Phase 1: freeze the victim.
        let body: NodeBody<K, V> = if node.is_leaf() {
            NodeBody::LeafRemove
        } else {
            NodeBody::InnerRemove
        };
        let delta = Node::delta(node.header(), head, node.size(), body);
        let raw: *mut Node<K, V> = Box::into_raw(delta);

        match self.table.cas(nid, head, raw) {
            Ok(()) => {
                TreeCounters::bump(&self.counters.merges);
                debug_log!(nid, "remove posted, merging into left sibling");
                self.complete_merge(grand, parent, nid, guard);
            }

            Err(_) => {
                // SAFETY: CAS failed, the delta is still ours.
                unsafe { drop(Box::from_raw(raw)) };
            }
        }
    }

    /// Help an observed merge along from wherever it stands.
    pub(crate) fn help_merge(&self, ancestors: &[Nid], victim: Nid, guard: &LocalGuard<'_>) {
        if let Some((&parent, grand)) = ancestors.split_last() {
            self.complete_merge(grand, parent, victim, guard);
        }
        // With no known parent the stack was stale (an old root);
        // restarting the descent finds the current path and helps there.
    }

    /// Drive phases 2 and 3 of a merge to completion.
    ///
    /// Returns true once the victim's routing entry is confirmed gone
    /// from the parent; false when the helper had to give up (ambient
    /// contention - some other thread is making progress).
    pub(crate) fn complete_merge(
        &self,
        grand: &[Nid],
        parent: Nid,
        victim: Nid,
        guard: &LocalGuard<'_>,
    ) -> bool {
        let victim_head: *mut Node<K, V> = self.table.at(victim);
        // SAFETY: slot heads stay live under the guard.
        let victim_node: &Node<K, V> = unsafe { &*victim_head };
        if !victim_node.is_remove() {
            return true;
        }

        let mut pnid: Nid = parent;
        loop {
            let phead: *mut Node<K, V> = self.table.at(pnid);
            // SAFETY: slot heads stay live under the guard.
            let pnode: &Node<K, V> = unsafe { &*phead };

            if pnode.is_remove() {
                // The parent is itself a merge victim; finish that merge
                // first, then let the caller re-descend.
                if let Some((&grandparent, great)) = grand.split_last() {
                    self.complete_merge(great, grandparent, pnid, guard);
                }
                return false;
            }

            let mut scan = InnerScanHandler::new();
            // SAFETY: `phead` is a published chain head, guard held.
            if unsafe { walk_chain(phead, &mut scan) }.is_err() {
                return false;
            }
            let parent_split = scan.observed_split.take();
            let view = scan.finish();

            let Some(index) = view.position_of_child(victim) else {
                // Not routed here: either phase 3 is done, or a parent
                // split moved the entry to the right.
                if let Some(merge_key) = victim_node.header().low.as_finite() {
                    if !view.high.admits_from_above(merge_key) {
                        match parent_split {
                            Some((_, parent_right)) => {
                                pnid = parent_right;
                                continue;
                            }

                            None => return false,
                        }
                    }
                }
                return true;
            };

            let merge_key: K = view.entries[index].0.clone();
            let (_, left) = view.left_neighbor(index);

            // Phase 2: the left sibling absorbs the victim's chain.
            if !self.ensure_merge_posted(
                grand, pnid, phead, &merge_key, left, victim, victim_node, guard,
            ) {
                return false;
            }

            // Phase 3: drop the victim's routing entry.
            let (prev_sep, prev_child) = view.left_neighbor(index);
            let (next_sep, next_child) = view.right_neighbor(index);
            let new_size: u32 = (view.child_count() - 1) as u32;
            let delta = Node::delta(
                pnode.header(),
                phead,
                new_size,
                NodeBody::InnerDelete {
                    sep: merge_key,
                    child: victim,
                    prev_sep,
                    prev_child,
                    next_sep,
                    next_child,
                },
            );
            let raw: *mut Node<K, V> = Box::into_raw(delta);

            match self.table.cas(pnid, phead, raw) {
                Ok(()) => {
                    debug_log!(parent = pnid, victim, "merge entry unlinked");
                    self.after_update(grand, pnid, new_size, pnode.height() + 1, true, guard);
                    return true;
                }

                Err(_) => {
                    // SAFETY: CAS failed, the delta is still ours.
                    unsafe { drop(Box::from_raw(raw)) };
                    // Re-scan: the parent moved under us.
                }
            }
        }
    }

    /// Phase 2: post (or confirm) the merge delta on the left sibling.
    ///
    /// The posting order is what makes helping idempotent: the left head
    /// is validated to still end at `merge_key`, then the parent head is
    /// confirmed unchanged since the scan that saw the victim linked, and
    /// only then is the CAS attempted against that exact left head. Any
    /// competing absorb or unlink moves one of those pointers first.
    #[allow(clippy::too_many_arguments)]
    fn ensure_merge_posted(
        &self,
        grand: &[Nid],
        parent: Nid,
        phead: *mut Node<K, V>,
        merge_key: &K,
        left: Nid,
        victim: Nid,
        victim_node: &Node<K, V>,
        guard: &LocalGuard<'_>,
    ) -> bool {
        let victim_chain: *mut Node<K, V> = victim_node.next;
        let victim_high: BoundKey<K> = victim_node.header().high.clone();
        let victim_size: u32 = victim_node.size();

        let mut lnid: Nid = left;
        loop {
            let lhead: *mut Node<K, V> = self.table.at(lnid);
            // SAFETY: slot heads stay live under the guard.
            let lnode: &Node<K, V> = unsafe { &*lhead };

            if lnode.is_remove() {
                // The left sibling is a victim too; its merge must finish
                // before the parent view settles.
                self.complete_merge(grand, parent, lnid, guard);
                return false;
            }

            match lnode.header().high.as_finite() {
                Some(high) if high == merge_key => {
                    // Adjacent and not yet widened: fall through to post.
                }

                Some(high) if high < merge_key => {
                    // The sibling split; its right half is the true left
                    // neighbor now.
                    // SAFETY: `lhead` is live under the guard.
                    match unsafe { pending_split_right(lhead) } {
                        Some(right) => {
                            lnid = right;
                            continue;
                        }

                        None => return false,
                    }
                }

                // The sibling already covers the victim's range.
                _ => return true,
            }

            debug_assert_eq!(lnode.is_leaf(), victim_node.is_leaf());

            // The parent must not have moved since the scan that saw the
            // victim still linked; checked after loading `lhead` so a
            // competing completion invalidates the CAS below.
            if self.table.at(parent) != phead {
                return false;
            }

            let merged_size: u32 = lnode.size() + victim_size;
            let body: NodeBody<K, V> = if lnode.is_leaf() {
                NodeBody::LeafMerge {
                    merge_key: merge_key.clone(),
                    right_chain: victim_chain,
                    right: victim,
                }
            } else {
                NodeBody::InnerMerge {
                    merge_key: merge_key.clone(),
                    right_chain: victim_chain,
                    right: victim,
                }
            };
            let delta = Node::delta_rebounded(
                lnode.header(),
                lhead,
                merged_size,
                victim_high.clone(),
                body,
            );
            let raw: *mut Node<K, V> = Box::into_raw(delta);

            match self.table.cas(lnid, lhead, raw) {
                Ok(()) => {
                    trace_log!(left = lnid, victim, "merge delta posted");
                    return true;
                }

                Err(_) => {
                    // SAFETY: CAS failed, the delta is still ours.
                    unsafe { drop(Box::from_raw(raw)) };
                    // Re-examine the sibling.
                }
            }
        }
    }
}
