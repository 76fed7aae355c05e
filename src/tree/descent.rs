//! Root descent: from the distinguished root id to the owning leaf.
//!
//! The descent keeps a stack of ancestor ids so that structural
//! modifications discovered on the way down can be helped: a split delta
//! needs its parent-side entry posted, a remove delta needs its merge
//! driven to completion. Helping always precedes further progress, so no
//! operation returns success over a path with a known half-done SMO.

use seize::LocalGuard;

use crate::mapping::Nid;
use crate::node::Node;
use crate::reclaim::Reclaimer;
use crate::traverse::{walk_chain, Abort};
use crate::tracing_helpers::trace_log;
use crate::view::{ChildSelectHandler, RouteTarget};

use super::BwTree;

/// Where a descent landed: the owning leaf and the inner ids above it,
/// root first.
pub(crate) struct DescentTarget {
    pub nid: Nid,
    pub parents: Vec<Nid>,
}

impl<K, V, R> BwTree<K, V, R>
where
    K: Ord + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    R: Reclaimer<K, V>,
{
    /// Descend from the root to the leaf owning `target`.
    ///
    /// Restarts from a fresh root load whenever the path runs into a
    /// removed node (after helping its merge along); moves right at
    /// splits and descends into absorbed chains transparently.
    pub(crate) fn descend_to_leaf(
        &self,
        target: RouteTarget<'_, K>,
        guard: &LocalGuard<'_>,
    ) -> DescentTarget {
        'restart: loop {
            let mut parents: Vec<Nid> = Vec::new();
            let mut nid: Nid = self.root_nid();

            loop {
                let head: *mut Node<K, V> = self.table.at(nid);
                if head.is_null() {
                    // Racing allocation of a fresh root; retry.
                    continue 'restart;
                }

                // SAFETY: non-null slot heads stay live under the guard.
                let node: &Node<K, V> = unsafe { &*head };

                if node.is_remove() {
                    self.help_merge(&parents, nid, guard);
                    trace_log!(nid, "descent hit a removed node, restarting");
                    continue 'restart;
                }

                if node.is_leaf() {
                    return DescentTarget { nid, parents };
                }

                let mut select = ChildSelectHandler::new(target.clone());
                // SAFETY: `head` is a published chain head, guard held.
                match unsafe { walk_chain(head, &mut select) } {
                    Ok(()) => {
                        if let Some((split_key, right)) = select.observed_split.take() {
                            self.help_split(&parents, nid, &split_key, right, guard);
                        }

                        let Some(child) = select.child else {
                            debug_assert!(false, "routing walk finished without a child");
                            continue 'restart;
                        };
                        parents.push(nid);
                        nid = child;
                    }

                    Err(Abort::GoRight(right)) => {
                        if let Some((split_key, r)) = select.observed_split.take() {
                            self.help_split(&parents, nid, &split_key, r, guard);
                        }
                        // Same level, same parent stack.
                        nid = right;
                    }

                    Err(Abort::Removed) => {
                        self.help_merge(&parents, nid, guard);
                        continue 'restart;
                    }
                }
            }
        }
    }
}
