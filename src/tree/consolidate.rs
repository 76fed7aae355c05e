//! Consolidation: rewriting a tall chain into a fresh base node.
//!
//! The new base carries the chain's current virtual contents and bounds
//! and is installed with one CAS on the chain head; the displaced records
//! go to the reclaimer. A chain is only collapsed once the SMO evidence
//! inside it is no longer needed: a pending split must have its parent
//! entry posted and every absorbed sibling must be unlinked from the
//! parent, otherwise a helper arriving later could not tell the SMO ever
//! happened.

use seize::LocalGuard;

use crate::base::{InnerEntries, LeafEntries};
use crate::mapping::Nid;
use crate::node::Node;
use crate::reclaim::{DisplacedChain, Reclaimer};
use crate::stats::TreeCounters;
use crate::tracing_helpers::trace_log;
use crate::traverse::walk_chain;
use crate::view::{InnerScanHandler, LeafScanHandler};

use super::BwTree;

impl<K, V, R> BwTree<K, V, R>
where
    K: Ord + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    R: Reclaimer<K, V>,
{
    /// Consolidate `nid` if its chain is still over the threshold.
    ///
    /// Opportunistic: any failed precondition or lost CAS drops the
    /// attempt; the chain keeps growing and a later write re-triggers it.
    pub(crate) fn consolidate(&self, ancestors: &[Nid], nid: Nid, guard: &LocalGuard<'_>) {
        let head: *mut Node<K, V> = self.table.at(nid);
        // SAFETY: slot heads stay live under the guard.
        let node: &Node<K, V> = unsafe { &*head };

        if node.is_remove() || (node.height() as usize) <= self.config.chain_threshold {
            return;
        }

        if node.is_leaf() {
            self.consolidate_leaf(ancestors, nid, head, guard);
        } else {
            self.consolidate_inner(ancestors, nid, head, guard);
        }
    }

    fn consolidate_leaf(
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

        let pending_split = scan.observed_split.take();
        let absorbed = std::mem::take(&mut scan.observed_merges);
        if !self.smo_evidence_settled(ancestors, nid, pending_split, &absorbed, guard) {
            return;
        }

        let view = scan.finish();
        let new_base = Node::leaf_base(
            LeafEntries::from_sorted(view.entries),
            view.low,
            view.high,
        );
        self.install_base(nid, head, Box::into_raw(new_base), guard);
    }

    fn consolidate_inner(
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

        let pending_split = scan.observed_split.take();
        let absorbed = std::mem::take(&mut scan.observed_merges);
        if !self.smo_evidence_settled(ancestors, nid, pending_split, &absorbed, guard) {
            return;
        }

        let view = scan.finish();
        let new_base = Node::inner_base(
            InnerEntries::from_sorted(view.first_child, view.entries),
            view.low,
            view.high,
        );
        self.install_base(nid, head, Box::into_raw(new_base), guard);
    }

    /// A chain may only collapse once its split has a parent entry and
    /// its absorbed siblings are unlinked; the deltas are the only
    /// evidence helpers have.
    fn smo_evidence_settled(
        &self,
        ancestors: &[Nid],
        nid: Nid,
        pending_split: Option<(K, Nid)>,
        absorbed: &[(K, Nid)],
        guard: &LocalGuard<'_>,
    ) -> bool {
        if let Some((split_key, right)) = pending_split {
            if !self.help_split(ancestors, nid, &split_key, right, guard) {
                return false;
            }
        }

        if !absorbed.is_empty() {
            let Some((&parent, grand)) = ancestors.split_last() else {
                return false;
            };
            for &(_, victim) in absorbed {
                if !self.complete_merge(grand, parent, victim, guard) {
                    return false;
                }
            }
        }

        true
    }

    fn install_base(
        &self,
        nid: Nid,
        head: *mut Node<K, V>,
        new_base: *mut Node<K, V>,
        guard: &LocalGuard<'_>,
    ) {
        match self.table.cas(nid, head, new_base) {
            Ok(()) => {
                TreeCounters::bump(&self.counters.consolidations);
                trace_log!(nid, "chain consolidated");
                // SAFETY: the displaced chain was unlinked by this CAS
                // under `guard`.
                unsafe {
                    self.reclaimer
                        .retire_chain(DisplacedChain::new(head), guard);
                }
            }

            Err(_) => {
                // SAFETY: never published, still ours.
                unsafe { drop(Box::from_raw(new_base)) };
            }
        }
    }
}
