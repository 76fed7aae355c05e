//! Deferred reclamation of displaced chains.
//!
//! A successful CAS that unlinks a chain (consolidation installing a fresh
//! base) transfers ownership of the displaced records to the tree's
//! [`Reclaimer`]. Readers may still be walking those records, so freeing
//! must wait for a grace period; the default [`EpochReclaimer`] defers
//! through the seize guard held by every operation, which guarantees the
//! free happens only after all guards active at retire time have dropped.
//!
//! Ownership model: a chain owns its records through `next` edges only.
//! The `right_chain` edge of a merge delta is a non-owning alias into the
//! absorbed sibling's chain, which stays owned by that sibling's
//! mapping-table slot until tree teardown. Reclaiming a displaced chain
//! therefore never follows merge edges.

use seize::{Collector, Guard, LocalGuard};

use crate::node::Node;

/// A chain segment unlinked by a successful CAS, ready to retire.
///
/// The segment runs from the displaced head down to and including its
/// base; nothing in the tree can reach it through the mapping table any
/// more.
pub struct DisplacedChain<K, V> {
    head: *mut Node<K, V>,
}

impl<K, V> DisplacedChain<K, V> {
    pub(crate) fn new(head: *mut Node<K, V>) -> Self {
        debug_assert!(!head.is_null());
        Self { head }
    }
}

/// Grace-period reclamation for unlinked chain heads and nodes.
///
/// Implementations must guarantee that the chain is freed only after
/// every thread that could have loaded its head has finished its walk.
pub trait Reclaimer<K, V>: Send + Sync {
    /// Take ownership of a displaced chain.
    ///
    /// # Safety
    ///
    /// The chain must have been unlinked by a successful CAS on its slot,
    /// and `guard` must be the epoch guard the unlinking operation ran
    /// under.
    unsafe fn retire_chain(&self, chain: DisplacedChain<K, V>, guard: &LocalGuard<'_>);
}

/// Default reclaimer: defers the free to the end of the current epochs.
#[derive(Debug, Default, Clone, Copy)]
pub struct EpochReclaimer;

impl<K: Send, V: Send> Reclaimer<K, V> for EpochReclaimer {
    unsafe fn retire_chain(&self, chain: DisplacedChain<K, V>, guard: &LocalGuard<'_>) {
        // SAFETY: the chain is unreachable through the table (caller
        // contract); seize invokes the reclaimer only after all guards
        // active now have dropped.
        unsafe { guard.defer_retire(chain.head, reclaim_chain::<K, V>) };
    }
}

/// The leaking policy of the minimal mapping table: displaced chains are
/// simply abandoned. For leak-checked single-shot tests and diagnostics;
/// a long-running tree must use [`EpochReclaimer`].
#[derive(Debug, Default, Clone, Copy)]
pub struct LeakReclaimer;

impl<K: Send, V: Send> Reclaimer<K, V> for LeakReclaimer {
    unsafe fn retire_chain(&self, chain: DisplacedChain<K, V>, _guard: &LocalGuard<'_>) {
        let _ = chain;
    }
}

/// Seize callback: free a whole displaced segment.
///
/// # Safety
///
/// `head` must be an unlinked chain segment allocated from `Box`es, with
/// no live readers (seize guarantees the latter at callback time).
pub(crate) unsafe fn reclaim_chain<K, V>(head: *mut Node<K, V>, _collector: &Collector) {
    // SAFETY: forwarded caller contract.
    unsafe { drop_chain(head) };
}

/// Free every record of a chain segment by walking `next` edges.
///
/// Merge `right_chain` edges are not followed; the absorbed chains they
/// point at are owned and freed by their own slots.
///
/// # Safety
///
/// Every record reachable from `head` through `next` must be exclusively
/// owned by the caller and allocated from a `Box`.
pub(crate) unsafe fn drop_chain<K, V>(head: *mut Node<K, V>) {
    let mut cur: *mut Node<K, V> = head;
    while !cur.is_null() {
        // SAFETY: caller owns the segment; each record is boxed.
        let node: Box<Node<K, V>> = unsafe { Box::from_raw(cur) };
        cur = node.next;
        drop(node);
    }
}
