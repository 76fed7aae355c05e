//! Generic delta-chain traversal.
//!
//! One walk serves every reader and writer in the tree: it steps from the
//! chain head toward the base, dispatching each record to a
//! [`ChainHandler`] which decides how to advance. Point reads, write
//! intent probes, routing, consolidation scans, and the invariant checker
//! are all handlers over this single walk.
//!
//! # Handler contract
//!
//! - A base record terminates its chain: the handler must return
//!   [`Advance::Finished`], [`Advance::Abort`], or, when it queued an
//!   absorbed sibling chain earlier, [`Advance::Jump`] into that chain.
//!   Returning [`Advance::Next`] from a base is an invariant violation.
//! - A merge record either continues below (`Next`, target left of the
//!   merge key), jumps into the absorbed chain (`Jump`), or finishes.
//! - A remove record is traversed like any other delta, but handlers with
//!   write intent treat it as terminal and abort.

use crate::base::{InnerEntries, LeafEntries};
use crate::bound::BoundKey;
use crate::mapping::Nid;
use crate::node::{Node, NodeBody};

/// Upper bound on walk steps. Chains are bounded by the consolidation
/// threshold plus absorbed siblings; hitting this indicates a cycle from
/// memory corruption.
const MAX_WALK_STEPS: usize = 1 << 20;

/// How the walk proceeds after a handler saw a record.
pub(crate) enum Advance<K, V> {
    /// Step to the record's `next` pointer.
    Next,

    /// Continue at an explicit record (descent into an absorbed chain).
    Jump(*mut Node<K, V>),

    /// The handler has its answer.
    Finished,

    /// Abandon the chain; the caller acts on the verdict.
    Abort(Abort),
}

/// Why a walk abandoned its chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Abort {
    /// A split moved the target past this node's high bound; continue at
    /// the right sibling.
    GoRight(Nid),

    /// The virtual node is removed; re-descend via the parent after
    /// helping the merge along.
    Removed,
}

/// Per-record dispatch for [`walk_chain`].
///
/// Default method bodies assert: a handler is only ever driven over the
/// chain flavor it understands, so an unexpected record kind is an
/// invariant violation (fatal under debug, skipped in release).
pub(crate) trait ChainHandler<K, V> {
    /// Called once with the chain head before the walk starts.
    fn init(&mut self, head: &Node<K, V>) {
        let _ = head;
    }

    fn leaf_base(&mut self, node: &Node<K, V>, base: &LeafEntries<K, V>) -> Advance<K, V> {
        let _ = (node, base);
        debug_assert!(false, "handler does not expect a leaf base");
        Advance::Finished
    }

    fn leaf_insert(&mut self, node: &Node<K, V>, key: &K, value: &V) -> Advance<K, V> {
        let _ = (node, key, value);
        debug_assert!(false, "handler does not expect a leaf insert");
        Advance::Next
    }

    fn leaf_delete(&mut self, node: &Node<K, V>, key: &K) -> Advance<K, V> {
        let _ = (node, key);
        debug_assert!(false, "handler does not expect a leaf delete");
        Advance::Next
    }

    fn leaf_split(&mut self, node: &Node<K, V>, split_key: &K, right: Nid) -> Advance<K, V> {
        let _ = (node, split_key, right);
        debug_assert!(false, "handler does not expect a leaf split");
        Advance::Next
    }

    fn leaf_remove(&mut self, node: &Node<K, V>) -> Advance<K, V> {
        let _ = node;
        debug_assert!(false, "handler does not expect a leaf remove");
        Advance::Abort(Abort::Removed)
    }

    fn leaf_merge(
        &mut self,
        node: &Node<K, V>,
        merge_key: &K,
        right_chain: *mut Node<K, V>,
        right: Nid,
    ) -> Advance<K, V> {
        let _ = (node, merge_key, right_chain, right);
        debug_assert!(false, "handler does not expect a leaf merge");
        Advance::Next
    }

    fn inner_base(&mut self, node: &Node<K, V>, base: &InnerEntries<K>) -> Advance<K, V> {
        let _ = (node, base);
        debug_assert!(false, "handler does not expect an inner base");
        Advance::Finished
    }

    fn inner_insert(
        &mut self,
        node: &Node<K, V>,
        sep: &K,
        child: Nid,
        next_sep: &BoundKey<K>,
        next_child: Nid,
    ) -> Advance<K, V> {
        let _ = (node, sep, child, next_sep, next_child);
        debug_assert!(false, "handler does not expect an inner insert");
        Advance::Next
    }

    #[allow(clippy::too_many_arguments)]
    fn inner_delete(
        &mut self,
        node: &Node<K, V>,
        sep: &K,
        child: Nid,
        prev_sep: &BoundKey<K>,
        prev_child: Nid,
        next_sep: &BoundKey<K>,
        next_child: Nid,
    ) -> Advance<K, V> {
        let _ = (node, sep, child, prev_sep, prev_child, next_sep, next_child);
        debug_assert!(false, "handler does not expect an inner delete");
        Advance::Next
    }

    fn inner_split(&mut self, node: &Node<K, V>, split_key: &K, right: Nid) -> Advance<K, V> {
        let _ = (node, split_key, right);
        debug_assert!(false, "handler does not expect an inner split");
        Advance::Next
    }

    fn inner_remove(&mut self, node: &Node<K, V>) -> Advance<K, V> {
        let _ = node;
        debug_assert!(false, "handler does not expect an inner remove");
        Advance::Abort(Abort::Removed)
    }

    fn inner_merge(
        &mut self,
        node: &Node<K, V>,
        merge_key: &K,
        right_chain: *mut Node<K, V>,
        right: Nid,
    ) -> Advance<K, V> {
        let _ = (node, merge_key, right_chain, right);
        debug_assert!(false, "handler does not expect an inner merge");
        Advance::Next
    }
}

/// Walk a chain from `head` toward its base, dispatching every record to
/// `handler`.
///
/// # Safety
///
/// `head` must point at a published chain head (or a record reachable from
/// one) and the caller must hold an epoch guard for the duration of the
/// walk, so every record reached through `next` and merge `right_chain`
/// pointers stays live.
pub(crate) unsafe fn walk_chain<K, V, H>(head: *mut Node<K, V>, handler: &mut H) -> Result<(), Abort>
where
    H: ChainHandler<K, V>,
{
    debug_assert!(!head.is_null(), "chain head is never null");

    // SAFETY: caller guarantees `head` is live under the held guard.
    handler.init(unsafe { &*head });

    let mut cur: *mut Node<K, V> = head;
    let mut steps: usize = 0;

    loop {
        steps += 1;
        debug_assert!(steps < MAX_WALK_STEPS, "delta chain cycle");

        // SAFETY: `cur` is `head`, a `next` edge, or a merge `right_chain`
        // edge of a live record; all stay live under the caller's guard.
        let node: &Node<K, V> = unsafe { &*cur };

        let advance: Advance<K, V> = match &node.body {
            NodeBody::LeafBase(base) => handler.leaf_base(node, base),
            NodeBody::LeafInsert { key, value } => handler.leaf_insert(node, key, value),
            NodeBody::LeafDelete { key } => handler.leaf_delete(node, key),
            NodeBody::LeafSplit { split_key, right } => {
                handler.leaf_split(node, split_key, *right)
            }
            NodeBody::LeafRemove => handler.leaf_remove(node),
            NodeBody::LeafMerge { merge_key, right_chain, right } => {
                handler.leaf_merge(node, merge_key, *right_chain, *right)
            }
            NodeBody::InnerBase(base) => handler.inner_base(node, base),
            NodeBody::InnerInsert { sep, child, next_sep, next_child } => {
                handler.inner_insert(node, sep, *child, next_sep, *next_child)
            }
            NodeBody::InnerDelete {
                sep,
                child,
                prev_sep,
                prev_child,
                next_sep,
                next_child,
            } => handler.inner_delete(
                node, sep, *child, prev_sep, *prev_child, next_sep, *next_child,
            ),
            NodeBody::InnerSplit { split_key, right } => {
                handler.inner_split(node, split_key, *right)
            }
            NodeBody::InnerRemove => handler.inner_remove(node),
            NodeBody::InnerMerge { merge_key, right_chain, right } => {
                handler.inner_merge(node, merge_key, *right_chain, *right)
            }
        };

        match advance {
            Advance::Next => {
                debug_assert!(!node.is_base(), "a base record terminates its chain");
                cur = node.next;
            }

            Advance::Jump(target) => {
                debug_assert!(!target.is_null(), "jump target is never null");
                cur = target;
            }

            Advance::Finished => return Ok(()),

            Advance::Abort(abort) => return Err(abort),
        }
    }
}
