//! The write path: insert and delete as delta postings.
//!
//! Both operations share a shape: descend to the owning leaf, probe the
//! chain for the key's current membership, post a one-record delta with a
//! single CAS on the leaf's slot. A failed CAS means another writer got
//! in first; the delta was never observable, so it is taken back apart
//! and the probe re-runs against the new head. Re-descending from the
//! root is only needed when the failure reveals a split or a remove.

use seize::LocalGuard;

use crate::error::{DeleteOutcome, InsertOutcome, TreeError};
use crate::mapping::Nid;
use crate::node::{Node, NodeBody};
use crate::ordering::COUNTER;
use crate::reclaim::Reclaimer;
use crate::tracing_helpers::trace_log;
use crate::traverse::{walk_chain, Abort};
use crate::view::{RouteTarget, WriteIntentHandler};

use super::BwTree;

impl<K, V, R> BwTree<K, V, R>
where
    K: Ord + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    R: Reclaimer<K, V>,
{
    /// Insert `key -> value`.
    ///
    /// Returns [`InsertOutcome::Duplicate`] with the rejected value when
    /// the key is already present; the tree is unchanged in that case.
    ///
    /// # Errors
    ///
    /// Currently infallible in practice: posting a data delta allocates no
    /// node id. The error channel is kept for parity with the structural
    /// path.
    pub fn insert(&self, key: K, value: V) -> Result<InsertOutcome<V>, TreeError> {
        let guard: LocalGuard<'_> = self.collector.enter();
        let mut value: V = value;

        loop {
            let target = self.descend_to_leaf(RouteTarget::Key(&key), &guard);
            let mut nid: Nid = target.nid;

            'chain: loop {
                let head: *mut Node<K, V> = self.table.at(nid);
                // SAFETY: slot heads stay live under the guard.
                let node: &Node<K, V> = unsafe { &*head };

                if node.is_remove() {
                    self.help_merge(&target.parents, nid, &guard);
                    break 'chain;
                }

                let mut probe = WriteIntentHandler::new(&key);
                // SAFETY: `head` is a published chain head, guard held.
                match unsafe { walk_chain(head, &mut probe) } {
                    Err(Abort::GoRight(right)) => {
                        if let Some((split_key, r)) = probe.observed_split.take() {
                            self.help_split(&target.parents, nid, &split_key, r, &guard);
                        }
                        nid = right;
                        continue 'chain;
                    }

                    Err(Abort::Removed) => {
                        self.help_merge(&target.parents, nid, &guard);
                        break 'chain;
                    }

                    Ok(()) => {
                        if let Some((split_key, r)) = probe.observed_split.take() {
                            self.help_split(&target.parents, nid, &split_key, r, &guard);
                        }

                        if probe.present == Some(true) {
                            return Ok(InsertOutcome::Duplicate(value));
                        }

                        let new_size: u32 = node.size() + 1;
                        let delta = Node::delta(
                            node.header(),
                            head,
                            new_size,
                            NodeBody::LeafInsert { key: key.clone(), value },
                        );
                        self.deltas.record_alloc(&delta);
                        let raw: *mut Node<K, V> = Box::into_raw(delta);

                        match self.table.cas(nid, head, raw) {
                            Ok(()) => {
                                self.count.fetch_add(1, COUNTER);
                                trace_log!(nid, size = new_size, "leaf insert posted");
                                self.after_update(
                                    &target.parents,
                                    nid,
                                    new_size,
                                    node.height() + 1,
                                    false,
                                    &guard,
                                );
                                return Ok(InsertOutcome::Inserted);
                            }

                            Err(_) => {
                                // Never observable; take the payload back
                                // and re-probe against the new head.
                                // SAFETY: CAS failed, `raw` is still ours.
                                let boxed: Box<Node<K, V>> = unsafe { Box::from_raw(raw) };
                                self.deltas.record_free(&boxed);
                                let (_key, recovered) = boxed.into_leaf_insert();
                                value = recovered;
                                continue 'chain;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Delete `key`.
    ///
    /// Returns [`DeleteOutcome::NotFound`] when the key is absent from
    /// the current virtual view; the tree is unchanged in that case.
    ///
    /// # Errors
    ///
    /// Currently infallible in practice, as for [`insert`](Self::insert).
    pub fn delete(&self, key: &K) -> Result<DeleteOutcome, TreeError> {
        let guard: LocalGuard<'_> = self.collector.enter();

        loop {
            let target = self.descend_to_leaf(RouteTarget::Key(key), &guard);
            let mut nid: Nid = target.nid;

            'chain: loop {
                let head: *mut Node<K, V> = self.table.at(nid);
                // SAFETY: slot heads stay live under the guard.
                let node: &Node<K, V> = unsafe { &*head };

                if node.is_remove() {
                    self.help_merge(&target.parents, nid, &guard);
                    break 'chain;
                }

                let mut probe = WriteIntentHandler::new(key);
                // SAFETY: `head` is a published chain head, guard held.
                match unsafe { walk_chain(head, &mut probe) } {
                    Err(Abort::GoRight(right)) => {
                        if let Some((split_key, r)) = probe.observed_split.take() {
                            self.help_split(&target.parents, nid, &split_key, r, &guard);
                        }
                        nid = right;
                        continue 'chain;
                    }

                    Err(Abort::Removed) => {
                        self.help_merge(&target.parents, nid, &guard);
                        break 'chain;
                    }

                    Ok(()) => {
                        if let Some((split_key, r)) = probe.observed_split.take() {
                            self.help_split(&target.parents, nid, &split_key, r, &guard);
                        }

                        if probe.present != Some(true) {
                            return Ok(DeleteOutcome::NotFound);
                        }

                        let new_size: u32 = node.size() - 1;
                        let delta = Node::delta(
                            node.header(),
                            head,
                            new_size,
                            NodeBody::LeafDelete { key: key.clone() },
                        );
                        self.deltas.record_alloc(&delta);
                        let raw: *mut Node<K, V> = Box::into_raw(delta);

                        match self.table.cas(nid, head, raw) {
                            Ok(()) => {
                                self.count.fetch_sub(1, COUNTER);
                                trace_log!(nid, size = new_size, "leaf delete posted");
                                self.after_update(
                                    &target.parents,
                                    nid,
                                    new_size,
                                    node.height() + 1,
                                    true,
                                    &guard,
                                );
                                return Ok(DeleteOutcome::Deleted);
                            }

                            Err(_) => {
                                // SAFETY: CAS failed, `raw` is still ours.
                                let boxed: Box<Node<K, V>> = unsafe { Box::from_raw(raw) };
                                self.deltas.record_free(&boxed);
                                drop(boxed);
                                continue 'chain;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Structural follow-ups after a committed write: oversized nodes
    /// split, underpopulated nodes merge leftward, tall chains
    /// consolidate.
    pub(crate) fn after_update(
        &self,
        ancestors: &[Nid],
        nid: Nid,
        size: u32,
        height: u16,
        was_delete: bool,
        guard: &LocalGuard<'_>,
    ) {
        if size as usize > self.config.split_threshold {
            self.try_split(ancestors, nid, guard);
        } else if was_delete && (size as usize) < self.config.merge_threshold {
            self.try_start_merge(ancestors, nid, guard);
        } else if height as usize > self.config.chain_threshold {
            self.consolidate(ancestors, nid, guard);
        }
    }
}
