//! The mapping table: node id to chain head.
//!
//! A fixed array of atomic pointers plus a monotonic id allocator. Every
//! structural and data mutation in the tree commits through exactly one
//! compare-and-swap on a slot of this table, which makes it the sole
//! coordination surface of the whole index. Ids are dense array indices,
//! never addresses, so a slot CAS is a single-word operation and chains
//! behind neighboring ids prefetch predictably.
//!
//! Slots are allocated once and never reused; after the initial release
//! store a slot stays non-null for the table's lifetime (the test-only
//! [`MappingTable::reset`] excepted).

use std::sync::atomic::{AtomicPtr, AtomicU64};

use crate::error::TreeError;
use crate::node::Node;
use crate::ordering::{CAS_FAILURE, CAS_SUCCESS, NID_ALLOC, SLOT_INIT, SLOT_LOAD};

/// Logical node identifier: a dense index into the mapping table.
pub type Nid = u64;

/// Sentinel for "no node", the largest possible id.
pub const INVALID_NID: Nid = Nid::MAX;

/// Fixed-size table of `id -> chain head` with a monotonic allocator.
pub struct MappingTable<K, V> {
    slots: Box<[AtomicPtr<Node<K, V>>]>,
    next_slot: AtomicU64,
}

impl<K, V> MappingTable<K, V> {
    /// Create a table with `capacity` slots, all empty.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let slots: Box<[AtomicPtr<Node<K, V>>]> = (0..capacity)
            .map(|_| AtomicPtr::new(std::ptr::null_mut()))
            .collect();

        Self {
            slots,
            next_slot: AtomicU64::new(0),
        }
    }

    /// Slot capacity.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Highest id handed out so far plus one. May briefly run ahead of the
    /// slots actually published.
    #[inline]
    #[must_use]
    pub fn high_water(&self) -> u64 {
        self.next_slot.load(NID_ALLOC).min(self.slots.len() as u64)
    }

    /// Allocate a fresh id and publish `node` in its slot.
    ///
    /// The slot store is release-ordered: any thread that learns the id
    /// through the tree observes an initialized chain head. Ids past the
    /// table capacity are never handed out; the counter is allowed to run
    /// over, so later allocations keep failing cheaply.
    pub fn allocate(&self, node: Box<Node<K, V>>) -> Result<Nid, TreeError> {
        let slot: u64 = self.next_slot.fetch_add(1, NID_ALLOC);
        if slot >= self.slots.len() as u64 {
            return Err(TreeError::MappingTableFull);
        }

        self.slots[slot as usize].store(Box::into_raw(node), SLOT_INIT);
        Ok(slot)
    }

    /// Load the chain head of `nid`.
    ///
    /// Returns null only for a slot whose publishing store has not landed
    /// yet, which a traversal can never observe for an id it learned
    /// through the tree; table scans (stats) must tolerate it.
    #[inline]
    #[must_use]
    pub fn at(&self, nid: Nid) -> *mut Node<K, V> {
        debug_assert!(nid < self.slots.len() as u64, "node id out of range");
        self.slots[nid as usize].load(SLOT_LOAD)
    }

    /// Compare-and-swap the chain head of `nid`.
    ///
    /// The single commit primitive of the tree: success publishes every
    /// record the writer prepared (acquire-release), failure returns the
    /// head observed by the failed attempt.
    #[inline]
    pub fn cas(
        &self,
        nid: Nid,
        expected: *mut Node<K, V>,
        new: *mut Node<K, V>,
    ) -> Result<(), *mut Node<K, V>> {
        debug_assert!(nid < self.slots.len() as u64, "node id out of range");
        self.slots[nid as usize]
            .compare_exchange(expected, new, CAS_SUCCESS, CAS_FAILURE)
            .map(|_| ())
    }

    /// Test-only: drop all chains and rewind the allocator.
    #[cfg(test)]
    pub(crate) fn reset(&mut self) {
        for slot in self.slots.iter_mut() {
            let head: *mut Node<K, V> = *slot.get_mut();
            if !head.is_null() {
                // SAFETY: &mut self means no concurrent access; each slot
                // owns its chain through `next` edges.
                unsafe { crate::reclaim::drop_chain(head) };
            }
            *slot.get_mut() = std::ptr::null_mut();
        }
        *self.next_slot.get_mut() = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::LeafEntries;
    use crate::bound::BoundKey;

    fn empty_leaf() -> Box<Node<u64, u64>> {
        Node::leaf_base(
            LeafEntries::from_sorted(Vec::new()),
            BoundKey::Infinite,
            BoundKey::Infinite,
        )
    }

    #[test]
    fn allocate_returns_dense_ids() {
        let mut table: MappingTable<u64, u64> = MappingTable::new(4);
        assert_eq!(table.allocate(empty_leaf()).unwrap(), 0);
        assert_eq!(table.allocate(empty_leaf()).unwrap(), 1);
        assert_eq!(table.high_water(), 2);
        table.reset();
    }

    #[test]
    fn allocate_fails_when_full() {
        let mut table: MappingTable<u64, u64> = MappingTable::new(1);
        table.allocate(empty_leaf()).unwrap();
        assert_eq!(
            table.allocate(empty_leaf()).unwrap_err(),
            TreeError::MappingTableFull
        );
        // The counter ran over; further allocations keep failing.
        assert_eq!(
            table.allocate(empty_leaf()).unwrap_err(),
            TreeError::MappingTableFull
        );
        table.reset();
    }

    #[test]
    fn cas_swings_only_from_expected_head() {
        let mut table: MappingTable<u64, u64> = MappingTable::new(2);
        let nid = table.allocate(empty_leaf()).unwrap();
        let head = table.at(nid);

        let replacement = Box::into_raw(empty_leaf());
        assert!(table.cas(nid, head, replacement).is_ok());
        assert_eq!(table.at(nid), replacement);

        // A CAS against the displaced head must fail and report the
        // current one.
        let stale = Box::into_raw(empty_leaf());
        let observed = table.cas(nid, head, stale).unwrap_err();
        assert_eq!(observed, replacement);

        // SAFETY: never published, still owned by this test.
        unsafe { drop(Box::from_raw(stale)) };
        // SAFETY: displaced head, no longer reachable through the table.
        unsafe { drop(Box::from_raw(head)) };
        table.reset();
    }

    #[test]
    fn reset_rewinds_the_allocator() {
        let mut table: MappingTable<u64, u64> = MappingTable::new(2);
        table.allocate(empty_leaf()).unwrap();
        table.reset();
        assert_eq!(table.high_water(), 0);
        assert_eq!(table.allocate(empty_leaf()).unwrap(), 0);
        table.reset();
    }
}

#[cfg(all(test, loom))]
mod loom_tests {
    //! Loom model of the slot CAS protocol.
    //!
    //! The full tree is far too large for exhaustive interleaving search,
    //! so this models the essential claim: racing writers on one slot
    //! serialize through CAS, exactly one wins per head, and losers always
    //! observe the winner's head for their retry.
    //!
    //! Run with: `RUSTFLAGS="--cfg loom" cargo test --lib mapping::loom_tests`

    use loom::sync::Arc;
    use loom::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
    use loom::thread;

    #[test]
    fn racing_cas_serializes() {
        loom::model(|| {
            let slot: Arc<AtomicPtr<usize>> = Arc::new(AtomicPtr::new(Box::into_raw(Box::new(0))));
            let wins = Arc::new(AtomicUsize::new(0));

            let handles: Vec<_> = (1..=2)
                .map(|tag| {
                    let slot = Arc::clone(&slot);
                    let wins = Arc::clone(&wins);
                    thread::spawn(move || {
                        let mut new = Box::into_raw(Box::new(tag));
                        loop {
                            let head = slot.load(Ordering::Acquire);
                            match slot.compare_exchange(
                                head,
                                new,
                                Ordering::AcqRel,
                                Ordering::Acquire,
                            ) {
                                Ok(_) => {
                                    wins.fetch_add(1, Ordering::Relaxed);
                                    // SAFETY: displaced head, unreachable now.
                                    unsafe { drop(Box::from_raw(head)) };
                                    break;
                                }
                                Err(_) => {
                                    // SAFETY: `new` was never published.
                                    unsafe { drop(Box::from_raw(new)) };
                                    new = Box::into_raw(Box::new(tag));
                                }
                            }
                        }
                    })
                })
                .collect();

            for handle in handles {
                handle.join().unwrap();
            }

            assert_eq!(wins.load(Ordering::Relaxed), 2);
            // SAFETY: final head, owned by the model after both joins.
            unsafe { drop(Box::from_raw(slot.load(Ordering::Acquire))) };
        });
    }
}
