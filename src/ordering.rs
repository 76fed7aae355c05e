//! Standard memory orderings for mapping-table access.
//!
//! Named constants keep ordering usage consistent across the codebase and
//! make the intent clear at each access point.

use std::sync::atomic::Ordering;

/// Ordering for loading a chain head from its slot.
/// Pairs with the publisher's release store or CAS.
pub const SLOT_LOAD: Ordering = Ordering::Acquire;

/// Ordering for the initial store into a freshly allocated slot.
/// Loaders that learned the node id through the tree observe an
/// initialized node.
pub const SLOT_INIT: Ordering = Ordering::Release;

/// Ordering for a successful chain-head CAS. Publishes the delta the
/// writer prepared; the commit point of every mutation.
pub const CAS_SUCCESS: Ordering = Ordering::AcqRel;

/// Ordering for a failed chain-head CAS. Only needs to observe the
/// current head for the retry.
pub const CAS_FAILURE: Ordering = Ordering::Acquire;

/// Ordering for the node-id allocation counter. The counter only hands
/// out distinct indices; the slot store carries the synchronization.
pub const NID_ALLOC: Ordering = Ordering::Relaxed;

/// Ordering for reading and updating operation counters.
pub const COUNTER: Ordering = Ordering::Relaxed;
