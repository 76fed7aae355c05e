//! Error and outcome types for tree operations.
//!
//! Duplicate inserts and missing deletes are ordinary outcomes, not errors;
//! only resource-exhaustion conditions surface as [`TreeError`]. Retryable
//! conditions (CAS contention, an observed remove, an incomplete structural
//! modification) are handled inside the tree and never reach the caller.

use std::fmt;

/// Errors that can surface from tree operations.
///
/// Invariant violations are not represented here: they are programming
/// errors, fatal under debug builds (`debug_assert!`) and assumed
/// unreachable in release builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum TreeError {
    /// The mapping table has no free slots left for a new node id.
    MappingTableFull,

    /// A node allocation failed.
    AllocationFailure,

    /// The reclamation hook reported a failure.
    ReclaimerFailure,
}

impl fmt::Display for TreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MappingTableFull => write!(f, "mapping table is full"),

            Self::AllocationFailure => write!(f, "node allocation failed"),

            Self::ReclaimerFailure => write!(f, "memory reclamation failed"),
        }
    }
}

impl std::error::Error for TreeError {}

/// Result of an insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome<V> {
    /// The key was not present; the pair is now in the tree.
    Inserted,

    /// The key was already present. The rejected value is handed back.
    Duplicate(V),
}

impl<V> InsertOutcome<V> {
    /// Whether the insert took effect.
    #[inline]
    #[must_use]
    pub const fn is_inserted(&self) -> bool {
        matches!(self, Self::Inserted)
    }
}

/// Result of a delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The key was present and is now deleted.
    Deleted,

    /// The key was not in the tree.
    NotFound,
}

impl DeleteOutcome {
    /// Whether the delete took effect.
    #[inline]
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        matches!(self, Self::Deleted)
    }
}
