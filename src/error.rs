//! Engine error taxonomy.
//!
//! Empty matching criteria is deliberately absent: it is a policy state
//! counted in summaries, never an error. Per-group hierarchy conflicts
//! inside a batch run are collected into the run report; the
//! `HierarchyConflict` variant here surfaces when a single targeted
//! operation (manual merge, single-View run) hits one.

use crate::criteria::CriteriaError;
use crate::types::{HierarchyConflictInfo, ViewId};

/// Error type for all engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Records eligible to merge/link sit at incompatible hierarchy
    /// placements; the unit of work was rolled back.
    #[error("Hierarchy conflict between placements {0}")]
    HierarchyConflict(HierarchyConflictInfo),

    /// Matching-criteria configuration references a column that does not
    /// exist for the entity type. Nothing was mutated.
    #[error("Ambiguous matching-column configuration: {0}")]
    AmbiguousColumnConfiguration(#[from] CriteriaError),

    /// A referenced View/State/CanonicalRecord/placement does not exist.
    #[error("{what} not found: {id}")]
    NotFound {
        /// Entity kind.
        what: &'static str,
        /// The id that failed to resolve.
        id: String,
    },

    /// A manual merge selection cannot be folded (fewer than two Views,
    /// or Views spanning organizations, Cycles or entity types).
    #[error("Views cannot be merged together: {0}")]
    InvalidSelection(String),

    /// The target State lacks the two-parent lineage unmerge requires.
    #[error("View {view} cannot be unmerged: {reason}")]
    UnmergeIneligible {
        /// The View the caller asked to unmerge.
        view: ViewId,
        /// Why it is ineligible.
        reason: String,
    },

    /// Store error.
    #[error("Store error: {0}")]
    Store(String),
}

impl EngineError {
    /// Wrap a store error of any backend type.
    pub fn from_store<E: std::error::Error>(e: E) -> Self {
        Self::Store(e.to_string())
    }

    pub(crate) fn not_found(what: &'static str, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            what,
            id: id.to_string(),
        }
    }
}
