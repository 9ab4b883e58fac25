//! # asset-identity-kernel
//!
//! Match-merge-link engine for building-inventory records.
//!
//! The kernel answers one question:
//!
//! > Given successive Cycles of Property/TaxLot State snapshots, which of
//! > them are **the same real-world asset**?
//!
//! ## Core Contract
//!
//! 1. Within one Cycle, States whose matching tuple collides are folded
//!    into a single merged State with full audit lineage
//! 2. Across Cycles, Views whose matching tuple collides share one
//!    canonical identity
//! 3. Subsidiary relationships (notes, labels, pairings, metered usage)
//!    follow every merge, link and unmerge, never silently dropped
//!
//! ## Architecture
//!
//! ```text
//! StateRecord → MatchingCriteria → MatchingKey → merge (per Cycle)
//!                                             → link  (per organization)
//!                      ↓
//!               RecordStore (Postgres or Memory)
//! ```
//!
//! ## Determinism Guarantees
//!
//! - Same store state + same criteria → identical groupings (grouping is
//!   over canonical tuple bytes, iteration is id-ordered)
//! - Fold order is `updated` ascending, View id as tie-break; an explicit
//!   target View always folds last
//! - Re-running a committed run is a no-op

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod types;
pub mod criteria;
pub mod matching;
pub mod store;
pub mod audit;
pub mod engine;

mod error;
mod link;
mod merge;
mod unmerge;

// Re-exports
pub use types::{
    AccessLevelInstance, AliId, AuditId, AuditNode, CanonicalId, CanonicalRecord, CycleId,
    CycleMergeReport, CyclePreview, DataState, ExtraData, HierarchyConflictInfo, HierarchyPolicy,
    ImportFileId, ImportSummary, LabelId, LabelLink, MergePriority, MergeState, MeterId,
    MeterReading, MeterSeries, Note, NoteId, OrgId, OrgRunReport, Pairing, PreviewReport,
    ProposedGroup, RecordType, StateId, StateRecord, View, ViewId, ViewRunOutcome,
    resolve_placement,
};
pub use criteria::{
    accessor, accessors_for, default_columns, CriteriaError, FieldAccessor, FieldValue,
    MatchingCriteria,
};
pub use matching::{normalize_address, AddressNormalizer, MatchingKey};
pub use store::{InMemoryRecordStore, RecordStore, RecordTxn};
#[cfg(feature = "postgres")]
pub use store::PostgresRecordStore;
pub use audit::{history_for_state, SYSTEM_MATCH};
pub use engine::{IngestBatch, MatchMergeEngine, RunMode};
pub use error::EngineError;

/// Schema version for all kernel types.
/// Increment on breaking changes to any schema type.
pub const IDENTITY_KERNEL_SCHEMA_VERSION: &str = "1.0.0";
