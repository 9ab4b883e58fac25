//! Core types for the identity kernel.

pub mod audit;
pub mod extra;
pub mod hierarchy;
pub mod ids;
pub mod record;
pub mod relations;
pub mod summary;

pub use audit::AuditNode;
pub use extra::{ExtraData, MergePriority};
pub use hierarchy::{
    resolve_placement, AccessLevelInstance, HierarchyConflictInfo, HierarchyPolicy,
};
pub use ids::{
    AliId, AuditId, CanonicalId, CycleId, ImportFileId, LabelId, MeterId, NoteId, OrgId, StateId,
    ViewId,
};
pub use record::{CanonicalRecord, DataState, MergeState, RecordType, StateRecord, View};
pub use relations::{LabelLink, MeterReading, MeterSeries, Note, Pairing};
pub use summary::{
    CycleMergeReport, CyclePreview, ImportSummary, OrgRunReport, PreviewReport, ProposedGroup,
    ViewRunOutcome,
};
