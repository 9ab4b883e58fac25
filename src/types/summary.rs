//! Reports returned to callers of the engine.
//!
//! The API layer renders these directly: import-results counters, the
//! per-run merge/link counts, and the preview groupings produced when a
//! run executes with rollback.

use serde::{Deserialize, Serialize};

use super::hierarchy::HierarchyConflictInfo;
use super::ids::{CanonicalId, CycleId, ViewId};
use super::record::RecordType;

/// Import-results counters for one entity type.
///
/// Duplicates are States whose matching tuple collides with a record that
/// carries identical field values; merges are tuple collisions with
/// differing values. `*_errors` count groups rejected by the hierarchy
/// isolation guard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    /// States handed to the engine at the start of the run.
    pub initial_incoming: usize,
    /// Duplicates found inside the incoming file itself.
    pub duplicates_within_file: usize,
    /// Duplicates of records already in the inventory.
    pub duplicates_against_existing: usize,
    /// Duplicates rejected for hierarchy access reasons.
    pub duplicates_access_error: usize,
    /// Incoming States whose matching tuple was empty; stored as
    /// unmergeable singletons.
    pub empty_criteria: usize,
    /// Merges between two incoming States.
    pub merges_within_file: usize,
    /// Within-file merge groups aborted by the hierarchy guard.
    pub merges_within_file_errors: usize,
    /// Merges of an incoming State into an existing record.
    pub merges_against_existing: usize,
    /// Against-existing merge groups aborted by the hierarchy guard.
    pub merges_against_existing_errors: usize,
    /// Merges between two already-existing records.
    pub merges_between_existing: usize,
    /// Between-existing merge groups aborted by the hierarchy guard.
    pub merges_between_existing_errors: usize,
    /// Net-new records after merging and linking.
    pub new_records: usize,
}

/// Outcome of the intra-Cycle merge pass for one Cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleMergeReport {
    /// The Cycle that was merged.
    pub cycle: CycleId,
    /// Number of States folded away (group size minus one, summed).
    pub merged: usize,
    /// Groups rejected by the hierarchy isolation guard.
    pub conflicts: Vec<HierarchyConflictInfo>,
    /// Where the caller's target View ended up, if it was part of a fold.
    pub target_view: Option<ViewId>,
}

/// Outcome of a whole-organization match-merge-link run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrgRunReport {
    /// Entity type the run covered.
    pub record_type: RecordType,
    /// Total States folded across all Cycles.
    pub merge_count: usize,
    /// Views reassigned to a shared canonical identity.
    pub link_count: usize,
    /// Views excluded from linking because their matching tuple was
    /// empty.
    pub empty_criteria: usize,
    /// Per-Cycle merge outcomes.
    pub cycles: Vec<CycleMergeReport>,
    /// Link groups rejected by the hierarchy isolation guard.
    pub link_conflicts: Vec<HierarchyConflictInfo>,
    /// Groupings captured before rollback, when the run was a preview.
    pub preview: Option<PreviewReport>,
}

/// Outcome of a single-View match-merge-link run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewRunOutcome {
    /// States folded into the target's Cycle groups.
    pub merge_count: usize,
    /// Views newly sharing the target's canonical identity
    /// (the target itself is not counted).
    pub link_count: usize,
    /// The View the caller should now reference; differs from the input
    /// when the target was itself merged.
    pub view: ViewId,
}

/// One matching-tuple group a preview run would merge or link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedGroup {
    /// xxh64 fingerprint of the matching tuple, hex-formatted.
    pub fingerprint: String,
    /// Display form of the matching tuple values.
    pub key: Vec<Option<String>>,
    /// Views in the group.
    pub views: Vec<ViewId>,
    /// Distinct canonical records the group currently spans.
    pub canonicals: Vec<CanonicalId>,
}

/// Groupings for one Cycle inside a preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CyclePreview {
    /// The Cycle.
    pub cycle: CycleId,
    /// Groups that would merge (size > 1).
    pub groups: Vec<ProposedGroup>,
}

/// Full preview of a whole-organization run, captured before rollback.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewReport {
    /// Per-Cycle merge groupings.
    pub cycles: Vec<CyclePreview>,
    /// Cross-Cycle groups that would be linked.
    pub link_groups: Vec<ProposedGroup>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_default_is_zeroed() {
        let summary = ImportSummary::default();
        assert_eq!(summary.initial_incoming, 0);
        assert_eq!(summary.merges_within_file, 0);
        assert_eq!(summary.new_records, 0);
    }
}
