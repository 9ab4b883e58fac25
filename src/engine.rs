//! Match-merge-link orchestrator.
//!
//! Every public operation acquires the organization's advisory lock,
//! opens one store transaction, runs the merge/link passes inside it and
//! then commits or rolls back. [`RunMode::Preview`] executes the full
//! algorithm and rolls back after capturing the groupings, so previews
//! are exact.
//!
//! The advisory locks serialize concurrent runs for one organization
//! within this process; cross-process deployments need a store-level
//! lock on top.

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::audit;
use crate::criteria::{accessor, accessors_for, CriteriaError, MatchingCriteria};
use crate::error::EngineError;
use crate::link::{link_org, link_single_view};
use crate::matching::{AddressNormalizer, MatchingKey};
use crate::merge::{fetch_member, group_placement, merge_cycle, merge_pair, Member, RoundContext};
use crate::store::{RecordStore, RecordTxn};
use crate::types::{
    resolve_placement, AliId, AuditNode, CanonicalRecord, CycleId, CyclePreview, HierarchyPolicy,
    ImportFileId, ImportSummary, MergePriority, OrgId, OrgRunReport, PreviewReport, RecordType,
    StateId, StateRecord, View, ViewId, ViewRunOutcome,
};

/// Whether a run's transaction is committed or rolled back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Commit the unit of work.
    Commit,
    /// Run the full algorithm, capture the groupings, roll back.
    Preview,
}

/// One incoming batch of States handed to [`MatchMergeEngine::ingest_states`].
#[derive(Debug)]
pub struct IngestBatch {
    /// Owning organization.
    pub organization: OrgId,
    /// Entity type of every State in the batch.
    pub record_type: RecordType,
    /// Cycle the batch lands in.
    pub cycle: CycleId,
    /// Hierarchy placement for the new records.
    pub placement: AliId,
    /// Import file the batch came from.
    pub import_file: ImportFileId,
    /// The States themselves.
    pub states: Vec<StateRecord>,
}

/// The match-merge-link engine over one record store.
pub struct MatchMergeEngine<S: RecordStore> {
    store: Arc<S>,
    policy: HierarchyPolicy,
    normalizer: AddressNormalizer,
    org_locks: Mutex<HashMap<OrgId, Arc<AsyncMutex<()>>>>,
}

impl<S: RecordStore> MatchMergeEngine<S> {
    /// Create an engine with the default [`HierarchyPolicy::ExactMatch`].
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            policy: HierarchyPolicy::default(),
            normalizer: AddressNormalizer::default(),
            org_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Override the hierarchy isolation policy.
    pub fn with_hierarchy_policy(mut self, policy: HierarchyPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Advisory lock serializing runs for one organization.
    ///
    /// The registry map is only held long enough to clone the Arc, never
    /// across an await.
    async fn lock_org(&self, org: OrgId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.org_locks.lock();
            Arc::clone(locks.entry(org).or_default())
        };
        lock.lock_owned().await
    }

    async fn begin(&self) -> Result<S::Txn, EngineError> {
        self.store.begin().await.map_err(EngineError::from_store)
    }

    /// Whole-organization match-merge-link run.
    ///
    /// `proposed_columns` overrides the stored matching-column
    /// configuration for this run only; previews use it to answer "what
    /// would these criteria do" without persisting them.
    pub async fn run_for_org(
        &self,
        org: OrgId,
        record_type: RecordType,
        mode: RunMode,
        proposed_columns: Option<Vec<String>>,
    ) -> Result<OrgRunReport, EngineError> {
        let _guard = self.lock_org(org).await;
        let mut txn = self.begin().await?;

        let configured = match proposed_columns {
            Some(columns) => Some(columns),
            None => txn
                .matching_columns(org, record_type)
                .await
                .map_err(EngineError::from_store)?,
        };
        let criteria = MatchingCriteria::resolve(org, record_type, configured.as_deref())?;
        let priorities = txn
            .merge_priorities(org, record_type)
            .await
            .map_err(EngineError::from_store)?;
        let ctx = RoundContext {
            criteria: &criteria,
            priorities: &priorities,
            policy: self.policy,
            normalizer: &self.normalizer,
        };

        let mut merge_count = 0;
        let mut cycle_reports = Vec::new();
        let mut cycle_previews = Vec::new();
        for cycle in txn
            .cycles_for_org(org, record_type)
            .await
            .map_err(EngineError::from_store)?
        {
            let outcome = merge_cycle(&mut txn, &ctx, cycle, None, None).await?;
            merge_count += outcome.report.merged;
            if !outcome.groups.is_empty() {
                cycle_previews.push(CyclePreview {
                    cycle,
                    groups: outcome.groups,
                });
            }
            cycle_reports.push(outcome.report);
        }

        let link = link_org(&mut txn, &ctx).await?;

        tracing::info!(
            organization = %org,
            record_type = %record_type,
            merged = merge_count,
            linked = link.linked,
            preview = matches!(mode, RunMode::Preview),
            "match-merge-link run complete"
        );

        let preview = match mode {
            RunMode::Commit => {
                txn.commit().await.map_err(EngineError::from_store)?;
                None
            }
            RunMode::Preview => {
                let report = PreviewReport {
                    cycles: cycle_previews,
                    link_groups: link.groups,
                };
                txn.rollback().await.map_err(EngineError::from_store)?;
                Some(report)
            }
        };

        Ok(OrgRunReport {
            record_type,
            merge_count,
            link_count: link.linked,
            empty_criteria: link.empty,
            cycles: cycle_reports,
            link_conflicts: link.conflicts,
            preview,
        })
    }

    /// Match-merge-link run scoped to one View's matching tuple.
    ///
    /// Merges every in-Cycle collision with the tuple (the View itself
    /// included), then links the survivors across Cycles. Returns the
    /// counts and the View the caller should now reference.
    pub async fn run_for_view(&self, view_id: ViewId) -> Result<ViewRunOutcome, EngineError> {
        let (org, record_type) = self.probe_view(view_id).await?;
        let _guard = self.lock_org(org).await;
        let mut txn = self.begin().await?;

        let configured = txn
            .matching_columns(org, record_type)
            .await
            .map_err(EngineError::from_store)?;
        let criteria = MatchingCriteria::resolve(org, record_type, configured.as_deref())?;
        let priorities = txn
            .merge_priorities(org, record_type)
            .await
            .map_err(EngineError::from_store)?;
        let ctx = RoundContext {
            criteria: &criteria,
            priorities: &priorities,
            policy: self.policy,
            normalizer: &self.normalizer,
        };

        let outcome = link_single_view(&mut txn, &ctx, view_id).await?;
        txn.commit().await.map_err(EngineError::from_store)?;

        tracing::info!(
            view = %view_id,
            merged = outcome.merge_count,
            linked = outcome.link_count,
            "single-view run complete"
        );
        Ok(outcome)
    }

    /// Manually fold a selection of Views into one record.
    ///
    /// Matching tuples are not consulted; the caller vouches for the
    /// grouping. All Views must share one organization, Cycle and entity
    /// type. The last id in the selection is the precedence target: it
    /// folds last, so its values win under the default priority.
    pub async fn merge_views(&self, view_ids: &[ViewId]) -> Result<ViewId, EngineError> {
        if view_ids.len() < 2 {
            return Err(EngineError::InvalidSelection(String::from(
                "at least two Views are required",
            )));
        }
        let (org, record_type) = self.probe_view(view_ids[0]).await?;
        let _guard = self.lock_org(org).await;
        let mut txn = self.begin().await?;

        let mut members: Vec<Member> = Vec::with_capacity(view_ids.len());
        for id in view_ids {
            let view = txn
                .view(*id)
                .await
                .map_err(EngineError::from_store)?
                .ok_or_else(|| EngineError::not_found("View", id))?;
            members.push(fetch_member(&mut txn, view).await?);
        }
        let cycle = members[0].view.cycle;
        for member in &members {
            if member.state.organization != org
                || member.state.record_type != record_type
                || member.view.cycle != cycle
            {
                return Err(EngineError::InvalidSelection(String::from(
                    "Views span more than one organization, Cycle or entity type",
                )));
            }
        }

        let priorities = txn
            .merge_priorities(org, record_type)
            .await
            .map_err(EngineError::from_store)?;
        let criteria = MatchingCriteria::resolve(org, record_type, None)?;
        let ctx = RoundContext {
            criteria: &criteria,
            priorities: &priorities,
            policy: self.policy,
            normalizer: &self.normalizer,
        };

        let placement = match group_placement(&mut txn, self.policy, &members).await? {
            Ok(ali) => ali,
            Err(conflict) => return Err(EngineError::HierarchyConflict(conflict)),
        };

        let now = Utc::now();
        let mut iter = members.into_iter();
        let mut acc = match iter.next() {
            Some(first) => first,
            None => {
                return Err(EngineError::InvalidSelection(String::from(
                    "at least two Views are required",
                )))
            }
        };
        for next in iter {
            acc = merge_pair(&mut txn, &ctx, cycle, acc, next, placement, now).await?;
        }
        txn.commit().await.map_err(EngineError::from_store)?;

        tracing::info!(view = %acc.view.id, folded = view_ids.len(), "manual merge complete");
        Ok(acc.view.id)
    }

    /// Reverse the most recent merge of a View.
    ///
    /// Returns the two restored View ids, first parent then second.
    pub async fn unmerge_view(&self, view_id: ViewId) -> Result<(ViewId, ViewId), EngineError> {
        let (org, _) = self.probe_view(view_id).await?;
        let _guard = self.lock_org(org).await;
        let mut txn = self.begin().await?;
        let restored = crate::unmerge::unmerge(&mut txn, view_id, Utc::now()).await?;
        txn.commit().await.map_err(EngineError::from_store)?;
        tracing::info!(view = %view_id, "unmerge complete");
        Ok(restored)
    }

    /// Ingest one import file's States into a Cycle and run the full
    /// match-merge-link pass over it.
    ///
    /// Incoming States whose tuple and field values duplicate another
    /// record are dropped; tuple collisions with differing values merge.
    /// The returned counters classify every fold by whether it stayed
    /// inside the file, pulled a file record into an existing one, or
    /// collapsed two pre-existing records.
    pub async fn ingest_states(
        &self,
        batch: IngestBatch,
        mode: RunMode,
    ) -> Result<ImportSummary, EngineError> {
        let org = batch.organization;
        let record_type = batch.record_type;
        let _guard = self.lock_org(org).await;
        let mut txn = self.begin().await?;

        let configured = txn
            .matching_columns(org, record_type)
            .await
            .map_err(EngineError::from_store)?;
        let criteria = MatchingCriteria::resolve(org, record_type, configured.as_deref())?;
        let priorities = txn
            .merge_priorities(org, record_type)
            .await
            .map_err(EngineError::from_store)?;
        let ctx = RoundContext {
            criteria: &criteria,
            priorities: &priorities,
            policy: self.policy,
            normalizer: &self.normalizer,
        };

        let mut summary = ImportSummary {
            initial_incoming: batch.states.len(),
            ..ImportSummary::default()
        };

        // Within-file duplicate removal: identical tuple and identical
        // field values collapse to one State before anything is written.
        let mut kept: Vec<StateRecord> = Vec::with_capacity(batch.states.len());
        for mut state in batch.states {
            state.organization = org;
            state.record_type = record_type;
            state.import_file = Some(batch.import_file);
            let key = MatchingKey::for_state(&criteria, &state, &self.normalizer);
            let duplicate = !key.is_empty()
                && kept.iter().any(|other| {
                    let other_key = MatchingKey::for_state(&criteria, other, &self.normalizer);
                    other_key.canonical_bytes() == key.canonical_bytes()
                        && states_equivalent(&state, other, record_type)
                });
            if duplicate {
                summary.duplicates_within_file += 1;
            } else {
                kept.push(state);
            }
        }

        // Duplicates of records already in the Cycle are dropped too. A
        // duplicate whose batch placement is incompatible with the
        // existing record's placement counts as an access error rather
        // than an ordinary duplicate.
        let batch_ali = txn
            .ali(batch.placement)
            .await
            .map_err(EngineError::from_store)?
            .ok_or_else(|| EngineError::not_found("AccessLevelInstance", batch.placement))?;
        let existing = txn
            .views_in_cycle(org, record_type, batch.cycle)
            .await
            .map_err(EngineError::from_store)?;
        let mut existing_entries = Vec::with_capacity(existing.len());
        for view in existing {
            let state = fetch_member(&mut txn, view).await?.state;
            let canonical = txn
                .canonical(view.canonical)
                .await
                .map_err(EngineError::from_store)?
                .ok_or_else(|| EngineError::not_found("CanonicalRecord", view.canonical))?;
            let placement = txn
                .ali(canonical.access_level_instance)
                .await
                .map_err(EngineError::from_store)?
                .ok_or_else(|| {
                    EngineError::not_found(
                        "AccessLevelInstance",
                        canonical.access_level_instance,
                    )
                })?;
            existing_entries.push((state, placement));
        }
        let mut inserted = 0usize;
        let mut file_views: BTreeSet<ViewId> = BTreeSet::new();
        for state in kept {
            let key = MatchingKey::for_state(&criteria, &state, &self.normalizer);
            let duplicate_of = if key.is_empty() {
                None
            } else {
                existing_entries.iter().find(|(other, _)| {
                    let other_key = MatchingKey::for_state(&criteria, other, &self.normalizer);
                    other_key.canonical_bytes() == key.canonical_bytes()
                        && states_equivalent(&state, other, record_type)
                })
            };
            if let Some((_, placement)) = duplicate_of {
                if resolve_placement(self.policy, &[&batch_ali, placement]).is_err() {
                    summary.duplicates_access_error += 1;
                } else {
                    summary.duplicates_against_existing += 1;
                }
                continue;
            }
            if key.is_empty() {
                summary.empty_criteria += 1;
            }
            let canonical =
                CanonicalRecord::new(org, record_type, batch.placement, state.updated);
            let view = View::new(batch.cycle, canonical.id, state.id);
            inserted += 1;
            file_views.insert(view.id);
            txn.put_state(state)
                .await
                .map_err(EngineError::from_store)?;
            txn.put_canonical(canonical)
                .await
                .map_err(EngineError::from_store)?;
            txn.put_view(view).await.map_err(EngineError::from_store)?;
        }

        let outcome = merge_cycle(&mut txn, &ctx, batch.cycle, None, None).await?;
        classify_folds(&mut txn, &outcome.groups, &file_views, &mut summary).await?;

        let link = link_org(&mut txn, &ctx).await?;

        summary.new_records = inserted
            .saturating_sub(summary.merges_within_file)
            .saturating_sub(summary.merges_against_existing);

        tracing::info!(
            organization = %org,
            record_type = %record_type,
            incoming = summary.initial_incoming,
            new_records = summary.new_records,
            linked = link.linked,
            preview = matches!(mode, RunMode::Preview),
            "ingest complete"
        );

        match mode {
            RunMode::Commit => txn.commit().await.map_err(EngineError::from_store)?,
            RunMode::Preview => txn.rollback().await.map_err(EngineError::from_store)?,
        }
        Ok(summary)
    }

    /// Validate and persist an organization's matching-column
    /// configuration.
    pub async fn configure_matching_columns(
        &self,
        org: OrgId,
        record_type: RecordType,
        columns: Vec<String>,
    ) -> Result<(), EngineError> {
        MatchingCriteria::resolve(org, record_type, Some(&columns))?;
        let _guard = self.lock_org(org).await;
        let mut txn = self.begin().await?;
        txn.set_matching_columns(org, record_type, columns)
            .await
            .map_err(EngineError::from_store)?;
        txn.commit().await.map_err(EngineError::from_store)?;
        Ok(())
    }

    /// Set a per-column merge-priority override.
    ///
    /// `extra_data` is accepted alongside the typed columns; it controls
    /// precedence for the open extra-data map as a whole.
    pub async fn set_merge_priority(
        &self,
        org: OrgId,
        record_type: RecordType,
        column: &str,
        priority: MergePriority,
    ) -> Result<(), EngineError> {
        if column != "extra_data" && accessor(column).is_none() {
            return Err(CriteriaError::UnknownColumn(column.to_string()).into());
        }
        let _guard = self.lock_org(org).await;
        let mut txn = self.begin().await?;
        txn.set_merge_priority(org, record_type, column.to_string(), priority)
            .await
            .map_err(EngineError::from_store)?;
        txn.commit().await.map_err(EngineError::from_store)?;
        Ok(())
    }

    /// Full merge lineage of a View's State, newest first.
    pub async fn view_history(&self, view_id: ViewId) -> Result<Vec<AuditNode>, EngineError> {
        let mut txn = self.begin().await?;
        let view = txn
            .view(view_id)
            .await
            .map_err(EngineError::from_store)?
            .ok_or_else(|| EngineError::not_found("View", view_id))?;
        let history = audit::history_for_state(&mut txn, view.state).await?;
        txn.rollback().await.map_err(EngineError::from_store)?;
        Ok(history)
    }

    /// Read a View's organization and entity type in a throwaway
    /// transaction, before the advisory lock is taken.
    async fn probe_view(&self, view_id: ViewId) -> Result<(OrgId, RecordType), EngineError> {
        let mut probe = self.begin().await?;
        let view = probe
            .view(view_id)
            .await
            .map_err(EngineError::from_store)?
            .ok_or_else(|| EngineError::not_found("View", view_id))?;
        let state = probe
            .state(view.state)
            .await
            .map_err(EngineError::from_store)?
            .ok_or_else(|| EngineError::not_found("State", view.state))?;
        let found = (state.organization, state.record_type);
        probe.rollback().await.map_err(EngineError::from_store)?;
        Ok(found)
    }
}

/// Whether two States carry identical field values (typed columns and
/// extra data both).
fn states_equivalent(a: &StateRecord, b: &StateRecord, record_type: RecordType) -> bool {
    accessors_for(record_type).all(|acc| acc.get(a) == acc.get(b)) && a.extra_data == b.extra_data
}

/// Bucket each merged group's folds into the import-summary counters.
///
/// A group folded when any of its Views no longer exists; groups whose
/// Views all survived were rejected by the hierarchy guard.
async fn classify_folds<T: RecordTxn>(
    txn: &mut T,
    groups: &[crate::types::ProposedGroup],
    file_views: &BTreeSet<ViewId>,
    summary: &mut ImportSummary,
) -> Result<(), EngineError> {
    for group in groups {
        let folds = group.views.len().saturating_sub(1);
        let from_file = group.views.iter().filter(|v| file_views.contains(v)).count();
        let mut survived = 0;
        for view in &group.views {
            if txn
                .view(*view)
                .await
                .map_err(EngineError::from_store)?
                .is_some()
            {
                survived += 1;
            }
        }
        let rejected = survived == group.views.len();

        let (count, errors) = if from_file == group.views.len() {
            (
                &mut summary.merges_within_file,
                &mut summary.merges_within_file_errors,
            )
        } else if from_file > 0 {
            (
                &mut summary.merges_against_existing,
                &mut summary.merges_against_existing_errors,
            )
        } else {
            (
                &mut summary.merges_between_existing,
                &mut summary.merges_between_existing_errors,
            )
        };
        if rejected {
            *errors += folds;
        } else {
            *count += folds;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryRecordStore;
    use crate::types::AccessLevelInstance;

    fn seeded_org(store: &InMemoryRecordStore) -> (OrgId, AliId) {
        let org = OrgId::generate();
        let ali = AccessLevelInstance::new(org, vec![String::from("root")]);
        let ali_id = ali.id;
        store.add_ali(ali);
        (org, ali_id)
    }

    fn placed_ali(store: &InMemoryRecordStore, org: OrgId, path: &[&str]) -> AliId {
        let ali = AccessLevelInstance::new(org, path.iter().map(|s| s.to_string()).collect());
        let id = ali.id;
        store.add_ali(ali);
        id
    }

    fn state_with_ubid(org: OrgId, ubid: &str) -> StateRecord {
        let mut state = StateRecord::new(org, RecordType::Property, Utc::now());
        state.ubid = Some(ubid.to_string());
        state
    }

    #[tokio::test]
    async fn test_run_for_org_merges_cycle_duplicates() {
        let store = Arc::new(InMemoryRecordStore::new());
        let (org, ali) = seeded_org(&store);
        let cycle = CycleId::generate();

        for _ in 0..2 {
            let state = state_with_ubid(org, "UBID-1");
            let canonical =
                CanonicalRecord::new(org, RecordType::Property, ali, Utc::now());
            store.add_view(View::new(cycle, canonical.id, state.id));
            store.add_state(state);
            store.add_canonical(canonical);
        }

        let engine = MatchMergeEngine::new(Arc::clone(&store));
        let report = engine
            .run_for_org(org, RecordType::Property, RunMode::Commit, None)
            .await
            .unwrap();

        assert_eq!(report.merge_count, 1);
        assert_eq!(store.num_views(), 1);
        assert_eq!(store.num_audit_nodes(), 1);
    }

    #[tokio::test]
    async fn test_preview_rolls_back() {
        let store = Arc::new(InMemoryRecordStore::new());
        let (org, ali) = seeded_org(&store);
        let cycle = CycleId::generate();

        for _ in 0..2 {
            let state = state_with_ubid(org, "UBID-1");
            let canonical =
                CanonicalRecord::new(org, RecordType::Property, ali, Utc::now());
            store.add_view(View::new(cycle, canonical.id, state.id));
            store.add_state(state);
            store.add_canonical(canonical);
        }

        let engine = MatchMergeEngine::new(Arc::clone(&store));
        let report = engine
            .run_for_org(org, RecordType::Property, RunMode::Preview, None)
            .await
            .unwrap();

        assert_eq!(report.merge_count, 1);
        let preview = report.preview.unwrap();
        assert_eq!(preview.cycles.len(), 1);
        assert_eq!(preview.cycles[0].groups[0].views.len(), 2);
        // Nothing stuck.
        assert_eq!(store.num_views(), 2);
        assert_eq!(store.num_audit_nodes(), 0);
    }

    #[tokio::test]
    async fn test_unknown_column_aborts_before_mutation() {
        let store = Arc::new(InMemoryRecordStore::new());
        let (org, _) = seeded_org(&store);
        let engine = MatchMergeEngine::new(Arc::clone(&store));

        let err = engine
            .run_for_org(
                org,
                RecordType::Property,
                RunMode::Commit,
                Some(vec![String::from("favorite_color")]),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::AmbiguousColumnConfiguration(CriteriaError::UnknownColumn(_))
        ));
    }

    #[tokio::test]
    async fn test_merge_views_rejects_single_view() {
        let store = Arc::new(InMemoryRecordStore::new());
        let engine = MatchMergeEngine::new(store);
        let err = engine.merge_views(&[ViewId::generate()]).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidSelection(_)));
    }

    #[tokio::test]
    async fn test_ingest_drops_duplicates_and_counts_new() {
        let store = Arc::new(InMemoryRecordStore::new());
        let (org, ali) = seeded_org(&store);
        let engine = MatchMergeEngine::new(Arc::clone(&store));

        let a1 = state_with_ubid(org, "UBID-A");
        let mut a2_dup = a1.clone();
        a2_dup.id = StateId::generate();
        let b = state_with_ubid(org, "UBID-B");

        let summary = engine
            .ingest_states(
                IngestBatch {
                    organization: org,
                    record_type: RecordType::Property,
                    cycle: CycleId::generate(),
                    placement: ali,
                    import_file: ImportFileId::generate(),
                    states: vec![a1, a2_dup, b],
                },
                RunMode::Commit,
            )
            .await
            .unwrap();

        assert_eq!(summary.initial_incoming, 3);
        assert_eq!(summary.duplicates_within_file, 1);
        assert_eq!(summary.new_records, 2);
        assert_eq!(store.num_views(), 2);
    }

    #[tokio::test]
    async fn test_ingest_duplicate_at_incompatible_placement_is_access_error() {
        let store = Arc::new(InMemoryRecordStore::new());
        let (org, _) = seeded_org(&store);
        let east = placed_ali(&store, org, &["root", "east"]);
        let west = placed_ali(&store, org, &["root", "west"]);
        let cycle = CycleId::generate();

        let existing = state_with_ubid(org, "UBID-X");
        let canonical = CanonicalRecord::new(org, RecordType::Property, east, Utc::now());
        store.add_view(View::new(cycle, canonical.id, existing.id));
        let mut duplicate = existing.clone();
        duplicate.id = StateId::generate();
        store.add_state(existing);
        store.add_canonical(canonical);

        let engine = MatchMergeEngine::new(Arc::clone(&store));
        let summary = engine
            .ingest_states(
                IngestBatch {
                    organization: org,
                    record_type: RecordType::Property,
                    cycle,
                    placement: west,
                    import_file: ImportFileId::generate(),
                    states: vec![duplicate.clone()],
                },
                RunMode::Commit,
            )
            .await
            .unwrap();

        assert_eq!(summary.duplicates_access_error, 1);
        assert_eq!(summary.duplicates_against_existing, 0);
        assert_eq!(summary.new_records, 0);
        assert_eq!(store.num_views(), 1);

        // The same duplicate at the existing record's own placement is
        // an ordinary duplicate.
        let mut again = duplicate;
        again.id = StateId::generate();
        let summary = engine
            .ingest_states(
                IngestBatch {
                    organization: org,
                    record_type: RecordType::Property,
                    cycle,
                    placement: east,
                    import_file: ImportFileId::generate(),
                    states: vec![again],
                },
                RunMode::Commit,
            )
            .await
            .unwrap();

        assert_eq!(summary.duplicates_against_existing, 1);
        assert_eq!(summary.duplicates_access_error, 0);
        assert_eq!(store.num_views(), 1);
    }

    #[tokio::test]
    async fn test_ingest_counts_empty_tuple_states() {
        let store = Arc::new(InMemoryRecordStore::new());
        let (org, ali) = seeded_org(&store);
        let engine = MatchMergeEngine::new(Arc::clone(&store));

        // city is not a matching column, so this tuple is empty.
        let mut blank = StateRecord::new(org, RecordType::Property, Utc::now());
        blank.city = Some(String::from("Springfield"));

        let summary = engine
            .ingest_states(
                IngestBatch {
                    organization: org,
                    record_type: RecordType::Property,
                    cycle: CycleId::generate(),
                    placement: ali,
                    import_file: ImportFileId::generate(),
                    states: vec![blank, state_with_ubid(org, "UBID-1")],
                },
                RunMode::Commit,
            )
            .await
            .unwrap();

        assert_eq!(summary.empty_criteria, 1);
        assert_eq!(summary.new_records, 2);
        assert_eq!(store.num_views(), 2);
    }

    #[tokio::test]
    async fn test_set_merge_priority_validates_column() {
        let store = Arc::new(InMemoryRecordStore::new());
        let engine = MatchMergeEngine::new(store);
        let err = engine
            .set_merge_priority(
                OrgId::generate(),
                RecordType::Property,
                "favorite_color",
                MergePriority::FavorExisting,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::AmbiguousColumnConfiguration(_)));
    }

    #[tokio::test]
    async fn test_concurrent_runs_serialize_per_org() {
        let store = Arc::new(InMemoryRecordStore::new());
        let (org, ali) = seeded_org(&store);
        let cycle = CycleId::generate();
        for _ in 0..2 {
            let state = state_with_ubid(org, "UBID-1");
            let canonical =
                CanonicalRecord::new(org, RecordType::Property, ali, Utc::now());
            store.add_view(View::new(cycle, canonical.id, state.id));
            store.add_state(state);
            store.add_canonical(canonical);
        }

        let engine = Arc::new(MatchMergeEngine::new(Arc::clone(&store)));
        let a = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                engine
                    .run_for_org(org, RecordType::Property, RunMode::Commit, None)
                    .await
            })
        };
        let b = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                engine
                    .run_for_org(org, RecordType::Property, RunMode::Commit, None)
                    .await
            })
        };
        let (a, b) = (a.await.unwrap().unwrap(), b.await.unwrap().unwrap());

        // One run folds the pair, the other finds nothing to do.
        assert_eq!(a.merge_count + b.merge_count, 1);
        assert_eq!(store.num_views(), 1);
    }
}
