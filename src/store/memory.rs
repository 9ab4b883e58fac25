//! In-memory record store for testing and previews.
//!
//! Tables are `BTreeMap`s for deterministic iteration order. A
//! transaction is a full snapshot clone of the tables; commit swaps the
//! snapshot in under a write lock, rollback simply drops it. This gives
//! exact rollback semantics (audit nodes included) at the cost of
//! last-writer-wins between concurrent transactions — which is why the
//! engine serializes runs per organization.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::{RecordStore, RecordTxn};
use crate::types::{
    AccessLevelInstance, AliId, AuditId, AuditNode, CanonicalId, CanonicalRecord, CycleId,
    LabelLink, MergePriority, MeterId, MeterSeries, Note, NoteId, OrgId, Pairing, RecordType,
    StateId, StateRecord, View, ViewId,
};

/// Error type for the in-memory store.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InMemoryError {
    /// A View references a State that does not exist.
    #[error("View {view} references missing State {state}")]
    MissingState {
        /// The dangling View.
        view: ViewId,
        /// The missing State.
        state: StateId,
    },
}

#[derive(Debug, Clone, Default)]
struct Tables {
    states: BTreeMap<StateId, StateRecord>,
    views: BTreeMap<ViewId, View>,
    canonicals: BTreeMap<CanonicalId, CanonicalRecord>,
    alis: BTreeMap<AliId, AccessLevelInstance>,
    audits: BTreeMap<AuditId, AuditNode>,
    notes: BTreeMap<NoteId, Note>,
    labels: BTreeSet<LabelLink>,
    pairings: BTreeSet<Pairing>,
    meters: BTreeMap<MeterId, MeterSeries>,
    matching_columns: BTreeMap<(OrgId, RecordType), Vec<String>>,
    merge_priorities: BTreeMap<(OrgId, RecordType), BTreeMap<String, MergePriority>>,
}

impl Tables {
    fn record_views(
        &self,
        org: OrgId,
        record_type: RecordType,
    ) -> Result<Vec<View>, InMemoryError> {
        let mut out = Vec::new();
        for view in self.views.values() {
            let state = self
                .states
                .get(&view.state)
                .ok_or(InMemoryError::MissingState {
                    view: view.id,
                    state: view.state,
                })?;
            if state.organization == org && state.record_type == record_type {
                out.push(*view);
            }
        }
        Ok(out)
    }
}

/// In-memory record store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRecordStore {
    shared: Arc<RwLock<Tables>>,
}

impl InMemoryRecordStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an access-level instance.
    pub fn add_ali(&self, ali: AccessLevelInstance) {
        self.shared.write().alis.insert(ali.id, ali);
    }

    /// Seed a State.
    pub fn add_state(&self, state: StateRecord) {
        self.shared.write().states.insert(state.id, state);
    }

    /// Seed a View.
    pub fn add_view(&self, view: View) {
        self.shared.write().views.insert(view.id, view);
    }

    /// Seed a canonical record.
    pub fn add_canonical(&self, canonical: CanonicalRecord) {
        self.shared.write().canonicals.insert(canonical.id, canonical);
    }

    /// Seed an audit node.
    pub fn add_audit(&self, node: AuditNode) {
        self.shared.write().audits.insert(node.id, node);
    }

    /// Seed a note.
    pub fn add_note(&self, note: Note) {
        self.shared.write().notes.insert(note.id, note);
    }

    /// Seed a label link.
    pub fn add_label(&self, link: LabelLink) {
        self.shared.write().labels.insert(link);
    }

    /// Seed a pairing.
    pub fn add_pairing(&self, pairing: Pairing) {
        self.shared.write().pairings.insert(pairing);
    }

    /// Seed a meter series.
    pub fn add_meter(&self, meter: MeterSeries) {
        self.shared.write().meters.insert(meter.id, meter);
    }

    /// Seed an organization's matching-column configuration.
    pub fn configure_matching_columns(
        &self,
        org: OrgId,
        record_type: RecordType,
        columns: Vec<String>,
    ) {
        self.shared
            .write()
            .matching_columns
            .insert((org, record_type), columns);
    }

    /// Seed a merge-priority override.
    pub fn configure_merge_priority(
        &self,
        org: OrgId,
        record_type: RecordType,
        column: impl Into<String>,
        priority: MergePriority,
    ) {
        self.shared
            .write()
            .merge_priorities
            .entry((org, record_type))
            .or_default()
            .insert(column.into(), priority);
    }

    /// Number of Views in the store.
    pub fn num_views(&self) -> usize {
        self.shared.read().views.len()
    }

    /// Number of canonical records in the store.
    pub fn num_canonicals(&self) -> usize {
        self.shared.read().canonicals.len()
    }

    /// Number of States in the store.
    pub fn num_states(&self) -> usize {
        self.shared.read().states.len()
    }

    /// Number of audit nodes in the store.
    pub fn num_audit_nodes(&self) -> usize {
        self.shared.read().audits.len()
    }

    /// Number of notes in the store.
    pub fn num_notes(&self) -> usize {
        self.shared.read().notes.len()
    }
}

/// Snapshot transaction over [`InMemoryRecordStore`].
pub struct InMemoryTxn {
    shared: Arc<RwLock<Tables>>,
    work: Tables,
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    type Error = InMemoryError;
    type Txn = InMemoryTxn;

    async fn begin(&self) -> Result<Self::Txn, Self::Error> {
        let work = self.shared.read().clone();
        Ok(InMemoryTxn {
            shared: Arc::clone(&self.shared),
            work,
        })
    }
}

#[async_trait]
impl RecordTxn for InMemoryTxn {
    type Error = InMemoryError;

    async fn state(&mut self, id: StateId) -> Result<Option<StateRecord>, Self::Error> {
        Ok(self.work.states.get(&id).cloned())
    }

    async fn view(&mut self, id: ViewId) -> Result<Option<View>, Self::Error> {
        Ok(self.work.views.get(&id).copied())
    }

    async fn canonical(&mut self, id: CanonicalId) -> Result<Option<CanonicalRecord>, Self::Error> {
        Ok(self.work.canonicals.get(&id).copied())
    }

    async fn ali(&mut self, id: AliId) -> Result<Option<AccessLevelInstance>, Self::Error> {
        Ok(self.work.alis.get(&id).cloned())
    }

    async fn cycles_for_org(
        &mut self,
        org: OrgId,
        record_type: RecordType,
    ) -> Result<Vec<CycleId>, Self::Error> {
        let views = self.work.record_views(org, record_type)?;
        let cycles: BTreeSet<CycleId> = views.iter().map(|v| v.cycle).collect();
        Ok(cycles.into_iter().collect())
    }

    async fn views_in_cycle(
        &mut self,
        org: OrgId,
        record_type: RecordType,
        cycle: CycleId,
    ) -> Result<Vec<View>, Self::Error> {
        let mut views = self.work.record_views(org, record_type)?;
        views.retain(|v| v.cycle == cycle);
        Ok(views)
    }

    async fn views_in_org(
        &mut self,
        org: OrgId,
        record_type: RecordType,
    ) -> Result<Vec<View>, Self::Error> {
        self.work.record_views(org, record_type)
    }

    async fn views_for_canonical(&mut self, id: CanonicalId) -> Result<Vec<View>, Self::Error> {
        Ok(self
            .work
            .views
            .values()
            .filter(|v| v.canonical == id)
            .copied()
            .collect())
    }

    async fn matching_columns(
        &mut self,
        org: OrgId,
        record_type: RecordType,
    ) -> Result<Option<Vec<String>>, Self::Error> {
        Ok(self.work.matching_columns.get(&(org, record_type)).cloned())
    }

    async fn merge_priorities(
        &mut self,
        org: OrgId,
        record_type: RecordType,
    ) -> Result<BTreeMap<String, MergePriority>, Self::Error> {
        Ok(self
            .work
            .merge_priorities
            .get(&(org, record_type))
            .cloned()
            .unwrap_or_default())
    }

    async fn audit_node(&mut self, id: AuditId) -> Result<Option<AuditNode>, Self::Error> {
        Ok(self.work.audits.get(&id).cloned())
    }

    async fn latest_audit_for_state(
        &mut self,
        state: StateId,
    ) -> Result<Option<AuditNode>, Self::Error> {
        Ok(self
            .work
            .audits
            .values()
            .filter(|n| n.state == state)
            .max_by(|a, b| a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id)))
            .cloned())
    }

    async fn notes_for_view(&mut self, view: ViewId) -> Result<Vec<Note>, Self::Error> {
        Ok(self
            .work
            .notes
            .values()
            .filter(|n| n.view == view)
            .cloned()
            .collect())
    }

    async fn labels_for_view(&mut self, view: ViewId) -> Result<Vec<LabelLink>, Self::Error> {
        Ok(self
            .work
            .labels
            .iter()
            .filter(|l| l.view == view)
            .copied()
            .collect())
    }

    async fn pairings_for_view(&mut self, view: ViewId) -> Result<Vec<Pairing>, Self::Error> {
        Ok(self
            .work
            .pairings
            .iter()
            .filter(|p| p.property_view == view || p.taxlot_view == view)
            .copied()
            .collect())
    }

    async fn meters_for_canonical(
        &mut self,
        canonical: CanonicalId,
    ) -> Result<Vec<MeterSeries>, Self::Error> {
        Ok(self
            .work
            .meters
            .values()
            .filter(|m| m.canonical == canonical)
            .cloned()
            .collect())
    }

    async fn put_state(&mut self, state: StateRecord) -> Result<(), Self::Error> {
        self.work.states.insert(state.id, state);
        Ok(())
    }

    async fn put_view(&mut self, view: View) -> Result<(), Self::Error> {
        self.work.views.insert(view.id, view);
        Ok(())
    }

    async fn put_canonical(&mut self, canonical: CanonicalRecord) -> Result<(), Self::Error> {
        self.work.canonicals.insert(canonical.id, canonical);
        Ok(())
    }

    async fn put_ali(&mut self, ali: AccessLevelInstance) -> Result<(), Self::Error> {
        self.work.alis.insert(ali.id, ali);
        Ok(())
    }

    async fn put_audit(&mut self, node: AuditNode) -> Result<(), Self::Error> {
        self.work.audits.insert(node.id, node);
        Ok(())
    }

    async fn put_note(&mut self, note: Note) -> Result<(), Self::Error> {
        self.work.notes.insert(note.id, note);
        Ok(())
    }

    async fn put_label(&mut self, link: LabelLink) -> Result<(), Self::Error> {
        self.work.labels.insert(link);
        Ok(())
    }

    async fn put_pairing(&mut self, pairing: Pairing) -> Result<(), Self::Error> {
        self.work.pairings.insert(pairing);
        Ok(())
    }

    async fn put_meter(&mut self, meter: MeterSeries) -> Result<(), Self::Error> {
        self.work.meters.insert(meter.id, meter);
        Ok(())
    }

    async fn set_matching_columns(
        &mut self,
        org: OrgId,
        record_type: RecordType,
        columns: Vec<String>,
    ) -> Result<(), Self::Error> {
        self.work.matching_columns.insert((org, record_type), columns);
        Ok(())
    }

    async fn set_merge_priority(
        &mut self,
        org: OrgId,
        record_type: RecordType,
        column: String,
        priority: MergePriority,
    ) -> Result<(), Self::Error> {
        self.work
            .merge_priorities
            .entry((org, record_type))
            .or_default()
            .insert(column, priority);
        Ok(())
    }

    async fn delete_view(&mut self, id: ViewId) -> Result<(), Self::Error> {
        self.work.views.remove(&id);
        Ok(())
    }

    async fn delete_canonical(&mut self, id: CanonicalId) -> Result<(), Self::Error> {
        self.work.canonicals.remove(&id);
        Ok(())
    }

    async fn delete_audit(&mut self, id: AuditId) -> Result<(), Self::Error> {
        self.work.audits.remove(&id);
        Ok(())
    }

    async fn delete_labels_for_view(&mut self, view: ViewId) -> Result<(), Self::Error> {
        self.work.labels.retain(|l| l.view != view);
        Ok(())
    }

    async fn delete_pairings_for_view(&mut self, view: ViewId) -> Result<(), Self::Error> {
        self.work
            .pairings
            .retain(|p| p.property_view != view && p.taxlot_view != view);
        Ok(())
    }

    async fn commit(self) -> Result<(), Self::Error> {
        *self.shared.write() = self.work;
        Ok(())
    }

    async fn rollback(self) -> Result<(), Self::Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn seeded_store() -> (InMemoryRecordStore, StateRecord) {
        let store = InMemoryRecordStore::new();
        let org = OrgId::generate();
        let state = StateRecord::new(org, RecordType::Property, Utc::now());
        store.add_state(state.clone());
        (store, state)
    }

    #[tokio::test]
    async fn test_read_seeded_state() {
        let (store, state) = seeded_store();
        let mut txn = store.begin().await.unwrap();
        let fetched = txn.state(state.id).await.unwrap();
        assert_eq!(fetched, Some(state));
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let (store, state) = seeded_store();
        let extra = StateRecord::new(state.organization, RecordType::Property, Utc::now());

        let mut txn = store.begin().await.unwrap();
        txn.put_state(extra.clone()).await.unwrap();
        txn.rollback().await.unwrap();

        let mut check = store.begin().await.unwrap();
        assert!(check.state(extra.id).await.unwrap().is_none());
        assert_eq!(store.num_states(), 1);
    }

    #[tokio::test]
    async fn test_commit_publishes_writes() {
        let (store, state) = seeded_store();
        let extra = StateRecord::new(state.organization, RecordType::Property, Utc::now());

        let mut txn = store.begin().await.unwrap();
        txn.put_state(extra.clone()).await.unwrap();
        txn.commit().await.unwrap();

        assert_eq!(store.num_states(), 2);
        let mut check = store.begin().await.unwrap();
        assert!(check.state(extra.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_views_in_cycle_joins_state() {
        let (store, state) = seeded_store();
        let cycle = CycleId::generate();
        let ali = AccessLevelInstance::new(state.organization, vec!["root".to_string()]);
        let canonical = CanonicalRecord::new(
            state.organization,
            RecordType::Property,
            ali.id,
            Utc::now(),
        );
        let view = View::new(cycle, canonical.id, state.id);
        store.add_ali(ali);
        store.add_canonical(canonical);
        store.add_view(view);

        let mut txn = store.begin().await.unwrap();
        let views = txn
            .views_in_cycle(state.organization, RecordType::Property, cycle)
            .await
            .unwrap();
        assert_eq!(views, vec![view]);

        let other_cycle = txn
            .views_in_cycle(state.organization, RecordType::Property, CycleId::generate())
            .await
            .unwrap();
        assert!(other_cycle.is_empty());
    }

    #[tokio::test]
    async fn test_dangling_view_is_an_error() {
        let store = InMemoryRecordStore::new();
        let org = OrgId::generate();
        let view = View::new(CycleId::generate(), CanonicalId::generate(), StateId::generate());
        store.add_view(view);

        let mut txn = store.begin().await.unwrap();
        let err = txn.views_in_org(org, RecordType::Property).await.unwrap_err();
        assert!(matches!(err, InMemoryError::MissingState { .. }));
    }

    #[tokio::test]
    async fn test_latest_audit_prefers_newest() {
        let store = InMemoryRecordStore::new();
        let state = StateId::generate();
        let older = AuditNode::organic(
            RecordType::Property,
            state,
            "Import Creation",
            Utc::now() - chrono::Duration::minutes(5),
        );
        let newer = AuditNode::organic(RecordType::Property, state, "Manual Edit", Utc::now());
        store.add_audit(older);
        store.add_audit(newer.clone());

        let mut txn = store.begin().await.unwrap();
        let latest = txn.latest_audit_for_state(state).await.unwrap().unwrap();
        assert_eq!(latest.id, newer.id);
    }
}
