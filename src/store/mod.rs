//! Record storage backends.
//!
//! The engine never touches a backend directly: every top-level operation
//! opens one [`RecordTxn`] unit of work, performs all reads and writes
//! through it, and then either commits or rolls back. Preview mode is
//! just a run whose transaction is rolled back after the summary is
//! captured, so the transaction boundary lives with the caller, not the
//! grouping logic.

pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::types::{
    AccessLevelInstance, AliId, AuditId, AuditNode, CanonicalId, CanonicalRecord, CycleId,
    LabelLink, MergePriority, MeterSeries, Note, OrgId, Pairing, RecordType, StateId, StateRecord,
    View, ViewId,
};

/// Factory for transactional units of work.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Error type for store operations.
    type Error: std::error::Error + Send + Sync + 'static;
    /// Transaction type this store hands out.
    type Txn: RecordTxn<Error = Self::Error>;

    /// Open a new unit of work.
    ///
    /// Mutations made through the returned transaction become visible to
    /// other transactions only on commit; dropping it without committing
    /// must restore pre-call state exactly.
    async fn begin(&self) -> Result<Self::Txn, Self::Error>;
}

/// One atomic unit of work over the relational store.
///
/// All reads return owned values; implementations must guarantee
/// deterministic ordering of multi-row results (ordered by id unless
/// documented otherwise).
#[async_trait]
pub trait RecordTxn: Send {
    /// Error type for store operations.
    type Error: std::error::Error + Send + Sync + 'static;

    // -- reads ------------------------------------------------------------

    /// Fetch a State by id.
    async fn state(&mut self, id: StateId) -> Result<Option<StateRecord>, Self::Error>;

    /// Fetch a View by id.
    async fn view(&mut self, id: ViewId) -> Result<Option<View>, Self::Error>;

    /// Fetch a canonical record by id.
    async fn canonical(&mut self, id: CanonicalId) -> Result<Option<CanonicalRecord>, Self::Error>;

    /// Fetch an access-level instance by id.
    async fn ali(&mut self, id: AliId) -> Result<Option<AccessLevelInstance>, Self::Error>;

    /// Cycles that have at least one View for the organization and
    /// entity type, ordered by id.
    async fn cycles_for_org(
        &mut self,
        org: OrgId,
        record_type: RecordType,
    ) -> Result<Vec<CycleId>, Self::Error>;

    /// Views of one entity type in one Cycle of one organization,
    /// ordered by id.
    async fn views_in_cycle(
        &mut self,
        org: OrgId,
        record_type: RecordType,
        cycle: CycleId,
    ) -> Result<Vec<View>, Self::Error>;

    /// All Views of one entity type in the organization, ordered by id.
    async fn views_in_org(
        &mut self,
        org: OrgId,
        record_type: RecordType,
    ) -> Result<Vec<View>, Self::Error>;

    /// Views referencing one canonical record, ordered by id.
    async fn views_for_canonical(&mut self, id: CanonicalId) -> Result<Vec<View>, Self::Error>;

    /// The organization's configured matching columns, if any.
    async fn matching_columns(
        &mut self,
        org: OrgId,
        record_type: RecordType,
    ) -> Result<Option<Vec<String>>, Self::Error>;

    /// Per-column merge-priority overrides (absent columns default to
    /// [`MergePriority::FavorNew`]).
    async fn merge_priorities(
        &mut self,
        org: OrgId,
        record_type: RecordType,
    ) -> Result<BTreeMap<String, MergePriority>, Self::Error>;

    /// Fetch an audit node by id.
    async fn audit_node(&mut self, id: AuditId) -> Result<Option<AuditNode>, Self::Error>;

    /// Most recent audit node whose `state` is the given State.
    async fn latest_audit_for_state(
        &mut self,
        state: StateId,
    ) -> Result<Option<AuditNode>, Self::Error>;

    /// Notes attached to a View, ordered by id.
    async fn notes_for_view(&mut self, view: ViewId) -> Result<Vec<Note>, Self::Error>;

    /// Label links on a View, ordered.
    async fn labels_for_view(&mut self, view: ViewId) -> Result<Vec<LabelLink>, Self::Error>;

    /// Pairings referencing a View on either side, ordered.
    async fn pairings_for_view(&mut self, view: ViewId) -> Result<Vec<Pairing>, Self::Error>;

    /// Meter series owned by a canonical record, ordered by id.
    async fn meters_for_canonical(
        &mut self,
        canonical: CanonicalId,
    ) -> Result<Vec<MeterSeries>, Self::Error>;

    // -- writes -----------------------------------------------------------

    /// Insert or replace a State.
    async fn put_state(&mut self, state: StateRecord) -> Result<(), Self::Error>;

    /// Insert or replace a View.
    async fn put_view(&mut self, view: View) -> Result<(), Self::Error>;

    /// Insert or replace a canonical record.
    async fn put_canonical(&mut self, canonical: CanonicalRecord) -> Result<(), Self::Error>;

    /// Insert or replace an access-level instance.
    async fn put_ali(&mut self, ali: AccessLevelInstance) -> Result<(), Self::Error>;

    /// Append an audit node.
    async fn put_audit(&mut self, node: AuditNode) -> Result<(), Self::Error>;

    /// Insert or replace a note (same id re-points the note).
    async fn put_note(&mut self, note: Note) -> Result<(), Self::Error>;

    /// Add a label link (set semantics).
    async fn put_label(&mut self, link: LabelLink) -> Result<(), Self::Error>;

    /// Add a pairing (set semantics).
    async fn put_pairing(&mut self, pairing: Pairing) -> Result<(), Self::Error>;

    /// Insert or replace a meter series (same id re-points the series).
    async fn put_meter(&mut self, meter: MeterSeries) -> Result<(), Self::Error>;

    /// Replace the organization's matching-column configuration.
    async fn set_matching_columns(
        &mut self,
        org: OrgId,
        record_type: RecordType,
        columns: Vec<String>,
    ) -> Result<(), Self::Error>;

    /// Set a per-column merge-priority override.
    async fn set_merge_priority(
        &mut self,
        org: OrgId,
        record_type: RecordType,
        column: String,
        priority: MergePriority,
    ) -> Result<(), Self::Error>;

    /// Delete a View. Subsidiary rows must already be migrated.
    async fn delete_view(&mut self, id: ViewId) -> Result<(), Self::Error>;

    /// Delete a canonical record.
    async fn delete_canonical(&mut self, id: CanonicalId) -> Result<(), Self::Error>;

    /// Delete an audit node (unmerge repair only).
    async fn delete_audit(&mut self, id: AuditId) -> Result<(), Self::Error>;

    /// Remove all label links from a View.
    async fn delete_labels_for_view(&mut self, view: ViewId) -> Result<(), Self::Error>;

    /// Remove all pairings referencing a View on either side.
    async fn delete_pairings_for_view(&mut self, view: ViewId) -> Result<(), Self::Error>;

    // -- transaction boundary ---------------------------------------------

    /// Make all mutations visible atomically.
    async fn commit(self) -> Result<(), Self::Error>;

    /// Discard all mutations.
    async fn rollback(self) -> Result<(), Self::Error>;
}

pub use memory::InMemoryRecordStore;

#[cfg(feature = "postgres")]
pub use postgres::PostgresRecordStore;
