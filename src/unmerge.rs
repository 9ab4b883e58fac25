//! Unmerge engine.
//!
//! Reverses the most recent merge of a View: both parent States come
//! back as live Views in the same Cycle, each on a fresh canonical
//! identity at the placement the merged record held. Only States whose
//! lineage records exactly two parents are eligible.

use chrono::{DateTime, Utc};

use crate::error::EngineError;
use crate::merge::{gc_canonical, move_meters, repointed};
use crate::store::RecordTxn;
use crate::types::{CanonicalRecord, MergeState, StateId, View, ViewId};

/// Split a merged View back into its two parents.
///
/// Returns the two restored View ids, first parent then second. The
/// second parent was the higher-priority side of the original fold, so
/// the merged record's meters follow it.
pub async fn unmerge<T: RecordTxn>(
    txn: &mut T,
    view_id: ViewId,
    now: DateTime<Utc>,
) -> Result<(ViewId, ViewId), EngineError> {
    let view = txn
        .view(view_id)
        .await
        .map_err(EngineError::from_store)?
        .ok_or_else(|| EngineError::not_found("View", view_id))?;
    let mut merged = txn
        .state(view.state)
        .await
        .map_err(EngineError::from_store)?
        .ok_or_else(|| EngineError::not_found("State", view.state))?;

    if merged.merge_state != MergeState::Merged {
        return Err(EngineError::UnmergeIneligible {
            view: view_id,
            reason: format!("State merge_state is {}, not merged", merged.merge_state),
        });
    }

    let node = txn
        .latest_audit_for_state(merged.id)
        .await
        .map_err(EngineError::from_store)?
        .ok_or(EngineError::UnmergeIneligible {
            view: view_id,
            reason: String::from("no audit lineage"),
        })?;
    let (parent_state1, parent_state2) = match (node.parent_state1, node.parent_state2) {
        (Some(p1), Some(p2)) => (p1, p2),
        _ => {
            return Err(EngineError::UnmergeIneligible {
                view: view_id,
                reason: String::from("lineage does not record two parent States"),
            })
        }
    };

    let old_canonical = txn
        .canonical(view.canonical)
        .await
        .map_err(EngineError::from_store)?
        .ok_or_else(|| EngineError::not_found("CanonicalRecord", view.canonical))?;

    let view1 = restore_parent(txn, &view, &old_canonical, parent_state1, now).await?;
    let view2 = restore_parent(txn, &view, &old_canonical, parent_state2, now).await?;

    // Notes, labels and pairings fan out to both restored Views.
    for note in txn
        .notes_for_view(view.id)
        .await
        .map_err(EngineError::from_store)?
    {
        let mut first = note.clone();
        first.view = view1.id;
        txn.put_note(first).await.map_err(EngineError::from_store)?;
        txn.put_note(note.reattached(view2.id))
            .await
            .map_err(EngineError::from_store)?;
    }
    let labels = txn
        .labels_for_view(view.id)
        .await
        .map_err(EngineError::from_store)?;
    for link in labels {
        for restored in [view1.id, view2.id] {
            let mut copy = link;
            copy.view = restored;
            txn.put_label(copy).await.map_err(EngineError::from_store)?;
        }
    }
    txn.delete_labels_for_view(view.id)
        .await
        .map_err(EngineError::from_store)?;
    let pairings = txn
        .pairings_for_view(view.id)
        .await
        .map_err(EngineError::from_store)?;
    for pairing in &pairings {
        txn.put_pairing(repointed(pairing, view.id, view1.id))
            .await
            .map_err(EngineError::from_store)?;
        txn.put_pairing(repointed(pairing, view.id, view2.id))
            .await
            .map_err(EngineError::from_store)?;
    }
    txn.delete_pairings_for_view(view.id)
        .await
        .map_err(EngineError::from_store)?;

    merged.merge_state = MergeState::Deleted;
    txn.put_state(merged)
        .await
        .map_err(EngineError::from_store)?;
    txn.delete_view(view.id)
        .await
        .map_err(EngineError::from_store)?;

    // Meters follow the higher-priority parent, but only when the
    // unmerge orphans the old identity; other Cycles' Views may still
    // share it.
    let remaining = txn
        .views_for_canonical(old_canonical.id)
        .await
        .map_err(EngineError::from_store)?;
    if remaining.is_empty() {
        move_meters(txn, old_canonical.id, view2.canonical).await?;
    }
    gc_canonical(txn, old_canonical.id).await?;
    txn.delete_audit(node.id)
        .await
        .map_err(EngineError::from_store)?;

    Ok((view1.id, view2.id))
}

/// Bring one parent State back as a live View on a fresh canonical
/// record at the merged record's placement.
async fn restore_parent<T: RecordTxn>(
    txn: &mut T,
    merged_view: &View,
    old_canonical: &CanonicalRecord,
    parent: StateId,
    now: DateTime<Utc>,
) -> Result<View, EngineError> {
    let mut state = txn
        .state(parent)
        .await
        .map_err(EngineError::from_store)?
        .ok_or_else(|| EngineError::not_found("State", parent))?;
    state.merge_state = restored_merge_state(txn, parent).await?;
    let state_id = state.id;
    txn.put_state(state).await.map_err(EngineError::from_store)?;

    let canonical = CanonicalRecord::new(
        old_canonical.organization,
        old_canonical.record_type,
        old_canonical.access_level_instance,
        now,
    );
    let restored = View::new(merged_view.cycle, canonical.id, state_id);
    txn.put_canonical(canonical)
        .await
        .map_err(EngineError::from_store)?;
    txn.put_view(restored)
        .await
        .map_err(EngineError::from_store)?;
    Ok(restored)
}

/// A restored parent is `Merged` again when its own lineage says it was
/// itself produced by a merge, otherwise `New`.
async fn restored_merge_state<T: RecordTxn>(
    txn: &mut T,
    state: StateId,
) -> Result<MergeState, EngineError> {
    let own = txn
        .latest_audit_for_state(state)
        .await
        .map_err(EngineError::from_store)?;
    Ok(match own {
        Some(node) if node.is_merge() => MergeState::Merged,
        _ => MergeState::New,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::SYSTEM_MATCH;
    use crate::store::{InMemoryRecordStore, RecordStore};
    use crate::types::{
        AccessLevelInstance, AuditNode, CycleId, LabelId, LabelLink, MeterSeries, Note, OrgId,
        RecordType, StateRecord,
    };

    struct MergedFixture {
        store: InMemoryRecordStore,
        org: OrgId,
        merged_view: View,
        parent1: StateId,
        parent2: StateId,
    }

    fn merged_fixture() -> MergedFixture {
        let store = InMemoryRecordStore::new();
        let org = OrgId::generate();
        let cycle = CycleId::generate();
        let now = Utc::now();

        let ali = AccessLevelInstance::new(org, vec![String::from("root")]);
        store.add_ali(ali.clone());

        let parent1 = StateRecord::new(org, RecordType::Property, now);
        let parent2 = StateRecord::new(org, RecordType::Property, now);
        let mut merged = StateRecord::new(org, RecordType::Property, now);
        merged.merge_state = MergeState::Merged;

        let canonical = CanonicalRecord::new(org, RecordType::Property, ali.id, now);
        let merged_view = View::new(cycle, canonical.id, merged.id);

        store.add_state(parent1.clone());
        store.add_state(parent2.clone());
        store.add_state(merged.clone());
        store.add_canonical(canonical);
        store.add_view(merged_view);
        store.add_audit(AuditNode::merge(
            RecordType::Property,
            None,
            None,
            parent1.id,
            parent2.id,
            merged.id,
            SYSTEM_MATCH,
            now,
        ));

        MergedFixture {
            store,
            org,
            merged_view,
            parent1: parent1.id,
            parent2: parent2.id,
        }
    }

    #[tokio::test]
    async fn test_unmerge_restores_two_views() {
        let fx = merged_fixture();
        let mut txn = fx.store.begin().await.unwrap();

        let (v1, v2) = unmerge(&mut txn, fx.merged_view.id, Utc::now())
            .await
            .unwrap();
        txn.commit().await.unwrap();

        let mut txn = fx.store.begin().await.unwrap();
        let restored1 = txn.view(v1).await.unwrap().unwrap();
        let restored2 = txn.view(v2).await.unwrap().unwrap();
        assert_eq!(restored1.state, fx.parent1);
        assert_eq!(restored2.state, fx.parent2);
        assert_ne!(restored1.canonical, restored2.canonical);

        let p1 = txn.state(fx.parent1).await.unwrap().unwrap();
        assert_eq!(p1.merge_state, MergeState::New);
        let merged = txn.state(fx.merged_view.state).await.unwrap().unwrap();
        assert_eq!(merged.merge_state, MergeState::Deleted);
        assert!(txn.view(fx.merged_view.id).await.unwrap().is_none());
        assert!(txn.canonical(fx.merged_view.canonical).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unmerge_duplicates_relations_and_moves_meters() {
        let fx = merged_fixture();
        fx.store.add_note(Note::new(
            fx.merged_view.id,
            "inspected in person",
            Utc::now(),
        ));
        let label = LabelId::generate();
        fx.store.add_label(LabelLink {
            label,
            view: fx.merged_view.id,
        });
        fx.store
            .add_meter(MeterSeries::new(fx.merged_view.canonical, "electricity"));

        let mut txn = fx.store.begin().await.unwrap();
        let (v1, v2) = unmerge(&mut txn, fx.merged_view.id, Utc::now())
            .await
            .unwrap();

        let notes1 = txn.notes_for_view(v1).await.unwrap();
        let notes2 = txn.notes_for_view(v2).await.unwrap();
        assert_eq!(notes1.len(), 1);
        assert_eq!(notes2.len(), 1);
        assert_eq!(notes1[0].text, notes2[0].text);
        assert_ne!(notes1[0].id, notes2[0].id);

        assert_eq!(txn.labels_for_view(v1).await.unwrap().len(), 1);
        assert_eq!(txn.labels_for_view(v2).await.unwrap().len(), 1);

        let second = txn.view(v2).await.unwrap().unwrap();
        let meters = txn.meters_for_canonical(second.canonical).await.unwrap();
        assert_eq!(meters.len(), 1);
    }

    #[tokio::test]
    async fn test_unmerge_keeps_meters_on_shared_identity() {
        let fx = merged_fixture();
        // Another Cycle's View still references the merged View's
        // canonical identity.
        let linked_state = StateRecord::new(fx.org, RecordType::Property, Utc::now());
        let linked_view = View::new(
            CycleId::generate(),
            fx.merged_view.canonical,
            linked_state.id,
        );
        fx.store.add_state(linked_state);
        fx.store.add_view(linked_view);
        fx.store
            .add_meter(MeterSeries::new(fx.merged_view.canonical, "electricity"));

        let mut txn = fx.store.begin().await.unwrap();
        let (_, v2) = unmerge(&mut txn, fx.merged_view.id, Utc::now())
            .await
            .unwrap();

        // The shared identity survives and keeps its series.
        assert!(txn
            .canonical(fx.merged_view.canonical)
            .await
            .unwrap()
            .is_some());
        let kept = txn
            .meters_for_canonical(fx.merged_view.canonical)
            .await
            .unwrap();
        assert_eq!(kept.len(), 1);

        let second = txn.view(v2).await.unwrap().unwrap();
        assert!(txn
            .meters_for_canonical(second.canonical)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_unmerge_rejects_unmerged_view() {
        let store = InMemoryRecordStore::new();
        let org = OrgId::generate();
        let now = Utc::now();
        let ali = AccessLevelInstance::new(org, vec![String::from("root")]);
        store.add_ali(ali.clone());

        let state = StateRecord::new(org, RecordType::Property, now);
        let canonical = CanonicalRecord::new(org, RecordType::Property, ali.id, now);
        let view = View::new(CycleId::generate(), canonical.id, state.id);
        store.add_state(state);
        store.add_canonical(canonical);
        store.add_view(view);

        let mut txn = store.begin().await.unwrap();
        let err = unmerge(&mut txn, view.id, Utc::now()).await.unwrap_err();
        assert!(matches!(err, EngineError::UnmergeIneligible { .. }));
    }

    #[tokio::test]
    async fn test_unmerge_missing_view_is_not_found() {
        let store = InMemoryRecordStore::new();
        let mut txn = store.begin().await.unwrap();
        let err = unmerge(&mut txn, ViewId::generate(), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }
}
