//! Intra-Cycle merge engine.
//!
//! Groups the States of one Cycle by matching tuple and folds each group
//! of two or more into a single State. The fold is ordered
//! oldest-to-newest by `updated` so the most recent record has the
//! highest priority; a caller-designated target View is moved to the end
//! of the fold regardless of timestamp so its values win ties.
//!
//! Each pairwise fold produces a brand-new State, CanonicalRecord and
//! View, migrates every subsidiary relationship from both parents, writes
//! one audit node and deletes the superseded Views. Canonical records
//! left with no View and no meters are garbage-collected on the spot.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::audit;
use crate::criteria::{accessors_for, MatchingCriteria};
use crate::error::EngineError;
use crate::matching::{AddressNormalizer, MatchingKey};
use crate::store::RecordTxn;
use crate::types::{
    resolve_placement, AccessLevelInstance, AliId, CanonicalId, CanonicalRecord, CycleId,
    CycleMergeReport, ExtraData, HierarchyConflictInfo, HierarchyPolicy, LabelLink, MergePriority,
    MergeState, Pairing, ProposedGroup, StateRecord, View, ViewId,
};

/// Everything resolved once per merge/link round and reused for every
/// State in it. Changing the criteria mid-round is forbidden by
/// contract; holding them here enforces that.
pub(crate) struct RoundContext<'a> {
    pub criteria: &'a MatchingCriteria,
    pub priorities: &'a BTreeMap<String, MergePriority>,
    pub policy: HierarchyPolicy,
    pub normalizer: &'a AddressNormalizer,
}

/// A View together with its State, as the fold operates on both.
#[derive(Debug, Clone)]
pub(crate) struct Member {
    pub view: View,
    pub state: StateRecord,
}

pub(crate) async fn fetch_member<T: RecordTxn>(
    txn: &mut T,
    view: View,
) -> Result<Member, EngineError> {
    let state = txn
        .state(view.state)
        .await
        .map_err(EngineError::from_store)?
        .ok_or_else(|| EngineError::not_found("State", view.state))?;
    Ok(Member { view, state })
}

/// Outcome of merging one Cycle, with the groupings captured for
/// preview reporting.
pub(crate) struct CycleMergeOutcome {
    pub report: CycleMergeReport,
    pub groups: Vec<ProposedGroup>,
}

struct Group {
    key: MatchingKey,
    members: Vec<Member>,
}

/// Run the intra-Cycle merge pass for one Cycle.
///
/// `target` moves that View to the end of its group's fold order.
/// `only` restricts the pass to groups whose matching tuple equals the
/// given key (single-View runs delegate here with their own tuple).
pub(crate) async fn merge_cycle<T: RecordTxn>(
    txn: &mut T,
    ctx: &RoundContext<'_>,
    cycle: CycleId,
    target: Option<ViewId>,
    only: Option<&MatchingKey>,
) -> Result<CycleMergeOutcome, EngineError> {
    let org = ctx.criteria.organization;
    let record_type = ctx.criteria.record_type;

    let views = txn
        .views_in_cycle(org, record_type, cycle)
        .await
        .map_err(EngineError::from_store)?;

    // Group by canonical tuple encoding; empty tuples never group.
    let mut groups: BTreeMap<Vec<u8>, Group> = BTreeMap::new();
    let only_bytes = only.map(|k| k.canonical_bytes());
    for view in views {
        let member = fetch_member(txn, view).await?;
        let key = MatchingKey::for_state(ctx.criteria, &member.state, ctx.normalizer);
        if key.is_empty() {
            continue;
        }
        let bytes = key.canonical_bytes();
        if let Some(filter) = &only_bytes {
            if &bytes != filter {
                continue;
            }
        }
        groups
            .entry(bytes)
            .or_insert_with(|| Group {
                key,
                members: Vec::new(),
            })
            .members
            .push(member);
    }

    let mut report = CycleMergeReport {
        cycle,
        merged: 0,
        conflicts: Vec::new(),
        target_view: None,
    };
    let mut captured = Vec::new();
    let now = Utc::now();

    for group in groups.into_values() {
        if group.members.len() < 2 {
            continue;
        }
        captured.push(proposed_group(&group.key, &group.members));

        let placement = match group_placement(txn, ctx.policy, &group.members).await? {
            Ok(ali) => ali,
            Err(conflict) => {
                report.conflicts.push(conflict);
                continue;
            }
        };

        let mut members = group.members;
        members.sort_by(|a, b| {
            a.state
                .updated
                .cmp(&b.state.updated)
                .then_with(|| a.view.id.cmp(&b.view.id))
        });
        // The caller's target always folds last so its values win ties.
        let target_member = target
            .and_then(|t| members.iter().position(|m| m.view.id == t))
            .map(|pos| members.remove(pos));
        let group_has_target = target_member.is_some();
        if let Some(t) = target_member {
            members.push(t);
        }

        let mut iter = members.into_iter();
        let mut acc = match iter.next() {
            Some(first) => first,
            None => continue,
        };
        for next in iter {
            acc = merge_pair(txn, ctx, cycle, acc, next, placement, now).await?;
            report.merged += 1;
        }
        if group_has_target {
            report.target_view = Some(acc.view.id);
        }
    }

    Ok(CycleMergeOutcome {
        report,
        groups: captured,
    })
}

pub(crate) fn proposed_group(key: &MatchingKey, members: &[Member]) -> ProposedGroup {
    let mut canonicals: Vec<CanonicalId> = members.iter().map(|m| m.view.canonical).collect();
    canonicals.sort();
    canonicals.dedup();
    ProposedGroup {
        fingerprint: key.fingerprint_hex(),
        key: key.display_values(),
        views: members.iter().map(|m| m.view.id).collect(),
        canonicals,
    }
}

/// Resolve the hierarchy placement a group's survivor should take, or
/// the conflict that forbids the group from merging at all.
pub(crate) async fn group_placement<T: RecordTxn>(
    txn: &mut T,
    policy: HierarchyPolicy,
    members: &[Member],
) -> Result<Result<AliId, HierarchyConflictInfo>, EngineError> {
    let mut placements: Vec<AccessLevelInstance> = Vec::with_capacity(members.len());
    for member in members {
        let canonical = txn
            .canonical(member.view.canonical)
            .await
            .map_err(EngineError::from_store)?
            .ok_or_else(|| EngineError::not_found("CanonicalRecord", member.view.canonical))?;
        let ali = txn
            .ali(canonical.access_level_instance)
            .await
            .map_err(EngineError::from_store)?
            .ok_or_else(|| {
                EngineError::not_found("AccessLevelInstance", canonical.access_level_instance)
            })?;
        placements.push(ali);
    }
    let refs: Vec<&AccessLevelInstance> = placements.iter().collect();
    Ok(resolve_placement(policy, &refs).map(|ali| ali.id))
}

/// Fold two Members into one.
///
/// `incoming` is the higher-priority side: under the default `FavorNew`
/// priority its non-null values win. Produces a new State, canonical
/// record and View; migrates notes, labels, pairings and meters; writes
/// the audit node; deletes the two old Views and garbage-collects their
/// canonical records when nothing references them anymore.
pub(crate) async fn merge_pair<T: RecordTxn>(
    txn: &mut T,
    ctx: &RoundContext<'_>,
    cycle: CycleId,
    existing: Member,
    incoming: Member,
    placement: AliId,
    now: DateTime<Utc>,
) -> Result<Member, EngineError> {
    let org = ctx.criteria.organization;
    let record_type = ctx.criteria.record_type;

    let mut merged = StateRecord::new(org, record_type, now);
    merged.import_file = incoming.state.import_file.or(existing.state.import_file);
    merged.data_state = incoming.state.data_state;
    merged.merge_state = MergeState::Merged;

    for acc in accessors_for(record_type) {
        let a = acc.get(&existing.state).filter(|v| !v.is_blank());
        let b = acc.get(&incoming.state).filter(|v| !v.is_blank());
        let priority = ctx.priorities.get(acc.name).copied().unwrap_or_default();
        let value = match priority {
            MergePriority::FavorNew => b.or(a),
            MergePriority::FavorExisting => a.or(b),
        };
        acc.set(&mut merged, value);
    }
    let extra_priority = ctx
        .priorities
        .get("extra_data")
        .copied()
        .unwrap_or_default();
    merged.extra_data = ExtraData::merged(
        &existing.state.extra_data,
        &incoming.state.extra_data,
        extra_priority,
    );

    let canonical = CanonicalRecord::new(org, record_type, placement, now);
    let view = View::new(cycle, canonical.id, merged.id);

    txn.put_state(merged.clone())
        .await
        .map_err(EngineError::from_store)?;
    txn.put_canonical(canonical)
        .await
        .map_err(EngineError::from_store)?;
    txn.put_view(view).await.map_err(EngineError::from_store)?;

    for old in [&existing.view, &incoming.view] {
        move_view_relations(txn, old.id, view.id).await?;
    }

    let mut old_canonicals = vec![existing.view.canonical];
    if incoming.view.canonical != existing.view.canonical {
        old_canonicals.push(incoming.view.canonical);
    }
    for old in &old_canonicals {
        move_meters(txn, *old, canonical.id).await?;
    }

    audit::record_merge(
        txn,
        record_type,
        existing.state.id,
        incoming.state.id,
        merged.id,
        now,
    )
    .await?;

    txn.delete_view(existing.view.id)
        .await
        .map_err(EngineError::from_store)?;
    txn.delete_view(incoming.view.id)
        .await
        .map_err(EngineError::from_store)?;
    for old in old_canonicals {
        gc_canonical(txn, old).await?;
    }

    Ok(Member {
        view,
        state: merged,
    })
}

/// Re-point every note, label and pairing from one View to another.
pub(crate) async fn move_view_relations<T: RecordTxn>(
    txn: &mut T,
    from: ViewId,
    to: ViewId,
) -> Result<(), EngineError> {
    for mut note in txn
        .notes_for_view(from)
        .await
        .map_err(EngineError::from_store)?
    {
        note.view = to;
        txn.put_note(note).await.map_err(EngineError::from_store)?;
    }

    let labels = txn
        .labels_for_view(from)
        .await
        .map_err(EngineError::from_store)?;
    for link in labels {
        txn.put_label(LabelLink {
            label: link.label,
            view: to,
        })
        .await
        .map_err(EngineError::from_store)?;
    }
    txn.delete_labels_for_view(from)
        .await
        .map_err(EngineError::from_store)?;

    let pairings = txn
        .pairings_for_view(from)
        .await
        .map_err(EngineError::from_store)?;
    for pairing in &pairings {
        txn.put_pairing(repointed(pairing, from, to))
            .await
            .map_err(EngineError::from_store)?;
    }
    txn.delete_pairings_for_view(from)
        .await
        .map_err(EngineError::from_store)?;

    Ok(())
}

pub(crate) fn repointed(pairing: &Pairing, from: ViewId, to: ViewId) -> Pairing {
    Pairing {
        property_view: if pairing.property_view == from {
            to
        } else {
            pairing.property_view
        },
        taxlot_view: if pairing.taxlot_view == from {
            to
        } else {
            pairing.taxlot_view
        },
    }
}

/// Re-point every meter series from one canonical record to another.
pub(crate) async fn move_meters<T: RecordTxn>(
    txn: &mut T,
    from: CanonicalId,
    to: CanonicalId,
) -> Result<(), EngineError> {
    for mut meter in txn
        .meters_for_canonical(from)
        .await
        .map_err(EngineError::from_store)?
    {
        meter.canonical = to;
        txn.put_meter(meter).await.map_err(EngineError::from_store)?;
    }
    Ok(())
}

/// Delete a canonical record once nothing references it.
///
/// A record keeps existing while any View references it or it still owns
/// meter series.
pub(crate) async fn gc_canonical<T: RecordTxn>(
    txn: &mut T,
    id: CanonicalId,
) -> Result<bool, EngineError> {
    let views = txn
        .views_for_canonical(id)
        .await
        .map_err(EngineError::from_store)?;
    if !views.is_empty() {
        return Ok(false);
    }
    let meters = txn
        .meters_for_canonical(id)
        .await
        .map_err(EngineError::from_store)?;
    if !meters.is_empty() {
        return Ok(false);
    }
    txn.delete_canonical(id)
        .await
        .map_err(EngineError::from_store)?;
    Ok(true)
}
