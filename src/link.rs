//! Cross-Cycle link engine.
//!
//! Runs after intra-Cycle merging, when each matching tuple has at most
//! one View per Cycle. Views across all Cycles sharing a tuple are
//! assigned one shared canonical identity; Views whose tuple went empty
//! are split off onto fresh identities; canonical records left
//! unreferenced are deleted in a deferred cleanup pass.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::EngineError;
use crate::matching::MatchingKey;
use crate::merge::{
    fetch_member, gc_canonical, group_placement, merge_cycle, move_meters, proposed_group, Member,
    RoundContext,
};
use crate::store::RecordTxn;
use crate::types::{
    CanonicalId, CanonicalRecord, CycleId, HierarchyConflictInfo, ProposedGroup, ViewId,
    ViewRunOutcome,
};

/// Outcome of the whole-organization linking pass.
pub(crate) struct LinkOutcome {
    /// Views reassigned to a shared canonical identity.
    pub linked: usize,
    /// Views excluded from grouping because their matching tuple was
    /// empty.
    pub empty: usize,
    /// Groups rejected by the hierarchy isolation guard.
    pub conflicts: Vec<HierarchyConflictInfo>,
    /// Groups that were (or, in preview, would be) linked.
    pub groups: Vec<ProposedGroup>,
}

/// What [`link_group`] did with one matching-tuple group.
enum GroupAction {
    /// Singleton with an exclusively-owned canonical record; untouched.
    Untouched,
    /// Every member already shares one canonical record; no-op.
    AlreadyLinked,
    /// Members were reassigned onto a fresh shared canonical record.
    Relinked {
        /// Views re-pointed at the new identity.
        reassigned: usize,
    },
    /// A singleton was split away from a canonical it no longer matches.
    Split,
    /// The hierarchy isolation guard rejected the group.
    Conflict(HierarchyConflictInfo),
}

struct KeyedGroup {
    key: MatchingKey,
    members: Vec<Member>,
}

/// Global linking pass over every View of the organization.
pub(crate) async fn link_org<T: RecordTxn>(
    txn: &mut T,
    ctx: &RoundContext<'_>,
) -> Result<LinkOutcome, EngineError> {
    let org = ctx.criteria.organization;
    let record_type = ctx.criteria.record_type;
    let now = Utc::now();

    let views = txn
        .views_in_org(org, record_type)
        .await
        .map_err(EngineError::from_store)?;

    let mut groups: BTreeMap<Vec<u8>, KeyedGroup> = BTreeMap::new();
    let mut touched: BTreeSet<CanonicalId> = BTreeSet::new();
    let mut empty = 0usize;

    for view in views {
        let member = fetch_member(txn, view).await?;
        let key = MatchingKey::for_state(ctx.criteria, &member.state, ctx.normalizer);
        if key.is_empty() {
            empty += 1;
            disassociate_if_shared(txn, member, now, &mut touched).await?;
            continue;
        }
        groups
            .entry(key.canonical_bytes())
            .or_insert_with(|| KeyedGroup {
                key,
                members: Vec::new(),
            })
            .members
            .push(member);
    }

    let mut outcome = LinkOutcome {
        linked: 0,
        empty,
        conflicts: Vec::new(),
        groups: Vec::new(),
    };

    for group in groups.into_values() {
        match link_group(txn, ctx, &group.members, now, &mut touched).await? {
            GroupAction::Untouched | GroupAction::AlreadyLinked | GroupAction::Split => {}
            GroupAction::Relinked { reassigned } => {
                outcome.linked += reassigned;
                outcome.groups.push(proposed_group(&group.key, &group.members));
            }
            GroupAction::Conflict(info) => outcome.conflicts.push(info),
        }
    }

    // Deferred cleanup: canonical records the pass orphaned.
    for id in touched {
        gc_canonical(txn, id).await?;
    }

    Ok(outcome)
}

/// Single-View entry point: merge everything matching the View's tuple
/// Cycle by Cycle, then link the survivors.
///
/// Unlike the batch pass, a hierarchy conflict here is an error: the
/// caller asked for this specific View and gets a typed failure instead
/// of a partially-reported batch.
pub(crate) async fn link_single_view<T: RecordTxn>(
    txn: &mut T,
    ctx: &RoundContext<'_>,
    view_id: ViewId,
) -> Result<ViewRunOutcome, EngineError> {
    let view = txn
        .view(view_id)
        .await
        .map_err(EngineError::from_store)?
        .ok_or_else(|| EngineError::not_found("View", view_id))?;
    let member = fetch_member(txn, view).await?;
    let key = MatchingKey::for_state(ctx.criteria, &member.state, ctx.normalizer);
    if key.is_empty() {
        // Empty tuples never merge or link.
        return Ok(ViewRunOutcome {
            merge_count: 0,
            link_count: 0,
            view: view_id,
        });
    }

    let mut current = view_id;
    let mut merge_count = 0;

    // Force intra-Cycle merges wherever the tuple collides within one
    // Cycle, the target's own Cycle included.
    let cycles = cycles_with_collisions(txn, ctx, &key).await?;
    for cycle in cycles {
        let outcome = merge_cycle(txn, ctx, cycle, Some(current), Some(&key)).await?;
        if let Some(conflict) = outcome.report.conflicts.into_iter().next() {
            return Err(EngineError::HierarchyConflict(conflict));
        }
        merge_count += outcome.report.merged;
        if let Some(target) = outcome.report.target_view {
            current = target;
        }
    }

    // Re-collect the group post-merge and link it.
    let mut members = Vec::new();
    for v in txn
        .views_in_org(ctx.criteria.organization, ctx.criteria.record_type)
        .await
        .map_err(EngineError::from_store)?
    {
        let m = fetch_member(txn, v).await?;
        let k = MatchingKey::for_state(ctx.criteria, &m.state, ctx.normalizer);
        if k.canonical_bytes() == key.canonical_bytes() {
            members.push(m);
        }
    }

    let now = Utc::now();
    let mut touched = BTreeSet::new();
    let link_count = match link_group(txn, ctx, &members, now, &mut touched).await? {
        GroupAction::Relinked { reassigned } => reassigned.saturating_sub(1),
        GroupAction::Conflict(info) => return Err(EngineError::HierarchyConflict(info)),
        _ => 0,
    };
    for id in touched {
        gc_canonical(txn, id).await?;
    }

    Ok(ViewRunOutcome {
        merge_count,
        link_count,
        view: current,
    })
}

async fn cycles_with_collisions<T: RecordTxn>(
    txn: &mut T,
    ctx: &RoundContext<'_>,
    key: &MatchingKey,
) -> Result<Vec<CycleId>, EngineError> {
    let views = txn
        .views_in_org(ctx.criteria.organization, ctx.criteria.record_type)
        .await
        .map_err(EngineError::from_store)?;
    let key_bytes = key.canonical_bytes();
    let mut per_cycle: BTreeMap<CycleId, usize> = BTreeMap::new();
    for view in views {
        let member = fetch_member(txn, view).await?;
        let k = MatchingKey::for_state(ctx.criteria, &member.state, ctx.normalizer);
        if k.canonical_bytes() == key_bytes {
            *per_cycle.entry(view.cycle).or_default() += 1;
        }
    }
    Ok(per_cycle
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(cycle, _)| cycle)
        .collect())
}

/// Apply the linking rules to one matching-tuple group.
async fn link_group<T: RecordTxn>(
    txn: &mut T,
    ctx: &RoundContext<'_>,
    members: &[Member],
    now: DateTime<Utc>,
    touched: &mut BTreeSet<CanonicalId>,
) -> Result<GroupAction, EngineError> {
    let (first, rest) = match members.split_first() {
        Some(split) => split,
        None => return Ok(GroupAction::Untouched),
    };

    let shared_canonical = first.view.canonical;
    let all_same = rest.iter().all(|m| m.view.canonical == shared_canonical);
    let canonical_views = txn
        .views_for_canonical(shared_canonical)
        .await
        .map_err(EngineError::from_store)?;

    if members.len() == 1 && canonical_views.len() == 1 {
        // Reusable: the singleton exclusively owns its identity.
        return Ok(GroupAction::Untouched);
    }
    if all_same && canonical_views.len() == members.len() {
        // Already linked, and nothing outside the group shares the id.
        return Ok(GroupAction::AlreadyLinked);
    }

    let placement = match group_placement(txn, ctx.policy, members).await? {
        Ok(ali) => ali,
        Err(conflict) => return Ok(GroupAction::Conflict(conflict)),
    };

    let canonical = CanonicalRecord::new(
        ctx.criteria.organization,
        ctx.criteria.record_type,
        placement,
        now,
    );
    txn.put_canonical(canonical)
        .await
        .map_err(EngineError::from_store)?;

    let mut old: Vec<CanonicalRecord> = Vec::new();
    for id in members
        .iter()
        .map(|m| m.view.canonical)
        .collect::<BTreeSet<_>>()
    {
        let record = txn
            .canonical(id)
            .await
            .map_err(EngineError::from_store)?
            .ok_or_else(|| EngineError::not_found("CanonicalRecord", id))?;
        old.push(record);
    }

    for member in members {
        let mut view = member.view;
        view.canonical = canonical.id;
        txn.put_view(view).await.map_err(EngineError::from_store)?;
    }

    // Migrate meters from identities the reassignment orphaned, in
    // ascending creation order so series from the most recent identity
    // land last. Identities still referenced by out-of-group Views keep
    // their meters.
    old.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id)));
    for record in &old {
        let remaining = txn
            .views_for_canonical(record.id)
            .await
            .map_err(EngineError::from_store)?;
        if remaining.is_empty() {
            move_meters(txn, record.id, canonical.id).await?;
        }
    }
    touched.extend(old.iter().map(|r| r.id));

    if members.len() == 1 {
        Ok(GroupAction::Split)
    } else {
        Ok(GroupAction::Relinked {
            reassigned: members.len(),
        })
    }
}

/// Give a View whose tuple went empty a fresh canonical identity when
/// its current one is shared with former matching partners.
async fn disassociate_if_shared<T: RecordTxn>(
    txn: &mut T,
    member: Member,
    now: DateTime<Utc>,
    touched: &mut BTreeSet<CanonicalId>,
) -> Result<(), EngineError> {
    let partners = txn
        .views_for_canonical(member.view.canonical)
        .await
        .map_err(EngineError::from_store)?;
    if partners.len() <= 1 {
        return Ok(());
    }

    let old = txn
        .canonical(member.view.canonical)
        .await
        .map_err(EngineError::from_store)?
        .ok_or_else(|| EngineError::not_found("CanonicalRecord", member.view.canonical))?;

    let fresh = CanonicalRecord::new(old.organization, old.record_type, old.access_level_instance, now);
    txn.put_canonical(fresh)
        .await
        .map_err(EngineError::from_store)?;

    let mut view = member.view;
    view.canonical = fresh.id;
    txn.put_view(view).await.map_err(EngineError::from_store)?;
    touched.insert(old.id);
    Ok(())
}
