//! Audit lineage tracking.
//!
//! The store holds the nodes; this module owns the two traversals the
//! rest of the engine needs — "most recent node for a State" comes
//! straight from the store, the full history walk lives here — plus the
//! append performed on every merge.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

use crate::error::EngineError;
use crate::store::RecordTxn;
use crate::types::{AuditId, AuditNode, RecordType, StateId};

/// Description written on audit nodes created by automatic matching.
pub const SYSTEM_MATCH: &str = "System Match";

/// Append the audit node for one pairwise merge.
///
/// The new node's parent pointers reference the most recent nodes of the
/// two parent States, when those States have lineage of their own.
pub async fn record_merge<T: RecordTxn>(
    txn: &mut T,
    record_type: RecordType,
    parent_state1: StateId,
    parent_state2: StateId,
    result: StateId,
    now: DateTime<Utc>,
) -> Result<AuditNode, EngineError> {
    let parent1 = txn
        .latest_audit_for_state(parent_state1)
        .await
        .map_err(EngineError::from_store)?
        .map(|n| n.id);
    let parent2 = txn
        .latest_audit_for_state(parent_state2)
        .await
        .map_err(EngineError::from_store)?
        .map(|n| n.id);

    let node = AuditNode::merge(
        record_type,
        parent1,
        parent2,
        parent_state1,
        parent_state2,
        result,
        SYSTEM_MATCH,
        now,
    );
    txn.put_audit(node.clone())
        .await
        .map_err(EngineError::from_store)?;
    Ok(node)
}

/// Full edit/merge history of a State, newest first.
///
/// Walks the lineage DAG from the State's most recent node through all
/// parent pointers. Shared ancestors appear once.
pub async fn history_for_state<T: RecordTxn>(
    txn: &mut T,
    state: StateId,
) -> Result<Vec<AuditNode>, EngineError> {
    let mut nodes: Vec<AuditNode> = Vec::new();
    let mut seen: BTreeSet<AuditId> = BTreeSet::new();
    let mut frontier: Vec<AuditId> = Vec::new();

    if let Some(latest) = txn
        .latest_audit_for_state(state)
        .await
        .map_err(EngineError::from_store)?
    {
        seen.insert(latest.id);
        frontier.extend(latest.parent1.into_iter().chain(latest.parent2));
        nodes.push(latest);
    }

    while let Some(id) = frontier.pop() {
        if !seen.insert(id) {
            continue;
        }
        if let Some(node) = txn
            .audit_node(id)
            .await
            .map_err(EngineError::from_store)?
        {
            frontier.extend(node.parent1.into_iter().chain(node.parent2));
            nodes.push(node);
        }
    }

    nodes.sort_by(|a, b| b.created.cmp(&a.created).then_with(|| b.id.cmp(&a.id)));
    Ok(nodes)
}
