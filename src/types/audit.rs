//! Audit lineage nodes.
//!
//! Every merge writes one node referencing its two parent States. The
//! nodes form a DAG: leaves are import/manual-edit creations (no
//! parents), internal nodes are merges. Nodes are append-only; unmerge
//! deletes the single node for the merge it reverses, never the parents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{AuditId, StateId};
use super::record::RecordType;

/// One node of the merge lineage DAG.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditNode {
    /// Unique id.
    pub id: AuditId,
    /// Entity type of the States involved.
    pub record_type: RecordType,
    /// Audit node of the first (lower-priority) parent, if it had one.
    pub parent1: Option<AuditId>,
    /// Audit node of the second (higher-priority) parent, if it had one.
    pub parent2: Option<AuditId>,
    /// First parent State folded into the result.
    pub parent_state1: Option<StateId>,
    /// Second parent State folded into the result.
    pub parent_state2: Option<StateId>,
    /// State this node describes (the merge result, or an organic State).
    pub state: StateId,
    /// Free-text description of the event.
    pub name: String,
    /// When the node was written.
    pub created: DateTime<Utc>,
}

impl AuditNode {
    /// Node for an organically-created State (import or manual edit).
    pub fn organic(
        record_type: RecordType,
        state: StateId,
        name: impl Into<String>,
        created: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AuditId::generate(),
            record_type,
            parent1: None,
            parent2: None,
            parent_state1: None,
            parent_state2: None,
            state,
            name: name.into(),
            created,
        }
    }

    /// Node for a two-parent merge.
    #[allow(clippy::too_many_arguments)]
    pub fn merge(
        record_type: RecordType,
        parent1: Option<AuditId>,
        parent2: Option<AuditId>,
        parent_state1: StateId,
        parent_state2: StateId,
        state: StateId,
        name: impl Into<String>,
        created: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AuditId::generate(),
            record_type,
            parent1,
            parent2,
            parent_state1: Some(parent_state1),
            parent_state2: Some(parent_state2),
            state,
            name: name.into(),
            created,
        }
    }

    /// Whether this node records a two-parent merge.
    pub fn is_merge(&self) -> bool {
        self.parent_state1.is_some() && self.parent_state2.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_organic_node_has_no_parents() {
        let node = AuditNode::organic(
            RecordType::Property,
            StateId::generate(),
            "Import Creation",
            Utc::now(),
        );
        assert!(!node.is_merge());
        assert!(node.parent1.is_none());
        assert!(node.parent_state2.is_none());
    }

    #[test]
    fn test_merge_node_is_merge() {
        let node = AuditNode::merge(
            RecordType::TaxLot,
            None,
            None,
            StateId::generate(),
            StateId::generate(),
            StateId::generate(),
            "System Match",
            Utc::now(),
        );
        assert!(node.is_merge());
    }
}
