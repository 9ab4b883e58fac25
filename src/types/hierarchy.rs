//! Access-level hierarchy placements and the isolation guard.
//!
//! Every canonical record sits at one access-level instance (ALI) inside
//! its organization's hierarchy tree. Records at incompatible placements
//! must never share a canonical identity; the guard here is consulted by
//! both merge stages before any grouping decision is committed.

use serde::{Deserialize, Serialize};

use super::ids::{AliId, OrgId};

/// One node of an organization's access-level hierarchy.
///
/// Placement is a materialized path from the root, e.g.
/// `["root", "east-region", "site-4"]`. Ancestry is path-prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessLevelInstance {
    /// Unique id.
    pub id: AliId,
    /// Owning organization.
    pub organization: OrgId,
    /// Path from the hierarchy root, root first.
    pub path: Vec<String>,
}

impl AccessLevelInstance {
    /// Create a placement from its path.
    pub fn new(organization: OrgId, path: Vec<String>) -> Self {
        Self {
            id: AliId::generate(),
            organization,
            path,
        }
    }

    /// Depth below the root (a bare root path has depth 0).
    pub fn depth(&self) -> usize {
        self.path.len().saturating_sub(1)
    }

    /// Whether `self` is `other` or an ancestor of `other`.
    pub fn contains(&self, other: &AccessLevelInstance) -> bool {
        self.organization == other.organization
            && other.path.len() >= self.path.len()
            && other.path[..self.path.len()] == self.path[..]
    }
}

/// How strictly placements must agree before records may merge or link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HierarchyPolicy {
    /// All placements must be the same ALI.
    ExactMatch,
    /// Placements may differ if they lie on one root-to-leaf chain;
    /// the surviving record is placed at the deepest one.
    AllowLineage,
}

impl Default for HierarchyPolicy {
    fn default() -> Self {
        Self::ExactMatch
    }
}

/// Details of a rejected grouping, carried inside the engine error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyConflictInfo {
    /// The incompatible placement paths, in encounter order.
    pub placements: Vec<Vec<String>>,
}

impl std::fmt::Display for HierarchyConflictInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let joined: Vec<String> = self.placements.iter().map(|p| p.join("/")).collect();
        write!(f, "[{}]", joined.join(", "))
    }
}

/// Check that a set of placements may share one canonical identity.
///
/// Returns the placement the merged/linked record should take: under
/// `ExactMatch` the (single) shared placement, under `AllowLineage` the
/// deepest placement on the chain.
pub fn resolve_placement<'a>(
    policy: HierarchyPolicy,
    placements: &[&'a AccessLevelInstance],
) -> Result<&'a AccessLevelInstance, HierarchyConflictInfo> {
    let (first, rest) = match placements.split_first() {
        Some(split) => split,
        None => {
            return Err(HierarchyConflictInfo {
                placements: Vec::new(),
            })
        }
    };

    match policy {
        HierarchyPolicy::ExactMatch => {
            if rest.iter().all(|p| p.id == first.id) {
                Ok(first)
            } else {
                Err(conflict(placements))
            }
        }
        HierarchyPolicy::AllowLineage => {
            let mut deepest = *first;
            for p in rest {
                if deepest.contains(p) {
                    deepest = p;
                } else if !p.contains(deepest) {
                    return Err(conflict(placements));
                }
            }
            Ok(deepest)
        }
    }
}

fn conflict(placements: &[&AccessLevelInstance]) -> HierarchyConflictInfo {
    HierarchyConflictInfo {
        placements: placements.iter().map(|p| p.path.clone()).collect(),
    }
}
