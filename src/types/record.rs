//! State, View and CanonicalRecord types.
//!
//! A `StateRecord` is an immutable-in-spirit snapshot of an asset's field
//! values from one ingestion or edit event. A `View` binds exactly one
//! State to one Cycle and one `CanonicalRecord`. The canonical record is
//! the durable identity that persists across Cycles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::extra::ExtraData;
use super::ids::{AliId, CanonicalId, CycleId, ImportFileId, OrgId, StateId, ViewId};

/// Entity type a State describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RecordType {
    /// A building / property record.
    Property,
    /// A tax-lot (parcel) record.
    TaxLot,
}

impl RecordType {
    /// Parse from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "property" => Some(Self::Property),
            "taxlot" | "tax_lot" => Some(Self::TaxLot),
            _ => None,
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Property => write!(f, "property"),
            Self::TaxLot => write!(f, "taxlot"),
        }
    }
}

/// Pipeline stage a State has reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataState {
    /// Raw rows straight from an import file.
    Import,
    /// Columns mapped onto the typed schema.
    Mapping,
    /// Eligible for match-merge-link.
    Matching,
}

impl DataState {
    /// Parse from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "import" => Some(Self::Import),
            "mapping" => Some(Self::Mapping),
            "matching" => Some(Self::Matching),
            _ => None,
        }
    }
}

impl Default for DataState {
    fn default() -> Self {
        Self::Import
    }
}

impl fmt::Display for DataState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Import => write!(f, "import"),
            Self::Mapping => write!(f, "mapping"),
            Self::Matching => write!(f, "matching"),
        }
    }
}

/// Merge lifecycle of a State.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MergeState {
    /// Lifecycle not yet determined.
    Unknown,
    /// Created organically by import or manual edit.
    New,
    /// Produced by folding two parent States together.
    Merged,
    /// Superseded and logically removed (kept for audit lineage).
    Deleted,
}

impl MergeState {
    /// Parse from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "unknown" => Some(Self::Unknown),
            "new" => Some(Self::New),
            "merged" => Some(Self::Merged),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }
}

impl Default for MergeState {
    fn default() -> Self {
        Self::Unknown
    }
}

impl fmt::Display for MergeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::New => write!(f, "new"),
            Self::Merged => write!(f, "merged"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

/// One fact snapshot of a Property or TaxLot.
///
/// All typed fields are optional: an import file rarely fills every
/// column. Columns outside the typed schema live in `extra_data`.
/// The merge engine never mutates a State in place; merging two States
/// produces a third.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    /// Unique id.
    pub id: StateId,
    /// Owning organization.
    pub organization: OrgId,
    /// Entity type this snapshot describes.
    pub record_type: RecordType,
    /// Import file that produced this State, if any.
    pub import_file: Option<ImportFileId>,
    /// Pipeline stage.
    pub data_state: DataState,
    /// Merge lifecycle.
    pub merge_state: MergeState,
    /// Portfolio Manager property id (Property only).
    pub pm_property_id: Option<String>,
    /// Jurisdiction tax-lot id (TaxLot only).
    pub jurisdiction_tax_lot_id: Option<String>,
    /// Organization-defined custom id.
    pub custom_id_1: Option<String>,
    /// Unique Building Identifier.
    pub ubid: Option<String>,
    /// Raw first address line.
    pub address_line_1: Option<String>,
    /// Raw second address line.
    pub address_line_2: Option<String>,
    /// Normalized form of `address_line_1`, used for matching.
    pub normalized_address: Option<String>,
    /// City.
    pub city: Option<String>,
    /// State / province.
    pub state: Option<String>,
    /// Postal code.
    pub postal_code: Option<String>,
    /// Gross floor area in square feet.
    pub gross_floor_area: Option<f64>,
    /// Year the building was built.
    pub year_built: Option<i32>,
    /// Columns outside the typed schema.
    pub extra_data: ExtraData,
    /// Last update timestamp; drives merge fold ordering.
    pub updated: DateTime<Utc>,
}

impl StateRecord {
    /// Create a blank State for an organization and entity type.
    ///
    /// All fields start empty, `data_state` = `Matching`,
    /// `merge_state` = `New`.
    pub fn new(organization: OrgId, record_type: RecordType, updated: DateTime<Utc>) -> Self {
        Self {
            id: StateId::generate(),
            organization,
            record_type,
            import_file: None,
            data_state: DataState::Matching,
            merge_state: MergeState::New,
            pm_property_id: None,
            jurisdiction_tax_lot_id: None,
            custom_id_1: None,
            ubid: None,
            address_line_1: None,
            address_line_2: None,
            normalized_address: None,
            city: None,
            state: None,
            postal_code: None,
            gross_floor_area: None,
            year_built: None,
            extra_data: ExtraData::new(),
            updated,
        }
    }
}

/// Binding of one State to one Cycle and one CanonicalRecord.
///
/// Within a single Cycle at most one View may reference a given canonical
/// record; the merge engine enforces this. Views are created and deleted
/// by merge/link operations, never mutated in place, except for the
/// canonical reassignment the link pass performs and unmerge repair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct View {
    /// Unique id.
    pub id: ViewId,
    /// Cycle this View belongs to.
    pub cycle: CycleId,
    /// Canonical identity this View is linked to.
    pub canonical: CanonicalId,
    /// State holding the field values.
    pub state: StateId,
}

impl View {
    /// Create a new View binding.
    pub fn new(cycle: CycleId, canonical: CanonicalId, state: StateId) -> Self {
        Self {
            id: ViewId::generate(),
            cycle,
            canonical,
            state,
        }
    }
}

/// Durable cross-Cycle identity of an asset.
///
/// Created fresh whenever a merge or a new cross-Cycle link needs a new
/// identity; garbage-collected once no View references it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    /// Unique id.
    pub id: CanonicalId,
    /// Owning organization.
    pub organization: OrgId,
    /// Entity type of every State linked beneath this identity.
    pub record_type: RecordType,
    /// Hierarchy placement.
    pub access_level_instance: AliId,
    /// Creation timestamp; orders meter migration during linking.
    pub created: DateTime<Utc>,
}

impl CanonicalRecord {
    /// Create a new canonical record.
    pub fn new(
        organization: OrgId,
        record_type: RecordType,
        access_level_instance: AliId,
        created: DateTime<Utc>,
    ) -> Self {
        Self {
            id: CanonicalId::generate(),
            organization,
            record_type,
            access_level_instance,
            created,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_type_parsing() {
        assert_eq!(RecordType::from_str("Property"), Some(RecordType::Property));
        assert_eq!(RecordType::from_str("tax_lot"), Some(RecordType::TaxLot));
        assert_eq!(RecordType::from_str("parcel"), None);
    }

    #[test]
    fn test_new_state_defaults() {
        let state = StateRecord::new(OrgId::generate(), RecordType::Property, Utc::now());
        assert_eq!(state.merge_state, MergeState::New);
        assert_eq!(state.data_state, DataState::Matching);
        assert!(state.pm_property_id.is_none());
        assert!(state.extra_data.is_empty());
    }

    #[test]
    fn test_view_binds_fresh_id() {
        let state = StateId::generate();
        let a = View::new(CycleId::generate(), CanonicalId::generate(), state);
        let b = View::new(a.cycle, a.canonical, state);
        assert_ne!(a.id, b.id);
    }
}
