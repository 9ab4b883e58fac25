//! Matching-criteria resolution.
//!
//! Which fields define identity is configured per organization and per
//! entity type as an ordered list of column names. This module resolves
//! those names against a static registry of typed field accessors —
//! resolution happens once per merge/link round and the resolved set is
//! reused for every State in the round. Changing the configuration
//! mid-round is forbidden by contract.
//!
//! The raw `address_line_1` column is never matched directly: it is
//! substituted by `normalized_address` so that formatting differences in
//! source files do not defeat matching.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{OrgId, RecordType, StateRecord};

/// A typed field value extracted from a State.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// Text column.
    Text(String),
    /// Floating-point column.
    Number(f64),
    /// Integer column.
    Integer(i64),
}

/// Quantization factor applied to floats before canonical encoding, so
/// equal-up-to-noise measurements produce identical matching tuples.
const FLOAT_QUANTIZATION_FACTOR: f64 = 1_000_000.0;

impl FieldValue {
    /// Whether the value is blank (empty or whitespace-only text).
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Text(s) => s.trim().is_empty(),
            Self::Number(_) | Self::Integer(_) => false,
        }
    }

    /// Canonical encoding used for matching-tuple equality and hashing.
    ///
    /// Floats are quantized to integers to avoid representation noise.
    pub fn canonical(&self) -> String {
        match self {
            Self::Text(s) => s.trim().to_string(),
            Self::Number(n) => {
                let quantized = (n * FLOAT_QUANTIZATION_FACTOR).round() as i64;
                format!("n:{quantized}")
            }
            Self::Integer(i) => format!("i:{i}"),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "{s}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Integer(i) => write!(f, "{i}"),
        }
    }
}

/// Which entity types a column exists for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applicability {
    /// Both Property and TaxLot.
    Both,
    /// Property States only.
    PropertyOnly,
    /// TaxLot States only.
    TaxLotOnly,
}

impl Applicability {
    fn allows(self, record_type: RecordType) -> bool {
        match self {
            Self::Both => true,
            Self::PropertyOnly => record_type == RecordType::Property,
            Self::TaxLotOnly => record_type == RecordType::TaxLot,
        }
    }
}

/// Typed get/set pair for one column, resolved once per run.
///
/// This replaces string-keyed dynamic field dispatch: every column name
/// resolves to a pair of plain function pointers over `StateRecord`.
pub struct FieldAccessor {
    /// Column name as configured.
    pub name: &'static str,
    /// Entity types the column exists for.
    pub applies_to: Applicability,
    get: fn(&StateRecord) -> Option<FieldValue>,
    set: fn(&mut StateRecord, Option<FieldValue>),
}

impl FieldAccessor {
    /// Extract the column value from a State.
    pub fn get(&self, state: &StateRecord) -> Option<FieldValue> {
        (self.get)(state)
    }

    /// Write the column value onto a State.
    pub fn set(&self, state: &mut StateRecord, value: Option<FieldValue>) {
        (self.set)(state, value)
    }
}

impl fmt::Debug for FieldAccessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldAccessor")
            .field("name", &self.name)
            .finish()
    }
}

fn text(value: &Option<String>) -> Option<FieldValue> {
    value.as_ref().map(|s| FieldValue::Text(s.clone()))
}

fn set_text(slot: &mut Option<String>, value: Option<FieldValue>) {
    *slot = match value {
        Some(FieldValue::Text(s)) => Some(s),
        Some(other) => Some(other.to_string()),
        None => None,
    };
}

/// Every typed column the merge engine knows how to read and write.
///
/// Merging iterates this whole registry; matching uses the configured
/// subset.
pub static FIELD_REGISTRY: &[FieldAccessor] = &[
    FieldAccessor {
        name: "pm_property_id",
        applies_to: Applicability::PropertyOnly,
        get: |s| text(&s.pm_property_id),
        set: |s, v| set_text(&mut s.pm_property_id, v),
    },
    FieldAccessor {
        name: "jurisdiction_tax_lot_id",
        applies_to: Applicability::TaxLotOnly,
        get: |s| text(&s.jurisdiction_tax_lot_id),
        set: |s, v| set_text(&mut s.jurisdiction_tax_lot_id, v),
    },
    FieldAccessor {
        name: "custom_id_1",
        applies_to: Applicability::Both,
        get: |s| text(&s.custom_id_1),
        set: |s, v| set_text(&mut s.custom_id_1, v),
    },
    FieldAccessor {
        name: "ubid",
        applies_to: Applicability::Both,
        get: |s| text(&s.ubid),
        set: |s, v| set_text(&mut s.ubid, v),
    },
    FieldAccessor {
        name: "address_line_1",
        applies_to: Applicability::Both,
        get: |s| text(&s.address_line_1),
        set: |s, v| set_text(&mut s.address_line_1, v),
    },
    FieldAccessor {
        name: "address_line_2",
        applies_to: Applicability::Both,
        get: |s| text(&s.address_line_2),
        set: |s, v| set_text(&mut s.address_line_2, v),
    },
    FieldAccessor {
        name: "normalized_address",
        applies_to: Applicability::Both,
        get: |s| text(&s.normalized_address),
        set: |s, v| set_text(&mut s.normalized_address, v),
    },
    FieldAccessor {
        name: "city",
        applies_to: Applicability::Both,
        get: |s| text(&s.city),
        set: |s, v| set_text(&mut s.city, v),
    },
    FieldAccessor {
        name: "state",
        applies_to: Applicability::Both,
        get: |s| text(&s.state),
        set: |s, v| set_text(&mut s.state, v),
    },
    FieldAccessor {
        name: "postal_code",
        applies_to: Applicability::Both,
        get: |s| text(&s.postal_code),
        set: |s, v| set_text(&mut s.postal_code, v),
    },
    FieldAccessor {
        name: "gross_floor_area",
        applies_to: Applicability::PropertyOnly,
        get: |s| s.gross_floor_area.map(FieldValue::Number),
        set: |s, v| {
            s.gross_floor_area = match v {
                Some(FieldValue::Number(n)) => Some(n),
                Some(FieldValue::Integer(i)) => Some(i as f64),
                _ => None,
            }
        },
    },
    FieldAccessor {
        name: "year_built",
        applies_to: Applicability::PropertyOnly,
        get: |s| s.year_built.map(|y| FieldValue::Integer(y as i64)),
        set: |s, v| {
            s.year_built = match v {
                Some(FieldValue::Integer(i)) => Some(i as i32),
                Some(FieldValue::Number(n)) => Some(n as i32),
                _ => None,
            }
        },
    },
];

/// Look up an accessor by column name.
pub fn accessor(name: &str) -> Option<&'static FieldAccessor> {
    FIELD_REGISTRY.iter().find(|a| a.name == name)
}

/// Accessors applicable to one entity type, in registry order.
pub fn accessors_for(record_type: RecordType) -> impl Iterator<Item = &'static FieldAccessor> {
    FIELD_REGISTRY
        .iter()
        .filter(move |a| a.applies_to.allows(record_type))
}

/// Default matching columns when an organization has not configured any.
pub fn default_columns(record_type: RecordType) -> &'static [&'static str] {
    match record_type {
        RecordType::Property => &["ubid", "pm_property_id", "custom_id_1", "address_line_1"],
        RecordType::TaxLot => &[
            "ubid",
            "jurisdiction_tax_lot_id",
            "custom_id_1",
            "address_line_1",
        ],
    }
}

/// Error resolving a matching-criteria configuration.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CriteriaError {
    /// Configured column does not exist in the typed registry.
    #[error("Unknown matching column: {0}")]
    UnknownColumn(String),
    /// Configured column exists but not for this entity type.
    #[error("Column {column} does not apply to {record_type} records")]
    Inapplicable {
        /// The offending column name.
        column: String,
        /// The entity type the configuration was resolved for.
        record_type: RecordType,
    },
    /// Configuration resolved to an empty column set.
    #[error("Matching-criteria configuration for {0} resolved to no columns")]
    Empty(RecordType),
}

/// Resolved matching criteria for one (organization, entity type) round.
#[derive(Debug)]
pub struct MatchingCriteria {
    /// Organization the criteria belong to.
    pub organization: OrgId,
    /// Entity type the criteria apply to.
    pub record_type: RecordType,
    /// Resolved accessors, configuration order preserved,
    /// `address_line_1` substituted by `normalized_address`.
    pub columns: Vec<&'static FieldAccessor>,
}

impl MatchingCriteria {
    /// Resolve a column-name configuration into typed accessors.
    ///
    /// `configured` is the organization's current column list, or `None`
    /// to use the per-type defaults (a preview run may pass a proposed
    /// list instead). Fails before any mutation if a name is unknown or
    /// inapplicable to the entity type.
    pub fn resolve(
        organization: OrgId,
        record_type: RecordType,
        configured: Option<&[String]>,
    ) -> Result<Self, CriteriaError> {
        let names: Vec<String> = match configured {
            Some(names) => names.to_vec(),
            None => default_columns(record_type)
                .iter()
                .map(|s| s.to_string())
                .collect(),
        };

        let mut columns: Vec<&'static FieldAccessor> = Vec::with_capacity(names.len());
        for name in &names {
            // Raw address matching is always routed through the
            // normalized derivative.
            let effective = if name == "address_line_1" {
                "normalized_address"
            } else {
                name.as_str()
            };
            let acc =
                accessor(effective).ok_or_else(|| CriteriaError::UnknownColumn(name.clone()))?;
            if !acc.applies_to.allows(record_type) {
                return Err(CriteriaError::Inapplicable {
                    column: name.clone(),
                    record_type,
                });
            }
            if !columns.iter().any(|c| c.name == acc.name) {
                columns.push(acc);
            }
        }

        if columns.is_empty() {
            return Err(CriteriaError::Empty(record_type));
        }

        Ok(Self {
            organization,
            record_type,
            columns,
        })
    }

    /// Column names in resolved order.
    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns.iter().map(|c| c.name).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn org() -> OrgId {
        OrgId::generate()
    }

    #[test]
    fn test_default_property_criteria_substitutes_address() {
        let criteria = MatchingCriteria::resolve(org(), RecordType::Property, None).unwrap();
        let names = criteria.column_names();
        assert!(names.contains(&"normalized_address"));
        assert!(!names.contains(&"address_line_1"));
    }

    #[test]
    fn test_unknown_column_rejected() {
        let configured = vec!["pm_property_id".to_string(), "lot_depth".to_string()];
        let err = MatchingCriteria::resolve(org(), RecordType::Property, Some(&configured))
            .unwrap_err();
        assert!(matches!(err, CriteriaError::UnknownColumn(c) if c == "lot_depth"));
    }

    #[test]
    fn test_inapplicable_column_rejected() {
        let configured = vec!["jurisdiction_tax_lot_id".to_string()];
        let err = MatchingCriteria::resolve(org(), RecordType::Property, Some(&configured))
            .unwrap_err();
        assert!(matches!(err, CriteriaError::Inapplicable { .. }));
    }

    #[test]
    fn test_duplicate_columns_collapse() {
        let configured = vec![
            "address_line_1".to_string(),
            "normalized_address".to_string(),
        ];
        let criteria =
            MatchingCriteria::resolve(org(), RecordType::TaxLot, Some(&configured)).unwrap();
        assert_eq!(criteria.column_names(), vec!["normalized_address"]);
    }

    #[test]
    fn test_accessor_roundtrip() {
        let acc = accessor("gross_floor_area").unwrap();
        let mut state = StateRecord::new(org(), RecordType::Property, Utc::now());
        acc.set(&mut state, Some(FieldValue::Number(12_500.0)));
        assert_eq!(state.gross_floor_area, Some(12_500.0));
        assert_eq!(acc.get(&state), Some(FieldValue::Number(12_500.0)));
    }

    #[test]
    fn test_float_canonical_quantized() {
        let a = FieldValue::Number(1.0000001);
        let b = FieldValue::Number(1.0000002);
        assert_eq!(a.canonical(), b.canonical());
    }
}
