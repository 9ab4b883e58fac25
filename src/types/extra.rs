//! Open extra-data map carried by every State.
//!
//! Import files routinely contain columns the typed schema does not know
//! about. Those land here as an ordered string-keyed map so that two
//! States can be merged field-by-field with the same precedence rules as
//! the typed fields.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Which side of a pairwise merge wins when both sides hold a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergePriority {
    /// The incoming (newer) record's non-null value wins.
    FavorNew,
    /// The existing (older) record's non-null value is kept.
    FavorExisting,
}

impl Default for MergePriority {
    fn default() -> Self {
        Self::FavorNew
    }
}

/// Ordered string-keyed map of untyped columns.
///
/// Backed by a `BTreeMap` so iteration and serialization order are
/// deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtraData(BTreeMap<String, Value>);

impl ExtraData {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value under a key.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    /// Look up a value by key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Merge `existing` and `incoming` into a new map.
    ///
    /// Starts from `existing`. For every key in `incoming` with a non-null
    /// value, the priority decides: `FavorNew` overwrites, `FavorExisting`
    /// only fills keys that are absent or null on the existing side. Keys
    /// present only on one side are always carried over.
    pub fn merged(existing: &Self, incoming: &Self, priority: MergePriority) -> Self {
        let mut out = existing.0.clone();
        for (key, value) in &incoming.0 {
            if value.is_null() {
                out.entry(key.clone()).or_insert(Value::Null);
                continue;
            }
            match priority {
                MergePriority::FavorNew => {
                    out.insert(key.clone(), value.clone());
                }
                MergePriority::FavorExisting => {
                    let keep_existing =
                        existing.0.get(key).map(|v| !v.is_null()).unwrap_or(false);
                    if !keep_existing {
                        out.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        Self(out)
    }
}

impl FromIterator<(String, Value)> for ExtraData {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(pairs: &[(&str, Value)]) -> ExtraData {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_merged_favor_new_overwrites() {
        let a = map(&[("energy_score", json!(10)), ("owner", json!("alpha"))]);
        let b = map(&[("energy_score", json!(25))]);

        let merged = ExtraData::merged(&a, &b, MergePriority::FavorNew);
        assert_eq!(merged.get("energy_score"), Some(&json!(25)));
        assert_eq!(merged.get("owner"), Some(&json!("alpha")));
    }

    #[test]
    fn test_merged_favor_existing_keeps_non_null() {
        let a = map(&[("energy_score", json!(10))]);
        let b = map(&[("energy_score", json!(25)), ("owner", json!("beta"))]);

        let merged = ExtraData::merged(&a, &b, MergePriority::FavorExisting);
        assert_eq!(merged.get("energy_score"), Some(&json!(10)));
        // Absent on the existing side, so the incoming value fills it.
        assert_eq!(merged.get("owner"), Some(&json!("beta")));
    }

    #[test]
    fn test_merged_null_never_clobbers() {
        let a = map(&[("owner", json!("alpha"))]);
        let b = map(&[("owner", Value::Null)]);

        let merged = ExtraData::merged(&a, &b, MergePriority::FavorNew);
        assert_eq!(merged.get("owner"), Some(&json!("alpha")));
    }

    #[test]
    fn test_merged_deterministic_order() {
        let a = map(&[("b", json!(1)), ("a", json!(2))]);
        let b = map(&[("c", json!(3))]);
        let merged = ExtraData::merged(&a, &b, MergePriority::FavorNew);
        let keys: Vec<_> = merged.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }
}
