//! Matching tuples: normalization, empty-criteria filtering, fingerprints.
//!
//! A State's matching tuple is the ordered values of its organization's
//! resolved matching columns. Tuples are compared by a canonical byte
//! encoding; an xxh64 fingerprint of that encoding identifies groups in
//! reports and previews.
//!
//! A tuple whose values are all absent is **empty**: the State is treated
//! as a unique, unmergeable singleton and never participates in automatic
//! merge/link grouping.

use lru::LruCache;
use parking_lot::Mutex;
use regex_lite::Regex;
use std::num::NonZeroUsize;
use std::sync::OnceLock;
use xxhash_rust::xxh64::xxh64;

use crate::criteria::{FieldValue, MatchingCriteria};
use crate::types::StateRecord;

/// Seed for matching-key fingerprints. Changing it invalidates any
/// persisted fingerprints.
const FINGERPRINT_SEED: u64 = 0x5eed_1de9;

fn non_word() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-z0-9#&/\- ]+").expect("static regex"))
}

fn whitespace() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("static regex"))
}

/// Street-suffix and directional abbreviations applied token-by-token.
const ABBREVIATIONS: &[(&str, &str)] = &[
    ("street", "st"),
    ("avenue", "ave"),
    ("boulevard", "blvd"),
    ("drive", "dr"),
    ("road", "rd"),
    ("lane", "ln"),
    ("court", "ct"),
    ("place", "pl"),
    ("square", "sq"),
    ("parkway", "pkwy"),
    ("highway", "hwy"),
    ("suite", "ste"),
    ("apartment", "apt"),
    ("building", "bldg"),
    ("floor", "fl"),
    ("north", "n"),
    ("south", "s"),
    ("east", "e"),
    ("west", "w"),
    ("northeast", "ne"),
    ("northwest", "nw"),
    ("southeast", "se"),
    ("southwest", "sw"),
];

/// Normalize a raw address line to its canonical matching form.
///
/// Lowercases, strips punctuation, collapses whitespace and abbreviates
/// common street suffixes and directionals, so that
/// `"100 Main Street"` and `"100 MAIN ST."` produce the same tuple value.
pub fn normalize_address(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    let stripped = non_word().replace_all(&lowered, " ");
    let collapsed = whitespace().replace_all(stripped.trim(), " ");

    collapsed
        .split(' ')
        .map(|token| {
            ABBREVIATIONS
                .iter()
                .find(|(long, _)| *long == token)
                .map(|(_, short)| *short)
                .unwrap_or(token)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Memoizing wrapper around [`normalize_address`].
///
/// Import batches repeat addresses heavily; the regex pass is worth
/// caching across one engine run.
pub struct AddressNormalizer {
    cache: Mutex<LruCache<String, String>>,
}

impl AddressNormalizer {
    /// Create a normalizer with the given cache capacity.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("max(1) is non-zero");
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Normalize, consulting the memo first.
    pub fn normalize(&self, raw: &str) -> String {
        let mut cache = self.cache.lock();
        if let Some(hit) = cache.get(raw) {
            return hit.clone();
        }
        let normalized = normalize_address(raw);
        cache.put(raw.to_string(), normalized.clone());
        normalized
    }
}

impl Default for AddressNormalizer {
    fn default() -> Self {
        Self::new(4096)
    }
}

/// The ordered values of a State's matching columns.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchingKey {
    values: Vec<Option<FieldValue>>,
}

impl MatchingKey {
    /// Compute the matching tuple for a State under resolved criteria.
    ///
    /// When the criteria include `normalized_address` and the State has
    /// none stored, the value is derived on the fly from
    /// `address_line_1` — the State itself is left untouched.
    pub fn for_state(
        criteria: &MatchingCriteria,
        state: &StateRecord,
        normalizer: &AddressNormalizer,
    ) -> Self {
        let values = criteria
            .columns
            .iter()
            .map(|acc| {
                let mut value = acc.get(state);
                if value.is_none() && acc.name == "normalized_address" {
                    value = state
                        .address_line_1
                        .as_deref()
                        .map(|raw| FieldValue::Text(normalizer.normalize(raw)));
                }
                value.filter(|v| !v.is_blank())
            })
            .collect();
        Self { values }
    }

    /// Whether every criteria field is absent or blank.
    pub fn is_empty(&self) -> bool {
        self.values.iter().all(|v| v.is_none())
    }

    /// Canonical byte encoding: values joined by a unit separator,
    /// absent values marked distinctly so `None` != empty text.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        for value in &self.values {
            match value {
                Some(v) => bytes.extend_from_slice(v.canonical().as_bytes()),
                None => bytes.push(0x00),
            }
            bytes.push(0x1f);
        }
        bytes
    }

    /// xxh64 fingerprint of the canonical encoding.
    pub fn fingerprint(&self) -> u64 {
        xxh64(&self.canonical_bytes(), FINGERPRINT_SEED)
    }

    /// Fingerprint as a 16-char hex string for reports.
    pub fn fingerprint_hex(&self) -> String {
        format!("{:016x}", self.fingerprint())
    }

    /// Display form of the tuple values for previews.
    pub fn display_values(&self) -> Vec<Option<String>> {
        self.values
            .iter()
            .map(|v| v.as_ref().map(|v| v.to_string()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OrgId, RecordType};
    use chrono::Utc;

    fn property_criteria() -> MatchingCriteria {
        MatchingCriteria::resolve(OrgId::generate(), RecordType::Property, None).unwrap()
    }

    fn state_with_pm(pm: &str) -> StateRecord {
        let mut state = StateRecord::new(OrgId::generate(), RecordType::Property, Utc::now());
        state.pm_property_id = Some(pm.to_string());
        state
    }

    #[test]
    fn test_normalize_address_case_and_suffix() {
        assert_eq!(normalize_address("100 Main Street"), "100 main st");
        assert_eq!(normalize_address("100 MAIN ST."), "100 main st");
        assert_eq!(
            normalize_address("  742   West ELM Avenue "),
            "742 w elm ave"
        );
    }

    #[test]
    fn test_normalizer_memo_consistent() {
        let normalizer = AddressNormalizer::new(8);
        let a = normalizer.normalize("1 First Boulevard");
        let b = normalizer.normalize("1 First Boulevard");
        assert_eq!(a, b);
        assert_eq!(a, "1 first blvd");
    }

    #[test]
    fn test_same_pm_id_same_key() {
        let criteria = property_criteria();
        let normalizer = AddressNormalizer::default();
        let k1 = MatchingKey::for_state(&criteria, &state_with_pm("A-100"), &normalizer);
        let k2 = MatchingKey::for_state(&criteria, &state_with_pm("A-100"), &normalizer);
        assert_eq!(k1.canonical_bytes(), k2.canonical_bytes());
        assert_eq!(k1.fingerprint(), k2.fingerprint());
    }

    #[test]
    fn test_different_values_different_key() {
        let criteria = property_criteria();
        let normalizer = AddressNormalizer::default();
        let k1 = MatchingKey::for_state(&criteria, &state_with_pm("A-100"), &normalizer);
        let k2 = MatchingKey::for_state(&criteria, &state_with_pm("B-200"), &normalizer);
        assert_ne!(k1.canonical_bytes(), k2.canonical_bytes());
    }

    #[test]
    fn test_blank_fields_are_empty_key() {
        let criteria = property_criteria();
        let normalizer = AddressNormalizer::default();
        let mut state = StateRecord::new(OrgId::generate(), RecordType::Property, Utc::now());
        state.custom_id_1 = Some("   ".to_string());
        let key = MatchingKey::for_state(&criteria, &state, &normalizer);
        assert!(key.is_empty());
    }

    #[test]
    fn test_address_derived_when_normalized_missing() {
        let criteria = property_criteria();
        let normalizer = AddressNormalizer::default();
        let mut a = StateRecord::new(OrgId::generate(), RecordType::Property, Utc::now());
        a.address_line_1 = Some("55 Oak Street".to_string());
        let mut b = StateRecord::new(OrgId::generate(), RecordType::Property, Utc::now());
        b.normalized_address = Some("55 oak st".to_string());

        let ka = MatchingKey::for_state(&criteria, &a, &normalizer);
        let kb = MatchingKey::for_state(&criteria, &b, &normalizer);
        assert_eq!(ka.canonical_bytes(), kb.canonical_bytes());
        // Deriving the key must not mutate the State.
        assert!(a.normalized_address.is_none());
    }

    #[test]
    fn test_none_differs_from_empty_text() {
        let key_none = MatchingKey {
            values: vec![None],
        };
        let key_text = MatchingKey {
            values: vec![Some(FieldValue::Text(String::new()))],
        };
        // Blank text is filtered at construction, but the raw encodings
        // must still be distinct.
        assert_ne!(key_none.canonical_bytes(), key_text.canonical_bytes());
    }
}
