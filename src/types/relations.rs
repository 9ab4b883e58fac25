//! Subsidiary relationships carried across merges.
//!
//! Notes and label links hang off Views; metered-usage series hang off
//! canonical records; pairings connect a Property View to a TaxLot View.
//! The engine reassigns these on every merge, link and unmerge — they are
//! never silently dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{CanonicalId, LabelId, MeterId, NoteId, ViewId};

/// Free-text note attached to a View.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Unique id.
    pub id: NoteId,
    /// View the note is attached to.
    pub view: ViewId,
    /// Note body.
    pub text: String,
    /// When the note was written.
    pub created: DateTime<Utc>,
}

impl Note {
    /// Attach a new note to a View.
    pub fn new(view: ViewId, text: impl Into<String>, created: DateTime<Utc>) -> Self {
        Self {
            id: NoteId::generate(),
            view,
            text: text.into(),
            created,
        }
    }

    /// Copy of this note attached to another View.
    pub fn reattached(&self, view: ViewId) -> Self {
        Self {
            id: NoteId::generate(),
            view,
            text: self.text.clone(),
            created: self.created,
        }
    }
}

/// Status label applied to a View.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LabelLink {
    /// The label.
    pub label: LabelId,
    /// The View it is applied to.
    pub view: ViewId,
}

/// Pairing between a Property View and a TaxLot View.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Pairing {
    /// Property side.
    pub property_view: ViewId,
    /// TaxLot side.
    pub taxlot_view: ViewId,
}

/// One reading of a metered-usage series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeterReading {
    /// Reading interval start.
    pub start: DateTime<Utc>,
    /// Reading interval end.
    pub end: DateTime<Utc>,
    /// Usage amount for the interval.
    pub value: f64,
}

/// Metered-usage series owned by a canonical record.
///
/// Meters live on the canonical identity rather than a View so that
/// usage history survives per-Cycle re-imports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterSeries {
    /// Unique id.
    pub id: MeterId,
    /// Canonical record that owns the series.
    pub canonical: CanonicalId,
    /// Meter kind, e.g. "electricity" or "natural_gas".
    pub kind: String,
    /// Readings in interval order.
    pub readings: Vec<MeterReading>,
}

impl MeterSeries {
    /// Create an empty series on a canonical record.
    pub fn new(canonical: CanonicalId, kind: impl Into<String>) -> Self {
        Self {
            id: MeterId::generate(),
            canonical,
            kind: kind.into(),
            readings: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_reattached_keeps_text() {
        let original = Note::new(ViewId::generate(), "verified on site", Utc::now());
        let copy = original.reattached(ViewId::generate());
        assert_eq!(copy.text, original.text);
        assert_ne!(copy.id, original.id);
        assert_ne!(copy.view, original.view);
    }
}
