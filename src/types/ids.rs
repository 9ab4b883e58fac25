//! Identifier newtypes for the identity kernel.
//!
//! Every entity gets its own UUID-backed id type so that a `ViewId` can
//! never be passed where a `StateId` is expected. All ids implement `Ord`
//! for deterministic iteration and grouping order.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            /// Wrap an existing UUID.
            pub fn new(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Parse from a UUID string.
            pub fn from_str(s: &str) -> Result<Self, uuid::Error> {
                Ok(Self(Uuid::parse_str(s)?))
            }

            /// Generate a fresh random id.
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            /// Get the inner UUID.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

uuid_id! {
    /// Identifier of an organization (tenant).
    OrgId
}

uuid_id! {
    /// Identifier of a reporting Cycle.
    CycleId
}

uuid_id! {
    /// Identifier of a State record (one ingestion/edit snapshot).
    StateId
}

uuid_id! {
    /// Identifier of a View (State x Cycle x CanonicalRecord binding).
    ViewId
}

uuid_id! {
    /// Identifier of a canonical cross-Cycle record.
    CanonicalId
}

uuid_id! {
    /// Identifier of an access-level instance (hierarchy placement).
    AliId
}

uuid_id! {
    /// Identifier of an audit lineage node.
    AuditId
}

uuid_id! {
    /// Identifier of an uploaded import file.
    ImportFileId
}

uuid_id! {
    /// Identifier of a status label.
    LabelId
}

uuid_id! {
    /// Identifier of a note attached to a View.
    NoteId
}

uuid_id! {
    /// Identifier of a metered-usage series.
    MeterId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_ordering() {
        let a = StateId::from_str("00000000-0000-0000-0000-000000000001").unwrap();
        let b = StateId::from_str("00000000-0000-0000-0000-000000000002").unwrap();
        assert!(a < b);
    }

    #[test]
    fn test_generate_unique() {
        assert_ne!(ViewId::generate(), ViewId::generate());
    }

    #[test]
    fn test_display_roundtrip() {
        let id = CanonicalId::generate();
        let parsed = CanonicalId::from_str(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }
}
