//! Typed ID wrappers for compile-time type safety.
//!
//! These types wrap UUIDs to prevent accidental mixing of tenant, session and
//! family identifiers. Parsing only accepts the canonical hyphenated shape
//! (`8-4-4-4-12` hex digits); braced, URN and simple forms are rejected so a
//! tenant identifier has exactly one textual representation.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Raised when a string is not a canonical UUID-shaped identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed identifier")]
pub struct InvalidId;

/// Parses a canonical hyphenated UUID (case-insensitive hex).
pub fn parse_canonical_uuid(raw: &str) -> Result<Uuid, InvalidId> {
    let bytes = raw.as_bytes();
    if bytes.len() != 36 {
        return Err(InvalidId);
    }
    let shaped = bytes.iter().enumerate().all(|(idx, b)| match idx {
        8 | 13 | 18 | 23 => *b == b'-',
        _ => b.is_ascii_hexdigit(),
    });
    if !shaped {
        return Err(InvalidId);
    }
    Uuid::parse_str(raw).map_err(|_| InvalidId)
}

/// Macro to generate typed ID wrappers with common trait implementations.
macro_rules! typed_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, sqlx::Type)]
        #[sqlx(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random ID.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an ID from an existing UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the inner UUID.
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// Parses a canonical UUID-shaped string.
            pub fn parse(raw: &str) -> Result<Self, InvalidId> {
                parse_canonical_uuid(raw).map(Self)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = InvalidId;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0.to_string()
            }
        }

        impl Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                serializer.serialize_str(&self.0.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Self::parse(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

typed_id!(WorkspaceId, "Unique identifier for a workspace (tenant).");
typed_id!(SessionId, "Unique identifier for an embedded session.");
typed_id!(
    FamilyId,
    "Identifier shared by every refresh credential descended from one issuance."
);
typed_id!(AuditEventId, "Unique identifier for an audit event.");
typed_id!(WriteKeyId, "Unique identifier for a workspace write key.");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_uuid_round_trips_through_display() {
        let id = WorkspaceId::new();
        let parsed = WorkspaceId::parse(&id.to_string()).expect("parse canonical");
        assert_eq!(parsed, id);
    }

    #[test]
    fn uppercase_hex_is_accepted() {
        let parsed = WorkspaceId::parse("6F9619FF-8B86-D011-B42D-00C04FC964FF");
        assert!(parsed.is_ok());
    }

    #[test]
    fn non_canonical_forms_are_rejected() {
        for raw in [
            "",
            "not-a-uuid",
            "6f9619ff8b86d011b42d00c04fc964ff",
            "{6f9619ff-8b86-d011-b42d-00c04fc964ff}",
            "urn:uuid:6f9619ff-8b86-d011-b42d-00c04fc964ff",
            "6f9619ff-8b86-d011-b42d-00c04fc964fg",
            "6f9619ff-8b86-d011-b42d-00c04fc964f",
            " 6f9619ff-8b86-d011-b42d-00c04fc964ff",
            "6f9619ff_8b86_d011_b42d_00c04fc964ff",
        ] {
            assert_eq!(WorkspaceId::parse(raw), Err(InvalidId), "accepted {raw:?}");
        }
    }

    #[test]
    fn deserialize_rejects_malformed_ids() {
        let err = serde_json::from_str::<SessionId>("\"W2\"");
        assert!(err.is_err());
        let ok: SessionId =
            serde_json::from_str("\"6f9619ff-8b86-d011-b42d-00c04fc964ff\"").expect("valid");
        assert_eq!(ok.to_string(), "6f9619ff-8b86-d011-b42d-00c04fc964ff");
    }
}
