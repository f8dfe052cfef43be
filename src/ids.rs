//! Typed identifiers for every entity in the graph substrate.
//!
//! Each id wraps a plain string so the compiler catches mixing, say, a
//! `ClaimId` where a `ConceptId` is expected, while still serializing as
//! a bare string on the wire.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($name:ident, $prefix:expr) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Generate a new id with this entity's conventional prefix
            /// followed by 8 hex characters.
            pub fn generate() -> Self {
                let hex = Uuid::new_v4().simple().to_string();
                Self(format!("{}{}", $prefix, &hex[..8]))
            }

            pub fn from_string(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(GraphId, "G");
string_id!(BranchId, "B");
string_id!(ConceptId, "N");
string_id!(EdgeId, "E");
string_id!(ArtifactId, "ART");
string_id!(QuoteId, "Q");
string_id!(SourceDocumentId, "DOC");
string_id!(SourceChunkId, "CHUNK_");
string_id!(ClaimId, "CLAIM_");
string_id!(SnapshotId, "SNAP_");
string_id!(ChangeEventId, "CHG_");
string_id!(CommunityId, "COMM_");
string_id!(MergeCandidateId, "MERGE_");
string_id!(ContextualBranchId, "branch-");
string_id!(ClientEventId, "evt-");
string_id!(TenantId, "T");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_carry_conventional_prefix() {
        let id = ConceptId::generate();
        assert!(id.as_str().starts_with('N'));
        assert_eq!(id.as_str().len(), 1 + 8);
    }

    #[test]
    fn ids_roundtrip_through_serde() {
        let id = ClaimId::from_string("CLAIM_deadbeef");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"CLAIM_deadbeef\"");
        let back: ClaimId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
