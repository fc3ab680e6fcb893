//! Row identifiers.
//!
//! Every entity is keyed by the integer primary key the state store assigns.
//! Distinct newtypes keep a chunk id from being passed where a clip id is
//! expected.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Get the raw row id.
            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(v: i64) -> Self {
                Self(v)
            }
        }
    };
}

row_id!(
    /// Unique identifier for a project.
    ProjectId
);
row_id!(
    /// Unique identifier for a job.
    JobId
);
row_id!(
    /// Unique identifier for a text chunk.
    ChunkId
);
row_id!(
    /// Unique identifier for a rendered clip.
    ClipId
);
row_id!(
    /// Unique identifier for a synthesis queue entry.
    EntryId
);
row_id!(
    /// Unique identifier for an output video record.
    OutputVideoId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_serializes_transparently() {
        let id = ProjectId(42);
        assert_eq!(serde_json::to_string(&id).unwrap(), "42");
        assert_eq!(id.to_string(), "42");
        let back: ChunkId = serde_json::from_str("7").unwrap();
        assert_eq!(back, ChunkId(7));
    }
}
