//! The closed set of operations a request envelope can ask the responder to run.
//!
//! Operations mirror HTTP verb semantics without depending on HTTP. Variant
//! names serialize in `SCREAMING_CASE` to match the wire schema exactly.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Domain operation requested by the caller side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    /// List every entity.
    ReadAll,
    /// Fetch one entity by `entityId`.
    ReadOne,
    /// Create an entity from the payload fields.
    Create,
    /// Replace the fields of the entity identified by `entityId`.
    Update,
    /// Remove the entity identified by `entityId`.
    Delete,
}

impl Operation {
    /// All operations, in wire declaration order.
    pub const ALL: [Operation; 5] = [
        Operation::ReadAll,
        Operation::ReadOne,
        Operation::Create,
        Operation::Update,
        Operation::Delete,
    ];

    /// Wire name of the operation (e.g. `"READ_ONE"`).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::ReadAll => "READ_ALL",
            Operation::ReadOne => "READ_ONE",
            Operation::Create => "CREATE",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
        }
    }

    /// Whether the envelope must carry an `entityId` for this operation.
    #[must_use]
    pub fn requires_entity_id(self) -> bool {
        match self {
            Operation::ReadOne | Operation::Update | Operation::Delete => true,
            Operation::ReadAll | Operation::Create => false,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string names no known [`Operation`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown operation: {0}")]
pub struct UnknownOperation(pub String);

impl FromStr for Operation {
    type Err = UnknownOperation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| UnknownOperation(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_wire_name() {
        for op in Operation::ALL {
            assert_eq!(op.as_str().parse::<Operation>().unwrap(), op);
        }
    }

    #[test]
    fn rejects_unknown_and_lowercase_names() {
        assert_eq!(
            "PATCH".parse::<Operation>().unwrap_err(),
            UnknownOperation("PATCH".to_string())
        );
        assert!("read_all".parse::<Operation>().is_err());
    }

    #[test]
    fn serde_name_matches_as_str() {
        for op in Operation::ALL {
            let json = serde_json::to_string(&op).unwrap();
            assert_eq!(json, format!("\"{}\"", op.as_str()));
        }
    }

    #[test]
    fn entity_id_requirement() {
        assert!(!Operation::ReadAll.requires_entity_id());
        assert!(!Operation::Create.requires_entity_id());
        assert!(Operation::ReadOne.requires_entity_id());
        assert!(Operation::Update.requires_entity_id());
        assert!(Operation::Delete.requires_entity_id());
    }
}
