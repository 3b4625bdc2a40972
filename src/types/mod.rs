//! Shared types for Hivemind
//!
//! The `Group` enum is the typed replacement for the legacy integer group
//! numbers; the integers are kept on the wire for storage compatibility.

mod error;

pub use error::{HivemindError, Result};

use serde::{Deserialize, Serialize};

/// Layer assignment of a participant in the prediction network.
///
/// Stored as the legacy integers: -1 unassigned, 1 Group One, 2 Group Two,
/// -2 final node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum Group {
    /// Joined but not yet placed in a layer
    Unassigned,
    /// First (input) layer
    GroupOne,
    /// Second (hidden) layer
    GroupTwo,
    /// The single output node
    FinalNode,
}

impl Default for Group {
    fn default() -> Self {
        Self::Unassigned
    }
}

impl From<Group> for i32 {
    fn from(group: Group) -> i32 {
        match group {
            Group::Unassigned => -1,
            Group::GroupOne => 1,
            Group::GroupTwo => 2,
            Group::FinalNode => -2,
        }
    }
}

impl TryFrom<i32> for Group {
    type Error = String;

    fn try_from(value: i32) -> std::result::Result<Self, Self::Error> {
        match value {
            -1 => Ok(Group::Unassigned),
            1 => Ok(Group::GroupOne),
            2 => Ok(Group::GroupTwo),
            -2 => Ok(Group::FinalNode),
            other => Err(format!("unknown group number: {}", other)),
        }
    }
}

impl Group {
    /// Whether participants in this group submit predictions during a round
    pub fn is_predicting(&self) -> bool {
        matches!(self, Group::GroupOne | Group::GroupTwo)
    }
}

impl std::fmt::Display for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Group::Unassigned => write!(f, "unassigned"),
            Group::GroupOne => write!(f, "group-1"),
            Group::GroupTwo => write!(f, "group-2"),
            Group::FinalNode => write!(f, "final-node"),
        }
    }
}

/// Validate a submitted prediction value.
///
/// Predictions are signed binary: -1 or +1, nothing else.
pub fn validate_prediction(value: i32) -> Result<()> {
    if value == 1 || value == -1 {
        Ok(())
    } else {
        Err(HivemindError::Validation(format!(
            "prediction must be -1 or +1, got {}",
            value
        )))
    }
}
