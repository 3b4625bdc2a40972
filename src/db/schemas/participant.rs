//! Participant document schema
//!
//! A participant is a human or bot node in the prediction network.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::types::Group;

/// Collection name for participants
pub const PARTICIPANT_COLLECTION: &str = "participants";

/// Participant document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ParticipantDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    /// Stable participant identifier (UUID)
    pub participant_id: String,

    /// Layer assignment (stored as legacy group number)
    pub group: Group,

    /// Whether this participant is a bot
    #[serde(default)]
    pub is_bot: bool,

    /// Whether this participant has submitted in the current round
    #[serde(default)]
    pub has_submitted: bool,

    /// Display icon (unicode glyph)
    pub icon: String,

    /// Ordinal within Group One, used for layout; reshuffled on assignment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subgroup: Option<i32>,
}

impl ParticipantDoc {
    /// Create a new participant document
    pub fn new(participant_id: String, group: Group, is_bot: bool, icon: String) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            participant_id,
            group,
            is_bot,
            has_submitted: false,
            icon,
            subgroup: None,
        }
    }
}

impl IntoIndexes for ParticipantDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Unique index on participant_id
            (
                doc! { "participant_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("participant_id_unique".to_string())
                        .build(),
                ),
            ),
            // Index on group for membership queries
            (
                doc! { "group": 1 },
                Some(
                    IndexOptions::builder()
                        .name("group_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for ParticipantDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
