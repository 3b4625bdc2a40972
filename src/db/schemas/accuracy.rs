//! Round accuracy document schema
//!
//! Append-only record of whether each round's final prediction matched
//! the ground truth. Read by the reporting surface only.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for round accuracy records
pub const ACCURACY_COLLECTION: &str = "round_accuracy";

/// Round accuracy document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct RoundAccuracyDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    /// Round this record belongs to
    pub round_number: i64,

    /// Whether the final prediction matched the ground truth
    pub correct: bool,
}

impl RoundAccuracyDoc {
    /// Record the outcome for a round
    pub fn new(round_number: i64, correct: bool) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            round_number,
            correct,
        }
    }
}

impl IntoIndexes for RoundAccuracyDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "round_number": 1 },
            Some(
                IndexOptions::builder()
                    .unique(true)
                    .name("round_number_unique".to_string())
                    .build(),
            ),
        )]
    }
}

impl MutMetadata for RoundAccuracyDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
