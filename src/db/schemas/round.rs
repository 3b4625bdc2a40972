//! Round document schema
//!
//! One document per round; the highest round_number is the authoritative
//! current round. Completed rounds are retained for audit history.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::types::Group;

/// Collection name for rounds
pub const ROUND_COLLECTION: &str = "rounds";

/// A single recorded prediction inside a round's per-group list
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PredictionEntry {
    /// Submitting participant id
    pub participant_id: String,
    /// Signed prediction, -1 or +1
    pub prediction: i32,
}

/// Round document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct RoundDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    /// Monotonic round number, starting at 1
    pub round_number: i64,

    /// Asset presented this round
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<String>,

    /// Content URL of the round's asset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_url: Option<String>,

    /// Group One predictions, in submission order
    #[serde(default)]
    pub group1_predictions: Vec<PredictionEntry>,

    /// Group Two predictions, in submission order
    #[serde(default)]
    pub group2_predictions: Vec<PredictionEntry>,

    /// Whether Group One's collection phase is closed
    #[serde(default)]
    pub group1_complete: bool,

    /// Whether Group Two's collection phase is closed
    #[serde(default)]
    pub group2_complete: bool,

    /// Final node output, null until computed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_prediction: Option<i32>,

    /// Whether the round has been finalized
    #[serde(default)]
    pub is_round_complete: bool,

    /// Whether the learning pass has been applied for this round
    #[serde(default)]
    pub is_weights_updated: bool,

    /// Global flag: the game is running
    #[serde(default)]
    pub game_started: bool,

    /// Global flag: the asset pool is exhausted and the game has ended
    #[serde(default)]
    pub game_over: bool,
}

impl RoundDoc {
    /// Create the document for a fresh round on the given asset
    pub fn new(round_number: i64, asset_id: String, asset_url: String) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            round_number,
            asset_id: Some(asset_id),
            asset_url: Some(asset_url),
            group1_predictions: Vec::new(),
            group2_predictions: Vec::new(),
            group1_complete: false,
            group2_complete: false,
            final_prediction: None,
            is_round_complete: false,
            is_weights_updated: false,
            game_started: true,
            game_over: false,
        }
    }

    /// The prediction list for a given group
    pub fn predictions(&self, group: Group) -> &[PredictionEntry] {
        match group {
            Group::GroupOne => &self.group1_predictions,
            Group::GroupTwo => &self.group2_predictions,
            _ => &[],
        }
    }

    /// Whether the given participant already submitted to the group's list
    pub fn has_submission(&self, group: Group, participant_id: &str) -> bool {
        self.predictions(group)
            .iter()
            .any(|entry| entry.participant_id == participant_id)
    }

    /// Whether the group's collection phase is closed
    pub fn phase_complete(&self, group: Group) -> bool {
        match group {
            Group::GroupOne => self.group1_complete,
            Group::GroupTwo => self.group2_complete,
            _ => false,
        }
    }
}

impl IntoIndexes for RoundDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Unique index on round_number; the current round is the max
            (
                doc! { "round_number": -1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("round_number_unique".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for RoundDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_submission() {
        let mut round = RoundDoc::new(1, "asset-1".into(), "http://assets/1".into());
        round.group1_predictions.push(PredictionEntry {
            participant_id: "p1".into(),
            prediction: 1,
        });

        assert!(round.has_submission(Group::GroupOne, "p1"));
        assert!(!round.has_submission(Group::GroupOne, "p2"));
        assert!(!round.has_submission(Group::GroupTwo, "p1"));
    }

    #[test]
    fn test_non_predicting_groups_have_no_list() {
        let round = RoundDoc::new(1, "asset-1".into(), "http://assets/1".into());
        assert!(round.predictions(Group::FinalNode).is_empty());
        assert!(round.predictions(Group::Unassigned).is_empty());
        assert!(!round.phase_complete(Group::FinalNode));
    }
}
