//! MongoDB game store
//!
//! Implements [`GameStore`] on top of the typed collection wrapper. Every
//! conditional operation carries its precondition in the update filter so
//! concurrent submitters, the game driver, and the topology timer can
//! race safely without read-then-write hazards.

use async_trait::async_trait;
use bson::{doc, DateTime};
use tracing::warn;

use crate::db::schemas::{
    AssetDoc, ConnectionDoc, ParticipantDoc, PredictionEntry, RoundAccuracyDoc, RoundDoc,
    ACCURACY_COLLECTION, ASSET_COLLECTION, CONNECTION_COLLECTION, PARTICIPANT_COLLECTION,
    ROUND_COLLECTION,
};
use crate::db::{MongoClient, MongoCollection};
use crate::store::{AppendOutcome, GameStore};
use crate::types::{Group, HivemindError, Result};

/// MongoDB-backed implementation of [`GameStore`]
#[derive(Clone)]
pub struct MongoGameStore {
    rounds: MongoCollection<RoundDoc>,
    participants: MongoCollection<ParticipantDoc>,
    connections: MongoCollection<ConnectionDoc>,
    assets: MongoCollection<AssetDoc>,
    accuracy: MongoCollection<RoundAccuracyDoc>,
}

impl MongoGameStore {
    /// Create the store, opening all collections and applying indexes
    pub async fn new(client: &MongoClient) -> Result<Self> {
        Ok(Self {
            rounds: client.collection(ROUND_COLLECTION).await?,
            participants: client.collection(PARTICIPANT_COLLECTION).await?,
            connections: client.collection(CONNECTION_COLLECTION).await?,
            assets: client.collection(ASSET_COLLECTION).await?,
            accuracy: client.collection(ACCURACY_COLLECTION).await?,
        })
    }

    /// The per-group prediction list field, keyed by the group enum
    fn list_field(group: Group) -> Result<&'static str> {
        match group {
            Group::GroupOne => Ok("group1_predictions"),
            Group::GroupTwo => Ok("group2_predictions"),
            other => Err(HivemindError::Internal(format!(
                "group {} has no prediction list",
                other
            ))),
        }
    }
}

#[async_trait]
impl GameStore for MongoGameStore {
    async fn current_round(&self) -> Result<Option<RoundDoc>> {
        self.rounds.find_latest(doc! {}, "round_number").await
    }

    async fn round(&self, round_number: i64) -> Result<Option<RoundDoc>> {
        self.rounds.find_one(doc! { "round_number": round_number }).await
    }

    async fn insert_round(&self, round: RoundDoc) -> Result<()> {
        self.rounds.insert_one(round).await?;
        Ok(())
    }

    async fn append_prediction(
        &self,
        round_number: i64,
        group: Group,
        entry: PredictionEntry,
    ) -> Result<AppendOutcome> {
        // The stored current round is the max round_number; a submission
        // against any other number is stale.
        let current = self.current_round().await?;
        if current.as_ref().map(|r| r.round_number) != Some(round_number) {
            return Ok(AppendOutcome::RoundMismatch);
        }

        let field = Self::list_field(group)?;
        let member_key = format!("{}.participant_id", field);

        // One conditional $push carries the whole precondition: correct
        // round, open phase, participant not already present. Concurrent
        // submitters serialize on the document, so no entry is lost or
        // duplicated.
        let mut filter = doc! {
            "round_number": round_number,
            "is_round_complete": false,
            member_key: { "$ne": entry.participant_id.clone() },
        };
        if group == Group::GroupTwo {
            filter.insert("group1_complete", true);
            filter.insert("group2_complete", false);
        } else {
            filter.insert("group1_complete", false);
        }

        let update = doc! {
            "$push": { field: bson::to_bson(&entry)? },
            "$set": { "metadata.updated_at": DateTime::now() },
        };

        let result = self.rounds.update_one(filter, update).await?;
        if result.modified_count == 1 {
            return Ok(AppendOutcome::Appended);
        }

        // The guarded write missed; re-read once to classify the reason.
        match self.round(round_number).await? {
            None => Ok(AppendOutcome::RoundMismatch),
            Some(round) if round.has_submission(group, &entry.participant_id) => {
                Ok(AppendOutcome::Duplicate)
            }
            Some(_) => Ok(AppendOutcome::PhaseClosed),
        }
    }

    async fn mark_phase_complete(&self, round_number: i64, group: Group) -> Result<bool> {
        let filter = match group {
            Group::GroupOne => doc! {
                "round_number": round_number,
                "group1_complete": false,
            },
            Group::GroupTwo => doc! {
                "round_number": round_number,
                "group1_complete": true,
                "group2_complete": false,
            },
            other => {
                return Err(HivemindError::Internal(format!(
                    "group {} has no collection phase",
                    other
                )))
            }
        };

        let field = match group {
            Group::GroupOne => "group1_complete",
            _ => "group2_complete",
        };

        let update = doc! {
            "$set": { field: true, "metadata.updated_at": DateTime::now() },
        };

        let result = self.rounds.update_one(filter, update).await?;
        Ok(result.modified_count == 1)
    }

    async fn finalize_round(&self, round_number: i64, final_prediction: i32) -> Result<bool> {
        let filter = doc! {
            "round_number": round_number,
            "final_prediction": null,
            "is_round_complete": false,
        };
        let update = doc! {
            "$set": {
                "final_prediction": final_prediction,
                "is_round_complete": true,
                "is_weights_updated": false,
                "metadata.updated_at": DateTime::now(),
            }
        };

        let result = self.rounds.update_one(filter, update).await?;
        Ok(result.modified_count == 1)
    }

    async fn mark_weights_updated(&self, round_number: i64) -> Result<bool> {
        let filter = doc! {
            "round_number": round_number,
            "is_round_complete": true,
            "is_weights_updated": false,
        };
        let update = doc! {
            "$set": {
                "is_weights_updated": true,
                "metadata.updated_at": DateTime::now(),
            }
        };

        let result = self.rounds.update_one(filter, update).await?;
        Ok(result.modified_count == 1)
    }

    async fn mark_game_over(&self, round_number: i64) -> Result<bool> {
        let filter = doc! {
            "round_number": round_number,
            "game_over": false,
        };
        let update = doc! {
            "$set": {
                "game_over": true,
                "game_started": false,
                "metadata.updated_at": DateTime::now(),
            }
        };

        let result = self.rounds.update_one(filter, update).await?;
        Ok(result.modified_count == 1)
    }

    async fn delete_all_rounds(&self) -> Result<()> {
        self.rounds.delete_many(doc! {}).await?;
        Ok(())
    }

    async fn insert_participant(&self, participant: ParticipantDoc) -> Result<()> {
        self.participants.insert_one(participant).await?;
        Ok(())
    }

    async fn participant(&self, participant_id: &str) -> Result<Option<ParticipantDoc>> {
        self.participants
            .find_one(doc! { "participant_id": participant_id })
            .await
    }

    async fn participants_in_group(&self, group: Group) -> Result<Vec<ParticipantDoc>> {
        let mut members = self
            .participants
            .find_many(doc! { "group": i32::from(group) })
            .await?;
        members.sort_by(|a, b| a.participant_id.cmp(&b.participant_id));
        Ok(members)
    }

    async fn count_group(&self, group: Group) -> Result<u64> {
        self.participants
            .count(doc! { "group": i32::from(group) })
            .await
    }

    async fn set_group(&self, participant_id: &str, group: Group) -> Result<bool> {
        let result = self
            .participants
            .update_one(
                doc! { "participant_id": participant_id, "metadata.is_deleted": { "$ne": true } },
                doc! { "$set": {
                    "group": i32::from(group),
                    "metadata.updated_at": DateTime::now(),
                }},
            )
            .await?;
        Ok(result.matched_count == 1)
    }

    async fn set_subgroup(&self, participant_id: &str, subgroup: i32) -> Result<bool> {
        let result = self
            .participants
            .update_one(
                doc! { "participant_id": participant_id, "metadata.is_deleted": { "$ne": true } },
                doc! { "$set": {
                    "subgroup": subgroup,
                    "metadata.updated_at": DateTime::now(),
                }},
            )
            .await?;
        Ok(result.matched_count == 1)
    }

    async fn set_has_submitted(&self, participant_id: &str, submitted: bool) -> Result<bool> {
        let result = self
            .participants
            .update_one(
                doc! { "participant_id": participant_id, "metadata.is_deleted": { "$ne": true } },
                doc! { "$set": {
                    "has_submitted": submitted,
                    "metadata.updated_at": DateTime::now(),
                }},
            )
            .await?;
        Ok(result.matched_count == 1)
    }

    async fn reset_all_submissions(&self) -> Result<()> {
        self.participants
            .update_many(
                doc! { "metadata.is_deleted": { "$ne": true } },
                doc! { "$set": {
                    "has_submitted": false,
                    "metadata.updated_at": DateTime::now(),
                }},
            )
            .await?;
        Ok(())
    }

    async fn delete_participant(&self, participant_id: &str) -> Result<bool> {
        let result = self
            .participants
            .soft_delete(doc! { "participant_id": participant_id })
            .await?;
        Ok(result.modified_count == 1)
    }

    async fn delete_participants_except(&self, keep: Group) -> Result<u64> {
        let result = self
            .participants
            .soft_delete_many(doc! {
                "group": { "$ne": i32::from(keep) },
                "metadata.is_deleted": { "$ne": true },
            })
            .await?;
        Ok(result.modified_count)
    }

    async fn connections(&self) -> Result<Vec<ConnectionDoc>> {
        let mut edges = self.connections.find_many(doc! {}).await?;
        edges.sort_by(|a, b| a.connection_id.cmp(&b.connection_id));
        Ok(edges)
    }

    async fn connections_into(&self, target_id: &str) -> Result<Vec<ConnectionDoc>> {
        let mut edges = self
            .connections
            .find_many(doc! { "target_id": target_id })
            .await?;
        edges.sort_by(|a, b| a.connection_id.cmp(&b.connection_id));
        Ok(edges)
    }

    async fn insert_connections(&self, edges: Vec<ConnectionDoc>) -> Result<()> {
        for edge in edges {
            if let Err(e) = self.connections.insert_one(edge).await {
                // A concurrent reconcile may have inserted the same
                // (source, target) pair; the unique index makes the
                // duplicate harmless.
                warn!("Edge insert skipped: {}", e);
            }
        }
        Ok(())
    }

    async fn delete_connections(&self, connection_ids: &[String]) -> Result<u64> {
        if connection_ids.is_empty() {
            return Ok(0);
        }
        let result = self
            .connections
            .delete_many(doc! { "connection_id": { "$in": connection_ids.to_vec() } })
            .await?;
        Ok(result.deleted_count)
    }

    async fn delete_connections_of(&self, participant_id: &str) -> Result<u64> {
        let result = self
            .connections
            .delete_many(doc! {
                "$or": [
                    { "source_id": participant_id },
                    { "target_id": participant_id },
                ]
            })
            .await?;
        Ok(result.deleted_count)
    }

    async fn delete_all_connections(&self) -> Result<()> {
        self.connections.delete_many(doc! {}).await?;
        Ok(())
    }

    async fn cas_weight(
        &self,
        connection_id: &str,
        expected_version: i64,
        new_weight: f64,
        round_number: i64,
    ) -> Result<bool> {
        let filter = doc! {
            "connection_id": connection_id,
            "version": expected_version,
            "updated_round": { "$lt": round_number },
        };
        let update = doc! {
            "$set": {
                "weight": new_weight,
                "updated_round": round_number,
                "metadata.updated_at": DateTime::now(),
            },
            "$inc": { "version": 1 },
        };

        let result = self.connections.update_one(filter, update).await?;
        Ok(result.modified_count == 1)
    }

    async fn insert_asset(&self, asset: AssetDoc) -> Result<()> {
        self.assets.insert_one(asset).await?;
        Ok(())
    }

    async fn asset(&self, asset_id: &str) -> Result<Option<AssetDoc>> {
        self.assets.find_one(doc! { "asset_id": asset_id }).await
    }

    async fn claim_unused_asset(&self) -> Result<Option<AssetDoc>> {
        let claimed = self
            .assets
            .find_one_and_update(
                doc! { "used": false },
                doc! { "$set": {
                    "used": true,
                    "metadata.updated_at": DateTime::now(),
                }},
            )
            .await?;

        // find_one_and_update returns the pre-image; reflect the claim
        Ok(claimed.map(|mut asset| {
            asset.used = true;
            asset
        }))
    }

    async fn reset_assets(&self) -> Result<()> {
        self.assets
            .update_many(
                doc! { "metadata.is_deleted": { "$ne": true } },
                doc! { "$set": {
                    "used": false,
                    "metadata.updated_at": DateTime::now(),
                }},
            )
            .await?;
        Ok(())
    }

    async fn record_accuracy(&self, round_number: i64, correct: bool) -> Result<()> {
        self.accuracy
            .insert_one(RoundAccuracyDoc::new(round_number, correct))
            .await?;
        Ok(())
    }

    async fn accuracy_history(&self) -> Result<Vec<RoundAccuracyDoc>> {
        let mut history = self.accuracy.find_many(doc! {}).await?;
        history.sort_by_key(|a| a.round_number);
        Ok(history)
    }

    async fn delete_accuracy_history(&self) -> Result<()> {
        self.accuracy.delete_many(doc! {}).await?;
        Ok(())
    }
}
