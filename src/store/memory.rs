//! In-memory game store
//!
//! Backs dev mode and the test suite. Per-row atomicity mirrors the
//! MongoDB implementation: participants, connections, and assets live in
//! concurrent maps with per-entry locking, and the round list sits
//! behind a single async mutex so the conditional append/flip operations
//! are atomic read-modify-writes.

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::db::schemas::{
    AssetDoc, ConnectionDoc, ParticipantDoc, PredictionEntry, RoundAccuracyDoc, RoundDoc,
};
use crate::store::{AppendOutcome, GameStore};
use crate::types::{Group, Result};

/// In-memory implementation of [`GameStore`]
pub struct MemoryStore {
    rounds: Mutex<Vec<RoundDoc>>,
    participants: DashMap<String, ParticipantDoc>,
    connections: DashMap<String, ConnectionDoc>,
    assets: DashMap<String, AssetDoc>,
    accuracy: Mutex<Vec<RoundAccuracyDoc>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            rounds: Mutex::new(Vec::new()),
            participants: DashMap::new(),
            connections: DashMap::new(),
            assets: DashMap::new(),
            accuracy: Mutex::new(Vec::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GameStore for MemoryStore {
    async fn current_round(&self) -> Result<Option<RoundDoc>> {
        let rounds = self.rounds.lock().await;
        Ok(rounds.iter().max_by_key(|r| r.round_number).cloned())
    }

    async fn round(&self, round_number: i64) -> Result<Option<RoundDoc>> {
        let rounds = self.rounds.lock().await;
        Ok(rounds.iter().find(|r| r.round_number == round_number).cloned())
    }

    async fn insert_round(&self, round: RoundDoc) -> Result<()> {
        let mut rounds = self.rounds.lock().await;
        rounds.push(round);
        Ok(())
    }

    async fn append_prediction(
        &self,
        round_number: i64,
        group: Group,
        entry: PredictionEntry,
    ) -> Result<AppendOutcome> {
        let mut rounds = self.rounds.lock().await;

        let current_number = rounds.iter().map(|r| r.round_number).max();
        if current_number != Some(round_number) {
            return Ok(AppendOutcome::RoundMismatch);
        }

        let round = match rounds.iter_mut().find(|r| r.round_number == round_number) {
            Some(r) => r,
            None => return Ok(AppendOutcome::RoundMismatch),
        };

        if round.is_round_complete || round.phase_complete(group) {
            return Ok(AppendOutcome::PhaseClosed);
        }
        // Strict two-phase ordering: Group Two only opens once Group One
        // is marked complete.
        if group == Group::GroupTwo && !round.group1_complete {
            return Ok(AppendOutcome::PhaseClosed);
        }
        if round.has_submission(group, &entry.participant_id) {
            return Ok(AppendOutcome::Duplicate);
        }

        match group {
            Group::GroupOne => round.group1_predictions.push(entry),
            Group::GroupTwo => round.group2_predictions.push(entry),
            _ => return Ok(AppendOutcome::PhaseClosed),
        }

        Ok(AppendOutcome::Appended)
    }

    async fn mark_phase_complete(&self, round_number: i64, group: Group) -> Result<bool> {
        let mut rounds = self.rounds.lock().await;
        let round = match rounds.iter_mut().find(|r| r.round_number == round_number) {
            Some(r) => r,
            None => return Ok(false),
        };

        match group {
            Group::GroupOne if !round.group1_complete => {
                round.group1_complete = true;
                Ok(true)
            }
            Group::GroupTwo if round.group1_complete && !round.group2_complete => {
                round.group2_complete = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn finalize_round(&self, round_number: i64, final_prediction: i32) -> Result<bool> {
        let mut rounds = self.rounds.lock().await;
        let round = match rounds.iter_mut().find(|r| r.round_number == round_number) {
            Some(r) => r,
            None => return Ok(false),
        };

        if round.final_prediction.is_some() || round.is_round_complete {
            return Ok(false);
        }

        round.final_prediction = Some(final_prediction);
        round.is_round_complete = true;
        round.is_weights_updated = false;
        Ok(true)
    }

    async fn mark_weights_updated(&self, round_number: i64) -> Result<bool> {
        let mut rounds = self.rounds.lock().await;
        let round = match rounds.iter_mut().find(|r| r.round_number == round_number) {
            Some(r) => r,
            None => return Ok(false),
        };

        if !round.is_round_complete || round.is_weights_updated {
            return Ok(false);
        }

        round.is_weights_updated = true;
        Ok(true)
    }

    async fn mark_game_over(&self, round_number: i64) -> Result<bool> {
        let mut rounds = self.rounds.lock().await;
        let round = match rounds.iter_mut().find(|r| r.round_number == round_number) {
            Some(r) => r,
            None => return Ok(false),
        };

        if round.game_over {
            return Ok(false);
        }

        round.game_over = true;
        round.game_started = false;
        Ok(true)
    }

    async fn delete_all_rounds(&self) -> Result<()> {
        self.rounds.lock().await.clear();
        Ok(())
    }

    async fn insert_participant(&self, participant: ParticipantDoc) -> Result<()> {
        self.participants
            .insert(participant.participant_id.clone(), participant);
        Ok(())
    }

    async fn participant(&self, participant_id: &str) -> Result<Option<ParticipantDoc>> {
        Ok(self.participants.get(participant_id).map(|p| p.clone()))
    }

    async fn participants_in_group(&self, group: Group) -> Result<Vec<ParticipantDoc>> {
        let mut members: Vec<ParticipantDoc> = self
            .participants
            .iter()
            .filter(|entry| entry.group == group)
            .map(|entry| entry.clone())
            .collect();
        // Deterministic order for callers that iterate
        members.sort_by(|a, b| a.participant_id.cmp(&b.participant_id));
        Ok(members)
    }

    async fn count_group(&self, group: Group) -> Result<u64> {
        Ok(self
            .participants
            .iter()
            .filter(|entry| entry.group == group)
            .count() as u64)
    }

    async fn set_group(&self, participant_id: &str, group: Group) -> Result<bool> {
        match self.participants.get_mut(participant_id) {
            Some(mut p) => {
                p.group = group;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_subgroup(&self, participant_id: &str, subgroup: i32) -> Result<bool> {
        match self.participants.get_mut(participant_id) {
            Some(mut p) => {
                p.subgroup = Some(subgroup);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_has_submitted(&self, participant_id: &str, submitted: bool) -> Result<bool> {
        match self.participants.get_mut(participant_id) {
            Some(mut p) => {
                p.has_submitted = submitted;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn reset_all_submissions(&self) -> Result<()> {
        for mut entry in self.participants.iter_mut() {
            entry.has_submitted = false;
        }
        Ok(())
    }

    async fn delete_participant(&self, participant_id: &str) -> Result<bool> {
        Ok(self.participants.remove(participant_id).is_some())
    }

    async fn delete_participants_except(&self, keep: Group) -> Result<u64> {
        let before = self.participants.len();
        self.participants.retain(|_, p| p.group == keep);
        Ok((before - self.participants.len()) as u64)
    }

    async fn connections(&self) -> Result<Vec<ConnectionDoc>> {
        let mut edges: Vec<ConnectionDoc> =
            self.connections.iter().map(|entry| entry.clone()).collect();
        edges.sort_by(|a, b| a.connection_id.cmp(&b.connection_id));
        Ok(edges)
    }

    async fn connections_into(&self, target_id: &str) -> Result<Vec<ConnectionDoc>> {
        let mut edges: Vec<ConnectionDoc> = self
            .connections
            .iter()
            .filter(|entry| entry.target_id == target_id)
            .map(|entry| entry.clone())
            .collect();
        edges.sort_by(|a, b| a.connection_id.cmp(&b.connection_id));
        Ok(edges)
    }

    async fn insert_connections(&self, edges: Vec<ConnectionDoc>) -> Result<()> {
        for edge in edges {
            self.connections.insert(edge.connection_id.clone(), edge);
        }
        Ok(())
    }

    async fn delete_connections(&self, connection_ids: &[String]) -> Result<u64> {
        let mut removed = 0;
        for id in connection_ids {
            if self.connections.remove(id).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn delete_connections_of(&self, participant_id: &str) -> Result<u64> {
        let before = self.connections.len();
        self.connections
            .retain(|_, c| c.source_id != participant_id && c.target_id != participant_id);
        Ok((before - self.connections.len()) as u64)
    }

    async fn delete_all_connections(&self) -> Result<()> {
        self.connections.clear();
        Ok(())
    }

    async fn cas_weight(
        &self,
        connection_id: &str,
        expected_version: i64,
        new_weight: f64,
        round_number: i64,
    ) -> Result<bool> {
        match self.connections.get_mut(connection_id) {
            Some(mut edge)
                if edge.version == expected_version && edge.updated_round < round_number =>
            {
                edge.weight = new_weight;
                edge.version += 1;
                edge.updated_round = round_number;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_asset(&self, asset: AssetDoc) -> Result<()> {
        self.assets.insert(asset.asset_id.clone(), asset);
        Ok(())
    }

    async fn asset(&self, asset_id: &str) -> Result<Option<AssetDoc>> {
        Ok(self.assets.get(asset_id).map(|a| a.clone()))
    }

    async fn claim_unused_asset(&self) -> Result<Option<AssetDoc>> {
        // Deterministic claim order so tests and reruns are stable
        let mut ids: Vec<String> = self.assets.iter().map(|a| a.asset_id.clone()).collect();
        ids.sort();

        for id in ids {
            if let Some(mut asset) = self.assets.get_mut(&id) {
                // The used check happens under the entry lock, so two
                // concurrent claims can never take the same asset.
                if !asset.used {
                    asset.used = true;
                    return Ok(Some(asset.clone()));
                }
            }
        }
        Ok(None)
    }

    async fn reset_assets(&self) -> Result<()> {
        for mut entry in self.assets.iter_mut() {
            entry.used = false;
        }
        Ok(())
    }

    async fn record_accuracy(&self, round_number: i64, correct: bool) -> Result<()> {
        let mut history = self.accuracy.lock().await;
        if !history.iter().any(|a| a.round_number == round_number) {
            history.push(RoundAccuracyDoc::new(round_number, correct));
        }
        Ok(())
    }

    async fn accuracy_history(&self) -> Result<Vec<RoundAccuracyDoc>> {
        let mut history = self.accuracy.lock().await.clone();
        history.sort_by_key(|a| a.round_number);
        Ok(history)
    }

    async fn delete_accuracy_history(&self) -> Result<()> {
        self.accuracy.lock().await.clear();
        Ok(())
    }
}
