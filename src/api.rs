//! Game API facade
//!
//! The operations a transport layer (HTTP handlers, a websocket gateway,
//! an admin CLI) calls into: participant-facing round views and
//! submissions, plus the admin surface for membership, assets, and game
//! lifecycle. Everything here is a thin orchestration over the store and
//! the game components; no transport types leak in.

use std::sync::Arc;

use rand::seq::SliceRandom;
use serde::Serialize;
use tracing::info;

use crate::config::GameRules;
use crate::db::schemas::{AssetDoc, ConnectionDoc, ParticipantDoc, RoundAccuracyDoc, RoundDoc};
use crate::icons::{random_icon, FINAL_NODE_ICON, ROBOT_ICON};
use crate::intake::PredictionIntake;
use crate::rounds::RoundEngine;
use crate::store::GameStore;
use crate::topology::TopologyManager;
use crate::types::{validate_prediction, Group, HivemindError, Result};

/// Overall game lifecycle state
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct GameStatus {
    pub started: bool,
    pub over: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_round: Option<i64>,
}

/// Aggregate counts for the admin dashboard
#[derive(Serialize, Debug, Clone, Default)]
pub struct GameStats {
    pub group1_count: u64,
    pub group2_count: u64,
    pub unassigned_count: u64,
    pub connection_count: usize,
    pub rounds_played: usize,
    pub correct_rounds: usize,
}

/// One weighted input feeding a Group Two participant
#[derive(Serialize, Debug, Clone)]
pub struct WeightedInput {
    pub source_id: String,
    pub prediction: i32,
    pub weight: f64,
}

/// What a participant sees of the current round.
///
/// Group One sees the asset; Group Two sees its weighted inputs once
/// Group One's phase closes. Everyone sees the phase flags, which is how
/// a client renders its waiting states.
#[derive(Serialize, Debug, Clone)]
pub struct RoundView {
    pub round_number: i64,
    pub game_started: bool,
    pub game_over: bool,
    pub group1_complete: bool,
    pub group2_complete: bool,
    pub is_round_complete: bool,
    pub has_submitted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_url: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<WeightedInput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_prediction: Option<i32>,
}

/// Outcome of a completed round
#[derive(Serialize, Debug, Clone)]
pub struct RoundResult {
    pub round_number: i64,
    pub final_prediction: i32,
    pub correct_answer: i32,
    pub correct: bool,
}

/// Facade over the game components for transport layers
pub struct GameApi {
    store: Arc<dyn GameStore>,
    topology: Arc<TopologyManager>,
    engine: RoundEngine,
    intake: PredictionIntake,
}

impl GameApi {
    pub fn new(store: Arc<dyn GameStore>, topology: Arc<TopologyManager>, rules: GameRules) -> Self {
        let engine = RoundEngine::new(Arc::clone(&store), rules);
        let intake = PredictionIntake::new(Arc::clone(&store));
        Self {
            store,
            topology,
            engine,
            intake,
        }
    }

    // --- participant surface ---

    /// Submit a prediction for the current round
    pub async fn submit_prediction(
        &self,
        participant_id: &str,
        group: Group,
        prediction: i32,
        round: i64,
    ) -> Result<()> {
        self.intake
            .submit(participant_id, group, prediction, round)
            .await
    }

    /// The current round, as seen by the given participant (or a
    /// spectator when `participant_id` is None)
    pub async fn current_round_view(&self, participant_id: Option<&str>) -> Result<RoundView> {
        let round = self
            .store
            .current_round()
            .await?
            .ok_or_else(|| HivemindError::NotFound("no round in progress".to_string()))?;

        let participant = match participant_id {
            Some(id) => Some(self.store.participant(id).await?.ok_or_else(|| {
                HivemindError::NotFound(format!("participant {} not found", id))
            })?),
            None => None,
        };

        let group = participant.as_ref().map(|p| p.group);
        let has_submitted = participant.as_ref().map(|p| p.has_submitted).unwrap_or(false);

        let asset_url = if group == Some(Group::GroupOne) || group.is_none() {
            round.asset_url.clone()
        } else {
            None
        };

        // Group Two only sees its inputs once Group One's phase closes
        let inputs = match (&participant, round.group1_complete) {
            (Some(p), true) if p.group == Group::GroupTwo => {
                self.weighted_inputs(&round, &p.participant_id).await?
            }
            _ => Vec::new(),
        };

        Ok(RoundView {
            round_number: round.round_number,
            game_started: round.game_started,
            game_over: round.game_over,
            group1_complete: round.group1_complete,
            group2_complete: round.group2_complete,
            is_round_complete: round.is_round_complete,
            has_submitted,
            asset_url,
            inputs,
            final_prediction: round.final_prediction,
        })
    }

    async fn weighted_inputs(
        &self,
        round: &RoundDoc,
        participant_id: &str,
    ) -> Result<Vec<WeightedInput>> {
        let edges = self.store.connections_into(participant_id).await?;
        let mut inputs = Vec::new();
        for edge in edges {
            let prediction = round
                .group1_predictions
                .iter()
                .find(|e| e.participant_id == edge.source_id)
                .map(|e| e.prediction);
            if let Some(prediction) = prediction {
                inputs.push(WeightedInput {
                    source_id: edge.source_id,
                    prediction,
                    weight: edge.weight,
                });
            }
        }
        inputs.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        Ok(inputs)
    }

    /// Result of a finalized round
    pub async fn round_result(&self, round_number: i64) -> Result<RoundResult> {
        let round = self
            .store
            .round(round_number)
            .await?
            .ok_or_else(|| HivemindError::NotFound(format!("round {} not found", round_number)))?;

        let final_prediction = round.final_prediction.ok_or_else(|| {
            HivemindError::Validation(format!("round {} is not finalized yet", round_number))
        })?;

        let asset_id = round.asset_id.as_deref().ok_or_else(|| {
            HivemindError::Internal(format!("round {} has no asset", round_number))
        })?;
        let asset = self
            .store
            .asset(asset_id)
            .await?
            .ok_or_else(|| HivemindError::NotFound(format!("asset {} not found", asset_id)))?;

        Ok(RoundResult {
            round_number,
            final_prediction,
            correct_answer: asset.correct_answer,
            correct: final_prediction == asset.correct_answer,
        })
    }

    /// Lifecycle state derived from the current round row
    pub async fn game_status(&self) -> Result<GameStatus> {
        Ok(match self.store.current_round().await? {
            Some(round) => GameStatus {
                started: round.game_started,
                over: round.game_over,
                current_round: Some(round.round_number),
            },
            None => GameStatus {
                started: false,
                over: false,
                current_round: None,
            },
        })
    }

    /// Aggregate counts for the admin dashboard
    pub async fn game_stats(&self) -> Result<GameStats> {
        let history = self.store.accuracy_history().await?;
        Ok(GameStats {
            group1_count: self.store.count_group(Group::GroupOne).await?,
            group2_count: self.store.count_group(Group::GroupTwo).await?,
            unassigned_count: self.store.count_group(Group::Unassigned).await?,
            connection_count: self.store.connections().await?.len(),
            rounds_played: history.len(),
            correct_rounds: history.iter().filter(|r| r.correct).count(),
        })
    }

    /// Per-round accuracy history, oldest first
    pub async fn accuracy_history(&self) -> Result<Vec<RoundAccuracyDoc>> {
        self.store.accuracy_history().await
    }

    // --- admin surface ---

    /// Register a new human participant, initially unassigned
    pub async fn join_game(&self) -> Result<ParticipantDoc> {
        let participant = ParticipantDoc::new(
            uuid::Uuid::new_v4().to_string(),
            Group::Unassigned,
            false,
            random_icon(),
        );
        self.store.insert_participant(participant.clone()).await?;
        info!("Participant {} joined", participant.participant_id);
        Ok(participant)
    }

    /// Create `count` bots directly in the given predicting group
    pub async fn create_bots(&self, group: Group, count: usize) -> Result<Vec<ParticipantDoc>> {
        if !group.is_predicting() {
            return Err(HivemindError::Validation(format!(
                "bots can only be created in a predicting group, not {}",
                group
            )));
        }

        let mut bots = Vec::with_capacity(count);
        for _ in 0..count {
            let bot = ParticipantDoc::new(
                uuid::Uuid::new_v4().to_string(),
                group,
                true,
                ROBOT_ICON.to_string(),
            );
            self.store.insert_participant(bot.clone()).await?;
            bots.push(bot);
        }

        if group == Group::GroupOne {
            self.reshuffle_subgroups().await?;
        }
        self.topology.reconcile().await?;

        info!("Created {} bot(s) in {}", count, group);
        Ok(bots)
    }

    /// Create the final node participant if it does not exist yet
    pub async fn ensure_final_node(&self) -> Result<ParticipantDoc> {
        if let Some(existing) = self
            .store
            .participants_in_group(Group::FinalNode)
            .await?
            .into_iter()
            .next()
        {
            return Ok(existing);
        }

        let node = ParticipantDoc::new(
            uuid::Uuid::new_v4().to_string(),
            Group::FinalNode,
            true,
            FINAL_NODE_ICON.to_string(),
        );
        self.store.insert_participant(node.clone()).await?;
        info!("Final node created: {}", node.participant_id);
        Ok(node)
    }

    /// Move a participant into a layer and repair the graph.
    ///
    /// Assigning into Group One also reshuffles that group's layout
    /// ordinals.
    pub async fn assign_group(&self, participant_id: &str, group: Group) -> Result<()> {
        if group == Group::FinalNode {
            return Err(HivemindError::Validation(
                "the final node is not assignable".to_string(),
            ));
        }

        if !self.store.set_group(participant_id, group).await? {
            return Err(HivemindError::NotFound(format!(
                "participant {} not found",
                participant_id
            )));
        }

        if group == Group::GroupOne {
            self.reshuffle_subgroups().await?;
        }
        self.topology.reconcile().await?;

        info!("Participant {} assigned to {}", participant_id, group);
        Ok(())
    }

    /// Remove a participant, their edges, and repair the graph
    pub async fn remove_participant(&self, participant_id: &str) -> Result<()> {
        if !self.store.delete_participant(participant_id).await? {
            return Err(HivemindError::NotFound(format!(
                "participant {} not found",
                participant_id
            )));
        }
        self.store.delete_connections_of(participant_id).await?;
        self.topology.reconcile().await?;

        info!("Participant {} removed", participant_id);
        Ok(())
    }

    /// Register a labeled asset into the pool
    pub async fn add_asset(&self, url: &str, correct_answer: i32) -> Result<AssetDoc> {
        validate_prediction(correct_answer)?;
        if url.is_empty() {
            return Err(HivemindError::Validation(
                "asset url must not be empty".to_string(),
            ));
        }

        let asset = AssetDoc::new(url.to_string(), correct_answer);
        self.store.insert_asset(asset.clone()).await?;
        Ok(asset)
    }

    /// Start the game: make sure the final node exists, repair the
    /// graph, then open round 1
    pub async fn start_game(&self) -> Result<RoundDoc> {
        self.ensure_final_node().await?;
        self.topology.reconcile().await?;
        self.engine.start_game().await
    }

    /// Reset to a blank game: drop every participant except the final
    /// node, all edges, all rounds, and the accuracy history; return all
    /// assets to the pool
    pub async fn reset_game(&self) -> Result<()> {
        let removed = self
            .store
            .delete_participants_except(Group::FinalNode)
            .await?;
        self.store.delete_all_connections().await?;
        self.store.delete_all_rounds().await?;
        self.store.delete_accuracy_history().await?;
        self.store.reset_assets().await?;
        self.store.reset_all_submissions().await?;

        info!("Game reset: {} participant(s) removed", removed);
        Ok(())
    }

    /// Re-deal Group One's layout ordinals as a random permutation
    async fn reshuffle_subgroups(&self) -> Result<()> {
        let members = self.store.participants_in_group(Group::GroupOne).await?;
        let mut ordinals: Vec<i32> = (0..members.len() as i32).collect();
        ordinals.shuffle(&mut rand::thread_rng());

        for (member, ordinal) in members.iter().zip(ordinals) {
            self.store
                .set_subgroup(&member.participant_id, ordinal)
                .await?;
        }
        Ok(())
    }

    /// All edges, for graph visualisation
    pub async fn connections(&self) -> Result<Vec<ConnectionDoc>> {
        self.store.connections().await
    }
}
