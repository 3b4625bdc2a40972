//! Round state machine
//!
//! Drives a round through its lifecycle: start the game on a claimed
//! asset, close each group's collection phase once every member has
//! submitted, compute the final node's output from the weighted Group
//! Two inputs, and advance to the next round (or end the game when the
//! asset pool runs dry).
//!
//! Every transition is a guarded store write, so a crashed or
//! concurrently ticking driver re-observes state instead of repeating a
//! transition.

pub mod driver;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{DecisionRule, GameRules};
use crate::db::schemas::RoundDoc;
use crate::store::GameStore;
use crate::types::{Group, HivemindError, Result};

/// Logistic function used by the final node's decision rule
pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// What happened when the engine tried to advance past a finished round
#[derive(Debug, Clone)]
pub enum Advance {
    /// A new round was opened on the given asset
    NextRound(RoundDoc),
    /// The asset pool is exhausted; the game is over
    GameOver,
}

/// Owns round lifecycle transitions
pub struct RoundEngine {
    store: Arc<dyn GameStore>,
    rules: GameRules,
}

impl RoundEngine {
    pub fn new(store: Arc<dyn GameStore>, rules: GameRules) -> Self {
        Self { store, rules }
    }

    /// Start the game: claim the first asset and open round 1.
    ///
    /// Fails with `Validation` if a game is already running, and with
    /// `NotFound` when the asset pool is empty.
    pub async fn start_game(&self) -> Result<RoundDoc> {
        let current = self.store.current_round().await?;
        if let Some(ref round) = current {
            if round.game_started && !round.game_over {
                return Err(HivemindError::Validation(
                    "game is already started".to_string(),
                ));
            }
        }

        let asset = self
            .store
            .claim_unused_asset()
            .await?
            .ok_or_else(|| HivemindError::NotFound("no assets available".to_string()))?;

        let round_number = current.map(|r| r.round_number + 1).unwrap_or(1);
        let round = RoundDoc::new(round_number, asset.asset_id, asset.url);
        self.store.insert_round(round.clone()).await?;

        info!(
            "Game started: round {} on asset {:?}",
            round.round_number, round.asset_id
        );
        Ok(round)
    }

    /// Close a group's collection phase if every member has submitted.
    ///
    /// Returns true when the phase is (now or already) complete. An
    /// empty group never completes; the round would stall by design
    /// until the topology gains members, so log it.
    pub async fn try_complete_phase(&self, round: &RoundDoc, group: Group) -> Result<bool> {
        if round.phase_complete(group) {
            return Ok(true);
        }

        let members = self.store.count_group(group).await?;
        if members == 0 {
            warn!(
                "Round {} waiting on {}: group has no members",
                round.round_number, group
            );
            return Ok(false);
        }

        if (round.predictions(group).len() as u64) < members {
            return Ok(false);
        }

        let flipped = self
            .store
            .mark_phase_complete(round.round_number, group)
            .await?;
        if flipped {
            info!(
                "Round {}: {} collection phase complete ({} submission(s))",
                round.round_number,
                group,
                round.predictions(group).len()
            );
        }
        Ok(true)
    }

    /// Compute and store the final node's prediction for the round.
    ///
    /// The output is the decision rule applied to the weighted sum of
    /// Group Two predictions over their edges into the final node.
    /// Idempotent: if another writer finalized first, returns the stored
    /// prediction.
    pub async fn compute_final_prediction(&self, round: &RoundDoc) -> Result<i32> {
        if !round.group2_complete {
            return Err(HivemindError::Validation(format!(
                "round {} Group Two phase is still open",
                round.round_number
            )));
        }
        if let Some(existing) = round.final_prediction {
            return Ok(existing);
        }

        let final_node = self
            .store
            .participants_in_group(Group::FinalNode)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| HivemindError::NotFound("no final node participant".to_string()))?;

        let weights: HashMap<String, f64> = self
            .store
            .connections_into(&final_node.participant_id)
            .await?
            .into_iter()
            .map(|edge| (edge.source_id, edge.weight))
            .collect();

        let sum: f64 = round
            .group2_predictions
            .iter()
            .filter_map(|entry| {
                weights
                    .get(&entry.participant_id)
                    .map(|w| w * f64::from(entry.prediction))
            })
            .sum();

        let prediction = match self.rules.decision_rule {
            DecisionRule::Sigmoid => {
                if sigmoid(sum) >= 0.5 {
                    1
                } else {
                    -1
                }
            }
            DecisionRule::Sign => {
                if sum >= 0.0 {
                    1
                } else {
                    -1
                }
            }
        };

        if !self
            .store
            .finalize_round(round.round_number, prediction)
            .await?
        {
            // Lost the race; the stored value is authoritative
            let stored = self
                .store
                .round(round.round_number)
                .await?
                .and_then(|r| r.final_prediction);
            return stored.ok_or_else(|| {
                HivemindError::Internal(format!(
                    "round {} finalize raced but no prediction stored",
                    round.round_number
                ))
            });
        }

        self.store
            .set_has_submitted(&final_node.participant_id, true)
            .await?;

        if let Some(asset_id) = round.asset_id.as_deref() {
            if let Some(asset) = self.store.asset(asset_id).await? {
                let correct = prediction == asset.correct_answer;
                self.store
                    .record_accuracy(round.round_number, correct)
                    .await?;
                info!(
                    "Round {} finalized: prediction {} (sum {:.4}), {}",
                    round.round_number,
                    prediction,
                    sum,
                    if correct { "correct" } else { "incorrect" }
                );
            }
        }

        Ok(prediction)
    }

    /// Move past a finished round: claim the next asset and open a new
    /// round, or end the game when the pool is exhausted.
    ///
    /// Requires the round to be complete with weights updated.
    pub async fn advance_round(&self, round: &RoundDoc) -> Result<Advance> {
        if !round.is_round_complete || !round.is_weights_updated {
            return Err(HivemindError::Validation(format!(
                "round {} is not ready to advance",
                round.round_number
            )));
        }

        let asset = match self.store.claim_unused_asset().await? {
            Some(asset) => asset,
            None => {
                self.store.mark_game_over(round.round_number).await?;
                info!(
                    "Asset pool exhausted after round {}; game over",
                    round.round_number
                );
                return Ok(Advance::GameOver);
            }
        };

        // Clear the per-round flags before the new round row exists: a
        // crash in between leaves stale flags pointing at a finished
        // round, which nothing reads, instead of at the new one.
        self.store.reset_all_submissions().await?;

        let next = RoundDoc::new(round.round_number + 1, asset.asset_id, asset.url);
        self.store.insert_round(next.clone()).await?;

        info!(
            "Advanced to round {} on asset {:?}",
            next.round_number, next.asset_id
        );
        Ok(Advance::NextRound(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UpdateRule;
    use crate::db::schemas::{AssetDoc, ConnectionDoc, ParticipantDoc, PredictionEntry};
    use crate::store::MemoryStore;

    fn rules() -> GameRules {
        GameRules {
            learning_rate: 0.05,
            fan_out: 2,
            decision_rule: DecisionRule::Sigmoid,
            update_rule: UpdateRule::Delta,
        }
    }

    fn engine(store: &Arc<MemoryStore>) -> RoundEngine {
        RoundEngine::new(Arc::clone(store) as Arc<dyn GameStore>, rules())
    }

    async fn add_participant(store: &MemoryStore, id: &str, group: Group) {
        store
            .insert_participant(ParticipantDoc::new(id.into(), group, true, "x".into()))
            .await
            .unwrap();
    }

    async fn add_asset(store: &MemoryStore, correct_answer: i32) {
        store
            .insert_asset(AssetDoc::new("http://assets/a".into(), correct_answer))
            .await
            .unwrap();
    }

    async fn add_edge(store: &MemoryStore, source: &str, target: &str, weight: f64) {
        let mut edge = ConnectionDoc::new(source.into(), target.into());
        edge.weight = weight;
        store.insert_connections(vec![edge]).await.unwrap();
    }

    #[test]
    fn test_sigmoid_midpoint() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-12);
        assert!(sigmoid(4.0) > 0.9);
        assert!(sigmoid(-4.0) < 0.1);
    }

    #[tokio::test]
    async fn test_start_game_claims_asset() {
        let store = Arc::new(MemoryStore::new());
        add_asset(&store, 1).await;

        let round = engine(&store).start_game().await.unwrap();
        assert_eq!(round.round_number, 1);
        assert!(round.game_started);

        let asset = store
            .asset(round.asset_id.as_deref().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert!(asset.used);
    }

    #[tokio::test]
    async fn test_start_game_requires_assets() {
        let store = Arc::new(MemoryStore::new());
        let err = engine(&store).start_game().await.unwrap_err();
        assert!(matches!(err, HivemindError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_start_game_rejects_running_game() {
        let store = Arc::new(MemoryStore::new());
        add_asset(&store, 1).await;
        add_asset(&store, 1).await;

        engine(&store).start_game().await.unwrap();
        let err = engine(&store).start_game().await.unwrap_err();
        assert!(matches!(err, HivemindError::Validation(_)));
    }

    #[tokio::test]
    async fn test_phase_closes_when_group_fully_submitted() {
        let store = Arc::new(MemoryStore::new());
        add_participant(&store, "a", Group::GroupOne).await;
        add_participant(&store, "b", Group::GroupOne).await;
        add_asset(&store, 1).await;

        let eng = engine(&store);
        let mut round = eng.start_game().await.unwrap();
        assert!(!eng.try_complete_phase(&round, Group::GroupOne).await.unwrap());

        round.group1_predictions = vec![
            PredictionEntry {
                participant_id: "a".into(),
                prediction: 1,
            },
            PredictionEntry {
                participant_id: "b".into(),
                prediction: -1,
            },
        ];
        assert!(eng.try_complete_phase(&round, Group::GroupOne).await.unwrap());

        let stored = store.round(1).await.unwrap().unwrap();
        assert!(stored.group1_complete);
    }

    #[tokio::test]
    async fn test_empty_group_never_completes() {
        let store = Arc::new(MemoryStore::new());
        add_asset(&store, 1).await;

        let eng = engine(&store);
        let round = eng.start_game().await.unwrap();
        assert!(!eng.try_complete_phase(&round, Group::GroupOne).await.unwrap());
    }

    #[tokio::test]
    async fn test_final_prediction_positive_sum() {
        let store = Arc::new(MemoryStore::new());
        add_participant(&store, "b", Group::GroupTwo).await;
        add_participant(&store, "final", Group::FinalNode).await;
        add_edge(&store, "b", "final", 0.5).await;
        add_asset(&store, 1).await;

        let eng = engine(&store);
        let mut round = eng.start_game().await.unwrap();
        round.group1_complete = true;
        round.group2_complete = true;
        round.group2_predictions = vec![PredictionEntry {
            participant_id: "b".into(),
            prediction: 1,
        }];

        // sum = 0.5, sigmoid(0.5) > 0.5, prediction +1, matching the label
        let prediction = eng.compute_final_prediction(&round).await.unwrap();
        assert_eq!(prediction, 1);

        let stored = store.round(1).await.unwrap().unwrap();
        assert!(stored.is_round_complete);
        assert_eq!(stored.final_prediction, Some(1));
        assert!(!stored.is_weights_updated);

        let history = store.accuracy_history().await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].correct);

        let node = store.participant("final").await.unwrap().unwrap();
        assert!(node.has_submitted);
    }

    #[tokio::test]
    async fn test_final_prediction_negative_sum() {
        let store = Arc::new(MemoryStore::new());
        add_participant(&store, "b", Group::GroupTwo).await;
        add_participant(&store, "final", Group::FinalNode).await;
        add_edge(&store, "b", "final", 0.5).await;
        add_asset(&store, 1).await;

        let eng = engine(&store);
        let mut round = eng.start_game().await.unwrap();
        round.group1_complete = true;
        round.group2_complete = true;
        round.group2_predictions = vec![PredictionEntry {
            participant_id: "b".into(),
            prediction: -1,
        }];

        let prediction = eng.compute_final_prediction(&round).await.unwrap();
        assert_eq!(prediction, -1);

        let history = store.accuracy_history().await.unwrap();
        assert!(!history[0].correct);
    }

    #[tokio::test]
    async fn test_final_prediction_requires_closed_phase() {
        let store = Arc::new(MemoryStore::new());
        add_participant(&store, "final", Group::FinalNode).await;
        add_asset(&store, 1).await;

        let eng = engine(&store);
        let round = eng.start_game().await.unwrap();
        let err = eng.compute_final_prediction(&round).await.unwrap_err();
        assert!(matches!(err, HivemindError::Validation(_)));
    }

    #[tokio::test]
    async fn test_advance_opens_next_round_and_resets_flags() {
        let store = Arc::new(MemoryStore::new());
        add_participant(&store, "a", Group::GroupOne).await;
        add_asset(&store, 1).await;
        add_asset(&store, -1).await;

        let eng = engine(&store);
        eng.start_game().await.unwrap();
        store.set_has_submitted("a", true).await.unwrap();
        store.finalize_round(1, 1).await.unwrap();
        store.mark_weights_updated(1).await.unwrap();

        let finished = store.round(1).await.unwrap().unwrap();
        match eng.advance_round(&finished).await.unwrap() {
            Advance::NextRound(next) => assert_eq!(next.round_number, 2),
            Advance::GameOver => panic!("expected a next round"),
        }

        let participant = store.participant("a").await.unwrap().unwrap();
        assert!(!participant.has_submitted);
    }

    #[tokio::test]
    async fn test_advance_ends_game_on_empty_pool() {
        let store = Arc::new(MemoryStore::new());
        add_asset(&store, 1).await;

        let eng = engine(&store);
        eng.start_game().await.unwrap();
        store.finalize_round(1, 1).await.unwrap();
        store.mark_weights_updated(1).await.unwrap();

        let finished = store.round(1).await.unwrap().unwrap();
        assert!(matches!(
            eng.advance_round(&finished).await.unwrap(),
            Advance::GameOver
        ));

        // The terminal state lives on the last round row; no new row
        let current = store.current_round().await.unwrap().unwrap();
        assert_eq!(current.round_number, 1);
        assert!(current.game_over);
        assert!(!current.game_started);
    }

    #[tokio::test]
    async fn test_two_layer_network_end_to_end() {
        let store = Arc::new(MemoryStore::new());
        add_participant(&store, "g1-a", Group::GroupOne).await;
        add_participant(&store, "g1-b", Group::GroupOne).await;
        add_participant(&store, "g2-a", Group::GroupTwo).await;
        add_participant(&store, "final", Group::FinalNode).await;
        add_edge(&store, "g1-a", "g2-a", 0.5).await;
        add_edge(&store, "g1-b", "g2-a", 0.5).await;
        add_edge(&store, "g2-a", "final", 0.5).await;
        add_asset(&store, 1).await;

        let eng = engine(&store);
        let round = eng.start_game().await.unwrap();

        for id in ["g1-a", "g1-b"] {
            let outcome = store
                .append_prediction(
                    round.round_number,
                    Group::GroupOne,
                    PredictionEntry {
                        participant_id: id.into(),
                        prediction: 1,
                    },
                )
                .await
                .unwrap();
            assert_eq!(outcome, crate::store::AppendOutcome::Appended);
        }

        let round = store.round(1).await.unwrap().unwrap();
        assert!(eng.try_complete_phase(&round, Group::GroupOne).await.unwrap());

        store
            .append_prediction(
                1,
                Group::GroupTwo,
                PredictionEntry {
                    participant_id: "g2-a".into(),
                    prediction: 1,
                },
            )
            .await
            .unwrap();

        let round = store.round(1).await.unwrap().unwrap();
        assert!(eng.try_complete_phase(&round, Group::GroupTwo).await.unwrap());

        // One Group Two edge at weight 0.5 and prediction +1: sum = 0.5,
        // so the final prediction comes out +1
        let round = store.round(1).await.unwrap().unwrap();
        let prediction = eng.compute_final_prediction(&round).await.unwrap();
        assert_eq!(prediction, 1);

        // Finalizing again is a no-op returning the stored value
        let round = store.round(1).await.unwrap().unwrap();
        assert_eq!(eng.compute_final_prediction(&round).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_deletion_mid_round_shrinks_completion_denominator() {
        let store = Arc::new(MemoryStore::new());
        add_participant(&store, "a", Group::GroupOne).await;
        add_participant(&store, "b", Group::GroupOne).await;
        add_asset(&store, 1).await;

        let eng = engine(&store);
        eng.start_game().await.unwrap();
        store
            .append_prediction(
                1,
                Group::GroupOne,
                PredictionEntry {
                    participant_id: "a".into(),
                    prediction: 1,
                },
            )
            .await
            .unwrap();

        let round = store.round(1).await.unwrap().unwrap();
        assert!(!eng.try_complete_phase(&round, Group::GroupOne).await.unwrap());

        // b leaves mid-round; a's recorded submission stays, and the
        // smaller group is now fully submitted
        store.delete_participant("b").await.unwrap();
        let round = store.round(1).await.unwrap().unwrap();
        assert_eq!(round.group1_predictions.len(), 1);
        assert!(eng.try_complete_phase(&round, Group::GroupOne).await.unwrap());
    }

    #[tokio::test]
    async fn test_advance_requires_finished_round() {
        let store = Arc::new(MemoryStore::new());
        add_asset(&store, 1).await;

        let eng = engine(&store);
        let round = eng.start_game().await.unwrap();
        let err = eng.advance_round(&round).await.unwrap_err();
        assert!(matches!(err, HivemindError::Validation(_)));
    }
}
