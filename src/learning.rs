//! Weight update engine
//!
//! Applies one backpropagation-style learning pass over the network
//! after a round is finalized. All new weights are computed from a
//! single snapshot of the edge set and written as absolute values
//! through a round-stamped compare-and-swap, so a crashed or
//! concurrently retried pass can never double-apply a delta: edges
//! already written for the round are skipped, and their pre-update
//! weights are reconstructed so the backprop error terms come out the
//! same as on the first attempt. The round's `is_weights_updated` flag
//! is the last write of the pass.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::{GameRules, UpdateRule};
use crate::db::schemas::{ConnectionDoc, RoundDoc};
use crate::store::GameStore;
use crate::types::{Group, HivemindError, Result};

/// Outcome of one learning pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LearningReport {
    /// Edges whose weight write landed
    pub weights_written: usize,
    /// Edges skipped on version mismatch (another pass got there first)
    pub conflicts: usize,
}

/// Applies per-round weight updates to the connection graph
pub struct WeightUpdateEngine {
    store: Arc<dyn GameStore>,
    rules: GameRules,
}

impl WeightUpdateEngine {
    pub fn new(store: Arc<dyn GameStore>, rules: GameRules) -> Self {
        Self { store, rules }
    }

    /// Run the learning pass for a finalized round.
    ///
    /// Returns `None` when the round's weights are already updated.
    /// Fails with `Validation` if the round is not complete yet.
    pub async fn apply(&self, round: &RoundDoc) -> Result<Option<LearningReport>> {
        if !round.is_round_complete {
            return Err(HivemindError::Validation(format!(
                "round {} is not complete, cannot update weights",
                round.round_number
            )));
        }
        if round.is_weights_updated {
            return Ok(None);
        }

        let final_prediction = round.final_prediction.ok_or_else(|| {
            HivemindError::Internal(format!(
                "round {} is complete but has no final prediction",
                round.round_number
            ))
        })?;

        let asset_id = round.asset_id.as_deref().ok_or_else(|| {
            HivemindError::Internal(format!("round {} has no asset", round.round_number))
        })?;
        let asset = self
            .store
            .asset(asset_id)
            .await?
            .ok_or_else(|| HivemindError::NotFound(format!("asset {} not found", asset_id)))?;
        let target = f64::from(asset.correct_answer);

        let final_node = self
            .store
            .participants_in_group(Group::FinalNode)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| HivemindError::NotFound("no final node participant".to_string()))?;

        let snapshot = self.store.connections().await?;
        let writes = self.plan_writes(round, target, final_prediction, &final_node.participant_id, &snapshot);

        let mut report = LearningReport::default();
        for (edge, new_weight) in writes {
            if self
                .store
                .cas_weight(
                    &edge.connection_id,
                    edge.version,
                    new_weight,
                    round.round_number,
                )
                .await?
            {
                report.weights_written += 1;
            } else {
                report.conflicts += 1;
            }
        }

        if !self.store.mark_weights_updated(round.round_number).await? {
            debug!(
                "Round {} weights were marked updated by another pass",
                round.round_number
            );
        }

        info!(
            "Learning pass for round {}: {} weight(s) written, {} conflict(s)",
            round.round_number, report.weights_written, report.conflicts
        );
        Ok(Some(report))
    }

    /// Compute the absolute post-update weight for every edge whose
    /// source submitted this round. Edges of silent participants are
    /// left untouched.
    ///
    /// A retried pass may observe edges a crashed attempt already wrote
    /// for this round (`updated_round == round_number`). Those edges get
    /// no write, and their pre-update weight is reconstructed by
    /// inverting the delta so the backprop error terms match the first
    /// attempt exactly.
    fn plan_writes<'a>(
        &self,
        round: &RoundDoc,
        target: f64,
        final_prediction: i32,
        final_node_id: &str,
        snapshot: &'a [ConnectionDoc],
    ) -> Vec<(&'a ConnectionDoc, f64)> {
        let lr = self.rules.learning_rate;
        let round_number = round.round_number;

        let g1_preds: HashMap<&str, f64> = round
            .group1_predictions
            .iter()
            .map(|e| (e.participant_id.as_str(), f64::from(e.prediction)))
            .collect();
        let g2_preds: HashMap<&str, f64> = round
            .group2_predictions
            .iter()
            .map(|e| (e.participant_id.as_str(), f64::from(e.prediction)))
            .collect();

        let (output_edges, hidden_edges): (Vec<&ConnectionDoc>, Vec<&ConnectionDoc>) = snapshot
            .iter()
            .partition(|edge| edge.target_id == final_node_id);

        // Output-layer delta per unit prediction. For both rules this is
        // independent of the weights, which is what makes the pre-update
        // reconstruction below exact.
        let unit_error = match self.rules.update_rule {
            UpdateRule::Delta => target - f64::from(final_prediction),
            UpdateRule::Hinge => target,
        };

        // Pre-update weight per sink edge: invert the delta for edges a
        // prior attempt already wrote this round.
        let pre_weight = |edge: &ConnectionDoc, pred: f64| {
            if edge.updated_round == round_number {
                edge.weight - lr * unit_error * pred
            } else {
                edge.weight
            }
        };

        // Error signal credited to the output layer as a whole
        let output_error = match self.rules.update_rule {
            UpdateRule::Delta => unit_error,
            UpdateRule::Hinge => {
                let sum: f64 = output_edges
                    .iter()
                    .filter_map(|edge| {
                        g2_preds
                            .get(edge.source_id.as_str())
                            .map(|p| pre_weight(edge, *p) * p)
                    })
                    .sum();
                if 1.0 - target * sum > 0.0 {
                    target
                } else {
                    // Margin satisfied, nothing to learn this round
                    0.0
                }
            }
        };

        if output_error == 0.0 {
            return Vec::new();
        }

        let mut writes = Vec::new();
        // Per-node error, computed from pre-update weights
        let mut g2_errors: HashMap<&str, f64> = HashMap::new();

        for edge in &output_edges {
            if let Some(&pred) = g2_preds.get(edge.source_id.as_str()) {
                let pre = pre_weight(edge, pred);
                g2_errors.insert(edge.source_id.as_str(), output_error * pre);
                if edge.updated_round < round_number {
                    writes.push((*edge, pre + lr * output_error * pred));
                }
            }
        }

        for edge in &hidden_edges {
            if edge.updated_round >= round_number {
                continue;
            }
            if let (Some(&pred), Some(&err)) = (
                g1_preds.get(edge.source_id.as_str()),
                g2_errors.get(edge.target_id.as_str()),
            ) {
                writes.push((*edge, edge.weight + lr * err * pred));
            }
        }

        writes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DecisionRule;
    use crate::db::schemas::{AssetDoc, ParticipantDoc, PredictionEntry};
    use crate::store::MemoryStore;

    fn rules(update_rule: UpdateRule) -> GameRules {
        GameRules {
            learning_rate: 0.05,
            fan_out: 2,
            decision_rule: DecisionRule::Sigmoid,
            update_rule,
        }
    }

    async fn add_participant(store: &MemoryStore, id: &str, group: Group) {
        store
            .insert_participant(ParticipantDoc::new(id.into(), group, true, "x".into()))
            .await
            .unwrap();
    }

    async fn add_edge(store: &MemoryStore, source: &str, target: &str, weight: f64) {
        let mut edge = ConnectionDoc::new(source.into(), target.into());
        edge.weight = weight;
        store.insert_connections(vec![edge]).await.unwrap();
    }

    /// a (G1) -> b (G2) -> final, both predicting +1, both weights 0.5
    async fn setup(correct_answer: i32) -> (Arc<MemoryStore>, RoundDoc) {
        let store = Arc::new(MemoryStore::new());
        add_participant(&store, "a", Group::GroupOne).await;
        add_participant(&store, "b", Group::GroupTwo).await;
        add_participant(&store, "final", Group::FinalNode).await;
        add_edge(&store, "a", "b", 0.5).await;
        add_edge(&store, "b", "final", 0.5).await;

        let asset = AssetDoc::new("http://assets/1".into(), correct_answer);
        let asset_id = asset.asset_id.clone();
        store.insert_asset(asset).await.unwrap();

        let mut round = RoundDoc::new(1, asset_id, "http://assets/1".into());
        round.group1_predictions.push(PredictionEntry {
            participant_id: "a".into(),
            prediction: 1,
        });
        round.group2_predictions.push(PredictionEntry {
            participant_id: "b".into(),
            prediction: 1,
        });
        round.group1_complete = true;
        round.group2_complete = true;
        round.final_prediction = Some(1);
        round.is_round_complete = true;
        store.insert_round(round.clone()).await.unwrap();

        (store, round)
    }

    async fn weight_of(store: &MemoryStore, source: &str, target: &str) -> f64 {
        store
            .connections()
            .await
            .unwrap()
            .into_iter()
            .find(|e| e.source_id == source && e.target_id == target)
            .unwrap()
            .weight
    }

    #[tokio::test]
    async fn test_delta_rule_backpropagates_error() {
        let (store, round) = setup(-1).await;
        let engine = WeightUpdateEngine::new(
            Arc::clone(&store) as Arc<dyn GameStore>,
            rules(UpdateRule::Delta),
        );

        let report = engine.apply(&round).await.unwrap().unwrap();
        assert_eq!(report.weights_written, 2);
        assert_eq!(report.conflicts, 0);

        // output_error = -1 - 1 = -2
        // b->final: 0.5 + 0.05 * -2 * 1 = 0.4
        // error[b]  = -2 * 0.5 (pre-update) = -1
        // a->b:     0.5 + 0.05 * -1 * 1 = 0.45
        assert!((weight_of(&store, "b", "final").await - 0.4).abs() < 1e-12);
        assert!((weight_of(&store, "a", "b").await - 0.45).abs() < 1e-12);

        let stored = store.round(1).await.unwrap().unwrap();
        assert!(stored.is_weights_updated);
    }

    #[tokio::test]
    async fn test_delta_rule_correct_prediction_leaves_weights() {
        let (store, round) = setup(1).await;
        let engine = WeightUpdateEngine::new(
            Arc::clone(&store) as Arc<dyn GameStore>,
            rules(UpdateRule::Delta),
        );

        let report = engine.apply(&round).await.unwrap().unwrap();
        assert_eq!(report.weights_written, 0);
        assert_eq!(weight_of(&store, "b", "final").await, 0.5);
        assert_eq!(weight_of(&store, "a", "b").await, 0.5);

        let stored = store.round(1).await.unwrap().unwrap();
        assert!(stored.is_weights_updated);
    }

    #[tokio::test]
    async fn test_skips_when_already_updated() {
        let (store, mut round) = setup(-1).await;
        store.mark_weights_updated(1).await.unwrap();
        round.is_weights_updated = true;

        let engine = WeightUpdateEngine::new(
            Arc::clone(&store) as Arc<dyn GameStore>,
            rules(UpdateRule::Delta),
        );

        assert_eq!(engine.apply(&round).await.unwrap(), None);
        assert_eq!(weight_of(&store, "b", "final").await, 0.5);
    }

    #[tokio::test]
    async fn test_rejects_incomplete_round() {
        let (store, mut round) = setup(-1).await;
        round.is_round_complete = false;

        let engine = WeightUpdateEngine::new(store as Arc<dyn GameStore>, rules(UpdateRule::Delta));
        let err = engine.apply(&round).await.unwrap_err();
        assert!(matches!(err, HivemindError::Validation(_)));
    }

    #[tokio::test]
    async fn test_silent_participant_edges_untouched() {
        let (store, round) = setup(-1).await;
        // c never submitted this round
        add_participant(&store, "c", Group::GroupTwo).await;
        add_edge(&store, "c", "final", 0.5).await;

        let engine = WeightUpdateEngine::new(
            Arc::clone(&store) as Arc<dyn GameStore>,
            rules(UpdateRule::Delta),
        );
        engine.apply(&round).await.unwrap().unwrap();

        assert_eq!(weight_of(&store, "c", "final").await, 0.5);
        assert!((weight_of(&store, "b", "final").await - 0.4).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_retry_after_partial_write_does_not_double_apply() {
        let (store, round) = setup(-1).await;

        // A first attempt wrote the output edge and died before flipping
        // the round flag: b->final already sits at 0.4, stamped for
        // round 1.
        let sink = store
            .connections()
            .await
            .unwrap()
            .into_iter()
            .find(|e| e.target_id == "final")
            .unwrap();
        assert!(store
            .cas_weight(&sink.connection_id, 0, 0.4, 1)
            .await
            .unwrap());

        let engine = WeightUpdateEngine::new(
            Arc::clone(&store) as Arc<dyn GameStore>,
            rules(UpdateRule::Delta),
        );
        let report = engine.apply(&round).await.unwrap().unwrap();

        // Only the hidden edge still needed a write
        assert_eq!(report.weights_written, 1);
        assert_eq!(report.conflicts, 0);

        // The output delta is not applied twice, and the hidden edge is
        // updated with the error from the pre-update sink weight (0.5),
        // exactly as the first attempt computed it
        assert!((weight_of(&store, "b", "final").await - 0.4).abs() < 1e-12);
        assert!((weight_of(&store, "a", "b").await - 0.45).abs() < 1e-12);

        let stored = store.round(1).await.unwrap().unwrap();
        assert!(stored.is_weights_updated);
    }

    #[tokio::test]
    async fn test_hinge_updates_inside_margin() {
        let (store, round) = setup(1).await;
        let engine = WeightUpdateEngine::new(
            Arc::clone(&store) as Arc<dyn GameStore>,
            rules(UpdateRule::Hinge),
        );

        // sum = 0.5, margin = 1 - 1*0.5 = 0.5 > 0, so the pass updates
        // b->final: 0.5 + 0.05 * 1 * 1 = 0.55
        // error[b]  = 1 * 0.5 = 0.5
        // a->b:     0.5 + 0.05 * 0.5 * 1 = 0.525
        let report = engine.apply(&round).await.unwrap().unwrap();
        assert_eq!(report.weights_written, 2);
        assert!((weight_of(&store, "b", "final").await - 0.55).abs() < 1e-12);
        assert!((weight_of(&store, "a", "b").await - 0.525).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_hinge_skips_when_margin_satisfied() {
        let (store, round) = setup(1).await;
        // Push the output weight past the margin
        let mut edge = store
            .connections()
            .await
            .unwrap()
            .into_iter()
            .find(|e| e.target_id == "final")
            .unwrap();
        edge.weight = 2.0;
        store.insert_connections(vec![edge]).await.unwrap();

        let engine = WeightUpdateEngine::new(
            Arc::clone(&store) as Arc<dyn GameStore>,
            rules(UpdateRule::Hinge),
        );

        // sum = 2.0, margin = 1 - 2 = -1 <= 0, nothing to learn
        let report = engine.apply(&round).await.unwrap().unwrap();
        assert_eq!(report.weights_written, 0);
        assert_eq!(weight_of(&store, "b", "final").await, 2.0);
        assert_eq!(weight_of(&store, "a", "b").await, 0.5);
    }
}
