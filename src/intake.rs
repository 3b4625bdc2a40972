//! Prediction intake
//!
//! Validates and records a single participant's prediction into the
//! current round, enforcing the at-most-one-submission and round-match
//! invariants. The append itself is a single atomic conditional write in
//! the store, so concurrent human and bot submissions can race freely.

use std::sync::Arc;

use tracing::{debug, info};

use crate::db::schemas::PredictionEntry;
use crate::store::{AppendOutcome, GameStore};
use crate::types::{validate_prediction, Group, HivemindError, Result};

/// Records predictions into the current round
pub struct PredictionIntake {
    store: Arc<dyn GameStore>,
}

impl PredictionIntake {
    pub fn new(store: Arc<dyn GameStore>) -> Self {
        Self { store }
    }

    /// Submit a prediction for the given round.
    ///
    /// Fails with `Validation` for a bad prediction value, a group
    /// mismatch, a stale round number, or a closed phase; with
    /// `DuplicateSubmission` when the participant already submitted.
    pub async fn submit(
        &self,
        participant_id: &str,
        group: Group,
        prediction: i32,
        round: i64,
    ) -> Result<()> {
        validate_prediction(prediction)?;

        if !group.is_predicting() {
            return Err(HivemindError::Validation(format!(
                "group {} does not submit predictions",
                group
            )));
        }

        let participant = self
            .store
            .participant(participant_id)
            .await?
            .ok_or_else(|| {
                HivemindError::NotFound(format!("participant {} not found", participant_id))
            })?;

        if participant.group != group {
            return Err(HivemindError::Validation(format!(
                "participant {} is in {}, not {}",
                participant_id, participant.group, group
            )));
        }

        let entry = PredictionEntry {
            participant_id: participant_id.to_string(),
            prediction,
        };

        match self.store.append_prediction(round, group, entry).await? {
            AppendOutcome::Appended => {
                self.store.set_has_submitted(participant_id, true).await?;
                info!(
                    "Prediction recorded: participant={} group={} round={}",
                    participant_id, group, round
                );
                Ok(())
            }
            AppendOutcome::Duplicate => {
                debug!(
                    "Duplicate prediction rejected: participant={} round={}",
                    participant_id, round
                );
                Err(HivemindError::DuplicateSubmission(format!(
                    "participant {} already submitted for round {}",
                    participant_id, round
                )))
            }
            AppendOutcome::RoundMismatch => Err(HivemindError::Validation(format!(
                "round {} is not the current round",
                round
            ))),
            AppendOutcome::PhaseClosed => Err(HivemindError::Validation(format!(
                "{} phase is not open for submissions in round {}",
                group, round
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::{ParticipantDoc, RoundDoc};
    use crate::store::MemoryStore;

    async fn setup() -> (Arc<MemoryStore>, PredictionIntake) {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_round(RoundDoc::new(1, "asset-1".into(), "http://assets/1".into()))
            .await
            .unwrap();
        store
            .insert_participant(ParticipantDoc::new(
                "p1".into(),
                Group::GroupOne,
                false,
                "x".into(),
            ))
            .await
            .unwrap();
        store
            .insert_participant(ParticipantDoc::new(
                "p2".into(),
                Group::GroupTwo,
                false,
                "x".into(),
            ))
            .await
            .unwrap();

        let intake = PredictionIntake::new(Arc::clone(&store) as Arc<dyn GameStore>);
        (store, intake)
    }

    #[tokio::test]
    async fn test_submit_records_and_flags() {
        let (store, intake) = setup().await;

        intake.submit("p1", Group::GroupOne, 1, 1).await.unwrap();

        let round = store.round(1).await.unwrap().unwrap();
        assert_eq!(round.group1_predictions.len(), 1);

        let participant = store.participant("p1").await.unwrap().unwrap();
        assert!(participant.has_submitted);
    }

    #[tokio::test]
    async fn test_invalid_prediction_value() {
        let (_, intake) = setup().await;
        let err = intake.submit("p1", Group::GroupOne, 0, 1).await.unwrap_err();
        assert!(matches!(err, HivemindError::Validation(_)));
    }

    #[tokio::test]
    async fn test_round_mismatch() {
        let (_, intake) = setup().await;
        let err = intake.submit("p1", Group::GroupOne, 1, 7).await.unwrap_err();
        assert!(matches!(err, HivemindError::Validation(_)));
    }

    #[tokio::test]
    async fn test_duplicate_rejected() {
        let (_, intake) = setup().await;

        intake.submit("p1", Group::GroupOne, 1, 1).await.unwrap();
        let err = intake.submit("p1", Group::GroupOne, -1, 1).await.unwrap_err();
        assert!(matches!(err, HivemindError::DuplicateSubmission(_)));
    }

    #[tokio::test]
    async fn test_group_mismatch_rejected() {
        let (_, intake) = setup().await;
        let err = intake.submit("p2", Group::GroupOne, 1, 1).await.unwrap_err();
        assert!(matches!(err, HivemindError::Validation(_)));
    }

    #[tokio::test]
    async fn test_group_two_gated_on_group_one() {
        let (store, intake) = setup().await;

        let err = intake.submit("p2", Group::GroupTwo, 1, 1).await.unwrap_err();
        assert!(matches!(err, HivemindError::Validation(_)));

        store.mark_phase_complete(1, Group::GroupOne).await.unwrap();
        intake.submit("p2", Group::GroupTwo, 1, 1).await.unwrap();
    }
}
