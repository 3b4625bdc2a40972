//! Game store abstraction
//!
//! Everything the round engine, topology manager, learning engine, and
//! prediction intake need from persistence, behind one async trait. The
//! production implementation is MongoDB; an in-memory implementation
//! backs dev mode and the test suite.
//!
//! All mutation goes through atomic per-row operations: the prediction
//! append, the asset claim, phase/finalize flag flips, and weight writes
//! each carry their precondition in the operation itself, never as a
//! read-then-write at the call site.

mod memory;
mod mongo;

pub use memory::MemoryStore;
pub use mongo::MongoGameStore;

use async_trait::async_trait;

use crate::db::schemas::{
    AssetDoc, ConnectionDoc, ParticipantDoc, PredictionEntry, RoundAccuracyDoc, RoundDoc,
};
use crate::types::{Group, Result};

/// Result of an atomic prediction append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Entry was appended to the round's list
    Appended,
    /// Participant already present in that group's list
    Duplicate,
    /// The given round is not the stored current round
    RoundMismatch,
    /// The group's phase is not open for submissions
    PhaseClosed,
}

/// Persistence operations required by the game core
#[async_trait]
pub trait GameStore: Send + Sync {
    // --- rounds ---

    /// The authoritative current round (highest round number), if any
    async fn current_round(&self) -> Result<Option<RoundDoc>>;

    /// A specific round by number
    async fn round(&self, round_number: i64) -> Result<Option<RoundDoc>>;

    /// Insert a new round row
    async fn insert_round(&self, round: RoundDoc) -> Result<()>;

    /// Atomically append a prediction to the round's group list.
    ///
    /// The append only succeeds when the round number matches the stored
    /// row, the group's phase is open (for Group Two: Group One already
    /// complete), the round is not finalized, and the participant is not
    /// already present in the list.
    async fn append_prediction(
        &self,
        round_number: i64,
        group: Group,
        entry: PredictionEntry,
    ) -> Result<AppendOutcome>;

    /// Mark a group's collection phase complete. Returns false if the
    /// flag was already set (or the round is gone).
    async fn mark_phase_complete(&self, round_number: i64, group: Group) -> Result<bool>;

    /// Store the final prediction and flip the round to complete with
    /// weights pending. Guarded on `final_prediction` still being null;
    /// returns false when another writer finalized first.
    async fn finalize_round(&self, round_number: i64, final_prediction: i32) -> Result<bool>;

    /// Mark the round's learning pass as applied. Returns false if
    /// already marked.
    async fn mark_weights_updated(&self, round_number: i64) -> Result<bool>;

    /// Flip the round terminal: game over, no longer started.
    async fn mark_game_over(&self, round_number: i64) -> Result<bool>;

    /// Remove all round rows (full game reset only)
    async fn delete_all_rounds(&self) -> Result<()>;

    // --- participants ---

    async fn insert_participant(&self, participant: ParticipantDoc) -> Result<()>;

    async fn participant(&self, participant_id: &str) -> Result<Option<ParticipantDoc>>;

    async fn participants_in_group(&self, group: Group) -> Result<Vec<ParticipantDoc>>;

    async fn count_group(&self, group: Group) -> Result<u64>;

    /// Reassign a participant's group. Returns false if unknown.
    async fn set_group(&self, participant_id: &str, group: Group) -> Result<bool>;

    /// Set a Group One participant's layout ordinal
    async fn set_subgroup(&self, participant_id: &str, subgroup: i32) -> Result<bool>;

    /// Flip a participant's per-round submission flag
    async fn set_has_submitted(&self, participant_id: &str, submitted: bool) -> Result<bool>;

    /// Clear every participant's submission flag (round advance)
    async fn reset_all_submissions(&self) -> Result<()>;

    /// Remove a participant. Returns false if unknown.
    async fn delete_participant(&self, participant_id: &str) -> Result<bool>;

    /// Remove every participant outside the given group (game reset
    /// keeps the final node). Returns the number removed.
    async fn delete_participants_except(&self, keep: Group) -> Result<u64>;

    // --- connections ---

    async fn connections(&self) -> Result<Vec<ConnectionDoc>>;

    /// All edges into the given target participant
    async fn connections_into(&self, target_id: &str) -> Result<Vec<ConnectionDoc>>;

    async fn insert_connections(&self, edges: Vec<ConnectionDoc>) -> Result<()>;

    /// Remove edges by their connection ids. Returns the number removed.
    async fn delete_connections(&self, connection_ids: &[String]) -> Result<u64>;

    /// Remove every edge touching the given participant
    async fn delete_connections_of(&self, participant_id: &str) -> Result<u64>;

    async fn delete_all_connections(&self) -> Result<()>;

    /// Compare-and-swap a single edge weight for a round's learning
    /// pass: the write only lands when the stored version still equals
    /// `expected_version` AND the edge has not been written for this
    /// round yet (`updated_round < round_number`). Bumps the version and
    /// stamps `updated_round`. Returns false on version mismatch, an
    /// already-updated edge, or a missing edge.
    async fn cas_weight(
        &self,
        connection_id: &str,
        expected_version: i64,
        new_weight: f64,
        round_number: i64,
    ) -> Result<bool>;

    // --- assets ---

    async fn insert_asset(&self, asset: AssetDoc) -> Result<()>;

    async fn asset(&self, asset_id: &str) -> Result<Option<AssetDoc>>;

    /// Atomically claim the next unused asset, marking it used. Returns
    /// None when the pool is exhausted.
    async fn claim_unused_asset(&self) -> Result<Option<AssetDoc>>;

    /// Flip every asset back to unused (game reset)
    async fn reset_assets(&self) -> Result<()>;

    // --- accuracy history ---

    async fn record_accuracy(&self, round_number: i64, correct: bool) -> Result<()>;

    /// Full history ordered by round number
    async fn accuracy_history(&self) -> Result<Vec<RoundAccuracyDoc>>;

    async fn delete_accuracy_history(&self) -> Result<()>;
}
