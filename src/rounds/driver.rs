//! Periodic game driver
//!
//! One timer loop that nudges the current round forward on each tick:
//! fills in idle bot predictions, closes collection phases, computes the
//! final prediction, runs the learning pass, and advances the round.
//! Every step is a guarded store transition, so overlapping ticks or a
//! restarted process converge on the same state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::db::schemas::RoundDoc;
use crate::intake::PredictionIntake;
use crate::learning::WeightUpdateEngine;
use crate::rounds::RoundEngine;
use crate::store::GameStore;
use crate::types::{Group, HivemindError, Result};

/// Background service driving round progression on a timer
pub struct GameDriver {
    store: Arc<dyn GameStore>,
    engine: RoundEngine,
    learning: WeightUpdateEngine,
    intake: PredictionIntake,
    interval: Duration,
    /// Whether the driver loop is running
    running: Arc<RwLock<bool>>,
}

impl GameDriver {
    pub fn new(
        store: Arc<dyn GameStore>,
        engine: RoundEngine,
        learning: WeightUpdateEngine,
        intake: PredictionIntake,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            engine,
            learning,
            intake,
            interval,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Start the driver loop
    pub async fn start(self: Arc<Self>) {
        {
            let mut running = self.running.write().await;
            if *running {
                warn!("Game driver already running");
                return;
            }
            *running = true;
        }

        info!("Starting game driver (interval: {:?})", self.interval);

        let driver = Arc::clone(&self);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(driver.interval);
            // A slow tick must not stack ticks behind it
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;

                if !*driver.running.read().await {
                    info!("Game driver stopped");
                    break;
                }

                if let Err(e) = driver.run_once().await {
                    error!("Game tick failed (will retry): {}", e);
                }
            }
        });
    }

    /// Stop the driver after the current tick
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
        info!("Stopping game driver");
    }

    /// Check if the driver is running
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// One driver tick over the current round
    pub async fn run_once(&self) -> Result<()> {
        let round = match self.store.current_round().await? {
            Some(round) => round,
            None => {
                debug!("Game tick: no round yet");
                return Ok(());
            }
        };

        if !round.game_started || round.game_over {
            debug!("Game tick: game not running");
            return Ok(());
        }

        if round.is_round_complete {
            if !round.is_weights_updated {
                self.learning.apply(&round).await?;
            } else {
                self.engine.advance_round(&round).await?;
            }
            return Ok(());
        }

        if !round.group1_complete {
            self.fill_bots(&round, Group::GroupOne).await?;
            let round = self.refetch(round.round_number).await?;
            self.engine
                .try_complete_phase(&round, Group::GroupOne)
                .await?;
        }

        let round = self.refetch(round.round_number).await?;
        if round.group1_complete && !round.group2_complete {
            self.fill_bots(&round, Group::GroupTwo).await?;
            let round = self.refetch(round.round_number).await?;
            self.engine
                .try_complete_phase(&round, Group::GroupTwo)
                .await?;
        }

        let round = self.refetch(round.round_number).await?;
        if round.group2_complete && round.final_prediction.is_none() {
            self.engine.compute_final_prediction(&round).await?;
        }

        Ok(())
    }

    async fn refetch(&self, round_number: i64) -> Result<RoundDoc> {
        self.store.round(round_number).await?.ok_or_else(|| {
            HivemindError::Internal(format!("round {} disappeared mid-tick", round_number))
        })
    }

    /// Submit a random prediction for every idle bot in the group.
    ///
    /// Idleness comes from the round's own prediction list, not the
    /// participant's `has_submitted` flag: the round row is the source
    /// of truth across restarts, while the flag exists for the UI and
    /// can be stale after a crash. Races with humans or other ticks are
    /// expected; per-bot rejections are tolerated.
    async fn fill_bots(&self, round: &RoundDoc, group: Group) -> Result<()> {
        let members = self.store.participants_in_group(group).await?;

        for bot in members.iter().filter(|p| p.is_bot) {
            if round.has_submission(group, &bot.participant_id) {
                continue;
            }

            let prediction = if rand::random::<bool>() { 1 } else { -1 };
            match self
                .intake
                .submit(&bot.participant_id, group, prediction, round.round_number)
                .await
            {
                Ok(()) => {}
                Err(HivemindError::DuplicateSubmission(_)) | Err(HivemindError::Validation(_)) => {
                    debug!(
                        "Bot {} submission rejected, round moved on",
                        bot.participant_id
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }
}
