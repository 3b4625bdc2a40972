//! Hivemind - round engine and learning core for the collective
//! prediction game.
//!
//! Participants form a small feed-forward network: Group One reacts to
//! an asset, fans out over weighted edges to Group Two, and Group Two's
//! weighted predictions feed a single final node. After each round the
//! network learns: edge weights move by a backpropagation-style update
//! against the asset's ground-truth label.
//!
//! The crate is organised around a few cooperating pieces:
//! - [`store`]: the persistence seam (MongoDB in production, in-memory
//!   for dev mode and tests)
//! - [`topology`]: keeps the connection graph well-formed as membership
//!   changes, preserving learned weights
//! - [`rounds`]: the round state machine and the periodic game driver
//! - [`intake`]: validated, exactly-once prediction submission
//! - [`learning`]: the per-round weight update engine
//! - [`api`]: the facade a transport layer calls into

pub mod api;
pub mod config;
pub mod db;
pub mod icons;
pub mod intake;
pub mod learning;
pub mod rounds;
pub mod store;
pub mod topology;
pub mod types;

pub use api::GameApi;
pub use config::{Args, DecisionRule, GameRules, UpdateRule};
pub use intake::PredictionIntake;
pub use learning::WeightUpdateEngine;
pub use rounds::{driver::GameDriver, RoundEngine};
pub use store::{GameStore, MemoryStore, MongoGameStore};
pub use topology::{TopologyManager, TopologyService};
pub use types::{Group, HivemindError, Result};
