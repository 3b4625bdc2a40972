//! Configuration for Hivemind
//!
//! CLI arguments and environment variable handling using clap.

use clap::{Parser, ValueEnum};

/// Hivemind - round engine for the collective-prediction network game
#[derive(Parser, Debug, Clone)]
#[command(name = "hivemind")]
#[command(about = "Round engine and learning core for the collective-prediction game")]
pub struct Args {
    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "hivemind")]
    pub mongodb_db: String,

    /// Enable development mode (falls back to the in-memory store when
    /// MongoDB is unreachable)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Game driver tick interval in seconds
    #[arg(long, env = "GAME_TICK_SECS", default_value = "15")]
    pub game_tick_secs: u64,

    /// Topology reconciliation interval in seconds
    #[arg(long, env = "TOPOLOGY_TICK_SECS", default_value = "5")]
    pub topology_tick_secs: u64,

    /// Learning rate for the weight update engine
    #[arg(long, env = "LEARNING_RATE", default_value = "0.05")]
    pub learning_rate: f64,

    /// Outbound edges per Group One participant
    #[arg(long, env = "FAN_OUT", default_value = "2")]
    pub fan_out: usize,

    /// Decision rule for the final prediction
    #[arg(long, env = "DECISION_RULE", value_enum, default_value_t = DecisionRule::Sigmoid)]
    pub decision_rule: DecisionRule,

    /// Weight update rule
    #[arg(long, env = "UPDATE_RULE", value_enum, default_value_t = UpdateRule::Delta)]
    pub update_rule: UpdateRule,
}

/// How the weighted sum into the final node becomes a ±1 prediction.
///
/// Both rules appear in the product's history; sigmoid thresholding at
/// 0.5 is the shipped behavior and the default. The two agree everywhere
/// including the zero-sum tie (both yield +1).
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionRule {
    /// sigmoid(sum) >= 0.5 maps to +1, else -1
    Sigmoid,
    /// sum >= 0 maps to +1, else -1 (ties go positive)
    Sign,
}

/// Loss formulation driving the per-edge weight deltas.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateRule {
    /// Two-layer delta rule: output error = target - final prediction
    Delta,
    /// Hinge-loss gradient: update only when 1 - target*sum > 0
    Hinge,
}

/// Tunables consumed by the game components, derived from [`Args`]
#[derive(Debug, Clone, Copy)]
pub struct GameRules {
    /// Step size for weight updates
    pub learning_rate: f64,
    /// Outbound edges per Group One participant
    pub fan_out: usize,
    /// Final-prediction decision rule
    pub decision_rule: DecisionRule,
    /// Weight update rule
    pub update_rule: UpdateRule,
}

impl Default for GameRules {
    fn default() -> Self {
        Self {
            learning_rate: 0.05,
            fan_out: 2,
            decision_rule: DecisionRule::Sigmoid,
            update_rule: UpdateRule::Delta,
        }
    }
}

impl Args {
    /// Extract the component tunables
    pub fn rules(&self) -> GameRules {
        GameRules {
            learning_rate: self.learning_rate,
            fan_out: self.fan_out,
            decision_rule: self.decision_rule,
            update_rule: self.update_rule,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.learning_rate <= 0.0 || !self.learning_rate.is_finite() {
            return Err("LEARNING_RATE must be a positive number".to_string());
        }

        if self.fan_out == 0 {
            return Err("FAN_OUT must be at least 1".to_string());
        }

        if self.game_tick_secs == 0 || self.topology_tick_secs == 0 {
            return Err("tick intervals must be at least 1 second".to_string());
        }

        Ok(())
    }
}
