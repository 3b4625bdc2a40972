//! Document schemas for the game store collections

mod accuracy;
mod asset;
mod connection;
mod metadata;
mod participant;
mod round;

pub use accuracy::{RoundAccuracyDoc, ACCURACY_COLLECTION};
pub use asset::{AssetDoc, ASSET_COLLECTION};
pub use connection::{ConnectionDoc, CONNECTION_COLLECTION, DEFAULT_WEIGHT};
pub use metadata::Metadata;
pub use participant::{ParticipantDoc, PARTICIPANT_COLLECTION};
pub use round::{PredictionEntry, RoundDoc, ROUND_COLLECTION};
