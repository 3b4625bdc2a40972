//! Connection document schema
//!
//! A weighted directed edge between participants in adjacent layers.
//! Weights are mutated only by the weight update engine, via versioned
//! compare-and-swap writes; structure is mutated only by the topology
//! manager.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for connections
pub const CONNECTION_COLLECTION: &str = "connections";

/// Neutral starting weight for new edges
pub const DEFAULT_WEIGHT: f64 = 0.5;

/// Connection document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ConnectionDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    /// Stable edge identifier (UUID)
    pub connection_id: String,

    /// Source participant id
    pub source_id: String,

    /// Target participant id
    pub target_id: String,

    /// Edge weight
    pub weight: f64,

    /// Version counter, incremented on every weight write.
    /// Serializes concurrent weight writers on an edge.
    #[serde(default)]
    pub version: i64,

    /// Round whose learning pass last wrote this edge. A pass only
    /// writes edges with `updated_round < round_number`, so a retry
    /// after a partial crash skips edges it already wrote.
    #[serde(default)]
    pub updated_round: i64,
}

impl ConnectionDoc {
    /// Create a new edge with the neutral default weight
    pub fn new(source_id: String, target_id: String) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            connection_id: uuid::Uuid::new_v4().to_string(),
            source_id,
            target_id,
            weight: DEFAULT_WEIGHT,
            version: 0,
            updated_round: 0,
        }
    }
}

impl IntoIndexes for ConnectionDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Unique index on connection_id
            (
                doc! { "connection_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("connection_id_unique".to_string())
                        .build(),
                ),
            ),
            // One edge per (source, target) pair
            (
                doc! { "source_id": 1, "target_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("source_target_unique".to_string())
                        .build(),
                ),
            ),
            // Index on target_id for fan-in queries
            (
                doc! { "target_id": 1 },
                Some(
                    IndexOptions::builder()
                        .name("target_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for ConnectionDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
