//! Asset document schema
//!
//! A labeled item presented during a round. Assets are drawn without
//! replacement: claiming one flips its `used` flag atomically so two
//! rounds can never present the same asset.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for assets
pub const ASSET_COLLECTION: &str = "assets";

/// Asset document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct AssetDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    /// Stable asset identifier (UUID)
    pub asset_id: String,

    /// Retrievable content reference
    pub url: String,

    /// Ground-truth label, -1 or +1
    pub correct_answer: i32,

    /// Whether this asset has been presented in a round
    #[serde(default)]
    pub used: bool,
}

impl AssetDoc {
    /// Register a new unused asset
    pub fn new(url: String, correct_answer: i32) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            asset_id: uuid::Uuid::new_v4().to_string(),
            url,
            correct_answer,
            used: false,
        }
    }
}

impl IntoIndexes for AssetDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Unique index on asset_id
            (
                doc! { "asset_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("asset_id_unique".to_string())
                        .build(),
                ),
            ),
            // Index on used for the next-unused query
            (
                doc! { "used": 1 },
                Some(
                    IndexOptions::builder()
                        .name("used_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for AssetDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
