//! Error types for Hivemind

/// Main error type for Hivemind operations
#[derive(Debug, thiserror::Error)]
pub enum HivemindError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Duplicate submission: {0}")]
    DuplicateSubmission(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl HivemindError {
    /// Whether a caller should retry the failed operation on a later cycle.
    ///
    /// Validation and duplicate rejections are final; store and conflict
    /// failures are transient and safe to retry since state is re-read
    /// fresh on every tick.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Conflict(_) | Self::Internal(_))
    }
}

// Implement From conversions for common error types

impl From<std::io::Error> for HivemindError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for HivemindError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(format!("JSON error: {}", err))
    }
}

impl From<mongodb::error::Error> for HivemindError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<bson::ser::Error> for HivemindError {
    fn from(err: bson::ser::Error) -> Self {
        Self::Internal(format!("BSON encode error: {}", err))
    }
}

/// Result type alias for Hivemind operations
pub type Result<T> = std::result::Result<T, HivemindError>;
