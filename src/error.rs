//! Error types for the circulate knowledge system
//!
//! Structured errors are defined with thiserror; the binary propagates them
//! through anyhow at the top level.

use thiserror::Error;

/// Main error type for circulate operations
#[derive(Error, Debug)]
pub enum CirculateError {
    /// Database operation failed
    #[error("Database error: {0}")]
    Database(String),

    /// Embedding generation failed
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Summarization / generation model request failed
    #[error("LLM API error: {0}")]
    LlmApi(String),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid knowledge ID format
    #[error("Invalid knowledge ID: {0}")]
    InvalidKnowledgeId(#[from] uuid::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// I/O error (markdown backups, config files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Input rejected before reaching a collaborator
    #[error("Validation error: {0}")]
    Validation(String),

    /// A knowledge item could not be persisted
    #[error("Failed to store knowledge: {0}")]
    StoreWrite(String),

    /// A knowledge read failed
    #[error("Failed to query knowledge: {0}")]
    Query(String),

    /// A phase-scoped knowledge read failed
    #[error("Failed to query knowledge by phase: {0}")]
    PhaseQuery(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Result type alias for circulate operations
pub type Result<T> = std::result::Result<T, CirculateError>;

/// Convert anyhow::Error to CirculateError
impl From<anyhow::Error> for CirculateError {
    fn from(err: anyhow::Error) -> Self {
        CirculateError::Other(err.to_string())
    }
}

impl From<rusqlite::Error> for CirculateError {
    fn from(err: rusqlite::Error) -> Self {
        CirculateError::Database(err.to_string())
    }
}
