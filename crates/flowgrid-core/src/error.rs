//! FlowGrid error types.

use thiserror::Error;

/// Result alias used across all FlowGrid crates.
pub type Result<T> = std::result::Result<T, FlowGridError>;

/// Top-level error for FlowGrid operations.
#[derive(Debug, Error)]
pub enum FlowGridError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    /// Rejected synchronously before anything is persisted (bad schedule
    /// descriptor, cyclic task graph, missing trigger fields).
    #[error("Validation error: {0}")]
    Validation(String),

    /// Inbound request failed authentication. Deliberately carries no
    /// detail — callers must not disclose why verification failed.
    #[error("invalid signature")]
    Auth,

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// A single-concurrency automation already has a live run.
    #[error("Concurrency held: {0}")]
    ConcurrencyHeld(String),

    #[error("Delivery error: {0}")]
    Delivery(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FlowGridError {
    /// Shorthand for a database error from any displayable cause.
    pub fn database(msg: impl std::fmt::Display) -> Self {
        Self::Database(msg.to_string())
    }

    /// Shorthand for a validation error.
    pub fn validation(msg: impl std::fmt::Display) -> Self {
        Self::Validation(msg.to_string())
    }

    /// Shorthand for an engine error.
    pub fn engine(msg: impl std::fmt::Display) -> Self {
        Self::Engine(msg.to_string())
    }
}
