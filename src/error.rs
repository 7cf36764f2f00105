//! Error taxonomy for the engram engine.
//!
//! Library callers match on [`EngineError`]; the CLI layer wraps these in
//! `anyhow` for context. Storage errors convert from `rusqlite::Error`
//! automatically so engine code can use `?` on database calls.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Referenced memory id does not exist (or is not visible to the tenant).
    #[error("memory not found: {0}")]
    NotFound(String),

    /// Malformed caller input (empty content, zero k, out-of-range boost).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The embedding provider failed. Nothing was written.
    #[error("embedding provider failed: {0}")]
    Provider(#[source] anyhow::Error),

    /// Query concurrency ceiling reached; retry later.
    #[error("backpressure: {active} queries in flight (max {max})")]
    Backpressure { active: usize, max: usize },

    /// Underlying SQLite failure.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// True when the caller can retry without changing the request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Backpressure { .. })
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::InvalidInput(format!("bad JSON field: {err}"))
    }
}
