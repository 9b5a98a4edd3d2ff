//! Error types for dieah-recall

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for dieah-recall operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in dieah-recall
///
/// Collaborator errors (`Embedding`, `Generation`, `FactExtraction`, `Timeout`)
/// never escape the public scoring, clustering or summarization operations;
/// they are caught at the call boundary and replaced by a local fallback.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Fact extraction error: {0}")]
    FactExtraction(String),

    #[error("Collaborator timed out after {0} ms")]
    Timeout(u64),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn embedding(msg: impl Into<String>) -> Self {
        Self::Embedding(msg.into())
    }

    pub fn generation(msg: impl Into<String>) -> Self {
        Self::Generation(msg.into())
    }

    pub fn fact_extraction(msg: impl Into<String>) -> Self {
        Self::FactExtraction(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

}

/// Run a collaborator call under a deadline, reporting expiry as [`Error::Timeout`]
pub async fn within<T>(
    timeout: Duration,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| Error::Timeout(timeout.as_millis() as u64))?
}
