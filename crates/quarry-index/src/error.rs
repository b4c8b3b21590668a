//! Error types for quarry-index.

use std::num::TryFromIntError;

/// Errors raised by indexing, storage and job management.
///
/// Per-file and per-batch failures inside a job are recorded as strings in
/// the job report instead of being returned through this type.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// IO error reading source files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// `SQLite` database error.
    #[error("database error: {0}")]
    Sqlite(#[from] sqlx::Error),

    /// `SQLite` migration error.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Vector store error.
    #[error("vector store error: {0}")]
    VectorStore(#[from] quarry_memory::VectorStoreError),

    /// Embedding provider error.
    #[error("LLM error: {0}")]
    Llm(#[from] quarry_llm::LlmError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An external call exceeded its deadline.
    #[error("{operation} timed out")]
    Timeout { operation: &'static str },

    /// Path is absolute, escapes the repository, or cannot be represented.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("invalid job transition: {from} -> {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    /// The collection worker has shut down.
    #[error("job queue closed")]
    QueueClosed,

    #[error("job cancelled")]
    Cancelled,

    /// Integer conversion error.
    #[error("integer conversion failed: {0}")]
    IntConversion(#[from] TryFromIntError),

    /// Generic catch-all error.
    #[error("{0}")]
    Other(String),
}

/// Result type alias using `IndexError`.
pub type Result<T> = std::result::Result<T, IndexError>;
