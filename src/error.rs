//! Error types for the chat-archive library.
//!
//! This module provides custom error types using `thiserror` for better error handling
//! and more specific error messages throughout the application.

use thiserror::Error;

/// Errors that can occur in the chat-archive library.
///
/// Lookup misses are represented by [`ArchiveError::NotFound`] and are often
/// not hard errors for callers: an absent moderation record reads as level
/// zero. [`ArchiveError::Ambiguous`] carries the candidate display strings so
/// callers can ask the user to disambiguate instead of guessing. Transport
/// and backend failures (`Database`, `Pool`, `DocumentStore`) abandon the
/// operation; no partial state is assumed valid.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// Lookup yielded nothing
    #[error("not found")]
    NotFound,

    /// A name lookup matched more than one user
    #[error("ambiguous query, candidates: {}", .0.join(", "))]
    Ambiguous(Vec<String>),

    /// Relational backend errors
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Connection pool errors
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Document backend errors
    #[error("document store error: {0}")]
    DocumentStore(#[from] sled::Error),

    /// Document encoding/decoding errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Unparseable lookup input, e.g. a name query with more than two tokens
    #[error("malformed query: {0}")]
    MalformedQuery(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),
}

/// Convenience type alias for Result with ArchiveError
pub type Result<T> = std::result::Result<T, ArchiveError>;

impl ArchiveError {
    /// True when the relational backend reported temporary contention
    /// (SQLITE_BUSY / SQLITE_LOCKED). Such calls are retried a bounded
    /// number of times with a fixed backoff before being surfaced.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        use rusqlite::ErrorCode;

        match self {
            Self::Database(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }

    /// True for the lookup-miss case
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

impl From<anyhow::Error> for ArchiveError {
    fn from(err: anyhow::Error) -> Self {
        ArchiveError::Config(err.to_string())
    }
}
