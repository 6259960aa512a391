//! Error types for the ingestion layer.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during ingestion.
#[derive(Error, Debug)]
pub enum Error {
    /// SQLite error.
    #[error("Database error: {0}")]
    Database(String),

    /// RocksDB error.
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport-level HTTP error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Chain endpoint answered with a non-success status.
    #[error("Chain returned HTTP {status} for {url}: {body}")]
    ChainStatus {
        status: u16,
        url: String,
        body: String,
    },

    /// Operation exceeded its deadline.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Chain response did not have the expected shape.
    #[error("Unexpected chain response: {0}")]
    ChainResponse(String),

    /// Optimistic concurrency check failed on a staker save.
    #[error(
        "Version conflict on staker {staker_address}: expected {expected}, found {found:?}"
    )]
    VersionConflict {
        staker_address: String,
        expected: u64,
        /// `None` when the row vanished or never existed.
        found: Option<u64>,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Domain codec or validation error.
    #[error(transparent)]
    Core(#[from] staketrail_core::Error),
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(e.to_string())
    }
}

impl Error {
    /// Whether the failure belongs to the transient upstream class
    /// (timeout, connect or reset, HTTP 5xx or 429).
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::ChainStatus { status, .. } => is_retryable_status(*status),
            Self::Http(e) => {
                if e.is_connect() || e.is_timeout() {
                    return true;
                }
                if let Some(status) = e.status() {
                    return is_retryable_status(status.as_u16());
                }
                let msg = e.to_string().to_lowercase();
                msg.contains("connection closed")
                    || msg.contains("connection reset")
                    || msg.contains("broken pipe")
                    || msg.contains("unexpected eof")
            }
            _ => false,
        }
    }

    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}

fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}
