//! Error types for the staketrail domain layer.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while decoding or validating domain data.
#[derive(Error, Debug)]
pub enum Error {
    /// A field has an invalid format (e.g., unknown state name).
    #[error("invalid field '{field}': {reason}")]
    InvalidField {
        /// The name of the invalid field.
        field: &'static str,
        /// Description of what's wrong.
        reason: String,
    },

    /// Hex decoding error.
    #[error("hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),

    /// Raw Bitcoin transaction could not be consensus-decoded.
    #[error("transaction decode error: {0}")]
    TxDecode(String),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
