//! Error types for nassh core library.

use thiserror::Error;

/// Result type alias using nassh Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for nassh operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed plugin message
    #[error("Failed to parse plugin message: {0}")]
    WireParse(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
