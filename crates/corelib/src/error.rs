//! Error types for the core library.

use thiserror::Error;

/// Result type alias for the core library.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the core library.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Key rejected before hashing (empty keys never reach the ring).
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Endpoint string could not be parsed.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Partitioner unsuitable for Ketama placement.
    #[error("invalid partitioner: {0}")]
    InvalidPartitioner(String),

    /// Closing a node connection failed.
    #[error("node close failed for {endpoint}: {reason}")]
    NodeClose { endpoint: String, reason: String },
}
