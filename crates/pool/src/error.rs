//! Error types for the server pool.

use corelib::DiscoveryError;
use thiserror::Error;

/// Result type alias for pool operations.
pub type Result<T> = std::result::Result<T, PoolError>;

/// Main error type for the server pool.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The pool has not been started, or has been stopped.
    #[error("server pool not started")]
    NotStarted,

    /// `start` was called on a pool that is already running.
    #[error("server pool already started")]
    AlreadyStarted,

    /// The pool was stopped and cannot be restarted.
    #[error("server pool stopped")]
    Stopped,

    /// The key cannot be routed.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),

    /// Topology discovery failed.
    #[error("discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    /// Errors from the ring and node layer.
    #[error(transparent)]
    Core(corelib::Error),
}

impl From<corelib::Error> for PoolError {
    fn from(err: corelib::Error) -> Self {
        match err {
            corelib::Error::InvalidKey(msg) => PoolError::InvalidKey(msg),
            other => PoolError::Core(other),
        }
    }
}
