use std::time::Duration;

use thiserror::Error;

use crate::migration::{Direction, Version};

/// Core error type for strata operations.
#[derive(Error, Debug)]
pub enum StrataError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Source error: {0}")]
    Source(String),

    #[error("Version store is not initialized")]
    StoreUninitialized,

    #[error("Database is dirty at version {version}; fix it manually and force a version")]
    Dirty { version: Version },

    #[error("Migration {version} ({direction}) failed: {cause}")]
    Execution {
        version: Version,
        direction: Direction,
        cause: String,
    },

    #[error("Migration {version} has no {direction} script")]
    MissingScript {
        version: Version,
        direction: Direction,
    },

    #[error("Requested {requested} steps but only {available} are available")]
    ShortLimit { requested: u64, available: u64 },

    #[error("No change")]
    NoChange,

    #[error("Timed out after {waited:?} waiting for the migration lock")]
    LockTimeout { waited: Duration },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl StrataError {
    /// The requested transition was already satisfied.
    pub fn is_no_change(&self) -> bool {
        matches!(self, StrataError::NoChange)
    }

    /// Whether retrying the same call later may succeed without operator action.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StrataError::LockTimeout { .. })
    }
}

/// Result type alias using StrataError.
pub type Result<T> = std::result::Result<T, StrataError>;
