//! Error types for branch database routing.

use thiserror::Error;

/// Errors that can occur while routing operations to branch databases.
#[derive(Error, Debug)]
pub enum BranchDbError {
    /// Branch connection settings are missing or inconsistent for the
    /// chosen dialect. Raised at descriptor build time.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The dialect driver could not establish or use a connection built
    /// from a descriptor. Raised at first use of a context, never at
    /// factory time.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A schema ensure/migrate step failed for one branch.
    #[error("Schema error: {0}")]
    Schema(String),

    /// Branch not found in the registry.
    #[error("Branch not found: {0}")]
    NotFound(String),

    /// Branch has been deactivated.
    #[error("Branch is inactive: {0}")]
    Inactive(String),

    /// Registry/storage error.
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Result type alias for branch database operations.
pub type BranchDbResult<T> = Result<T, BranchDbError>;

impl From<serde_json::Error> for BranchDbError {
    fn from(err: serde_json::Error) -> Self {
        BranchDbError::Storage(err.to_string())
    }
}

impl From<std::io::Error> for BranchDbError {
    fn from(err: std::io::Error) -> Self {
        BranchDbError::Configuration(err.to_string())
    }
}
