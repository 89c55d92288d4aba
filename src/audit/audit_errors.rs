use thiserror::Error;

use crate::store::StoreError;

/// Custom error type for audit trail operations
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The deletion snapshot was already written back once; a second
    /// restore would clobber newer data.
    #[error("Deleted record {0} has already been restored")]
    AlreadyRestored(i32),

    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("Mirror store error: {0}")]
    Store(#[from] StoreError),
}

impl From<diesel::result::Error> for AuditError {
    fn from(err: diesel::result::Error) -> Self {
        AuditError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for AuditError {
    fn from(err: serde_json::Error) -> Self {
        AuditError::InvalidSnapshot(err.to_string())
    }
}

/// Result type for audit operations
pub type Result<T> = std::result::Result<T, AuditError>;
