use thiserror::Error;

/// Custom error type for mirror store operations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// The existing table shape cannot absorb the mapping, e.g. a column
    /// already exists with a different type or an identifier is invalid.
    #[error("Schema mismatch on '{0}': {1}")]
    SchemaMismatch(String, String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::DatabaseError(err.to_string())
    }
}

impl From<diesel::result::Error> for StoreError {
    fn from(err: diesel::result::Error) -> Self {
        StoreError::DatabaseError(err.to_string())
    }
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;
