use diesel::result::Error as DieselError;
use thiserror::Error;

use crate::audit::AuditError;
use crate::mapping::MappingError;
use crate::remote::RemoteError;
use crate::store::StoreError;
use crate::sync::SyncError;

// Create a type alias for Result using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Root error type for the sync engine
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database operation failed: {0}")]
    Database(#[from] DatabaseError),

    #[error("Mapping configuration failed: {0}")]
    Mapping(#[from] MappingError),

    #[error("Tally gateway error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Mirror store error: {0}")]
    Store(#[from] StoreError),

    #[error("Audit trail error: {0}")]
    Audit(#[from] AuditError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),
}

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Failed to connect to database: {0}")]
    ConnectionFailed(#[from] diesel::result::ConnectionError),

    #[error("Failed to create database pool: {0}")]
    PoolCreationFailed(#[from] r2d2::Error),

    #[error("Database query failed: {0}")]
    QueryFailed(#[from] DieselError),

    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    #[error("Database I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// Add From implementation for std::io::Error
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Database(DatabaseError::Io(err))
    }
}

// Implement From for DieselError to Error directly
impl From<DieselError> for Error {
    fn from(err: DieselError) -> Self {
        Error::Database(DatabaseError::QueryFailed(err))
    }
}

impl From<r2d2::Error> for Error {
    fn from(err: r2d2::Error) -> Self {
        Error::Database(DatabaseError::PoolCreationFailed(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Mapping(MappingError::InvalidDocument(err.to_string()))
    }
}
