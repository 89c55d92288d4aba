use thiserror::Error;

use crate::audit::AuditError;
use crate::remote::RemoteError;
use crate::store::StoreError;

/// Custom error type for sync runs
#[derive(Error, Debug)]
pub enum SyncError {
    /// A run for this company is already in flight.
    #[error("A sync for company '{0}' is already running")]
    AlreadyRunning(String),

    /// The run observed its cancellation token at a table boundary.
    #[error("Sync was cancelled")]
    Cancelled,

    /// A full sync refused to truncate because the remote looked empty
    /// or unverifiable.
    #[error("Refusing full sync for '{0}': {1}")]
    FullSyncGuard(String, String),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Audit error: {0}")]
    Audit(#[from] AuditError),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<diesel::result::Error> for SyncError {
    fn from(err: diesel::result::Error) -> Self {
        SyncError::DatabaseError(err.to_string())
    }
}

/// Result type for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;
