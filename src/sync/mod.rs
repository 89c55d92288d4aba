// Module declarations
pub(crate) mod engine;
pub(crate) mod session_model;
pub(crate) mod session_repository;
pub(crate) mod sync_errors;
pub(crate) mod sync_service;

// Re-export the public interface
pub use engine::{CancelToken, ReconciliationEngine, SyncProgress};
pub use session_model::{
    SessionStatus, SyncCounts, SyncReport, SyncSession, SyncType,
};
pub use session_repository::SessionRepository;
pub use sync_errors::SyncError;
pub use sync_service::SyncService;
