// Module declarations
pub(crate) mod queue_model;
pub(crate) mod queue_service;

// Re-export the public interface
pub use queue_model::{QueueEntry, QueueStatus};
pub use queue_service::SyncQueueService;
