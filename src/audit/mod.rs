// Module declarations
pub(crate) mod audit_errors;
pub(crate) mod audit_model;
pub(crate) mod audit_repository;
pub(crate) mod audit_service;

// Re-export the public interface
pub use audit_errors::AuditError;
pub use audit_model::{
    AuditAction, AuditFilter, AuditLogEntry, AuditStats, DeletedRecordEntry,
};
pub use audit_repository::AuditRepository;
pub use audit_service::{new_session_id, AuditService};
