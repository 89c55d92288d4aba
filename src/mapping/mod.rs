// Module declarations
pub(crate) mod mapping_errors;
pub(crate) mod mapping_model;

// Re-export the public interface
pub use mapping_errors::{MappingError, Result};
pub use mapping_model::{
    CascadeRule, FieldMapping, MappingSet, SyncScope, TableMapping, TableNature, ValueKind,
};
