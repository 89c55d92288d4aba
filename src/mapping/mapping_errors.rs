use thiserror::Error;

/// Custom error type for mapping configuration problems
#[derive(Debug, Error)]
pub enum MappingError {
    #[error("Invalid mapping document: {0}")]
    InvalidDocument(String),

    #[error("Table '{0}' declares no fields")]
    EmptyFields(String),

    #[error("Duplicate table name '{0}' in mapping set")]
    DuplicateTable(String),

    #[error("Primary table '{0}' is missing the required '{1}' field")]
    MissingKeyField(String, String),

    #[error("Cascade rule on '{0}' references unknown table '{1}'")]
    UnknownCascadeTarget(String, String),
}

impl From<serde_json::Error> for MappingError {
    fn from(err: serde_json::Error) -> Self {
        MappingError::InvalidDocument(err.to_string())
    }
}

/// Result type for mapping operations
pub type Result<T> = std::result::Result<T, MappingError>;
