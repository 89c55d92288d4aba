use thiserror::Error;

/// Custom error type for Tally gateway operations
#[derive(Error, Debug)]
pub enum RemoteError {
    /// Transport-level failure: Tally is down, unreachable, or timed out.
    /// Retryable.
    #[error("Tally unreachable: {0}")]
    Unreachable(String),

    /// Tally answered but refused the request (HTTP error status or a
    /// `<LINEERROR>` in the body). Not retryable.
    #[error("Tally rejected the request: {0}")]
    Rejected(String),

    /// The circuit breaker is open after repeated transport failures.
    #[error("Circuit open; retry in {0}s")]
    CircuitOpen(u64),

    #[error("Failed to parse Tally response: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            RemoteError::Unreachable(err.to_string())
        } else if err.is_status() {
            RemoteError::Rejected(err.to_string())
        } else {
            RemoteError::Unreachable(err.to_string())
        }
    }
}

/// Result type for gateway operations
pub type Result<T> = std::result::Result<T, RemoteError>;
