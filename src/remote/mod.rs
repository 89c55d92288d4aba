// Module declarations
pub(crate) mod remote_client;
pub(crate) mod remote_errors;
pub(crate) mod remote_traits;
pub(crate) mod retry;

// Re-export the public interface
pub use remote_client::TallyClient;
pub use remote_errors::RemoteError;
pub use remote_traits::{AlterIds, CompanyProfile, RemoteSource};
pub use retry::{CircuitBreaker, RetryPolicy};

#[cfg(test)]
pub use remote_traits::mock::MockRemote;
