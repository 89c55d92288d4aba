// Module declarations
pub(crate) mod company_config_repository;
pub(crate) mod mirror_store;
pub(crate) mod store_errors;
pub(crate) mod store_model;

// Re-export the public interface
pub use company_config_repository::CompanyConfigRepository;
pub use mirror_store::MirrorStore;
pub use store_errors::StoreError;
pub use store_model::CompanyConfig;
