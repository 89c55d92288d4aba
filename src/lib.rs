pub mod db;

pub mod audit;
pub mod mapping;
pub mod protocol;
pub mod queue;
pub mod remote;
pub mod store;
pub mod sync;

pub mod constants;
pub mod errors;
pub mod schema;

pub use errors::{Error, Result};
