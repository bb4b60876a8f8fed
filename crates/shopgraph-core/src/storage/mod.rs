//! sled-backed reference store.

mod config;
mod filter;
mod record;
mod sled_backend;

pub use config::StorageConfig;
pub use filter::{compare_values, like_match, values_equal, FilterEvaluator};
pub use record::{StoredEntity, StoredField};
pub use sled_backend::SledBackend;
