//! Persistence layer
//!
//! The registry's durable state is two lists: per-model user preferences and
//! user-added custom models. `ConfigStore` is the only place that knows how
//! they are laid out on disk.

mod config_store;
mod json_file;

pub use config_store::{ConfigStore, MemoryStore, RegistryConfig};
pub use json_file::JsonFileStore;
