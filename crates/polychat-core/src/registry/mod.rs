//! Model registry: provider aggregation, user preferences, persistence

mod model_registry;
mod state;

pub use model_registry::ModelRegistry;
pub use state::{ModelsSnapshot, ModelsState};
