//! Persistence boundary for registry configuration

use anyhow::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::ai::types::{AiModel, ModelConfig};

/// Everything the registry persists
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub model_configs: Vec<ModelConfig>,
    #[serde(default)]
    pub custom_models: Vec<AiModel>,
}

/// Load/save registry configuration
///
/// `load` is called once at registry construction, `save` after every
/// mutation. Implementations must be safe to call from async code; they
/// are expected to be quick.
pub trait ConfigStore: Send + Sync {
    fn load(&self) -> Result<RegistryConfig>;
    fn save(&self, config: &RegistryConfig) -> Result<()>;
}

/// In-process store for tests and ephemeral runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    config: Mutex<RegistryConfig>,
    saves: Mutex<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with `config`
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            config: Mutex::new(config),
            saves: Mutex::new(0),
        }
    }

    /// Last saved (or seeded) configuration
    pub fn snapshot(&self) -> RegistryConfig {
        self.config.lock().clone()
    }

    /// Number of successful saves
    pub fn save_count(&self) -> usize {
        *self.saves.lock()
    }
}

impl ConfigStore for MemoryStore {
    fn load(&self) -> Result<RegistryConfig> {
        Ok(self.snapshot())
    }

    fn save(&self, config: &RegistryConfig) -> Result<()> {
        *self.config.lock() = config.clone();
        *self.saves.lock() += 1;
        Ok(())
    }
}
