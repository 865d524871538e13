//! JSON file store
//!
//! Writes `{"model_configs": [...], "custom_models": [...]}` atomically.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use super::config_store::{ConfigStore, RegistryConfig};
use crate::paths;

/// Registry configuration in a JSON file
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the default location (`~/.polychat/models.json`)
    pub fn default_location() -> Self {
        Self::new(paths::models_file())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStore for JsonFileStore {
    /// Missing file means empty configuration
    fn load(&self) -> Result<RegistryConfig> {
        if !self.path.exists() {
            return Ok(RegistryConfig::default());
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        let config = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse {}", self.path.display()))?;
        Ok(config)
    }

    /// Uses atomic write-to-temp-file-then-rename to prevent corruption
    fn save(&self, config: &RegistryConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let temp_path = self.path.with_extension("tmp");
        let contents = serde_json::to_string_pretty(config)?;
        fs::write(&temp_path, contents)
            .with_context(|| format!("Failed to write {}", temp_path.display()))?;
        fs::rename(&temp_path, &self.path)?;

        debug!("Registry config saved atomically to {:?}", self.path);
        Ok(())
    }
}
