//! User settings (`~/.polychat/settings.toml`)
//!
//! ```toml
//! [retry]
//! max_retries = 3
//!
//! [providers.groq]
//! api_key = "gsk_..."
//!
//! [providers.duckchat]
//! enabled = false
//!
//! [[custom_endpoints]]
//! id = "local"
//! name = "Local Ollama"
//! base_url = "http://localhost:11434/v1"
//! models = ["llama3.2"]
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::ai::providers::{custom, duckchat, groq, openrouter, pollinations};
use crate::ai::retry::RetryConfig;
use crate::ai::Provider;
use crate::paths;

/// Per-provider switches
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

/// Chat retry overrides; unset fields keep the defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    pub max_retries: Option<u32>,
    pub initial_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
}

/// A user-defined OpenAI-compatible backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomEndpoint {
    pub id: String,
    pub name: String,
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default)]
    pub models: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderSettings>,
    #[serde(default)]
    pub custom_endpoints: Vec<CustomEndpoint>,
}

impl Settings {
    /// Load from the default location with environment overrides applied
    pub fn load() -> Result<Self> {
        Ok(Self::load_from_path(&paths::settings_file())?
            .with_env_overrides(|name| std::env::var(name).ok()))
    }

    /// Load from a file; a missing file yields defaults
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No settings file at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let settings = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(settings)
    }

    /// Apply API keys from the environment
    ///
    /// `OPENROUTER_API_KEY`, `GROQ_API_KEY`, and `POLYCHAT_<ID>_API_KEY` for
    /// custom endpoints. Environment values win over the file.
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        for (provider_id, var) in [
            (openrouter::PROVIDER_ID, "OPENROUTER_API_KEY"),
            (groq::PROVIDER_ID, "GROQ_API_KEY"),
        ] {
            if let Some(key) = non_empty(var) {
                debug!("API key for {} taken from {}", provider_id, var);
                self.providers
                    .entry(provider_id.to_string())
                    .or_default()
                    .api_key = Some(key);
            }
        }
        for endpoint in &mut self.custom_endpoints {
            if let Some(key) = non_empty(&custom_key_var(&endpoint.id)) {
                endpoint.api_key = Some(key);
            }
        }
        self
    }

    /// Providers are on unless switched off
    pub fn provider_enabled(&self, provider_id: &str) -> bool {
        self.providers
            .get(provider_id)
            .and_then(|p| p.enabled)
            .unwrap_or(true)
    }

    pub fn api_key(&self, provider_id: &str) -> Option<String> {
        self.providers
            .get(provider_id)
            .and_then(|p| p.api_key.clone())
            .filter(|k| !k.trim().is_empty())
    }

    pub fn retry_config(&self) -> RetryConfig {
        let defaults = RetryConfig::default();
        RetryConfig {
            max_retries: self.retry.max_retries.unwrap_or(defaults.max_retries),
            initial_delay: self
                .retry
                .initial_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.initial_delay),
            max_delay: self
                .retry
                .max_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_delay),
            jitter: defaults.jitter,
        }
    }

    /// Construct every enabled provider, built-ins first
    pub fn build_providers(&self) -> Vec<Arc<dyn Provider>> {
        let retry = self.retry_config();
        let mut providers: Vec<Arc<dyn Provider>> = Vec::new();

        if self.provider_enabled(openrouter::PROVIDER_ID) {
            let client = openrouter::create(self.api_key(openrouter::PROVIDER_ID));
            providers.push(Arc::new(client.with_retry_config(retry.clone())));
        }
        if self.provider_enabled(groq::PROVIDER_ID) {
            let client = groq::create(self.api_key(groq::PROVIDER_ID));
            providers.push(Arc::new(client.with_retry_config(retry.clone())));
        }
        if self.provider_enabled(pollinations::PROVIDER_ID) {
            let client = pollinations::create();
            providers.push(Arc::new(client.with_retry_config(retry.clone())));
        }
        if self.provider_enabled(duckchat::PROVIDER_ID) {
            providers.push(Arc::new(duckchat::DuckChatProvider::with_base_url(
                duckchat::API_BASE,
                retry.clone(),
            )));
        }
        for endpoint in &self.custom_endpoints {
            if !self.provider_enabled(&endpoint.id) {
                continue;
            }
            let client = custom::create(
                &endpoint.id,
                &endpoint.name,
                &endpoint.base_url,
                endpoint.api_key.clone(),
                &endpoint.models,
            );
            providers.push(Arc::new(client.with_retry_config(retry.clone())));
        }

        info!(count = providers.len(), "Providers configured");
        providers
    }
}

/// `POLYCHAT_<ID>_API_KEY`, id upper-cased with non-alphanumerics as `_`
pub fn custom_key_var(endpoint_id: &str) -> String {
    let id: String = endpoint_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("POLYCHAT_{}_API_KEY", id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
[retry]
max_retries = 5
initial_delay_ms = 100

[providers.groq]
api_key = "gsk_file"

[providers.duckchat]
enabled = false

[[custom_endpoints]]
id = "local-llm"
name = "Local"
base_url = "http://localhost:11434/v1"
models = ["llama3.2"]
"#;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::load_from_path(&dir.path().join("settings.toml")).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.retry_config(), RetryConfig::default());
    }

    #[test]
    fn test_parse_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, SAMPLE).unwrap();
        let settings = Settings::load_from_path(&path).unwrap();

        assert_eq!(settings.api_key("groq").as_deref(), Some("gsk_file"));
        assert!(!settings.provider_enabled("duckchat"));
        assert!(settings.provider_enabled("openrouter"));
        assert_eq!(settings.custom_endpoints[0].models, vec!["llama3.2"]);

        let retry = settings.retry_config();
        assert_eq!(retry.max_retries, 5);
        assert_eq!(retry.initial_delay, Duration::from_millis(100));
        assert_eq!(retry.max_delay, RetryConfig::default().max_delay);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "[retry\nmax_retries = ").unwrap();
        assert!(Settings::load_from_path(&path).is_err());
    }

    #[test]
    fn test_env_overrides_win() {
        let settings: Settings = toml::from_str(SAMPLE).unwrap();
        let env: HashMap<&str, &str> = HashMap::from([
            ("GROQ_API_KEY", "gsk_env"),
            ("OPENROUTER_API_KEY", "sk-or-env"),
            ("POLYCHAT_LOCAL_LLM_API_KEY", "local-key"),
        ]);
        let settings = settings.with_env_overrides(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(settings.api_key("groq").as_deref(), Some("gsk_env"));
        assert_eq!(settings.api_key("openrouter").as_deref(), Some("sk-or-env"));
        assert_eq!(
            settings.custom_endpoints[0].api_key.as_deref(),
            Some("local-key")
        );
    }

    #[test]
    fn test_blank_env_value_ignored() {
        let settings: Settings = toml::from_str(SAMPLE).unwrap();
        let settings = settings.with_env_overrides(|name| {
            (name == "GROQ_API_KEY").then(|| "  ".to_string())
        });
        assert_eq!(settings.api_key("groq").as_deref(), Some("gsk_file"));
    }

    #[test]
    fn test_build_providers_respects_switches() {
        let settings: Settings = toml::from_str(SAMPLE).unwrap();
        let providers = settings.build_providers();
        let ids: Vec<&str> = providers.iter().map(|p| p.id()).collect();
        assert_eq!(ids, vec!["openrouter", "groq", "pollinations", "local-llm"]);

        // No OpenRouter key in the file
        assert!(!providers[0].is_available());
        assert!(providers[1].is_available());
    }

    #[test]
    fn test_custom_key_var() {
        assert_eq!(custom_key_var("local-llm"), "POLYCHAT_LOCAL_LLM_API_KEY");
        assert_eq!(custom_key_var("lm.studio"), "POLYCHAT_LM_STUDIO_API_KEY");
    }
}
