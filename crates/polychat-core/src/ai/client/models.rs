//! Model catalog fetching and the `Provider` impl for the generic client

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::core::{ClientInner, OpenAiCompatibleClient};
use super::streaming::send_request;
use crate::ai::error::ChatError;
use crate::ai::provider::Provider;
use crate::ai::retry::{with_retry, RetryConfig};
use crate::ai::streaming::ChatStream;
use crate::ai::types::{AiModel, ChatRequest};

impl ClientInner {
    /// Fetch and parse the models endpoint
    ///
    /// `Ok(None)` when the backend has no models endpoint.
    async fn fetch_models(&self) -> Result<Option<Vec<AiModel>>, ChatError> {
        let Some(url) = self.spec.models_url.as_deref() else {
            return Ok(None);
        };

        info!(provider = %self.spec.id, "Fetching models from {}", url);
        let response = with_retry(&RetryConfig::gentle(), || {
            send_request(self.build_models_request(url))
        })
        .await?;

        let json: Value = response
            .json()
            .await
            .map_err(|e| ChatError::Parse(e.to_string()))?;
        let models = parse_models_response(&self.spec.id, &json)
            .into_iter()
            .filter(|m| self.spec.model_filter.is_none_or(|keep| keep(m)))
            .collect::<Vec<_>>();

        info!(provider = %self.spec.id, "Models endpoint returned {} usable models", models.len());
        Ok(Some(models))
    }
}

/// Parse `{"data": [...]}` or a bare array into models owned by `provider_id`
///
/// Entries may be plain strings or objects carrying `id` (or `name`) plus
/// optional capability hints. Unrecognized entries are skipped.
pub fn parse_models_response(provider_id: &str, json: &Value) -> Vec<AiModel> {
    let entries = match json {
        Value::Array(entries) => entries,
        other => match other.get("data").and_then(|d| d.as_array()) {
            Some(entries) => entries,
            None => {
                debug!("Models response has neither data[] nor a top-level array");
                return Vec::new();
            }
        },
    };

    entries
        .iter()
        .filter_map(|entry| parse_model_entry(provider_id, entry))
        .collect()
}

fn parse_model_entry(provider_id: &str, entry: &Value) -> Option<AiModel> {
    if let Some(id) = entry.as_str() {
        return Some(AiModel::new(id, id, provider_id));
    }

    let text = |key: &str| {
        entry
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    };
    let id = text("id").or_else(|| text("name"))?;
    let display = text("name").filter(|n| *n != id).unwrap_or(id);

    let flag = |key: &str| entry.get(key).and_then(|v| v.as_bool()).unwrap_or(false);
    let supported = |param: &str| {
        entry
            .get("supported_parameters")
            .and_then(|p| p.as_array())
            .is_some_and(|p| p.iter().any(|v| v.as_str() == Some(param)))
    };
    let image_input = entry
        .pointer("/architecture/input_modalities")
        .or_else(|| entry.get("input_modalities"))
        .and_then(|m| m.as_array())
        .is_some_and(|m| m.iter().any(|v| v.as_str() == Some("image")));

    let vision = flag("vision") || image_input;
    let tools = flag("tools") || supported("tools");
    let reasoning = flag("reasoning") || supported("reasoning");

    let mut model = AiModel::new(id, display, provider_id).with_capabilities(vision, tools, reasoning);
    if let Some(description) = text("description") {
        model = model.with_description(description);
    }
    let max_tokens = ["max_completion_tokens", "context_length", "context_window"]
        .iter()
        .find_map(|key| entry.get(*key).and_then(|v| v.as_u64()))
        .or_else(|| {
            entry
                .pointer("/top_provider/max_completion_tokens")
                .and_then(|v| v.as_u64())
        });
    if let Some(max) = max_tokens {
        model = model.with_max_tokens(max.min(u32::MAX as u64) as u32);
    }
    Some(model)
}

#[async_trait]
impl Provider for OpenAiCompatibleClient {
    fn id(&self) -> &str {
        &self.inner.spec.id
    }

    fn name(&self) -> &str {
        &self.inner.spec.name
    }

    fn is_available(&self) -> bool {
        !self.inner.spec.requires_api_key || self.inner.api_key.is_some()
    }

    async fn get_models(&self) -> Vec<AiModel> {
        if let Some(cached) = self.inner.cache.get() {
            return cached;
        }

        match self.inner.fetch_models().await {
            Ok(Some(models)) if !models.is_empty() => {
                self.inner.cache.set(models.clone());
                models
            }
            Ok(_) => {
                debug!(provider = %self.inner.spec.id, "Using default model list");
                self.inner.spec.default_models.clone()
            }
            Err(e) => {
                warn!(
                    provider = %self.inner.spec.id,
                    "Model fetch failed, using defaults: {}", e
                );
                self.inner.spec.default_models.clone()
            }
        }
    }

    async fn refresh_models(&self) -> bool {
        match self.inner.fetch_models().await {
            Ok(Some(models)) if !models.is_empty() => {
                self.inner.cache.set(models);
                true
            }
            Ok(Some(_)) => {
                warn!(provider = %self.inner.spec.id, "Refresh returned no usable models");
                false
            }
            // Nothing to refresh for a static catalog
            Ok(None) => true,
            Err(e) => {
                warn!(provider = %self.inner.spec.id, "Model refresh failed: {}", e);
                false
            }
        }
    }

    fn chat(&self, request: ChatRequest) -> ChatStream {
        OpenAiCompatibleClient::chat(self, request)
    }
}
