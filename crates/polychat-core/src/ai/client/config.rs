//! Endpoint description for OpenAI-compatible backends
//!
//! Everything that differs between two OpenAI-compatible services is data
//! on `ProviderSpec`: endpoints, auth style, extra headers, alias table,
//! default catalog, and a couple of hook functions for payload quirks.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::ai::types::AiModel;

/// How to send the API key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthHeader {
    /// `Authorization: Bearer <key>`
    #[default]
    Bearer,
    /// No authentication
    None,
}

/// Mutates the request body after the common fields are set
///
/// Receives the body object and the resolved model id.
pub type PayloadHook = fn(&mut Map<String, Value>, &str);

/// Decides whether a fetched model is kept in the catalog
pub type ModelFilter = fn(&AiModel) -> bool;

/// Static description of one OpenAI-compatible backend
#[derive(Debug, Clone)]
pub struct ProviderSpec {
    /// Unique identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Full URL of the chat completions endpoint
    pub chat_url: String,
    /// Full URL of the models endpoint, `None` if the backend has none
    pub models_url: Option<String>,
    /// How to send authentication
    pub auth_header: AuthHeader,
    /// Whether chat is refused without an API key
    pub requires_api_key: bool,
    /// Extra headers sent with every request
    pub custom_headers: Vec<(String, String)>,
    /// Short name -> backend model id
    pub aliases: HashMap<String, String>,
    /// Catalog used when the models endpoint is unusable
    pub default_models: Vec<AiModel>,
    /// Model used when the request names none
    pub default_model: Option<String>,
    pub transform_payload: Option<PayloadHook>,
    pub model_filter: Option<ModelFilter>,
}

impl ProviderSpec {
    /// Description with the conventional `/chat/completions` and `/models` endpoints
    pub fn new(id: &str, name: &str, api_base: &str) -> Self {
        let base = api_base.trim_end_matches('/');
        Self {
            id: id.to_string(),
            name: name.to_string(),
            chat_url: format!("{}/chat/completions", base),
            models_url: Some(format!("{}/models", base)),
            auth_header: AuthHeader::default(),
            requires_api_key: false,
            custom_headers: Vec::new(),
            aliases: HashMap::new(),
            default_models: Vec::new(),
            default_model: None,
            transform_payload: None,
            model_filter: None,
        }
    }

    pub fn with_chat_url(mut self, url: &str) -> Self {
        self.chat_url = url.to_string();
        self
    }

    pub fn with_models_url(mut self, url: Option<&str>) -> Self {
        self.models_url = url.map(str::to_string);
        self
    }

    pub fn with_auth(mut self, auth_header: AuthHeader, requires_api_key: bool) -> Self {
        self.auth_header = auth_header;
        self.requires_api_key = requires_api_key;
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.custom_headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_alias(mut self, alias: &str, model_id: &str) -> Self {
        self.aliases.insert(alias.to_string(), model_id.to_string());
        self
    }

    /// Set the default catalog; the first entry becomes the default model
    /// unless one was set explicitly
    pub fn with_default_models(mut self, models: Vec<AiModel>) -> Self {
        if self.default_model.is_none() {
            self.default_model = models.first().map(|m| m.id.clone());
        }
        self.default_models = models;
        self
    }

    pub fn with_default_model(mut self, model_id: &str) -> Self {
        self.default_model = Some(model_id.to_string());
        self
    }

    pub fn with_payload_hook(mut self, hook: PayloadHook) -> Self {
        self.transform_payload = Some(hook);
        self
    }

    pub fn with_model_filter(mut self, filter: ModelFilter) -> Self {
        self.model_filter = Some(filter);
        self
    }

    /// Backend model id for a request
    ///
    /// Aliases map to their target, anything else passes through. With no
    /// model given the default is used. `None` when nothing is known.
    pub fn resolve_model(&self, requested: Option<&str>) -> Option<String> {
        match requested.map(str::trim).filter(|m| !m.is_empty()) {
            Some(model) => Some(
                self.aliases
                    .get(model)
                    .cloned()
                    .unwrap_or_else(|| model.to_string()),
            ),
            None => self.default_model.clone(),
        }
    }
}
