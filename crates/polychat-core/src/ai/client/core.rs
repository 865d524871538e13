//! Core OpenAI-compatible client
//!
//! One `OpenAiCompatibleClient` per configured backend. The client is cheap
//! to clone; every `chat` call moves a handle to the shared state into its
//! own task.

use std::sync::Arc;

use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use tracing::{debug, error};

use super::config::{AuthHeader, ProviderSpec};
use crate::ai::provider::ModelCache;
use crate::ai::retry::RetryConfig;
use crate::constants;

/// Create the HTTP client with configuration suited to SSE streaming
///
/// The read timeout applies between body reads, so a long generation that
/// keeps producing chunks is never cut off.
pub fn create_http_client() -> Client {
    Client::builder()
        .user_agent(constants::http::USER_AGENT)
        .connect_timeout(constants::http::CONNECT_TIMEOUT)
        .read_timeout(constants::http::READ_TIMEOUT)
        .build()
        .unwrap_or_else(|e| {
            error!("Failed to build HTTP client: {}. Using default client.", e);
            Client::new()
        })
}

pub(crate) struct ClientInner {
    pub(crate) spec: ProviderSpec,
    pub(crate) api_key: Option<String>,
    pub(crate) http: Client,
    pub(crate) retry: RetryConfig,
    pub(crate) cache: ModelCache,
}

/// Chat client for any backend speaking the OpenAI chat-completions protocol
#[derive(Clone)]
pub struct OpenAiCompatibleClient {
    pub(crate) inner: Arc<ClientInner>,
}

impl OpenAiCompatibleClient {
    /// Create a client; blank keys count as missing
    pub fn new(spec: ProviderSpec, api_key: Option<String>) -> Self {
        Self::with_http_client(spec, api_key, create_http_client())
    }

    /// Create a client sharing an existing connection pool
    pub fn with_http_client(spec: ProviderSpec, api_key: Option<String>, http: Client) -> Self {
        let api_key = api_key.filter(|k| !k.trim().is_empty());
        Self {
            inner: Arc::new(ClientInner {
                spec,
                api_key,
                http,
                retry: RetryConfig::default(),
                cache: ModelCache::new(),
            }),
        }
    }

    /// Replace the retry policy
    ///
    /// Must be called before the client is shared.
    pub fn with_retry_config(self, retry: RetryConfig) -> Self {
        let inner = match Arc::try_unwrap(self.inner) {
            Ok(mut inner) => {
                inner.retry = retry;
                inner
            }
            Err(shared) => ClientInner {
                spec: shared.spec.clone(),
                api_key: shared.api_key.clone(),
                http: shared.http.clone(),
                retry,
                cache: ModelCache::new(),
            },
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Get the provider spec
    pub fn spec(&self) -> &ProviderSpec {
        &self.inner.spec
    }

    /// Get the retry policy
    pub fn retry_config(&self) -> &RetryConfig {
        &self.inner.retry
    }

    pub fn has_api_key(&self) -> bool {
        self.inner.api_key.is_some()
    }
}

impl ClientInner {
    /// POST to the chat endpoint with auth and provider headers
    pub(crate) fn build_chat_request(&self, streaming: bool) -> reqwest::RequestBuilder {
        let accept = if streaming {
            "text/event-stream"
        } else {
            "application/json"
        };
        let request = self
            .http
            .post(&self.spec.chat_url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, accept);
        self.decorate(request)
    }

    /// GET against the models endpoint
    pub(crate) fn build_models_request(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.http.get(url).header(ACCEPT, "application/json");
        self.decorate(request)
    }

    fn decorate(&self, mut request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match (self.spec.auth_header, &self.api_key) {
            (AuthHeader::Bearer, Some(key)) => {
                request = request.header(AUTHORIZATION, format!("Bearer {}", key));
                debug!("Using Bearer authentication for {}", self.spec.id);
            }
            (AuthHeader::Bearer, None) | (AuthHeader::None, _) => {}
        }
        for (name, value) in &self.spec.custom_headers {
            request = request.header(name.as_str(), value.as_str());
        }
        request
    }
}
