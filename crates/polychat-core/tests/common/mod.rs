//! Shared fixtures for HTTP-level tests

#![allow(dead_code)]

use std::time::Duration;

use polychat_core::ai::client::{AuthHeader, OpenAiCompatibleClient, ProviderSpec};
use polychat_core::ai::retry::RetryConfig;
use polychat_core::{AiModel, ChatResponse};
use wiremock::ResponseTemplate;

pub const TEST_KEY: &str = "test-api-key";

/// Millisecond-scale backoff without jitter
pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_retries: 3,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(1000),
        jitter: false,
    }
}

pub fn test_spec(base: &str) -> ProviderSpec {
    ProviderSpec::new("mock", "Mock Provider", base)
        .with_auth(AuthHeader::Bearer, true)
        .with_alias("short", "mock-model-v1")
        .with_default_models(vec![
            AiModel::new("mock-model-v1", "Mock Model", "mock"),
            AiModel::new("mock-model-v2", "Mock Model 2", "mock"),
        ])
}

pub fn test_client(base: &str) -> OpenAiCompatibleClient {
    OpenAiCompatibleClient::new(test_spec(base), Some(TEST_KEY.to_string()))
        .with_retry_config(fast_retry())
}

/// `data: <line>` framing for each chunk plus the trailing `[DONE]`
pub fn sse_body(chunks: &[&str]) -> String {
    let mut body = String::new();
    for chunk in chunks {
        body.push_str("data: ");
        body.push_str(chunk);
        body.push_str("\n\n");
    }
    body.push_str("data: [DONE]\n\n");
    body
}

pub fn sse_response(chunks: &[&str]) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(sse_body(chunks), "text/event-stream")
}

pub fn content_deltas(events: &[ChatResponse]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            ChatResponse::Content {
                text,
                is_complete: false,
            } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

pub fn terminal_count(events: &[ChatResponse]) -> usize {
    events.iter().filter(|e| e.is_terminal()).count()
}
