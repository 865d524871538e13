//! DuckDuckGo AI Chat
//!
//! Not OpenAI-compatible. Each chat POST needs an `x-vqd-4` token obtained
//! from the status endpoint, and every response hands back the token for the
//! next request. Stream chunks look like `{"message": "..."}`, failures like
//! `{"action": "error", "type": "...", "status": 429}`.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::ai::client::{create_http_client, send_request, send_with_retries};
use crate::ai::error::ChatError;
use crate::ai::provider::Provider;
use crate::ai::retry::RetryConfig;
use crate::ai::sse::{classify_line, SseLine, SseLineBuffer, DEFAULT_FINISH_REASON};
use crate::ai::streaming::{spawn_chat_task, ChatResponse, ChatStream, EventSink};
use crate::ai::types::{AiModel, ChatMessage, ChatRequest, Role};

pub const PROVIDER_ID: &str = "duckchat";
pub const API_BASE: &str = "https://duckduckgo.com";

const VQD_HEADER: &str = "x-vqd-4";
const VQD_ACCEPT_HEADER: &str = "x-vqd-accept";

/// Short names accepted in place of backend ids
const ALIASES: &[(&str, &str)] = &[
    ("gpt", "gpt-4o-mini"),
    ("claude", "claude-3-haiku-20240307"),
    ("llama", "meta-llama/Llama-3.3-70B-Instruct-Turbo"),
    ("mistral", "mistralai/Mistral-Small-24B-Instruct-2501"),
    ("o3", "o3-mini"),
];

struct DuckInner {
    http: reqwest::Client,
    status_url: String,
    chat_url: String,
    retry: RetryConfig,
    vqd: Mutex<Option<String>>,
}

/// DuckDuckGo AI Chat provider
#[derive(Clone)]
pub struct DuckChatProvider {
    inner: Arc<DuckInner>,
}

impl Default for DuckChatProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl DuckChatProvider {
    pub fn new() -> Self {
        Self::with_base_url(API_BASE, RetryConfig::default())
    }

    /// Provider against another host (mirrors, tests)
    pub fn with_base_url(base_url: &str, retry: RetryConfig) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            inner: Arc::new(DuckInner {
                http: create_http_client(),
                status_url: format!("{}/duckchat/v1/status", base),
                chat_url: format!("{}/duckchat/v1/chat", base),
                retry,
                vqd: Mutex::new(None),
            }),
        }
    }

    pub fn default_models() -> Vec<AiModel> {
        vec![
            AiModel::new("gpt-4o-mini", "GPT-4o mini", PROVIDER_ID)
                .with_description("OpenAI, via DuckDuckGo"),
            AiModel::new("claude-3-haiku-20240307", "Claude 3 Haiku", PROVIDER_ID)
                .with_description("Anthropic, via DuckDuckGo"),
            AiModel::new(
                "meta-llama/Llama-3.3-70B-Instruct-Turbo",
                "Llama 3.3 70B",
                PROVIDER_ID,
            )
            .with_description("Meta, via DuckDuckGo"),
            AiModel::new(
                "mistralai/Mistral-Small-24B-Instruct-2501",
                "Mistral Small 3",
                PROVIDER_ID,
            )
            .with_description("Mistral AI, via DuckDuckGo"),
            AiModel::new("o3-mini", "o3-mini", PROVIDER_ID)
                .with_description("OpenAI, via DuckDuckGo")
                .with_capabilities(false, false, true),
        ]
    }
}

/// Backend model id for a request
pub fn resolve_model(requested: Option<&str>) -> String {
    match requested.map(str::trim).filter(|m| !m.is_empty()) {
        Some(model) => ALIASES
            .iter()
            .find(|(alias, _)| *alias == model)
            .map(|(_, id)| (*id).to_string())
            .unwrap_or_else(|| model.to_string()),
        None => ALIASES[0].1.to_string(),
    }
}

/// The service only accepts user and assistant turns
///
/// System prompts are prepended to the first user turn, tool results are
/// passed along as user text.
pub fn convert_messages(messages: &[ChatMessage]) -> Vec<Value> {
    let system = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    let mut pending_system = (!system.is_empty()).then_some(system);

    let mut converted = Vec::new();
    for message in messages {
        let (role, content) = match message.role {
            Role::System => continue,
            Role::Assistant => ("assistant", message.content.clone()),
            Role::User => match pending_system.take() {
                Some(system) => ("user", format!("{}\n\n{}", system, message.content)),
                None => ("user", message.content.clone()),
            },
            Role::Tool => (
                "user",
                format!(
                    "Tool result ({}): {}",
                    message.name.as_deref().unwrap_or("tool"),
                    message.content
                ),
            ),
        };
        converted.push(json!({"role": role, "content": content}));
    }
    if let Some(system) = pending_system {
        converted.insert(0, json!({"role": "user", "content": system}));
    }
    converted
}

impl DuckInner {
    /// Cached token, or a fresh one from the status endpoint
    async fn token(&self) -> Result<String, ChatError> {
        if let Some(token) = self.vqd.lock().clone() {
            return Ok(token);
        }

        debug!("Requesting DuckChat token");
        let response = send_request(
            self.http
                .get(&self.status_url)
                .header(VQD_ACCEPT_HEADER, "1")
                .header("cache-control", "no-store"),
        )
        .await?;
        let token = header_token(&response).ok_or_else(|| ChatError::Provider {
            code: "vqd_missing".to_string(),
            message: "status endpoint returned no x-vqd-4 token".to_string(),
        })?;
        *self.vqd.lock() = Some(token.clone());
        Ok(token)
    }

    async fn attempt(&self, body: &Value) -> Result<reqwest::Response, ChatError> {
        let token = self.token().await?;
        let request = self
            .http
            .post(&self.chat_url)
            .header("content-type", "application/json")
            .header("accept", "text/event-stream")
            .header(VQD_HEADER, token)
            .json(body);

        match send_request(request).await {
            Ok(response) => {
                if let Some(next) = header_token(&response) {
                    *self.vqd.lock() = Some(next);
                }
                Ok(response)
            }
            Err(e) => {
                // A rejected token is never reusable
                *self.vqd.lock() = None;
                Err(e)
            }
        }
    }

    async fn run_chat(&self, request: ChatRequest, sink: EventSink) {
        let model = resolve_model(request.model.as_deref());
        info!(
            provider = PROVIDER_ID,
            model = %model,
            messages = request.messages.len(),
            "=== CHAT START ==="
        );

        let body = json!({
            "model": model,
            "messages": convert_messages(&request.messages),
        });
        let Some(response) =
            send_with_retries(PROVIDER_ID, &model, &self.retry, &sink, || self.attempt(&body)).await
        else {
            return;
        };

        let mut stream = response.bytes_stream();
        let mut buffer = SseLineBuffer::new();
        let mut state = DuckStreamState::new(request.stream);

        while let Some(chunk) = stream.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => {
                    let err = ChatError::StreamInterrupted(ChatError::from_reqwest(&e).to_string());
                    sink.emit(err.to_event()).await;
                    return;
                }
            };
            let lines = match buffer.push(&bytes) {
                Ok(lines) => lines,
                Err(err) => {
                    sink.emit(err.to_event()).await;
                    return;
                }
            };
            for line in lines {
                let (events, finished) = state.handle_line(&line);
                if !sink.emit_all(events).await || finished {
                    return;
                }
            }
        }
        if let Some(line) = buffer.finish() {
            let (events, finished) = state.handle_line(&line);
            if !sink.emit_all(events).await || finished {
                return;
            }
        }
        sink.emit_all(state.finish()).await;
    }
}

fn header_token(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(VQD_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Line parser for DuckChat's chunk shape
///
/// In non-streaming mode deltas are withheld and only the aggregate is sent.
#[derive(Debug)]
pub struct DuckStreamState {
    stream: bool,
    content: String,
}

impl DuckStreamState {
    pub fn new(stream: bool) -> Self {
        Self {
            stream,
            content: String::new(),
        }
    }

    /// Events for one line and whether the stream is over
    pub fn handle_line(&mut self, line: &str) -> (Vec<ChatResponse>, bool) {
        let data = match classify_line(line) {
            SseLine::Ignored => return (Vec::new(), false),
            SseLine::Done => return (self.finish(), true),
            SseLine::Data(data) => data,
        };
        let json: Value = match serde_json::from_str(data) {
            Ok(json) => json,
            Err(e) => {
                warn!("Skipping malformed DuckChat chunk ({}): {}", e, data);
                return (Vec::new(), false);
            }
        };

        if json.get("action").and_then(|a| a.as_str()) == Some("error") {
            let code = json
                .get("type")
                .and_then(|t| t.as_str())
                .unwrap_or("provider_error")
                .to_string();
            let status = json.get("status").and_then(|s| s.as_u64()).unwrap_or(0);
            let err = ChatError::Provider {
                message: format!("{} (status {})", code, status),
                code,
            };
            return (vec![err.to_event()], true);
        }

        match json.get("message").and_then(|m| m.as_str()) {
            Some(text) if !text.is_empty() => {
                self.content.push_str(text);
                let events = if self.stream {
                    vec![ChatResponse::Content {
                        text: text.to_string(),
                        is_complete: false,
                    }]
                } else {
                    Vec::new()
                };
                (events, false)
            }
            _ => (Vec::new(), false),
        }
    }

    pub fn finish(&mut self) -> Vec<ChatResponse> {
        let mut events = Vec::new();
        if !self.content.is_empty() {
            events.push(ChatResponse::Content {
                text: std::mem::take(&mut self.content),
                is_complete: true,
            });
        }
        events.push(ChatResponse::done(DEFAULT_FINISH_REASON));
        events
    }
}

#[async_trait]
impl Provider for DuckChatProvider {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    fn name(&self) -> &str {
        "DuckDuckGo AI Chat"
    }

    async fn get_models(&self) -> Vec<AiModel> {
        Self::default_models()
    }

    async fn refresh_models(&self) -> bool {
        true
    }

    fn chat(&self, request: ChatRequest) -> ChatStream {
        let inner = Arc::clone(&self.inner);
        spawn_chat_task(PROVIDER_ID, move |sink| async move {
            inner.run_chat(request, sink).await;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_model() {
        assert_eq!(resolve_model(Some("claude")), "claude-3-haiku-20240307");
        assert_eq!(resolve_model(Some("o3-mini")), "o3-mini");
        assert_eq!(resolve_model(None), "gpt-4o-mini");
    }

    #[test]
    fn test_system_prompt_folded_into_first_user_turn() {
        let converted = convert_messages(&[
            ChatMessage::system("Be brief."),
            ChatMessage::user("Hi"),
            ChatMessage::assistant("Hello"),
            ChatMessage::user("Bye"),
        ]);
        assert_eq!(
            converted,
            vec![
                json!({"role": "user", "content": "Be brief.\n\nHi"}),
                json!({"role": "assistant", "content": "Hello"}),
                json!({"role": "user", "content": "Bye"}),
            ]
        );
    }

    #[test]
    fn test_system_only_conversation() {
        let converted = convert_messages(&[ChatMessage::system("Rules")]);
        assert_eq!(converted, vec![json!({"role": "user", "content": "Rules"})]);
    }

    #[test]
    fn test_stream_state_deltas_and_flush() {
        let mut state = DuckStreamState::new(true);
        let (events, done) = state.handle_line(r#"data: {"message":"Hel","action":"success"}"#);
        assert!(!done);
        assert_eq!(events.len(), 1);
        state.handle_line(r#"data: {"message":"lo"}"#);
        state.handle_line("data: {broken");
        let (events, done) = state.handle_line("data: [DONE]");
        assert!(done);
        assert_eq!(
            events,
            vec![
                ChatResponse::Content {
                    text: "Hello".to_string(),
                    is_complete: true
                },
                ChatResponse::done("stop"),
            ]
        );
    }

    #[test]
    fn test_non_streaming_withholds_deltas() {
        let mut state = DuckStreamState::new(false);
        let (events, _) = state.handle_line(r#"data: {"message":"Hi"}"#);
        assert!(events.is_empty());
        assert_eq!(state.finish().len(), 2);
    }

    #[test]
    fn test_error_action() {
        let mut state = DuckStreamState::new(true);
        let (events, done) = state
            .handle_line(r#"data: {"action":"error","status":429,"type":"ERR_CONVERSATION_LIMIT"}"#);
        assert!(done);
        match &events[..] {
            [ChatResponse::Error {
                code, is_retryable, ..
            }] => {
                assert_eq!(code, "ERR_CONVERSATION_LIMIT");
                assert!(!is_retryable);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
