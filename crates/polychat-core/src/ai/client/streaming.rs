//! Chat calls: the retry loop and response parsing
//!
//! Each attempt announces itself with `ProviderInfo`. Retryable failures
//! before any body is read sleep and loop; once parsing starts the attempt
//! either finishes or ends the stream with an error, it is never replayed.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use tracing::{debug, error, info, warn};

use super::core::{ClientInner, OpenAiCompatibleClient};
use super::request_builder::build_chat_body;
use crate::ai::error::ChatError;
use crate::ai::retry::{retry_after_from_headers, IsRetryable, RetryConfig};
use crate::ai::sse::{parse_completion, LineOutcome, OpenAiStreamState, SseLineBuffer};
use crate::ai::streaming::{spawn_chat_task, ChatResponse, ChatStream, EventSink};
use crate::ai::types::ChatRequest;

/// Run `attempt` until it yields a successful response or the budget is spent
///
/// Emits `ProviderInfo` before every attempt and `RetryNotification` before
/// every backoff sleep. Returns `None` once a terminal event went out or the
/// consumer disappeared.
pub async fn send_with_retries<F, Fut>(
    provider_id: &str,
    model: &str,
    retry: &RetryConfig,
    sink: &EventSink,
    mut attempt: F,
) -> Option<reqwest::Response>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<reqwest::Response, ChatError>>,
{
    let mut retries = 0;

    loop {
        let info = ChatResponse::ProviderInfo {
            provider_id: provider_id.to_string(),
            resolved_model: model.to_string(),
        };
        if !sink.emit(info).await {
            return None;
        }

        let err = match attempt().await {
            Ok(response) => return Some(response),
            Err(err) => err,
        };

        if !err.is_retryable() {
            error!(provider = provider_id, code = err.code(), "Request failed: {}", err);
            sink.emit(err.to_event()).await;
            return None;
        }

        if retries >= retry.max_retries {
            error!(
                provider = provider_id,
                attempts = retries + 1,
                "Retry budget exhausted: {}",
                err
            );
            let exhausted = ChatError::MaxRetriesExceeded {
                attempts: retries + 1,
                last_error: err.to_string(),
            };
            sink.emit(exhausted.to_event()).await;
            return None;
        }

        retries += 1;
        let delay = retry.delay_for(retries, err.retry_after());
        warn!(
            provider = provider_id,
            attempt = retries,
            max_retries = retry.max_retries,
            delay_ms = delay.as_millis() as u64,
            "Retrying after error: {}",
            err
        );
        let notice = ChatResponse::RetryNotification {
            attempt: retries,
            max_attempts: retry.max_retries,
            delay_ms: delay.as_millis() as u64,
            reason: err.to_string(),
        };
        if !sink.emit(notice).await {
            return None;
        }
        tokio::time::sleep(delay).await;
    }
}

/// Send a prepared request and classify the outcome
///
/// Non-success statuses consume the body for the error message.
pub async fn send_request(request: reqwest::RequestBuilder) -> Result<reqwest::Response, ChatError> {
    let response = request
        .send()
        .await
        .map_err(|e| ChatError::from_reqwest(&e))?;

    let status = response.status();
    if status.is_success() {
        debug!("HTTP {}", status);
        return Ok(response);
    }

    let retry_after = retry_after_from_headers(response.headers());
    let body = response.text().await.unwrap_or_default();
    warn!("API error response: {} - {}", status, body);
    Err(ChatError::from_status(status.as_u16(), &body, retry_after))
}

impl OpenAiCompatibleClient {
    /// Start a chat turn on its own task
    pub fn chat(&self, request: ChatRequest) -> ChatStream {
        let inner = Arc::clone(&self.inner);

        if inner.spec.requires_api_key && inner.api_key.is_none() {
            warn!(provider = %inner.spec.id, "Chat refused: no API key configured");
            return ChatStream::from_events(vec![ChatError::Authentication {
                status: 401,
                message: format!("no API key configured for {}", inner.spec.name),
            }
            .to_event()]);
        }

        let label = inner.spec.id.clone();
        spawn_chat_task(&label, move |sink| async move {
            inner.run_chat(request, sink).await;
        })
    }
}

impl ClientInner {
    async fn run_chat(&self, request: ChatRequest, sink: EventSink) {
        let call_start = Instant::now();
        let Some(model) = self.spec.resolve_model(request.model.as_deref()) else {
            sink.emit(
                ChatError::BadRequest {
                    message: "no model specified and provider has no default".to_string(),
                }
                .to_event(),
            )
            .await;
            return;
        };

        info!(
            provider = %self.spec.id,
            model = %model,
            messages = request.messages.len(),
            stream = request.stream,
            "=== CHAT START ==="
        );

        let body = build_chat_body(&self.spec, &model, &request);
        let response = send_with_retries(&self.spec.id, &model, &self.retry, &sink, || {
            send_request(self.build_chat_request(request.stream).json(&body))
        })
        .await;

        if let Some(response) = response {
            if request.stream {
                read_event_stream(response, &sink).await;
            } else {
                read_completion(response, &sink).await;
            }
        }

        info!(
            provider = %self.spec.id,
            elapsed_ms = call_start.elapsed().as_millis() as u64,
            "=== CHAT END ==="
        );
    }
}

/// Parse an SSE body line by line into events
pub(crate) async fn read_event_stream(response: reqwest::Response, sink: &EventSink) {
    let mut stream = response.bytes_stream();
    let mut buffer = SseLineBuffer::new();
    let mut state = OpenAiStreamState::new();
    let mut chunk_count = 0;

    while let Some(chunk) = stream.next().await {
        chunk_count += 1;
        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Stream read error at chunk #{}: {}", chunk_count, e);
                let err = ChatError::StreamInterrupted(ChatError::from_reqwest(&e).to_string());
                sink.emit(err.to_event()).await;
                return;
            }
        };
        let lines = match buffer.push(&bytes) {
            Ok(lines) => lines,
            Err(err) => {
                error!("Abandoning stream at chunk #{}: {}", chunk_count, err);
                sink.emit(err.to_event()).await;
                return;
            }
        };
        for line in lines {
            if !deliver(state.handle_line(&line), sink).await {
                return;
            }
        }
    }

    if let Some(line) = buffer.finish() {
        if !deliver(state.handle_line(&line), sink).await {
            return;
        }
    }

    debug!(
        "Stream ended after {} chunks ({} bytes) without [DONE]",
        chunk_count,
        buffer.bytes_received()
    );
    sink.emit_all(state.finish()).await;
}

/// Emit one line's events; `false` when the stream is over
async fn deliver(outcome: LineOutcome, sink: &EventSink) -> bool {
    match outcome {
        LineOutcome::Continue(events) => sink.emit_all(events).await,
        LineOutcome::Finished(events) => {
            sink.emit_all(events).await;
            false
        }
    }
}

/// Parse a single JSON body into events
pub(crate) async fn read_completion(response: reqwest::Response, sink: &EventSink) {
    let text = match response.text().await {
        Ok(text) => text,
        Err(e) => {
            let err = ChatError::StreamInterrupted(ChatError::from_reqwest(&e).to_string());
            sink.emit(err.to_event()).await;
            return;
        }
    };
    match serde_json::from_str::<serde_json::Value>(&text) {
        Ok(json) => {
            sink.emit_all(parse_completion(&json)).await;
        }
        Err(e) => {
            error!("Unparseable completion body: {}", e);
            sink.emit(ChatError::Parse(e.to_string()).to_event()).await;
        }
    }
}
