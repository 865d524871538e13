//! Normalized stream events and the channel that carries them
//!
//! Every `chat` call runs as one spawned task writing `ChatResponse` events
//! into a bounded channel. The caller reads them through `ChatStream`.
//! Dropping the `ChatStream` cancels the task, which drops any in-flight
//! request or backoff sleep with it.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{FutureExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, warn};

use super::types::ToolCall;
use crate::constants;

/// One element of a chat response stream
///
/// Exactly one terminal variant (`Done` or `Error`) closes a stream. Every
/// other variant is informational and precedes it.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatResponse {
    /// Answer text. Deltas have `is_complete == false`; the final aggregate
    /// of all deltas is sent once with `is_complete == true`.
    Content { text: String, is_complete: bool },
    /// Secondary chain-of-thought channel, same delta/aggregate scheme as `Content`
    Reasoning { text: String, is_complete: bool },
    ToolCallRequest { tool_calls: Vec<ToolCall> },
    Usage {
        prompt_tokens: u32,
        completion_tokens: u32,
        total_tokens: u32,
    },
    Error {
        message: String,
        code: String,
        is_retryable: bool,
    },
    Done { finish_reason: String },
    /// Sent at the start of every HTTP attempt
    ProviderInfo {
        provider_id: String,
        resolved_model: String,
    },
    /// Sent before sleeping ahead of a retry
    RetryNotification {
        attempt: u32,
        max_attempts: u32,
        delay_ms: u64,
        reason: String,
    },
}

impl ChatResponse {
    /// Whether this event closes the stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChatResponse::Done { .. } | ChatResponse::Error { .. })
    }

    /// Build an `Error` event
    pub fn error(message: impl Into<String>, code: impl Into<String>, is_retryable: bool) -> Self {
        ChatResponse::Error {
            message: message.into(),
            code: code.into(),
            is_retryable,
        }
    }

    /// Build a `Done` event
    pub fn done(finish_reason: impl Into<String>) -> Self {
        ChatResponse::Done {
            finish_reason: finish_reason.into(),
        }
    }
}

/// Write half of a chat stream
///
/// Refuses to send anything once a terminal event went out.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<ChatResponse>,
    terminated: Arc<AtomicBool>,
}

impl EventSink {
    /// Send an event. Returns `false` if the stream is already terminated or
    /// the consumer went away.
    pub async fn emit(&self, event: ChatResponse) -> bool {
        if event.is_terminal() {
            if self.terminated.swap(true, Ordering::AcqRel) {
                debug!("Dropping second terminal event: {:?}", event);
                return false;
            }
        } else if self.terminated.load(Ordering::Acquire) {
            debug!("Dropping event after terminal: {:?}", event);
            return false;
        }
        self.tx.send(event).await.is_ok()
    }

    /// Send several events in order, stopping at the first refusal
    pub async fn emit_all(&self, events: impl IntoIterator<Item = ChatResponse>) -> bool {
        for event in events {
            if !self.emit(event).await {
                return false;
            }
        }
        true
    }

    /// Whether a terminal event has been sent
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Whether the consumer dropped its end
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Read half of a chat stream
pub struct ChatStream {
    inner: ReceiverStream<ChatResponse>,
}

impl ChatStream {
    /// Create a connected sink/stream pair
    pub fn channel() -> (EventSink, ChatStream) {
        Self::channel_with_capacity(constants::stream::EVENT_BUFFER)
    }

    fn channel_with_capacity(capacity: usize) -> (EventSink, ChatStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let sink = EventSink {
            tx,
            terminated: Arc::new(AtomicBool::new(false)),
        };
        let stream = ChatStream {
            inner: ReceiverStream::new(rx),
        };
        (sink, stream)
    }

    /// A finished stream holding exactly `events`
    ///
    /// Used for failures detected before any task is spawned.
    pub fn from_events(events: Vec<ChatResponse>) -> Self {
        let (sink, stream) = Self::channel_with_capacity(events.len());
        for event in events {
            if sink.tx.try_send(event).is_err() {
                break;
            }
        }
        stream
    }

    /// Receive the next event, `None` once the stream is closed
    pub async fn next_event(&mut self) -> Option<ChatResponse> {
        self.inner.next().await
    }

    /// Drain the whole stream
    pub async fn collect_events(mut self) -> Vec<ChatResponse> {
        let mut events = Vec::new();
        while let Some(event) = self.next_event().await {
            events.push(event);
        }
        events
    }
}

impl Stream for ChatStream {
    type Item = ChatResponse;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Run `producer` on its own task and return the stream it writes to
///
/// The task is aborted as soon as the consumer drops the stream. If the
/// producer returns or panics without sending a terminal event, a synthetic
/// `Error` closes the stream.
pub fn spawn_chat_task<F, Fut>(label: &str, producer: F) -> ChatStream
where
    F: FnOnce(EventSink) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (sink, stream) = ChatStream::channel();
    let guard = sink.clone();
    let task = producer(sink);
    let label = label.to_string();

    tokio::spawn(async move {
        let outcome = tokio::select! {
            biased;
            _ = guard.tx.closed() => {
                debug!(provider = %label, "Chat stream dropped by consumer, cancelling");
                return;
            }
            outcome = AssertUnwindSafe(task).catch_unwind() => outcome,
        };

        if guard.is_terminated() {
            return;
        }
        match outcome {
            Err(_) => {
                error!(provider = %label, "Chat task panicked");
                guard
                    .emit(ChatResponse::error(
                        "provider task panicked",
                        "internal_error",
                        false,
                    ))
                    .await;
            }
            Ok(()) => {
                warn!(provider = %label, "Chat task ended without a terminal event");
                guard
                    .emit(ChatResponse::error(
                        "stream ended without a terminal event",
                        "incomplete_stream",
                        false,
                    ))
                    .await;
            }
        }
    });

    stream
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_sink_drops_events_after_terminal() {
        let (sink, stream) = ChatStream::channel();
        assert!(sink.emit(ChatResponse::done("stop")).await);
        assert!(
            !sink
                .emit(ChatResponse::Content {
                    text: "late".to_string(),
                    is_complete: false,
                })
                .await
        );
        assert!(!sink.emit(ChatResponse::error("x", "y", false)).await);
        drop(sink);
        assert_eq!(stream.collect_events().await, vec![ChatResponse::done("stop")]);
    }

    #[tokio::test]
    async fn test_spawned_task_without_terminal_gets_error() {
        let stream = spawn_chat_task("test", |sink| async move {
            sink.emit(ChatResponse::Content {
                text: "partial".to_string(),
                is_complete: false,
            })
            .await;
        });
        let events = stream.collect_events().await;
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[1], ChatResponse::Error { code, .. } if code == "incomplete_stream"));
    }

    #[tokio::test]
    async fn test_spawned_task_panic_becomes_error() {
        let stream = spawn_chat_task("test", |_sink| async move {
            panic!("boom");
        });
        let events = stream.collect_events().await;
        assert!(matches!(&events[..], [ChatResponse::Error { code, .. }] if code == "internal_error"));
    }

    #[tokio::test]
    async fn test_dropping_stream_cancels_task() {
        let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();
        let stream = spawn_chat_task("test", |sink| async move {
            sink.emit(ChatResponse::ProviderInfo {
                provider_id: "p".to_string(),
                resolved_model: "m".to_string(),
            })
            .await;
            tokio::time::sleep(Duration::from_secs(60)).await;
            let _ = done_tx.send(());
        });
        drop(stream);
        // The sender is dropped without sending when the task is cancelled
        let result = tokio::time::timeout(Duration::from_secs(5), done_rx).await;
        assert!(matches!(result, Ok(Err(_))));
    }

    #[tokio::test]
    async fn test_from_events() {
        let stream = ChatStream::from_events(vec![ChatResponse::error("no key", "auth", false)]);
        let events = stream.collect_events().await;
        assert_eq!(events.len(), 1);
        assert!(events[0].is_terminal());
    }
}
