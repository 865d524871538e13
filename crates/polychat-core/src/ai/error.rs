//! Chat error taxonomy
//!
//! Every failure the streaming engine can hit is classified into one of these
//! variants. Classification decides whether the retry loop runs again; the
//! variant's `code()` is what the caller sees on the terminal `Error` event.

use std::time::Duration;

use thiserror::Error;

use super::retry::IsRetryable;
use super::streaming::ChatResponse;

/// Message substrings that mark a transport failure as transient
const TRANSIENT_MARKERS: &[&str] = &[
    "timed out",
    "timeout",
    "connection refused",
    "connection reset",
    "connection closed",
    "broken pipe",
    "dns error",
    "failed to lookup address",
    "unexpected eof",
    "end of file",
    "eof",
];

/// Certificate and handshake failures; retrying cannot fix these
const TLS_MARKERS: &[&str] = &["certificate", "tls", "ssl", "handshake", "unknownissuer"];

/// Errors produced while talking to a backend
#[derive(Debug, Clone, Error)]
pub enum ChatError {
    /// HTTP 429
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    /// HTTP 401/403
    #[error("authentication failed ({status}): {message}")]
    Authentication { status: u16, message: String },

    /// HTTP 402, model needs a paid tier
    #[error("payment required: {message}")]
    PaymentRequired { message: String },

    /// HTTP 5xx
    #[error("server error ({status}): {message}")]
    Server {
        status: u16,
        message: String,
        retry_after: Option<Duration>,
    },

    /// HTTP 400
    #[error("bad request: {message}")]
    BadRequest { message: String },

    /// Any other non-success status
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Timeout, refused/reset connection, DNS failure, EOF
    #[error("network error: {0}")]
    Network(String),

    /// Any other transport-level failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Error object returned inside a successful response body
    #[error("provider error: {message}")]
    Provider { code: String, message: String },

    /// Unparseable non-streaming response body
    #[error("failed to parse response: {0}")]
    Parse(String),

    /// Body read failed after streaming began; never retried
    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),

    /// Retry budget exhausted
    #[error("giving up after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },
}

impl ChatError {
    /// Classify a non-success HTTP response
    pub fn from_status(status: u16, body: &str, retry_after: Option<Duration>) -> Self {
        let message = if body.trim().is_empty() {
            format!("HTTP {}", status)
        } else {
            body.to_string()
        };
        match status {
            429 => ChatError::RateLimited {
                message,
                retry_after,
            },
            401 | 403 => ChatError::Authentication { status, message },
            402 => ChatError::PaymentRequired { message },
            400 => ChatError::BadRequest {
                message: extract_error_message(body).unwrap_or(message),
            },
            s if s >= 500 => ChatError::Server {
                status,
                message,
                retry_after,
            },
            _ => ChatError::Http { status, message },
        }
    }

    /// Classify a transport failure by kind, then by message text
    ///
    /// reqwest reports TLS failures as connect errors, so those are
    /// checked for first.
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        classify_transport(error_chain_text(err), err.is_timeout(), err.is_connect())
    }

    /// Stable machine-readable code carried on the `Error` event
    pub fn code(&self) -> &'static str {
        match self {
            ChatError::RateLimited { .. } => "rate_limited",
            ChatError::Authentication { .. } => "authentication_failed",
            ChatError::PaymentRequired { .. } => "payment_required",
            ChatError::Server { .. } => "server_error",
            ChatError::BadRequest { .. } => "bad_request",
            ChatError::Http { .. } => "http_error",
            ChatError::Network(_) => "network_error",
            ChatError::Transport(_) => "transport_error",
            ChatError::Provider { .. } => "provider_error",
            ChatError::Parse(_) => "parse_error",
            ChatError::StreamInterrupted(_) => "stream_interrupted",
            ChatError::MaxRetriesExceeded { .. } => "max_retries_exceeded",
        }
    }

    /// Terminal event for this error
    pub fn to_event(&self) -> ChatResponse {
        let code = match self {
            ChatError::Provider { code, .. } if !code.is_empty() => code.clone(),
            _ => self.code().to_string(),
        };
        ChatResponse::Error {
            message: self.to_string(),
            code,
            is_retryable: self.is_retryable(),
        }
    }
}

impl IsRetryable for ChatError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            ChatError::RateLimited { .. } | ChatError::Server { .. } | ChatError::Network(_)
        )
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            ChatError::RateLimited { retry_after, .. } | ChatError::Server { retry_after, .. } => {
                *retry_after
            }
            _ => None,
        }
    }
}

/// Pull `error.message` (or a string `error`) out of a JSON error body
pub fn extract_error_message(body: &str) -> Option<String> {
    let json: serde_json::Value = serde_json::from_str(body).ok()?;
    let error = json.get("error")?;
    error
        .get("message")
        .and_then(|m| m.as_str())
        .or_else(|| error.as_str())
        .map(str::to_string)
}

fn classify_transport(text: String, is_timeout: bool, is_connect: bool) -> ChatError {
    if is_tls_message(&text) {
        ChatError::Transport(text)
    } else if is_timeout || is_connect || is_transient_message(&text) {
        ChatError::Network(text)
    } else {
        ChatError::Transport(text)
    }
}

fn is_tls_message(text: &str) -> bool {
    let lower = text.to_lowercase();
    TLS_MARKERS.iter().any(|m| lower.contains(m))
}

fn is_transient_message(text: &str) -> bool {
    let lower = text.to_lowercase();
    TRANSIENT_MARKERS.iter().any(|m| lower.contains(m))
}

/// Flatten an error and its sources into one line
fn error_chain_text(err: &(dyn std::error::Error + 'static)) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        text.push_str(": ");
        text.push_str(&inner.to_string());
        source = inner.source();
    }
    text
}
