//! SSE (Server-Sent Events) stream processing utilities
//!
//! Splits raw body bytes into lines and turns OpenAI-compatible chunk
//! payloads into normalized `ChatResponse` events.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::{debug, warn};

use super::error::ChatError;
use super::streaming::ChatResponse;
use super::types::ToolCall;
use crate::constants;

/// Finish reason used when a stream ends without reporting one
pub const DEFAULT_FINISH_REASON: &str = "stop";

/// Accumulates body bytes and yields complete lines
///
/// Bytes are buffered until a newline arrives, so multi-byte characters split
/// across network chunks decode correctly. Each byte is scanned once.
#[derive(Debug)]
pub struct SseLineBuffer {
    partial: Vec<u8>,
    /// Prefix of `partial` already known to hold no newline
    scanned: usize,
    max_line: usize,
    bytes_received: usize,
}

impl Default for SseLineBuffer {
    fn default() -> Self {
        Self::with_max_line(constants::stream::MAX_LINE_BYTES)
    }
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            partial: Vec::new(),
            scanned: 0,
            max_line,
            bytes_received: 0,
        }
    }

    /// Append a chunk and return every line it completed (without `\r\n`)
    ///
    /// Fails once an unterminated line grows past the length cap.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<String>, ChatError> {
        self.bytes_received += bytes.len();
        self.partial.extend_from_slice(bytes);

        let mut lines = Vec::new();
        let mut start = 0;
        let mut from = self.scanned;
        while let Some(offset) = self.partial[from..].iter().position(|b| *b == b'\n') {
            let end = from + offset;
            let mut line = &self.partial[start..end];
            if let Some(stripped) = line.strip_suffix(b"\r") {
                line = stripped;
            }
            lines.push(String::from_utf8_lossy(line).into_owned());
            start = end + 1;
            from = start;
        }
        self.partial.drain(..start);
        self.scanned = self.partial.len();

        if self.partial.len() > self.max_line {
            return Err(ChatError::StreamInterrupted(format!(
                "line exceeds {} bytes without a newline",
                self.max_line
            )));
        }
        Ok(lines)
    }

    /// Remaining unterminated line at end of body, if any
    pub fn finish(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.partial).trim_end().to_string();
        self.partial.clear();
        self.scanned = 0;
        Some(line)
    }

    pub fn bytes_received(&self) -> usize {
        self.bytes_received
    }
}

/// Payload of an SSE line
#[derive(Debug, PartialEq)]
pub enum SseLine<'a> {
    /// `data: [DONE]`
    Done,
    /// `data: <payload>`
    Data(&'a str),
    /// Blank line, comment, or non-data field
    Ignored,
}

/// Classify one raw line
pub fn classify_line(line: &str) -> SseLine<'_> {
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') {
        return SseLine::Ignored;
    }
    match line.strip_prefix("data:") {
        Some(data) => {
            let data = data.trim_start();
            if data == "[DONE]" {
                SseLine::Done
            } else {
                SseLine::Data(data)
            }
        }
        None => SseLine::Ignored,
    }
}

/// Result of feeding one line to `OpenAiStreamState`
#[derive(Debug, PartialEq)]
pub enum LineOutcome {
    /// Keep reading; these events go out in order
    Continue(Vec<ChatResponse>),
    /// Stream finished; these events (ending in the terminal one) go out
    Finished(Vec<ChatResponse>),
}

/// Streaming tool call assembled from indexed deltas
#[derive(Debug, Clone, Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
}

/// Per-stream parse state for OpenAI-compatible chunks
#[derive(Debug, Default)]
pub struct OpenAiStreamState {
    content: String,
    reasoning: String,
    tool_calls: BTreeMap<u64, ToolCallAccumulator>,
    finish_reason: Option<String>,
    event_count: usize,
    skipped: usize,
}

impl OpenAiStreamState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one raw body line
    pub fn handle_line(&mut self, line: &str) -> LineOutcome {
        match classify_line(line) {
            SseLine::Ignored => LineOutcome::Continue(Vec::new()),
            SseLine::Done => {
                debug!(
                    events = self.event_count,
                    skipped = self.skipped,
                    "SSE [DONE] marker received"
                );
                LineOutcome::Finished(self.finish())
            }
            SseLine::Data(data) => match serde_json::from_str::<Value>(data) {
                Ok(json) => {
                    self.event_count += 1;
                    self.handle_chunk(&json)
                }
                Err(e) => {
                    self.skipped += 1;
                    warn!("Skipping malformed SSE chunk ({}): {}", e, data);
                    LineOutcome::Continue(Vec::new())
                }
            },
        }
    }

    /// Convert one decoded chunk
    pub fn handle_chunk(&mut self, json: &Value) -> LineOutcome {
        if let Some(error) = chunk_error(json) {
            return LineOutcome::Finished(vec![error]);
        }

        let mut events = Vec::new();

        if let Some(choice) = first_choice(json) {
            if let Some(delta) = choice.get("delta") {
                if let Some(text) = reasoning_text(delta) {
                    self.reasoning.push_str(text);
                    events.push(ChatResponse::Reasoning {
                        text: text.to_string(),
                        is_complete: false,
                    });
                }
                if let Some(text) = delta.get("content").and_then(|c| c.as_str()) {
                    if !text.is_empty() {
                        self.content.push_str(text);
                        events.push(ChatResponse::Content {
                            text: text.to_string(),
                            is_complete: false,
                        });
                    }
                }
                if let Some(calls) = delta.get("tool_calls").and_then(|t| t.as_array()) {
                    self.merge_tool_calls(calls);
                }
            }
            if let Some(reason) = finish_reason(choice) {
                debug!("SSE finish_reason: {}", reason);
                self.finish_reason = Some(reason);
            }
        }

        if let Some(usage) = usage_event(json) {
            events.push(usage);
        }

        LineOutcome::Continue(events)
    }

    /// Events that close the stream: tool calls, final aggregates, `Done`
    pub fn finish(&mut self) -> Vec<ChatResponse> {
        let mut events = Vec::new();

        if !self.tool_calls.is_empty() {
            let tool_calls: Vec<ToolCall> = std::mem::take(&mut self.tool_calls)
                .into_values()
                .filter(|acc| !acc.name.is_empty())
                .map(|acc| ToolCall::new(acc.id, acc.name, acc.arguments))
                .collect();
            if !tool_calls.is_empty() {
                events.push(ChatResponse::ToolCallRequest { tool_calls });
            }
        }
        if !self.reasoning.is_empty() {
            events.push(ChatResponse::Reasoning {
                text: std::mem::take(&mut self.reasoning),
                is_complete: true,
            });
        }
        if !self.content.is_empty() {
            events.push(ChatResponse::Content {
                text: std::mem::take(&mut self.content),
                is_complete: true,
            });
        }
        let reason = self
            .finish_reason
            .take()
            .unwrap_or_else(|| DEFAULT_FINISH_REASON.to_string());
        events.push(ChatResponse::done(reason));
        events
    }

    /// Merge indexed tool-call deltas; entries without a function block are ignored
    fn merge_tool_calls(&mut self, calls: &[Value]) {
        for (position, call) in calls.iter().enumerate() {
            let Some(function) = call.get("function").filter(|f| !f.is_null()) else {
                continue;
            };
            let index = call
                .get("index")
                .and_then(|i| i.as_u64())
                .unwrap_or(position as u64);
            let acc = self.tool_calls.entry(index).or_default();
            if let Some(id) = call.get("id").and_then(|i| i.as_str()) {
                if acc.id.is_empty() {
                    acc.id = id.to_string();
                }
            }
            if let Some(name) = function.get("name").and_then(|n| n.as_str()) {
                if acc.name.is_empty() {
                    acc.name = name.to_string();
                }
            }
            if let Some(arguments) = function.get("arguments").and_then(|a| a.as_str()) {
                acc.arguments.push_str(arguments);
            }
        }
    }
}

/// Convert a complete (non-streaming) response body
///
/// Order: Reasoning, Content, ToolCallRequest, Usage, Done.
pub fn parse_completion(json: &Value) -> Vec<ChatResponse> {
    if let Some(error) = chunk_error(json) {
        return vec![error];
    }

    let mut events = Vec::new();
    let mut reason = None;

    if let Some(choice) = first_choice(json) {
        if let Some(message) = choice.get("message") {
            if let Some(text) = reasoning_text(message) {
                events.push(ChatResponse::Reasoning {
                    text: text.to_string(),
                    is_complete: true,
                });
            }
            if let Some(text) = message.get("content").and_then(|c| c.as_str()) {
                if !text.is_empty() {
                    events.push(ChatResponse::Content {
                        text: text.to_string(),
                        is_complete: true,
                    });
                }
            }
            if let Some(calls) = message.get("tool_calls").and_then(|t| t.as_array()) {
                let tool_calls = collect_tool_calls(calls);
                if !tool_calls.is_empty() {
                    events.push(ChatResponse::ToolCallRequest { tool_calls });
                }
            }
        }
        reason = finish_reason(choice);
    }

    if let Some(usage) = usage_event(json) {
        events.push(usage);
    }
    events.push(ChatResponse::done(
        reason.unwrap_or_else(|| DEFAULT_FINISH_REASON.to_string()),
    ));
    events
}

/// Tool calls with a function block, arguments kept verbatim
fn collect_tool_calls(calls: &[Value]) -> Vec<ToolCall> {
    calls
        .iter()
        .filter_map(|call| {
            let function = call.get("function").filter(|f| !f.is_null())?;
            let name = function.get("name").and_then(|n| n.as_str())?;
            let arguments = match function.get("arguments") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            };
            let id = call.get("id").and_then(|i| i.as_str()).unwrap_or_default();
            Some(ToolCall::new(id, name, arguments))
        })
        .collect()
}

fn first_choice(json: &Value) -> Option<&Value> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
}

/// `reasoning_content` or `reasoning`, whichever is a non-empty string
fn reasoning_text(delta: &Value) -> Option<&str> {
    ["reasoning_content", "reasoning"]
        .iter()
        .filter_map(|key| delta.get(*key).and_then(|r| r.as_str()))
        .find(|text| !text.is_empty())
}

fn finish_reason(choice: &Value) -> Option<String> {
    choice
        .get("finish_reason")
        .and_then(|r| r.as_str())
        .filter(|r| !r.is_empty() && *r != "null")
        .map(str::to_string)
}

fn usage_event(json: &Value) -> Option<ChatResponse> {
    let usage = json.get("usage").filter(|u| u.is_object())?;
    let field = |key: &str| {
        usage
            .get(key)
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
            .min(u32::MAX as u64) as u32
    };
    let prompt_tokens = field("prompt_tokens");
    let completion_tokens = field("completion_tokens");
    let total_tokens = match field("total_tokens") {
        0 => prompt_tokens.saturating_add(completion_tokens),
        total => total,
    };
    Some(ChatResponse::Usage {
        prompt_tokens,
        completion_tokens,
        total_tokens,
    })
}

/// Top-level `error` object (or string) as a terminal event
fn chunk_error(json: &Value) -> Option<ChatResponse> {
    let error = json.get("error").filter(|e| !e.is_null())?;
    let message = error
        .get("message")
        .and_then(|m| m.as_str())
        .or_else(|| error.as_str())
        .unwrap_or("unknown provider error")
        .to_string();
    let code = error
        .get("code")
        .and_then(|c| match c {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .unwrap_or_else(|| "provider_error".to_string());
    warn!("Provider returned error in body: {} ({})", message, code);
    Some(ChatResponse::error(message, code, false))
}
