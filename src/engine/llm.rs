//! Chat-completion client for the hosted model API.
//!
//! The upstream speaks the OpenAI chat-completions protocol. Streaming
//! responses arrive as server-sent events; [`SseDecoder`] turns raw body
//! chunks into text deltas and is independent of the HTTP client.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;

/// Stream of text deltas for one turn.
pub type TextStream = BoxStream<'static, Result<String, LlmError>>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Upper bound on a server-provided Retry-After we are willing to honor.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    #[error("Missing API key")]
    MissingApiKey,

    #[error("upstream returned HTTP {status}: {message}")]
    Status {
        status: u16,
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("network error: {0}")]
    Transport(String),

    #[error("malformed upstream response: {0}")]
    Protocol(String),
}

impl LlmError {
    /// Rate limiting, server errors and transport failures are transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Status { status, .. } => *status == 429 || (500..600).contains(status),
            LlmError::Transport(_) => true,
            _ => false,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, LlmError::Status { status: 429, .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            LlmError::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        LlmError::Transport(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".into(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".into(), content: content.into() }
    }
}

/// A chat-completion backend.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Run a non-streaming completion and return the full text.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError>;

    /// Open a streaming completion. Errors before the first byte are
    /// returned here; later failures arrive as stream items.
    async fn open_stream(&self, messages: &[ChatMessage]) -> Result<TextStream, LlmError>;
}

// =============================================================================
// OpenRouter client
// =============================================================================

#[derive(Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

pub struct OpenRouterClient {
    http: reqwest::Client,
    config: LlmConfig,
}

impl OpenRouterClient {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self { http, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    async fn send(&self, messages: &[ChatMessage], stream: bool) -> Result<reqwest::Response, LlmError> {
        let api_key = self.config.api_key.as_deref().ok_or(LlmError::MissingApiKey)?;
        let body = CompletionBody {
            model: &self.config.model,
            messages,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            stream,
        };

        let mut request = self
            .http
            .post(self.endpoint())
            .bearer_auth(api_key)
            .header("HTTP-Referer", &self.config.site_url)
            .header("X-Title", &self.config.site_name)
            .json(&body);
        if !stream {
            request = request.timeout(Duration::from_secs(self.config.request_timeout_secs));
        }

        tracing::debug!(model = %self.config.model, stream, messages = messages.len(), "Sending completion request");
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let text = response.text().await.unwrap_or_default();
        Err(LlmError::Status {
            status: status.as_u16(),
            message: upstream_error_message(&text),
            retry_after,
        })
    }
}

#[async_trait]
impl ChatProvider for OpenRouterClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let response = self.send(messages, false).await?;
        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::Protocol(e.to_string()))?;

        if let Some(message) = value.pointer("/error/message").and_then(|m| m.as_str()) {
            return Err(LlmError::Protocol(message.to_string()));
        }
        value
            .pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(String::from)
            .ok_or_else(|| LlmError::Protocol("response has no choices[0].message.content".into()))
    }

    async fn open_stream(&self, messages: &[ChatMessage]) -> Result<TextStream, LlmError> {
        let response = self.send(messages, true).await?;
        let state = StreamState {
            body: response
                .bytes_stream()
                .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
                .boxed(),
            decoder: SseDecoder::default(),
            pending: VecDeque::new(),
            finished: false,
        };
        Ok(futures_util::stream::unfold(state, next_delta).boxed())
    }
}

struct StreamState {
    body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    decoder: SseDecoder,
    pending: VecDeque<Result<String, LlmError>>,
    finished: bool,
}

async fn next_delta(mut state: StreamState) -> Option<(Result<String, LlmError>, StreamState)> {
    loop {
        if let Some(item) = state.pending.pop_front() {
            return Some((item, state));
        }
        if state.finished {
            return None;
        }
        match state.body.next().await {
            Some(Ok(chunk)) => {
                for event in state.decoder.push(&chunk) {
                    match event {
                        SseEvent::Delta(text) => state.pending.push_back(Ok(text)),
                        SseEvent::Error(message) => {
                            state.pending.push_back(Err(LlmError::Protocol(message)));
                            state.finished = true;
                            break;
                        }
                        SseEvent::Done => {
                            state.finished = true;
                            break;
                        }
                    }
                }
            }
            Some(Err(e)) => {
                state.pending.push_back(Err(LlmError::Transport(e.to_string())));
                state.finished = true;
            }
            None => state.finished = true,
        }
    }
}

fn parse_retry_after(raw: &str) -> Option<Duration> {
    raw.trim()
        .parse::<u64>()
        .ok()
        .map(|secs| Duration::from_secs(secs).min(MAX_RETRY_AFTER))
}

/// Pull `error.message` out of a JSON error body, else return the body.
fn upstream_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.pointer("/error/message").and_then(|m| m.as_str()).map(String::from))
        .unwrap_or_else(|| body.trim().chars().take(500).collect())
}

// =============================================================================
// SSE decoding
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Delta(String),
    Error(String),
    Done,
}

/// Incremental decoder for `text/event-stream` chat-completion bodies.
///
/// Buffers partial lines across chunks (including split UTF-8 sequences)
/// and ignores comment lines such as `: OPENROUTER PROCESSING`.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            if let Some(event) = decode_line(line.trim_end_matches(['\r', '\n'])) {
                events.push(event);
            }
        }
        events
    }
}

fn decode_line(line: &str) -> Option<SseEvent> {
    let data = line.strip_prefix("data:")?.trim_start();
    if data == "[DONE]" {
        return Some(SseEvent::Done);
    }
    let value: serde_json::Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(error = %e, "Ignoring undecodable SSE data line");
            return None;
        }
    };
    if let Some(message) = value.pointer("/error/message").and_then(|m| m.as_str()) {
        return Some(SseEvent::Error(message.to_string()));
    }
    value
        .pointer("/choices/0/delta/content")
        .and_then(|c| c.as_str())
        .filter(|c| !c.is_empty())
        .map(|c| SseEvent::Delta(c.to_string()))
}
