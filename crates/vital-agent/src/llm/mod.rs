//! Chat completion client: synchronous and token-streaming variants over an
//! OpenAI-compatible endpoint, with bounded exponential backoff on
//! transient failures.

use async_trait::async_trait;
use futures::Stream;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::LlmConfig;
use crate::error::LlmError;

/// A chat message with role and content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

/// Lazy sequence of text deltas from one streaming completion. Finite and
/// not restartable: once drained it is done, and a new call issues a new
/// request.
pub struct TokenStream {
    receiver: mpsc::Receiver<String>,
}

impl TokenStream {
    pub fn new(receiver: mpsc::Receiver<String>) -> Self {
        Self { receiver }
    }

    /// A pre-terminated stream carrying one fixed message, for degraded
    /// replies that never reach the API.
    pub fn fixed(text: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::channel(1);
        // buffer of 1 holds the message even though tx drops immediately
        let _ = tx.try_send(text.into());
        Self { receiver: rx }
    }

    pub async fn next_token(&mut self) -> Option<String> {
        self.receiver.recv().await
    }

    /// Drain the stream into the full response text.
    pub async fn collect_text(mut self) -> String {
        let mut out = String::new();
        while let Some(token) = self.next_token().await {
            out.push_str(&token);
        }
        out
    }
}

impl Stream for TokenStream {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// The chat completion boundary, mockable in tests.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Whole-response completion.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError>;

    /// Token-streaming completion. Consume once.
    async fn stream(&self, messages: &[ChatMessage]) -> Result<TokenStream, LlmError>;
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: String,
}

/// One parsed server-sent event line from a streaming completion.
#[derive(Debug, PartialEq)]
enum SseEvent {
    Delta(String),
    Done,
}

/// Parse a single SSE line into a content delta, the end marker, or nothing
/// (comments, keep-alives, tool-call frames we don't consume).
fn parse_sse_line(line: &str) -> Option<SseEvent> {
    let data = line.strip_prefix("data: ")?;
    if data == "[DONE]" {
        return Some(SseEvent::Done);
    }
    let parsed: serde_json::Value = serde_json::from_str(data).ok()?;
    let delta = parsed["choices"].as_array()?.first()?["delta"]["content"].as_str()?;
    Some(SseEvent::Delta(delta.to_string()))
}

fn classify_status(status: u16, body: String) -> LlmError {
    match status {
        401 | 403 => LlmError::Auth,
        429 => LlmError::RateLimited,
        _ => LlmError::Api { status, message: body },
    }
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiCompatProvider {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: usize,
    temperature: f32,
    max_attempts: usize,
    backoff_base: Duration,
}

impl OpenAiCompatProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| LlmError::Network(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            max_attempts: config.max_attempts.max(1),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
        })
    }

    fn request_body(&self, messages: &[ChatMessage], stream: bool) -> serde_json::Value {
        json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "stream": stream,
        })
    }

    async fn send(&self, messages: &[ChatMessage], stream: bool) -> Result<reqwest::Response, LlmError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&self.request_body(messages, stream))
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), body));
        }
        Ok(response)
    }

    /// Issue the request, retrying transient failures with exponential
    /// backoff. Structural failures (auth, bad request) return immediately.
    async fn send_with_retry(
        &self,
        messages: &[ChatMessage],
        stream: bool,
    ) -> Result<reqwest::Response, LlmError> {
        let mut delay = self.backoff_base;
        let mut last_error = None;

        for attempt in 1..=self.max_attempts {
            match self.send(messages, stream).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    tracing::warn!(attempt, error = %e, backoff_ms = delay.as_millis() as u64, "transient chat API failure, backing off");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    last_error = Some(e);
                }
                Err(e) if e.is_transient() => {
                    return Err(LlmError::RetriesExhausted {
                        attempts: self.max_attempts,
                        last: e.to_string(),
                    })
                }
                Err(e) => return Err(e),
            }
        }

        Err(LlmError::RetriesExhausted {
            attempts: self.max_attempts,
            last: last_error.map(|e| e.to_string()).unwrap_or_default(),
        })
    }
}

#[async_trait]
impl ChatProvider for OpenAiCompatProvider {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let response = self.send_with_retry(messages, false).await?;
        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::InvalidResponse("empty choices array".into()))
    }

    async fn stream(&self, messages: &[ChatMessage]) -> Result<TokenStream, LlmError> {
        let response = self.send_with_retry(messages, true).await?;
        let (tx, rx) = mpsc::channel(100);

        tokio::spawn(async move {
            let mut body = response.bytes_stream();
            let mut pending = String::new();
            while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        tracing::warn!(error = %e, "chat stream interrupted");
                        return;
                    }
                };
                pending.push_str(&String::from_utf8_lossy(&chunk));
                // process complete lines, keep the partial tail
                while let Some(newline) = pending.find('\n') {
                    let line: String = pending.drain(..=newline).collect();
                    match parse_sse_line(line.trim_end()) {
                        Some(SseEvent::Done) => return,
                        Some(SseEvent::Delta(text)) => {
                            if tx.send(text).await.is_err() {
                                return;
                            }
                        }
                        None => {}
                    }
                }
            }
        });

        Ok(TokenStream::new(rx))
    }
}
