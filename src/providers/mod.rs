// AI Provider Abstraction - uniform chat/stream/models contract
//
// Every provider variant speaks the same trait so the router can dispatch
// without knowing wire details. Streams are lazy finite sequences of text
// chunks; a failure mid-stream terminates the sequence with a ProviderError
// item, while failures before the first chunk surface from the async call.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

pub mod anthropic;
pub mod codex;
pub mod glm;
pub mod google;
pub mod openai;

pub use anthropic::AnthropicProvider;
pub use codex::{extract_account_id, CodexProvider};
pub use glm::GlmProvider;
pub use google::GoogleProvider;
pub use openai::OpenAiProvider;

/// Message roles in the unified chat format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// Inline image attached to a message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageData {
    pub base64_data: String,
    pub mime_type: String,
}

/// One turn of the conversation in the unified format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<ImageData>>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            images: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            images: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            images: None,
        }
    }
}

/// Token accounting reported by a provider
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Complete (non-streaming) provider response
#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
    pub provider: String,
    pub usage: Option<TokenUsage>,
    pub finish_reason: Option<String>,
}

/// Model descriptor emitted by each provider for the registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub provider: String,
    pub max_tokens: u32,
    pub supports_streaming: bool,
}

/// Per-request generation parameters forwarded when present
#[derive(Debug, Clone, Copy, Default)]
pub struct ChatOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// Single failure kind surfaced by every provider
#[derive(Debug, Clone, Error)]
#[error("provider '{provider}' failed: {message}")]
pub struct ProviderError {
    pub provider: String,
    pub message: String,
    pub status_code: Option<u16>,
}

impl ProviderError {
    pub fn new(provider: &str, message: impl Into<String>) -> Self {
        Self {
            provider: provider.to_string(),
            message: message.into(),
            status_code: None,
        }
    }

    pub fn with_status(provider: &str, message: impl Into<String>, status: u16) -> Self {
        Self {
            provider: provider.to_string(),
            message: message.into(),
            status_code: Some(status),
        }
    }
}

/// Lazy finite sequence of text chunks
pub type ChunkStream = BoxStream<'static, Result<String, ProviderError>>;

/// Uniform contract implemented by every provider variant
#[async_trait]
pub trait AiProvider: Send + Sync + std::fmt::Debug {
    /// Provider name used by the registry
    fn name(&self) -> &str;

    /// Send messages and return the complete response
    async fn chat(
        &self,
        messages: &[Message],
        model: &str,
        options: ChatOptions,
    ) -> Result<ChatResponse, ProviderError>;

    /// Stream the response token by token. Errors before the first chunk
    /// surface from this call; later failures terminate the stream.
    async fn stream(
        &self,
        messages: &[Message],
        model: &str,
        options: ChatOptions,
    ) -> Result<ChunkStream, ProviderError>;

    /// Models this provider can serve
    fn available_models(&self) -> Vec<ModelInfo>;
}

// ---------------------------------------------------------------------------
// Shared SSE plumbing
// ---------------------------------------------------------------------------

/// What one SSE line means to a provider parser
pub(crate) enum SseEvent {
    /// Emit this text chunk
    Chunk(String),
    /// Normal end of stream
    Done,
    /// Comment, keep-alive, unknown event, or partial payload
    Skip,
}

/// Splits a byte stream into complete lines, holding partial tails until
/// the next network chunk arrives. Buffering happens at the byte level so a
/// multi-byte character split across network chunks survives intact.
#[derive(Default)]
pub(crate) struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    /// Feed raw bytes; returns every complete line they finish
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let mut raw: Vec<u8> = self.pending.drain(..=pos).collect();
            while matches!(raw.last(), Some(b'\n') | Some(b'\r')) {
                raw.pop();
            }
            lines.push(String::from_utf8_lossy(&raw).into_owned());
        }
        lines
    }
}

/// Adapt a streaming HTTP response into a chunk stream using a per-provider
/// line parser. Partial lines are buffered; lines the parser does not
/// recognize are skipped, never an error.
pub(crate) fn sse_chunk_stream<F>(
    response: reqwest::Response,
    provider: &str,
    parser: F,
) -> ChunkStream
where
    F: Fn(&str) -> SseEvent + Send + 'static,
{
    let provider = provider.to_string();
    let (tx, rx) = mpsc::channel::<Result<String, ProviderError>>(32);

    tokio::spawn(async move {
        let mut body = response.bytes_stream();
        let mut buffer = SseLineBuffer::default();

        while let Some(next) = body.next().await {
            let bytes = match next {
                Ok(bytes) => bytes,
                Err(err) => {
                    let _ = tx
                        .send(Err(ProviderError::new(&provider, err.to_string())))
                        .await;
                    return;
                }
            };

            for line in buffer.push(&bytes) {
                match parser(&line) {
                    SseEvent::Chunk(text) => {
                        if tx.send(Ok(text)).await.is_err() {
                            // Receiver dropped: client disconnected, cancel
                            // the upstream read
                            debug!("stream receiver dropped, cancelling upstream");
                            return;
                        }
                    }
                    SseEvent::Done => return,
                    SseEvent::Skip => {}
                }
            }
        }
    });

    Box::pin(ReceiverStream::new(rx))
}

/// Strip the `data: ` prefix of an SSE line, if present
pub(crate) fn sse_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_buffer_handles_partial_lines() {
        let mut buffer = SseLineBuffer::default();
        assert!(buffer.push(b"data: hel").is_empty());
        let lines = buffer.push(b"lo\ndata: wor");
        assert_eq!(lines, vec!["data: hello"]);
        let lines = buffer.push(b"ld\n\n");
        assert_eq!(lines, vec!["data: world", ""]);
    }

    #[test]
    fn line_buffer_strips_crlf() {
        let mut buffer = SseLineBuffer::default();
        let lines = buffer.push(b"data: a\r\ndata: b\n");
        assert_eq!(lines, vec!["data: a", "data: b"]);
    }

    #[test]
    fn line_buffer_preserves_multibyte_chars_split_across_chunks() {
        let mut buffer = SseLineBuffer::default();
        let text = "data: 한글".as_bytes();
        // split in the middle of the last multi-byte character
        let (head, tail) = text.split_at(text.len() - 2);
        assert!(buffer.push(head).is_empty());
        buffer.push(tail);
        let lines = buffer.push(b"\n");
        assert_eq!(lines, vec!["data: 한글"]);
    }

    #[test]
    fn data_payload_extraction() {
        assert_eq!(sse_data_payload("data: {\"x\":1}"), Some("{\"x\":1}"));
        assert_eq!(sse_data_payload("data:[DONE]"), Some("[DONE]"));
        assert_eq!(sse_data_payload("event: error"), None);
        assert_eq!(sse_data_payload(""), None);
    }

    #[test]
    fn message_constructors_set_roles() {
        assert_eq!(Message::system("s").role, Role::System);
        assert_eq!(Message::user("u").role, Role::User);
        assert_eq!(Message::assistant("a").role, Role::Assistant);
    }

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), "\"assistant\"");
        assert_eq!(Role::System.as_str(), "system");
    }

    #[test]
    fn provider_error_carries_status() {
        let err = ProviderError::with_status("openai", "rate limited", 429);
        assert_eq!(err.status_code, Some(429));
        assert!(err.to_string().contains("openai"));
    }
}
