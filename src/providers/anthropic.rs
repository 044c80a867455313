// Anthropic Provider - Messages API with separated system prompt
//
// The Messages API takes system text as a top-level parameter rather than a
// message role, and requires an explicit max_tokens on every call.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use super::{
    sse_chunk_stream, sse_data_payload, AiProvider, ChatOptions, ChatResponse, ChunkStream,
    Message, ModelInfo, ProviderError, Role, SseEvent, TokenUsage,
};

const PROVIDER_NAME: &str = "anthropic";
const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const HTTP_TIMEOUT: Duration = Duration::from_secs(120);

/// max_tokens is mandatory for the Messages API
const DEFAULT_MAX_TOKENS: u32 = 4096;

fn supported_models() -> Vec<ModelInfo> {
    vec![
        ModelInfo {
            id: "claude-3-5-sonnet-20241022".to_string(),
            name: "Claude 3.5 Sonnet".to_string(),
            provider: PROVIDER_NAME.to_string(),
            max_tokens: 200_000,
            supports_streaming: true,
        },
        ModelInfo {
            id: "claude-3-haiku-20240307".to_string(),
            name: "Claude 3 Haiku".to_string(),
            provider: PROVIDER_NAME.to_string(),
            max_tokens: 200_000,
            supports_streaming: true,
        },
    ]
}

/// AI provider backed by Anthropic's Messages API
#[derive(Debug)]
pub struct AnthropicProvider {
    api_key: String,
    client: reqwest::Client,
}

/// Concatenate system messages (joined with a double newline) and convert
/// the remainder into API messages
fn separate_system_messages(messages: &[Message]) -> (Option<String>, Vec<Value>) {
    let mut system_parts: Vec<&str> = Vec::new();
    let mut api_messages: Vec<Value> = Vec::new();

    for message in messages {
        if message.role == Role::System {
            system_parts.push(&message.content);
        } else {
            api_messages.push(json!({
                "role": message.role.as_str(),
                "content": message.content,
            }));
        }
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };
    (system, api_messages)
}

impl AnthropicProvider {
    pub fn new(api_key: String) -> Result<Self, ProviderError> {
        if api_key.is_empty() {
            return Err(ProviderError::new(PROVIDER_NAME, "API key is required"));
        }
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::new(PROVIDER_NAME, e.to_string()))?;
        Ok(Self { api_key, client })
    }

    fn request_body(messages: &[Message], model: &str, options: ChatOptions, stream: bool) -> Value {
        let (system, api_messages) = separate_system_messages(messages);

        let mut body = json!({
            "model": model,
            "messages": api_messages,
            "max_tokens": options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "stream": stream,
        });
        if let Some(system) = system {
            body["system"] = json!(system);
        }
        if let Some(temperature) = options.temperature {
            body["temperature"] = json!(temperature);
        }
        body
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response, ProviderError> {
        let response = self
            .client
            .post(API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::new(PROVIDER_NAME, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::with_status(
                PROVIDER_NAME,
                format!(
                    "API returned {status}: {}",
                    text.chars().take(500).collect::<String>()
                ),
                status.as_u16(),
            ));
        }
        Ok(response)
    }
}

/// Parse one Messages-API streaming line. Text arrives in
/// content_block_delta events; message_stop closes the stream.
fn parse_stream_line(line: &str) -> SseEvent {
    let Some(payload) = sse_data_payload(line) else {
        return SseEvent::Skip;
    };
    let Ok(event) = serde_json::from_str::<Value>(payload) else {
        return SseEvent::Skip;
    };
    match event["type"].as_str() {
        Some("content_block_delta") => match event["delta"]["text"].as_str() {
            Some(text) if !text.is_empty() => SseEvent::Chunk(text.to_string()),
            _ => SseEvent::Skip,
        },
        Some("message_stop") => SseEvent::Done,
        _ => SseEvent::Skip,
    }
}

#[async_trait]
impl AiProvider for AnthropicProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn chat(
        &self,
        messages: &[Message],
        model: &str,
        options: ChatOptions,
    ) -> Result<ChatResponse, ProviderError> {
        let body = Self::request_body(messages, model, options, false);
        let response = self.post(&body).await?;

        let data: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::new(PROVIDER_NAME, e.to_string()))?;

        let mut content = String::new();
        if let Some(blocks) = data["content"].as_array() {
            for block in blocks {
                if block["type"] == "text" {
                    content.push_str(block["text"].as_str().unwrap_or_default());
                }
            }
        }

        let input_tokens = data["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32;
        let output_tokens = data["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32;

        Ok(ChatResponse {
            content,
            model: data["model"].as_str().unwrap_or(model).to_string(),
            provider: PROVIDER_NAME.to_string(),
            usage: Some(TokenUsage {
                prompt_tokens: input_tokens,
                completion_tokens: output_tokens,
                total_tokens: input_tokens + output_tokens,
            }),
            finish_reason: data["stop_reason"].as_str().map(str::to_string),
        })
    }

    async fn stream(
        &self,
        messages: &[Message],
        model: &str,
        options: ChatOptions,
    ) -> Result<ChunkStream, ProviderError> {
        let body = Self::request_body(messages, model, options, true);
        let response = self.post(&body).await?;
        Ok(sse_chunk_stream(response, PROVIDER_NAME, parse_stream_line))
    }

    fn available_models(&self) -> Vec<ModelInfo> {
        supported_models()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_messages_are_concatenated() {
        let messages = vec![
            Message::system("first rule"),
            Message::user("question"),
            Message::system("second rule"),
            Message::assistant("answer"),
        ];
        let (system, api_messages) = separate_system_messages(&messages);
        assert_eq!(system.as_deref(), Some("first rule\n\nsecond rule"));
        assert_eq!(api_messages.len(), 2);
        assert_eq!(api_messages[0]["role"], "user");
        assert_eq!(api_messages[1]["role"], "assistant");
    }

    #[test]
    fn no_system_messages_yields_none() {
        let (system, api_messages) = separate_system_messages(&[Message::user("hi")]);
        assert!(system.is_none());
        assert_eq!(api_messages.len(), 1);
    }

    #[test]
    fn max_tokens_defaults_when_unset() {
        let body = AnthropicProvider::request_body(
            &[Message::user("hi")],
            "claude-3-haiku-20240307",
            ChatOptions::default(),
            false,
        );
        assert_eq!(body["max_tokens"], json!(DEFAULT_MAX_TOKENS));
        assert!(body.get("system").is_none());
    }

    #[test]
    fn explicit_max_tokens_is_forwarded() {
        let body = AnthropicProvider::request_body(
            &[Message::user("hi")],
            "claude-3-haiku-20240307",
            ChatOptions {
                temperature: Some(0.1),
                max_tokens: Some(512),
            },
            true,
        );
        assert_eq!(body["max_tokens"], json!(512));
        assert_eq!(body["temperature"], json!(0.1));
        assert_eq!(body["stream"], json!(true));
    }

    #[test]
    fn stream_line_parsing() {
        let delta = r#"data: {"type":"content_block_delta","delta":{"type":"text_delta","text":"Hi"}}"#;
        assert!(matches!(
            parse_stream_line(delta),
            SseEvent::Chunk(chunk) if chunk == "Hi"
        ));
        let stop = r#"data: {"type":"message_stop"}"#;
        assert!(matches!(parse_stream_line(stop), SseEvent::Done));
        let ping = r#"data: {"type":"ping"}"#;
        assert!(matches!(parse_stream_line(ping), SseEvent::Skip));
        assert!(matches!(parse_stream_line("event: ping"), SseEvent::Skip));
    }
}
