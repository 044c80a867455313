// OpenAI Provider - chat-completions API with token-delta streaming

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use super::{
    sse_chunk_stream, sse_data_payload, AiProvider, ChatOptions, ChatResponse, ChunkStream,
    Message, ModelInfo, ProviderError, SseEvent, TokenUsage,
};

const PROVIDER_NAME: &str = "openai";
const API_BASE: &str = "https://api.openai.com/v1";
const HTTP_TIMEOUT: Duration = Duration::from_secs(120);

fn supported_models() -> Vec<ModelInfo> {
    vec![
        ModelInfo {
            id: "gpt-4o".to_string(),
            name: "GPT-4o".to_string(),
            provider: PROVIDER_NAME.to_string(),
            max_tokens: 128_000,
            supports_streaming: true,
        },
        ModelInfo {
            id: "gpt-4o-mini".to_string(),
            name: "GPT-4o mini".to_string(),
            provider: PROVIDER_NAME.to_string(),
            max_tokens: 128_000,
            supports_streaming: true,
        },
    ]
}

/// AI provider backed by the OpenAI chat-completions API
#[derive(Debug)]
pub struct OpenAiProvider {
    api_key: String,
    api_base: String,
    client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(api_key: String) -> Result<Self, ProviderError> {
        if api_key.is_empty() {
            return Err(ProviderError::new(PROVIDER_NAME, "API key is required"));
        }
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::new(PROVIDER_NAME, e.to_string()))?;
        Ok(Self {
            api_key,
            api_base: API_BASE.to_string(),
            client,
        })
    }

    /// Override the API base, e.g. for OpenAI-compatible gateways
    pub fn with_api_base(mut self, api_base: String) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    fn request_body(messages: &[Message], model: &str, options: ChatOptions, stream: bool) -> Value {
        let api_messages: Vec<Value> = messages
            .iter()
            .map(|m| json!({"role": m.role.as_str(), "content": m.content}))
            .collect();

        let mut body = json!({
            "model": model,
            "messages": api_messages,
            "stream": stream,
        });
        if let Some(temperature) = options.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = options.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        body
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response, ProviderError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::new(PROVIDER_NAME, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::with_status(
                PROVIDER_NAME,
                format!("API returned {status}: {}", truncate(&text, 500)),
                status.as_u16(),
            ));
        }
        Ok(response)
    }
}

fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Parse one chat-completions streaming line
fn parse_stream_line(line: &str) -> SseEvent {
    let Some(payload) = sse_data_payload(line) else {
        return SseEvent::Skip;
    };
    if payload.trim() == "[DONE]" {
        return SseEvent::Done;
    }
    let Ok(event) = serde_json::from_str::<Value>(payload) else {
        return SseEvent::Skip;
    };
    match event["choices"][0]["delta"]["content"].as_str() {
        Some(delta) if !delta.is_empty() => SseEvent::Chunk(delta.to_string()),
        _ => SseEvent::Skip,
    }
}

#[async_trait]
impl AiProvider for OpenAiProvider {
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

        let content = data["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let finish_reason = data["choices"][0]["finish_reason"]
            .as_str()
            .map(str::to_string);

        let usage = data.get("usage").map(|u| TokenUsage {
            prompt_tokens: u["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            completion_tokens: u["completion_tokens"].as_u64().unwrap_or(0) as u32,
            total_tokens: u["total_tokens"].as_u64().unwrap_or(0) as u32,
        });

        Ok(ChatResponse {
            content,
            model: data["model"].as_str().unwrap_or(model).to_string(),
            provider: PROVIDER_NAME.to_string(),
            usage,
            finish_reason,
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
    fn empty_api_key_is_rejected() {
        assert!(OpenAiProvider::new(String::new()).is_err());
    }

    #[test]
    fn request_body_forwards_options_when_present() {
        let messages = vec![Message::user("hi")];
        let body = OpenAiProvider::request_body(
            &messages,
            "gpt-4o",
            ChatOptions {
                temperature: Some(0.2),
                max_tokens: Some(256),
            },
            false,
        );
        assert_eq!(body["temperature"], json!(0.2));
        assert_eq!(body["max_tokens"], json!(256));
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn request_body_omits_absent_options() {
        let body = OpenAiProvider::request_body(
            &[Message::user("hi")],
            "gpt-4o",
            ChatOptions::default(),
            true,
        );
        assert!(body.get("temperature").is_none());
        assert!(body.get("max_tokens").is_none());
        assert_eq!(body["stream"], json!(true));
    }

    #[test]
    fn stream_line_parsing() {
        let delta = r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#;
        assert!(matches!(
            parse_stream_line(delta),
            SseEvent::Chunk(chunk) if chunk == "Hel"
        ));
        assert!(matches!(parse_stream_line("data: [DONE]"), SseEvent::Done));
        assert!(matches!(parse_stream_line(""), SseEvent::Skip));
        assert!(matches!(parse_stream_line("data: {not json"), SseEvent::Skip));
        let role_only = r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert!(matches!(parse_stream_line(role_only), SseEvent::Skip));
    }

    #[test]
    fn models_include_streaming_support() {
        let provider = OpenAiProvider::new("sk-test".to_string()).unwrap();
        let models = provider.available_models();
        assert!(models.iter().any(|m| m.id == "gpt-4o"));
        assert!(models.iter().all(|m| m.supports_streaming));
    }
}
