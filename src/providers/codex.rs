// Codex Provider - OAuth-backed access to the ChatGPT backend
//
// Authenticates with an opaque bearer token plus the account identifier
// extracted from the token's payload segment. Messages are flattened into a
// single labeled input string for the Responses API; streaming surfaces only
// response.output_text.delta events.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::{json, Value};
use std::time::Duration;

use super::{
    sse_chunk_stream, sse_data_payload, AiProvider, ChatOptions, ChatResponse, ChunkStream,
    Message, ModelInfo, ProviderError, Role, SseEvent, TokenUsage,
};

const PROVIDER_NAME: &str = "openai-codex";
const API_BASE: &str = "https://chatgpt.com/backend-api";
const HTTP_TIMEOUT: Duration = Duration::from_secs(120);

/// Claim path holding the account identifier inside the access token
const AUTH_CLAIM: &str = "https://api.openai.com/auth";

fn supported_models() -> Vec<ModelInfo> {
    let model = |id: &str, name: &str, max_tokens: u32| ModelInfo {
        id: id.to_string(),
        name: name.to_string(),
        provider: PROVIDER_NAME.to_string(),
        max_tokens,
        supports_streaming: true,
    };
    vec![
        model("gpt-5", "GPT-5 (ChatGPT)", 400_000),
        model("gpt-5-mini", "GPT-5 mini (ChatGPT)", 200_000),
        model("o3", "o3 (ChatGPT)", 200_000),
        model("o4-mini", "o4 mini (ChatGPT)", 200_000),
        model("gpt-4o", "GPT-4o (ChatGPT)", 128_000),
        model("gpt-4o-mini", "GPT-4o mini (ChatGPT)", 128_000),
    ]
}

/// Extract the account id from the middle segment of the access token.
///
/// The segment is base64url-decoded JSON; the id lives under the
/// `https://api.openai.com/auth` claim. Returns None on any shape mismatch.
pub fn extract_account_id(token: &str) -> Option<String> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return None;
    }
    let decoded = URL_SAFE_NO_PAD.decode(parts[1].trim_end_matches('=')).ok()?;
    let payload: Value = serde_json::from_slice(&decoded).ok()?;
    payload[AUTH_CLAIM]["chatgpt_account_id"]
        .as_str()
        .map(str::to_string)
}

/// Flatten the conversation into a single input string with role labels
fn messages_to_input(messages: &[Message]) -> String {
    let mut parts: Vec<String> = Vec::new();
    for message in messages {
        match message.role {
            Role::System => parts.push(format!("[System]\n{}", message.content)),
            Role::User => parts.push(message.content.clone()),
            Role::Assistant => parts.push(format!("[Assistant]\n{}", message.content)),
        }
    }
    parts.join("\n\n")
}

/// OAuth-backed provider speaking to the ChatGPT Responses API
#[derive(Debug)]
pub struct CodexProvider {
    access_token: String,
    account_id: String,
    client: reqwest::Client,
}

impl CodexProvider {
    pub fn new(access_token: String, account_id: String) -> Result<Self, ProviderError> {
        if access_token.is_empty() || account_id.is_empty() {
            return Err(ProviderError::new(
                PROVIDER_NAME,
                "access token and account id are required",
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::new(PROVIDER_NAME, e.to_string()))?;
        Ok(Self {
            access_token,
            account_id,
            client,
        })
    }

    fn request_body(messages: &[Message], model: &str, options: ChatOptions, stream: bool) -> Value {
        let mut body = json!({
            "model": model,
            "input": messages_to_input(messages),
            "stream": stream,
        });
        if let Some(temperature) = options.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = options.max_tokens {
            body["max_output_tokens"] = json!(max_tokens);
        }
        body
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response, ProviderError> {
        let response = self
            .client
            .post(format!("{API_BASE}/codex/responses"))
            .bearer_auth(&self.access_token)
            .header("chatgpt-account-id", &self.account_id)
            .header("OpenAI-Beta", "responses=experimental")
            .header("accept", "text/event-stream")
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
                    "backend returned {status}: {}",
                    text.chars().take(500).collect::<String>()
                ),
                status.as_u16(),
            ));
        }
        Ok(response)
    }
}

/// Only output-text delta events carry user-visible text
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
    if event["type"] == "response.output_text.delta" {
        match event["delta"].as_str() {
            Some(delta) if !delta.is_empty() => SseEvent::Chunk(delta.to_string()),
            _ => SseEvent::Skip,
        }
    } else {
        SseEvent::Skip
    }
}

#[async_trait]
impl AiProvider for CodexProvider {
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

        // Responses API: output[] items of type "message" hold the text parts
        let mut content = String::new();
        if let Some(output) = data["output"].as_array() {
            for item in output {
                if item["type"] != "message" {
                    continue;
                }
                if let Some(parts) = item["content"].as_array() {
                    for part in parts {
                        if part["type"] == "output_text" {
                            content.push_str(part["text"].as_str().unwrap_or_default());
                        }
                    }
                }
            }
        }

        let usage = data.get("usage").map(|u| TokenUsage {
            prompt_tokens: u["input_tokens"].as_u64().unwrap_or(0) as u32,
            completion_tokens: u["output_tokens"].as_u64().unwrap_or(0) as u32,
            total_tokens: u["total_tokens"].as_u64().unwrap_or(0) as u32,
        });

        Ok(ChatResponse {
            content,
            model: data["model"].as_str().unwrap_or(model).to_string(),
            provider: PROVIDER_NAME.to_string(),
            usage,
            finish_reason: None,
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
