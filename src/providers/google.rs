// Google Provider - Gemini REST API in API-key and OAuth modes
//
// Both modes share the generateContent wire format and differ only in
// authentication: the API key travels as a query parameter, the OAuth token
// as a bearer header. Role "assistant" becomes "model" and system messages
// are extracted into the systemInstruction field.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use super::{
    sse_chunk_stream, sse_data_payload, AiProvider, ChatOptions, ChatResponse, ChunkStream,
    Message, ModelInfo, ProviderError, Role, SseEvent, TokenUsage,
};

const PROVIDER_NAME: &str = "google";
const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const HTTP_TIMEOUT: Duration = Duration::from_secs(120);

fn supported_models() -> Vec<ModelInfo> {
    let model = |id: &str, name: &str, max_tokens: u32| ModelInfo {
        id: id.to_string(),
        name: name.to_string(),
        provider: PROVIDER_NAME.to_string(),
        max_tokens,
        supports_streaming: true,
    };
    vec![
        model("gemini-2.5-pro", "Gemini 2.5 Pro", 2_097_152),
        model("gemini-2.5-flash", "Gemini 2.5 Flash", 1_048_576),
        model("gemini-2.0-flash", "Gemini 2.0 Flash", 1_048_576),
        model("gemini-1.5-pro", "Gemini 1.5 Pro", 2_097_152),
        model("gemini-1.5-flash", "Gemini 1.5 Flash", 1_048_576),
    ]
}

/// Authentication mode for the Gemini REST API
#[derive(Debug)]
enum AuthMode {
    ApiKey(String),
    OAuth(String),
}

/// AI provider for Google Gemini models
#[derive(Debug)]
pub struct GoogleProvider {
    auth: AuthMode,
    client: reqwest::Client,
}

/// Convert unified messages into Gemini contents plus an optional
/// systemInstruction string
fn convert_messages(messages: &[Message]) -> (Vec<Value>, Option<String>) {
    let mut system_parts: Vec<&str> = Vec::new();
    let mut contents: Vec<Value> = Vec::new();

    for message in messages {
        if message.role == Role::System {
            system_parts.push(&message.content);
        } else {
            let role = match message.role {
                Role::Assistant => "model",
                _ => "user",
            };
            contents.push(json!({
                "role": role,
                "parts": [{"text": message.content}],
            }));
        }
    }

    let system_instruction = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n"))
    };
    (contents, system_instruction)
}

fn request_body(messages: &[Message], options: ChatOptions) -> Value {
    let (contents, system_instruction) = convert_messages(messages);
    let mut body = json!({"contents": contents});
    if let Some(instruction) = system_instruction {
        body["systemInstruction"] = json!({"parts": [{"text": instruction}]});
    }
    let mut generation_config = serde_json::Map::new();
    if let Some(temperature) = options.temperature {
        generation_config.insert("temperature".to_string(), json!(temperature));
    }
    if let Some(max_tokens) = options.max_tokens {
        generation_config.insert("maxOutputTokens".to_string(), json!(max_tokens));
    }
    if !generation_config.is_empty() {
        body["generationConfig"] = Value::Object(generation_config);
    }
    body
}

/// Extract concatenated candidate text from a generateContent payload
fn extract_text(data: &Value) -> String {
    let mut text = String::new();
    if let Some(candidates) = data["candidates"].as_array() {
        for candidate in candidates {
            if let Some(parts) = candidate["content"]["parts"].as_array() {
                for part in parts {
                    text.push_str(part["text"].as_str().unwrap_or_default());
                }
            }
        }
    }
    text
}

fn parse_stream_line(line: &str) -> SseEvent {
    let Some(payload) = sse_data_payload(line) else {
        return SseEvent::Skip;
    };
    let Ok(event) = serde_json::from_str::<Value>(payload) else {
        return SseEvent::Skip;
    };
    let text = extract_text(&event);
    if text.is_empty() {
        SseEvent::Skip
    } else {
        SseEvent::Chunk(text)
    }
}

impl GoogleProvider {
    /// API-key mode
    pub fn new(api_key: String) -> Result<Self, ProviderError> {
        if api_key.is_empty() {
            return Err(ProviderError::new(PROVIDER_NAME, "API key is required"));
        }
        Ok(Self {
            auth: AuthMode::ApiKey(api_key),
            client: Self::build_client()?,
        })
    }

    /// OAuth bearer mode
    pub fn with_oauth(oauth_token: String) -> Result<Self, ProviderError> {
        if oauth_token.is_empty() {
            return Err(ProviderError::new(PROVIDER_NAME, "OAuth token is required"));
        }
        Ok(Self {
            auth: AuthMode::OAuth(oauth_token),
            client: Self::build_client()?,
        })
    }

    fn build_client() -> Result<reqwest::Client, ProviderError> {
        reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::new(PROVIDER_NAME, e.to_string()))
    }

    async fn post(&self, url: String, body: &Value) -> Result<reqwest::Response, ProviderError> {
        let mut request = self.client.post(url).json(body);
        request = match &self.auth {
            AuthMode::ApiKey(key) => request.query(&[("key", key.as_str())]),
            AuthMode::OAuth(token) => request.bearer_auth(token),
        };

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::new(PROVIDER_NAME, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::with_status(
                PROVIDER_NAME,
                format!(
                    "Gemini API returned {status}: {}",
                    text.chars().take(500).collect::<String>()
                ),
                status.as_u16(),
            ));
        }
        Ok(response)
    }
}

#[async_trait]
impl AiProvider for GoogleProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn chat(
        &self,
        messages: &[Message],
        model: &str,
        options: ChatOptions,
    ) -> Result<ChatResponse, ProviderError> {
        let url = format!("{API_BASE}/models/{model}:generateContent");
        let body = request_body(messages, options);
        let response = self.post(url, &body).await?;

        let data: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::new(PROVIDER_NAME, e.to_string()))?;

        let usage = data.get("usageMetadata").map(|meta| {
            let prompt_tokens = meta["promptTokenCount"].as_u64().unwrap_or(0) as u32;
            let completion_tokens = meta["candidatesTokenCount"].as_u64().unwrap_or(0) as u32;
            TokenUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: meta["totalTokenCount"]
                    .as_u64()
                    .unwrap_or((prompt_tokens + completion_tokens) as u64)
                    as u32,
            }
        });

        Ok(ChatResponse {
            content: extract_text(&data),
            model: model.to_string(),
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
        let url = format!("{API_BASE}/models/{model}:streamGenerateContent?alt=sse");
        let body = request_body(messages, options);
        let response = self.post(url, &body).await?;
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
    fn assistant_role_becomes_model() {
        let (contents, _) = convert_messages(&[
            Message::user("question"),
            Message::assistant("answer"),
        ]);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
    }

    #[test]
    fn system_messages_become_system_instruction() {
        let (contents, instruction) = convert_messages(&[
            Message::system("rule one"),
            Message::system("rule two"),
            Message::user("hi"),
        ]);
        assert_eq!(instruction.as_deref(), Some("rule one\nrule two"));
        assert_eq!(contents.len(), 1);

        let body = request_body(
            &[Message::system("rule"), Message::user("hi")],
            ChatOptions::default(),
        );
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "rule");
    }

    #[test]
    fn generation_config_is_only_present_when_needed() {
        let plain = request_body(&[Message::user("hi")], ChatOptions::default());
        assert!(plain.get("generationConfig").is_none());

        let tuned = request_body(
            &[Message::user("hi")],
            ChatOptions {
                temperature: Some(0.3),
                max_tokens: Some(64),
            },
        );
        assert_eq!(tuned["generationConfig"]["temperature"], json!(0.3));
        assert_eq!(tuned["generationConfig"]["maxOutputTokens"], json!(64));
    }

    #[test]
    fn candidate_text_extraction() {
        let data = json!({
            "candidates": [
                {"content": {"parts": [{"text": "Hello "}, {"text": "world"}]}}
            ]
        });
        assert_eq!(extract_text(&data), "Hello world");
        assert_eq!(extract_text(&json!({})), "");
    }

    #[test]
    fn stream_line_parsing() {
        let line = r#"data: {"candidates":[{"content":{"parts":[{"text":"chunk"}]}}]}"#;
        assert!(matches!(
            parse_stream_line(line),
            SseEvent::Chunk(chunk) if chunk == "chunk"
        ));
        assert!(matches!(parse_stream_line("data: {}"), SseEvent::Skip));
        assert!(matches!(parse_stream_line("not sse"), SseEvent::Skip));
    }

    #[test]
    fn both_auth_modes_construct() {
        assert!(GoogleProvider::new("key".to_string()).is_ok());
        assert!(GoogleProvider::with_oauth("ya29.token".to_string()).is_ok());
        assert!(GoogleProvider::new(String::new()).is_err());
        assert!(GoogleProvider::with_oauth(String::new()).is_err());
    }
}
