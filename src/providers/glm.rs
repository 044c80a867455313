// GLM Provider - OpenAI-compatible Z.ai endpoint through a blocking client
//
// The upstream endpoint is plain chat-completions, but this variant is built
// on the blocking HTTP client adapted into the async interface by offloading
// every call to the blocking worker pool. Image content travels as data-URL
// parts.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::io::{BufRead, BufReader};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;

use super::{
    sse_data_payload, AiProvider, ChatOptions, ChatResponse, ChunkStream, Message, ModelInfo,
    ProviderError, SseEvent, TokenUsage,
};

const PROVIDER_NAME: &str = "glm";
const DEFAULT_BASE_URL: &str = "https://api.z.ai/api/coding/paas/v4";
const HTTP_TIMEOUT: Duration = Duration::from_secs(120);

fn supported_models() -> Vec<ModelInfo> {
    let model = |id: &str, name: &str, streaming: bool| ModelInfo {
        id: id.to_string(),
        name: name.to_string(),
        provider: PROVIDER_NAME.to_string(),
        max_tokens: 128_000,
        supports_streaming: streaming,
    };
    vec![
        model("glm-4.6", "GLM-4.6", true),
        model("glm-4.5", "GLM-4.5", true),
        model("glm-4.5-flash", "GLM-4.5 Flash", true),
        model("glm-4.5-air", "GLM-4.5 Air", true),
        model("glm-4.5v", "GLM-4.5V (Vision)", true),
    ]
}

/// OpenAI-compatible provider for the GLM model family
#[derive(Debug)]
pub struct GlmProvider {
    api_key: String,
    base_url: String,
}

/// Convert messages to wire dicts. Images become data-URL content parts.
fn to_wire_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| match &m.images {
            Some(images) if !images.is_empty() => {
                let mut content = vec![json!({"type": "text", "text": m.content})];
                for image in images {
                    content.push(json!({
                        "type": "image_url",
                        "image_url": {
                            "url": format!(
                                "data:{};base64,{}",
                                image.mime_type, image.base64_data
                            )
                        },
                    }));
                }
                json!({"role": m.role.as_str(), "content": content})
            }
            _ => json!({"role": m.role.as_str(), "content": m.content}),
        })
        .collect()
}

fn request_body(messages: &[Message], model: &str, options: ChatOptions, stream: bool) -> Value {
    let mut body = json!({
        "model": model,
        "messages": to_wire_messages(messages),
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

/// OpenAI-compatible delta line parsing
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

impl GlmProvider {
    pub fn new(api_key: String) -> Result<Self, ProviderError> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(api_key: String, base_url: String) -> Result<Self, ProviderError> {
        if api_key.is_empty() {
            return Err(ProviderError::new(PROVIDER_NAME, "API key is required"));
        }
        Ok(Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

/// The blocking client must be created and driven on the worker pool, never
/// on the async runtime threads.
fn blocking_client() -> Result<reqwest::blocking::Client, ProviderError> {
    reqwest::blocking::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(|e| ProviderError::new(PROVIDER_NAME, e.to_string()))
}

fn send_blocking(
    url: &str,
    api_key: &str,
    body: &Value,
) -> Result<reqwest::blocking::Response, ProviderError> {
    let client = blocking_client()?;
    let response = client
        .post(url)
        .bearer_auth(api_key)
        .json(body)
        .send()
        .map_err(|e| ProviderError::new(PROVIDER_NAME, e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().unwrap_or_default();
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

#[async_trait]
impl AiProvider for GlmProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn chat(
        &self,
        messages: &[Message],
        model: &str,
        options: ChatOptions,
    ) -> Result<ChatResponse, ProviderError> {
        let url = self.completions_url();
        let api_key = self.api_key.clone();
        let body = request_body(messages, model, options, false);
        let model = model.to_string();

        tokio::task::spawn_blocking(move || {
            let response = send_blocking(&url, &api_key, &body)?;
            let data: Value = response
                .json()
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
                model,
                provider: PROVIDER_NAME.to_string(),
                usage,
                finish_reason,
            })
        })
        .await
        .map_err(|e| ProviderError::new(PROVIDER_NAME, format!("worker task failed: {e}")))?
    }

    async fn stream(
        &self,
        messages: &[Message],
        model: &str,
        options: ChatOptions,
    ) -> Result<ChunkStream, ProviderError> {
        let url = self.completions_url();
        let api_key = self.api_key.clone();
        let body = request_body(messages, model, options, true);

        let (tx, rx) = mpsc::channel::<Result<String, ProviderError>>(32);
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), ProviderError>>();

        tokio::task::spawn_blocking(move || {
            let response = match send_blocking(&url, &api_key, &body) {
                Ok(response) => {
                    let _ = ready_tx.send(Ok(()));
                    response
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                    return;
                }
            };

            let reader = BufReader::new(response);
            for line in reader.lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(err) => {
                        let _ = tx.blocking_send(Err(ProviderError::new(
                            PROVIDER_NAME,
                            err.to_string(),
                        )));
                        return;
                    }
                };
                match parse_stream_line(&line) {
                    SseEvent::Chunk(chunk) => {
                        if tx.blocking_send(Ok(chunk)).is_err() {
                            return;
                        }
                    }
                    SseEvent::Done => return,
                    SseEvent::Skip => {}
                }
            }
        });

        ready_rx
            .await
            .map_err(|_| ProviderError::new(PROVIDER_NAME, "worker terminated before connect"))??;
        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    fn available_models(&self) -> Vec<ModelInfo> {
        supported_models()
    }
}
