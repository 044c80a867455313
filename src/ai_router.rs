// AI Router - provider registry, model resolution, and SSE framing
//
// One registry maps provider names to shared provider instances. Requests
// resolve a model to its provider, then chat or stream through the uniform
// trait. Per-user OAuth credentials never mutate the startup singleton: the
// request path works on a shallow copy of the provider map.

use futures::stream::{self, BoxStream, StreamExt};
use indexmap::IndexMap;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::errors::ApiError;
use crate::providers::{
    extract_account_id, AiProvider, AnthropicProvider, ChatOptions, ChatResponse, CodexProvider,
    GlmProvider, GoogleProvider, Message, ModelInfo, OpenAiProvider, ProviderError,
};
use crate::stream_monitor::{StreamAction, StreamMonitor};

/// Unified AI request routed to whichever provider serves the model
#[derive(Debug, Clone)]
pub struct AiRequest {
    pub messages: Vec<Message>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl AiRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            model: None,
            temperature: None,
            max_tokens: None,
        }
    }

    fn options(&self) -> ChatOptions {
        ChatOptions {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

/// SSE-framed line stream handed to the HTTP layer
pub type SseStream = BoxStream<'static, String>;

/// Map a model id to the OAuth-capable provider that would serve it
pub fn oauth_provider_hint(model: Option<&str>) -> Option<&'static str> {
    let model = model?;
    if model.starts_with("gpt-") {
        Some("openai")
    } else if model.starts_with("gemini") {
        Some("google")
    } else {
        None
    }
}

/// Manages multiple AI providers behind one interface.
///
/// Registration order is preserved: `resolve(None)` picks the first model of
/// the first registered provider.
#[derive(Clone, Default)]
pub struct AiRouter {
    providers: IndexMap<String, Arc<dyn AiProvider>>,
}

impl AiRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect configuration for known API keys and instantiate the
    /// corresponding providers. Instantiation failures are logged and the
    /// provider is skipped.
    pub fn auto_detect(config: &ServerConfig) -> Self {
        let mut router = Self::new();

        if let Some(key) = &config.openai_api_key {
            match OpenAiProvider::new(key.clone()) {
                Ok(provider) => router.register("openai", Arc::new(provider)),
                Err(err) => warn!("failed to initialize openai provider: {err}"),
            }
        }
        if let Some(key) = &config.anthropic_api_key {
            match AnthropicProvider::new(key.clone()) {
                Ok(provider) => router.register("anthropic", Arc::new(provider)),
                Err(err) => warn!("failed to initialize anthropic provider: {err}"),
            }
        }
        if let Some(key) = &config.google_api_key {
            match GoogleProvider::new(key.clone()) {
                Ok(provider) => router.register("google", Arc::new(provider)),
                Err(err) => warn!("failed to initialize google provider: {err}"),
            }
        }
        if let Some(key) = &config.glm_api_key {
            match GlmProvider::new(key.clone()) {
                Ok(provider) => router.register("glm", Arc::new(provider)),
                Err(err) => warn!("failed to initialize glm provider: {err}"),
            }
        }

        info!(
            "AI router initialized with providers: [{}]",
            router.provider_names().join(", ")
        );
        router
    }

    /// Register (or replace) a provider
    pub fn register(&mut self, name: &str, provider: Arc<dyn AiProvider>) {
        self.providers.insert(name.to_string(), provider);
    }

    /// Register the OAuth variant of a named provider.
    ///
    /// For openai the account identifier is either supplied or extracted
    /// from the token; any extraction or construction failure makes this a
    /// no-op so a bad stored token cannot take down the request.
    pub fn register_oauth(&mut self, name: &str, access_token: &str, account_id: Option<String>) {
        match name {
            "openai" => {
                let Some(account_id) =
                    account_id.or_else(|| extract_account_id(access_token))
                else {
                    warn!("cannot extract account id from OAuth token, skipping registration");
                    return;
                };
                match CodexProvider::new(access_token.to_string(), account_id) {
                    Ok(provider) => {
                        self.register("openai", Arc::new(provider));
                        info!("registered OAuth provider: openai");
                    }
                    Err(err) => warn!("failed to register OAuth openai provider: {err}"),
                }
            }
            "google" => match GoogleProvider::with_oauth(access_token.to_string()) {
                Ok(provider) => {
                    self.register("google", Arc::new(provider));
                    info!("registered OAuth provider: google");
                }
                Err(err) => warn!("failed to register OAuth google provider: {err}"),
            },
            other => warn!("OAuth not supported for provider: {other}"),
        }
    }

    /// Remove a registered provider. Returns whether it existed.
    pub fn remove(&mut self, name: &str) -> bool {
        self.providers.shift_remove(name).is_some()
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }

    /// Shallow copy for per-request OAuth injection; the singleton's map is
    /// never touched
    pub fn clone_for_request(&self) -> Self {
        Self {
            providers: self.providers.clone(),
        }
    }

    /// Aggregate model metadata from every registered provider
    pub fn all_models(&self) -> Vec<ModelInfo> {
        self.providers
            .values()
            .flat_map(|p| p.available_models())
            .collect()
    }

    /// Find the provider serving a model. With no model given, the first
    /// model of the first registered provider is selected.
    pub fn resolve(&self, model: Option<&str>) -> Result<(String, Arc<dyn AiProvider>), ApiError> {
        if self.providers.is_empty() {
            return Err(ApiError::Router(
                "no AI providers are registered; set at least one API key".to_string(),
            ));
        }

        match model {
            None => {
                let (name, provider) = self.providers.first().expect("registry is non-empty");
                let models = provider.available_models();
                let first = models.first().ok_or_else(|| {
                    ApiError::Router(format!("provider '{name}' has no available models"))
                })?;
                Ok((first.id.clone(), Arc::clone(provider)))
            }
            Some(model_id) => {
                for provider in self.providers.values() {
                    if provider
                        .available_models()
                        .iter()
                        .any(|m| m.id == model_id)
                    {
                        return Ok((model_id.to_string(), Arc::clone(provider)));
                    }
                }
                let available: Vec<String> =
                    self.all_models().into_iter().map(|m| m.id).collect();
                Err(ApiError::Router(format!(
                    "model '{model_id}' not found; available: {}",
                    available.join(", ")
                )))
            }
        }
    }

    /// Non-streaming chat through the resolved provider
    pub async fn chat(&self, request: &AiRequest) -> Result<ChatResponse, ApiError> {
        let (model, provider) = self.resolve(request.model.as_deref())?;
        provider
            .chat(&request.messages, &model, request.options())
            .await
            .map_err(provider_error)
    }

    /// Stream a chat response as pre-framed SSE lines.
    ///
    /// Every text chunk becomes `data: {"chunk": ...}` followed by a blank
    /// line; the final frame is `data: [DONE]`. A provider failure mid-flight
    /// emits an `event: error` frame and terminates without `[DONE]`.
    /// Resolution failures surface from this call, before any frame.
    pub async fn stream_sse(
        &self,
        request: &AiRequest,
        monitor: Option<StreamMonitor>,
    ) -> Result<SseStream, ApiError> {
        let (model, provider) = self.resolve(request.model.as_deref())?;
        let chunks = provider
            .stream(&request.messages, &model, request.options())
            .await
            .map_err(provider_error)?;

        Ok(frame_sse(chunks, monitor))
    }
}

fn provider_error(err: ProviderError) -> ApiError {
    ApiError::Provider {
        provider: err.provider,
        message: err.message,
        status_code: err.status_code,
    }
}

fn chunk_frame(chunk: &str) -> String {
    format!("data: {}\n\n", json!({"chunk": chunk}))
}

fn error_frame(message: &str) -> String {
    format!("event: error\ndata: {}\n\n", json!({"error": message}))
}

const DONE_FRAME: &str = "data: [DONE]\n\n";

enum FrameState {
    Streaming {
        chunks: crate::providers::ChunkStream,
        monitor: Option<StreamMonitor>,
    },
    Finished,
}

/// Wrap a provider chunk stream into SSE frames, consulting the stream
/// monitor on every chunk. A monitor abort terminates with an error frame;
/// warnings are logged and the stream continues.
fn frame_sse(chunks: crate::providers::ChunkStream, monitor: Option<StreamMonitor>) -> SseStream {
    let initial = FrameState::Streaming { chunks, monitor };

    stream::unfold(initial, |state| async move {
        match state {
            FrameState::Finished => None,
            FrameState::Streaming {
                mut chunks,
                mut monitor,
            } => match chunks.next().await {
                Some(Ok(chunk)) => {
                    if let Some(active) = monitor.as_mut() {
                        let check = active.process_chunk(&chunk);
                        match check.action {
                            StreamAction::Abort => {
                                warn!("stream aborted by monitor: {}", check.reason);
                                return Some((error_frame(&check.reason), FrameState::Finished));
                            }
                            StreamAction::Warn => {
                                warn!("stream quality warning: {}", check.reason);
                            }
                            StreamAction::Continue => {}
                        }
                    }
                    Some((
                        chunk_frame(&chunk),
                        FrameState::Streaming { chunks, monitor },
                    ))
                }
                Some(Err(err)) => Some((error_frame(&err.message), FrameState::Finished)),
                None => Some((DONE_FRAME.to_string(), FrameState::Finished)),
            },
        }
    })
    .boxed()
}
