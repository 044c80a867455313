// Integration tests for the AI routing layer: SSE framing contracts,
// registry resolution, and per-request OAuth hot-swap.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use futures::{stream, StreamExt};
use serde_json::json;
use std::sync::Arc;

use notewise::{
    AiProvider, AiRequest, AiRouter, ChatOptions, ChatResponse, ChunkStream, Message, ModelInfo,
    ProviderError,
};

#[derive(Debug)]
struct FixedProvider {
    name: String,
    model: String,
    chunks: Vec<Result<String, ProviderError>>,
}

#[async_trait]
impl AiProvider for FixedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(
        &self,
        _messages: &[Message],
        model: &str,
        _options: ChatOptions,
    ) -> Result<ChatResponse, ProviderError> {
        Ok(ChatResponse {
            content: "fixed".to_string(),
            model: model.to_string(),
            provider: self.name.clone(),
            usage: None,
            finish_reason: Some("stop".to_string()),
        })
    }

    async fn stream(
        &self,
        _messages: &[Message],
        _model: &str,
        _options: ChatOptions,
    ) -> Result<ChunkStream, ProviderError> {
        Ok(Box::pin(stream::iter(self.chunks.clone())))
    }

    fn available_models(&self) -> Vec<ModelInfo> {
        vec![ModelInfo {
            id: self.model.clone(),
            name: self.model.clone(),
            provider: self.name.clone(),
            max_tokens: 8192,
            supports_streaming: true,
        }]
    }
}

fn provider(name: &str, model: &str, chunks: Vec<Result<String, ProviderError>>) -> FixedProvider {
    FixedProvider {
        name: name.to_string(),
        model: model.to_string(),
        chunks,
    }
}

fn request(model: &str) -> AiRequest {
    AiRequest {
        messages: vec![Message::user("question")],
        model: Some(model.to_string()),
        temperature: None,
        max_tokens: None,
    }
}

async fn collect_frames(router: &AiRouter, model: &str) -> Vec<String> {
    router
        .stream_sse(&request(model), None)
        .await
        .expect("stream should open")
        .collect()
        .await
}

#[tokio::test]
async fn successful_stream_ends_with_exactly_one_done_frame() {
    let mut router = AiRouter::new();
    router.register(
        "mock",
        Arc::new(provider(
            "mock",
            "m",
            vec![Ok("alpha".to_string()), Ok("beta".to_string())],
        )),
    );

    let frames = collect_frames(&router, "m").await;
    let done_count = frames.iter().filter(|f| *f == "data: [DONE]\n\n").count();
    assert_eq!(done_count, 1);
    assert_eq!(frames.last().unwrap(), "data: [DONE]\n\n");
}

#[tokio::test]
async fn error_mid_stream_replaces_done_with_error_event() {
    let mut router = AiRouter::new();
    router.register(
        "mock",
        Arc::new(provider(
            "mock",
            "m",
            vec![
                Ok("Hel".to_string()),
                Ok("lo".to_string()),
                Err(ProviderError::new("mock", "upstream dropped")),
            ],
        )),
    );

    let frames = collect_frames(&router, "m").await;
    assert_eq!(frames[0], "data: {\"chunk\":\"Hel\"}\n\n");
    assert_eq!(frames[1], "data: {\"chunk\":\"lo\"}\n\n");
    assert!(frames[2].starts_with("event: error\ndata: "));
    assert!(frames[2].ends_with("\n\n"));
    assert!(!frames.contains(&"data: [DONE]\n\n".to_string()));
}

#[tokio::test]
async fn empty_stream_still_terminates() {
    let mut router = AiRouter::new();
    router.register("mock", Arc::new(provider("mock", "m", vec![])));
    let frames = collect_frames(&router, "m").await;
    assert_eq!(frames, vec!["data: [DONE]\n\n"]);
}

#[tokio::test]
async fn empty_registry_fails_before_streaming() {
    let router = AiRouter::new();
    assert!(router.stream_sse(&request("m"), None).await.is_err());
    assert!(router.chat(&request("m")).await.is_err());
    assert!(router.resolve(None).is_err());
}

#[test]
fn oauth_hot_swap_leaves_singleton_unchanged() {
    // Singleton has no openai provider registered.
    let mut singleton = AiRouter::new();
    singleton.register("anthropic", Arc::new(provider("anthropic", "claude-x", vec![])));
    assert!(singleton.resolve(Some("gpt-4o")).is_err());

    // A stored OAuth token arrives with a request for gpt-4o.
    let payload = URL_SAFE_NO_PAD.encode(
        json!({"https://api.openai.com/auth": {"chatgpt_account_id": "acct-7"}}).to_string(),
    );
    let token = format!("{}.{payload}.sig", URL_SAFE_NO_PAD.encode(b"{}"));

    let mut per_request = singleton.clone_for_request();
    per_request.register_oauth("openai", &token, None);

    // The copy resolves the model through the injected Codex provider...
    let (model, resolved) = per_request.resolve(Some("gpt-4o")).expect("resolves via oauth");
    assert_eq!(model, "gpt-4o");
    assert_eq!(resolved.name(), "openai-codex");

    // ...while the singleton's provider map is untouched.
    assert_eq!(singleton.provider_names(), vec!["anthropic"]);
    assert!(singleton.resolve(Some("gpt-4o")).is_err());
}

#[tokio::test]
async fn chat_resolves_model_across_providers() {
    let mut router = AiRouter::new();
    router.register("first", Arc::new(provider("first", "model-a", vec![])));
    router.register("second", Arc::new(provider("second", "model-b", vec![])));

    let response = router.chat(&request("model-b")).await.unwrap();
    assert_eq!(response.provider, "second");
    assert_eq!(response.model, "model-b");
}
