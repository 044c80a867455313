// HTTP Server - wire contracts for search, AI, and OAuth operations
//
// Every endpoint except /health requires a bearer token, checked by an
// injected AuthVerifier (real JWT verification is an external collaborator;
// a static-token verifier covers development and tests). Errors travel as
// the ApiError union and render as {detail} bodies with deterministic
// status codes.

use axum::extract::{Path, Query as AxumQuery, State};
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{Json, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use futures::StreamExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::ai_router::{oauth_provider_hint, AiRequest, AiRouter};
use crate::config::{SearchParams, ServerConfig};
use crate::database::Database;
use crate::embedding::EmbeddingService;
use crate::errors::ApiError;
use crate::hybrid::HybridSearchEngine;
use crate::index_driver::EmbeddingIndexDriver;
use crate::metrics::MetricsRecorder;
use crate::oauth::OAuthService;
use crate::prompts;
use crate::providers::{Message, ModelInfo, TokenUsage};
use crate::qa_evaluator::SearchQaEvaluator;
use crate::quality_gate::QualityGate;
use crate::refinement::{RefinementResult, SearchRefiner};
use crate::search_engine::{
    FullTextSearchEngine, SearchResult, SemanticSearchEngine, TrigramSearchEngine,
};
use crate::stream_monitor::StreamMonitor;
use crate::types::{
    AiFeedback, FeatureType, SearchEvent, SearchFeedback, SearchType, ValidatedLimit,
    ValidatedSearchQuery,
};

// ---------------------------------------------------------------------------
// Authentication boundary
// ---------------------------------------------------------------------------

/// Authenticated caller identity attached to requests
#[derive(Debug, Clone)]
pub struct UserContext {
    pub user_name: String,
}

/// External collaborator: turns a bearer token into a user identity
pub trait AuthVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Option<UserContext>;
}

/// Development verifier accepting one configured static token
pub struct StaticTokenVerifier {
    token: String,
}

impl StaticTokenVerifier {
    pub fn new(token: String) -> Self {
        Self { token }
    }
}

impl AuthVerifier for StaticTokenVerifier {
    fn verify(&self, token: &str) -> Option<UserContext> {
        if token == self.token {
            Some(UserContext {
                user_name: "local".to_string(),
            })
        } else {
            None
        }
    }
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

async fn auth_middleware(
    State(state): State<AppState>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let path = request.uri().path();
    if path == "/health" {
        return Ok(next.run(request).await);
    }

    let token = extract_bearer(request.headers()).ok_or(ApiError::Unauthorized)?;
    let context = state.verifier.verify(token).ok_or(ApiError::Unauthorized)?;

    let mut request = request;
    request.extensions_mut().insert(context);
    Ok(next.run(request).await)
}

// ---------------------------------------------------------------------------
// Application state
// ---------------------------------------------------------------------------

/// Shared state for all handlers
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub hybrid: Arc<HybridSearchEngine>,
    pub fts: Arc<FullTextSearchEngine>,
    pub trigram: Arc<TrigramSearchEngine>,
    pub semantic: Arc<SemanticSearchEngine>,
    /// Startup singleton; admin mutations go through the lock, the request
    /// path only clones
    pub ai_router: Arc<RwLock<AiRouter>>,
    pub oauth: Arc<OAuthService>,
    pub metrics: MetricsRecorder,
    pub index_driver: Arc<EmbeddingIndexDriver>,
    pub embeddings: Arc<EmbeddingService>,
    pub params: SearchParams,
    pub verifier: Arc<dyn AuthVerifier>,
}

/// Build a per-request router copy with the caller's OAuth provider when a
/// stored token exists for the model's provider. The singleton is never
/// mutated.
async fn effective_router(state: &AppState, model: Option<&str>, user: &str) -> AiRouter {
    let base = state.ai_router.read().clone_for_request();

    let Some(provider_name) = oauth_provider_hint(model) else {
        return base;
    };
    let Some(token) = state.oauth.get_valid_token(provider_name, user).await else {
        return base;
    };

    let mut copy = base;
    copy.register_oauth(provider_name, &token, None);
    copy
}

// ---------------------------------------------------------------------------
// Search endpoints
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SearchQueryParams {
    q: String,
    #[serde(rename = "type", default)]
    search_type: SearchType,
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct SearchResponse {
    results: Vec<SearchResult>,
    query: String,
    search_type: String,
    total: usize,
}

async fn search(
    State(state): State<AppState>,
    axum::Extension(user): axum::Extension<UserContext>,
    AxumQuery(params): AxumQuery<SearchQueryParams>,
) -> Result<Json<SearchResponse>, ApiError> {
    let query = ValidatedSearchQuery::new(&params.q)
        .map_err(|e| ApiError::InvalidInput(e.to_string()))?;
    let limit = ValidatedLimit::new(params.limit.unwrap_or(20))
        .map_err(|e| ApiError::InvalidInput(e.to_string()))?;

    let started = Instant::now();
    let mut semantic_triggered = false;
    let mut judge_reason = None;

    let results = match params.search_type {
        SearchType::Fts => {
            let analysis = crate::query_preprocessor::analyze_query(query.as_str());
            state.fts.search(&analysis, limit.get()).await?
        }
        SearchType::Trigram => state.trigram.search(query.as_str(), limit.get()).await?,
        SearchType::Semantic => {
            semantic_triggered = true;
            state.semantic.search(query.as_str(), limit.get()).await?
        }
        SearchType::Hybrid => {
            let outcome = state.hybrid.search(query.as_str(), limit.get()).await?;
            semantic_triggered = outcome.decision.run_semantic;
            judge_reason = Some(outcome.decision.reason.clone());
            outcome.results
        }
    };

    state.metrics.record_search_event(SearchEvent {
        user_name: Some(user.user_name),
        query: query.as_str().to_string(),
        search_type: params.search_type,
        result_count: results.len(),
        latency_ms: started.elapsed().as_millis() as u64,
        semantic_triggered,
        judge_reason,
        clicked_note_id: None,
    });

    Ok(Json(SearchResponse {
        total: results.len(),
        query: query.as_str().to_string(),
        search_type: params.search_type.as_str().to_string(),
        results,
    }))
}

#[derive(Debug, Serialize)]
struct IndexTriggerResponse {
    status: String,
    message: String,
}

async fn trigger_index(State(state): State<AppState>) -> Result<Json<IndexTriggerResponse>, ApiError> {
    Arc::clone(&state.index_driver).start()?;
    Ok(Json(IndexTriggerResponse {
        status: "indexing".to_string(),
        message: "임베딩 인덱싱을 시작합니다.".to_string(),
    }))
}

#[derive(Debug, Serialize)]
struct IndexStatusResponse {
    status: crate::index_driver::IndexStatus,
    total_notes: i64,
    indexed_notes: i64,
    pending_notes: i64,
    failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
}

async fn index_status(State(state): State<AppState>) -> Result<Json<IndexStatusResponse>, ApiError> {
    let total_notes = state.db.note_count().await?;
    let indexed_notes = state.db.indexed_note_count().await?;
    let progress = state.index_driver.progress();

    Ok(Json(IndexStatusResponse {
        status: progress.status,
        total_notes,
        indexed_notes,
        pending_notes: (total_notes - indexed_notes).max(0),
        failed: progress.failed,
        error_message: progress.error_message,
    }))
}

#[derive(Debug, Deserialize)]
struct SearchFeedbackRequest {
    event_id: i64,
    note_id: i64,
    relevant: bool,
}

async fn search_feedback(
    State(state): State<AppState>,
    axum::Extension(user): axum::Extension<UserContext>,
    Json(body): Json<SearchFeedbackRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .metrics
        .record_search_feedback(&SearchFeedback {
            event_id: body.event_id,
            note_id: body.note_id,
            user_name: user.user_name,
            relevant: body.relevant,
        })
        .await?;
    Ok(Json(serde_json::json!({"recorded": true})))
}

#[derive(Debug, Deserialize)]
struct RefineRequest {
    query: String,
    #[serde(default)]
    result_titles: Vec<String>,
    feedback: Option<String>,
    turn: Option<u8>,
}

async fn refine_search_query(
    State(state): State<AppState>,
    axum::Extension(user): axum::Extension<UserContext>,
    Json(body): Json<RefineRequest>,
) -> Result<Json<RefinementResult>, ApiError> {
    let query = ValidatedSearchQuery::new(&body.query)
        .map_err(|e| ApiError::InvalidInput(e.to_string()))?;

    let router = effective_router(&state, None, &user.user_name).await;
    let result = SearchRefiner::new(router)
        .refine_query(
            query.as_str(),
            &body.result_titles,
            body.feedback.as_deref(),
            body.turn.unwrap_or(1),
        )
        .await;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
struct MetricsQueryParams {
    days: Option<i64>,
}

async fn search_metrics_summary(
    State(state): State<AppState>,
    AxumQuery(params): AxumQuery<MetricsQueryParams>,
) -> Result<Json<crate::metrics::SearchMetricsSummary>, ApiError> {
    let days = params.days.unwrap_or(7).clamp(1, 90);
    let summary = state.metrics.summary(days).await?;
    Ok(Json(summary))
}

// ---------------------------------------------------------------------------
// AI endpoints
// ---------------------------------------------------------------------------

/// Feature-specific options carried in the request body
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AiChatOptions {
    #[serde(default)]
    pub context_notes: Vec<String>,
    pub keywords: Option<String>,
    pub existing_content: Option<String>,
    pub custom_instructions: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct AiChatRequest {
    pub feature: FeatureType,
    pub content: String,
    pub model: Option<String>,
    #[serde(default)]
    pub options: Option<AiChatOptions>,
}

#[derive(Debug, Serialize)]
struct AiChatResponse {
    content: String,
    model: String,
    provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    usage: Option<TokenUsage>,
}

/// Map a feature request to its prompt builder
pub fn build_messages_for_feature(
    feature: FeatureType,
    content: &str,
    options: &AiChatOptions,
) -> Vec<Message> {
    match feature {
        FeatureType::Insight => prompts::insight(content),
        FeatureType::SearchQa => prompts::search_qa(content, &options.context_notes),
        FeatureType::Writing => prompts::writing(
            content,
            options.keywords.as_deref(),
            options.existing_content.as_deref(),
        ),
        FeatureType::Spellcheck => prompts::spellcheck(content),
        FeatureType::Template => {
            prompts::template(content, options.custom_instructions.as_deref())
        }
    }
}

/// Request language for the stream monitor: Hangul anywhere means Korean
pub fn stream_lang(content: &str) -> &'static str {
    let has_hangul = content
        .chars()
        .any(|c| ('\u{AC00}'..='\u{D7A3}').contains(&c));
    if has_hangul {
        "ko"
    } else {
        "en"
    }
}

fn validate_chat_request(request: &AiChatRequest) -> Result<(), ApiError> {
    if request.content.trim().is_empty() {
        return Err(ApiError::InvalidInput("content must not be empty".to_string()));
    }
    Ok(())
}

async fn ai_chat(
    State(state): State<AppState>,
    axum::Extension(user): axum::Extension<UserContext>,
    Json(body): Json<AiChatRequest>,
) -> Result<Json<AiChatResponse>, ApiError> {
    validate_chat_request(&body)?;
    let options = body.options.clone().unwrap_or_default();
    let messages = build_messages_for_feature(body.feature, &body.content, &options);

    let router = effective_router(&state, body.model.as_deref(), &user.user_name).await;
    let request = AiRequest {
        messages,
        model: body.model.clone(),
        temperature: options.temperature,
        max_tokens: options.max_tokens,
    };

    let response = router.chat(&request).await?;
    Ok(Json(AiChatResponse {
        content: response.content,
        model: response.model,
        provider: response.provider,
        usage: response.usage,
    }))
}

async fn ai_stream(
    State(state): State<AppState>,
    axum::Extension(user): axum::Extension<UserContext>,
    Json(body): Json<AiChatRequest>,
) -> Result<Response, ApiError> {
    validate_chat_request(&body)?;
    let options = body.options.clone().unwrap_or_default();
    let messages = build_messages_for_feature(body.feature, &body.content, &options);

    let router = effective_router(&state, body.model.as_deref(), &user.user_name).await;
    let request = AiRequest {
        messages,
        model: body.model.clone(),
        temperature: options.temperature,
        max_tokens: options.max_tokens,
    };

    let monitor = StreamMonitor::new(
        body.feature.as_str(),
        stream_lang(&body.content),
        state.params.stream_check_interval,
    );

    // Resolution and connect failures surface here as regular error
    // responses, before any SSE bytes
    let frames = router.stream_sse(&request, Some(monitor)).await?;
    let body_stream = frames.map(Ok::<_, std::convert::Infallible>);

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(axum::body::Body::from_stream(body_stream))
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(response)
}

#[derive(Debug, Serialize)]
struct ModelListResponse {
    models: Vec<ModelInfo>,
}

async fn ai_models(State(state): State<AppState>) -> Json<ModelListResponse> {
    let models = state.ai_router.read().all_models();
    Json(ModelListResponse { models })
}

#[derive(Debug, Serialize)]
struct ProviderListResponse {
    providers: Vec<String>,
}

async fn ai_providers(State(state): State<AppState>) -> Json<ProviderListResponse> {
    let providers = state.ai_router.read().provider_names();
    Json(ProviderListResponse { providers })
}

async fn ai_feedback(
    State(state): State<AppState>,
    Json(body): Json<AiFeedback>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.metrics.record_ai_feedback(&body).await?;
    Ok(Json(serde_json::json!({"recorded": true})))
}

/// Evaluate an answer against its feature checklist and, for search-QA,
/// the grounded correctness/utility decomposition
#[derive(Debug, Deserialize)]
struct EvaluateRequest {
    feature: FeatureType,
    original_request: String,
    response: String,
    #[serde(default)]
    context_notes: Vec<String>,
    #[serde(default)]
    note_titles: Vec<String>,
}

async fn ai_evaluate(
    State(state): State<AppState>,
    axum::Extension(user): axum::Extension<UserContext>,
    Json(body): Json<EvaluateRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let router = effective_router(&state, None, &user.user_name).await;

    let gate = QualityGate::new(router.clone());
    let quality = gate
        .evaluate(body.feature.as_str(), &body.original_request, &body.response)
        .await;

    let grounding = if body.feature == FeatureType::SearchQa {
        SearchQaEvaluator::new(router)
            .evaluate(
                &body.original_request,
                &body.context_notes,
                &body.note_titles,
                &body.response,
            )
            .await
    } else {
        None
    };

    Ok(Json(serde_json::json!({
        "quality": quality,
        "grounding": grounding,
    })))
}

// ---------------------------------------------------------------------------
// OAuth endpoints
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CallbackRequest {
    code: String,
    state: String,
}

async fn oauth_authorize(
    State(state): State<AppState>,
    axum::Extension(user): axum::Extension<UserContext>,
    Path(provider): Path<String>,
) -> Result<Json<crate::oauth::AuthorizeOutcome>, ApiError> {
    let outcome = state.oauth.authorize(&provider, &user.user_name).await?;
    Ok(Json(outcome))
}

async fn oauth_callback(
    State(state): State<AppState>,
    axum::Extension(user): axum::Extension<UserContext>,
    Path(provider): Path<String>,
    Json(body): Json<CallbackRequest>,
) -> Result<Json<crate::oauth::ConnectionStatus>, ApiError> {
    let status = state
        .oauth
        .exchange_code(&provider, &user.user_name, &body.code, &body.state)
        .await?;
    Ok(Json(status))
}

async fn oauth_status(
    State(state): State<AppState>,
    axum::Extension(user): axum::Extension<UserContext>,
    Path(provider): Path<String>,
) -> Result<Json<crate::oauth::ConnectionStatus>, ApiError> {
    let status = state.oauth.status(&provider, &user.user_name).await?;
    Ok(Json(status))
}

async fn oauth_disconnect(
    State(state): State<AppState>,
    axum::Extension(user): axum::Extension<UserContext>,
    Path(provider): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let disconnected = state.oauth.disconnect(&provider, &user.user_name).await?;
    Ok(Json(serde_json::json!({"disconnected": disconnected})))
}

// ---------------------------------------------------------------------------
// Server assembly
// ---------------------------------------------------------------------------

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Build the application router over the shared state
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/search", get(search))
        .route("/search/index", post(trigger_index))
        .route("/search/index/status", get(index_status))
        .route("/search/feedback", post(search_feedback))
        .route("/search/refine", post(refine_search_query))
        .route("/search/metrics", get(search_metrics_summary))
        .route("/ai/chat", post(ai_chat))
        .route("/ai/stream", post(ai_stream))
        .route("/ai/models", get(ai_models))
        .route("/ai/providers", get(ai_providers))
        .route("/ai/feedback", post(ai_feedback))
        .route("/ai/evaluate", post(ai_evaluate))
        .route("/oauth/:provider/authorize", get(oauth_authorize))
        .route("/oauth/:provider/callback", post(oauth_callback))
        .route("/oauth/:provider/status", get(oauth_status))
        .route("/oauth/:provider/disconnect", delete(oauth_disconnect))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Wire up every subsystem from configuration and run the server
pub async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    let pool = crate::database::create_pool(&config.database_url).await?;
    crate::database::run_migrations(&pool, config.embedding.dimension).await?;

    let db = Database::new(pool.clone(), config.embedding.dimension);
    let embeddings = Arc::new(EmbeddingService::new(
        config.embedding.clone(),
        config.openai_api_key.clone(),
    ));

    let reranker: Arc<dyn crate::reranker::Reranker> = match &config.cohere_api_key {
        Some(key) => Arc::new(crate::reranker::CohereReranker::new(
            key.clone(),
            config.search.rerank_model.clone(),
        )),
        None => Arc::new(crate::reranker::NoopReranker),
    };

    let fts = Arc::new(FullTextSearchEngine::new(db.clone()));
    let trigram = Arc::new(TrigramSearchEngine::new(db.clone()));
    let semantic = Arc::new(SemanticSearchEngine::new(db.clone(), Arc::clone(&embeddings)));
    let hybrid = Arc::new(HybridSearchEngine::new(
        FullTextSearchEngine::new(db.clone()),
        TrigramSearchEngine::new(db.clone()),
        SemanticSearchEngine::new(db.clone(), Arc::clone(&embeddings)),
        crate::judge::SearchJudge::new(config.search.clone()),
        reranker,
        config.search.clone(),
    ));

    let cipher = crate::oauth::TokenCipher::new(config.token_encryption_key.as_deref())?;
    let oauth = Arc::new(OAuthService::new(
        pool.clone(),
        config.oauth.clone(),
        cipher,
    ));

    let verifier: Arc<dyn AuthVerifier> = Arc::new(StaticTokenVerifier::new(
        config
            .static_auth_token
            .clone()
            .unwrap_or_else(|| "development-token".to_string()),
    ));

    let state = AppState {
        db: db.clone(),
        hybrid,
        fts,
        trigram,
        semantic,
        ai_router: Arc::new(RwLock::new(AiRouter::auto_detect(&config))),
        oauth,
        metrics: MetricsRecorder::new(pool),
        index_driver: EmbeddingIndexDriver::new(db, embeddings.clone()),
        embeddings,
        params: config.search.clone(),
        verifier,
    };

    let addr: SocketAddr = format!("{}:{}", config.bind_host, config.bind_port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("notewise server listening on {addr}");

    axum::serve(listener, build_router(state)).await?;
    Ok(())
}
