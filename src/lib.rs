// Notewise - hybrid search and AI routing server for research notes
// Root library module

pub mod ai_router;
pub mod config;
pub mod database;
pub mod embedding;
pub mod errors;
pub mod fusion;
pub mod http_server;
pub mod hybrid;
pub mod index_driver;
pub mod indexer;
pub mod judge;
pub mod korean;
pub mod metrics;
pub mod oauth;
pub mod observability;
pub mod prompts;
pub mod providers;
pub mod qa_evaluator;
pub mod quality_gate;
pub mod query_preprocessor;
pub mod refinement;
pub mod reranker;
pub mod search_engine;
pub mod stream_monitor;
pub mod types;

// Re-export key types
pub use observability::{init_logging, Verbosity};

pub use config::{EmbeddingBackend, EmbeddingSettings, SearchParams, ServerConfig};

pub use errors::{ApiError, MessageLang};

pub use types::{
    AiFeedback, AttachmentText, ExtractionStatus, FeatureType, Note, NoteEmbedding, OAuthTokenRecord,
    QueryLanguage, SearchEvent, SearchFeedback, SearchType, ValidatedLimit, ValidatedSearchQuery,
};

// Re-export the retrieval pipeline
pub use fusion::reciprocal_rank_fusion;
pub use hybrid::{HybridSearchEngine, HybridSearchOutcome};
pub use judge::{JudgeDecision, SearchJudge};
pub use query_preprocessor::{analyze_query, QueryAnalysis};
pub use refinement::{RefinementResult, SearchRefiner, MAX_REFINEMENT_TURNS};
pub use reranker::{CohereReranker, NoopReranker, Reranker};
pub use search_engine::{
    FullTextSearchEngine, SearchResult, SemanticSearchEngine, TrigramSearchEngine,
};

// Re-export embedding and indexing
pub use embedding::{EmbeddingError, EmbeddingService};
pub use index_driver::{EmbeddingIndexDriver, IndexProgress, IndexStatus};
pub use indexer::{IndexOutcome, NoteIndexer};

// Re-export the AI routing layer
pub use ai_router::{oauth_provider_hint, AiRequest, AiRouter};
pub use providers::{
    AiProvider, AnthropicProvider, ChatOptions, ChatResponse, ChunkStream, CodexProvider,
    GlmProvider, GoogleProvider, ImageData, Message, ModelInfo, OpenAiProvider, ProviderError,
    Role, TokenUsage,
};

// Re-export the quality pipeline
pub use qa_evaluator::{Confidence, SearchQaEvaluation, SearchQaEvaluator, SourceCoverage};
pub use quality_gate::{ChecklistItem, QualityChecklist, QualityGate, QualityResult};
pub use stream_monitor::{StreamAction, StreamCheckResult, StreamMonitor};

// Re-export the HTTP layer
pub use http_server::{build_router, serve, AppState, AuthVerifier, StaticTokenVerifier, UserContext};

// Re-export OAuth core
pub use oauth::{generate_state, generate_verifier, pkce_challenge, OAuthService, TokenCipher};

// Re-export persistence glue
pub use database::{create_pool, run_migrations, Database};
pub use metrics::{
    DailyVolume, MetricsRecorder, SearchMetricsSummary, TypeCount, ZeroResultQuery,
};
