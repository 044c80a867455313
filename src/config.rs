// Server Configuration - environment-driven settings plus the validated
// keyed parameter store used by the search judge and the quality pipeline
//
// All tunables live behind explicit enumerated options so bad values fail
// at startup instead of deep inside a request.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;

/// Default embedding vector dimension (text-embedding-3-small)
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 1536;

/// Top-level server configuration, read once at startup
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub database_url: String,
    pub bind_host: String,
    pub bind_port: u16,
    /// Static bearer token accepted by the dev auth verifier. Real JWT
    /// verification is an external collaborator behind `AuthVerifier`.
    pub static_auth_token: Option<String>,
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub google_api_key: Option<String>,
    pub glm_api_key: Option<String>,
    pub cohere_api_key: Option<String>,
    pub embedding: EmbeddingSettings,
    pub search: SearchParams,
    pub oauth: OAuthSettings,
    /// 32-byte hex key for AES-256-GCM token encryption. Tokens are stored
    /// in plaintext when unset (development mode, logged at init).
    pub token_encryption_key: Option<String>,
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let config = Self {
            database_url: env::var("DATABASE_URL")
                .context("DATABASE_URL environment variable is required")?,
            bind_host: env::var("NOTEWISE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            bind_port: env::var("NOTEWISE_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            static_auth_token: non_empty(env::var("NOTEWISE_STATIC_TOKEN").ok()),
            openai_api_key: non_empty(env::var("OPENAI_API_KEY").ok()),
            anthropic_api_key: non_empty(env::var("ANTHROPIC_API_KEY").ok()),
            google_api_key: non_empty(env::var("GOOGLE_API_KEY").ok()),
            glm_api_key: non_empty(env::var("GLM_API_KEY").ok()),
            cohere_api_key: non_empty(env::var("COHERE_API_KEY").ok()),
            embedding: EmbeddingSettings::from_env(),
            search: SearchParams::default(),
            oauth: OAuthSettings::from_env(),
            token_encryption_key: non_empty(env::var("TOKEN_ENCRYPTION_KEY").ok()),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.embedding.validate()?;
        self.search.validate()?;
        if let Some(key) = &self.token_encryption_key {
            if hex::decode(key).map(|k| k.len()) != Ok(32) {
                bail!("TOKEN_ENCRYPTION_KEY must be 64 hex characters (32 bytes)");
            }
        }
        Ok(())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Embedding backend selection: the local HTTP service wins whenever an
/// endpoint URL is configured, otherwise the remote provider API is used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmbeddingBackend {
    Remote,
    LocalHttp { base_url: String },
}

/// Embedding service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingSettings {
    pub backend: EmbeddingBackend,
    pub model: String,
    pub dimension: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Remote,
            model: "text-embedding-3-small".to_string(),
            dimension: DEFAULT_EMBEDDING_DIMENSION,
        }
    }
}

impl EmbeddingSettings {
    pub fn from_env() -> Self {
        let backend = match non_empty(env::var("EMBEDDING_SERVICE_URL").ok()) {
            Some(url) => EmbeddingBackend::LocalHttp {
                base_url: url.trim_end_matches('/').to_string(),
            },
            None => EmbeddingBackend::Remote,
        };
        Self {
            backend,
            model: env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".to_string()),
            dimension: env::var("EMBEDDING_DIMENSION")
                .ok()
                .and_then(|d| d.parse().ok())
                .unwrap_or(DEFAULT_EMBEDDING_DIMENSION),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.dimension == 0 || self.dimension > 4096 {
            bail!("embedding dimension must be in 1..=4096");
        }
        Ok(())
    }
}

/// Search tunables: judge thresholds, fusion constant, reranker selection.
///
/// The judge thresholds are corpus-tuned defaults, not invariants; they are
/// language-aware because Postgres ts_rank scores run lower for Korean text
/// under the `simple` configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchParams {
    pub adaptive_enabled: bool,
    pub judge_min_results: usize,
    pub judge_min_score_ko: f32,
    pub judge_min_score_en: f32,
    pub judge_min_term_coverage: f32,
    pub judge_confidence_threshold: f32,
    pub rrf_k: f32,
    pub rerank_model: String,
    pub stream_check_interval: usize,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            adaptive_enabled: true,
            judge_min_results: 3,
            judge_min_score_ko: 0.05,
            judge_min_score_en: 0.05,
            judge_min_term_coverage: 0.5,
            judge_confidence_threshold: 0.7,
            rrf_k: 60.0,
            rerank_model: "rerank-multilingual-v3.0".to_string(),
            stream_check_interval: 300,
        }
    }
}

impl SearchParams {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.judge_confidence_threshold) {
            bail!("judge_confidence_threshold must be in [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.judge_min_term_coverage) {
            bail!("judge_min_term_coverage must be in [0, 1]");
        }
        if self.rrf_k <= 0.0 {
            bail!("rrf_k must be positive");
        }
        if self.stream_check_interval == 0 {
            bail!("stream_check_interval must be positive");
        }
        Ok(())
    }

    /// Language-aware minimum FTS score for the judge
    pub fn judge_min_score(&self, language: crate::types::QueryLanguage) -> f32 {
        use crate::types::QueryLanguage;
        match language {
            QueryLanguage::Ko | QueryLanguage::Mixed => self.judge_min_score_ko,
            QueryLanguage::En => self.judge_min_score_en,
        }
    }
}

/// Per-provider OAuth application credentials
#[derive(Debug, Clone, Default)]
pub struct OAuthClient {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub redirect_uri: Option<String>,
}

impl OAuthClient {
    pub fn is_configured(&self) -> bool {
        self.client_id.is_some()
    }
}

/// OAuth application settings for the supported providers
#[derive(Debug, Clone, Default)]
pub struct OAuthSettings {
    pub openai: OAuthClient,
    pub google: OAuthClient,
    pub anthropic: OAuthClient,
}

impl OAuthSettings {
    pub fn from_env() -> Self {
        let load = |prefix: &str| OAuthClient {
            client_id: non_empty(env::var(format!("{prefix}_OAUTH_CLIENT_ID")).ok()),
            client_secret: non_empty(env::var(format!("{prefix}_OAUTH_CLIENT_SECRET")).ok()),
            redirect_uri: non_empty(env::var(format!("{prefix}_OAUTH_REDIRECT_URI")).ok()),
        };
        Self {
            openai: load("OPENAI"),
            google: load("GOOGLE"),
            anthropic: load("ANTHROPIC"),
        }
    }

    pub fn client_for(&self, provider: &str) -> Option<&OAuthClient> {
        match provider {
            "openai" => Some(&self.openai),
            "google" => Some(&self.google),
            "anthropic" => Some(&self.anthropic),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::QueryLanguage;

    #[test]
    fn default_search_params_are_valid() {
        let params = SearchParams::default();
        assert!(params.validate().is_ok());
        assert_eq!(params.rrf_k, 60.0);
    }

    #[test]
    fn judge_min_score_is_language_aware() {
        let params = SearchParams {
            judge_min_score_ko: 0.02,
            judge_min_score_en: 0.08,
            ..SearchParams::default()
        };
        assert_eq!(params.judge_min_score(QueryLanguage::Ko), 0.02);
        assert_eq!(params.judge_min_score(QueryLanguage::Mixed), 0.02);
        assert_eq!(params.judge_min_score(QueryLanguage::En), 0.08);
    }

    #[test]
    fn bad_thresholds_fail_validation() {
        let params = SearchParams {
            judge_confidence_threshold: 1.5,
            ..SearchParams::default()
        };
        assert!(params.validate().is_err());

        let params = SearchParams {
            rrf_k: 0.0,
            ..SearchParams::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn embedding_dimension_bounds() {
        let mut settings = EmbeddingSettings::default();
        assert!(settings.validate().is_ok());
        settings.dimension = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn oauth_client_lookup() {
        let settings = OAuthSettings {
            openai: OAuthClient {
                client_id: Some("abc".into()),
                client_secret: None,
                redirect_uri: None,
            },
            ..OAuthSettings::default()
        };
        assert!(settings.client_for("openai").unwrap().is_configured());
        assert!(!settings.client_for("google").unwrap().is_configured());
        assert!(settings.client_for("cohere").is_none());
    }
}
