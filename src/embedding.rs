// Embedding Service - turns text into fixed-dimension vectors
//
// Two backends selected by configuration: the remote provider embeddings API
// (requires an API key) or a local HTTP service (selected whenever an
// endpoint URL is configured). Long text is chunked with overlap before
// embedding; token-based measurement is used when the model tokenizer is
// available, character-based otherwise.

use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tiktoken_rs::CoreBPE;
use tracing::{debug, info};

use crate::config::{EmbeddingBackend, EmbeddingSettings};

const REMOTE_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Token-based chunking defaults (remote mode)
const TOKEN_CHUNK_SIZE: usize = 500;
const TOKEN_CHUNK_OVERLAP: usize = 50;

/// Character-based chunking defaults (local fallback)
const CHAR_CHUNK_SIZE: usize = 2000;
const CHAR_CHUNK_OVERLAP: usize = 200;

// cl100k_base covers the text-embedding-3 family
static TOKENIZER: Lazy<Option<CoreBPE>> = Lazy::new(|| match tiktoken_rs::cl100k_base() {
    Ok(bpe) => Some(bpe),
    Err(err) => {
        tracing::warn!("tokenizer unavailable, falling back to char chunking: {err}");
        None
    }
});

/// Single failure kind for the embedding backend, wrapping the cause
#[derive(Debug, Error)]
#[error("embedding failed: {0}")]
pub struct EmbeddingError(pub String);

/// Generates vector embeddings for note chunks and queries
pub struct EmbeddingService {
    settings: EmbeddingSettings,
    api_key: Option<String>,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct RemoteEmbeddingItem {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Deserialize)]
struct RemoteEmbeddingResponse {
    data: Vec<RemoteEmbeddingItem>,
}

#[derive(Deserialize)]
struct LocalEmbeddingResponse {
    embeddings: Vec<Vec<f32>>,
}

impl EmbeddingService {
    pub fn new(settings: EmbeddingSettings, api_key: Option<String>) -> Self {
        if let EmbeddingBackend::LocalHttp { base_url } = &settings.backend {
            info!("embedding service: local mode enabled ({base_url})");
        }
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            settings,
            api_key,
            client,
        }
    }

    pub fn dimension(&self) -> usize {
        self.settings.dimension
    }

    pub fn model(&self) -> &str {
        &self.settings.model
    }

    /// Embed a single text string. Empty or whitespace-only input returns
    /// an empty vector without touching the backend.
    pub async fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let mut result = self.call_backend(&[text.to_string()]).await?;
        result
            .pop()
            .ok_or_else(|| EmbeddingError("backend returned no embedding".to_string()))
    }

    /// Embed multiple texts in a single backend call, order preserved
    pub async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.call_backend(texts).await
    }

    /// Split text into overlapping chunks.
    ///
    /// Remote mode measures in tokens (500/50 by default); local mode falls
    /// back to characters (2000/200). Input that fits a single chunk is
    /// returned as-is.
    pub fn chunk_text(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        if matches!(self.settings.backend, EmbeddingBackend::Remote) {
            if let Some(bpe) = TOKENIZER.as_ref() {
                return chunk_by_tokens(bpe, text, TOKEN_CHUNK_SIZE, TOKEN_CHUNK_OVERLAP);
            }
        }
        chunk_by_chars(text, CHAR_CHUNK_SIZE, CHAR_CHUNK_OVERLAP)
    }

    /// Chunk text and embed every chunk, returning (chunk, vector) pairs
    pub async fn embed_chunks(
        &self,
        text: &str,
    ) -> Result<Vec<(String, Vec<f32>)>, EmbeddingError> {
        let chunks = self.chunk_text(text);
        if chunks.is_empty() {
            return Ok(Vec::new());
        }
        let embeddings = self.embed_texts(&chunks).await?;
        if embeddings.len() != chunks.len() {
            return Err(EmbeddingError(format!(
                "backend returned {} embeddings for {} chunks",
                embeddings.len(),
                chunks.len()
            )));
        }
        Ok(chunks.into_iter().zip(embeddings).collect())
    }

    async fn call_backend(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        match &self.settings.backend {
            EmbeddingBackend::Remote => self.call_remote(texts).await,
            EmbeddingBackend::LocalHttp { base_url } => self.call_local(base_url, texts).await,
        }
    }

    async fn call_remote(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| EmbeddingError("no API key configured for remote mode".to_string()))?;

        let body = json!({
            "input": texts,
            "model": self.settings.model,
            "dimensions": self.settings.dimension,
        });

        let response = self
            .client
            .post(REMOTE_EMBEDDINGS_URL)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbeddingError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(EmbeddingError(format!(
                "remote API returned {status}: {}",
                text.chars().take(300).collect::<String>()
            )));
        }

        let parsed: RemoteEmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError(e.to_string()))?;

        // The provider orders by index; sort to be safe
        let mut data = parsed.data;
        data.sort_by_key(|item| item.index);
        debug!("embedded {} texts via remote API", data.len());
        Ok(data.into_iter().map(|item| item.embedding).collect())
    }

    async fn call_local(
        &self,
        base_url: &str,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let url = format!("{base_url}/embed");
        let body = json!({
            "input": texts,
            "dimensions": self.settings.dimension,
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbeddingError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EmbeddingError(format!(
                "local service returned {}",
                response.status()
            )));
        }

        let parsed: LocalEmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError(format!("unexpected local service response: {e}")))?;
        Ok(parsed.embeddings)
    }
}

fn chunk_by_tokens(bpe: &CoreBPE, text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let tokens = bpe.encode_ordinary(text);
    if tokens.len() <= chunk_size {
        return vec![text.to_string()];
    }

    let step = chunk_size - overlap;
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < tokens.len() {
        let end = (start + chunk_size).min(tokens.len());
        match bpe.decode(tokens[start..end].to_vec()) {
            Ok(chunk) => chunks.push(chunk),
            // A chunk boundary can split a multi-byte sequence; fall back to
            // a lossless character window for the whole input instead.
            Err(_) => return chunk_by_chars(text, CHAR_CHUNK_SIZE, CHAR_CHUNK_OVERLAP),
        }
        if end == tokens.len() {
            break;
        }
        start += step;
    }
    chunks
}

fn chunk_by_chars(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= chunk_size {
        return vec![text.to_string()];
    }

    let step = chunk_size - overlap;
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + chunk_size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }
    chunks
}
