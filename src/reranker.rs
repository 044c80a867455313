// Reranker - optional cross-encoder reordering of top results
//
// When a rerank API key is configured the top results are sent as documents
// ("title. snippet") together with the raw query and reordered by the
// returned relevance scores. Any failure falls back to the original order;
// without a key the reranker is a pass-through.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::warn;

use crate::search_engine::SearchResult;

const RERANK_URL: &str = "https://api.cohere.ai/v1/rerank";
const RERANK_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait Reranker: Send + Sync {
    /// Rerank results by relevance to the query, trimmed to `top_n`
    async fn rerank(
        &self,
        query: &str,
        results: Vec<SearchResult>,
        top_n: Option<usize>,
    ) -> Vec<SearchResult>;
}

/// Pass-through reranker used when no cross-encoder is configured
pub struct NoopReranker;

#[async_trait]
impl Reranker for NoopReranker {
    async fn rerank(
        &self,
        _query: &str,
        results: Vec<SearchResult>,
        top_n: Option<usize>,
    ) -> Vec<SearchResult> {
        match top_n {
            Some(n) => results.into_iter().take(n).collect(),
            None => results,
        }
    }
}

/// Cross-encoder reranker backed by the Cohere Rerank API
pub struct CohereReranker {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct RerankItem {
    index: usize,
    relevance_score: f32,
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankItem>,
}

impl CohereReranker {
    pub fn new(api_key: String, model: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(RERANK_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            api_key,
            model,
            client,
        }
    }

    async fn call_api(
        &self,
        query: &str,
        documents: &[String],
        top_n: usize,
    ) -> Result<RerankResponse, reqwest::Error> {
        let response = self
            .client
            .post(RERANK_URL)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "query": query,
                "documents": documents,
                "top_n": top_n,
                "return_documents": false,
            }))
            .send()
            .await?
            .error_for_status()?;
        response.json().await
    }
}

#[async_trait]
impl Reranker for CohereReranker {
    async fn rerank(
        &self,
        query: &str,
        results: Vec<SearchResult>,
        top_n: Option<usize>,
    ) -> Vec<SearchResult> {
        if results.is_empty() {
            return results;
        }

        let documents: Vec<String> = results
            .iter()
            .map(|r| format!("{}. {}", r.title, r.snippet))
            .collect();
        let effective_top_n = top_n.unwrap_or(results.len());

        let response = match self.call_api(query, &documents, effective_top_n).await {
            Ok(response) => response,
            Err(err) => {
                warn!("rerank API call failed, returning original order: {err}");
                return results;
            }
        };

        let mut reranked = Vec::with_capacity(response.results.len());
        for item in response.results {
            if let Some(original) = results.get(item.index) {
                reranked.push(SearchResult {
                    score: item.relevance_score,
                    search_type: "reranked".to_string(),
                    ..original.clone()
                });
            }
        }

        if reranked.is_empty() {
            // A response with no usable indices is treated as a failure
            return results;
        }
        reranked
    }
}
