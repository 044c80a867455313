// Search Engines - the individual retrieval strategies
//
// Each engine produces the same result shape so the merger and reranker can
// treat them uniformly. FTS runs against the trigger-maintained token index,
// the trigram engine covers typos and partial forms, and the semantic engine
// does cosine nearest-neighbor over the chunk embeddings.

use anyhow::{Context, Result};
use pgvector::Vector;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::database::Database;
use crate::embedding::EmbeddingService;
use crate::query_preprocessor::QueryAnalysis;

/// Maximum snippet length in characters
const SNIPPET_MAX_CHARS: usize = 200;

/// A single scored retrieval hit
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    /// External note id (stable across syncs)
    pub note_id: String,
    pub title: String,
    pub snippet: String,
    pub score: f32,
    pub search_type: String,
}

/// Truncate a snippet to the display budget, on a character boundary
pub fn truncate_snippet(text: &str) -> String {
    if text.chars().count() <= SNIPPET_MAX_CHARS {
        return text.to_string();
    }
    text.chars().take(SNIPPET_MAX_CHARS).collect()
}

/// Token-index retrieval keyed on the keyword query expression
pub struct FullTextSearchEngine {
    db: Database,
}

impl FullTextSearchEngine {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn search(&self, analysis: &QueryAnalysis, limit: usize) -> Result<Vec<SearchResult>> {
        if analysis.ts_expr.is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<(String, String, String, f32)> = sqlx::query_as(
            "SELECT n.external_id, n.title, \
                    ts_headline('simple', n.content_text, to_tsquery('simple', $1), \
                                'MaxWords=35, MinWords=15') AS snippet, \
                    ts_rank(n.search_vector, to_tsquery('simple', $1)) AS score \
             FROM notes n \
             WHERE n.search_vector @@ to_tsquery('simple', $1) \
             ORDER BY score DESC \
             LIMIT $2",
        )
        .bind(&analysis.ts_expr)
        .bind(limit as i64)
        .fetch_all(self.db.pool())
        .await
        .context("FTS query failed")?;

        debug!("FTS: {} hits for {:?}", rows.len(), analysis.original);
        Ok(rows
            .into_iter()
            .map(|(note_id, title, snippet, score)| SearchResult {
                note_id,
                title,
                snippet: truncate_snippet(&snippet),
                score,
                search_type: "fts".to_string(),
            })
            .collect())
    }
}

/// Character-3-gram similarity between title/body and the raw query.
/// Useful when FTS returns nothing for queries with typos or partial forms.
pub struct TrigramSearchEngine {
    db: Database,
}

impl TrigramSearchEngine {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<(String, String, String, f32)> = sqlx::query_as(
            "SELECT external_id, title, \
                    LEFT(content_text, 400) AS snippet, \
                    GREATEST(similarity(title, $1), similarity(content_text, $1)) AS score \
             FROM notes \
             WHERE title % $1 OR content_text % $1 \
             ORDER BY score DESC \
             LIMIT $2",
        )
        .bind(query)
        .bind(limit as i64)
        .fetch_all(self.db.pool())
        .await
        .context("trigram query failed")?;

        debug!("trigram: {} hits for {query:?}", rows.len());
        Ok(rows
            .into_iter()
            .map(|(note_id, title, snippet, score)| SearchResult {
                note_id,
                title,
                snippet: truncate_snippet(&snippet),
                score,
                search_type: "trigram".to_string(),
            })
            .collect())
    }
}

/// Embeds the query and runs cosine nearest-neighbor over the chunk
/// embeddings, keeping the best chunk per note
pub struct SemanticSearchEngine {
    db: Database,
    embeddings: Arc<EmbeddingService>,
}

impl SemanticSearchEngine {
    pub fn new(db: Database, embeddings: Arc<EmbeddingService>) -> Self {
        Self { db, embeddings }
    }

    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let query_embedding = self
            .embeddings
            .embed_text(query)
            .await
            .context("embedding search query")?;
        if query_embedding.is_empty() {
            return Ok(Vec::new());
        }

        // One row per note: the highest-scoring chunk wins
        let rows: Vec<(String, String, String, f32)> = sqlx::query_as(
            "SELECT external_id, title, snippet, score FROM ( \
                 SELECT DISTINCT ON (n.id) \
                        n.id, n.external_id, n.title, \
                        ne.chunk_text AS snippet, \
                        (1 - (ne.embedding <=> $1))::float4 AS score \
                 FROM note_embeddings ne \
                 JOIN notes n ON n.id = ne.note_id \
                 ORDER BY n.id, ne.embedding <=> $1 \
             ) best \
             ORDER BY score DESC \
             LIMIT $2",
        )
        .bind(Vector::from(query_embedding))
        .bind(limit as i64)
        .fetch_all(self.db.pool())
        .await
        .context("semantic query failed")?;

        debug!("semantic: {} hits for {query:?}", rows.len());
        Ok(rows
            .into_iter()
            .map(|(note_id, title, snippet, score)| SearchResult {
                note_id,
                title,
                snippet: truncate_snippet(&snippet),
                score,
                search_type: "semantic".to_string(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_snippet_is_unchanged() {
        assert_eq!(truncate_snippet("hello"), "hello");
    }

    #[test]
    fn long_snippet_is_cut_at_200_chars() {
        let text = "x".repeat(500);
        assert_eq!(truncate_snippet(&text).len(), 200);
    }

    #[test]
    fn truncation_respects_multibyte_boundaries() {
        let text = "가".repeat(300);
        let snippet = truncate_snippet(&text);
        assert_eq!(snippet.chars().count(), 200);
        // Every char survives intact
        assert!(snippet.chars().all(|c| c == '가'));
    }
}
