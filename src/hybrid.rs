// Hybrid Search - the full adaptive retrieval pipeline
//
// preprocess → FTS → judge → (semantic when judged necessary, trigram when
// keyword retrieval came up empty) → reciprocal rank fusion → optional
// rerank. Observability within a request is strictly sequential; the only
// cross-request shared state is read-only engine configuration.

use anyhow::Result;
use std::sync::Arc;
use tracing::debug;

use crate::config::SearchParams;
use crate::fusion::reciprocal_rank_fusion;
use crate::judge::{JudgeDecision, SearchJudge};
use crate::query_preprocessor::{analyze_query, QueryAnalysis};
use crate::reranker::Reranker;
use crate::search_engine::{
    FullTextSearchEngine, SearchResult, SemanticSearchEngine, TrigramSearchEngine,
};

/// Result of one hybrid retrieval, including the judge decision for metrics
pub struct HybridSearchOutcome {
    pub results: Vec<SearchResult>,
    pub analysis: QueryAnalysis,
    pub decision: JudgeDecision,
}

/// Orchestrates the adaptive multi-engine pipeline
pub struct HybridSearchEngine {
    fts: FullTextSearchEngine,
    trigram: TrigramSearchEngine,
    semantic: SemanticSearchEngine,
    judge: SearchJudge,
    reranker: Arc<dyn Reranker>,
    params: SearchParams,
}

impl HybridSearchEngine {
    pub fn new(
        fts: FullTextSearchEngine,
        trigram: TrigramSearchEngine,
        semantic: SemanticSearchEngine,
        judge: SearchJudge,
        reranker: Arc<dyn Reranker>,
        params: SearchParams,
    ) -> Self {
        Self {
            fts,
            trigram,
            semantic,
            judge,
            reranker,
            params,
        }
    }

    /// Run the full pipeline for one query
    pub async fn search(&self, query: &str, limit: usize) -> Result<HybridSearchOutcome> {
        let analysis = analyze_query(query);

        let fts_results = self.fts.search(&analysis, limit).await?;
        let decision = self.judge.judge(&analysis, &fts_results);

        let mut lists: Vec<Vec<SearchResult>> = Vec::new();
        let fts_empty = fts_results.is_empty();
        if !fts_empty {
            lists.push(fts_results);
        }

        if decision.run_semantic {
            let semantic_results = self.semantic.search(&analysis.normalized, limit).await?;
            if !semantic_results.is_empty() {
                lists.push(semantic_results);
            }
        }

        // Trigram covers typos and partial forms that defeat the token index
        if fts_empty {
            let trigram_results = self.trigram.search(&analysis.normalized, limit).await?;
            if !trigram_results.is_empty() {
                lists.push(trigram_results);
            }
        }

        let fused = reciprocal_rank_fusion(lists, self.params.rrf_k, limit);
        debug!(
            query = %analysis.original,
            fused = fused.len(),
            semantic = decision.run_semantic,
            "hybrid search complete"
        );

        let results = self
            .reranker
            .rerank(&analysis.normalized, fused, Some(limit))
            .await;

        Ok(HybridSearchOutcome {
            results,
            analysis,
            decision,
        })
    }
}
