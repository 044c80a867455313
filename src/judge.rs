// Search Judge - post-retrieval decision on whether semantic search must run
//
// FTS always runs first and is cheap; the judge scores its output and only
// triggers the embedding-backed engine when keyword retrieval looks
// insufficient. Quality is a weighted blend of the best FTS score and how
// many query morphemes actually appear in the returned snippets and titles.

use serde::Serialize;
use tracing::info;

use crate::config::SearchParams;
use crate::query_preprocessor::QueryAnalysis;
use crate::search_engine::SearchResult;

/// Result of post-retrieval quality evaluation
#[derive(Debug, Clone, Serialize)]
pub struct JudgeDecision {
    pub run_semantic: bool,
    /// Human-readable explanation, logged for metrics
    pub reason: String,
    /// Quality estimate in [0, 1]
    pub confidence: f32,
    pub fts_count: usize,
    pub max_score: f32,
    pub term_coverage: f32,
}

/// Evaluates FTS results and decides whether semantic search is needed
pub struct SearchJudge {
    params: SearchParams,
}

impl SearchJudge {
    pub fn new(params: SearchParams) -> Self {
        Self { params }
    }

    /// Decide whether semantic search should run.
    ///
    /// Contract: zero FTS results always triggers semantic search,
    /// regardless of thresholds. With adaptive mode disabled, semantic
    /// always runs.
    pub fn judge(&self, analysis: &QueryAnalysis, fts_results: &[SearchResult]) -> JudgeDecision {
        if !self.params.adaptive_enabled {
            return self.log(
                analysis,
                JudgeDecision {
                    run_semantic: true,
                    reason: "adaptive disabled".to_string(),
                    confidence: 1.0,
                    fts_count: fts_results.len(),
                    max_score: 0.0,
                    term_coverage: 0.0,
                },
            );
        }

        if fts_results.is_empty() {
            return self.log(
                analysis,
                JudgeDecision {
                    run_semantic: true,
                    reason: "no FTS results".to_string(),
                    confidence: 1.0,
                    fts_count: 0,
                    max_score: 0.0,
                    term_coverage: 0.0,
                },
            );
        }

        let min_score = self.params.judge_min_score(analysis.language);
        let min_coverage = self.params.judge_min_term_coverage;

        // Max score (best hit) rather than the average: one strong match
        // alongside weak ones should not be penalized.
        let max_score = fts_results
            .iter()
            .map(|r| r.score)
            .fold(f32::NEG_INFINITY, f32::max);
        let term_coverage = compute_term_coverage(analysis, fts_results);

        let score_factor = if min_score > 0.0 {
            (max_score / min_score).min(1.0)
        } else {
            1.0
        };
        let coverage_factor = if min_coverage > 0.0 {
            (term_coverage / min_coverage).min(1.0)
        } else {
            1.0
        };

        // Weighted blend: score 40%, coverage 60%
        let quality = 0.4 * score_factor + 0.6 * coverage_factor;
        let run_semantic = quality < self.params.judge_confidence_threshold;

        let mut reasons: Vec<String> = Vec::new();
        if fts_results.len() < self.params.judge_min_results {
            reasons.push(format!(
                "few results ({}<{})",
                fts_results.len(),
                self.params.judge_min_results
            ));
        }
        if max_score < min_score {
            reasons.push(format!("low max score ({max_score:.3}<{min_score})"));
        }
        if term_coverage < min_coverage {
            reasons.push(format!("low term coverage ({term_coverage:.2}<{min_coverage})"));
        }

        let reason = if run_semantic {
            if reasons.is_empty() {
                "below threshold".to_string()
            } else {
                format!("FTS quality insufficient: {}", reasons.join("; "))
            }
        } else {
            "FTS quality sufficient".to_string()
        };

        self.log(
            analysis,
            JudgeDecision {
                run_semantic,
                reason,
                confidence: quality,
                fts_count: fts_results.len(),
                max_score,
                term_coverage,
            },
        )
    }

    fn log(&self, analysis: &QueryAnalysis, decision: JudgeDecision) -> JudgeDecision {
        info!(
            query = %analysis.original,
            lang = analysis.language.as_str(),
            semantic = decision.run_semantic,
            reason = %decision.reason,
            confidence = decision.confidence,
            fts_count = decision.fts_count,
            max_score = decision.max_score,
            coverage = decision.term_coverage,
            "search judge decision"
        );
        decision
    }
}

/// Fraction of query morphemes appearing in the concatenated snippets and
/// titles. No morphemes means full coverage.
fn compute_term_coverage(analysis: &QueryAnalysis, fts_results: &[SearchResult]) -> f32 {
    if analysis.morphemes.is_empty() {
        return 1.0;
    }

    let combined: String = fts_results
        .iter()
        .map(|r| format!("{} {}", r.snippet, r.title))
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();

    let matched = analysis
        .morphemes
        .iter()
        .filter(|m| combined.contains(&m.to_lowercase()))
        .count();
    matched as f32 / analysis.morphemes.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_preprocessor::analyze_query;

    fn result(title: &str, snippet: &str, score: f32) -> SearchResult {
        SearchResult {
            note_id: "n-1".to_string(),
            title: title.to_string(),
            snippet: snippet.to_string(),
            score,
            search_type: "fts".to_string(),
        }
    }

    fn judge() -> SearchJudge {
        SearchJudge::new(SearchParams::default())
    }

    #[test]
    fn zero_results_always_triggers_semantic() {
        let analysis = analyze_query("cell division");
        let decision = judge().judge(&analysis, &[]);
        assert!(decision.run_semantic);
        assert_eq!(decision.reason, "no FTS results");
        assert_eq!(decision.fts_count, 0);
    }

    #[test]
    fn adaptive_disabled_always_runs_semantic() {
        let params = SearchParams {
            adaptive_enabled: false,
            ..SearchParams::default()
        };
        let analysis = analyze_query("protein");
        let results = vec![result("Protein notes", "protein folding data", 0.9)];
        let decision = SearchJudge::new(params).judge(&analysis, &results);
        assert!(decision.run_semantic);
        assert_eq!(decision.reason, "adaptive disabled");
    }

    #[test]
    fn strong_results_with_full_coverage_skip_semantic() {
        let analysis = analyze_query("protein folding");
        let results = vec![
            result("Protein folding", "notes on protein folding kinetics", 0.9),
            result("Folding pathways", "protein folding intermediates", 0.7),
            result("Chaperones", "assist protein folding", 0.5),
        ];
        let decision = judge().judge(&analysis, &results);
        assert!(!decision.run_semantic);
        assert_eq!(decision.reason, "FTS quality sufficient");
        assert!(decision.confidence >= 0.7);
    }

    #[test]
    fn low_coverage_triggers_semantic() {
        let analysis = analyze_query("mitochondria apoptosis cascade");
        // Snippets mention none of the query terms
        let results = vec![result("Unrelated", "general lab bookkeeping", 0.9)];
        let decision = judge().judge(&analysis, &results);
        assert!(decision.run_semantic);
        assert!(decision.reason.contains("term coverage"));
    }

    #[test]
    fn low_score_triggers_semantic() {
        let analysis = analyze_query("enzyme");
        let results = vec![result("Enzyme", "enzyme kinetics overview enzyme", 0.001)];
        let decision = judge().judge(&analysis, &results);
        // coverage is full (1.0) but score factor is tiny:
        // quality = 0.4 * 0.02 + 0.6 * 1.0 = 0.608 < 0.7
        assert!(decision.run_semantic);
        assert!(decision.reason.contains("low max score"));
    }

    #[test]
    fn coverage_is_one_without_morphemes() {
        let analysis = crate::query_preprocessor::QueryAnalysis {
            original: "???".to_string(),
            normalized: "???".to_string(),
            language: crate::types::QueryLanguage::En,
            morphemes: vec![],
            is_single_term: true,
            ts_expr: String::new(),
        };
        let results = vec![result("t", "s", 0.5)];
        assert_eq!(compute_term_coverage(&analysis, &results), 1.0);
    }

    #[test]
    fn coverage_counts_titles_too() {
        let analysis = analyze_query("western blot");
        let results = vec![result("Western blot protocol", "gel transfer steps", 0.2)];
        let coverage = compute_term_coverage(&analysis, &results);
        assert_eq!(coverage, 1.0);
    }
}
