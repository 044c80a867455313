// Hybrid Merger - reciprocal rank fusion of parallel engine outputs
//
// fused_score(doc) = Σ 1 / (k + rank_in_list_i(doc)) with 1-based ranks.
// Duplicate note ids are merged, retaining the snippet from the
// higher-ranking occurrence; ties on the fused score fall back to the
// original engine score.

use std::collections::HashMap;

use crate::search_engine::SearchResult;

/// Default fusion constant
pub const DEFAULT_RRF_K: f32 = 60.0;

struct FusedEntry {
    result: SearchResult,
    fused_score: f32,
    best_rank: usize,
    /// Highest original engine score seen for this note, used as tie-break
    engine_score: f32,
}

/// Fuse two or more ranked lists into one, labeled `hybrid`.
///
/// Lists are consumed in priority-agnostic fashion: each contributes
/// 1/(k + rank) per document. The result is sorted by fused score
/// descending, ties broken by the best original engine score.
pub fn reciprocal_rank_fusion(lists: Vec<Vec<SearchResult>>, k: f32, limit: usize) -> Vec<SearchResult> {
    let mut entries: HashMap<String, FusedEntry> = HashMap::new();

    for list in lists {
        for (index, result) in list.into_iter().enumerate() {
            let rank = index + 1;
            let contribution = 1.0 / (k + rank as f32);

            match entries.get_mut(&result.note_id) {
                Some(entry) => {
                    entry.fused_score += contribution;
                    entry.engine_score = entry.engine_score.max(result.score);
                    // The higher-ranking occurrence keeps its snippet
                    if rank < entry.best_rank {
                        entry.best_rank = rank;
                        entry.result.snippet = result.snippet;
                        entry.result.title = result.title;
                    }
                }
                None => {
                    let engine_score = result.score;
                    entries.insert(
                        result.note_id.clone(),
                        FusedEntry {
                            result,
                            fused_score: contribution,
                            best_rank: rank,
                            engine_score,
                        },
                    );
                }
            }
        }
    }

    let mut fused: Vec<FusedEntry> = entries.into_values().collect();
    fused.sort_by(|a, b| {
        b.fused_score
            .partial_cmp(&a.fused_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.engine_score
                    .partial_cmp(&a.engine_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    });

    fused
        .into_iter()
        .take(limit)
        .map(|entry| SearchResult {
            score: entry.fused_score,
            search_type: "hybrid".to_string(),
            ..entry.result
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn result(note_id: &str, snippet: &str, score: f32, search_type: &str) -> SearchResult {
        SearchResult {
            note_id: note_id.to_string(),
            title: format!("title-{note_id}"),
            snippet: snippet.to_string(),
            score,
            search_type: search_type.to_string(),
        }
    }

    #[test]
    fn document_in_both_lists_ranks_first() {
        let fts = vec![
            result("a", "fts-a", 0.9, "fts"),
            result("b", "fts-b", 0.5, "fts"),
        ];
        let semantic = vec![
            result("b", "sem-b", 0.8, "semantic"),
            result("c", "sem-c", 0.6, "semantic"),
        ];

        let fused = reciprocal_rank_fusion(vec![fts, semantic], 60.0, 10);
        assert_eq!(fused[0].note_id, "b");
        // b: 1/62 + 1/61; a: 1/61; c: 1/62
        let expected = 1.0 / 62.0 + 1.0 / 61.0;
        assert!((fused[0].score - expected).abs() < 1e-6);
    }

    #[test]
    fn all_fused_results_are_labeled_hybrid() {
        let fused = reciprocal_rank_fusion(
            vec![vec![result("a", "s", 0.9, "fts")], vec![result("b", "s", 0.8, "semantic")]],
            60.0,
            10,
        );
        assert!(fused.iter().all(|r| r.search_type == "hybrid"));
    }

    #[test]
    fn duplicate_merge_keeps_higher_ranking_snippet() {
        let fts = vec![
            result("x", "top-ranked snippet", 0.9, "fts"),
        ];
        let semantic = vec![
            result("other", "first", 0.9, "semantic"),
            result("x", "lower-ranked snippet", 0.8, "semantic"),
        ];
        let fused = reciprocal_rank_fusion(vec![fts, semantic], 60.0, 10);
        let x = fused.iter().find(|r| r.note_id == "x").unwrap();
        // rank 1 in the FTS list beats rank 2 in the semantic list
        assert_eq!(x.snippet, "top-ranked snippet");
    }

    #[test]
    fn equal_fused_scores_tie_break_on_engine_score() {
        // a and b each appear once at rank 1 of their own list
        let fused = reciprocal_rank_fusion(
            vec![
                vec![result("a", "s", 0.2, "fts")],
                vec![result("b", "s", 0.9, "semantic")],
            ],
            60.0,
            10,
        );
        assert_eq!(fused[0].note_id, "b");
        assert_eq!(fused[1].note_id, "a");
    }

    #[test]
    fn limit_truncates_output() {
        let list: Vec<SearchResult> = (0..20)
            .map(|i| result(&format!("n{i}"), "s", 1.0 - i as f32 * 0.01, "fts"))
            .collect();
        let fused = reciprocal_rank_fusion(vec![list], 60.0, 5);
        assert_eq!(fused.len(), 5);
    }

    #[test]
    fn single_list_preserves_order() {
        let list = vec![
            result("first", "s", 0.9, "fts"),
            result("second", "s", 0.8, "fts"),
            result("third", "s", 0.7, "fts"),
        ];
        let fused = reciprocal_rank_fusion(vec![list], 60.0, 10);
        let ids: Vec<&str> = fused.iter().map(|r| r.note_id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(reciprocal_rank_fusion(vec![], 60.0, 10).is_empty());
        assert!(reciprocal_rank_fusion(vec![vec![], vec![]], 60.0, 10).is_empty());
    }
}
