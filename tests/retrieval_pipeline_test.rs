// Integration tests for the retrieval pipeline pieces that run without a
// database: query analysis, judge decisions, rank fusion, and the stream
// monitor and quality-gate arithmetic they feed.

use notewise::{
    analyze_query, reciprocal_rank_fusion, QueryLanguage, SearchJudge, SearchParams, SearchResult,
    StreamAction, StreamMonitor,
};

fn result(note_id: &str, title: &str, snippet: &str, score: f32, search_type: &str) -> SearchResult {
    SearchResult {
        note_id: note_id.to_string(),
        title: title.to_string(),
        snippet: snippet.to_string(),
        score,
        search_type: search_type.to_string(),
    }
}

#[test]
fn korean_query_flows_through_analysis_and_judge() {
    let analysis = analyze_query("세포분열 실험");
    assert_eq!(analysis.language, QueryLanguage::Ko);
    assert!(!analysis.morphemes.is_empty());
    assert!(!analysis.ts_expr.is_empty());

    // No FTS hits for the literal Korean term: the judge must trigger
    // semantic search unconditionally.
    let judge = SearchJudge::new(SearchParams::default());
    let decision = judge.judge(&analysis, &[]);
    assert!(decision.run_semantic);
    assert_eq!(decision.confidence, 1.0);
}

#[test]
fn fts_empty_then_semantic_results_fuse_as_hybrid() {
    // The judge fired semantic search; fusion runs over the single
    // non-empty list and labels everything hybrid.
    let semantic = vec![
        result("cell-div", "Cell division", "mitosis and meiosis stages", 0.82, "semantic"),
        result("other", "Unrelated", "buffer prep", 0.4, "semantic"),
    ];
    let fused = reciprocal_rank_fusion(vec![semantic], 60.0, 10);
    assert_eq!(fused[0].note_id, "cell-div");
    assert!(fused.iter().all(|r| r.search_type == "hybrid"));
    assert!(fused[0].score > 0.0);
}

#[test]
fn hybrid_happy_path_ranks_keyword_match_first() {
    // Note A matches both engines, note B only one: A must lead.
    let fts = vec![
        result("a", "PCR protocol", "amplification cycles", 0.9, "fts"),
        result("b", "Western blot", "gel transfer", 0.2, "fts"),
    ];
    let semantic = vec![
        result("a", "PCR protocol", "amplification cycles", 0.88, "semantic"),
    ];
    let fused = reciprocal_rank_fusion(vec![fts, semantic], 60.0, 10);
    assert_eq!(fused[0].note_id, "a");
    assert_eq!(fused[0].search_type, "hybrid");
    assert!(fused[0].score > fused[1].score);
}

#[test]
fn judge_skips_semantic_for_strong_keyword_results() {
    let analysis = analyze_query("protein folding kinetics");
    let results = vec![
        result("1", "Protein folding", "protein folding kinetics overview", 0.8, "fts"),
        result("2", "Kinetics", "folding kinetics measurements", 0.6, "fts"),
        result("3", "Chaperones", "protein folding helpers", 0.5, "fts"),
    ];
    let decision = SearchJudge::new(SearchParams::default()).judge(&analysis, &results);
    assert!(!decision.run_semantic);
    assert_eq!(decision.fts_count, 3);
    assert!(decision.term_coverage >= 0.9);
}

#[test]
fn monitor_aborts_on_three_identical_sentences() {
    let mut monitor = StreamMonitor::new("search_qa", "en", 50);
    let repeated = "the experiment produced the same sentence again and again";
    let fill_a = "one completely different filler sentence appears here";
    let fill_b = "yet another unrelated filler sentence for good measure";
    let text = format!("{repeated}. {fill_a}. {repeated}. {fill_b}. {repeated}. ");

    let verdict = monitor.process_chunk(&text);
    assert_eq!(verdict.action, StreamAction::Abort);
    assert_eq!(verdict.issue_type, "repetition");
}

#[test]
fn monitor_is_silent_until_interval() {
    let mut monitor = StreamMonitor::new("writing", "ko", 300);
    for _ in 0..5 {
        // 50 chars per chunk: first checks may only happen from chunk 6 on
        let verdict = monitor.process_chunk(&"plain english text without headings only ascii %% ");
        assert_eq!(verdict.action, StreamAction::Continue);
    }
}

#[test]
fn whitespace_query_produces_no_expression_and_no_error() {
    let analysis = analyze_query(" \u{00A0}  ");
    assert!(analysis.ts_expr.is_empty());
    assert!(analysis.morphemes.is_empty());

    let fused = reciprocal_rank_fusion(vec![], 60.0, 10);
    assert!(fused.is_empty());
}
