// Query Preprocessor - language detection, morpheme extraction, and
// keyword-expression building for the retrieval pipeline
//
// Turns a raw query string into the structured analysis both the FTS engine
// (keyword expression) and the semantic engine (normalized text) consume.

use serde::Serialize;
use unicode_normalization::UnicodeNormalization;

use crate::korean;
use crate::types::QueryLanguage;

/// Result of analyzing a search query
#[derive(Debug, Clone, Serialize)]
pub struct QueryAnalysis {
    /// The original query string, untouched
    pub original: String,
    /// NFC-normalized, trimmed text for embedding search
    pub normalized: String,
    pub language: QueryLanguage,
    /// Content-word base forms (Korean) or lowercased tokens (English)
    pub morphemes: Vec<String>,
    /// Whether the query is a single whitespace-delimited term
    pub is_single_term: bool,
    /// OR-joined expression consumed by the token-index engine
    pub ts_expr: String,
}

impl QueryAnalysis {
    fn empty(original: &str) -> Self {
        Self {
            original: original.to_string(),
            normalized: String::new(),
            language: QueryLanguage::En,
            morphemes: Vec::new(),
            is_single_term: false,
            ts_expr: String::new(),
        }
    }
}

/// Analyze a search query for language, morphemes, and keyword expression.
///
/// Empty or whitespace-only queries yield an empty analysis with an empty
/// expression, which downstream engines treat as "no results", not an error.
pub fn analyze_query(query: &str) -> QueryAnalysis {
    let stripped = query.trim();
    if stripped.is_empty() {
        return QueryAnalysis::empty(query);
    }

    // NFC keeps composed Hangul syllables consistent across sources
    let normalized: String = stripped.nfc().collect();
    let language = detect_language(&normalized);

    let tokens: Vec<&str> = normalized.split_whitespace().collect();
    let is_single_term = tokens.len() == 1;

    let morphemes = match language {
        QueryLanguage::Ko | QueryLanguage::Mixed => korean::extract_morphemes(&normalized),
        QueryLanguage::En => tokens.iter().map(|t| t.to_lowercase()).collect(),
    };

    let ts_expr = build_ts_expr(&morphemes, &tokens);

    QueryAnalysis {
        original: query.to_string(),
        normalized,
        language,
        morphemes,
        is_single_term,
        ts_expr,
    }
}

/// Detect the primary language of a text string.
///
/// Hangul syllables, compatibility jamo, and conjoining jamo all count as
/// Korean; any ASCII letter counts as Latin.
fn detect_language(text: &str) -> QueryLanguage {
    let has_korean = text.chars().any(is_hangul);
    let has_latin = text.chars().any(|c| c.is_ascii_alphabetic());

    match (has_korean, has_latin) {
        (true, true) => QueryLanguage::Mixed,
        (true, false) => QueryLanguage::Ko,
        _ => QueryLanguage::En,
    }
}

fn is_hangul(c: char) -> bool {
    matches!(c,
        '\u{AC00}'..='\u{D7A3}' | '\u{3131}'..='\u{3163}' | '\u{1100}'..='\u{11FF}')
}

/// Build the OR-joined keyword expression from morphemes and the original
/// whitespace tokens, deduplicating case-insensitively and doubling single
/// quotes for the token-index engine.
fn build_ts_expr(morphemes: &[String], original_tokens: &[&str]) -> String {
    let mut seen = std::collections::HashSet::new();
    let mut terms: Vec<String> = Vec::new();

    let mut push = |raw: &str| {
        let lower = raw.trim().to_lowercase();
        if !lower.is_empty() && seen.insert(lower.clone()) {
            terms.push(lower.replace('\'', "''"));
        }
    };

    for m in morphemes {
        push(m);
    }
    for t in original_tokens {
        push(t);
    }

    terms.join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_query_yields_empty_analysis() {
        let analysis = analyze_query("");
        assert!(analysis.morphemes.is_empty());
        assert_eq!(analysis.ts_expr, "");
        assert!(!analysis.is_single_term);
        assert_eq!(analysis.normalized, "");
    }

    #[test]
    fn whitespace_only_query_is_empty() {
        let analysis = analyze_query("   \t ");
        assert!(analysis.morphemes.is_empty());
        assert_eq!(analysis.ts_expr, "");
    }

    #[test]
    fn detects_korean() {
        assert_eq!(analyze_query("세포분열").language, QueryLanguage::Ko);
    }

    #[test]
    fn detects_english() {
        assert_eq!(analyze_query("protein folding").language, QueryLanguage::En);
    }

    #[test]
    fn detects_mixed() {
        assert_eq!(analyze_query("PCR 프로토콜").language, QueryLanguage::Mixed);
    }

    #[test]
    fn english_tokens_are_lowercased() {
        let analysis = analyze_query("Western Blot");
        assert_eq!(analysis.morphemes, vec!["western", "blot"]);
        assert_eq!(analysis.ts_expr, "western | blot");
    }

    #[test]
    fn single_term_detection_uses_raw_token_count() {
        assert!(analyze_query("pcr").is_single_term);
        assert!(!analyze_query("pcr protocol").is_single_term);
    }

    #[test]
    fn ts_expr_deduplicates_morphemes_and_tokens() {
        // "protocol" appears as both morpheme and original token once
        let analysis = analyze_query("protocol protocol");
        assert_eq!(analysis.ts_expr, "protocol");
    }

    #[test]
    fn ts_expr_escapes_single_quotes() {
        let analysis = analyze_query("o'brien");
        assert_eq!(analysis.ts_expr, "o''brien");
    }

    #[test]
    fn korean_query_contains_content_morphemes() {
        let analysis = analyze_query("실험 결과 정리");
        for word in ["실험", "결과", "정리"] {
            assert!(
                analysis.morphemes.iter().any(|m| word.starts_with(m.as_str())),
                "missing base form for {word}: {:?}",
                analysis.morphemes
            );
        }
        assert!(!analysis.ts_expr.is_empty());
    }

    #[test]
    fn nfc_normalization_composes_hangul() {
        // Decomposed jamo sequence for 가 (U+1100 U+1161)
        let decomposed = "\u{1100}\u{1161}";
        let analysis = analyze_query(decomposed);
        assert_eq!(analysis.normalized, "가");
        assert_eq!(analysis.language, QueryLanguage::Ko);
    }
}
