// Korean Morpheme Extraction - content-word base forms for keyword search
//
// The dictionary-backed analyzer (lindera + ko-dic) tags every morpheme with
// its Sejong POS tag; only content words survive: common nouns (NNG), proper
// nouns (NNP), verb stems (VV), adjective stems (VA), and foreign words (SL).
// When the `korean-analysis` feature is disabled a particle-stripping
// heuristic stands in so the preprocessor keeps working.

/// POS tags kept as content words
const CONTENT_TAGS: &[&str] = &["NNG", "NNP", "VV", "VA", "SL"];

/// Extract content-word morphemes from Korean (or mixed) text.
///
/// Returns base forms deduplicated in first-seen order. An analyzer failure
/// degrades to the heuristic extraction rather than failing the query.
pub fn extract_morphemes(text: &str) -> Vec<String> {
    #[cfg(feature = "korean-analysis")]
    {
        match dictionary::extract(text) {
            Ok(morphemes) => return morphemes,
            Err(err) => {
                tracing::warn!("ko-dic analysis failed, using heuristic fallback: {err}");
            }
        }
    }
    heuristic::extract(text)
}

fn dedup_preserving_order(tokens: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut result = Vec::new();
    for token in tokens {
        if !token.is_empty() && seen.insert(token.clone()) {
            result.push(token);
        }
    }
    result
}

#[cfg(feature = "korean-analysis")]
mod dictionary {
    use super::{dedup_preserving_order, CONTENT_TAGS};
    use anyhow::{Context, Result};
    use lindera::dictionary::load_dictionary;
    use lindera::mode::Mode;
    use lindera::segmenter::Segmenter;
    use lindera::tokenizer::Tokenizer;
    use once_cell::sync::Lazy;
    use parking_lot::Mutex;

    // The tokenizer is not Sync-friendly for detail lookup, so it lives
    // behind a mutex. Analysis inputs are short queries; contention is nil.
    static TOKENIZER: Lazy<Option<Mutex<Tokenizer>>> = Lazy::new(|| match build_tokenizer() {
        Ok(tokenizer) => Some(Mutex::new(tokenizer)),
        Err(err) => {
            tracing::error!("failed to load ko-dic dictionary: {err}");
            None
        }
    });

    fn build_tokenizer() -> Result<Tokenizer> {
        let dictionary =
            load_dictionary("embedded://ko-dic").context("loading embedded ko-dic dictionary")?;
        let segmenter = Segmenter::new(Mode::Normal, dictionary, None);
        Ok(Tokenizer::new(segmenter))
    }

    pub fn extract(text: &str) -> Result<Vec<String>> {
        let tokenizer = TOKENIZER
            .as_ref()
            .context("ko-dic dictionary unavailable")?;
        let guard = tokenizer.lock();
        let mut tokens = guard.tokenize(text).context("tokenizing query")?;

        let mut morphemes = Vec::new();
        for token in tokens.iter_mut() {
            let surface = token.text.to_string();
            let pos = token
                .details()
                .first()
                .map(|tag| tag.to_string())
                .unwrap_or_default();
            if CONTENT_TAGS.iter().any(|tag| pos.starts_with(tag)) {
                morphemes.push(surface);
            }
        }
        Ok(dedup_preserving_order(morphemes))
    }
}

/// Suffix-stripping fallback. Splits on whitespace and removes the longest
/// trailing particle (josa) from each word; Latin runs pass through lowercased
/// as foreign words.
mod heuristic {
    use super::dedup_preserving_order;

    // Ordered longest-first so the greedy strip removes whole particles
    const PARTICLES: &[&str] = &[
        "에서는", "으로는", "까지", "부터", "에서", "에게", "한테", "처럼", "보다", "께서",
        "이나", "라도", "든지", "으로", "은", "는", "이", "가", "을", "를", "에", "와", "과",
        "의", "도", "만", "나", "로", "요",
    ];

    pub fn extract(text: &str) -> Vec<String> {
        let mut morphemes = Vec::new();
        for word in text.split_whitespace() {
            let cleaned: String = word
                .chars()
                .filter(|c| c.is_alphanumeric())
                .collect();
            if cleaned.is_empty() {
                continue;
            }
            if cleaned.chars().all(|c| c.is_ascii_alphanumeric()) {
                morphemes.push(cleaned.to_lowercase());
                continue;
            }
            morphemes.push(strip_particle(&cleaned));
        }
        dedup_preserving_order(morphemes)
    }

    fn strip_particle(word: &str) -> String {
        for particle in PARTICLES {
            if let Some(stem) = word.strip_suffix(particle) {
                // Keep at least one character of stem
                if !stem.is_empty() {
                    return stem.to_string();
                }
            }
        }
        word.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_korean_content_words() {
        let morphemes = extract_morphemes("세포 분열 실험");
        assert!(!morphemes.is_empty());
        // Every content word of the query is represented by a base form
        // that the original word starts with.
        for word in ["세포", "분열", "실험"] {
            assert!(
                morphemes.iter().any(|m| word.starts_with(m.as_str())),
                "no base form found for {word}: {morphemes:?}"
            );
        }
    }

    #[test]
    fn deduplicates_preserving_first_seen_order() {
        let morphemes = extract_morphemes("실험 실험 결과");
        let unique: std::collections::HashSet<_> = morphemes.iter().collect();
        assert_eq!(unique.len(), morphemes.len());
        assert!(word_index(&morphemes, "실험") < word_index(&morphemes, "결과"));
    }

    fn word_index(morphemes: &[String], word: &str) -> usize {
        morphemes
            .iter()
            .position(|m| word.starts_with(m.as_str()))
            .unwrap_or(usize::MAX)
    }

    #[test]
    fn empty_input_yields_no_morphemes() {
        assert!(extract_morphemes("").is_empty());
        assert!(extract_morphemes("   ").is_empty());
    }

    #[test]
    fn heuristic_strips_common_particles() {
        let morphemes = heuristic::extract("실험은 결과를 노트에서");
        assert_eq!(morphemes, vec!["실험", "결과", "노트"]);
    }

    #[test]
    fn heuristic_lowercases_foreign_words() {
        let morphemes = heuristic::extract("PCR 프로토콜");
        assert!(morphemes.contains(&"pcr".to_string()));
    }
}
