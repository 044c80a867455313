// Search-QA Evaluator - grounded correctness/utility decomposition
//
// Deeper, search-specific evaluation independent of the checklist gate.
// A secondary AI call scores how well the answer is grounded in the context
// notes (correctness) and how well it answers the question (utility), plus
// per-note citation coverage and a list of unsupported claims.

use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::ai_router::{AiRequest, AiRouter};
use crate::prompts;

/// Whether a source note was actually cited in the answer
#[derive(Debug, Clone, Serialize)]
pub struct SourceCoverage {
    pub note_index: usize,
    pub note_title: String,
    pub cited: bool,
    pub relevant_claim: String,
}

/// Confidence label derived from the numeric scores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// Evaluation result with correctness/utility decomposition
#[derive(Debug, Clone, Serialize)]
pub struct SearchQaEvaluation {
    /// Fraction of claims supported by context, clamped to [0, 1]
    pub correctness: f32,
    /// How well the question is answered, clamped to [0, 1]
    pub utility: f32,
    pub confidence: Confidence,
    pub source_coverage: Vec<SourceCoverage>,
    pub grounding_issues: Vec<String>,
    pub summary: String,
}

/// high: correctness ≥ 0.8 and utility ≥ 0.7; medium: correctness ≥ 0.5
fn confidence_label(correctness: f32, utility: f32) -> Confidence {
    if correctness >= 0.8 && utility >= 0.7 {
        Confidence::High
    } else if correctness >= 0.5 {
        Confidence::Medium
    } else {
        Confidence::Low
    }
}

fn clamp_round(value: f64) -> f32 {
    let clamped = value.clamp(0.0, 1.0) as f32;
    (clamped * 100.0).round() / 100.0
}

fn strip_code_fences(raw: &str) -> String {
    let trimmed = raw.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    trimmed
        .lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Evaluates search-QA responses for correctness and utility
pub struct SearchQaEvaluator {
    router: AiRouter,
}

impl SearchQaEvaluator {
    pub fn new(router: AiRouter) -> Self {
        Self { router }
    }

    /// Evaluate an answer against its context notes.
    ///
    /// Returns None for empty context or when the evaluation call or its
    /// parse fails.
    pub async fn evaluate(
        &self,
        question: &str,
        context_notes: &[String],
        note_titles: &[String],
        ai_response: &str,
    ) -> Option<SearchQaEvaluation> {
        if context_notes.is_empty() {
            return None;
        }

        let messages = prompts::search_qa_eval(question, context_notes, note_titles, ai_response);
        let request = AiRequest {
            messages,
            model: None,
            temperature: Some(0.1),
            max_tokens: Some(768),
        };

        let response = match self.router.chat(&request).await {
            Ok(response) => response,
            Err(err) => {
                warn!("search-QA evaluation call failed: {err}");
                return None;
            }
        };

        match parse_result(&response.content, note_titles) {
            Ok(evaluation) => Some(evaluation),
            Err(err) => {
                warn!("search-QA evaluation parse failed: {err}");
                None
            }
        }
    }
}

fn parse_result(
    raw_content: &str,
    note_titles: &[String],
) -> Result<SearchQaEvaluation, serde_json::Error> {
    let content = strip_code_fences(raw_content);
    let data: Value = serde_json::from_str(&content)?;

    let correctness = clamp_round(data["correctness"].as_f64().unwrap_or(0.0));
    let utility = clamp_round(data["utility"].as_f64().unwrap_or(0.0));

    let mut source_coverage: Vec<SourceCoverage> = Vec::new();
    if let Some(raw_coverage) = data["source_coverage"].as_array() {
        for entry in raw_coverage {
            let note_index = entry["note_index"].as_u64().unwrap_or(0) as usize;
            // note_index is 1-based; resolve the canonical title when valid
            let note_title = if note_index >= 1 && note_index <= note_titles.len() {
                note_titles[note_index - 1].clone()
            } else {
                entry["note_title"].as_str().unwrap_or_default().to_string()
            };
            source_coverage.push(SourceCoverage {
                note_index,
                note_title,
                cited: entry["cited"].as_bool().unwrap_or(false),
                relevant_claim: entry["relevant_claim"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string(),
            });
        }
    }

    let grounding_issues = data["grounding_issues"]
        .as_array()
        .map(|issues| {
            issues
                .iter()
                .map(|issue| match issue.as_str() {
                    Some(s) => s.to_string(),
                    None => issue.to_string(),
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(SearchQaEvaluation {
        correctness,
        utility,
        confidence: confidence_label(correctness, utility),
        source_coverage,
        grounding_issues,
        summary: data["summary"].as_str().unwrap_or_default().to_string(),
    })
}
