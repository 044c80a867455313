// Multi-turn Query Refinement - AI-proposed query improvements
//
// Analyzes the current result set and proposes a better query with one of
// four strategies (broaden, narrow, related, rephrase). Turns are capped,
// and any failure of the AI call or its parse falls back to the original
// query so refinement can never break the search flow.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::ai_router::{AiRequest, AiRouter};
use crate::prompts;

/// Refinement stops after this many turns
pub const MAX_REFINEMENT_TURNS: u8 = 4;

const STRATEGIES: &[&str] = &["broaden", "narrow", "related", "rephrase"];

// JSON payload inside an optional markdown fence
static FENCED_JSON_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("valid fence regex"));

/// Result of a query refinement step
#[derive(Debug, Clone, Serialize)]
pub struct RefinementResult {
    pub refined_query: String,
    /// One of broaden | narrow | related | rephrase
    pub strategy: String,
    pub reasoning: String,
    /// The (clamped) turn this result belongs to
    pub turn: u8,
}

impl RefinementResult {
    fn fallback(query: &str, reasoning: &str, turn: u8) -> Self {
        Self {
            refined_query: query.to_string(),
            strategy: "rephrase".to_string(),
            reasoning: reasoning.to_string(),
            turn,
        }
    }
}

/// Refines search queries using AI analysis of the current results
pub struct SearchRefiner {
    router: AiRouter,
}

impl SearchRefiner {
    pub fn new(router: AiRouter) -> Self {
        Self { router }
    }

    /// Generate an improved search query from the current result titles and
    /// optional user feedback. `turn` is 1-based and clamped to the cap.
    pub async fn refine_query(
        &self,
        original_query: &str,
        result_titles: &[String],
        feedback: Option<&str>,
        turn: u8,
    ) -> RefinementResult {
        let turn = clamp_turn(turn);
        let messages = prompts::search_refine(original_query, result_titles, feedback, turn);
        let request = AiRequest {
            messages,
            model: None,
            temperature: Some(0.3),
            max_tokens: Some(256),
        };

        match self.router.chat(&request).await {
            Ok(response) => parse_response(&response.content, original_query, turn),
            Err(err) => {
                warn!("query refinement call failed, keeping original query: {err}");
                RefinementResult::fallback(original_query, "AI 호출 실패로 원본 쿼리 유지", turn)
            }
        }
    }
}

fn clamp_turn(turn: u8) -> u8 {
    turn.clamp(1, MAX_REFINEMENT_TURNS)
}

/// Parse the refinement JSON, tolerating markdown fences. Anything
/// unusable keeps the original query.
fn parse_response(content: &str, fallback_query: &str, turn: u8) -> RefinementResult {
    let raw = FENCED_JSON_RE
        .captures(content)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str())
        .unwrap_or_else(|| content.trim());

    let Ok(data) = serde_json::from_str::<Value>(raw) else {
        warn!(
            "failed to parse refinement response: {}",
            content.chars().take(200).collect::<String>()
        );
        return RefinementResult::fallback(fallback_query, "응답 파싱 실패", turn);
    };

    let strategy = match data["strategy"].as_str() {
        Some(candidate) if STRATEGIES.contains(&candidate) => candidate,
        _ => "rephrase",
    };
    let refined_query = data["refined_query"]
        .as_str()
        .map(str::trim)
        .filter(|query| !query.is_empty())
        .unwrap_or(fallback_query);

    RefinementResult {
        refined_query: refined_query.to_string(),
        strategy: strategy.to_string(),
        reasoning: data["reasoning"].as_str().unwrap_or_default().to_string(),
        turn,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_is_clamped_to_the_cap() {
        assert_eq!(clamp_turn(0), 1);
        assert_eq!(clamp_turn(1), 1);
        assert_eq!(clamp_turn(4), 4);
        assert_eq!(clamp_turn(9), MAX_REFINEMENT_TURNS);
    }

    #[test]
    fn plain_json_parses() {
        let raw = r#"{"refined_query": "세포분열 현미경 관찰", "strategy": "narrow", "reasoning": "범위 축소"}"#;
        let result = parse_response(raw, "세포", 2);
        assert_eq!(result.refined_query, "세포분열 현미경 관찰");
        assert_eq!(result.strategy, "narrow");
        assert_eq!(result.reasoning, "범위 축소");
        assert_eq!(result.turn, 2);
    }

    #[test]
    fn fenced_json_parses() {
        let raw = "```json\n{\"refined_query\": \"protein folding kinetics\", \"strategy\": \"broaden\", \"reasoning\": \"r\"}\n```";
        let result = parse_response(raw, "protein", 1);
        assert_eq!(result.refined_query, "protein folding kinetics");
        assert_eq!(result.strategy, "broaden");
    }

    #[test]
    fn garbage_falls_back_to_original_query() {
        let result = parse_response("I could not produce JSON, sorry.", "enzyme assay", 1);
        assert_eq!(result.refined_query, "enzyme assay");
        assert_eq!(result.strategy, "rephrase");
        assert_eq!(result.reasoning, "응답 파싱 실패");
    }

    #[test]
    fn unknown_strategy_is_normalized_to_rephrase() {
        let raw = r#"{"refined_query": "q2", "strategy": "invent", "reasoning": ""}"#;
        assert_eq!(parse_response(raw, "q", 1).strategy, "rephrase");
    }

    #[test]
    fn empty_refined_query_keeps_the_original() {
        let raw = r#"{"refined_query": "  ", "strategy": "narrow", "reasoning": ""}"#;
        let result = parse_response(raw, "western blot", 1);
        assert_eq!(result.refined_query, "western blot");
    }

    #[tokio::test]
    async fn router_failure_falls_back_instead_of_erroring() {
        // Empty registry: the chat call fails, the refiner keeps the query
        let refiner = SearchRefiner::new(AiRouter::new());
        let result = refiner
            .refine_query("세포분열", &["노트".to_string()], None, 7)
            .await;
        assert_eq!(result.refined_query, "세포분열");
        assert_eq!(result.strategy, "rephrase");
        assert_eq!(result.turn, MAX_REFINEMENT_TURNS);
        assert!(result.reasoning.contains("원본 쿼리 유지"));
    }
}
