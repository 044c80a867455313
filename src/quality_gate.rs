// Quality Gate - checklist-based evaluation of generated answers
//
// Task types with a checklist get a secondary low-temperature AI call that
// scores the candidate response item by item. A fully passed item scores
// 1.0, a partial (null) 0.5, a failed 0.0; the response passes when the
// average reaches the task's minimum ratio. Any failure along the way
// returns None and the caller decides the fallback.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;

use crate::ai_router::{AiRequest, AiRouter};
use crate::prompts;

/// Single checklist evaluation item. `passed` of None means partial credit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub question: String,
    pub passed: Option<bool>,
    #[serde(default)]
    pub note: String,
}

/// Task-specific quality checklist definition
#[derive(Debug, Clone)]
pub struct QualityChecklist {
    pub task: &'static str,
    pub items: Vec<String>,
    pub min_pass_ratio: f32,
}

/// Quality evaluation result
#[derive(Debug, Clone, Serialize)]
pub struct QualityResult {
    pub passed: bool,
    pub score: f32,
    pub details: Vec<ChecklistItem>,
    pub summary: String,
}

static TASK_CHECKLISTS: Lazy<HashMap<&'static str, QualityChecklist>> = Lazy::new(|| {
    let checklist = |task: &'static str, items: &[&str], min_pass_ratio: f32| {
        (
            task,
            QualityChecklist {
                task,
                items: items.iter().map(|s| s.to_string()).collect(),
                min_pass_ratio,
            },
        )
    };

    HashMap::from([
        checklist(
            "insight",
            &[
                "핵심 발견이나 패턴을 식별했는가?",
                "분석의 근거를 구체적으로 인용했는가?",
                "실질적인 시사점이나 제안을 제시했는가?",
                "요청된 분석 범위를 충족했는가?",
            ],
            0.75,
        ),
        checklist(
            "search_qa",
            &[
                "질문에 직접적으로 답변했는가?",
                "검색 결과를 근거로 활용했는가?",
                "출처(노트 제목 등)를 명시했는가?",
                "불확실한 부분을 솔직히 표시했는가?",
            ],
            0.75,
        ),
        checklist(
            "writing",
            &[
                "요청된 글의 구조를 충족했는가?",
                "학술적 관례(논리 전개, 인용 등)를 따랐는가?",
                "핵심 키워드와 개념을 포함했는가?",
                "적절한 마크다운 형식을 사용했는가?",
            ],
            0.75,
        ),
        checklist(
            "spellcheck",
            &[
                "수정 사항을 명확히 표시했는가?",
                "원문의 의미를 보존했는가?",
                "수정 이유를 설명했는가?",
            ],
            1.0,
        ),
        checklist(
            "template",
            &[
                "요청된 템플릿 유형에 적합한 구조인가?",
                "각 섹션에 작성 가이드를 포함했는가?",
                "메타데이터(날짜, 작성자 등) 필드가 있는가?",
                "마크다운 형식으로 작성되었는가?",
            ],
            0.75,
        ),
    ])
});

/// Strip markdown code fences from an AI JSON reply
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

/// Score mapping: true = 1.0, partial (null) = 0.5, false = 0.0
fn score_items(items: &[ChecklistItem]) -> f32 {
    if items.is_empty() {
        return 0.0;
    }
    let sum: f32 = items
        .iter()
        .map(|item| match item.passed {
            Some(true) => 1.0,
            None => 0.5,
            Some(false) => 0.0,
        })
        .sum();
    sum / items.len() as f32
}

/// Evaluates AI responses against task-specific checklists
pub struct QualityGate {
    router: AiRouter,
}

impl QualityGate {
    pub fn new(router: AiRouter) -> Self {
        Self { router }
    }

    /// Checklist for a task, None when the task has no quality gate
    /// (e.g. summarize)
    pub fn checklist(task: &str) -> Option<&'static QualityChecklist> {
        TASK_CHECKLISTS.get(task)
    }

    /// Evaluate a response against the task's checklist.
    ///
    /// Returns None when the task has no checklist or when any step of the
    /// evaluation fails.
    pub async fn evaluate(
        &self,
        task: &str,
        original_request: &str,
        ai_response: &str,
    ) -> Option<QualityResult> {
        let checklist = Self::checklist(task)?;

        let messages = prompts::quality_eval(original_request, ai_response, &checklist.items);
        let request = AiRequest {
            messages,
            model: None,
            temperature: Some(0.1),
            max_tokens: Some(512),
        };

        let response = match self.router.chat(&request).await {
            Ok(response) => response,
            Err(err) => {
                warn!("quality gate evaluation call failed for task={task}: {err}");
                return None;
            }
        };

        match parse_result(&response.content, checklist) {
            Ok(result) => Some(result),
            Err(err) => {
                warn!("quality gate result parse failed for task={task}: {err}");
                None
            }
        }
    }
}

fn parse_result(
    raw_content: &str,
    checklist: &QualityChecklist,
) -> Result<QualityResult, serde_json::Error> {
    let content = strip_code_fences(raw_content);
    let data: Value = serde_json::from_str(&content)?;

    let mut items: Vec<ChecklistItem> = Vec::new();
    if let Some(raw_items) = data["items"].as_array() {
        for raw in raw_items {
            items.push(ChecklistItem {
                question: raw["question"].as_str().unwrap_or_default().to_string(),
                passed: raw["passed"].as_bool(),
                note: raw["note"].as_str().unwrap_or_default().to_string(),
            });
        }
    }

    let score = score_items(&items);
    let passed = score >= checklist.min_pass_ratio;

    Ok(QualityResult {
        passed,
        score: (score * 100.0).round() / 100.0,
        details: items,
        summary: data["summary"].as_str().unwrap_or_default().to_string(),
    })
}
