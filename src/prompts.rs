// Prompt Templates - per-task message builders for the AI features
//
// Each builder returns the full message list for one feature request. The
// evaluation builders (quality checklist, grounded-QA) live here too so the
// quality pipeline shares the same construction style.

use crate::providers::Message;

/// Truncate to a character budget, keeping prompt sizes bounded
fn clip(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect()
}

/// Insight: analyze a note and surface findings and implications
pub fn insight(note_content: &str) -> Vec<Message> {
    let system = "당신은 연구노트 분석 전문가입니다. 주어진 노트를 분석하여 \
                  핵심 발견, 패턴, 실질적인 시사점을 도출합니다. 분석 근거를 \
                  노트 내용에서 구체적으로 인용하고, 마크다운 형식으로 정리하세요.";
    let user = format!("다음 연구노트를 분석해 주세요.\n\n{}", clip(note_content, 12_000));
    vec![Message::system(system), Message::user(user)]
}

/// Search-QA: answer a question grounded in retrieved notes
pub fn search_qa(question: &str, context_notes: &[String]) -> Vec<Message> {
    let system = "당신은 연구노트 기반 질의응답 도우미입니다. 반드시 제공된 노트 \
                  내용만을 근거로 답변하고, 근거가 된 노트 번호를 명시하세요. \
                  노트에 없는 내용은 모른다고 솔직하게 답하세요.";

    let notes_section = if context_notes.is_empty() {
        "(제공된 노트 없음)".to_string()
    } else {
        context_notes
            .iter()
            .enumerate()
            .map(|(i, note)| format!("[노트 {}]\n{}", i + 1, clip(note, 3000)))
            .collect::<Vec<_>>()
            .join("\n\n")
    };

    let user = format!(
        "## 참조 노트\n{notes_section}\n\n## 질문\n{}",
        clip(question, 2000)
    );
    vec![Message::system(system), Message::user(user)]
}

/// Writing: draft structured text for a topic
pub fn writing(topic: &str, keywords: Option<&str>, existing_content: Option<&str>) -> Vec<Message> {
    let system = "당신은 학술 글쓰기 도우미입니다. 요청된 주제에 대해 논리적 구조를 \
                  갖춘 초안을 마크다운 형식(# 헤딩 포함)으로 작성하세요. 학술적 \
                  관례를 따르고 핵심 개념을 빠짐없이 다루세요.";

    let mut user = format!("주제: {}", clip(topic, 2000));
    if let Some(keywords) = keywords {
        user.push_str(&format!("\n\n포함할 키워드: {}", clip(keywords, 500)));
    }
    if let Some(existing) = existing_content {
        user.push_str(&format!(
            "\n\n기존 내용 (이어서 작성):\n{}",
            clip(existing, 6000)
        ));
    }
    vec![Message::system(system), Message::user(user)]
}

/// Spellcheck: correct text while preserving meaning
pub fn spellcheck(text: &str) -> Vec<Message> {
    let system = "당신은 한국어/영어 맞춤법 교정 전문가입니다. 원문의 의미를 \
                  보존하면서 맞춤법과 문법 오류를 수정하고, 수정 사항과 이유를 \
                  목록으로 명확히 표시하세요.";
    let user = format!("다음 텍스트를 교정해 주세요.\n\n{}", clip(text, 8000));
    vec![Message::system(system), Message::user(user)]
}

/// Template: generate a note template of the requested type
pub fn template(template_type: &str, custom_instructions: Option<&str>) -> Vec<Message> {
    let system = "당신은 연구노트 템플릿 설계 전문가입니다. 요청된 유형에 맞는 \
                  노트 템플릿을 마크다운 형식으로 생성하세요. 각 섹션에 작성 \
                  가이드를 포함하고 날짜, 작성자 등 메타데이터 필드를 넣으세요.";
    let mut user = format!("템플릿 유형: {}", clip(template_type, 500));
    if let Some(instructions) = custom_instructions {
        user.push_str(&format!("\n\n추가 요청사항: {}", clip(instructions, 2000)));
    }
    vec![Message::system(system), Message::user(user)]
}

/// Checklist evaluation prompt used by the quality gate
pub fn quality_eval(
    original_request: &str,
    ai_response: &str,
    checklist_items: &[String],
) -> Vec<Message> {
    let items_section = checklist_items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("{}. {item}", i + 1))
        .collect::<Vec<_>>()
        .join("\n");

    let system = format!(
        "당신은 AI 응답 품질 평가자입니다. 아래 체크리스트의 각 항목에 대해 \
         응답을 평가하세요.\n\n체크리스트:\n{items_section}\n\n\
         각 항목을 passed true(충족) / false(미충족) / null(부분 충족)로 \
         판정하고, 반드시 JSON 형식으로만 응답하세요:\n\
         {{\"items\": [{{\"question\": \"항목\", \"passed\": true, \"note\": \"근거\"}}], \
         \"summary\": \"전체 평가 한 줄 요약\"}}"
    );

    let user = format!(
        "## 원본 요청\n{}\n\n## AI 응답\n{}\n\n체크리스트에 따라 평가하여 JSON으로 응답하세요.",
        clip(original_request, 2000),
        clip(ai_response, 4000)
    );
    vec![Message::system(system), Message::user(user)]
}

/// Grounded-QA evaluation prompt used by the search-QA evaluator
pub fn search_qa_eval(
    question: &str,
    context_notes: &[String],
    note_titles: &[String],
    ai_response: &str,
) -> Vec<Message> {
    let system = "당신은 RAG(검색 증강 생성) 응답 품질 평가 전문가입니다. \
                  AI 응답이 참조 노트에 근거하는지(정확성), 질문에 적절히 \
                  답변하는지(유용성)를 평가합니다.\n\n평가 규칙:\n\
                  1. correctness (0.0~1.0): 응답의 모든 주장이 참조 노트에 근거하면 1.0. \
                  근거 없는 주장(hallucination)이 있으면 감점.\n\
                  2. utility (0.0~1.0): 질문에 대한 직접적이고 완전한 답변이면 1.0. \
                  부분 답변이거나 관련 없는 내용이 많으면 감점.\n\
                  3. source_coverage: 각 참조 노트가 응답에서 인용/활용되었는지 판별.\n\
                  4. grounding_issues: 참조 노트에 없는 주장(hallucination) 목록.\n\
                  5. summary: 전체 평가를 한 줄로 요약.\n\n\
                  반드시 JSON 형식으로만 응답하세요:\n\
                  {\"correctness\": 0.85, \"utility\": 0.9, \
                  \"source_coverage\": [{\"note_index\": 1, \"cited\": true, \
                  \"relevant_claim\": \"인용된 주장\"}], \
                  \"grounding_issues\": [\"근거 없는 주장 목록\"], \
                  \"summary\": \"전체 평가 한 줄 요약\"}";

    let notes_section = context_notes
        .iter()
        .enumerate()
        .map(|(i, note)| {
            let title = note_titles
                .get(i)
                .cloned()
                .unwrap_or_else(|| format!("Note {}", i + 1));
            format!("[노트 {}] {title}\n{}", i + 1, clip(note, 1500))
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    let user = format!(
        "## 원본 질문\n{}\n\n## 참조 노트\n{notes_section}\n\n## AI 응답\n{}\n\n\
         위 참조 노트를 기준으로 AI 응답의 정확성(correctness)과 유용성(utility)을 \
         평가하여 JSON으로 응답하세요.",
        clip(question, 2000),
        clip(ai_response, 4000)
    );
    vec![Message::system(system), Message::user(user)]
}

/// Query-refinement prompt: propose a better search query from the current
/// result titles and optional user feedback
pub fn search_refine(
    query: &str,
    result_titles: &[String],
    feedback: Option<&str>,
    turn: u8,
) -> Vec<Message> {
    let system = "당신은 연구노트 검색 쿼리 최적화 전문가입니다. 사용자의 원본 검색 \
                  쿼리와 현재 검색 결과를 분석하여 더 나은 검색 쿼리를 생성합니다.\n\n\
                  규칙:\n\
                  1. 검색에 최적화된 키워드 조합을 생성하세요 (자연어 질문 형태가 아닌 \
                  핵심 키워드 나열).\n\
                  2. 원본 쿼리의 언어에 맞춰 생성하세요.\n\
                  3. 현재 결과에서 누락된 측면을 파악하여 보완하세요.\n\
                  4. 반드시 JSON 형식으로만 응답하세요:\n\
                  {\"refined_query\": \"개선된 검색 쿼리\", \
                  \"strategy\": \"broaden|narrow|related|rephrase\", \
                  \"reasoning\": \"한 줄 이유\"}\n\n\
                  전략 설명:\n\
                  - broaden: 동의어, 상위 개념 추가로 범위 확장\n\
                  - narrow: 구체적 키워드 추가로 범위 축소\n\
                  - related: 관련 주제/개념 포함\n\
                  - rephrase: 다른 표현으로 재구성";

    let results_section = if result_titles.is_empty() {
        "(검색 결과 없음)".to_string()
    } else {
        result_titles
            .iter()
            .enumerate()
            .map(|(i, title)| format!("{}. {title}", i + 1))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let feedback_section = match feedback {
        Some(feedback) => format!("사용자 피드백: {}\n\n", clip(feedback, 500)),
        None => String::new(),
    };

    let user = format!(
        "원본 검색 쿼리: {} (정제 {turn}회차)\n\n현재 검색 결과 (상위 {}개):\n{results_section}\n\n\
         {feedback_section}위 정보를 분석하여 더 나은 검색 쿼리를 JSON으로 생성하세요.",
        clip(query, 1000),
        result_titles.len()
    );
    vec![Message::system(system), Message::user(user)]
}
