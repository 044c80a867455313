// Stream Monitor - heuristic mid-flight quality checks on streamed chunks
//
// Pure in-process checks, no AI calls. Text accumulates in a buffer and the
// checks run every check_interval characters, in priority order; the first
// non-continue result wins. Warnings let the stream proceed, aborts stop it.

use serde::Serialize;

/// Monitoring verdict for the current buffer state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamAction {
    Continue,
    Warn,
    Abort,
}

/// Result of one monitoring pass
#[derive(Debug, Clone, Serialize)]
pub struct StreamCheckResult {
    pub action: StreamAction,
    pub reason: String,
    pub issue_type: String,
}

impl StreamCheckResult {
    fn ok() -> Self {
        Self {
            action: StreamAction::Continue,
            reason: String::new(),
            issue_type: String::new(),
        }
    }

    fn warn(reason: impl Into<String>, issue_type: &str) -> Self {
        Self {
            action: StreamAction::Warn,
            reason: reason.into(),
            issue_type: issue_type.to_string(),
        }
    }

    fn abort(reason: impl Into<String>, issue_type: &str) -> Self {
        Self {
            action: StreamAction::Abort,
            reason: reason.into(),
            issue_type: issue_type.to_string(),
        }
    }
}

/// Accumulates streamed text and periodically runs heuristic checks.
///
/// All checks are regex-free character and word counting with
/// sub-millisecond latency.
pub struct StreamMonitor {
    task: String,
    lang: String,
    buffer: String,
    buffer_chars: usize,
    check_interval: usize,
    last_check_pos: usize,
}

impl StreamMonitor {
    pub fn new(task: &str, lang: &str, check_interval: usize) -> Self {
        Self {
            task: task.to_string(),
            lang: lang.to_string(),
            buffer: String::new(),
            buffer_chars: 0,
            check_interval: check_interval.max(1),
            last_check_pos: 0,
        }
    }

    /// Process a chunk. Checks only run once the text accumulated since the
    /// previous check reaches the interval; otherwise this returns continue.
    pub fn process_chunk(&mut self, chunk: &str) -> StreamCheckResult {
        self.buffer.push_str(chunk);
        self.buffer_chars += chunk.chars().count();

        if self.buffer_chars - self.last_check_pos < self.check_interval {
            return StreamCheckResult::ok();
        }

        self.last_check_pos = self.buffer_chars;
        self.run_checks()
    }

    fn run_checks(&self) -> StreamCheckResult {
        if let Some(result) = self.check_language_mismatch() {
            return result;
        }
        if let Some(result) = self.check_repetition() {
            return result;
        }
        if let Some(result) = self.check_format() {
            return result;
        }
        if let Some(result) = self.check_length_anomaly() {
            return result;
        }
        StreamCheckResult::ok()
    }

    /// Korean requests only: warn when the recent output is mostly
    /// non-Hangul. Needs 100+ non-whitespace chars to avoid firing during
    /// early streaming.
    fn check_language_mismatch(&self) -> Option<StreamCheckResult> {
        if self.lang != "ko" {
            return None;
        }

        let recent: Vec<char> = tail_chars(&self.buffer, 500);
        let total: usize = recent.iter().filter(|c| !c.is_whitespace()).count();
        if total < 100 {
            return None;
        }

        let korean = recent
            .iter()
            .filter(|c| ('\u{AC00}'..='\u{D7A3}').contains(*c))
            .count();
        let ratio = korean as f32 / total as f32;
        if ratio < 0.15 {
            return Some(StreamCheckResult::warn(
                "응답 언어가 요청 언어(한국어)와 다릅니다",
                "language_mismatch",
            ));
        }
        None
    }

    /// Repeated identical sentences indicate a degenerate loop. Sentences
    /// are period-delimited and must exceed 20 chars to count; three
    /// occurrences of any one sentence aborts.
    fn check_repetition(&self) -> Option<StreamCheckResult> {
        let sentences: Vec<&str> = self
            .buffer
            .split('.')
            .map(str::trim)
            .filter(|s| s.chars().count() > 20)
            .collect();
        if sentences.len() < 5 {
            return None;
        }

        let mut counts: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
        for sentence in &sentences {
            let count = counts.entry(sentence).or_insert(0);
            *count += 1;
            if *count >= 3 {
                let preview: String = sentence.chars().take(50).collect();
                return Some(StreamCheckResult::abort(
                    format!("반복 패턴 감지: '{preview}...' ({count}회 반복)"),
                    "repetition",
                ));
            }
        }
        None
    }

    /// Writing and template tasks are expected to produce markdown headings
    /// once output passes 500 chars
    fn check_format(&self) -> Option<StreamCheckResult> {
        if self.task != "writing" && self.task != "template" {
            return None;
        }
        if self.buffer_chars < 500 {
            return None;
        }
        if !self.buffer.contains('#') {
            return Some(StreamCheckResult::warn(
                "마크다운 형식(# 헤딩)이 감지되지 않습니다",
                "format",
            ));
        }
        None
    }

    /// After 3000+ chars, fewer than 20 unique words in the last 1000 chars
    /// means the output is stuck
    fn check_length_anomaly(&self) -> Option<StreamCheckResult> {
        if self.buffer_chars < 3000 {
            return None;
        }

        let tail: String = tail_chars(&self.buffer, 1000).into_iter().collect();
        let unique: std::collections::HashSet<&str> = tail.split_whitespace().collect();
        if unique.len() < 20 {
            return Some(StreamCheckResult::abort("과도한 반복 출력 감지", "length"));
        }
        None
    }
}

fn tail_chars(text: &str, n: usize) -> Vec<char> {
    let chars: Vec<char> = text.chars().collect();
    let start = chars.len().saturating_sub(n);
    chars[start..].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_check_runs_before_interval() {
        let mut monitor = StreamMonitor::new("insight", "ko", 300);
        // 299 chars of pure English would trip language mismatch if checked
        let chunk = "a".repeat(299);
        let result = monitor.process_chunk(&chunk);
        assert_eq!(result.action, StreamAction::Continue);
    }

    #[test]
    fn check_runs_once_interval_reached() {
        let mut monitor = StreamMonitor::new("insight", "ko", 300);
        let chunk = "english only output without any hangul characters at all ".repeat(6);
        let result = monitor.process_chunk(&chunk);
        assert_eq!(result.action, StreamAction::Warn);
        assert_eq!(result.issue_type, "language_mismatch");
    }

    #[test]
    fn interval_gating_resets_after_each_check() {
        let mut monitor = StreamMonitor::new("insight", "en", 100);
        let big = "word ".repeat(30); // 150 chars, triggers a check
        assert_eq!(monitor.process_chunk(&big).action, StreamAction::Continue);
        // 50 more chars: below the next interval boundary, no check
        let small = "word ".repeat(10);
        assert_eq!(monitor.process_chunk(&small).action, StreamAction::Continue);
    }

    #[test]
    fn korean_output_passes_language_check() {
        let mut monitor = StreamMonitor::new("insight", "ko", 300);
        let chunk = "세포분열은 생명체의 기본 과정입니다 ".repeat(20);
        let result = monitor.process_chunk(&chunk);
        assert_eq!(result.action, StreamAction::Continue);
    }

    #[test]
    fn language_check_skipped_for_english_requests() {
        let mut monitor = StreamMonitor::new("insight", "en", 300);
        let chunk = "english output is expected here so nothing fires ".repeat(10);
        let result = monitor.process_chunk(&chunk);
        assert_eq!(result.action, StreamAction::Continue);
    }

    #[test]
    fn three_identical_long_sentences_abort() {
        let mut monitor = StreamMonitor::new("insight", "en", 100);
        let sentence = "the mitochondria is the powerhouse of the cell";
        let filler1 = "completely different first filler sentence here";
        let filler2 = "another unrelated filler sentence for the count";
        let text = format!("{sentence}. {filler1}. {sentence}. {filler2}. {sentence}. ");
        let result = monitor.process_chunk(&text);
        assert_eq!(result.action, StreamAction::Abort);
        assert_eq!(result.issue_type, "repetition");
    }

    #[test]
    fn short_sentences_never_count_toward_repetition() {
        let mut monitor = StreamMonitor::new("insight", "en", 50);
        let text = "ok. ok. ok. ok. ok. ok. ok. ok. ok. ok. ok. ok. ok. ok. ".repeat(3);
        let result = monitor.process_chunk(&text);
        assert_eq!(result.action, StreamAction::Continue);
    }

    #[test]
    fn writing_without_headings_warns_after_500_chars() {
        let mut monitor = StreamMonitor::new("writing", "en", 300);
        let text = "plain prose without any heading marker whatsoever ".repeat(12);
        let result = monitor.process_chunk(&text);
        assert_eq!(result.action, StreamAction::Warn);
        assert_eq!(result.issue_type, "format");
    }

    #[test]
    fn writing_with_headings_passes_format_check() {
        let mut monitor = StreamMonitor::new("writing", "en", 300);
        let text = format!("# Heading\n\n{}", "structured prose follows here ".repeat(20));
        let result = monitor.process_chunk(&text);
        assert_eq!(result.action, StreamAction::Continue);
    }

    #[test]
    fn format_check_ignores_other_tasks() {
        let mut monitor = StreamMonitor::new("insight", "en", 300);
        let text = "plain prose without any heading marker whatsoever ".repeat(12);
        let result = monitor.process_chunk(&text);
        assert_eq!(result.action, StreamAction::Continue);
    }

    #[test]
    fn low_word_diversity_aborts_after_3000_chars() {
        let mut monitor = StreamMonitor::new("insight", "en", 300);
        // 3500+ chars built from two words; unique count stays below 20.
        // Sentence length stays under the repetition threshold.
        let text = "loop again. ".repeat(300);
        let result = monitor.process_chunk(&text);
        assert_eq!(result.action, StreamAction::Abort);
        assert_eq!(result.issue_type, "length");
    }

    #[test]
    fn diverse_long_output_passes_all_checks() {
        let mut monitor = StreamMonitor::new("insight", "en", 300);
        let mut text = String::new();
        for i in 0..600 {
            text.push_str(&format!("unique{i} observation "));
        }
        let result = monitor.process_chunk(&text);
        assert_eq!(result.action, StreamAction::Continue);
    }
}
