// Core Data Model - persistence-facing records and validated request types
//
// Notes exclusively own their embeddings and attachment texts; deleting a
// note removes both. Search events and feedback belong to the metrics store
// and are never referenced by the retrieval path.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Detected language of a search query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryLanguage {
    Ko,
    En,
    Mixed,
}

impl QueryLanguage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ko => "ko",
            Self::En => "en",
            Self::Mixed => "mixed",
        }
    }
}

/// Supported retrieval strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    #[default]
    Hybrid,
    Fts,
    Semantic,
    Trigram,
}

impl SearchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hybrid => "hybrid",
            Self::Fts => "fts",
            Self::Semantic => "semantic",
            Self::Trigram => "trigram",
        }
    }
}

/// AI features exposed over /ai/chat and /ai/stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureType {
    Insight,
    SearchQa,
    Writing,
    Spellcheck,
    Template,
}

impl FeatureType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insight => "insight",
            Self::SearchQa => "search_qa",
            Self::Writing => "writing",
            Self::Spellcheck => "spellcheck",
            Self::Template => "template",
        }
    }
}

/// Canonical text record synchronized from the external note repository.
///
/// `external_id` is immutable; `content_text` is derived from
/// `content_html` and both are persisted.
#[derive(Debug, Clone, FromRow)]
pub struct Note {
    pub id: i64,
    pub external_id: String,
    pub title: String,
    pub content_html: String,
    pub content_text: String,
    pub notebook_name: Option<String>,
    pub tags: Option<serde_json::Value>,
    pub source_created_at: Option<DateTime<Utc>>,
    pub source_updated_at: Option<DateTime<Utc>>,
    pub synced_at: DateTime<Utc>,
}

/// Semantic fingerprint of one note chunk. Ordinals are contiguous per note.
#[derive(Debug, Clone)]
pub struct NoteEmbedding {
    pub note_id: i64,
    pub chunk_index: i32,
    pub chunk_text: String,
    pub embedding: Vec<f32>,
}

/// Extraction lifecycle of an attachment or image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionStatus {
    Pending,
    Completed,
    Empty,
    Failed,
}

impl ExtractionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Empty => "empty",
            Self::Failed => "failed",
        }
    }
}

/// Text extracted from a non-note artifact (PDF, document, image OCR).
/// Only `completed` extractions feed the indexer.
#[derive(Debug, Clone, FromRow)]
pub struct AttachmentText {
    pub note_id: i64,
    pub filename: String,
    pub mime: Option<String>,
    pub extracted_text: Option<String>,
    pub extraction_status: String,
    pub vision_description: Option<String>,
}

/// One retrieval observation, written fire-and-forget after each search
#[derive(Debug, Clone)]
pub struct SearchEvent {
    pub user_name: Option<String>,
    pub query: String,
    pub search_type: SearchType,
    pub result_count: usize,
    pub latency_ms: u64,
    pub semantic_triggered: bool,
    pub judge_reason: Option<String>,
    pub clicked_note_id: Option<i64>,
}

/// User relevance signal on a (search event, note) pair.
/// Unique per (event, note, user).
#[derive(Debug, Clone)]
pub struct SearchFeedback {
    pub event_id: i64,
    pub note_id: i64,
    pub user_name: String,
    pub relevant: bool,
}

/// Star rating on a generated answer
#[derive(Debug, Clone, Deserialize)]
pub struct AiFeedback {
    pub feature: FeatureType,
    pub rating: u8,
    pub comment: Option<String>,
    pub model: Option<String>,
    pub request_summary: Option<String>,
}

impl AiFeedback {
    pub fn validate(&self) -> Result<()> {
        if !(1..=5).contains(&self.rating) {
            bail!("rating must be between 1 and 5");
        }
        Ok(())
    }
}

/// Stored OAuth credential for a (user, provider) pair. Tokens at rest are
/// encrypted when a symmetric key is configured.
#[derive(Debug, Clone, FromRow)]
pub struct OAuthTokenRecord {
    pub user_name: String,
    pub provider: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub pkce_verifier: Option<String>,
    pub state_token: Option<String>,
    pub scope: Option<String>,
    pub email: Option<String>,
}

/// Search query validated at the HTTP boundary: non-empty after trimming
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedSearchQuery(String);

impl ValidatedSearchQuery {
    pub fn new(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            bail!("search query must not be empty");
        }
        if trimmed.len() > 1024 {
            bail!("search query exceeds 1024 bytes");
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Result limit validated to 1..=100
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatedLimit(usize);

impl ValidatedLimit {
    pub const MAX: usize = 100;

    pub fn new(limit: usize) -> Result<Self> {
        if limit == 0 || limit > Self::MAX {
            bail!("limit must be between 1 and {}", Self::MAX);
        }
        Ok(Self(limit))
    }

    pub fn get(&self) -> usize {
        self.0
    }
}

impl Default for ValidatedLimit {
    fn default() -> Self {
        Self(20)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validated_query_rejects_empty_and_whitespace() {
        assert!(ValidatedSearchQuery::new("").is_err());
        assert!(ValidatedSearchQuery::new("   ").is_err());
        assert_eq!(
            ValidatedSearchQuery::new("  pcr  ").unwrap().as_str(),
            "pcr"
        );
    }

    #[test]
    fn validated_limit_bounds() {
        assert!(ValidatedLimit::new(0).is_err());
        assert!(ValidatedLimit::new(101).is_err());
        assert_eq!(ValidatedLimit::new(100).unwrap().get(), 100);
        assert_eq!(ValidatedLimit::default().get(), 20);
    }

    #[test]
    fn ai_feedback_rating_bounds() {
        let mut feedback = AiFeedback {
            feature: FeatureType::Insight,
            rating: 5,
            comment: None,
            model: None,
            request_summary: None,
        };
        assert!(feedback.validate().is_ok());
        feedback.rating = 0;
        assert!(feedback.validate().is_err());
        feedback.rating = 6;
        assert!(feedback.validate().is_err());
    }

    #[test]
    fn search_type_serde_round_trip() {
        let parsed: SearchType = serde_json::from_str("\"hybrid\"").unwrap();
        assert_eq!(parsed, SearchType::Hybrid);
        assert_eq!(serde_json::to_string(&SearchType::Fts).unwrap(), "\"fts\"");
    }

    #[test]
    fn feature_type_uses_snake_case() {
        let parsed: FeatureType = serde_json::from_str("\"search_qa\"").unwrap();
        assert_eq!(parsed, FeatureType::SearchQa);
        assert_eq!(parsed.as_str(), "search_qa");
    }
}
