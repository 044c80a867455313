// Note Indexer - embedding lifecycle for notes
//
// Assembles the indexable text of a note (body, attachment texts, image OCR,
// vision descriptions), chunks and embeds it, and persists the chunk records.
// Full-text indexing is handled by a database trigger; this module owns only
// the vector side.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::database::Database;
use crate::embedding::EmbeddingService;
use crate::types::{AttachmentText, NoteEmbedding};

// OCR bbox markup: ![](page=0,bbox=[x, y, w, h])
static BBOX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"!\[\]\(page=\d+,bbox=\[[^\]]*\]\)\s*").expect("valid bbox regex"));
static BLANK_LINES_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n{3,}").expect("valid blank-line regex"));

/// Aggregated result of a batch indexing operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexOutcome {
    pub indexed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub total_embeddings: usize,
}

/// Manages vector embedding lifecycle for notes
pub struct NoteIndexer {
    db: Database,
    embeddings: Arc<EmbeddingService>,
}

impl NoteIndexer {
    pub fn new(db: Database, embeddings: Arc<EmbeddingService>) -> Self {
        Self { db, embeddings }
    }

    /// Index a single note: assemble text, chunk, embed, persist.
    ///
    /// Idempotent: existing embeddings are replaced in the same transaction
    /// as the insert, so repeated indexing leaves identical external state.
    /// Returns the number of embedding records created; 0 when the note has
    /// no indexable text.
    pub async fn index_note(&self, note_id: i64) -> Result<usize> {
        let note = self
            .db
            .get_note(note_id)
            .await?
            .with_context(|| format!("note {note_id} not found"))?;

        let attachments = self.db.attachment_texts(note_id).await?;
        let text = assemble_indexable_text(&note.content_text, &note.title, &attachments);

        if text.is_empty() {
            debug!("note {note_id} has no content or title, skipping embedding");
            return Ok(0);
        }

        let chunks = self
            .embeddings
            .embed_chunks(&text)
            .await
            .context("embedding note chunks")?;

        let records: Vec<NoteEmbedding> = chunks
            .into_iter()
            .enumerate()
            .map(|(chunk_index, (chunk_text, embedding))| NoteEmbedding {
                note_id,
                chunk_index: chunk_index as i32,
                chunk_text,
                embedding,
            })
            .collect();

        let created = self.db.replace_embeddings(note_id, &records).await?;
        info!("indexed note {note_id}: {created} embeddings created");
        Ok(created)
    }

    /// Batch index. Already-indexed notes are skipped; per-note failures are
    /// counted and do not abort the batch.
    pub async fn index_notes(&self, note_ids: &[i64]) -> IndexOutcome {
        let mut outcome = IndexOutcome::default();

        for &note_id in note_ids {
            match self.needs_indexing(note_id).await {
                Ok(false) => {
                    outcome.skipped += 1;
                    debug!("note {note_id} already indexed, skipping");
                    continue;
                }
                Ok(true) => {}
                Err(err) => {
                    outcome.failed += 1;
                    warn!("needs_indexing check failed for note {note_id}: {err:#}");
                    continue;
                }
            }

            match self.index_note(note_id).await {
                Ok(created) => {
                    outcome.indexed += 1;
                    outcome.total_embeddings += created;
                }
                Err(err) => {
                    outcome.failed += 1;
                    warn!("failed to index note {note_id}: {err:#}");
                }
            }
        }

        outcome
    }

    /// Delete existing embeddings and re-index. Equivalent to
    /// `delete_embeddings` followed by `index_note` for external state;
    /// useful when a note's content changed and its embeddings are stale.
    pub async fn reindex_note(&self, note_id: i64) -> Result<usize> {
        let deleted = self.db.delete_embeddings(note_id).await?;
        debug!("deleted {deleted} old embeddings for note {note_id}");
        self.index_note(note_id).await
    }

    /// Delete all embedding records for a note. Eagerly flushed.
    pub async fn delete_embeddings(&self, note_id: i64) -> Result<u64> {
        self.db.delete_embeddings(note_id).await
    }

    /// A note needs indexing iff it has zero persisted embeddings
    pub async fn needs_indexing(&self, note_id: i64) -> Result<bool> {
        Ok(self.db.embedding_count(note_id).await? == 0)
    }
}

/// Remove OCR bbox markup and collapse excessive blank lines
fn clean_ocr_text(text: &str) -> String {
    let cleaned = BBOX_RE.replace_all(text, "");
    BLANK_LINES_RE.replace_all(&cleaned, "\n\n").trim().to_string()
}

/// Label an attachment by filename extension
fn attachment_label(filename: &str) -> &'static str {
    let lower = filename.to_lowercase();
    if lower.ends_with(".hwp") || lower.ends_with(".hwpx") {
        "HWP"
    } else if lower.ends_with(".pdf") {
        "PDF"
    } else if lower.ends_with(".docx") || lower.ends_with(".doc") {
        "DOCX"
    } else {
        "FILE"
    }
}

fn is_image(attachment: &AttachmentText) -> bool {
    attachment
        .mime
        .as_deref()
        .map(|m| m.starts_with("image/"))
        .unwrap_or(false)
}

/// Assemble the text fed to the embedding service.
///
/// Ordering is significant: note body (title fallback), then labeled
/// attachment texts, then image OCR (bbox markup stripped), then vision
/// descriptions, joined with `---` separators. Only completed extractions
/// reach this function.
fn assemble_indexable_text(
    content_text: &str,
    title: &str,
    attachments: &[AttachmentText],
) -> String {
    let mut base = content_text.trim().to_string();
    if base.is_empty() {
        base = title.trim().to_string();
    }

    let mut document_parts: Vec<String> = Vec::new();
    let mut ocr_parts: Vec<String> = Vec::new();
    let mut vision_parts: Vec<String> = Vec::new();

    for attachment in attachments {
        if is_image(attachment) {
            if let Some(text) = attachment.extracted_text.as_deref() {
                let cleaned = clean_ocr_text(text);
                if !cleaned.is_empty() {
                    ocr_parts.push(format!("[OCR: {}]\n{cleaned}", attachment.filename));
                }
            }
            if let Some(desc) = attachment.vision_description.as_deref() {
                let trimmed = desc.trim();
                if !trimmed.is_empty() {
                    vision_parts.push(format!("[Vision: {}]\n{trimmed}", attachment.filename));
                }
            }
        } else if let Some(text) = attachment.extracted_text.as_deref() {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                let label = attachment_label(&attachment.filename);
                document_parts.push(format!("[{label}: {}]\n{trimmed}", attachment.filename));
            }
        }
    }

    let mut sections: Vec<String> = Vec::new();
    if !base.is_empty() {
        sections.push(base);
    }
    sections.extend(document_parts);
    sections.extend(ocr_parts);
    sections.extend(vision_parts);

    sections.join("\n\n---\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn attachment(
        filename: &str,
        mime: Option<&str>,
        text: Option<&str>,
        vision: Option<&str>,
    ) -> AttachmentText {
        AttachmentText {
            note_id: 1,
            filename: filename.to_string(),
            mime: mime.map(str::to_string),
            extracted_text: text.map(str::to_string),
            extraction_status: "completed".to_string(),
            vision_description: vision.map(str::to_string),
        }
    }

    #[test]
    fn body_only_note_is_passed_through() {
        let text = assemble_indexable_text("cell division basics", "Biology", &[]);
        assert_eq!(text, "cell division basics");
    }

    #[test]
    fn empty_body_falls_back_to_title() {
        let text = assemble_indexable_text("  ", "Western blot", &[]);
        assert_eq!(text, "Western blot");
    }

    #[test]
    fn empty_body_and_title_yield_empty_text() {
        let text = assemble_indexable_text("", "", &[]);
        assert!(text.is_empty());
    }

    #[test]
    fn attachments_are_labeled_by_extension() {
        assert_eq!(attachment_label("paper.pdf"), "PDF");
        assert_eq!(attachment_label("Report.DOCX"), "DOCX");
        assert_eq!(attachment_label("한글문서.hwp"), "HWP");
        assert_eq!(attachment_label("data.csv"), "FILE");
    }

    #[test]
    fn assembly_order_is_body_documents_ocr_vision() {
        let attachments = vec![
            attachment("scan.png", Some("image/png"), Some("ocr text"), Some("a gel photo")),
            attachment("protocol.pdf", Some("application/pdf"), Some("pdf text"), None),
        ];
        let text = assemble_indexable_text("body", "title", &attachments);
        let body_pos = text.find("body").unwrap();
        let pdf_pos = text.find("[PDF: protocol.pdf]").unwrap();
        let ocr_pos = text.find("[OCR: scan.png]").unwrap();
        let vision_pos = text.find("[Vision: scan.png]").unwrap();
        assert!(body_pos < pdf_pos);
        assert!(pdf_pos < ocr_pos);
        assert!(ocr_pos < vision_pos);
        assert!(text.contains("\n\n---\n\n"));
    }

    #[test]
    fn ocr_bbox_markup_is_stripped() {
        let raw = "heading\n![](page=0,bbox=[10, 20, 30, 40])\nbody text";
        let cleaned = clean_ocr_text(raw);
        assert!(!cleaned.contains("bbox"));
        assert!(cleaned.contains("heading"));
        assert!(cleaned.contains("body text"));
    }

    #[test]
    fn excessive_blank_lines_are_collapsed() {
        let cleaned = clean_ocr_text("a\n\n\n\n\nb");
        assert_eq!(cleaned, "a\n\nb");
    }

    #[test]
    fn whitespace_only_attachment_text_is_dropped() {
        let attachments = vec![attachment("x.pdf", Some("application/pdf"), Some("   "), None)];
        let text = assemble_indexable_text("body", "", &attachments);
        assert_eq!(text, "body");
    }

    #[test]
    fn attachments_alone_are_indexable() {
        let attachments = vec![attachment(
            "only.pdf",
            Some("application/pdf"),
            Some("extracted"),
            None,
        )];
        let text = assemble_indexable_text("", "", &attachments);
        assert_eq!(text, "[PDF: only.pdf]\nextracted");
    }
}
