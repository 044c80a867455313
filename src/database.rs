// Database Layer - Postgres pool, schema management, and note/embedding access
//
// The schema is relational with the pgvector extension for embeddings.
// Full-text indexing is maintained by a trigger on the notes table; this
// layer is responsible for the vector side and the plain record access the
// core subsystems need.

use anyhow::{bail, Context, Result};
use pgvector::Vector;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::info;

use crate::types::{AttachmentText, Note, NoteEmbedding};

/// Create a connection pool for the configured database URL
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await
        .context("connecting to Postgres")?;
    Ok(pool)
}

/// Apply the schema. Idempotent; safe to run at every startup.
pub async fn run_migrations(pool: &PgPool, embedding_dimension: usize) -> Result<()> {
    sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
        .execute(pool)
        .await
        .context("enabling pgvector extension")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS notes (
            id              BIGSERIAL PRIMARY KEY,
            external_id     TEXT NOT NULL UNIQUE,
            title           TEXT NOT NULL DEFAULT '',
            content_html    TEXT NOT NULL DEFAULT '',
            content_text    TEXT NOT NULL DEFAULT '',
            notebook_name   TEXT,
            tags            JSONB,
            source_created_at TIMESTAMPTZ,
            source_updated_at TIMESTAMPTZ,
            synced_at       TIMESTAMPTZ NOT NULL DEFAULT now(),
            search_vector   TSVECTOR
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_notes_search_vector ON notes USING gin (search_vector)",
    )
    .execute(pool)
    .await?;

    // Trigram similarity over titles and bodies
    sqlx::query("CREATE EXTENSION IF NOT EXISTS pg_trgm")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_notes_title_trgm ON notes USING gin (title gin_trgm_ops)",
    )
    .execute(pool)
    .await?;

    // search_vector is maintained by trigger: title weighted A, body B
    sqlx::query(
        r#"
        CREATE OR REPLACE FUNCTION notes_update_search_vector()
        RETURNS TRIGGER AS $$
        BEGIN
            NEW.search_vector :=
                setweight(to_tsvector('simple', coalesce(NEW.title, '')), 'A') ||
                setweight(to_tsvector('simple', coalesce(NEW.content_text, '')), 'B');
            RETURN NEW;
        END;
        $$ LANGUAGE plpgsql
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query("DROP TRIGGER IF EXISTS trigger_notes_search_vector ON notes")
        .execute(pool)
        .await?;
    sqlx::query(
        r#"
        CREATE TRIGGER trigger_notes_search_vector
            BEFORE INSERT OR UPDATE ON notes
            FOR EACH ROW
            EXECUTE FUNCTION notes_update_search_vector()
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS note_embeddings (
            id          BIGSERIAL PRIMARY KEY,
            note_id     BIGINT NOT NULL REFERENCES notes(id) ON DELETE CASCADE,
            chunk_index INTEGER NOT NULL DEFAULT 0,
            chunk_text  TEXT NOT NULL,
            embedding   VECTOR({embedding_dimension}) NOT NULL,
            created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#
    ))
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_embeddings_note_id ON note_embeddings (note_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_embeddings_vector ON note_embeddings \
         USING ivfflat (embedding vector_cosine_ops) WITH (lists = 100)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS attachment_texts (
            id                 BIGSERIAL PRIMARY KEY,
            note_id            BIGINT NOT NULL REFERENCES notes(id) ON DELETE CASCADE,
            filename           TEXT NOT NULL,
            mime               TEXT,
            extracted_text     TEXT,
            extraction_status  TEXT NOT NULL DEFAULT 'pending',
            vision_description TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS search_events (
            id                 BIGSERIAL PRIMARY KEY,
            user_name          TEXT,
            query              TEXT NOT NULL,
            search_type        TEXT NOT NULL,
            result_count       INTEGER NOT NULL,
            latency_ms         BIGINT NOT NULL,
            semantic_triggered BOOLEAN NOT NULL DEFAULT false,
            judge_reason       TEXT,
            clicked_note_id    BIGINT,
            created_at         TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS search_feedback (
            id         BIGSERIAL PRIMARY KEY,
            event_id   BIGINT NOT NULL REFERENCES search_events(id) ON DELETE CASCADE,
            note_id    BIGINT NOT NULL,
            user_name  TEXT NOT NULL,
            relevant   BOOLEAN NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            UNIQUE (event_id, note_id, user_name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ai_feedback (
            id              BIGSERIAL PRIMARY KEY,
            feature         TEXT NOT NULL,
            rating          SMALLINT NOT NULL,
            comment         TEXT,
            model           TEXT,
            request_summary TEXT,
            created_at      TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS oauth_tokens (
            id            BIGSERIAL PRIMARY KEY,
            user_name     TEXT NOT NULL,
            provider      TEXT NOT NULL,
            access_token  TEXT NOT NULL DEFAULT '',
            refresh_token TEXT,
            expires_at    TIMESTAMPTZ,
            pkce_verifier TEXT,
            state_token   TEXT,
            scope         TEXT,
            email         TEXT,
            updated_at    TIMESTAMPTZ NOT NULL DEFAULT now(),
            UNIQUE (user_name, provider)
        )
        "#,
    )
    .execute(pool)
    .await?;

    info!("database schema up to date (vector dim {embedding_dimension})");
    Ok(())
}

/// Note and embedding record access shared by the indexer and the engines
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
    embedding_dimension: usize,
}

impl Database {
    pub fn new(pool: PgPool, embedding_dimension: usize) -> Self {
        Self {
            pool,
            embedding_dimension,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn get_note(&self, note_id: i64) -> Result<Option<Note>> {
        let note = sqlx::query_as::<_, Note>(
            "SELECT id, external_id, title, content_html, content_text, notebook_name, \
             tags, source_created_at, source_updated_at, synced_at \
             FROM notes WHERE id = $1",
        )
        .bind(note_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(note)
    }

    pub async fn note_count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM notes")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn indexed_note_count(&self) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(DISTINCT note_id) FROM note_embeddings")
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// Attachment and image texts for a note, completed extractions only
    pub async fn attachment_texts(&self, note_id: i64) -> Result<Vec<AttachmentText>> {
        let rows = sqlx::query_as::<_, AttachmentText>(
            "SELECT note_id, filename, mime, extracted_text, extraction_status, \
             vision_description \
             FROM attachment_texts \
             WHERE note_id = $1 AND extraction_status = $2 \
             ORDER BY id",
        )
        .bind(note_id)
        .bind(crate::types::ExtractionStatus::Completed.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn embedding_count(&self, note_id: i64) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM note_embeddings WHERE note_id = $1")
                .bind(note_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// Delete all embeddings of a note. Always eagerly flushed.
    pub async fn delete_embeddings(&self, note_id: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM note_embeddings WHERE note_id = $1")
            .bind(note_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Replace a note's embeddings atomically (delete-then-insert in one
    /// transaction). Vector lengths are validated against the configured
    /// dimension before anything is written.
    pub async fn replace_embeddings(&self, note_id: i64, records: &[NoteEmbedding]) -> Result<usize> {
        validate_dimension(records, self.embedding_dimension)?;

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM note_embeddings WHERE note_id = $1")
            .bind(note_id)
            .execute(&mut *tx)
            .await?;
        for record in records {
            sqlx::query(
                "INSERT INTO note_embeddings (note_id, chunk_index, chunk_text, embedding) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(record.note_id)
            .bind(record.chunk_index)
            .bind(&record.chunk_text)
            .bind(Vector::from(record.embedding.clone()))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(records.len())
    }

    /// Note handles with zero persisted embeddings (the re-index work list)
    pub async fn notes_without_embeddings(&self) -> Result<Vec<i64>> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT n.id FROM notes n \
             WHERE NOT EXISTS (SELECT 1 FROM note_embeddings ne WHERE ne.note_id = n.id) \
             ORDER BY n.id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

/// Reject vectors whose length does not match the configured dimension.
/// Runs before any row is written so a bad batch never partially lands.
fn validate_dimension(records: &[NoteEmbedding], dimension: usize) -> Result<()> {
    for record in records {
        if record.embedding.len() != dimension {
            bail!(
                "embedding for note {} chunk {} has dimension {} (expected {})",
                record.note_id,
                record.chunk_index,
                record.embedding.len(),
                dimension
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NoteEmbedding;

    fn record(dim: usize) -> NoteEmbedding {
        NoteEmbedding {
            note_id: 1,
            chunk_index: 0,
            chunk_text: "chunk".to_string(),
            embedding: vec![0.0; dim],
        }
    }

    #[test]
    fn matching_dimension_passes() {
        assert!(validate_dimension(&[record(8), record(8)], 8).is_ok());
        assert!(validate_dimension(&[], 8).is_ok());
    }

    #[test]
    fn mismatched_dimension_is_rejected() {
        let err = validate_dimension(&[record(8), record(7)], 8).unwrap_err();
        assert!(err.to_string().contains("dimension 7"));
    }
}
