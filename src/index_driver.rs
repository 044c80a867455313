// Embedding Index Driver - background batch re-indexing with progress state
//
// Process-wide singleton: only one run proceeds at a time, guarded by the
// indexing flag. Notes with zero embeddings are processed in batches of
// five with a 500 ms pause between batches; a cancel flag stops further
// batches but never interrupts one mid-flight.

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::database::Database;
use crate::embedding::EmbeddingService;
use crate::errors::ApiError;
use crate::indexer::NoteIndexer;

const BATCH_SIZE: usize = 5;
const INTER_BATCH_PAUSE: Duration = Duration::from_millis(500);

/// Lifecycle of a background indexing run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexStatus {
    Idle,
    Indexing,
    Completed,
    Error,
}

/// Progress snapshot of the current (or last) run
#[derive(Debug, Clone, Serialize)]
pub struct IndexProgress {
    pub status: IndexStatus,
    pub total: usize,
    pub indexed: usize,
    pub failed: usize,
    pub error_message: Option<String>,
}

impl Default for IndexProgress {
    fn default() -> Self {
        Self {
            status: IndexStatus::Idle,
            total: 0,
            indexed: 0,
            failed: 0,
            error_message: None,
        }
    }
}

/// Singleton driver for background embedding indexing
pub struct EmbeddingIndexDriver {
    db: Database,
    embeddings: Arc<EmbeddingService>,
    state: RwLock<IndexProgress>,
    is_indexing: AtomicBool,
    cancel: AtomicBool,
}

impl EmbeddingIndexDriver {
    pub fn new(db: Database, embeddings: Arc<EmbeddingService>) -> Arc<Self> {
        Arc::new(Self {
            db,
            embeddings,
            state: RwLock::new(IndexProgress::default()),
            is_indexing: AtomicBool::new(false),
            cancel: AtomicBool::new(false),
        })
    }

    /// Current progress snapshot
    pub fn progress(&self) -> IndexProgress {
        self.state.read().clone()
    }

    pub fn is_running(&self) -> bool {
        self.is_indexing.load(Ordering::SeqCst)
    }

    /// Request that the run stops after the current batch
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Start a background run. Refuses when one is already in progress.
    pub fn start(self: Arc<Self>) -> Result<(), ApiError> {
        if self
            .is_indexing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ApiError::ConflictBusy("indexing".to_string()));
        }

        self.cancel.store(false, Ordering::SeqCst);
        tokio::spawn(async move {
            self.run().await;
        });
        Ok(())
    }

    async fn run(&self) {
        {
            let mut state = self.state.write();
            *state = IndexProgress {
                status: IndexStatus::Indexing,
                ..IndexProgress::default()
            };
        }

        match self.run_inner().await {
            Ok(()) => {
                let mut state = self.state.write();
                state.status = IndexStatus::Completed;
                info!(
                    "background indexing finished: {} indexed, {} failed",
                    state.indexed, state.failed
                );
            }
            Err(err) => {
                let mut state = self.state.write();
                state.status = IndexStatus::Error;
                state.error_message = Some(err.to_string());
                error!("background indexing failed: {err:#}");
            }
        }

        self.is_indexing.store(false, Ordering::SeqCst);
    }

    async fn run_inner(&self) -> anyhow::Result<()> {
        let note_ids = self.db.notes_without_embeddings().await?;
        {
            let mut state = self.state.write();
            state.total = note_ids.len();
        }

        if note_ids.is_empty() {
            return Ok(());
        }

        let indexer = NoteIndexer::new(self.db.clone(), Arc::clone(&self.embeddings));

        for batch in note_ids.chunks(BATCH_SIZE) {
            if self.cancel.load(Ordering::SeqCst) {
                info!("background indexing cancelled after current batch");
                break;
            }

            // Per-note failures are counted inside the batch outcome and do
            // not abort the run
            let outcome = indexer.index_notes(batch).await;
            {
                let mut state = self.state.write();
                state.indexed += outcome.indexed + outcome.skipped;
                state.failed += outcome.failed;
            }

            let progress = self.progress();
            info!(
                "index progress: {}/{} processed, {} failed",
                progress.indexed, progress.total, progress.failed
            );

            tokio::time::sleep(INTER_BATCH_PAUSE).await;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_progress_is_idle() {
        let progress = IndexProgress::default();
        assert_eq!(progress.status, IndexStatus::Idle);
        assert_eq!(progress.total, 0);
        assert!(progress.error_message.is_none());
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&IndexStatus::Indexing).unwrap(),
            "\"indexing\""
        );
        assert_eq!(
            serde_json::to_string(&IndexStatus::Completed).unwrap(),
            "\"completed\""
        );
    }
}
