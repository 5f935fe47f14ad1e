use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;

use crate::db::{Database, IndexEntry, ScoredEntry, SearchOutcome, UpsertOutcome};
use crate::error::IndexError;
use crate::providers::VectorIndex;

/// Vector index backed by the service database.
///
/// SQLite work runs on the blocking pool so async workers are never parked on
/// the connection mutex.
pub struct SqliteVectorIndex {
    db: Arc<Database>,
}

impl SqliteVectorIndex {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn add_entries(&self, entries: Vec<IndexEntry>) -> Result<(), IndexError> {
        let db = Arc::clone(&self.db);
        let outcome = tokio::task::spawn_blocking(move || db.upsert_entries(&entries))
            .await
            .map_err(|e| IndexError::Join {
                message: e.to_string(),
            })??;

        match outcome {
            UpsertOutcome::Written(count) => {
                debug!(entries = count, "Index entries upserted");
                Ok(())
            }
            UpsertOutcome::DimensionMismatch { expected, actual } => {
                Err(IndexError::DimensionMismatch { expected, actual })
            }
        }
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredEntry>, IndexError> {
        let db = Arc::clone(&self.db);
        let query = query.to_vec();
        let outcome = tokio::task::spawn_blocking(move || db.search_entries(&query, k))
            .await
            .map_err(|e| IndexError::Join {
                message: e.to_string(),
            })??;

        match outcome {
            SearchOutcome::Found(results) => Ok(results),
            SearchOutcome::DimensionMismatch { expected, actual } => {
                Err(IndexError::DimensionMismatch { expected, actual })
            }
        }
    }

    async fn count_for_job(&self, job_id: &str) -> Result<usize, IndexError> {
        let db = Arc::clone(&self.db);
        let job_id = job_id.to_string();
        let count = tokio::task::spawn_blocking(move || db.count_entries_for_job(&job_id))
            .await
            .map_err(|e| IndexError::Join {
                message: e.to_string(),
            })??;
        Ok(count)
    }
}

/// Deterministic entry identity: the same stored file and chunk position always
/// map to the same id, so a redelivered job overwrites rather than duplicates.
pub fn entry_id(storage_path: &str, chunk_index: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(storage_path.as_bytes());
    hasher.update(b"\0");
    hasher.update(chunk_index.to_le_bytes());
    format!("{:x}", hasher.finalize())
}
