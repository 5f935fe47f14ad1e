//! Capability traits for the external services the pipeline depends on.
//!
//! The worker pool and query service only see these traits, so the Ollama
//! client and SQLite index can be swapped for in-memory fakes in tests.

use async_trait::async_trait;

use crate::db::{IndexEntry, ScoredEntry};
use crate::error::{CompletionError, EmbeddingError, IndexError};

/// Turns text into a fixed-dimension vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Vector length, once known.
    fn dimension(&self) -> Option<usize> {
        None
    }
}

/// Persists and searches embeddings with their chunk metadata.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Write a batch. Entries whose id already exists are replaced.
    async fn add_entries(&self, entries: Vec<IndexEntry>) -> Result<(), IndexError>;

    /// Top `k` entries by similarity, best first, ties in insertion order.
    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredEntry>, IndexError>;

    async fn count_for_job(&self, job_id: &str) -> Result<usize, IndexError>;
}

/// Chat-style text completion.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(
        &self,
        system_prompt: &str,
        user_message: &str,
    ) -> Result<String, CompletionError>;
}
