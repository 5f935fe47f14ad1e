//! Retrieval-augmented question answering over the vector index.

use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::RuntimeConfig;
use crate::db::DocumentChunk;
use crate::error::{
    CompletionError, EmbeddingError, IndexError, ServiceError, ServiceResult, format_error_chain,
};
use crate::providers::{EmbeddingProvider, LanguageModel, VectorIndex};

const SYSTEM_PROMPT_TEMPLATE: &str = include_str!("../prompts/system.txt");

/// The assistant's reply and the chunks it was grounded on
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub content: String,
    pub sources: Vec<DocumentChunk>,
}

pub struct QueryService {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    llm: Arc<dyn LanguageModel>,
    config: Arc<RuntimeConfig>,
}

impl QueryService {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        llm: Arc<dyn LanguageModel>,
        config: Arc<RuntimeConfig>,
    ) -> Self {
        Self {
            embedder,
            index,
            llm,
            config,
        }
    }

    /// Answer a question from the indexed documents.
    ///
    /// Each step runs once under its own deadline; any failure is returned as is.
    pub async fn answer(&self, question: &str) -> ServiceResult<Answer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(ServiceError::InvalidRequest {
                message: "message must not be empty".to_string(),
            });
        }

        metrics::counter!("pdf_rag_queries_total").increment(1);
        let started = Instant::now();

        let result = self.answer_inner(question).await;

        metrics::histogram!("pdf_rag_query_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        if let Err(e) = &result {
            metrics::counter!("pdf_rag_query_failures_total").increment(1);
            warn!(error = %format_error_chain(e), "Query failed");
        }

        result
    }

    async fn answer_inner(&self, question: &str) -> ServiceResult<Answer> {
        let config = self.config.snapshot();

        let vector = tokio::time::timeout(config.timeouts.embed(), self.embedder.embed(question))
            .await
            .map_err(|_| EmbeddingError::Timeout {
                timeout_ms: config.timeouts.embed_ms,
            })??;

        let top_k = config.query.top_k.max(1);
        let hits = tokio::time::timeout(config.timeouts.index(), self.index.search(&vector, top_k))
            .await
            .map_err(|_| IndexError::Timeout {
                timeout_ms: config.timeouts.index_ms,
            })??;

        debug!(
            hits = hits.len(),
            best_score = hits.first().map(|h| h.score),
            "Retrieved context"
        );

        let sources: Vec<DocumentChunk> = hits.into_iter().map(|hit| hit.entry.chunk).collect();
        let system_prompt = build_system_prompt(&sources);

        let content = tokio::time::timeout(
            config.timeouts.completion(),
            self.llm.complete(&system_prompt, question),
        )
        .await
        .map_err(|_| CompletionError::Timeout {
            timeout_ms: config.timeouts.completion_ms,
        })??;

        info!(sources = sources.len(), "Answered question");
        Ok(Answer { content, sources })
    }
}

/// Render retrieved chunks into the system prompt
fn build_system_prompt(sources: &[DocumentChunk]) -> String {
    let context = if sources.is_empty() {
        "(no matching documents)".to_string()
    } else {
        sources
            .iter()
            .enumerate()
            .map(|(i, chunk)| {
                let page = chunk
                    .page_number
                    .map(|p| format!(", page {}", p))
                    .unwrap_or_default();
                format!(
                    "[{}] {}{}\n{}",
                    i + 1,
                    chunk.source_file,
                    page,
                    chunk.text
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    };

    SYSTEM_PROMPT_TEMPLATE.replace("{context}", &context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, IndexEntry};
    use crate::index::{SqliteVectorIndex, entry_id};
    use crate::test_support::{HashEmbedder, RecordingModel, bag_of_words, runtime_config};
    use std::time::Duration;

    async fn seeded_index(pages: &[&str]) -> Arc<SqliteVectorIndex> {
        let index = Arc::new(SqliteVectorIndex::new(Arc::new(
            Database::open_in_memory().unwrap(),
        )));
        let entries = pages
            .iter()
            .enumerate()
            .map(|(i, text)| IndexEntry {
                id: entry_id("uploads/1-guide.pdf", i as u32),
                job_id: "job-1".to_string(),
                chunk_index: i as u32,
                vector: bag_of_words(text),
                chunk: DocumentChunk {
                    text: text.to_string(),
                    source_file: "guide.pdf".to_string(),
                    page_number: Some(i as u32 + 1),
                },
            })
            .collect();
        index.add_entries(entries).await.unwrap();
        index
    }

    #[tokio::test]
    async fn test_empty_question_never_reaches_providers() {
        let embedder = Arc::new(HashEmbedder::new());
        let llm = Arc::new(RecordingModel::answering("unused"));
        let service = QueryService::new(
            embedder.clone(),
            seeded_index(&["anything"]).await,
            llm.clone(),
            runtime_config(|_| {}, |_| {}),
        );

        let result = service.answer("   ").await;

        assert!(matches!(result, Err(ServiceError::InvalidRequest { .. })));
        assert_eq!(embedder.calls(), 0);
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_sources_capped_at_top_k_and_grounded_in_prompt() {
        let llm = Arc::new(RecordingModel::answering("Reset it by holding the button."));
        let service = QueryService::new(
            Arc::new(HashEmbedder::new()),
            seeded_index(&[
                "how to reset the router hold the reset button",
                "warranty terms and conditions",
                "router lights and what they mean",
                "safety information",
            ])
            .await,
            llm.clone(),
            runtime_config(|_| {}, |_| {}),
        );

        let answer = service.answer("How do I reset the router?").await.unwrap();

        assert_eq!(answer.content, "Reset it by holding the button.");
        assert_eq!(answer.sources.len(), 2);
        assert_eq!(answer.sources[0].page_number, Some(1));
        assert!(
            answer
                .sources
                .iter()
                .all(|s| s.page_number.is_none_or(|p| p >= 1))
        );

        let prompts = llm.prompts.lock().unwrap();
        let (system, user) = &prompts[0];
        assert!(system.contains("guide.pdf, page 1"));
        assert!(system.contains("hold the reset button"));
        assert_eq!(user, "How do I reset the router?");
    }

    #[tokio::test]
    async fn test_top_k_follows_live_settings() {
        let config = runtime_config(|_| {}, |_| {});
        let service = QueryService::new(
            Arc::new(HashEmbedder::new()),
            seeded_index(&["alpha", "beta", "gamma"]).await,
            Arc::new(RecordingModel::answering("ok")),
            config.clone(),
        );

        let mut dynamic = (*config.snapshot()).clone();
        dynamic.query.top_k = 3;
        config.update_dynamic(dynamic);

        assert_eq!(service.answer("alpha").await.unwrap().sources.len(), 3);
    }

    #[tokio::test]
    async fn test_completion_failure_is_surfaced_once() {
        let llm = Arc::new(RecordingModel::failing(500));
        let service = QueryService::new(
            Arc::new(HashEmbedder::new()),
            seeded_index(&["alpha"]).await,
            llm.clone(),
            runtime_config(|_| {}, |_| {}),
        );

        let result = service.answer("alpha?").await;

        assert!(matches!(
            result,
            Err(ServiceError::Completion(CompletionError::Provider {
                status: 500,
                ..
            }))
        ));
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn test_slow_embedding_times_out() {
        let service = QueryService::new(
            Arc::new(HashEmbedder::slow(Duration::from_millis(200))),
            seeded_index(&["alpha"]).await,
            Arc::new(RecordingModel::answering("ok")),
            runtime_config(|_| {}, |d| d.timeouts.embed_ms = 10),
        );

        assert!(matches!(
            service.answer("alpha").await,
            Err(ServiceError::Embedding(EmbeddingError::Timeout {
                timeout_ms: 10
            }))
        ));
    }

    #[test]
    fn test_prompt_with_no_hits() {
        let prompt = build_system_prompt(&[]);
        assert!(prompt.contains("(no matching documents)"));
        assert!(!prompt.contains("{context}"));
    }
}
