//! Question answering endpoint.

use axum::{
    Json,
    extract::{Query, State},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::db::DocumentChunk;
use crate::error::ServiceError;

use super::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatParams {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub message: String,
    pub docs: Vec<SourceDoc>,
}

/// A retrieved chunk as the web client expects it
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceDoc {
    pub page_content: String,
    pub metadata: SourceMetadata,
}

#[derive(Debug, Serialize)]
pub struct SourceMetadata {
    pub loc: SourceLocation,
    pub source: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceLocation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
}

impl From<DocumentChunk> for SourceDoc {
    fn from(chunk: DocumentChunk) -> Self {
        Self {
            page_content: chunk.text,
            metadata: SourceMetadata {
                loc: SourceLocation {
                    page_number: chunk.page_number,
                },
                source: chunk.source_file,
            },
        }
    }
}

/// GET /chat?message=... - answer from the indexed PDFs
pub async fn chat_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ChatParams>,
) -> Result<Json<ChatResponse>, ServiceError> {
    let answer = state.service.ask(&params.message).await?;

    Ok(Json(ChatResponse {
        message: answer.content,
        docs: answer.sources.into_iter().map(SourceDoc::from).collect(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::router;
    use crate::api::test_helpers::{get, send};
    use crate::db::Database;
    use crate::index::SqliteVectorIndex;
    use crate::queue::{JobQueue, SqliteJobQueue, UploadJob};
    use crate::service::PdfRagService;
    use crate::test_support::{FakeLoader, HashEmbedder, RecordingModel, runtime_config};
    use axum::http::StatusCode;

    #[test]
    fn test_source_doc_shape() {
        let doc = SourceDoc::from(DocumentChunk {
            text: "Hold the reset button".to_string(),
            source_file: "manual.pdf".to_string(),
            page_number: Some(2),
        });
        let value = serde_json::to_value(doc).unwrap();
        assert_eq!(value["pageContent"], "Hold the reset button");
        assert_eq!(value["metadata"]["loc"]["pageNumber"], 2);
        assert_eq!(value["metadata"]["source"], "manual.pdf");

        let unknown = SourceDoc::from(DocumentChunk {
            text: "x".to_string(),
            source_file: "a.pdf".to_string(),
            page_number: None,
        });
        let value = serde_json::to_value(unknown).unwrap();
        assert!(value["metadata"]["loc"].get("pageNumber").is_none());
    }

    #[tokio::test]
    async fn test_chat_answers_from_ingested_pdf() {
        let config = runtime_config(|_| {}, |_| {});
        let db = Arc::new(Database::open_in_memory().unwrap());
        let queue = Arc::new(SqliteJobQueue::new(db.clone(), config.clone()));
        let loader = FakeLoader::new().with_document(
            "uploads/1-manual.pdf",
            &["Safety first", "Press reset for five seconds", "Warranty"],
        );
        let service = Arc::new(PdfRagService::from_parts(
            db.clone(),
            config,
            queue.clone(),
            Arc::new(loader),
            Arc::new(HashEmbedder::new()),
            Arc::new(SqliteVectorIndex::new(db)),
            Arc::new(RecordingModel::answering("Press reset for five seconds.")),
        ));
        queue
            .enqueue(&UploadJob {
                original_filename: "manual.pdf".to_string(),
                storage_path: "uploads/1-manual.pdf".to_string(),
                destination_dir: "uploads/".to_string(),
            })
            .await
            .unwrap();
        service.workers.process_next().await.unwrap();

        let app = router(service, None);
        let (status, body) = send(&app, get("/chat?message=how%20do%20I%20reset")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Press reset for five seconds.");
        let docs = body["docs"].as_array().unwrap();
        assert_eq!(docs.len(), 2);
        assert!(docs.iter().all(|d| d["metadata"]["source"] == "manual.pdf"));
    }

    #[tokio::test]
    async fn test_empty_message_is_bad_request() {
        let config = runtime_config(|_| {}, |_| {});
        let db = Arc::new(Database::open_in_memory().unwrap());
        let service = Arc::new(PdfRagService::from_parts(
            db.clone(),
            config.clone(),
            Arc::new(SqliteJobQueue::new(db.clone(), config)),
            Arc::new(FakeLoader::new()),
            Arc::new(HashEmbedder::new()),
            Arc::new(SqliteVectorIndex::new(db)),
            Arc::new(RecordingModel::answering("unused")),
        ));

        let (status, body) = send(&router(service, None), get("/chat")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "invalid_request");
    }
}
