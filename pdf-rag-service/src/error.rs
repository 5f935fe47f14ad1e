use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Main service error type
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Job not found: {job_id}")]
    JobNotFound { job_id: String },

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Failed to load document")]
    Load(#[from] LoadError),

    #[error("Embedding failed")]
    Embedding(#[from] EmbeddingError),

    #[error("Vector index operation failed")]
    Index(#[from] IndexError),

    #[error("Completion failed")]
    Completion(#[from] CompletionError),

    #[error("Database error")]
    Database(#[from] DatabaseError),

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Upload exceeds the {limit_bytes} byte limit")]
    PayloadTooLarge { limit_bytes: u64 },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Job queue errors
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Job queue unavailable")]
    Unavailable(#[source] DatabaseError),

    #[error("Lease {lease_id} on job {job_id} is no longer held")]
    LeaseLost { job_id: String, lease_id: String },

    #[error("Job not found: {job_id}")]
    NotFound { job_id: String },
}

/// Document loading errors. Problems with the source file are never retried;
/// a missing extractor is a deployment problem and is.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("PDF extractor unavailable: {message}")]
    ExtractorUnavailable { message: String },

    #[error("Source file not found: {path}")]
    NotFound { path: String },

    #[error("Failed to read {path}: {message}")]
    Unreadable { path: String, message: String },

    #[error("No text could be extracted from {path}")]
    NoText { path: String },
}

/// Embedding provider errors
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Connection failed to embedding provider at {url}")]
    Connection {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Embedding request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Embedding provider returned an error (status {status}): {message}")]
    Provider { status: u16, message: String },

    #[error("Invalid embedding response: {message}")]
    InvalidResponse { message: String },
}

/// Vector index errors
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Index storage failed")]
    Database(#[from] DatabaseError),

    #[error("Index operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Vector dimension {actual} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Index worker failed: {message}")]
    Join { message: String },
}

/// Language model errors
#[derive(Error, Debug)]
pub enum CompletionError {
    #[error("Connection failed to language model at {url}")]
    Connection {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Completion request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Model not found: {model}")]
    ModelNotFound { model: String },

    #[error("Completion failed (status {status}): {message}")]
    Provider { status: u16, message: String },

    #[error("Invalid completion response: {message}")]
    InvalidResponse { message: String },
}

/// Why a single ingestion job failed, and whether redelivery could fix it
#[derive(Error, Debug)]
pub enum JobError {
    #[error("Malformed job payload: {message}")]
    Malformed { message: String },

    #[error("Failed to load document")]
    Load(#[from] LoadError),

    #[error("Embedding failed")]
    Embedding(#[from] EmbeddingError),

    #[error("Indexing failed")]
    Index(#[from] IndexError),
}

impl JobError {
    /// Malformed payloads and unreadable sources fail the same way every time.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            JobError::Embedding(_)
                | JobError::Index(_)
                | JobError::Load(LoadError::ExtractorUnavailable { .. })
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            JobError::Malformed { .. } => "malformed",
            JobError::Load(_) => "load",
            JobError::Embedding(_) => "embedding",
            JobError::Index(_) => "index",
        }
    }
}

/// Database errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection failed")]
    Connection(#[source] rusqlite::Error),

    #[error("Query failed")]
    Query(#[source] rusqlite::Error),

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("Serialization failed")]
    Serialization(#[source] serde_json::Error),

    #[error("Database lock poisoned")]
    Poisoned,
}

/// API error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::JobNotFound { .. } | ServiceError::Queue(QueueError::NotFound { .. }) => {
                StatusCode::NOT_FOUND
            }
            ServiceError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            ServiceError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ServiceError::Queue(QueueError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Queue(QueueError::LeaseLost { .. }) => StatusCode::CONFLICT,
            ServiceError::Load(LoadError::ExtractorUnavailable { .. }) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ServiceError::Load(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::Embedding(EmbeddingError::Timeout { .. })
            | ServiceError::Index(IndexError::Timeout { .. })
            | ServiceError::Completion(CompletionError::Timeout { .. }) => {
                StatusCode::GATEWAY_TIMEOUT
            }
            ServiceError::Embedding(_) | ServiceError::Completion(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            ServiceError::JobNotFound { .. } => "job_not_found",
            ServiceError::Queue(QueueError::Unavailable(_)) => "queue_unavailable",
            ServiceError::Queue(QueueError::LeaseLost { .. }) => "lease_lost",
            ServiceError::Queue(QueueError::NotFound { .. }) => "job_not_found",
            ServiceError::Load(LoadError::ExtractorUnavailable { .. }) => "extractor_unavailable",
            ServiceError::Load(_) => "load_error",
            ServiceError::Embedding(EmbeddingError::Timeout { .. }) => "embedding_timeout",
            ServiceError::Embedding(_) => "embedding_error",
            ServiceError::Index(IndexError::Timeout { .. }) => "index_timeout",
            ServiceError::Index(_) => "index_error",
            ServiceError::Completion(CompletionError::Timeout { .. }) => "completion_timeout",
            ServiceError::Completion(CompletionError::ModelNotFound { .. }) => {
                "completion_model_not_found"
            }
            ServiceError::Completion(_) => "completion_error",
            ServiceError::Database(_) => "database_error",
            ServiceError::InvalidRequest { .. } => "invalid_request",
            ServiceError::PayloadTooLarge { .. } => "payload_too_large",
            ServiceError::Config { .. } => "config_error",
            ServiceError::Internal { .. } => "internal_error",
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code().to_string();

        if status.is_server_error() {
            tracing::error!(code = %code, error = %format_error_chain(&self), "Request failed");
        }

        let response = ErrorResponse {
            message: format_error_chain(&self),
            code: Some(code),
        };

        (status, Json(response)).into_response()
    }
}

/// Result type alias for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Render an error and its `source()` chain as `outer: inner: root`.
pub fn format_error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let cause_message = cause.to_string();
        // transparent wrappers repeat their inner message
        if !message.ends_with(&cause_message) {
            message.push_str(": ");
            message.push_str(&cause_message);
        }
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_chain_includes_sources() {
        let error = ServiceError::Load(LoadError::NotFound {
            path: "uploads/missing.pdf".to_string(),
        });
        assert_eq!(
            format_error_chain(&error),
            "Failed to load document: Source file not found: uploads/missing.pdf"
        );
    }

    #[test]
    fn test_only_provider_failures_are_retryable() {
        assert!(JobError::Embedding(EmbeddingError::Timeout { timeout_ms: 5 }).is_retryable());
        assert!(JobError::Index(IndexError::Timeout { timeout_ms: 5 }).is_retryable());
        assert!(
            !JobError::Load(LoadError::NoText {
                path: "scan.pdf".to_string()
            })
            .is_retryable()
        );
        assert!(
            !JobError::Malformed {
                message: "missing path".to_string()
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_missing_extractor_is_retryable() {
        let error = JobError::Load(LoadError::ExtractorUnavailable {
            message: "libpdfium.so not found".to_string(),
        });
        assert!(error.is_retryable());
        assert_eq!(error.kind(), "load");
        assert!(
            !JobError::Load(LoadError::Unreadable {
                path: "broken.pdf".to_string(),
                message: "bad xref".to_string(),
            })
            .is_retryable()
        );
    }

    #[test]
    fn test_queue_unavailable_maps_to_503() {
        let error = ServiceError::Queue(QueueError::Unavailable(DatabaseError::Poisoned));
        assert_eq!(error.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(error.error_code(), "queue_unavailable");
    }

    #[test]
    fn test_provider_timeouts_map_to_504() {
        let error = ServiceError::Completion(CompletionError::Timeout { timeout_ms: 10 });
        assert_eq!(error.status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(error.error_code(), "completion_timeout");
    }
}
