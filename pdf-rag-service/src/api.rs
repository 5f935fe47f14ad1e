//! HTTP API for the PDF RAG service.
//!
//! - `POST /upload/pdf` and `GET /chat` for the upload-then-ask flow
//! - `/api/jobs` for inspecting and requeueing ingestion jobs
//! - `/api/settings` for hot-reloadable tunables
//! - `/health` and `/metrics` for monitoring

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{get, post, put},
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::ServiceError;
use crate::service::{HealthReport, PdfRagService};

pub mod chat;
pub mod jobs;
pub mod settings;
pub mod upload;

use chat::chat_handler;
use jobs::{get_job_handler, list_jobs_handler, requeue_job_handler};
use settings::{get_settings_handler, update_settings_handler};
use upload::upload_pdf_handler;

/// Application state
pub struct AppState {
    pub service: Arc<PdfRagService>,
    pub metrics: Option<PrometheusHandle>,
    pub max_upload_bytes: u64,
}

/// Build the API router
pub fn router(service: Arc<PdfRagService>, metrics: Option<PrometheusHandle>) -> Router {
    let max_upload_bytes = service.runtime_config.static_config.server.max_upload_size_bytes;

    let state = Arc::new(AppState {
        service,
        metrics,
        max_upload_bytes,
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/jobs", get(list_jobs_handler))
        .route("/jobs/{id}", get(get_job_handler))
        .route("/jobs/{id}/requeue", post(requeue_job_handler))
        .route("/settings", get(get_settings_handler))
        .route("/settings", put(update_settings_handler));

    Router::new()
        .route("/", get(root_handler))
        .route(
            "/upload/pdf",
            post(upload_pdf_handler).layer(DefaultBodyLimit::max(max_upload_bytes as usize)),
        )
        .route("/chat", get(chat_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .nest("/api", api_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct MessageResponse {
    message: &'static str,
}

async fn root_handler() -> Json<MessageResponse> {
    Json(MessageResponse {
        message: "Hello from the server!",
    })
}

// === Health & Metrics ===

async fn health_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<HealthReport>, ServiceError> {
    Ok(Json(state.service.health().await?))
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let body = state
        .metrics
        .as_ref()
        .map(|handle| handle.render())
        .unwrap_or_default();

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}

#[cfg(test)]
pub(crate) mod test_helpers {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    pub fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }
}
