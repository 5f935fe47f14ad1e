//! Settings API endpoints for the hot-reloadable configuration.

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::api::AppState;
use crate::config::DynamicConfig;
use crate::error::ServiceError;

/// Response for GET /api/settings
#[derive(Debug, Serialize)]
pub struct SettingsResponse {
    /// Effective values: defaults, then file/env, then stored overrides
    pub settings: HashMap<String, serde_json::Value>,
    /// Keys with a stored override
    pub overridden: Vec<String>,
}

/// Request body for PUT /api/settings
#[derive(Debug, Deserialize)]
pub struct UpdateSettingsRequest {
    /// Null reverts a key to its default
    pub settings: HashMap<String, serde_json::Value>,
}

/// GET /api/settings
pub async fn get_settings_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SettingsResponse>, ServiceError> {
    let db_settings = state.service.db.get_all_settings()?;

    let mut overridden: Vec<String> = db_settings.keys().cloned().collect();
    overridden.sort();

    Ok(Json(SettingsResponse {
        settings: state.service.runtime_config.dynamic().to_key_value_map(),
        overridden,
    }))
}

/// PUT /api/settings - persist overrides and hot-reload
pub async fn update_settings_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<UpdateSettingsRequest>,
) -> Result<Json<SettingsResponse>, ServiceError> {
    let valid_keys = DynamicConfig::valid_keys();
    if let Some(key) = request
        .settings
        .keys()
        .find(|key| !valid_keys.contains(key.as_str()))
    {
        return Err(ServiceError::InvalidRequest {
            message: format!("Unknown setting key: {}", key),
        });
    }

    state.service.update_settings(request.settings).await?;

    get_settings_handler(State(state)).await
}

#[cfg(test)]
mod tests {
    use crate::api::router;
    use crate::api::test_helpers::{get, send};
    use crate::db::Database;
    use crate::index::SqliteVectorIndex;
    use crate::queue::SqliteJobQueue;
    use crate::service::PdfRagService;
    use crate::test_support::{FakeLoader, HashEmbedder, RecordingModel, runtime_config};
    use axum::Router;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use std::sync::Arc;

    fn app() -> Router {
        let config = runtime_config(|_| {}, |_| {});
        let db = Arc::new(Database::open_in_memory().unwrap());
        let service = PdfRagService::from_parts(
            db.clone(),
            config.clone(),
            Arc::new(SqliteJobQueue::new(db.clone(), config)),
            Arc::new(FakeLoader::new()),
            Arc::new(HashEmbedder::new()),
            Arc::new(SqliteVectorIndex::new(db)),
            Arc::new(RecordingModel::answering("unused")),
        );
        router(Arc::new(service), None)
    }

    fn put(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("PUT")
            .uri("/api/settings")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_update_then_read_back() {
        let app = app();

        let (status, body) = send(
            &app,
            put(serde_json::json!({ "settings": { "query.top_k": 4 } })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["settings"]["query.top_k"], 4);
        assert_eq!(body["overridden"], serde_json::json!(["query.top_k"]));

        let (_, body) = send(&app, get("/api/settings")).await;
        assert_eq!(body["settings"]["query.top_k"], 4);
    }

    #[tokio::test]
    async fn test_unknown_key_is_rejected() {
        let (status, body) = send(
            &app(),
            put(serde_json::json!({ "settings": { "workers.concurrency": 5 } })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "invalid_request");
    }
}
