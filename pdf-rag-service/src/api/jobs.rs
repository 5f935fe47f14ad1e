//! Job inspection and dead-letter requeue endpoints.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use std::sync::Arc;

use crate::db::{JobRecord, JobStatus};
use crate::error::ServiceError;
use crate::service::JobDetail;

use super::AppState;

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

#[derive(Debug, Deserialize)]
pub struct ListJobsParams {
    pub status: Option<String>,
    pub limit: Option<usize>,
}

/// GET /api/jobs - newest jobs first, optionally filtered by status
pub async fn list_jobs_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListJobsParams>,
) -> Result<Json<Vec<JobRecord>>, ServiceError> {
    let status = match params.status.as_deref() {
        None | Some("") => None,
        Some(s) => Some(JobStatus::parse(s).ok_or_else(|| ServiceError::InvalidRequest {
            message: format!("Unknown job status: {}", s),
        })?),
    };
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    Ok(Json(state.service.list_jobs(status, limit).await?))
}

/// GET /api/jobs/{id}
pub async fn get_job_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobDetail>, ServiceError> {
    Ok(Json(state.service.job_detail(&id).await?))
}

/// POST /api/jobs/{id}/requeue - give a dead job another round of attempts
pub async fn requeue_job_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobRecord>, ServiceError> {
    Ok(Json(state.service.requeue_job(&id).await?))
}
