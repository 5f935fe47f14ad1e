//! PDF upload endpoint.

use axum::{
    Json,
    extract::{Multipart, State, multipart::MultipartError},
    http::StatusCode,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::error::ServiceError;

use super::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub message: &'static str,
    pub job_id: String,
}

/// POST /upload/pdf - store the `pdf` field and queue it for ingestion
pub async fn upload_pdf_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ServiceError> {
    let mut file: Option<(Vec<u8>, String)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(&state, e))?
    {
        if field.name() != Some("pdf") {
            continue;
        }

        let filename = field.file_name().unwrap_or("document.pdf").to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| multipart_error(&state, e))?;
        file = Some((data.to_vec(), filename));
    }

    let Some((data, filename)) = file else {
        return Err(ServiceError::InvalidRequest {
            message: "multipart field 'pdf' is required".to_string(),
        });
    };

    let receipt = state.service.upload_pdf(&data, &filename).await?;
    debug!(job_id = %receipt.job_id, path = %receipt.stored_path.display(), "Upload accepted");

    Ok(Json(UploadResponse {
        message: "PDF uploaded successfully!",
        job_id: receipt.job_id,
    }))
}

fn multipart_error(state: &AppState, error: MultipartError) -> ServiceError {
    if error.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ServiceError::PayloadTooLarge {
            limit_bytes: state.max_upload_bytes,
        }
    } else {
        ServiceError::InvalidRequest {
            message: error.body_text(),
        }
    }
}
