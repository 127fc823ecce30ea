//! Source image uploads.

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use folio_core::types::SourceImageId;
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct UploadedFile {
    pub original_filename: String,
    pub source_image_id: SourceImageId,
}

#[derive(Debug, Serialize)]
pub struct UploadResult {
    pub uploaded_files: Vec<UploadedFile>,
}

/// POST /api/v1/uploads
///
/// Stores every `image/*` part under a fresh identifier. Other parts are
/// skipped.
pub async fn upload_images(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<DataResponse<UploadResult>>)> {
    let mut uploaded_files = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let is_image = field
            .content_type()
            .is_some_and(|ct| ct.starts_with("image/"));
        if !is_image {
            tracing::debug!(field = ?field.name(), "Skipping non-image upload part");
            continue;
        }

        let original_filename = field.file_name().unwrap_or("upload").to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?;

        let source_image_id = state.service.save_upload(&original_filename, &bytes).await?;
        uploaded_files.push(UploadedFile {
            original_filename,
            source_image_id,
        });
    }

    tracing::info!(count = uploaded_files.len(), "Images uploaded");
    Ok((
        StatusCode::CREATED,
        Json(DataResponse {
            data: UploadResult { uploaded_files },
        }),
    ))
}
