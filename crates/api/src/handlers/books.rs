//! Book requests and merged book downloads.

use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::Response;
use axum::Json;
use folio_core::storage::StorageError;
use folio_core::types::SourceImageId;
use folio_pipeline::{BookPage, ServiceError};
use folio_queue::TaskId;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

const BOOK_GONE: &str = "Generated PDF file not found or already cleaned up.";

#[derive(Debug, Deserialize)]
pub struct BookPagePayload {
    pub source_image_id: SourceImageId,
    #[serde(default)]
    pub original_name: Option<String>,
    #[serde(default, alias = "lang")]
    pub language: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitBookPayload {
    pub pages: Vec<BookPagePayload>,
}

#[derive(Debug, Serialize)]
pub struct BookSubmitted {
    pub task_id: TaskId,
    pub message: &'static str,
}

/// POST /api/v1/books
///
/// Returns the one task id that tracks the request to its merged book.
pub async fn submit_book(
    State(state): State<AppState>,
    Json(payload): Json<SubmitBookPayload>,
) -> AppResult<(StatusCode, Json<DataResponse<BookSubmitted>>)> {
    let pages = payload
        .pages
        .into_iter()
        .map(|p| BookPage {
            source_image_id: p.source_image_id,
            original_name: p.original_name,
            language: p.language,
        })
        .collect();

    let task_id = state.service.submit_book(pages).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: BookSubmitted {
                task_id,
                message: "PDF generation task submitted.",
            },
        }),
    ))
}

/// GET /api/v1/books/{artifact_id}/download
///
/// Streams the merged book. Once the last chunk has been sent the file is
/// reclaimed, so a second download is a 404.
pub async fn download_book(
    State(state): State<AppState>,
    Path(artifact_id): Path<String>,
) -> AppResult<Response> {
    let (id, file) = state
        .service
        .open_book(&artifact_id)
        .await
        .map_err(|e| match e {
            ServiceError::Storage(StorageError::NotFound { .. }) => {
                AppError::NotFound(BOOK_GONE.to_string())
            }
            other => other.into(),
        })?;

    let size = file
        .metadata()
        .await
        .map_err(|e| AppError::InternalError(e.to_string()))?
        .len();

    let service = state.service.clone();
    let reclaim_id = id.clone();
    let reclaim = futures::stream::once(async move {
        let report = service.reclaim_book(&reclaim_id).await;
        tracing::info!(
            artifact_id = %reclaim_id,
            deleted = report.files_deleted,
            "Merged book delivered and reclaimed",
        );
    })
    .filter_map(|()| futures::future::ready(None::<Result<Bytes, std::io::Error>>));
    let stream = ReaderStream::new(file).chain(reclaim);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/pdf")
        .header(header::CONTENT_LENGTH, size.to_string())
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{id}\""),
        )
        .body(Body::from_stream(stream))
        .map_err(|e| AppError::InternalError(e.to_string()))
}
