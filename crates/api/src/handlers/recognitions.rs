//! Plain-text OCR submissions.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use folio_core::types::SourceImageId;
use folio_pipeline::payload::SubmittedRecognition;
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RecognitionPage {
    pub source_image_id: SourceImageId,
    #[serde(default)]
    pub original_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitRecognitionsPayload {
    pub pages: Vec<RecognitionPage>,
    #[serde(default, alias = "lang")]
    pub language: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RecognitionsSubmitted {
    pub message: String,
    pub submitted_tasks: Vec<SubmittedRecognition>,
}

/// POST /api/v1/recognitions
///
/// One job per page; pages whose file is gone are skipped.
pub async fn submit_recognitions(
    State(state): State<AppState>,
    Json(payload): Json<SubmitRecognitionsPayload>,
) -> AppResult<(StatusCode, Json<DataResponse<RecognitionsSubmitted>>)> {
    let pages = payload.pages.into_iter().map(|p| p.source_image_id).collect();
    let submitted_tasks = state
        .service
        .submit_recognitions(pages, payload.language.as_deref())
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: RecognitionsSubmitted {
                message: format!("Submitted {} OCR tasks.", submitted_tasks.len()),
                submitted_tasks,
            },
        }),
    ))
}
