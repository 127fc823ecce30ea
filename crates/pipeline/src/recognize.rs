//! Recognition job: plain-text OCR of one source image.
//!
//! Each job reports to its own task id. Typed failures are returned as a
//! [`RecognitionOutcome::Failure`] payload rather than failing the task;
//! engine errors are retried first.

use async_trait::async_trait;
use folio_core::inspection::{inspect_image, InspectionError};
use folio_core::storage::StorageError;
use folio_core::types::SourceImageId;
use folio_queue::{Task, TaskContext, TaskError, TaskInput, TaskOutcome};

use crate::deps::PipelineDeps;
use crate::payload::{PageJobArgs, RecognitionFailureKind, RecognitionOutcome};
use crate::task_names::RECOGNIZE_TEXT;

pub struct RecognizeTextJob {
    deps: PipelineDeps,
}

fn failure(
    source_image_id: SourceImageId,
    kind: RecognitionFailureKind,
    error: impl ToString,
) -> RecognitionOutcome {
    RecognitionOutcome::Failure {
        source_image_id,
        kind,
        error: error.to_string(),
    }
}

impl RecognizeTextJob {
    pub fn new(deps: PipelineDeps) -> Self {
        Self { deps }
    }

    async fn recognize(
        &self,
        ctx: &TaskContext,
        args: PageJobArgs,
    ) -> Result<RecognitionOutcome, TaskError> {
        let PageJobArgs {
            source_image_id: id,
            language,
        } = args;
        let store = &self.deps.store;

        let path = match store.source_path(&id) {
            Ok(path) => path,
            Err(e) => return Ok(failure(id, RecognitionFailureKind::FileNotFound, e)),
        };

        if let Err(e) = inspect_image(path, self.deps.config.max_image_pixels).await {
            let kind = match e {
                InspectionError::NotFound(_) => RecognitionFailureKind::FileNotFound,
                InspectionError::TooLarge { .. } => RecognitionFailureKind::Oversized,
                _ => RecognitionFailureKind::UnreadableImage,
            };
            tracing::warn!(source_image_id = %id, error = %e, "Image rejected before recognition");
            return Ok(failure(id, kind, e));
        }

        let image = match store.read_source(&id).await {
            Ok(bytes) => bytes,
            Err(e @ StorageError::NotFound { .. }) => {
                return Ok(failure(id, RecognitionFailureKind::FileNotFound, e))
            }
            Err(e) => return Err(TaskError::Retryable(e.to_string())),
        };

        let recognized = tokio::select! {
            text = self.deps.recognizer.recognize_text(image, &language) => text,
            _ = ctx.soft_deadline() => return Err(TaskError::SoftTimeLimitExceeded),
        };

        match recognized {
            Ok(text) => {
                tracing::info!(source_image_id = %id, chars = text.len(), "Text recognized");
                Ok(RecognitionOutcome::Success {
                    source_image_id: id,
                    text,
                    language,
                })
            }
            Err(e) if !ctx.is_last_attempt() => Err(TaskError::Retryable(e.to_string())),
            Err(e) => Ok(failure(
                id,
                RecognitionFailureKind::EngineError,
                format!("An unexpected error occurred during OCR: {e}"),
            )),
        }
    }
}

#[async_trait]
impl Task for RecognizeTextJob {
    fn name(&self) -> &'static str {
        RECOGNIZE_TEXT
    }

    async fn run(&self, ctx: TaskContext, input: TaskInput) -> Result<TaskOutcome, TaskError> {
        let args: PageJobArgs = input.parse_args()?;
        let outcome = self.recognize(&ctx, args).await?;
        let value = serde_json::to_value(&outcome)
            .map_err(|e| TaskError::permanent("internal", e.to_string()))?;
        Ok(TaskOutcome::Return(value))
    }
}
