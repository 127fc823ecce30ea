//! Page job: one source image in, one searchable single-page PDF out.
//!
//! Input problems (missing file, corrupt or oversized image) never fail
//! the task; they come back as a [`PageJobResult`] failure so sibling pages
//! and the merge barrier are unaffected. Render engine errors are retried
//! and only reported as a page failure on the last attempt.

use async_trait::async_trait;
use folio_core::inspection::inspect_image;
use folio_core::ocr::validate_language;
use folio_core::storage::StorageError;
use folio_core::types::{PageFailureKind, PageJobResult};
use folio_queue::{Task, TaskContext, TaskError, TaskInput, TaskOutcome};

use crate::deps::PipelineDeps;
use crate::payload::PageJobArgs;
use crate::task_names::RENDER_PAGE;

pub struct RenderPageJob {
    deps: PipelineDeps,
}

impl RenderPageJob {
    pub fn new(deps: PipelineDeps) -> Self {
        Self { deps }
    }

    async fn render(&self, ctx: &TaskContext, args: PageJobArgs) -> Result<PageJobResult, TaskError> {
        let PageJobArgs {
            source_image_id: id,
            language,
        } = args;
        let store = &self.deps.store;

        if let Err(e) = validate_language(&language) {
            return Ok(PageJobResult::failure(id, PageFailureKind::RenderFailed, e.to_string()));
        }

        let path = match store.source_path(&id) {
            Ok(path) => path,
            Err(e) => {
                return Ok(PageJobResult::failure(id, PageFailureKind::SourceMissing, e.to_string()))
            }
        };

        if let Err(e) = inspect_image(path, self.deps.config.max_image_pixels).await {
            tracing::warn!(source_image_id = %id, error = %e, "Page rejected before rendering");
            return Ok(PageJobResult::failure(id, e.page_failure_kind(), e.to_string()));
        }

        let image = match store.read_source(&id).await {
            Ok(bytes) => bytes,
            Err(e @ StorageError::NotFound { .. }) => {
                return Ok(PageJobResult::failure(id, PageFailureKind::SourceMissing, e.to_string()))
            }
            Err(e) => return Err(TaskError::Retryable(e.to_string())),
        };

        let rendered = tokio::select! {
            rendered = self.deps.renderer.render_searchable_page(image, &language) => rendered,
            _ = ctx.soft_deadline() => return Err(TaskError::SoftTimeLimitExceeded),
        };

        let pdf = match rendered {
            Ok(pdf) => pdf,
            Err(e) if !ctx.is_last_attempt() => return Err(TaskError::Retryable(e.to_string())),
            Err(e) => {
                tracing::error!(source_image_id = %id, error = %e, "Rendering failed on last attempt");
                return Ok(PageJobResult::failure(id, PageFailureKind::RenderFailed, e.to_string()));
            }
        };

        let artifact_id = store
            .write_page(&pdf)
            .await
            .map_err(|e| TaskError::Retryable(e.to_string()))?;

        tracing::info!(source_image_id = %id, artifact_id = %artifact_id, "Searchable page created");
        Ok(PageJobResult::success(id, artifact_id))
    }
}

#[async_trait]
impl Task for RenderPageJob {
    fn name(&self) -> &'static str {
        RENDER_PAGE
    }

    async fn run(&self, ctx: TaskContext, input: TaskInput) -> Result<TaskOutcome, TaskError> {
        let args: PageJobArgs = input.parse_args()?;
        let result = self.render(&ctx, args).await?;
        let value =
            serde_json::to_value(&result).map_err(|e| TaskError::permanent("internal", e.to_string()))?;
        Ok(TaskOutcome::Return(value))
    }
}
