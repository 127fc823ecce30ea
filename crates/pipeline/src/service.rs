//! Client-facing operations: submit, poll, cancel, retrieve.

use std::sync::Arc;

use folio_core::error::CoreError;
use folio_core::ocr::validate_language;
use folio_core::reclamation::{self, CleanupReport, ReclaimTarget};
use folio_core::storage::{ObjectStore, StorageError};
use folio_core::types::{ArtifactId, ArtifactKind, BookRequest, SourceImageId, SourcePage};
use folio_queue::{EngineError, Signature, StatusReport, TaskEngine, TaskId, Workflow};

use crate::config::PipelineConfig;
use crate::payload::{PageJobArgs, SubmittedRecognition};
use crate::task_names::{BUILD_BOOK, RECOGNIZE_TEXT};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// One page of a book submission as the client sends it.
#[derive(Debug, Clone)]
pub struct BookPage {
    pub source_image_id: SourceImageId,
    pub original_name: Option<String>,
    pub language: Option<String>,
}

/// Entry point for the HTTP layer.
#[derive(Clone)]
pub struct BookService {
    engine: Arc<TaskEngine>,
    store: Arc<ObjectStore>,
    config: PipelineConfig,
}

impl BookService {
    pub fn new(engine: Arc<TaskEngine>, store: Arc<ObjectStore>, config: PipelineConfig) -> Self {
        Self {
            engine,
            store,
            config,
        }
    }

    pub fn engine(&self) -> &Arc<TaskEngine> {
        &self.engine
    }

    pub fn store(&self) -> &Arc<ObjectStore> {
        &self.store
    }

    /// Store an uploaded image and return its identifier.
    pub async fn save_upload(
        &self,
        original_name: &str,
        bytes: &[u8],
    ) -> Result<SourceImageId, ServiceError> {
        Ok(self.store.save_upload(original_name, bytes).await?)
    }

    /// Submit a book request. Returns the single id that tracks it to the
    /// end; the orchestrator resolves source files asynchronously.
    pub async fn submit_book(&self, pages: Vec<BookPage>) -> Result<TaskId, ServiceError> {
        if pages.is_empty() {
            return Err(CoreError::Validation(
                "No files specified for PDF generation.".to_string(),
            )
            .into());
        }

        let mut source_pages = Vec::with_capacity(pages.len());
        for page in pages {
            page.source_image_id.validate()?;
            let language = self.config.language_or_default(page.language.as_deref());
            validate_language(&language)?;
            source_pages.push(SourcePage {
                source_image_id: page.source_image_id,
                original_name: page.original_name,
                language,
            });
        }

        let page_count = source_pages.len();
        let request = BookRequest {
            pages: source_pages,
        };
        let task_id = self
            .engine
            .submit(Workflow::Single(Signature::with_args(BUILD_BOOK, &request)?))
            .await?;

        tracing::info!(task_id = %task_id, pages = page_count, "Book request submitted");
        Ok(task_id)
    }

    /// Submit one recognition job per page whose source file exists.
    pub async fn submit_recognitions(
        &self,
        pages: Vec<SourceImageId>,
        language: Option<&str>,
    ) -> Result<Vec<SubmittedRecognition>, ServiceError> {
        let language = self.config.language_or_default(language);
        validate_language(&language)?;

        let mut submitted = Vec::with_capacity(pages.len());
        for source_image_id in pages {
            if !self.store.source_exists(&source_image_id).await {
                tracing::debug!(source_image_id = %source_image_id, "Skipping missing source image");
                continue;
            }
            let args = PageJobArgs {
                source_image_id: source_image_id.clone(),
                language: language.clone(),
            };
            let task_id = self
                .engine
                .submit(Workflow::Single(Signature::with_args(RECOGNIZE_TEXT, &args)?))
                .await?;
            submitted.push(SubmittedRecognition {
                source_image_id,
                task_id,
            });
        }

        tracing::info!(submitted = submitted.len(), "Recognition jobs submitted");
        Ok(submitted)
    }

    pub async fn status(&self, task_id: TaskId) -> StatusReport {
        self.engine.status_reporter().report(task_id).await
    }

    /// Revoke a tracked request. Returns `false` if it had already finished.
    pub async fn cancel(&self, task_id: TaskId) -> bool {
        self.engine.revoke(task_id).await
    }

    /// Open a merged book for download.
    pub async fn open_book(
        &self,
        artifact_id: &str,
    ) -> Result<(ArtifactId, tokio::fs::File), ServiceError> {
        let id = ArtifactId::parse(artifact_id)?;
        let file = self.store.open_book(&id).await?;
        Ok((id, file))
    }

    /// Delete a merged book once it has been delivered.
    pub async fn reclaim_book(&self, artifact_id: &ArtifactId) -> CleanupReport {
        reclamation::reclaim(
            &self.store,
            [ReclaimTarget::Artifact(
                ArtifactKind::MergedBook,
                artifact_id.clone(),
            )],
        )
        .await
    }
}
