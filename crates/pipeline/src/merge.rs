//! Merge job: the barrier at the end of a book request.
//!
//! Receives every page job result in request order. Successful pages are
//! concatenated into the merged book; every consumed source image and
//! intermediate page is reclaimed whichever way the merge goes, including a
//! kill at the hard time limit or a crash on the last attempt.

use async_trait::async_trait;
use folio_core::pdf::ConcatError;
use folio_core::reclamation::{self, ReclaimTarget};
use folio_core::storage::{book_artifact_id, StorageError};
use folio_core::types::{
    ArtifactId, ArtifactKind, BookResult, PageFailure, PageFailureKind, PageJobResult,
    PageOutcome, SourceImageId,
};
use folio_queue::{Task, TaskContext, TaskError, TaskInput, TaskOutcome};
use serde_json::Value;

use crate::deps::PipelineDeps;
use crate::payload::{MergeJobArgs, NothingMerged, PageRef};
use crate::task_names::MERGE_BOOK;

const ALL_PAGES_FAILED: &str = "All sub-tasks for PDF page generation failed.";

#[derive(Debug, thiserror::Error)]
enum MergeError {
    #[error(transparent)]
    Concat(#[from] ConcatError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Soft time limit reached while merging")]
    SoftDeadline,
}

impl MergeError {
    /// Failures worth another attempt before anything is reclaimed.
    fn is_transient(&self) -> bool {
        matches!(
            self,
            MergeError::Concat(ConcatError::Unavailable(_))
                | MergeError::Storage(StorageError::Io { .. })
        )
    }
}

/// Page job results split by outcome, in request order.
#[derive(Debug, Default, PartialEq)]
struct Partition {
    artifacts: Vec<ArtifactId>,
    failed_pages: Vec<PageFailure>,
}

/// Align header results with the requested pages. A missing or unreadable
/// result means the page job never reported (crashed, timed out, revoked).
fn partition(pages: &[PageRef], header_results: &[Value]) -> Partition {
    let mut split = Partition::default();

    for (position, page) in pages.iter().enumerate() {
        let result = header_results
            .get(position)
            .filter(|v| !v.is_null())
            .and_then(|v| serde_json::from_value::<PageJobResult>(v.clone()).ok());

        let (kind, reason) = match result.map(|r| r.outcome) {
            Some(PageOutcome::Success { artifact_id }) => {
                split.artifacts.push(artifact_id);
                continue;
            }
            Some(PageOutcome::Failure { kind, reason }) => (kind, reason),
            None => (
                PageFailureKind::NotCompleted,
                "Page job did not complete".to_string(),
            ),
        };
        split.failed_pages.push(PageFailure {
            position,
            source_image_id: page.source_image_id.clone(),
            original_name: page.original_name.clone(),
            kind,
            reason,
        });
    }
    split
}

pub struct MergeBookJob {
    deps: PipelineDeps,
}

impl MergeBookJob {
    pub fn new(deps: PipelineDeps) -> Self {
        Self { deps }
    }

    async fn merge(
        &self,
        ctx: &TaskContext,
        request_id: &str,
        artifacts: &[ArtifactId],
    ) -> Result<(ArtifactId, usize), MergeError> {
        let store = &self.deps.store;

        let mut pages = Vec::with_capacity(artifacts.len());
        for id in artifacts {
            match store.read_artifact(ArtifactKind::IntermediatePage, id).await {
                Ok(bytes) => pages.push(bytes),
                Err(e) => {
                    tracing::warn!(artifact_id = %id, error = %e, "Skipping unreadable page artifact")
                }
            }
        }
        if pages.is_empty() {
            return Err(ConcatError::NoPages.into());
        }

        let merged = tokio::select! {
            merged = self.deps.concatenator.concatenate_pdf_pages(pages) => merged?,
            _ = ctx.soft_deadline() => return Err(MergeError::SoftDeadline),
        };
        if merged.page_count == 0 {
            return Err(ConcatError::NoPages.into());
        }

        let book_id = store.write_book(request_id, &merged.bytes).await?;
        Ok((book_id, merged.page_count))
    }

    async fn reclaim_inputs(&self, sources: &[SourceImageId], artifacts: &[ArtifactId]) {
        let mut targets = reclamation::sources(sources);
        targets.extend(reclamation::intermediate_pages(artifacts));
        let report = reclamation::reclaim(&self.deps.store, targets).await;
        if !report.is_clean() {
            tracing::warn!(errors = ?report.errors, "Reclamation finished with errors");
        }
    }

    /// Reclaim the sources, every page a header job produced and any
    /// (partial) merged book. Used when the request ends without a book.
    async fn reclaim_everything(&self, input: &TaskInput) -> Option<String> {
        let Ok(args) = input.parse_args::<MergeJobArgs>() else {
            tracing::error!("Merge job has unreadable arguments; nothing reclaimed");
            return None;
        };
        let sources: Vec<SourceImageId> =
            args.pages.iter().map(|p| p.source_image_id.clone()).collect();
        let produced = partition(&args.pages, &input.header_results).artifacts;

        self.reclaim_inputs(&sources, &produced).await;
        if let Ok(book_id) = book_artifact_id(&args.request_id) {
            reclamation::reclaim(
                &self.deps.store,
                [ReclaimTarget::Artifact(ArtifactKind::MergedBook, book_id)],
            )
            .await;
        }
        Some(args.request_id)
    }
}

#[async_trait]
impl Task for MergeBookJob {
    fn name(&self) -> &'static str {
        MERGE_BOOK
    }

    async fn run(&self, ctx: TaskContext, input: TaskInput) -> Result<TaskOutcome, TaskError> {
        let args: MergeJobArgs = input.parse_args()?;
        let sources: Vec<SourceImageId> =
            args.pages.iter().map(|p| p.source_image_id.clone()).collect();
        let Partition {
            artifacts,
            failed_pages,
        } = partition(&args.pages, &input.header_results);

        tracing::info!(
            request_id = %args.request_id,
            pages = args.pages.len(),
            rendered = artifacts.len(),
            "Merging book",
        );

        if artifacts.is_empty() {
            self.reclaim_inputs(&sources, &[]).await;
            tracing::info!(request_id = %args.request_id, "Every page job failed; nothing to merge");
            let detail = NothingMerged {
                message: ALL_PAGES_FAILED.to_string(),
                failed_pages,
            };
            let detail = serde_json::to_value(detail)
                .map_err(|e| TaskError::permanent("internal", e.to_string()))?;
            return Ok(TaskOutcome::Ignore(detail));
        }

        match self.merge(&ctx, &args.request_id, &artifacts).await {
            Ok((merged_artifact_id, page_count)) => {
                self.reclaim_inputs(&sources, &artifacts).await;
                tracing::info!(
                    request_id = %args.request_id,
                    artifact_id = %merged_artifact_id,
                    page_count,
                    "Merged book created",
                );
                let result = BookResult {
                    merged_artifact_id,
                    page_count,
                    failed_pages,
                    message: format!("Merged PDF with {page_count} pages generated successfully."),
                };
                let value = serde_json::to_value(result)
                    .map_err(|e| TaskError::permanent("internal", e.to_string()))?;
                Ok(TaskOutcome::Return(value))
            }
            Err(MergeError::SoftDeadline) => {
                tracing::warn!(request_id = %args.request_id, "Merge stopped at the soft time limit");
                Err(TaskError::SoftTimeLimitExceeded)
            }
            Err(e) if e.is_transient() && !ctx.is_last_attempt() => {
                tracing::warn!(request_id = %args.request_id, error = %e, "Merge failed; will retry");
                Err(TaskError::Retryable(e.to_string()))
            }
            // Inputs are reclaimed by `on_failure` once the worker settles.
            Err(e) => {
                tracing::error!(request_id = %args.request_id, error = %e, "Merge failed");
                Err(TaskError::permanent(
                    "merge_failed",
                    format!("Failed to merge final PDF: {e}"),
                ))
            }
        }
    }

    async fn on_revoked(&self, _ctx: TaskContext, input: TaskInput) {
        if let Some(request_id) = self.reclaim_everything(&input).await {
            tracing::info!(%request_id, "Book request revoked; inputs reclaimed");
        }
    }

    async fn on_failure(&self, _ctx: TaskContext, input: TaskInput, error: &TaskError) {
        if let Some(request_id) = self.reclaim_everything(&input).await {
            tracing::info!(%request_id, kind = error.kind(), "Book request failed; inputs reclaimed");
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn page(name: &str) -> PageRef {
        PageRef {
            source_image_id: SourceImageId::parse(name).unwrap(),
            original_name: Some(name.to_uppercase()),
        }
    }

    #[test]
    fn partition_keeps_request_order() {
        let pages = [page("a.png"), page("b.png"), page("c.png"), page("d.png")];
        let results = [
            json!({"source_image_id": "a.png", "outcome": "success", "artifact_id": "pa.pdf"}),
            json!({"source_image_id": "b.png", "outcome": "failure", "kind": "image-corrupt", "reason": "bad"}),
            Value::Null,
            json!({"source_image_id": "d.png", "outcome": "success", "artifact_id": "pd.pdf"}),
        ];

        let split = partition(&pages, &results);
        assert_eq!(
            split.artifacts,
            vec![
                ArtifactId::parse("pa.pdf").unwrap(),
                ArtifactId::parse("pd.pdf").unwrap()
            ]
        );
        assert_eq!(split.failed_pages.len(), 2);
        assert_eq!(split.failed_pages[0].position, 1);
        assert_eq!(split.failed_pages[0].kind, PageFailureKind::ImageCorrupt);
        assert_eq!(split.failed_pages[0].original_name.as_deref(), Some("B.PNG"));
        assert_eq!(split.failed_pages[1].position, 2);
        assert_eq!(split.failed_pages[1].kind, PageFailureKind::NotCompleted);
    }

    #[test]
    fn short_result_list_counts_as_not_completed() {
        let pages = [page("a.png"), page("b.png")];
        let split = partition(&pages, &[]);
        assert!(split.artifacts.is_empty());
        assert_eq!(split.failed_pages.len(), 2);
    }

    #[test]
    fn transient_errors() {
        let unavailable = MergeError::Concat(ConcatError::Unavailable(std::io::Error::from(
            std::io::ErrorKind::NotFound,
        )));
        assert!(unavailable.is_transient());
        assert!(!MergeError::Concat(ConcatError::NoPages).is_transient());
        assert!(!MergeError::SoftDeadline.is_transient());
    }
}
