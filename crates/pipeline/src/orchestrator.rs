//! Orchestrator: turns a book request into a page-job chord and hands its
//! own task identity over to the merge job.

use async_trait::async_trait;
use folio_core::reclamation;
use folio_core::storage::ObjectStore;
use folio_core::types::{BookRequest, SourceImageId};
use folio_queue::{Signature, Task, TaskContext, TaskError, TaskInput, TaskOutcome, Workflow};

use crate::config::PipelineConfig;
use crate::deps::PipelineDeps;
use crate::payload::{JobGraph, MergeJobArgs, PageJobArgs, PageRef};
use crate::task_names::{BUILD_BOOK, MERGE_BOOK, RENDER_PAGE};

pub const NOTHING_TO_PROCESS: &str = "No valid image files found to process.";

/// Build the chord for `request`. Pages whose source file is missing are
/// skipped; no page at all is an error.
pub async fn build_job_graph(
    store: &ObjectStore,
    config: &PipelineConfig,
    request_id: &str,
    request: BookRequest,
) -> Result<(JobGraph, Workflow), TaskError> {
    let mut header = Vec::with_capacity(request.pages.len());
    let mut pages = Vec::with_capacity(request.pages.len());

    for page in request.pages {
        if !store.source_exists(&page.source_image_id).await {
            tracing::debug!(
                request_id,
                source_image_id = %page.source_image_id,
                "Skipping page without a backing file",
            );
            continue;
        }

        let args = PageJobArgs {
            source_image_id: page.source_image_id.clone(),
            language: config.language_or_default(Some(&page.language)),
        };
        header.push(
            Signature::with_args(RENDER_PAGE, &args)
                .map_err(|e| TaskError::permanent("internal", e.to_string()))?,
        );
        pages.push(PageRef {
            source_image_id: page.source_image_id,
            original_name: page.original_name,
        });
    }

    if header.is_empty() {
        return Err(TaskError::permanent("nothing_to_process", NOTHING_TO_PROCESS));
    }

    let merge_args = MergeJobArgs {
        request_id: request_id.to_string(),
        pages,
    };
    let body = Signature::with_args(MERGE_BOOK, &merge_args)
        .map_err(|e| TaskError::permanent("internal", e.to_string()))?;

    let graph = JobGraph {
        request_id: request_id.to_string(),
        page_job_ids: header.iter().map(|sig| sig.id).collect(),
        join_job_id: body.id,
    };
    Ok((graph, Workflow::Chord { header, body }))
}

pub struct BuildBookJob {
    deps: PipelineDeps,
}

impl BuildBookJob {
    pub fn new(deps: PipelineDeps) -> Self {
        Self { deps }
    }

    /// Reclaim the uploads of a request that ended before its merge job
    /// took them over.
    async fn reclaim_sources(&self, input: &TaskInput) -> u32 {
        let Ok(request) = input.parse_args::<BookRequest>() else {
            tracing::error!("Book request has unreadable arguments; nothing reclaimed");
            return 0;
        };
        let sources: Vec<SourceImageId> = request
            .pages
            .into_iter()
            .map(|page| page.source_image_id)
            .collect();
        let report = reclamation::reclaim(&self.deps.store, reclamation::sources(&sources)).await;
        if !report.is_clean() {
            tracing::warn!(errors = ?report.errors, "Reclamation finished with errors");
        }
        report.files_deleted
    }
}

#[async_trait]
impl Task for BuildBookJob {
    fn name(&self) -> &'static str {
        BUILD_BOOK
    }

    async fn run(&self, ctx: TaskContext, input: TaskInput) -> Result<TaskOutcome, TaskError> {
        let request: BookRequest = input.parse_args()?;
        let requested = request.pages.len();
        let request_id = ctx.task_id.to_string();

        let (graph, workflow) =
            build_job_graph(&self.deps.store, &self.deps.config, &request_id, request).await?;

        tracing::info!(
            request_id = %graph.request_id,
            requested,
            scheduled = graph.page_job_ids.len(),
            join_job_id = %graph.join_job_id,
            "Job graph built; replacing orchestrator",
        );
        Ok(TaskOutcome::Replace(workflow))
    }

    async fn on_revoked(&self, ctx: TaskContext, input: TaskInput) {
        let reclaimed = self.reclaim_sources(&input).await;
        tracing::info!(request_id = %ctx.task_id, reclaimed, "Book request revoked before hand-off");
    }

    async fn on_failure(&self, ctx: TaskContext, input: TaskInput, error: &TaskError) {
        let reclaimed = self.reclaim_sources(&input).await;
        tracing::info!(
            request_id = %ctx.task_id,
            kind = error.kind(),
            reclaimed,
            "Book request failed before hand-off",
        );
    }
}
