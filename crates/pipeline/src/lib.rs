//! Book-building pipeline on top of the task engine.
//!
//! A book request fans out into one page job per resolvable source image,
//! joined by a merge job that concatenates the rendered pages in request
//! order and reclaims every consumed file. The orchestrator hands its own
//! task identity to the merge job so a single id tracks the whole request.

pub mod config;
pub mod deps;
pub mod merge;
pub mod orchestrator;
pub mod page;
pub mod payload;
pub mod recognize;
pub mod service;

use folio_queue::TaskRegistry;

pub use config::PipelineConfig;
pub use deps::PipelineDeps;
pub use service::{BookPage, BookService, ServiceError};

/// Registry names of the pipeline tasks.
pub mod task_names {
    pub const RENDER_PAGE: &str = "ocr.render_page";
    pub const RECOGNIZE_TEXT: &str = "ocr.recognize_text";
    pub const MERGE_BOOK: &str = "ocr.merge_book";
    pub const BUILD_BOOK: &str = "ocr.build_book";
}

/// Registry holding every pipeline task, wired to `deps`.
pub fn task_registry(deps: &PipelineDeps) -> TaskRegistry {
    let mut registry = TaskRegistry::new();
    registry
        .register(page::RenderPageJob::new(deps.clone()))
        .register(recognize::RecognizeTextJob::new(deps.clone()))
        .register(merge::MergeBookJob::new(deps.clone()))
        .register(orchestrator::BuildBookJob::new(deps.clone()));
    registry
}
