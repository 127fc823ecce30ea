//! Argument and result payloads exchanged through the task engine.

use folio_core::types::{PageFailure, SourceImageId};
use folio_queue::TaskId;
use serde::{Deserialize, Serialize};

/// Input of a page job and of a recognition job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageJobArgs {
    pub source_image_id: SourceImageId,
    pub language: String,
}

/// A page as the merge job knows it: enough to reclaim the source and to
/// describe a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRef {
    pub source_image_id: SourceImageId,
    #[serde(default)]
    pub original_name: Option<String>,
}

/// Input of the merge job. Page job results arrive separately as chord
/// header results, aligned with `pages`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeJobArgs {
    /// Tracking id of the whole request; names the merged book.
    pub request_id: String,
    pub pages: Vec<PageRef>,
}

/// Detail stored when every page job failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NothingMerged {
    pub message: String,
    pub failed_pages: Vec<PageFailure>,
}

/// Shape of a scheduled book request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobGraph {
    pub request_id: String,
    pub page_job_ids: Vec<TaskId>,
    pub join_job_id: TaskId,
}

/// Why a recognition job produced no text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecognitionFailureKind {
    FileNotFound,
    UnreadableImage,
    Oversized,
    EngineError,
}

/// Result of a recognition job, reported under its own task id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RecognitionOutcome {
    Success {
        source_image_id: SourceImageId,
        text: String,
        language: String,
    },
    Failure {
        source_image_id: SourceImageId,
        kind: RecognitionFailureKind,
        error: String,
    },
}

/// A recognition job accepted for one source image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmittedRecognition {
    pub source_image_id: SourceImageId,
    pub task_id: TaskId,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn recognition_failure_shape() {
        let outcome = RecognitionOutcome::Failure {
            source_image_id: SourceImageId::parse("a.png").unwrap(),
            kind: RecognitionFailureKind::Oversized,
            error: "Image too large (20000x20000).".into(),
        };
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({
                "status": "failure",
                "source_image_id": "a.png",
                "kind": "oversized",
                "error": "Image too large (20000x20000)."
            })
        );
    }
}
