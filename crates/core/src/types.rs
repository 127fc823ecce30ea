//! Identifiers and value types that travel inside task payloads.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Longest identifier accepted as a file name component.
const MAX_ID_LEN: usize = 128;

/// Reject identifiers that could escape their storage directory.
fn validate_file_id(entity: &'static str, value: &str) -> Result<(), CoreError> {
    if value.is_empty() || value.len() > MAX_ID_LEN {
        return Err(CoreError::Validation(format!(
            "{entity} id must be between 1 and {MAX_ID_LEN} characters"
        )));
    }
    if value.contains('/') || value.contains('\\') || value.contains("..") || value.starts_with('.')
    {
        return Err(CoreError::Validation(format!("Invalid {entity} id: '{value}'")));
    }
    Ok(())
}

macro_rules! define_file_id {
    ($(#[$meta:meta])* $name:ident, $entity:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw identifier after checking it is a safe file name.
            pub fn parse(value: impl Into<String>) -> Result<Self, CoreError> {
                let value = value.into();
                validate_file_id($entity, &value)?;
                Ok(Self(value))
            }

            /// Re-run the file-name check on a deserialized value.
            pub fn validate(&self) -> Result<(), CoreError> {
                validate_file_id($entity, &self.0)
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

define_file_id!(
    /// Opaque name of an uploaded source image inside the upload directory.
    SourceImageId,
    "source image"
);

define_file_id!(
    /// Opaque name of a generated PDF (intermediate page or merged book).
    ArtifactId,
    "artifact"
);

/// Lifetime class of a generated artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// A single searchable page; deleted once merged or once the merge fails.
    IntermediatePage,
    /// The final book; kept until downloaded.
    MergedBook,
}

/// One page of a book request. Never mutated once submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePage {
    pub source_image_id: SourceImageId,
    #[serde(default)]
    pub original_name: Option<String>,
    pub language: String,
}

/// Ordered pages of a book. Order defines the page order of the merged PDF.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookRequest {
    pub pages: Vec<SourcePage>,
}

/// Why a single page did not make it into the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PageFailureKind {
    SourceMissing,
    ImageCorrupt,
    ImageTooLarge,
    RenderFailed,
    /// The page job crashed, timed out or was revoked before reporting.
    NotCompleted,
}

impl PageFailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PageFailureKind::SourceMissing => "source-missing",
            PageFailureKind::ImageCorrupt => "image-corrupt",
            PageFailureKind::ImageTooLarge => "image-too-large",
            PageFailureKind::RenderFailed => "render-failed",
            PageFailureKind::NotCompleted => "not-completed",
        }
    }
}

/// Outcome of a page job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PageOutcome {
    Success { artifact_id: ArtifactId },
    Failure { kind: PageFailureKind, reason: String },
}

/// Result slot written exactly once by the page job that computed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageJobResult {
    pub source_image_id: SourceImageId,
    #[serde(flatten)]
    pub outcome: PageOutcome,
}

impl PageJobResult {
    pub fn success(source_image_id: SourceImageId, artifact_id: ArtifactId) -> Self {
        Self {
            source_image_id,
            outcome: PageOutcome::Success { artifact_id },
        }
    }

    pub fn failure(
        source_image_id: SourceImageId,
        kind: PageFailureKind,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            source_image_id,
            outcome: PageOutcome::Failure {
                kind,
                reason: reason.into(),
            },
        }
    }

    /// The intermediate artifact, if the page rendered.
    pub fn artifact_id(&self) -> Option<&ArtifactId> {
        match &self.outcome {
            PageOutcome::Success { artifact_id } => Some(artifact_id),
            PageOutcome::Failure { .. } => None,
        }
    }
}

/// A page left out of the merged book, reported alongside the result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageFailure {
    /// Zero-based position in the original request.
    pub position: usize,
    pub source_image_id: SourceImageId,
    pub original_name: Option<String>,
    pub kind: PageFailureKind,
    pub reason: String,
}

/// Successful result of the merge step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookResult {
    pub merged_artifact_id: ArtifactId,
    pub page_count: usize,
    pub failed_pages: Vec<PageFailure>,
    pub message: String,
}
