//! Best-effort reclamation of source images and generated artifacts.
//!
//! Callers hand over the exact identifiers they own; nothing here scans
//! directories. A failure on one file is logged, recorded in the
//! [`CleanupReport`] and the pass moves on to the next file.

pub mod types;

use crate::storage::ObjectStore;
use crate::types::{ArtifactId, ArtifactKind, SourceImageId};

pub use types::{format_bytes, CleanupReport};

/// A single file to reclaim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReclaimTarget {
    Source(SourceImageId),
    Artifact(ArtifactKind, ArtifactId),
}

impl ReclaimTarget {
    fn label(&self) -> String {
        match self {
            ReclaimTarget::Source(id) => format!("source image {id}"),
            ReclaimTarget::Artifact(ArtifactKind::IntermediatePage, id) => {
                format!("intermediate page {id}")
            }
            ReclaimTarget::Artifact(ArtifactKind::MergedBook, id) => format!("merged book {id}"),
        }
    }
}

/// Delete every target, continuing past individual failures.
pub async fn reclaim<I>(store: &ObjectStore, targets: I) -> CleanupReport
where
    I: IntoIterator<Item = ReclaimTarget>,
{
    let mut report = CleanupReport::default();

    for target in targets {
        let outcome = match &target {
            ReclaimTarget::Source(id) => store.delete_source(id).await,
            ReclaimTarget::Artifact(kind, id) => store.delete_artifact(*kind, id).await,
        };

        match outcome {
            Ok(Some(bytes)) => {
                report.files_deleted += 1;
                report.bytes_reclaimed += bytes;
                tracing::debug!(target = %target.label(), bytes, "Reclaimed file");
            }
            Ok(None) => {
                report.files_missing += 1;
                tracing::debug!(target = %target.label(), "Nothing to reclaim, already gone");
            }
            Err(e) => {
                tracing::warn!(target = %target.label(), error = %e, "Failed to reclaim file");
                report.errors.push(format!("{}: {e}", target.label()));
            }
        }
    }

    tracing::info!(
        files_deleted = report.files_deleted,
        files_missing = report.files_missing,
        reclaimed = %format_bytes(report.bytes_reclaimed),
        errors = report.errors.len(),
        "Reclamation pass finished",
    );
    report
}

/// Targets for a list of source images.
pub fn sources(ids: &[SourceImageId]) -> Vec<ReclaimTarget> {
    ids.iter().cloned().map(ReclaimTarget::Source).collect()
}

/// Targets for a list of intermediate page artifacts.
pub fn intermediate_pages(ids: &[ArtifactId]) -> Vec<ReclaimTarget> {
    ids.iter()
        .cloned()
        .map(|id| ReclaimTarget::Artifact(ArtifactKind::IntermediatePage, id))
        .collect()
}
