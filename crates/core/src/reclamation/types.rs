//! Report types for reclamation passes.

use serde::Serialize;

/// Outcome of one best-effort reclamation pass.
///
/// A pass never stops at the first error: every target is attempted and
/// failures are collected in `errors`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub files_deleted: u32,
    /// Targets that were already gone (deleted by an earlier pass).
    pub files_missing: u32,
    pub bytes_reclaimed: u64,
    pub errors: Vec<String>,
}

impl CleanupReport {
    /// Fold another pass into this one.
    pub fn merge(&mut self, other: CleanupReport) {
        self.files_deleted += other.files_deleted;
        self.files_missing += other.files_missing;
        self.bytes_reclaimed += other.bytes_reclaimed;
        self.errors.extend(other.errors);
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Human-readable byte formatting.
pub fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    let b = bytes as f64;
    if b >= GB {
        format!("{:.2} GB", b / GB)
    } else if b >= MB {
        format!("{:.2} MB", b / MB)
    } else if b >= KB {
        format!("{:.2} KB", b / KB)
    } else {
        format!("{bytes} B")
    }
}
