//! Concatenation of single-page PDFs into one book.
//!
//! [`QpdfCli`] drives the `qpdf` binary: every input is probed with
//! `--show-npages` first so an unreadable page is skipped rather than
//! sinking the whole merge.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::config::env_string_or;

#[derive(Debug, thiserror::Error)]
pub enum ConcatError {
    #[error("PDF tool binary not available: {0}")]
    Unavailable(std::io::Error),

    #[error("PDF tool failed (exit code {exit_code:?}): {stderr}")]
    Failed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Merging resulted in an empty PDF despite valid inputs.")]
    NoPages,

    #[error("I/O error during concatenation: {0}")]
    Io(#[from] std::io::Error),
}

/// A merged document and the number of pages it holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedPdf {
    pub bytes: Vec<u8>,
    pub page_count: usize,
}

/// Concatenates PDF documents in the given order.
#[async_trait]
pub trait PdfConcatenator: Send + Sync {
    async fn concatenate_pdf_pages(&self, pages: Vec<Vec<u8>>) -> Result<MergedPdf, ConcatError>;
}

/// `qpdf` command-line concatenator.
#[derive(Debug, Clone)]
pub struct QpdfCli {
    program: String,
    scratch_root: PathBuf,
}

impl QpdfCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            scratch_root: std::env::temp_dir(),
        }
    }

    /// Binary from `QPDF_CMD`, defaulting to `qpdf` on `PATH`.
    pub fn from_env() -> Self {
        Self::new(env_string_or("QPDF_CMD", "qpdf"))
    }

    async fn page_count(&self, path: &Path) -> Result<usize, ConcatError> {
        let output = tokio::process::Command::new(&self.program)
            .arg("--show-npages")
            .arg(path)
            .output()
            .await
            .map_err(ConcatError::Unavailable)?;

        if !output.status.success() {
            return Err(ConcatError::Failed {
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse()
            .map_err(|e| ConcatError::Failed {
                exit_code: output.status.code(),
                stderr: format!("unexpected --show-npages output: {e}"),
            })
    }

    async fn merge_in(&self, scratch: &Path, pages: Vec<Vec<u8>>) -> Result<MergedPdf, ConcatError> {
        let mut inputs = Vec::with_capacity(pages.len());
        let mut page_count = 0;

        for (index, bytes) in pages.into_iter().enumerate() {
            let path = scratch.join(format!("page_{index:05}.pdf"));
            tokio::fs::write(&path, &bytes).await?;
            match self.page_count(&path).await {
                Ok(0) => tracing::warn!(index, "Skipping page PDF with no pages"),
                Ok(count) => {
                    page_count += count;
                    inputs.push(path);
                }
                Err(ConcatError::Unavailable(e)) => return Err(ConcatError::Unavailable(e)),
                Err(e) => tracing::warn!(index, error = %e, "Skipping unreadable page PDF"),
            }
        }

        if inputs.is_empty() {
            return Err(ConcatError::NoPages);
        }

        let merged_path = scratch.join("merged.pdf");
        let output = tokio::process::Command::new(&self.program)
            .args(["--empty", "--pages"])
            .args(&inputs)
            .arg("--")
            .arg(&merged_path)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(ConcatError::Unavailable)?;

        // Exit code 3 means "succeeded with warnings".
        if !output.status.success() && output.status.code() != Some(3) {
            return Err(ConcatError::Failed {
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let bytes = tokio::fs::read(&merged_path).await?;
        Ok(MergedPdf { bytes, page_count })
    }
}

#[async_trait]
impl PdfConcatenator for QpdfCli {
    async fn concatenate_pdf_pages(&self, pages: Vec<Vec<u8>>) -> Result<MergedPdf, ConcatError> {
        if pages.is_empty() {
            return Err(ConcatError::NoPages);
        }

        let scratch = self
            .scratch_root
            .join(format!("folio-merge-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&scratch).await?;

        let result = self.merge_in(&scratch, pages).await;

        if let Err(e) = tokio::fs::remove_dir_all(&scratch).await {
            tracing::warn!(path = %scratch.display(), error = %e, "Failed to remove merge scratch dir");
        }
        result
    }
}
