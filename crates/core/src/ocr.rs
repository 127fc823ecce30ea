//! Text recognition and searchable-page rendering.
//!
//! The pipeline only sees the [`TextRecognizer`] and [`PageRenderer`]
//! traits. [`TesseractCli`] implements both by shelling out to the
//! `tesseract` binary, feeding the image through stdin.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::config::env_string_or;
use crate::error::CoreError;

/// Longest accepted language string (e.g. `vie+eng`).
const MAX_LANGUAGE_LEN: usize = 64;

/// Error type for recognition and rendering engines.
#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    #[error("OCR engine binary not available: {0}")]
    Unavailable(std::io::Error),

    #[error("OCR engine failed (exit code {exit_code:?}): {stderr}")]
    Failed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("OCR engine produced no output")]
    EmptyOutput,

    #[error("I/O error talking to OCR engine: {0}")]
    Io(#[from] std::io::Error),
}

/// Extracts plain text from an encoded image.
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    async fn recognize_text(&self, image: Vec<u8>, language: &str) -> Result<String, OcrError>;
}

/// Renders an encoded image as a one-page searchable PDF.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render_searchable_page(
        &self,
        image: Vec<u8>,
        language: &str,
    ) -> Result<Vec<u8>, OcrError>;
}

/// Validate a tesseract language string such as `vie` or `eng+vie`.
pub fn validate_language(language: &str) -> Result<(), CoreError> {
    let valid = !language.is_empty()
        && language.len() <= MAX_LANGUAGE_LEN
        && language
            .split('+')
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
    if valid {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "Invalid OCR language '{language}'"
        )))
    }
}

/// `tesseract` command-line engine.
#[derive(Debug, Clone)]
pub struct TesseractCli {
    program: String,
}

impl TesseractCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Binary from `TESSERACT_CMD`, defaulting to `tesseract` on `PATH`.
    pub fn from_env() -> Self {
        Self::new(env_string_or("TESSERACT_CMD", "tesseract"))
    }

    /// Print the engine version; used as a startup probe.
    pub async fn version(&self) -> Result<String, OcrError> {
        let output = tokio::process::Command::new(&self.program)
            .arg("--version")
            .output()
            .await
            .map_err(OcrError::Unavailable)?;
        let text = String::from_utf8_lossy(&output.stdout);
        let banner = if text.trim().is_empty() {
            String::from_utf8_lossy(&output.stderr).to_string()
        } else {
            text.to_string()
        };
        Ok(banner.lines().next().unwrap_or_default().trim().to_string())
    }

    /// Run `tesseract stdin stdout -l <language> [extra..]` with `image` on stdin.
    async fn run(&self, image: Vec<u8>, language: &str, extra: &[&str]) -> Result<Vec<u8>, OcrError> {
        let mut child = tokio::process::Command::new(&self.program)
            .args(["stdin", "stdout", "-l", language])
            .args(extra)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(OcrError::Unavailable)?;

        let mut stdin = child.stdin.take().ok_or(OcrError::EmptyOutput)?;
        let writer = tokio::spawn(async move {
            stdin.write_all(&image).await?;
            stdin.shutdown().await
        });

        let output = child.wait_with_output().await?;
        if let Ok(Err(e)) = writer.await {
            // A broken pipe here means tesseract gave up early; its exit
            // status below carries the real reason.
            tracing::debug!(error = %e, "Writing image to tesseract stdin failed");
        }

        if !output.status.success() {
            return Err(OcrError::Failed {
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl TextRecognizer for TesseractCli {
    async fn recognize_text(&self, image: Vec<u8>, language: &str) -> Result<String, OcrError> {
        let stdout = self.run(image, language, &[]).await?;
        Ok(String::from_utf8_lossy(&stdout).trim().to_string())
    }
}

#[async_trait]
impl PageRenderer for TesseractCli {
    async fn render_searchable_page(
        &self,
        image: Vec<u8>,
        language: &str,
    ) -> Result<Vec<u8>, OcrError> {
        let pdf = self.run(image, language, &["pdf"]).await?;
        if pdf.is_empty() {
            return Err(OcrError::EmptyOutput);
        }
        Ok(pdf)
    }
}
