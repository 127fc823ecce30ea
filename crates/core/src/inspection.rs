//! Image size policy applied before any recognition work.
//!
//! Only the image header is decoded, so rejecting an oversized scan costs
//! a few hundred bytes of I/O instead of the full decode.

use std::path::PathBuf;

use crate::types::PageFailureKind;

/// Default ceiling on `width * height` (100 megapixels).
pub const MAX_IMAGE_PIXELS: u64 = 100_000_000;

#[derive(Debug, thiserror::Error)]
pub enum InspectionError {
    #[error("Image file not found: {0}")]
    NotFound(String),

    #[error("Cannot identify image file. It may be corrupted. ({0})")]
    Corrupt(String),

    #[error("Image too large ({width}x{height}).")]
    TooLarge { width: u32, height: u32 },

    #[error("I/O error reading image: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image inspection task failed: {0}")]
    Join(String),
}

impl InspectionError {
    /// Per-page failure classification used in book reports.
    pub fn page_failure_kind(&self) -> PageFailureKind {
        match self {
            InspectionError::NotFound(_) => PageFailureKind::SourceMissing,
            InspectionError::TooLarge { .. } => PageFailureKind::ImageTooLarge,
            InspectionError::Corrupt(_) | InspectionError::Io(_) | InspectionError::Join(_) => {
                PageFailureKind::ImageCorrupt
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDimensions {
    pub width: u32,
    pub height: u32,
}

impl ImageDimensions {
    pub fn pixels(self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// Reject dimensions whose pixel area exceeds `max_pixels`.
pub fn check_pixel_budget(dims: ImageDimensions, max_pixels: u64) -> Result<(), InspectionError> {
    if dims.pixels() > max_pixels {
        return Err(InspectionError::TooLarge {
            width: dims.width,
            height: dims.height,
        });
    }
    Ok(())
}

/// Identify the image at `path` and enforce the pixel ceiling.
pub async fn inspect_image(
    path: PathBuf,
    max_pixels: u64,
) -> Result<ImageDimensions, InspectionError> {
    let dims = tokio::task::spawn_blocking(move || read_dimensions(path))
        .await
        .map_err(|e| InspectionError::Join(e.to_string()))??;
    check_pixel_budget(dims, max_pixels)?;
    Ok(dims)
}

fn read_dimensions(path: PathBuf) -> Result<ImageDimensions, InspectionError> {
    let reader = match image::ImageReader::open(&path) {
        Ok(reader) => reader,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(InspectionError::NotFound(path.display().to_string()))
        }
        Err(e) => return Err(InspectionError::Io(e)),
    };

    let (width, height) = reader
        .with_guessed_format()?
        .into_dimensions()
        .map_err(|e| InspectionError::Corrupt(e.to_string()))?;

    Ok(ImageDimensions { width, height })
}
