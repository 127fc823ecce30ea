//! Local filesystem object store for source images and generated PDFs.
//!
//! Every file is addressed by a generated identifier that is never reused,
//! so each path has exactly one writer. Writes go to a `.partial` sibling
//! first and are renamed into place, which means readers never observe a
//! half-written artifact.
//!
//! Layout under the configured root:
//!
//! ```text
//! uploads/                         source images  (<uuid><suffix>)
//! generated_pdfs/                  merged books   (merged_book_<request>.pdf)
//! generated_pdfs/single_pages/     intermediate   (<uuid>.pdf)
//! ```

use std::io;
use std::path::{Path, PathBuf};

use crate::config::env_string_or;
use crate::error::CoreError;
use crate::types::{ArtifactId, ArtifactKind, SourceImageId};

/// Directory holding uploaded source images.
pub const UPLOAD_DIR_NAME: &str = "uploads";

/// Directory holding merged books.
pub const PDF_DIR_NAME: &str = "generated_pdfs";

/// Sub-directory of [`PDF_DIR_NAME`] holding intermediate page PDFs.
pub const PAGE_DIR_NAME: &str = "single_pages";

/// Suffix used when an upload carries no usable extension.
const DEFAULT_IMAGE_SUFFIX: &str = ".png";

/// Longest extension kept from an uploaded file name.
const MAX_SUFFIX_LEN: usize = 8;

/// Suffix of in-flight writes.
const PARTIAL_SUFFIX: &str = ".partial";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error(transparent)]
    InvalidId(#[from] CoreError),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StorageError {
    fn io(path: &Path, source: io::Error) -> Self {
        StorageError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Storage configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root directory (default: `.`, overridden by `STORAGE_ROOT`).
    pub root: PathBuf,
}

impl StorageConfig {
    pub fn from_env() -> Self {
        Self {
            root: PathBuf::from(env_string_or("STORAGE_ROOT", ".")),
        }
    }
}

/// Filesystem-backed store shared by every job through an `Arc`.
#[derive(Debug, Clone)]
pub struct ObjectStore {
    uploads: PathBuf,
    books: PathBuf,
    pages: PathBuf,
}

impl ObjectStore {
    /// Create the directory layout under `config.root` if needed.
    pub async fn open(config: &StorageConfig) -> Result<Self, StorageError> {
        let uploads = config.root.join(UPLOAD_DIR_NAME);
        let books = config.root.join(PDF_DIR_NAME);
        let pages = books.join(PAGE_DIR_NAME);

        for dir in [&uploads, &books, &pages] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| StorageError::io(dir, e))?;
        }

        tracing::debug!(root = %config.root.display(), "Object store ready");
        Ok(Self {
            uploads,
            books,
            pages,
        })
    }

    pub fn source_path(&self, id: &SourceImageId) -> Result<PathBuf, StorageError> {
        id.validate()?;
        Ok(self.uploads.join(id.as_str()))
    }

    pub fn artifact_path(
        &self,
        kind: ArtifactKind,
        id: &ArtifactId,
    ) -> Result<PathBuf, StorageError> {
        id.validate()?;
        let dir = match kind {
            ArtifactKind::IntermediatePage => &self.pages,
            ArtifactKind::MergedBook => &self.books,
        };
        Ok(dir.join(id.as_str()))
    }

    // ---- source images ----

    /// Persist an uploaded image under a fresh `<uuid><suffix>` name.
    pub async fn save_upload(
        &self,
        original_name: &str,
        bytes: &[u8],
    ) -> Result<SourceImageId, StorageError> {
        let name = format!("{}{}", uuid::Uuid::new_v4(), upload_suffix(original_name));
        let id = SourceImageId::parse(name)?;
        let path = self.source_path(&id)?;
        write_atomic(&path, bytes).await?;
        tracing::debug!(source_image_id = %id, original_name, size = bytes.len(), "Upload stored");
        Ok(id)
    }

    /// Whether the backing file of a source image is present.
    pub async fn source_exists(&self, id: &SourceImageId) -> bool {
        match self.source_path(id) {
            Ok(path) => is_file(&path).await,
            Err(_) => false,
        }
    }

    pub async fn read_source(&self, id: &SourceImageId) -> Result<Vec<u8>, StorageError> {
        let path = self.source_path(id)?;
        read_existing(&path, "Source image", id.as_str()).await
    }

    /// Delete a source image. Returns the freed size, or `None` if it was
    /// already gone.
    pub async fn delete_source(&self, id: &SourceImageId) -> Result<Option<u64>, StorageError> {
        let path = self.source_path(id)?;
        remove_if_present(&path).await
    }

    // ---- generated PDFs ----

    /// Persist one intermediate page under a fresh `<uuid>.pdf` name.
    pub async fn write_page(&self, bytes: &[u8]) -> Result<ArtifactId, StorageError> {
        let id = ArtifactId::parse(format!("{}.pdf", uuid::Uuid::new_v4()))?;
        let path = self.artifact_path(ArtifactKind::IntermediatePage, &id)?;
        write_atomic(&path, bytes).await?;
        Ok(id)
    }

    /// Persist the merged book of `request_id`.
    pub async fn write_book(
        &self,
        request_id: &str,
        bytes: &[u8],
    ) -> Result<ArtifactId, StorageError> {
        let id = book_artifact_id(request_id)?;
        let path = self.artifact_path(ArtifactKind::MergedBook, &id)?;
        write_atomic(&path, bytes).await?;
        Ok(id)
    }

    pub async fn read_artifact(
        &self,
        kind: ArtifactKind,
        id: &ArtifactId,
    ) -> Result<Vec<u8>, StorageError> {
        let path = self.artifact_path(kind, id)?;
        read_existing(&path, "Artifact", id.as_str()).await
    }

    /// Open a merged book for streaming.
    pub async fn open_book(&self, id: &ArtifactId) -> Result<tokio::fs::File, StorageError> {
        let path = self.artifact_path(ArtifactKind::MergedBook, id)?;
        match tokio::fs::File::open(&path).await {
            Ok(file) => Ok(file),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StorageError::NotFound {
                entity: "Artifact",
                id: id.to_string(),
            }),
            Err(e) => Err(StorageError::io(&path, e)),
        }
    }

    /// Delete an artifact and any leftover partial write of it. Returns the
    /// freed size, or `None` if nothing was there.
    pub async fn delete_artifact(
        &self,
        kind: ArtifactKind,
        id: &ArtifactId,
    ) -> Result<Option<u64>, StorageError> {
        let path = self.artifact_path(kind, id)?;
        remove_if_present(&partial_path(&path)).await?;
        remove_if_present(&path).await
    }
}

/// Name of the merged book for a request.
pub fn book_artifact_id(request_id: &str) -> Result<ArtifactId, CoreError> {
    ArtifactId::parse(format!("merged_book_{request_id}.pdf"))
}

/// Lower-cased extension of an uploaded file name, or `.png`.
fn upload_suffix(original_name: &str) -> String {
    Path::new(original_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| {
            !ext.is_empty()
                && ext.len() <= MAX_SUFFIX_LEN
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_else(|| DEFAULT_IMAGE_SUFFIX.to_string())
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let partial = partial_path(path);
    if let Err(e) = tokio::fs::write(&partial, bytes).await {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(StorageError::io(&partial, e));
    }
    tokio::fs::rename(&partial, path)
        .await
        .map_err(|e| StorageError::io(path, e))
}

async fn read_existing(
    path: &Path,
    entity: &'static str,
    id: &str,
) -> Result<Vec<u8>, StorageError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StorageError::NotFound {
            entity,
            id: id.to_string(),
        }),
        Err(e) => Err(StorageError::io(path, e)),
    }
}

async fn remove_if_present(path: &Path) -> Result<Option<u64>, StorageError> {
    let size = match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => meta.len(),
        Ok(_) => return Ok(None),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StorageError::io(path, e)),
    };
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(Some(size)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StorageError::io(path, e)),
    }
}
