//! Shared harness: a temporary object store, in-process fake engines and a
//! running worker pool.

#![allow(dead_code)]

use std::io::Cursor;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use folio_core::ocr::{OcrError, PageRenderer, TextRecognizer};
use folio_core::pdf::{ConcatError, MergedPdf, PdfConcatenator};
use folio_core::storage::{ObjectStore, StorageConfig, PAGE_DIR_NAME, PDF_DIR_NAME, UPLOAD_DIR_NAME};
use folio_core::types::SourceImageId;
use folio_pipeline::{task_registry, BookPage, BookService, PipelineConfig, PipelineDeps};
use folio_queue::{EngineConfig, StatusReport, TaskEngine, TaskId, WorkerPool};
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const FAKE_PDF_MAGIC: &[u8] = b"%PDF-fake";

// ---------------------------------------------------------------------------
// Fake engines
// ---------------------------------------------------------------------------

/// Stand-in for tesseract and qpdf.
#[derive(Default)]
pub struct FakeEngines {
    /// Render calls made so far.
    pub renders: AtomicU32,
    /// Upcoming render calls that fail with an engine error.
    pub transient_render_failures: AtomicU32,
    pub render_always_fails: AtomicBool,
    pub render_delay_ms: AtomicU64,
    /// Concatenation calls made so far.
    pub concats: AtomicU32,
    pub concat_fails: AtomicBool,
    pub concat_panics: AtomicBool,
    pub concat_delay_ms: AtomicU64,
}

/// What the fake renderer produces for `image`.
pub fn fake_page(image: &[u8]) -> Vec<u8> {
    let checksum: u64 = image.iter().map(|b| u64::from(*b)).sum();
    let mut page = FAKE_PDF_MAGIC.to_vec();
    page.extend_from_slice(format!(" {} {checksum}", image.len()).as_bytes());
    page
}

/// What the fake concatenator produces for `pages`.
pub fn fake_book(pages: &[Vec<u8>]) -> Vec<u8> {
    pages.join(&b'\n')
}

fn engine_error() -> OcrError {
    OcrError::Failed {
        exit_code: Some(1),
        stderr: "engine crashed".into(),
    }
}

#[async_trait]
impl PageRenderer for FakeEngines {
    async fn render_searchable_page(
        &self,
        image: Vec<u8>,
        _language: &str,
    ) -> Result<Vec<u8>, OcrError> {
        self.renders.fetch_add(1, Ordering::SeqCst);

        let delay = self.render_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.render_always_fails.load(Ordering::SeqCst) {
            return Err(engine_error());
        }
        let pending_failures = self.transient_render_failures.load(Ordering::SeqCst);
        if pending_failures > 0 {
            self.transient_render_failures
                .store(pending_failures - 1, Ordering::SeqCst);
            return Err(engine_error());
        }
        Ok(fake_page(&image))
    }
}

#[async_trait]
impl TextRecognizer for FakeEngines {
    async fn recognize_text(&self, image: Vec<u8>, language: &str) -> Result<String, OcrError> {
        Ok(format!("{language}: {} bytes", image.len()))
    }
}

#[async_trait]
impl PdfConcatenator for FakeEngines {
    async fn concatenate_pdf_pages(&self, pages: Vec<Vec<u8>>) -> Result<MergedPdf, ConcatError> {
        self.concats.fetch_add(1, Ordering::SeqCst);

        let delay = self.concat_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.concat_panics.load(Ordering::SeqCst) {
            panic!("qpdf segfaulted");
        }
        if self.concat_fails.load(Ordering::SeqCst) {
            return Err(ConcatError::Failed {
                exit_code: Some(2),
                stderr: "damaged xref".into(),
            });
        }
        let readable: Vec<Vec<u8>> = pages
            .into_iter()
            .filter(|p| p.starts_with(FAKE_PDF_MAGIC))
            .collect();
        if readable.is_empty() {
            return Err(ConcatError::NoPages);
        }
        Ok(MergedPdf {
            bytes: fake_book(&readable),
            page_count: readable.len(),
        })
    }
}

// ---------------------------------------------------------------------------
// Images
// ---------------------------------------------------------------------------

/// A blank PNG of the given size.
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(image::RgbImage::new(width, height))
        .write_to(&mut buf, image::ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Pipeline {
    pub dir: TempDir,
    pub store: Arc<ObjectStore>,
    pub engines: Arc<FakeEngines>,
    pub service: BookService,
    pub engine: Arc<TaskEngine>,
    cancel: CancellationToken,
    pool: JoinHandle<()>,
}

pub fn engine_config() -> EngineConfig {
    EngineConfig {
        concurrency: 4,
        max_tasks_per_child: 3,
        soft_time_limit: Duration::from_secs(20),
        time_limit: Duration::from_secs(30),
        max_attempts: 3,
        retry_delay: Duration::from_millis(10),
        result_expires: Duration::from_secs(60),
        result_sweep_interval: Duration::from_secs(60),
    }
}

pub async fn start() -> Pipeline {
    start_with(PipelineConfig::default(), FakeEngines::default()).await
}

pub async fn start_with(config: PipelineConfig, engines: FakeEngines) -> Pipeline {
    start_with_limits(config, engines, engine_config()).await
}

pub async fn start_with_limits(
    config: PipelineConfig,
    engines: FakeEngines,
    limits: EngineConfig,
) -> Pipeline {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        ObjectStore::open(&StorageConfig {
            root: dir.path().to_path_buf(),
        })
        .await
        .unwrap(),
    );
    let engines = Arc::new(engines);

    let deps = PipelineDeps {
        store: store.clone(),
        recognizer: engines.clone(),
        renderer: engines.clone(),
        concatenator: engines.clone(),
        config: config.clone(),
    };
    let engine = TaskEngine::in_memory(limits, task_registry(&deps));
    let cancel = CancellationToken::new();
    let pool = tokio::spawn(WorkerPool::new(engine.clone()).run(cancel.clone()));
    let service = BookService::new(engine.clone(), store.clone(), config);

    Pipeline {
        dir,
        store,
        engines,
        service,
        engine,
        cancel,
        pool,
    }
}

impl Pipeline {
    pub async fn upload(&self, name: &str, bytes: &[u8]) -> SourceImageId {
        self.service.save_upload(name, bytes).await.unwrap()
    }

    pub async fn wait(&self, id: TaskId) -> StatusReport {
        self.engine
            .status_reporter()
            .wait(id, Duration::from_millis(5), Duration::from_secs(20))
            .await
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.dir.path().join(UPLOAD_DIR_NAME)
    }

    pub fn books_dir(&self) -> PathBuf {
        self.dir.path().join(PDF_DIR_NAME)
    }

    pub fn pages_dir(&self) -> PathBuf {
        self.books_dir().join(PAGE_DIR_NAME)
    }

    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.pool.await.unwrap();
    }
}

/// Plain file names in `dir`, sorted.
pub fn files_in(dir: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|entry| entry.path().is_file())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

pub fn page(id: &SourceImageId, language: &str) -> BookPage {
    BookPage {
        source_image_id: id.clone(),
        original_name: Some(format!("orig-{id}")),
        language: Some(language.to_string()),
    }
}
