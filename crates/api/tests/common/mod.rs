#![allow(dead_code)]

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::Router;
use folio_core::ocr::{OcrError, PageRenderer, TextRecognizer};
use folio_core::pdf::{ConcatError, MergedPdf, PdfConcatenator};
use folio_core::storage::{ObjectStore, StorageConfig};
use folio_pipeline::{task_registry, BookService, PipelineConfig, PipelineDeps};
use folio_queue::{EngineConfig, TaskEngine, WorkerPool};
use http_body_util::BodyExt;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use folio_api::config::ServerConfig;
use folio_api::router::build_app_router;
use folio_api::state::AppState;

/// Single-page "PDFs" are the image bytes behind a marker.
struct FakeEngines;

#[async_trait]
impl PageRenderer for FakeEngines {
    async fn render_searchable_page(&self, image: Vec<u8>, _: &str) -> Result<Vec<u8>, OcrError> {
        let mut page = b"%PDF-".to_vec();
        page.extend(image);
        Ok(page)
    }
}

#[async_trait]
impl TextRecognizer for FakeEngines {
    async fn recognize_text(&self, image: Vec<u8>, language: &str) -> Result<String, OcrError> {
        Ok(format!("{language}:{}", image.len()))
    }
}

#[async_trait]
impl PdfConcatenator for FakeEngines {
    async fn concatenate_pdf_pages(&self, pages: Vec<Vec<u8>>) -> Result<MergedPdf, ConcatError> {
        Ok(MergedPdf {
            page_count: pages.len(),
            bytes: pages.concat(),
        })
    }
}

pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        max_upload_bytes: 1024 * 1024,
        shutdown_timeout_secs: 5,
    }
}

/// A running app: router, worker pool and a temporary storage root.
pub struct TestApp {
    pub app: Router,
    pub dir: TempDir,
    cancel: CancellationToken,
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub async fn build_test_app() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        ObjectStore::open(&StorageConfig {
            root: dir.path().to_path_buf(),
        })
        .await
        .unwrap(),
    );
    let engines = Arc::new(FakeEngines);
    let deps = PipelineDeps {
        store: store.clone(),
        recognizer: engines.clone(),
        renderer: engines.clone(),
        concatenator: engines,
        config: PipelineConfig::default(),
    };
    let engine_config = EngineConfig {
        retry_delay: Duration::from_millis(10),
        ..EngineConfig::default()
    };
    let engine = TaskEngine::in_memory(engine_config, task_registry(&deps));

    let cancel = CancellationToken::new();
    tokio::spawn(WorkerPool::new(engine.clone()).run(cancel.clone()));

    let state = AppState {
        service: BookService::new(engine, store, PipelineConfig::default()),
        config: Arc::new(test_config()),
    };
    TestApp {
        app: build_app_router(state).unwrap(),
        dir,
        cancel,
    }
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn get(app: &Router, uri: &str) -> Response<Body> {
    let request = Request::get(uri).body(Body::empty()).unwrap();
    app.clone().oneshot(request).await.unwrap()
}

pub async fn post_json(app: &Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    let request = Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

const BOUNDARY: &str = "folio-test-boundary";

/// POST a multipart body with one part per `(filename, content_type, bytes)`.
pub async fn post_multipart(app: &Router, uri: &str, parts: &[(&str, &str, &[u8])]) -> Response<Body> {
    let mut body = Vec::new();
    for (filename, content_type, bytes) in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"files\"; filename=\"{filename}\"\r\n\
                 Content-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    let request = Request::post(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Poll a task until it reaches a terminal status and return its `data`.
pub async fn wait_for_task(app: &Router, task_id: &str) -> serde_json::Value {
    for _ in 0..2000 {
        let response = get(app, &format!("/api/v1/tasks/{task_id}")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        let status = json["data"]["status"].as_str().unwrap().to_string();
        if !matches!(status.as_str(), "PENDING" | "STARTED" | "RETRY") {
            return json["data"].clone();
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("task {task_id} did not finish");
}

pub fn png(width: u32, height: u32) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(image::RgbImage::new(width, height))
        .write_to(&mut buf, image::ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}
