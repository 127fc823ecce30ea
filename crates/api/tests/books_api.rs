//! Upload, book submission, status, download and cancellation over HTTP.

mod common;

use axum::http::StatusCode;
use common::{body_bytes, body_json, get, png, post_json, post_multipart, wait_for_task};
use serde_json::json;

async fn upload(app: &axum::Router, images: &[(&str, Vec<u8>)]) -> Vec<String> {
    let parts: Vec<(&str, &str, &[u8])> = images
        .iter()
        .map(|(name, bytes)| (*name, "image/png", bytes.as_slice()))
        .collect();
    let response = post_multipart(app, "/api/v1/uploads", &parts).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    json["data"]["uploaded_files"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["source_image_id"].as_str().unwrap().to_string())
        .collect()
}

// ---------------------------------------------------------------------------
// Uploads
// ---------------------------------------------------------------------------

#[tokio::test]
async fn upload_keeps_images_and_skips_other_parts() {
    let t = common::build_test_app().await;
    let image = png(4, 4);
    let response = post_multipart(
        &t.app,
        "/api/v1/uploads",
        &[
            ("Scan.JPG", "image/jpeg", &image),
            ("notes.txt", "text/plain", b"hello"),
        ],
    )
    .await;

    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    let files = json["data"]["uploaded_files"].as_array().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0]["original_filename"], "Scan.JPG");
    assert!(files[0]["source_image_id"].as_str().unwrap().ends_with(".jpg"));
}

// ---------------------------------------------------------------------------
// Book lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn book_round_trip_then_download_once() {
    let t = common::build_test_app().await;
    let ids = upload(&t.app, &[("a.png", png(5, 5)), ("b.png", png(6, 6))]).await;

    let pages: Vec<_> = ids
        .iter()
        .map(|id| json!({"source_image_id": id, "original_name": "x.png", "lang": "eng"}))
        .collect();
    let response = post_json(&t.app, "/api/v1/books", json!({ "pages": pages })).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_json(response).await;
    let task_id = json["data"]["task_id"].as_str().unwrap().to_string();

    let data = wait_for_task(&t.app, &task_id).await;
    assert_eq!(data["task_id"], task_id.as_str());
    assert_eq!(data["status"], "SUCCESS");
    assert_eq!(data["result"]["page_count"], 2);
    let artifact = data["result"]["merged_artifact_id"].as_str().unwrap().to_string();
    assert_eq!(artifact, format!("merged_book_{task_id}.pdf"));

    let uri = format!("/api/v1/books/{artifact}/download");
    let response = get(&t.app, &uri).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "application/pdf");
    let bytes = body_bytes(response).await;
    assert!(bytes.starts_with(b"%PDF-"));

    // The book is reclaimed after delivery.
    let response = get(&t.app, &uri).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(
        json["error"],
        "Generated PDF file not found or already cleaned up."
    );
}

#[tokio::test]
async fn empty_book_request_is_400() {
    let t = common::build_test_app().await;
    let response = post_json(&t.app, "/api/v1/books", json!({ "pages": [] })).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "VALIDATION_ERROR");
    assert_eq!(json["error"], "No files specified for PDF generation.");
}

#[tokio::test]
async fn path_traversal_in_source_id_is_400() {
    let t = common::build_test_app().await;
    let response = post_json(
        &t.app,
        "/api/v1/books",
        json!({ "pages": [{"source_image_id": "../secret.png"}] }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn invalid_download_name_is_400() {
    let t = common::build_test_app().await;
    let response = get(&t.app, "/api/v1/books/..%2Fsecret.pdf/download").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn missing_sources_end_in_failure_status() {
    let t = common::build_test_app().await;
    let response = post_json(
        &t.app,
        "/api/v1/books",
        json!({ "pages": [{"source_image_id": "nowhere.png"}] }),
    )
    .await;
    let json = body_json(response).await;
    let task_id = json["data"]["task_id"].as_str().unwrap().to_string();

    let data = wait_for_task(&t.app, &task_id).await;
    assert_eq!(data["status"], "FAILURE");
    assert_eq!(data["result"]["error"], "No valid image files found to process.");
}

// ---------------------------------------------------------------------------
// Status and cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_task_is_not_found_status() {
    let t = common::build_test_app().await;
    let id = uuid::Uuid::new_v4();
    let response = get(&t.app, &format!("/api/v1/tasks/{id}")).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["status"], "NOT_FOUND");
    assert!(json["data"]["result"].is_null());
}

#[tokio::test]
async fn malformed_task_id_is_400() {
    let t = common::build_test_app().await;
    let response = get(&t.app, "/api/v1/tasks/not-a-uuid").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn cancelling_a_finished_task_reports_not_revoked() {
    let t = common::build_test_app().await;
    let ids = upload(&t.app, &[("a.png", png(5, 5))]).await;
    let response = post_json(
        &t.app,
        "/api/v1/books",
        json!({ "pages": [{"source_image_id": ids[0]}] }),
    )
    .await;
    let task_id = body_json(response).await["data"]["task_id"]
        .as_str()
        .unwrap()
        .to_string();
    wait_for_task(&t.app, &task_id).await;

    let response = post_json(&t.app, &format!("/api/v1/tasks/{task_id}/cancel"), json!({})).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["revoked"], false);
}

// ---------------------------------------------------------------------------
// Recognition
// ---------------------------------------------------------------------------

#[tokio::test]
async fn recognitions_skip_missing_files() {
    let t = common::build_test_app().await;
    let ids = upload(&t.app, &[("a.png", png(5, 5))]).await;

    let response = post_json(
        &t.app,
        "/api/v1/recognitions",
        json!({
            "pages": [
                {"source_image_id": ids[0], "original_name": "a.png"},
                {"source_image_id": "gone.png", "original_name": "gone.png"}
            ],
            "lang": "eng"
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_json(response).await;
    assert_eq!(json["data"]["message"], "Submitted 1 OCR tasks.");
    let submitted = json["data"]["submitted_tasks"].as_array().unwrap();
    assert_eq!(submitted.len(), 1);

    let task_id = submitted[0]["task_id"].as_str().unwrap();
    let data = wait_for_task(&t.app, task_id).await;
    assert_eq!(data["status"], "SUCCESS");
    assert_eq!(data["result"]["status"], "success");
    assert!(data["result"]["text"].as_str().unwrap().starts_with("eng:"));
}
