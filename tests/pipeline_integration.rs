//! End-to-end pipeline tests over the HTTP surface.
//!
//! The document store and object store are in-memory; the embedding provider,
//! parser, and vector store are mocked HTTP services, so the real clients and
//! their error mapping are exercised.

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode},
};
use docpipe::api::create_router;
use docpipe::document::MemoryDocumentStore;
use docpipe::embedding::HttpEmbeddingClient;
use docpipe::metrics::PipelineMetrics;
use docpipe::notify::ProgressNotifier;
use docpipe::pipeline::{HttpParserClient, PipelineService, PipelineSettings};
use docpipe::storage::MemoryObjectStore;
use docpipe::vectors::VectorStoreService;
use httpmock::{Method::POST as MockPost, Method::PUT as MockPut, MockServer};
use serde_json::json;
use std::sync::Arc;
use tower::ServiceExt;

const DIMENSION: usize = 4;

struct TestBed {
    app: Router,
    objects: Arc<MemoryObjectStore>,
}

async fn testbed(server: &MockServer) -> TestBed {
    let store = Arc::new(MemoryDocumentStore::new());
    let objects = Arc::new(MemoryObjectStore::new());
    let parser = Arc::new(HttpParserClient::new(server.base_url()).expect("parser client"));
    let embedder = Arc::new(
        HttpEmbeddingClient::new(server.base_url(), None, "test-model".into(), DIMENSION)
            .expect("embedding client"),
    );
    let vectors = Arc::new(
        VectorStoreService::new(&server.base_url(), None, "chunks").expect("vector service"),
    );

    let service = PipelineService::from_parts(
        store,
        objects.clone(),
        parser,
        embedder,
        None,
        vectors,
        ProgressNotifier::spawn(64, None),
        Arc::new(PipelineMetrics::new()),
        PipelineSettings::with_dimension(DIMENSION),
    );
    TestBed {
        app: create_router(Arc::new(service)),
        objects,
    }
}

async fn mock_embeddings(server: &MockServer, status: u16) {
    server
        .mock_async(move |when, then| {
            when.method(MockPost).path("/embeddings");
            if status == 200 {
                then.status(200).json_body(json!({
                    "data": [{"embedding": [0.1, 0.2, 0.3, 0.4]}]
                }));
            } else {
                then.status(status).body("quota exhausted");
            }
        })
        .await;
}

async fn mock_upsert(server: &MockServer) -> httpmock::Mock<'_> {
    server
        .mock_async(|when, then| {
            when.method(MockPut).path("/collections/chunks/points");
            then.status(200).json_body(json!({"status": "ok"}));
        })
        .await
}

async fn mock_parser(server: &MockServer) {
    server
        .mock_async(|when, then| {
            when.method(MockPost).path("/parse");
            then.status(202).json_body(json!({"accepted": true}));
        })
        .await;
}

async fn request(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let request = match body {
        Some(body) => Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request"),
        None => Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .expect("request"),
    };
    let response = app
        .clone()
        .oneshot(request)
        .await
        .expect("router response");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body bytes");
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, json)
}

fn upload_body(filename: &str, content_type: &str, size: u64) -> serde_json::Value {
    json!({
        "filename": filename,
        "content_type": content_type,
        "size": size,
        "user_id": "user-1",
    })
}

#[tokio::test]
async fn small_text_file_completes_end_to_end() {
    let server = MockServer::start_async().await;
    mock_embeddings(&server, 200).await;
    mock_upsert(&server).await;
    let bed = testbed(&server).await;

    let (status, initiated) = request(
        &bed.app,
        Method::POST,
        "/uploads",
        Some(upload_body("notes.txt", "text/plain", 3_000)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(initiated["total_transfer_chunks"], 1);

    let id = initiated["document_id"].as_str().unwrap().to_string();
    let path = initiated["storage_path"].as_str().unwrap().to_string();
    bed.objects
        .put(&path, b"A first sentence. A second sentence.".to_vec())
        .await;

    let (status, completed) = request(
        &bed.app,
        Method::POST,
        &format!("/uploads/{id}/complete"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(completed["status"], "completed");
    assert_eq!(completed["progress"], 100);

    let (status, document) =
        request(&bed.app, Method::GET, &format!("/documents/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(document["status"], "completed");
    assert_eq!(document["total_chunks"], 1);
    assert_eq!(document["processed_chunks"], 1);
    assert_eq!(document["failed_chunks"], 0);

    let (_, metrics) = request(&bed.app, Method::GET, "/metrics", None).await;
    assert_eq!(metrics["documents_completed"], 1);
    assert_eq!(metrics["chunks_embedded"], 1);
}

#[tokio::test]
async fn pdf_waits_for_the_parser_callback() {
    let server = MockServer::start_async().await;
    mock_embeddings(&server, 200).await;
    mock_upsert(&server).await;
    mock_parser(&server).await;
    let bed = testbed(&server).await;

    let (_, initiated) = request(
        &bed.app,
        Method::POST,
        "/uploads",
        Some(upload_body("report.pdf", "application/pdf", 10_000)),
    )
    .await;
    let id = initiated["document_id"].as_str().unwrap().to_string();
    let path = initiated["storage_path"].as_str().unwrap().to_string();
    bed.objects.put(&path, b"%PDF-1.4 binary".to_vec()).await;

    let (status, completed) = request(
        &bed.app,
        Method::POST,
        &format!("/uploads/{id}/complete"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(completed["status"], "parsing");

    // The parser finishes later and calls back with per-page content.
    let (status, ack) = request(
        &bed.app,
        Method::POST,
        "/webhooks",
        Some(json!({
            "status": "completed",
            "task_id": "parser-task-1",
            "pages": [
                {"page": 1, "text": "A."},
                {"page": 2, "text": "B."}
            ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["received"], true);

    let (_, document) = request(&bed.app, Method::GET, &format!("/documents/{id}"), None).await;
    assert_eq!(document["status"], "completed");
    assert_eq!(document["progress"], 100);
    assert_eq!(document["total_chunks"], 1);
}

#[tokio::test]
async fn empty_parser_callback_fails_the_document_without_chunks() {
    let server = MockServer::start_async().await;
    mock_parser(&server).await;
    let upsert = mock_upsert(&server).await;
    let bed = testbed(&server).await;

    let (_, initiated) = request(
        &bed.app,
        Method::POST,
        "/uploads",
        Some(upload_body("scan.pdf", "application/pdf", 10_000)),
    )
    .await;
    let id = initiated["document_id"].as_str().unwrap().to_string();
    let path = initiated["storage_path"].as_str().unwrap().to_string();
    bed.objects.put(&path, b"%PDF-1.4 binary".to_vec()).await;
    request(
        &bed.app,
        Method::POST,
        &format!("/uploads/{id}/complete"),
        None,
    )
    .await;

    let (status, _) = request(
        &bed.app,
        Method::POST,
        "/webhooks",
        Some(json!({ "status": "completed", "text": "   " })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, document) = request(&bed.app, Method::GET, &format!("/documents/{id}"), None).await;
    assert_eq!(document["status"], "failed");
    assert!(document["total_chunks"].is_null());
    assert_eq!(upsert.hits_async().await, 0);
}

#[tokio::test]
async fn exhausted_provider_degrades_but_still_completes() {
    let server = MockServer::start_async().await;
    mock_embeddings(&server, 429).await;
    let upsert = mock_upsert(&server).await;
    let bed = testbed(&server).await;

    let (_, initiated) = request(
        &bed.app,
        Method::POST,
        "/uploads",
        Some(upload_body("notes.txt", "text/plain", 3_000)),
    )
    .await;
    let id = initiated["document_id"].as_str().unwrap().to_string();
    let path = initiated["storage_path"].as_str().unwrap().to_string();
    bed.objects.put(&path, b"Some body text.".to_vec()).await;

    let (status, completed) = request(
        &bed.app,
        Method::POST,
        &format!("/uploads/{id}/complete"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(completed["status"], "completed");

    let (_, document) = request(&bed.app, Method::GET, &format!("/documents/{id}"), None).await;
    assert_eq!(document["status"], "completed");
    assert_eq!(document["failed_chunks"], 1);
    assert!(
        document["warning"]
            .as_str()
            .expect("warning present")
            .contains("degraded")
    );
    // Placeholder records were still persisted.
    assert!(upsert.hits_async().await >= 1);

    let (_, metrics) = request(&bed.app, Method::GET, "/metrics", None).await;
    assert_eq!(metrics["chunks_degraded"], 1);
    assert_eq!(metrics["documents_completed"], 1);
}

#[tokio::test]
async fn tagged_webhook_for_an_unknown_document_returns_not_found() {
    let server = MockServer::start_async().await;
    let bed = testbed(&server).await;

    let (status, body) = request(
        &bed.app,
        Method::POST,
        "/webhooks",
        Some(json!({
            "source": "storage",
            "status": "failed",
            "document_id": uuid::Uuid::new_v4(),
        })),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("not found"));
}

#[tokio::test]
async fn duplicate_upload_is_rejected_with_conflict() {
    let server = MockServer::start_async().await;
    mock_embeddings(&server, 200).await;
    mock_upsert(&server).await;
    let bed = testbed(&server).await;

    let (_, initiated) = request(
        &bed.app,
        Method::POST,
        "/uploads",
        Some(upload_body("notes.txt", "text/plain", 3_000)),
    )
    .await;
    let id = initiated["document_id"].as_str().unwrap().to_string();
    let path = initiated["storage_path"].as_str().unwrap().to_string();
    bed.objects.put(&path, b"Body.".to_vec()).await;
    request(
        &bed.app,
        Method::POST,
        &format!("/uploads/{id}/complete"),
        None,
    )
    .await;

    let (status, body) = request(
        &bed.app,
        Method::POST,
        "/uploads",
        Some(upload_body("notes.txt", "text/plain", 3_000)),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["existing_document_id"].as_str().unwrap(), id);
}

#[tokio::test]
async fn chunked_transfer_triggers_processing_on_the_final_chunk() {
    let server = MockServer::start_async().await;
    mock_embeddings(&server, 200).await;
    mock_upsert(&server).await;
    let bed = testbed(&server).await;

    let (_, initiated) = request(
        &bed.app,
        Method::POST,
        "/uploads",
        Some(upload_body("big.txt", "text/plain", 11 * 1024 * 1024)),
    )
    .await;
    assert_eq!(initiated["total_transfer_chunks"], 3);
    let id = initiated["document_id"].as_str().unwrap().to_string();
    let path = initiated["storage_path"].as_str().unwrap().to_string();
    bed.objects
        .put(&path, b"Reassembled body text.".to_vec())
        .await;

    for index in 0..2 {
        let (status, ack) = request(
            &bed.app,
            Method::POST,
            &format!("/uploads/{id}/transfer/{index}"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ack["upload_complete"], false);
    }

    let (status, ack) = request(
        &bed.app,
        Method::POST,
        &format!("/uploads/{id}/transfer/2"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["upload_complete"], true);

    let (_, document) = request(&bed.app, Method::GET, &format!("/documents/{id}"), None).await;
    assert_eq!(document["status"], "completed");
}
