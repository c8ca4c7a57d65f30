//! Integration tests for the HTTP API endpoints.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use bytes::Bytes;
use chunklog_core::LogId;
use chunklog_storage::{KeyValueStore, MemoryBackend};
use common::{CountingStore, TestServer, UploadSpec, get_request, seeded_bytes, split_units};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

fn error_code(body: &[u8]) -> String {
    let json: Value = serde_json::from_slice(body).unwrap();
    json["code"].as_str().unwrap().to_string()
}

/// A body that fails the test if the handler ever polls it.
fn untouchable_body() -> Body {
    Body::from_stream(futures::stream::poll_fn(
        |_| -> std::task::Poll<Option<Result<Bytes, std::io::Error>>> {
            panic!("request body must not be read")
        },
    ))
}

#[tokio::test]
async fn test_upload_then_get_abc123() {
    let server = TestServer::new();
    let data = seeded_bytes(5000, 5000);

    let (response, body) = server
        .send_collect(UploadSpec::new("abc123").request(split_units(&data, &[2000, 2000])))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(&body[..], b"OK");
    assert!(
        response.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/plain")
    );

    let record = server
        .state
        .index
        .lookup(&LogId::parse("abc123").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.size, 5000);
    assert_eq!(record.chunk_count, 3);
    assert_eq!(
        record.key_prefix.to_key(),
        "logs/idx1/20250101/1200/build/abc123"
    );

    let (response, body) = server
        .send_collect(get_request("/v1/logs/get/abc123"))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "application/octet-stream"
    );
    assert_eq!(response.headers()["content-length"], "5000");
    assert_eq!(body, data);
}

#[tokio::test]
async fn test_concurrent_duplicate_uploads_have_one_winner() {
    let server = TestServer::new();
    let first = seeded_bytes(1, 3000);
    let second = seeded_bytes(2, 3000);

    // Different timestamps give different chunk prefixes, so both uploads
    // write their chunks and race at the index commit.
    let (a, b) = tokio::join!(
        server.send_collect(
            UploadSpec::new("dup")
                .timestamp("20250101-1200")
                .request(split_units(&first, &[1000, 1000]))
        ),
        server.send_collect(
            UploadSpec::new("dup")
                .timestamp("20250101-1201")
                .request(split_units(&second, &[1000, 1000]))
        ),
    );

    let winner = match (a.0.status(), b.0.status()) {
        (StatusCode::OK, StatusCode::NOT_FOUND) => {
            assert_eq!(error_code(&b.1), "conflict");
            first
        }
        (StatusCode::NOT_FOUND, StatusCode::OK) => {
            assert_eq!(error_code(&a.1), "conflict");
            second
        }
        other => panic!("expected one OK and one conflict, got {other:?}"),
    };

    let (response, body) = server.send_collect(get_request("/v1/logs/get/dup")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body, winner);
}

#[tokio::test]
async fn test_concurrent_identical_uploads_have_one_winner() {
    let server = TestServer::new();
    let first = seeded_bytes(11, 3000);
    let second = seeded_bytes(12, 3000);

    // Same id, type and timestamp: both target the same chunk prefix.
    let (a, b) = tokio::join!(
        server.send_collect(UploadSpec::new("dup").request(split_units(&first, &[1000, 1000]))),
        server.send_collect(UploadSpec::new("dup").request(split_units(&second, &[1000, 1000]))),
    );

    let winner = match (a.0.status(), b.0.status()) {
        (StatusCode::OK, StatusCode::NOT_FOUND) => {
            assert_eq!(error_code(&b.1), "conflict");
            first
        }
        (StatusCode::NOT_FOUND, StatusCode::OK) => {
            assert_eq!(error_code(&a.1), "conflict");
            second
        }
        other => panic!("expected one OK and one conflict, got {other:?}"),
    };

    let (response, body) = server.send_collect(get_request("/v1/logs/get/dup")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body, winner);
}

#[tokio::test]
async fn test_chunk_write_failure_is_server_error() {
    let store = CountingStore::new(Arc::new(MemoryBackend::new()));
    let server = TestServer::with_store(store.clone(), |_| {});
    let data = seeded_bytes(21, 600);

    store.fail_sets(true);
    let (response, body) = server
        .send_collect(UploadSpec::new("broken-write").request(split_units(&data, &[200])))
        .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(error_code(&body), "storage_error");
    assert!(
        server
            .state
            .index
            .lookup(&LogId::parse("broken-write").unwrap())
            .await
            .unwrap()
            .is_none()
    );

    store.fail_sets(false);
    let (response, _) = server
        .send_collect(UploadSpec::new("broken-write").request(split_units(&data, &[200])))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_commit_failure_is_server_error_and_retryable() {
    let store = CountingStore::new(Arc::new(MemoryBackend::new()));
    let server = TestServer::with_store(store.clone(), |_| {});
    let lost = seeded_bytes(31, 900);
    let kept = seeded_bytes(32, 900);

    store.fail_commits(1);
    let (response, body) = server
        .send_collect(UploadSpec::new("retry-me").request(split_units(&lost, &[300, 300])))
        .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(error_code(&body), "storage_error");

    let (response, _) = server
        .send_collect(get_request("/v1/logs/get/retry-me"))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Identical headers: the failed attempt must not hold the prefix.
    let (response, body) = server
        .send_collect(UploadSpec::new("retry-me").request(split_units(&kept, &[300, 300])))
        .await;
    assert_eq!(response.status(), StatusCode::OK, "{body:?}");

    let (response, body) = server
        .send_collect(get_request("/v1/logs/get/retry-me"))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body, kept);
}

#[tokio::test]
async fn test_reupload_of_committed_id_conflicts() {
    let server = TestServer::new();
    let data = seeded_bytes(3, 100);

    let (response, _) = server
        .send_collect(UploadSpec::new("once").request(vec![data.clone()]))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    for timestamp in ["20250101-1200", "20250102-0900"] {
        let (response, body) = server
            .send_collect(
                UploadSpec::new("once")
                    .timestamp(timestamp)
                    .request(vec![Bytes::from_static(b"other")]),
            )
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{timestamp}");
        assert_eq!(error_code(&body), "conflict");
    }

    let (_, body) = server.send_collect(get_request("/v1/logs/get/once")).await;
    assert_eq!(body, data);
}

#[tokio::test]
async fn test_get_never_uploaded_is_not_found_without_side_effects() {
    let inner: Arc<dyn KeyValueStore> = Arc::new(MemoryBackend::new());
    let store = CountingStore::new(Arc::clone(&inner));
    let server = TestServer::with_store(store.clone(), |_| {});

    let (response, body) = server
        .send_collect(get_request("/v1/logs/get/never-uploaded"))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_code(&body), "not_found");

    // The index read is the only store access; nothing was written.
    assert_eq!(store.get_count(), 1);
    assert!(inner.list_prefix("logs/").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_expired_upload_reads_as_not_found() {
    let server = TestServer::with_config(|config| config.logs.retention_secs = 1);
    let (response, _) = server
        .send_collect(UploadSpec::new("short-lived").request(vec![seeded_bytes(4, 10)]))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    tokio::time::sleep(Duration::from_millis(1500)).await;

    // The index is still physically present; only the logical check hides it.
    assert!(
        server
            .state
            .store
            .get("logs/short-lived")
            .await
            .unwrap()
            .is_some()
    );
    let (response, body) = server
        .send_collect(get_request("/v1/logs/get/short-lived"))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_code(&body), "not_found");
}

#[tokio::test]
async fn test_empty_upload_round_trips() {
    let server = TestServer::new();
    let (response, _) = server
        .send_collect(UploadSpec::new("empty").request(vec![]))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let (response, body) = server.send_collect(get_request("/v1/logs/get/empty")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-length"], "0");
    assert!(body.is_empty());
}

#[tokio::test]
async fn test_invalid_upload_headers_are_rejected_before_reading_body() {
    let server = TestServer::new();
    let valid = [
        ("x-uuid", "hdr"),
        ("x-type", "build"),
        ("x-format", "pb-zst"),
        ("x-timestamp", "20250101-1200"),
    ];

    let mut cases: Vec<Vec<(&str, &str)>> = Vec::new();
    for skip in 0..valid.len() {
        cases.push(
            valid
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != skip)
                .map(|(_, h)| *h)
                .collect(),
        );
    }
    for (name, bad) in [
        ("x-format", "json"),
        ("x-timestamp", "20250101"),
        ("x-timestamp", "2025-01-01-1200"),
        ("x-timestamp", "-1200"),
        ("x-uuid", "a/b"),
        ("x-uuid", ""),
        ("x-type", "nested/type"),
    ] {
        cases.push(
            valid
                .iter()
                .map(|(n, v)| if *n == name { (*n, bad) } else { (*n, *v) })
                .collect(),
        );
    }

    for headers in cases {
        let mut builder = Request::builder().method("PUT").uri("/v1/logs/upload");
        for (name, value) in &headers {
            builder = builder.header(*name, *value);
        }
        let (response, body) = server
            .send_collect(builder.body(untouchable_body()).unwrap())
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{headers:?}");
        assert_eq!(error_code(&body), "bad_request");
    }

    assert!(server.state.store.list_prefix("logs/").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_accepted_format_is_configurable() {
    let server = TestServer::with_config(|config| config.logs.accepted_format = "json".into());

    let (response, _) = server
        .send_collect(UploadSpec::new("fmt").request(vec![Bytes::from_static(b"{}")]))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let (response, _) = server
        .send_collect(
            UploadSpec::new("fmt")
                .format("json")
                .request(vec![Bytes::from_static(b"{}")]),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_get_paths_must_be_a_single_segment() {
    let server = TestServer::new();
    for uri in [
        "/v1/logs/get/a/b",
        "/v1/logs/get/a/",
        "/v1/logs/get/",
        "/v1/logs/get",
        "/v1/logs/get/a%2Fb",
        "/v1/logs/get/latest",
    ] {
        let (response, body) = server.send_collect(get_request(uri)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(error_code(&body), "bad_request", "{uri}");
    }
}

#[tokio::test]
async fn test_unknown_paths_and_wrong_methods() {
    let server = TestServer::new();

    let response = server.send(get_request("/v1/nope")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = server.send(get_request("/v1/logs/upload")).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

    let request = Request::builder()
        .method("PUT")
        .uri("/v1/logs/get/abc")
        .body(Body::empty())
        .unwrap();
    let response = server.send(request).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_health_reports_backend() {
    let store = CountingStore::new(Arc::new(MemoryBackend::new()));
    let server = TestServer::with_store(store.clone(), |_| {});

    let (response, body) = server.send_collect(get_request("/v1/health")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["backend"], "counting");

    store.set_unreachable(true);
    let (response, body) = server.send_collect(get_request("/v1/health")).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(error_code(&body), "storage_error");
}

#[tokio::test]
async fn test_metrics_endpoint_follows_config() {
    let server = TestServer::new();
    let (response, _) = server
        .send_collect(UploadSpec::new("metered").request(vec![seeded_bytes(5, 64)]))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let (response, body) = server.send_collect(get_request("/metrics")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("chunklog_uploads_committed_total"));
    assert!(text.contains("chunklog_bytes_ingested_total"));

    let server = TestServer::with_config(|config| config.server.metrics_enabled = false);
    let response = server.send(get_request("/metrics")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_trace_id_is_echoed_or_generated() {
    let server = TestServer::new();

    let request = Request::builder()
        .uri("/v1/health")
        .header("x-trace-id", "client-trace-1")
        .body(Body::empty())
        .unwrap();
    let response = server.send(request).await;
    assert_eq!(response.headers()["x-trace-id"], "client-trace-1");

    let response = server.send(get_request("/v1/health")).await;
    let generated = response.headers()["x-trace-id"].to_str().unwrap();
    assert!(uuid::Uuid::parse_str(generated).is_ok());
}

#[tokio::test]
async fn test_home_page_subscribes_to_html_watch() {
    let server = TestServer::new();
    let (response, body) = server.send_collect(get_request("/")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/html")
    );
    let html = String::from_utf8(body.to_vec()).unwrap();
    assert!(html.contains(r#"sse-connect="/v1/logs/watch?fmt=html""#));
    assert!(html.contains(r#"sse-swap="logupload""#));
}
