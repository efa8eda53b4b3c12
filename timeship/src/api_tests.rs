//! End-to-end exercises of the HTTP surface over real directory trees.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{HeaderMap, Method, Request, StatusCode, header};
use chrono::NaiveDate;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use crate::config::Settings;
use crate::http::{AppState, router};
use crate::storage::StorageRegistry;
use crate::storage::local::LocalStorage;

fn app(root: &Path) -> Router {
    let settings = Settings {
        root: root.to_path_buf(),
        address: ":0".to_string(),
        api_prefix: "/api".to_string(),
        cors_allowed_origins: vec!["http://localhost:8080".to_string()],
    };
    let local = LocalStorage::open(root).unwrap();
    let mut registry = StorageRegistry::new("local");
    registry.register("local", Arc::new(local));
    router(AppState {
        registry: Arc::new(registry),
        settings: Arc::new(settings),
    })
}

async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    accept: Option<&str>,
) -> (StatusCode, HeaderMap, Vec<u8>) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(accept) = accept {
        builder = builder.header(header::ACCEPT, accept);
    }
    let request = builder.body(Body::empty()).unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec();
    (status, headers, body)
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let (status, _, body) = send(app, Method::GET, uri, Some("application/json")).await;
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

fn utc_timestamp(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> i64 {
    NaiveDate::from_ymd_opt(y, mo, d)
        .unwrap()
        .and_hms_opt(h, mi, s)
        .unwrap()
        .and_utc()
        .timestamp()
}

#[tokio::test]
async fn directory_listing_with_mixed_entries() {
    let tmp = TempDir::new().unwrap();
    fs::create_dir(tmp.path().join("subdir")).unwrap();
    fs::write(tmp.path().join("file1.txt"), b"contents").unwrap();
    fs::write(tmp.path().join("file2.md"), b"# header").unwrap();
    let app = app(tmp.path());

    let (status, body) = get_json(&app, "/api/storages/local/nodes").await;
    assert_eq!(status, StatusCode::OK);

    let files = body["files"].as_array().unwrap();
    assert_eq!(files.len(), 3);
    let names: Vec<_> = files
        .iter()
        .map(|f| f["basename"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["subdir", "file1.txt", "file2.md"]);

    assert_eq!(files[0]["type"], "dir");
    assert_eq!(files[1]["extension"], "txt");
    assert_eq!(files[1]["file_size"], 8);
    assert!(
        files[1]["mime_type"]
            .as_str()
            .unwrap()
            .starts_with("text/plain")
    );

    assert_eq!(body["dirname"], "local://");
    assert_eq!(body["read_only"], true);
    assert_eq!(body["storages"], serde_json::json!(["local"]));
}

#[tokio::test]
async fn traversal_is_refused() {
    let outer = TempDir::new().unwrap();
    let root = outer.path().join("root");
    fs::create_dir(&root).unwrap();
    fs::write(root.join("inside.txt"), b"inside").unwrap();
    fs::write(outer.path().join("outside.txt"), b"secret outside").unwrap();
    let app = app(&root);

    let (status, _, body) = send(
        &app,
        Method::GET,
        "/api/storages/local/nodes/../outside.txt",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let text = String::from_utf8_lossy(&body);
    assert!(!text.contains("outside.txt"), "body leaked: {text}");
    assert!(!text.contains("secret"));
}

#[tokio::test]
async fn file_streaming_with_download_flag() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("test.txt"), b"Hello, World!").unwrap();
    let app = app(tmp.path());

    let (status, headers, body) = send(
        &app,
        Method::GET,
        "/api/storages/local/nodes/test.txt?download=true",
        Some("application/octet-stream"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"Hello, World!");
    assert_eq!(
        headers.get(header::CONTENT_TYPE).unwrap(),
        "text/plain; charset=utf-8"
    );
    assert_eq!(headers.get(header::CONTENT_LENGTH).unwrap(), "13");
    assert!(
        headers
            .get(header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .unwrap()
            .starts_with("attachment")
    );
}

#[tokio::test]
async fn file_metadata_as_json() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("test.txt"), b"Hello, World!").unwrap();
    let app = app(tmp.path());

    let (status, body) = get_json(&app, "/api/storages/local/nodes/test.txt").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["path"], "test.txt");
    assert_eq!(body["type"], "file");
    assert_eq!(body["basename"], "test.txt");
    assert_eq!(body["extension"], "txt");
    assert_eq!(body["file_size"], 13);
    assert!(
        body["mime_type"]
            .as_str()
            .unwrap()
            .starts_with("text/plain")
    );
}

#[tokio::test]
async fn snapshot_enumeration_is_newest_first() {
    let tmp = TempDir::new().unwrap();
    let sidecar = tmp.path().join(".zfs/snapshot");
    fs::create_dir_all(sidecar.join("auto-daily-2025-11-09_00-00")).unwrap();
    fs::create_dir_all(sidecar.join("auto-hourly-2025-11-09_13-30")).unwrap();
    let app = app(tmp.path());

    let (status, body) = get_json(&app, "/api/storages/local/snapshots").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["storage"], "local");
    assert_eq!(body["path"], "");

    let snapshots = body["snapshots"].as_array().unwrap();
    assert_eq!(snapshots.len(), 2);
    assert_eq!(snapshots[0]["id"], "zfs:auto-hourly-2025-11-09_13-30");
    assert_eq!(snapshots[1]["id"], "zfs:auto-daily-2025-11-09_00-00");
    assert_eq!(
        snapshots[0]["timestamp"].as_i64().unwrap(),
        utc_timestamp(2025, 11, 9, 13, 30, 0)
    );
    assert_eq!(
        snapshots[1]["timestamp"].as_i64().unwrap(),
        utc_timestamp(2025, 11, 9, 0, 0, 0)
    );
    assert_eq!(snapshots[0]["type"], "zfs");
}

#[tokio::test]
async fn snapshot_scoped_listing_sees_deleted_paths() {
    let tmp = TempDir::new().unwrap();
    let snap = tmp.path().join(".zfs/snapshot/auto-daily-2025-11-09_00-00");
    fs::create_dir_all(snap.join("docs")).unwrap();
    fs::write(snap.join("docs/note.txt"), b"old").unwrap();
    // The live tree never had docs/.
    let app = app(tmp.path());

    let (status, body) = get_json(
        &app,
        "/api/storages/local/nodes/docs?snapshot=zfs:auto-daily-2025-11-09_00-00",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let files = body["files"].as_array().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0]["basename"], "note.txt");
    assert_eq!(files[0]["path"], "docs/note.txt");

    let (status, _) = get_json(&app, "/api/storages/local/nodes/docs").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_storage_yields_the_error_envelope() {
    let tmp = TempDir::new().unwrap();
    let app = app(tmp.path());

    let (status, headers, body) = send(
        &app,
        Method::GET,
        "/api/storages/does-not-exist/nodes",
        Some("application/json"),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(
        headers.get(header::CONTENT_TYPE).unwrap(),
        "application/problem+json"
    );
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], false);
    assert!(json["message"].as_str().unwrap().contains("Storage Not Found"));
}

#[tokio::test]
async fn root_listing_is_identical_for_all_root_spellings() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("a.txt"), b"a").unwrap();
    let app = app(tmp.path());

    let (s1, b1) = get_json(&app, "/api/storages/local/nodes").await;
    let (s2, b2) = get_json(&app, "/api/storages/local/nodes/").await;
    let (s3, b3) = get_json(&app, "/api/storages/local/nodes/.").await;
    assert_eq!(s1, StatusCode::OK);
    assert_eq!(s2, StatusCode::OK);
    assert_eq!(s3, StatusCode::OK);
    assert_eq!(b1, b2);
    assert_eq!(b1, b3);
}

#[tokio::test]
async fn concurrent_listings_are_deterministic() {
    let tmp = TempDir::new().unwrap();
    fs::create_dir(tmp.path().join("dir")).unwrap();
    for name in ["b.txt", "a.txt", "c.txt"] {
        fs::write(tmp.path().join(name), b"x").unwrap();
    }
    let app = app(tmp.path());

    let (first, second) = tokio::join!(
        get_json(&app, "/api/storages/local/nodes"),
        get_json(&app, "/api/storages/local/nodes"),
    );
    assert_eq!(first.1, second.1);

    let names: Vec<_> = first.1["files"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["basename"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["dir", "a.txt", "b.txt", "c.txt"]);
}

#[tokio::test]
async fn listing_filters_and_total_size() {
    let tmp = TempDir::new().unwrap();
    fs::create_dir(tmp.path().join("nested")).unwrap();
    fs::write(tmp.path().join("nested/deep.bin"), vec![0u8; 40]).unwrap();
    fs::write(tmp.path().join("report.pdf"), b"%PDF-1.7 x").unwrap();
    fs::write(tmp.path().join("README.md"), b"hello").unwrap();
    let app = app(tmp.path());

    let (_, body) = get_json(&app, "/api/storages/local/nodes?type=file").await;
    assert!(
        body["files"]
            .as_array()
            .unwrap()
            .iter()
            .all(|f| f["type"] == "file")
    );

    let (_, body) = get_json(&app, "/api/storages/local/nodes?filter=*port*").await;
    let files = body["files"].as_array().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0]["basename"], "report.pdf");

    let (_, body) = get_json(&app, "/api/storages/local/nodes?search=readme").await;
    let files = body["files"].as_array().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0]["basename"], "README.md");

    let (_, body) = get_json(&app, "/api/storages/local/nodes?fields=(total_size)").await;
    assert_eq!(body["total_size"].as_u64().unwrap(), 55);

    let (status, body) = get_json(&app, "/api/storages/local/nodes?type=bogus").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], false);
}

#[tokio::test]
async fn snapshot_pagination() {
    let tmp = TempDir::new().unwrap();
    let sidecar = tmp.path().join(".zfs/snapshot");
    for day in 1..=5 {
        fs::create_dir_all(sidecar.join(format!("daily-2025-11-{day:02}"))).unwrap();
    }
    let app = app(tmp.path());

    let (_, body) = get_json(&app, "/api/storages/local/snapshots?limit=2&offset=1").await;
    let snapshots = body["snapshots"].as_array().unwrap();
    assert_eq!(snapshots.len(), 2);
    // Newest first overall; offset 1 skips 11-05.
    assert_eq!(snapshots[0]["id"], "zfs:daily-2025-11-04");
    assert_eq!(snapshots[1]["id"], "zfs:daily-2025-11-03");

    let (status, _) = get_json(&app, "/api/storages/local/snapshots?limit=abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn snapshots_for_paths_without_sidecar_are_empty() {
    let tmp = TempDir::new().unwrap();
    fs::create_dir(tmp.path().join("docs")).unwrap();
    let app = app(tmp.path());

    let (status, body) = get_json(&app, "/api/storages/local/snapshots/docs").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["path"], "docs");
    assert_eq!(body["snapshots"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn snapshot_file_metadata_and_stream() {
    let tmp = TempDir::new().unwrap();
    let snap = tmp.path().join(".zfs/snapshot/daily-2025-11-09");
    fs::create_dir_all(&snap).unwrap();
    fs::write(snap.join("note.txt"), b"old contents").unwrap();
    fs::write(tmp.path().join("note.txt"), b"new").unwrap();
    let app = app(tmp.path());

    // Live file.
    let (_, headers, body) = send(
        &app,
        Method::GET,
        "/api/storages/local/nodes/note.txt",
        None,
    )
    .await;
    assert_eq!(body, b"new");
    assert_eq!(headers.get(header::CONTENT_LENGTH).unwrap(), "3");

    // Same path as of the snapshot.
    let (status, headers, body) = send(
        &app,
        Method::GET,
        "/api/storages/local/nodes/note.txt?snapshot=zfs:daily-2025-11-09",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"old contents");
    assert_eq!(headers.get(header::CONTENT_LENGTH).unwrap(), "12");

    // Malformed snapshot id.
    let (status, _, _) = send(
        &app,
        Method::GET,
        "/api/storages/local/nodes/note.txt?snapshot=bogus",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Snapshot name that does not exist under the sidecar.
    let (status, _, _) = send(
        &app,
        Method::GET,
        "/api/storages/local/nodes/note.txt?snapshot=zfs:missing",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn reserved_write_endpoints_return_501() {
    let tmp = TempDir::new().unwrap();
    let app = app(tmp.path());

    let cases = [
        (Method::POST, "/api/storages/local/nodes"),
        (Method::POST, "/api/storages/local/nodes/new.txt"),
        (Method::DELETE, "/api/storages/local/nodes/x.txt"),
        (Method::PATCH, "/api/storages/local/nodes/x.txt"),
        (Method::POST, "/api/storages/local/copies"),
        (Method::POST, "/api/storages/local/moves"),
        (Method::GET, "/api/storages/local/archives"),
        (Method::POST, "/api/storages/local/archives/x.zip"),
    ];
    for (method, uri) in cases {
        let (status, headers, body) = send(&app, method.clone(), uri, None).await;
        assert_eq!(status, StatusCode::NOT_IMPLEMENTED, "{method} {uri}");
        assert_eq!(
            headers.get(header::CONTENT_TYPE).unwrap(),
            "application/problem+json"
        );
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], false);
        assert!(json["message"].as_str().unwrap().contains("Not Implemented"));
    }
}

#[tokio::test]
async fn storages_index_is_sorted() {
    let tmp = TempDir::new().unwrap();
    let app = app(tmp.path());
    let (status, body) = get_json(&app, "/api/storages").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["storages"], serde_json::json!(["local"]));
}

#[tokio::test]
async fn cors_preflight_and_response_headers() {
    let tmp = TempDir::new().unwrap();
    let app = app(tmp.path());

    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/api/storages")
        .header(header::ORIGIN, "http://localhost:8080")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .unwrap(),
        "http://localhost:8080"
    );

    let request = Request::builder()
        .method(Method::GET)
        .uri("/api/storages")
        .header(header::ORIGIN, "http://evil.example")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none()
    );
}

#[tokio::test]
async fn requests_outside_the_api_prefix_fall_through() {
    let tmp = TempDir::new().unwrap();
    let app = app(tmp.path());
    let (status, headers, _) = send(&app, Method::GET, "/storages", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(
        headers.get(header::CONTENT_TYPE).unwrap(),
        "application/problem+json"
    );
}
