//! Router tests for the ingester service, run against the in-memory store.

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::Value;
use tower::ServiceExt;

use ingester::{auth::USER_HEADER, build_router, AppState, IngesterConfig};
use storage::{MemoryStore, PhotometryStore};
use test_utils::{flux_csv, new_space_object, sample_flux_csv, FluxRowSpec, StagingFixture};

const BOUNDARY: &str = "X-FLUX-BOUNDARY";

struct TestApp {
    fixture: StagingFixture,
    store: Arc<MemoryStore>,
    router: Router,
}

impl TestApp {
    fn new() -> Self {
        let fixture = StagingFixture::new();
        let store = Arc::new(MemoryStore::new());
        let config = IngesterConfig {
            database_url: String::new(),
            staging_root: fixture.root().to_path_buf(),
            event_channel_capacity: 4,
            max_upload_bytes: 1024 * 1024,
        };
        let state = AppState::new(store.clone(), &config, None).unwrap();
        Self {
            fixture,
            store,
            router: build_router(Arc::new(state)),
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, String) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    async fn get(&self, uri: &str) -> (StatusCode, String) {
        self.send(
            Request::get(uri)
                .header(USER_HEADER, "observer")
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    async fn upload(&self, file_name: &str, dir_name: &str, content: &str) -> (StatusCode, String) {
        let body = format!("{}{}--{}--\r\n", dir_part(dir_name), file_part(file_name, content), BOUNDARY);
        self.send_multipart(body).await
    }

    async fn send_multipart(&self, body: String) -> (StatusCode, String) {
        self.send(
            Request::post("/upload/save")
                .header(USER_HEADER, "observer")
                .header(
                    "content-type",
                    format!("multipart/form-data; boundary={}", BOUNDARY),
                )
                .body(Body::from(body))
                .unwrap(),
        )
        .await
    }
}

fn dir_part(dir_name: &str) -> String {
    format!(
        "--{}\r\nContent-Disposition: form-data; name=\"dir-name\"\r\n\r\n{}\r\n",
        BOUNDARY, dir_name
    )
}

fn file_part(file_name: &str, content: &str) -> String {
    format!(
        "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\nContent-Type: text/csv\r\n\r\n{}\r\n",
        BOUNDARY, file_name, content
    )
}

fn parse_uri(path: &str, count: u32) -> String {
    format!("/upload/parse?path-to-dir={}&file-count={}", encode(path), count)
}

/// (event, data) pairs of a server-sent event body, skipping comments.
fn sse_events(body: &str) -> Vec<(String, String)> {
    body.split("\n\n")
        .filter_map(|block| {
            let mut event = None;
            let mut data = None;
            for line in block.lines() {
                if let Some(value) = line.strip_prefix("event:") {
                    event = Some(value.trim().to_string());
                } else if let Some(value) = line.strip_prefix("data:") {
                    data = Some(value.trim().to_string());
                }
            }
            Some((event?, data?))
        })
        .collect()
}

/// Percent-encode a path for a query string.
fn encode(value: &str) -> String {
    value
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (b as char).to_string()
            }
            _ => format!("%{:02X}", b),
        })
        .collect()
}

#[tokio::test]
async fn test_health() {
    let app = TestApp::new();
    let (status, body) = app.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "OK");
}

#[tokio::test]
async fn test_upload_then_parse_streams_events() {
    let app = TestApp::new();

    let (status, dir) = app.upload("file1", "create_new", &sample_flux_csv(&["1"])).await;
    assert_eq!(status, StatusCode::OK);
    assert!(dir.starts_with(&app.fixture.root().display().to_string()));

    let bad = flux_csv(&[FluxRowSpec::sample("2").with_ap_auto("bright")]);
    let (status, again) = app.upload("file2", &dir, &bad).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again, dir);
    app.upload("file3", &dir, &sample_flux_csv(&["3"])).await;

    let (status, body) = app.get(&parse_uri(&dir, 3)).await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(
        sse_events(&body),
        vec![
            ("FILE_STORED".to_string(), "file1".to_string()),
            ("FILE_STORED".to_string(), "file3".to_string()),
            ("COMPLETED".to_string(), "1".to_string()),
        ]
    );

    let (status, logs) = app.get("/upload/logs").await;
    assert_eq!(status, StatusCode::OK);
    let logs: Value = serde_json::from_str(&logs).unwrap();
    assert_eq!(logs[0]["file_count"], 3);
    assert_eq!(logs[0]["failed_count"], 1);
    assert_eq!(logs[0]["errors"][0]["file_name"], "file2");
}

#[tokio::test]
async fn test_upload_requires_user() {
    let app = TestApp::new();
    let (status, _) = app
        .send(Request::get("/upload/logs").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_upload_rejects_destination_outside_root() {
    let app = TestApp::new();
    let outside = tempfile::tempdir().unwrap();

    let (status, body) = app
        .upload("file1", outside.path().to_str().unwrap(), "x")
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("not correct"));
    assert!(!outside.path().join("file1").exists());
}

#[tokio::test]
async fn test_upload_without_file_field() {
    let app = TestApp::new();
    let body = format!("{}--{}--\r\n", dir_part("create_new"), BOUNDARY);
    let (status, _) = app.send_multipart(body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_upload_needs_destination_before_file() {
    let app = TestApp::new();
    let body = format!(
        "{}{}--{}--\r\n",
        file_part("file1", &sample_flux_csv(&["1"])),
        dir_part("create_new"),
        BOUNDARY
    );
    let (status, body) = app.send_multipart(body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("must come before"));
    assert_eq!(std::fs::read_dir(app.fixture.root()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_large_upload_is_written_whole() {
    let app = TestApp::new();
    let ids: Vec<String> = (0..2000).map(|i| format!("426-{:06}", i)).collect();
    let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
    let content = sample_flux_csv(&ids);

    let (status, dir) = app.upload("big.csv", "create_new", &content).await;
    assert_eq!(status, StatusCode::OK);
    let written = std::fs::read_to_string(std::path::Path::new(&dir).join("big.csv")).unwrap();
    assert_eq!(written, content);
}

#[tokio::test]
async fn test_parse_outside_root_writes_no_log() {
    let app = TestApp::new();
    let outside = tempfile::tempdir().unwrap();

    // The stream ends with an error, so the body cannot be read to the end.
    let response = app
        .router
        .clone()
        .oneshot(
            Request::get(parse_uri(outside.path().to_str().unwrap(), 1))
                .header(USER_HEADER, "observer")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(to_bytes(response.into_body(), usize::MAX).await.is_err());

    let logs = app
        .store
        .upload_logs_for_user(&flux_common::UserId::new("observer"))
        .await
        .unwrap();
    assert!(logs.is_empty());
}

#[tokio::test]
async fn test_search_and_object_reads() {
    let app = TestApp::new();
    let id = app
        .store
        .resolve_or_create(&new_space_object("UCAC4", "426-000001", 83.82, -5.39, 11.2))
        .await
        .unwrap();
    app.store
        .resolve_or_create(&new_space_object("APASS", "A-77", 10.0, 40.0, 14.0))
        .await
        .unwrap();

    let (status, body) = app.get("/objects/search").await;
    assert_eq!(status, StatusCode::OK);
    let all: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(all.as_array().unwrap().len(), 2);

    let (_, body) = app
        .get("/objects/search?ra=83.8&dec=-5.4&radius=0.5&name=&min-mag=&max-mag=&catalog=&object-id=")
        .await;
    let near: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(near.as_array().unwrap().len(), 1);
    assert_eq!(near[0]["catalog_id"], "426-000001");
    assert_eq!(near[0]["flux_count"], 0);

    let (_, body) = app.get("/objects/search?catalog=APASS").await;
    let apass: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(apass[0]["catalog"], "APASS");

    let (status, _) = app.get("/objects/search?ra=10&radius=1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = app.get("/objects/catalogs").await;
    let catalogs: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(catalogs, serde_json::json!(["APASS", "UCAC4"]));

    let (_, body) = app.get("/objects/count").await;
    let count: Value = serde_json::from_str(&body).unwrap();
    assert!(count["estimate"].as_u64().is_some());

    let (status, body) = app.get(&format!("/objects/{}", id)).await;
    assert_eq!(status, StatusCode::OK);
    let object: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(object["catalog"], "UCAC4");

    let (status, _) = app.get("/objects/9999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_fluxes_render_saturation() {
    let app = TestApp::new();
    let row = FluxRowSpec::sample("5").with_ap_auto("0");
    let (_, dir) = app.upload("night.csv", "create_new", &flux_csv(&[row])).await;
    app.get(&parse_uri(&dir, 1)).await;

    let (_, body) = app.get("/objects/search?object-id=5").await;
    let found: Value = serde_json::from_str(&body).unwrap();
    let id = found[0]["id"].as_i64().unwrap();

    let (status, body) = app.get(&format!("/objects/{}/fluxes", id)).await;
    assert_eq!(status, StatusCode::OK);
    let fluxes: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(fluxes[0]["ap_auto"], "saturated");
    assert_eq!(fluxes[0]["apertures"][0], 9021.25);

    let (status, _) = app.get("/objects/9999/fluxes").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_metrics_without_recorder_is_empty() {
    let app = TestApp::new();
    let (status, body) = app.get("/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_empty());
}
