//! HTTP surface integration tests.
//!
//! Drives the full router with a stub screenshot engine so no browser is
//! needed; everything else (store, pipeline, registry, scheduler) is real.

use anyhow::Result;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use hmac::{Hmac, Mac};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

use reviewcast::browser::ScreenshotEngine;
use reviewcast::config::{
    CompanyConfig, Config, FieldMapping, GenericSourceConfig, IngestionConfig, ServerConfig,
    SourcesConfig,
};
use reviewcast::render::ImageFormat;
use reviewcast::server::{build_router, AppState};

/// Deterministic engine: bytes carry the right magic for the format and a
/// digest of the document, so distinct renders produce distinct bytes.
struct StubEngine;

#[async_trait]
impl ScreenshotEngine for StubEngine {
    async fn capture(
        &self,
        html: &str,
        width: u32,
        height: u32,
        format: ImageFormat,
    ) -> Result<Vec<u8>> {
        let mut bytes = match format {
            ImageFormat::Png => vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A],
            ImageFormat::Jpeg => vec![0xFF, 0xD8, 0xFF, 0xE0],
        };
        let mut hasher = Sha256::new();
        hasher.update(html.as_bytes());
        hasher.update(width.to_be_bytes());
        hasher.update(height.to_be_bytes());
        bytes.extend_from_slice(&hasher.finalize());
        Ok(bytes)
    }

    async fn connected(&self) -> bool {
        true
    }

    async fn close(&self) {}
}

fn test_config(dir: &Path) -> Config {
    Config {
        company: CompanyConfig {
            name: "Acme Plumbing".into(),
            phone: "(555) 123-4567".into(),
            brand_color: "#2563eb".into(),
            brand_color_dark: "#1e40af".into(),
            logo_url: "/logo.png".into(),
        },
        server: ServerConfig {
            port: 3000,
            base_url: None,
            templates_dir: "./templates".into(),
            technicians_dir: dir.join("technicians"),
        },
        chat: None,
        ingestion: IngestionConfig {
            enabled: true,
            auto_generate: false,
            auto_share: false,
            min_rating_for_auto_share: 4,
            default_template: "default".into(),
            default_size: "square".into(),
            poll_interval_minutes: 30,
            data_path: dir.join("reviews.json"),
            max_review_age_days: 90,
            sources: SourcesConfig::default(),
            generic: GenericSourceConfig {
                webhook_secret: Some("s".into()),
                field_mapping: FieldMapping::default(),
            },
        },
    }
}

async fn test_state(dir: &TempDir) -> AppState {
    AppState::build(test_config(dir.path()), Arc::new(StubEngine))
        .await
        .expect("state builds")
}

async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let response = build_router(state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.into_body().collect().await.unwrap().to_bytes().to_vec();
    (status, headers, body)
}

fn json_post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn health_reports_browser_and_uptime() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir).await;

    let (status, _, body) = send(&state, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["browser_connected"], true);
    assert!(json["uptime_seconds"].is_u64());
}

#[tokio::test]
async fn generate_returns_square_png_with_headers() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir).await;

    let (status, headers, body) = send(
        &state,
        json_post(
            "/generate",
            json!({"reviewer_name": "Jane D.", "rating": 5, "review_text": "Excellent"}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["content-type"], "image/png");
    assert_eq!(headers["x-image-width"], "1080");
    assert_eq!(headers["x-image-height"], "1080");
    assert!(headers.contains_key("x-generation-time-ms"));
    assert!(!headers.contains_key("x-cache"));
    assert_eq!(&body[..4], &[0x89, 0x50, 0x4E, 0x47]);
}

#[tokio::test]
async fn repeated_generate_hits_cache_with_identical_bytes() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir).await;
    let body = json!({"reviewer_name": "Jane D.", "rating": 5, "review_text": "Excellent"});

    let (_, first_headers, first_body) = send(&state, json_post("/generate", body.clone())).await;
    let (status, second_headers, second_body) = send(&state, json_post("/generate", body)).await;

    assert_eq!(status, StatusCode::OK);
    assert!(!first_headers.contains_key("x-cache"));
    assert_eq!(second_headers["x-cache"], "HIT");
    assert_eq!(first_body, second_body);
}

#[tokio::test]
async fn generate_landscape_jpeg() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir).await;

    let (status, headers, body) = send(
        &state,
        json_post(
            "/generate",
            json!({
                "reviewer_name": "Jane D.",
                "rating": 4,
                "review_text": "Nice",
                "size": "landscape",
                "format": "jpeg"
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["content-type"], "image/jpeg");
    assert_eq!(headers["x-image-width"], "1200");
    assert_eq!(headers["x-image-height"], "630");
    assert_eq!(&body[..2], &[0xFF, 0xD8]);
}

#[tokio::test]
async fn generate_via_query_string() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir).await;

    let (status, headers, _) = send(
        &state,
        get("/generate?reviewer_name=Jane%20D.&rating=5&review_text=Great&size=story"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["x-image-width"], "1080");
    assert_eq!(headers["x-image-height"], "1920");
}

#[tokio::test]
async fn generate_rejects_out_of_range_rating() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir).await;

    for rating in [0, 6, 99] {
        let (status, _, body) = send(
            &state,
            json_post(
                "/generate",
                json!({"reviewer_name": "Jane", "rating": rating, "review_text": "x"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "rating {rating}");
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["details"][0]["field"], "rating");
    }
}

#[tokio::test]
async fn generate_rejects_unknown_size_and_missing_name() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir).await;

    let (status, _, _) = send(
        &state,
        json_post(
            "/generate",
            json!({"reviewer_name": "Jane", "rating": 5, "size": "banner"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, _) = send(
        &state,
        json_post("/generate", json!({"rating": 5, "review_text": "x"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn generate_with_callback_is_accepted_immediately() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir).await;

    let (status, _, body) = send(
        &state,
        json_post(
            "/generate",
            json!({
                "reviewer_name": "Jane",
                "rating": 5,
                "review_text": "x",
                "callback_url": "http://127.0.0.1:9/callback"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["accepted"], true);
}

#[tokio::test]
async fn batch_preserves_order_and_encodes_images() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir).await;

    let (status, _, body) = send(
        &state,
        json_post(
            "/generate/batch",
            json!({"reviews": [
                {"reviewer_name": "A", "rating": 5, "review_text": "First"},
                {"reviewer_name": "B", "rating": 4, "review_text": "Second"}
            ]}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    let results = json["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["index"], 0);
    assert_eq!(results[1]["index"], 1);
    for item in results {
        assert_eq!(item["success"], true);
        assert!(!item["image"].as_str().unwrap().is_empty());
    }
}

#[tokio::test]
async fn batch_rejects_empty_and_oversize() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir).await;

    let (status, _, _) = send(&state, json_post("/generate/batch", json!({"reviews": []}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let too_many: Vec<Value> = (0..21)
        .map(|i| json!({"reviewer_name": format!("R{i}"), "rating": 5, "review_text": "x"}))
        .collect();
    let (status, _, _) = send(
        &state,
        json_post("/generate/batch", json!({"reviews": too_many})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn sizes_templates_platforms_config_catalogs() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir).await;

    let (status, _, body) = send(&state, get("/api/sizes")).await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["sizes"]["square"]["width"], 1080);
    assert_eq!(json["sizes"]["landscape"]["height"], 630);

    let (_, _, body) = send(&state, get("/api/templates")).await;
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert!(json["templates"]
        .as_array()
        .unwrap()
        .iter()
        .any(|t| t == "default"));

    let (_, _, body) = send(&state, get("/api/platforms")).await;
    let json: Value = serde_json::from_slice(&body).unwrap();
    let keys: Vec<&str> = json["platforms"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["key"].as_str().unwrap())
        .collect();
    assert!(keys.contains(&"google"));
    assert!(keys.contains(&"yelp"));
    assert!(keys.contains(&"facebook"));

    let (_, _, body) = send(&state, get("/api/config")).await;
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["company"]["name"], "Acme Plumbing");
}

#[tokio::test]
async fn import_json_then_replay_counts_duplicates() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir).await;
    let body = json!({"source": "x", "reviews": [
        {"reviewer_name": "A", "rating": 5, "review_text": "T"}
    ]});

    let (status, _, response) = send(&state, json_post("/api/ingestion/import", body.clone())).await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&response).unwrap();
    assert_eq!(json["imported"], 1);
    assert_eq!(json["duplicates"], 0);

    let (_, _, response) = send(&state, json_post("/api/ingestion/import", body)).await;
    let json: Value = serde_json::from_slice(&response).unwrap();
    assert_eq!(json["imported"], 0);
    assert_eq!(json["duplicates"], 1);
}

#[tokio::test]
async fn import_csv_by_content_type() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir).await;

    let csv = "reviewer_name,rating,review_text\nJane D.,5,Wonderful\n";
    let request = Request::builder()
        .method("POST")
        .uri("/api/ingestion/import")
        .header("content-type", "text/csv")
        .body(Body::from(csv))
        .unwrap();
    let (status, _, body) = send(&state, request).await;

    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["imported"], 1);

    let (_, _, body) = send(&state, get("/api/ingestion/reviews?source=import")).await;
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["count"], 1);
    assert_eq!(json["reviews"][0]["reviewer_name"], "Jane D.");
}

fn webhook_signature(secret: &str, body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

#[tokio::test]
async fn webhook_accepts_valid_signature_and_rejects_tampering() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir).await;
    let body = json!([{"reviewer_name": "A", "rating": 5, "review_text": "B"}]).to_string();
    let signature = webhook_signature("s", body.as_bytes());

    let request = Request::builder()
        .method("POST")
        .uri("/api/ingestion/webhook/generic")
        .header("content-type", "application/json")
        .header("x-hub-signature-256", &signature)
        .body(Body::from(body.clone()))
        .unwrap();
    let (status, _, response) = send(&state, request).await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&response).unwrap();
    assert_eq!(json["accepted"], true);
    assert_eq!(json["new"], 1);

    // One flipped byte in the signature -> 401.
    let mut bad = signature.clone().into_bytes();
    let last = bad.last_mut().unwrap();
    *last = if *last == b'0' { b'1' } else { b'0' };
    let request = Request::builder()
        .method("POST")
        .uri("/api/ingestion/webhook/generic")
        .header("content-type", "application/json")
        .header("x-hub-signature-256", String::from_utf8(bad).unwrap())
        .body(Body::from(body.clone()))
        .unwrap();
    let (status, _, _) = send(&state, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Missing header -> 401 too.
    let request = Request::builder()
        .method("POST")
        .uri("/api/ingestion/webhook/generic")
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap();
    let (status, _, _) = send(&state, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn webhook_alternate_header_and_verification_echo() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir).await;
    let body = json!([{"reviewer_name": "C", "rating": 4, "review_text": "D"}]).to_string();

    let request = Request::builder()
        .method("POST")
        .uri("/api/ingestion/webhook/generic")
        .header("content-type", "application/json")
        .header("x-signature-256", webhook_signature("s", body.as_bytes()))
        .body(Body::from(body))
        .unwrap();
    let (status, _, _) = send(&state, request).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, body) = send(
        &state,
        get("/api/ingestion/webhook/generic?verification=challenge-123"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"challenge-123");
}

#[tokio::test]
async fn webhook_unknown_source_is_404() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir).await;

    let (status, _, _) = send(
        &state,
        json_post("/api/ingestion/webhook/nope", json!([{"rating": 5}])),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn stored_review_generate_marks_flag_and_unknown_is_404() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir).await;

    let import = json!({"source": "x", "reviews": [
        {"id": "r9", "reviewer_name": "A", "rating": 5, "review_text": "T"}
    ]});
    send(&state, json_post("/api/ingestion/import", import)).await;

    let (status, headers, _) = send(
        &state,
        json_post("/api/ingestion/reviews/x:r9/generate", json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["content-type"], "image/png");

    let (_, _, body) = send(&state, get("/api/ingestion/reviews?source=x")).await;
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["reviews"][0]["image_generated"], true);

    let (status, _, _) = send(
        &state,
        json_post("/api/ingestion/reviews/x:missing/generate", json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn chat_endpoints_report_unconfigured() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir).await;

    let (status, _, body) = send(&state, get("/api/chat/status")).await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["configured"], false);

    let (status, _, _) = send(
        &state,
        json_post(
            "/api/share/chat",
            json!({"reviewer_name": "A", "rating": 5, "review_text": "T"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn ingestion_status_lists_sources() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir).await;

    let (status, _, body) = send(&state, get("/api/ingestion/status")).await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["enabled"], true);
    let sources = json["sources"].as_array().unwrap();
    assert!(sources.iter().any(|s| s["source"] == "generic"));
}

#[tokio::test]
async fn manual_poll_unknown_source_is_404() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir).await;

    let (status, _, _) = send(&state, json_post("/api/ingestion/poll/nope", json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn technician_upload_and_listing() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir).await;

    let png = vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 1, 2, 3];
    let request = Request::builder()
        .method("POST")
        .uri("/api/technicians/upload?name=mike")
        .body(Body::from(png))
        .unwrap();
    let (status, _, body) = send(&state, request).await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["url"], "/technicians/mike.png");

    let (_, _, body) = send(&state, get("/api/technicians")).await;
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["technicians"][0]["name"], "mike.png");

    // Garbage bytes are rejected.
    let request = Request::builder()
        .method("POST")
        .uri("/api/technicians/upload?name=bad")
        .body(Body::from(vec![0u8; 16]))
        .unwrap();
    let (status, _, _) = send(&state, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
