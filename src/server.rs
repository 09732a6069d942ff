//! HTTP surface.
//!
//! Thin routing and validation over the store, registry, scheduler, render
//! coordinator, pipeline, and chat client. Every handler either rejects the
//! request with a structured error or delegates; no business logic lives
//! here.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Uptime and browser connectivity |
//! | `GET`  | `/api/config` | Public configuration (company block) |
//! | `GET`  | `/api/templates` | Available template names |
//! | `GET`  | `/api/sizes` | Size preset map |
//! | `GET`  | `/api/platforms` | Platform badge keys, labels, colours |
//! | `GET`  | `/api/technicians` | Stored technician photos |
//! | `POST` | `/api/technicians/upload` | Store a technician photo |
//! | `POST` | `/generate` | Render one review image |
//! | `GET`  | `/generate` | Same, via query string |
//! | `POST` | `/generate/batch` | Render up to 20 images |
//! | `GET`  | `/api/chat/status` | Chat integration status |
//! | `POST` | `/api/share/chat` | Render then upload to chat |
//! | `GET`  | `/api/ingestion/status` | Store stats and per-source state |
//! | `GET`  | `/api/ingestion/reviews` | Recent stored reviews |
//! | `POST` | `/api/ingestion/poll` | Poll every enabled source |
//! | `POST` | `/api/ingestion/poll/:source` | Poll one source |
//! | `GET`  | `/api/ingestion/webhook/:source` | Verification handshake |
//! | `POST` | `/api/ingestion/webhook/:source` | Signed webhook ingress |
//! | `POST` | `/api/ingestion/import` | JSON or CSV review import |
//! | `POST` | `/api/ingestion/reviews/:id/generate` | Render a stored review |
//! | `POST` | `/api/ingestion/reviews/:id/share` | Render and share a stored review |

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::Sha256;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::browser::{ChromiumEngine, ScreenshotEngine};
use crate::chat::ChatClient;
use crate::config::Config;
use crate::error::{ApiError, ApiResult, FieldError};
use crate::import;
use crate::models::{ReviewDraft, MAX_REVIEWER_NAME_LEN, MAX_REVIEW_TEXT_LEN};
use crate::pipeline::{render_request_for, IngestPipeline, IngestSummary, PipelineSettings};
use crate::render::{
    size_preset, ImageFormat, RenderCoordinator, RenderRequest, RenderedImage, SIZE_PRESETS,
};
use crate::scheduler::PollScheduler;
use crate::source_generic::GenericSource;
use crate::sources::SourceRegistry;
use crate::store::{ProcessingFlags, ReviewStore, DEFAULT_SAVE_DEBOUNCE};
use crate::template::PLATFORM_BADGES;

/// JSON request bodies are capped here; uploads and imports get a larger
/// per-route limit.
const JSON_BODY_LIMIT: usize = 1024 * 1024;
const UPLOAD_BODY_LIMIT: usize = 5 * 1024 * 1024;
const MAX_BATCH_ITEMS: usize = 20;

type HmacSha256 = Hmac<Sha256>;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<ReviewStore>,
    pub registry: Arc<SourceRegistry>,
    pub generic: Arc<GenericSource>,
    pub scheduler: Arc<PollScheduler>,
    pub renderer: Arc<RenderCoordinator>,
    pub pipeline: Arc<IngestPipeline>,
    pub chat: Option<Arc<ChatClient>>,
    started_at: Instant,
}

impl AppState {
    /// Wire every component from the loaded config. The screenshot engine
    /// is injected so tests can run without a browser.
    pub async fn build(config: Config, engine: Arc<dyn ScreenshotEngine>) -> anyhow::Result<Self> {
        let config = Arc::new(config);
        let store = ReviewStore::open(config.ingestion.data_path.clone(), DEFAULT_SAVE_DEBOUNCE)?;

        let (registry, generic) = SourceRegistry::from_config(&config);
        let registry = Arc::new(registry);
        registry.initialize_all().await;

        let renderer = Arc::new(RenderCoordinator::new(
            engine,
            config.company.clone(),
            config.server.templates_dir.clone(),
            config.ingestion.default_template.clone(),
            config.ingestion.default_size.clone(),
            config.server.base_url.clone(),
            format!("http://localhost:{}", config.server.port),
        ));

        let chat = config.chat.clone().map(|c| Arc::new(ChatClient::new(c)));
        let pipeline = Arc::new(IngestPipeline::new(
            store.clone(),
            renderer.clone(),
            chat.clone(),
            PipelineSettings {
                auto_generate: config.ingestion.auto_generate,
                auto_share: config.ingestion.auto_share,
                min_rating_for_auto_share: config.ingestion.min_rating_for_auto_share,
                default_template: config.ingestion.default_template.clone(),
                default_size: config.ingestion.default_size.clone(),
            },
        ));
        let scheduler = Arc::new(PollScheduler::new(
            registry.clone(),
            store.clone(),
            pipeline.clone(),
            Duration::from_secs(config.ingestion.poll_interval_minutes * 60),
        ));

        Ok(Self {
            config,
            store,
            registry,
            generic,
            scheduler,
            renderer,
            pipeline,
            chat,
            started_at: Instant::now(),
        })
    }
}

/// Run the service until a terminate signal arrives, then shut down the
/// scheduler, browser, and store in order.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let port = config.server.port;
    let state = AppState::build(config, Arc::new(ChromiumEngine::new())).await?;

    if state.config.ingestion.enabled {
        state.scheduler.start();
    } else {
        info!("Ingestion disabled; scheduler not started");
    }

    let app = build_router(state.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    state.scheduler.stop().await;
    state.renderer.shutdown().await;
    state.store.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => error!(%err, "Failed to install SIGTERM handler"),
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let technicians_dir = state.config.server.technicians_dir.clone();

    // Uploads and imports accept larger bodies than the JSON default.
    let uploads = Router::new()
        .route("/api/technicians/upload", post(handle_technician_upload))
        .route("/api/ingestion/import", post(handle_import))
        .layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT));

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/config", get(handle_config))
        .route("/api/templates", get(handle_templates))
        .route("/api/sizes", get(handle_sizes))
        .route("/api/platforms", get(handle_platforms))
        .route("/api/technicians", get(handle_technicians))
        .route("/generate", post(handle_generate).get(handle_generate_query))
        .route("/generate/batch", post(handle_generate_batch))
        .route("/api/chat/status", get(handle_chat_status))
        .route("/api/share/chat", post(handle_share_chat))
        .route("/api/ingestion/status", get(handle_ingestion_status))
        .route("/api/ingestion/reviews", get(handle_recent_reviews))
        .route("/api/ingestion/poll", post(handle_poll_all))
        .route("/api/ingestion/poll/:source", post(handle_poll_source))
        .route(
            "/api/ingestion/webhook/:source",
            get(handle_webhook_verify).post(handle_webhook),
        )
        .route(
            "/api/ingestion/reviews/:id/generate",
            post(handle_review_generate),
        )
        .route("/api/ingestion/reviews/:id/share", post(handle_review_share))
        .layer(DefaultBodyLimit::max(JSON_BODY_LIMIT))
        .merge(uploads)
        .nest_service("/technicians", ServeDir::new(technicians_dir))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============ Shared helpers ============

/// `scheme://host` of the inbound request, for absolutising asset URLs.
fn request_base_url(headers: &HeaderMap) -> Option<String> {
    let host = headers.get(header::HOST)?.to_str().ok()?;
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    Some(format!("{scheme}://{host}"))
}

fn validate_render_request(request: &RenderRequest) -> Vec<FieldError> {
    let mut errors = Vec::new();
    if request.reviewer_name.trim().is_empty() {
        errors.push(FieldError::new("reviewer_name", "reviewer_name is required"));
    } else if request.reviewer_name.chars().count() > MAX_REVIEWER_NAME_LEN {
        errors.push(FieldError::new(
            "reviewer_name",
            format!("reviewer_name must be at most {MAX_REVIEWER_NAME_LEN} characters"),
        ));
    }
    if !(1..=5).contains(&request.rating) {
        errors.push(FieldError::new(
            "rating",
            "rating must be an integer between 1 and 5",
        ));
    }
    if request.review_text.chars().count() > MAX_REVIEW_TEXT_LEN {
        errors.push(FieldError::new(
            "review_text",
            format!("review_text must be at most {MAX_REVIEW_TEXT_LEN} characters"),
        ));
    }
    if let Some(size) = &request.size {
        if size_preset(size).is_none() {
            errors.push(FieldError::new("size", format!("Unknown size preset: '{size}'")));
        }
    }
    if let Some(format) = &request.format {
        if ImageFormat::from_name(format).is_none() {
            errors.push(FieldError::new("format", format!("Unknown format: '{format}'")));
        }
    }
    errors
}

/// Image bytes with the render metadata headers.
fn image_response(image: RenderedImage) -> Response {
    let mut response = (StatusCode::OK, image.bytes).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static(image.format.content_type()),
    );
    headers.insert("X-Image-Width", image.width.into());
    headers.insert("X-Image-Height", image.height.into());
    headers.insert("X-Generation-Time-Ms", (image.elapsed_ms as u64).into());
    if image.cache_hit {
        headers.insert("X-Cache", header::HeaderValue::from_static("HIT"));
    }
    response
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_seconds: u64,
    browser_connected: bool,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        browser_connected: state.renderer.browser_connected().await,
    })
}

// ============ Catalog endpoints ============

async fn handle_config(State(state): State<AppState>) -> Json<serde_json::Value> {
    let company = &state.config.company;
    Json(json!({
        "company": {
            "name": company.name,
            "phone": company.phone,
            "brand_color": company.brand_color,
            "brand_color_dark": company.brand_color_dark,
            "logo_url": company.logo_url,
        },
        "defaults": {
            "template": state.config.ingestion.default_template,
            "size": state.config.ingestion.default_size,
        },
    }))
}

async fn handle_templates(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "templates": state.renderer.list_templates() }))
}

async fn handle_sizes() -> Json<serde_json::Value> {
    let sizes: HashMap<&str, serde_json::Value> = SIZE_PRESETS
        .iter()
        .map(|(name, w, h)| (*name, json!({ "width": w, "height": h })))
        .collect();
    Json(json!({ "sizes": sizes }))
}

async fn handle_platforms() -> Json<serde_json::Value> {
    Json(json!({ "platforms": PLATFORM_BADGES }))
}

// ============ Technician photos ============

async fn handle_technicians(State(state): State<AppState>) -> Json<serde_json::Value> {
    let mut photos = Vec::new();
    if let Ok(entries) = std::fs::read_dir(&state.config.server.technicians_dir) {
        for entry in entries.flatten() {
            if let Some(name) = entry.file_name().to_str() {
                if name.ends_with(".png") || name.ends_with(".jpg") || name.ends_with(".jpeg") {
                    photos.push(json!({
                        "name": name,
                        "url": format!("/technicians/{name}"),
                    }));
                }
            }
        }
    }
    Json(json!({ "technicians": photos }))
}

#[derive(Deserialize)]
struct UploadQuery {
    name: String,
}

async fn handle_technician_upload(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> ApiResult<Json<serde_json::Value>> {
    let name: String = query
        .name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .take(64)
        .collect();
    if name.is_empty() {
        return Err(ApiError::validation("name", "A safe file name is required"));
    }
    if body.is_empty() {
        return Err(ApiError::validation("body", "Image body must not be empty"));
    }

    let extension = if body.starts_with(&[0x89, 0x50, 0x4E, 0x47]) {
        "png"
    } else if body.starts_with(&[0xFF, 0xD8]) {
        "jpg"
    } else {
        return Err(ApiError::validation("body", "Only PNG and JPEG images are accepted"));
    };

    let dir = &state.config.server.technicians_dir;
    std::fs::create_dir_all(dir)
        .map_err(|err| ApiError::Internal(format!("Failed to create photo directory: {err}")))?;
    let filename = format!("{name}.{extension}");
    std::fs::write(dir.join(&filename), &body)
        .map_err(|err| ApiError::Internal(format!("Failed to store photo: {err}")))?;

    info!(%filename, bytes = body.len(), "Stored technician photo");
    Ok(Json(json!({ "ok": true, "url": format!("/technicians/{filename}") })))
}

// ============ Rendering ============

async fn handle_generate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<RenderRequest>,
) -> ApiResult<Response> {
    generate(state, headers, request).await
}

async fn handle_generate_query(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(request): Query<RenderRequest>,
) -> ApiResult<Response> {
    generate(state, headers, request).await
}

async fn generate(
    state: AppState,
    headers: HeaderMap,
    request: RenderRequest,
) -> ApiResult<Response> {
    let errors = validate_render_request(&request);
    if !errors.is_empty() {
        return Err(ApiError::BadRequest(errors));
    }
    let base_url = request_base_url(&headers);

    // Callback mode: accept now, render and deliver out-of-band.
    if let Some(callback_url) = request.callback_url.clone() {
        let renderer = state.renderer.clone();
        tokio::spawn(async move {
            match renderer.render(&request, base_url.as_deref()).await {
                Ok(image) => renderer.deliver_callback(&callback_url, &image).await,
                Err(err) => warn!(%callback_url, %err, "Callback render failed"),
            }
        });
        return Ok((StatusCode::ACCEPTED, Json(json!({ "accepted": true }))).into_response());
    }

    let image = state.renderer.render(&request, base_url.as_deref()).await?;
    Ok(image_response(image))
}

#[derive(Deserialize)]
struct BatchRequest {
    reviews: Vec<RenderRequest>,
}

#[derive(Serialize)]
struct BatchItem {
    index: usize,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<ImageFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn handle_generate_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(batch): Json<BatchRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    if batch.reviews.is_empty() {
        return Err(ApiError::validation("reviews", "Batch must not be empty"));
    }
    if batch.reviews.len() > MAX_BATCH_ITEMS {
        return Err(ApiError::validation(
            "reviews",
            format!("Batch is limited to {MAX_BATCH_ITEMS} items"),
        ));
    }
    let mut errors = Vec::new();
    for (index, request) in batch.reviews.iter().enumerate() {
        for err in validate_render_request(request) {
            errors.push(FieldError::new(
                format!("reviews[{index}].{}", err.field),
                err.message,
            ));
        }
    }
    if !errors.is_empty() {
        return Err(ApiError::BadRequest(errors));
    }

    let base_url = request_base_url(&headers);
    let results = state
        .renderer
        .render_batch(&batch.reviews, base_url.as_deref())
        .await;

    use base64::Engine as _;
    let items: Vec<BatchItem> = results
        .into_iter()
        .enumerate()
        .map(|(index, result)| match result {
            Ok(image) => BatchItem {
                index,
                success: true,
                image: Some(base64::engine::general_purpose::STANDARD.encode(&image.bytes)),
                format: Some(image.format),
                width: Some(image.width),
                height: Some(image.height),
                error: None,
            },
            Err(err) => BatchItem {
                index,
                success: false,
                image: None,
                format: None,
                width: None,
                height: None,
                error: Some(err.to_string()),
            },
        })
        .collect();

    Ok(Json(json!({ "results": items })))
}

// ============ Chat ============

async fn handle_chat_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    match &state.chat {
        Some(chat) => Json(json!({ "configured": true, "channel": chat.channel() })),
        None => Json(json!({ "configured": false, "channel": null })),
    }
}

async fn handle_share_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<RenderRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let Some(chat) = state.chat.clone() else {
        return Err(ApiError::validation("chat", "Chat integration is not configured"));
    };
    let errors = validate_render_request(&request);
    if !errors.is_empty() {
        return Err(ApiError::BadRequest(errors));
    }

    let base_url = request_base_url(&headers);
    let image = state.renderer.render(&request, base_url.as_deref()).await?;

    // The chat message is composed from a review record; build one from the
    // ad-hoc request without touching the store.
    let review = ReviewDraft {
        source: request.source.clone().unwrap_or_else(|| "generic".to_string()),
        reviewer_name: Some(request.reviewer_name.clone()),
        rating: Some(request.rating),
        review_text: Some(request.review_text.clone()),
        tech_name: request.tech_name.clone(),
        tech_photo_url: request.tech_photo_url.clone(),
        ..Default::default()
    }
    .normalize();

    chat.share(&review, &image)
        .await
        .map_err(|err| ApiError::Upstream(format!("Chat share failed: {err}")))?;
    Ok(Json(json!({ "ok": true })))
}

// ============ Ingestion ============

async fn handle_ingestion_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "enabled": state.config.ingestion.enabled,
        "auto_generate": state.config.ingestion.auto_generate,
        "auto_share": state.config.ingestion.auto_share,
        "stats": state.store.stats(),
        "sources": state.scheduler.source_status(),
    }))
}

#[derive(Deserialize)]
struct RecentQuery {
    #[serde(default = "default_recent_limit")]
    limit: usize,
    source: Option<String>,
}

fn default_recent_limit() -> usize {
    50
}

async fn handle_recent_reviews(
    State(state): State<AppState>,
    Query(query): Query<RecentQuery>,
) -> Json<serde_json::Value> {
    let reviews = state.store.recent(query.limit, query.source.as_deref());
    Json(json!({ "count": reviews.len(), "reviews": reviews }))
}

async fn handle_poll_all(State(state): State<AppState>) -> Json<serde_json::Value> {
    let mut results = Vec::new();
    for adapter in state.registry.pollable() {
        let source = adapter.name().to_string();
        match state.scheduler.poll_once(&source).await {
            Ok(outcome) => results.push(serde_json::to_value(outcome).unwrap_or_default()),
            Err(err) => results.push(json!({ "source": source, "error": err.to_string() })),
        }
    }
    Json(json!({ "results": results }))
}

async fn handle_poll_source(
    State(state): State<AppState>,
    Path(source): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let outcome = state.scheduler.poll_once(&source).await?;
    Ok(Json(serde_json::to_value(outcome).unwrap_or_default()))
}

// ============ Webhooks ============

async fn handle_webhook_verify(Query(query): Query<HashMap<String, String>>) -> Response {
    let token = query.get("verification").cloned().unwrap_or_default();
    (StatusCode::OK, token).into_response()
}

async fn handle_webhook(
    State(state): State<AppState>,
    Path(source): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<serde_json::Value>> {
    let adapter = state
        .registry
        .get(&source)
        .ok_or_else(|| ApiError::NotFound(format!("Unknown source: '{source}'")))?;

    if let Some(secret) = adapter.webhook_secret() {
        if !verify_webhook_signature(secret, &body, &headers) {
            return Err(ApiError::Unauthorized("Invalid webhook signature".to_string()));
        }
    }

    let payload: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|err| ApiError::validation("body", format!("Invalid JSON payload: {err}")))?;
    let reviews = adapter
        .parse(&payload)
        .map_err(|err| ApiError::validation("body", err.to_string()))?;

    let summary = state.pipeline.process(reviews).await;
    Ok(Json(json!({
        "accepted": true,
        "source": source,
        "new": summary.new,
        "duplicates": summary.duplicate,
        "generated": summary.generated,
        "shared": summary.shared,
        "errors": summary.errors,
    })))
}

/// The signature header must equal `"sha256=" + hex(HMAC-SHA256(secret, body))`.
/// Either accepted header name may carry it.
fn verify_webhook_signature(secret: &str, body: &[u8], headers: &HeaderMap) -> bool {
    let provided = headers
        .get("x-hub-signature-256")
        .or_else(|| headers.get("x-signature-256"))
        .and_then(|value| value.to_str().ok());
    let Some(provided) = provided else {
        return false;
    };

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(body);
    let expected = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));
    provided == expected
}

// ============ Import ============

async fn handle_import(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<serde_json::Value>> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("application/json");

    let reviews = if content_type.contains("text/csv") {
        import::parse_csv(&body)?
    } else {
        let payload: serde_json::Value = serde_json::from_slice(&body)
            .map_err(|err| ApiError::validation("body", format!("Invalid JSON payload: {err}")))?;
        state
            .generic
            .parse_tagged("import", &payload)
            .map_err(|err| ApiError::validation("body", err.to_string()))?
    };

    let summary = state.pipeline.process(reviews).await;
    Ok(Json(import_response(&summary)))
}

fn import_response(summary: &IngestSummary) -> serde_json::Value {
    json!({
        "imported": summary.new,
        "duplicates": summary.duplicate,
        "generated": summary.generated,
        "shared": summary.shared,
        "errors": summary.errors,
    })
}

// ============ Stored-review actions ============

async fn handle_review_generate(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let review = state
        .store
        .get(&id)
        .ok_or_else(|| ApiError::NotFound(format!("Unknown review: '{id}'")))?;

    let request = render_request_for(&review, state.pipeline.settings());
    let base_url = request_base_url(&headers);
    let image = state.renderer.render(&request, base_url.as_deref()).await?;

    state
        .store
        .mark_processed(&id, ProcessingFlags::image_generated());
    Ok(image_response(image))
}

async fn handle_review_share(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<serde_json::Value>> {
    let Some(chat) = state.chat.clone() else {
        return Err(ApiError::validation("chat", "Chat integration is not configured"));
    };
    let review = state
        .store
        .get(&id)
        .ok_or_else(|| ApiError::NotFound(format!("Unknown review: '{id}'")))?;

    let request = render_request_for(&review, state.pipeline.settings());
    let base_url = request_base_url(&headers);
    let image = state.renderer.render(&request, base_url.as_deref()).await?;
    state
        .store
        .mark_processed(&id, ProcessingFlags::image_generated());

    chat.share(&review, &image)
        .await
        .map_err(|err| ApiError::Upstream(format!("Chat share failed: {err}")))?;
    state.store.mark_processed(&id, ProcessingFlags::chat_shared());

    Ok(Json(json!({ "ok": true, "review_id": id })))
}
