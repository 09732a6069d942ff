//! Render coordinator.
//!
//! Turns a render request into image bytes: resolve the template and size
//! preset, check the content-addressed cache, expand placeholders, lease a
//! browser page for the capture, and cache the result. Batches run in
//! bounded-concurrency chunks; callback-mode delivery posts the finished
//! bytes out-of-band.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::browser::ScreenshotEngine;
use crate::cache::{cache_key, CachedImage, RenderCache};
use crate::config::CompanyConfig;
use crate::error::ApiError;
use crate::template::{self, TemplateContext};

/// Built-in template used when no named template is requested.
const BUILTIN_TEMPLATE: &str = include_str!("../templates/default.html");

/// Batch renders run this many captures in parallel per chunk.
const BATCH_CHUNK_SIZE: usize = 3;

pub const DEFAULT_SIZE: &str = "square";
pub const DEFAULT_TEMPLATE: &str = "default";

/// Named viewport presets: (name, width, height).
pub const SIZE_PRESETS: &[(&str, u32, u32)] = &[
    ("square", 1080, 1080),
    ("portrait", 1080, 1350),
    ("story", 1080, 1920),
    ("landscape", 1200, 630),
];

pub fn size_preset(name: &str) -> Option<(u32, u32)> {
    SIZE_PRESETS
        .iter()
        .find(|(n, _, _)| *n == name)
        .map(|(_, w, h)| (*w, *h))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
}

impl ImageFormat {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "png" => Some(Self::Png),
            "jpeg" | "jpg" => Some(Self::Jpeg),
            _ => None,
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
        }
    }
}

/// One render request as accepted by the HTTP surface and the pipeline.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RenderRequest {
    #[serde(default)]
    pub reviewer_name: String,
    #[serde(default = "default_request_rating")]
    pub rating: i64,
    #[serde(default)]
    pub review_text: String,
    #[serde(default)]
    pub tech_name: Option<String>,
    #[serde(default)]
    pub tech_photo_url: Option<String>,
    /// Platform tag for the badge, when known.
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub brand_color: Option<String>,
    #[serde(default)]
    pub logo_url: Option<String>,
    /// When present, the HTTP layer responds 202 and the finished image is
    /// POSTed here instead.
    #[serde(default)]
    pub callback_url: Option<String>,
}

fn default_request_rating() -> i64 {
    5
}

/// Fully resolved request fields, serialised canonically for the cache key.
#[derive(Serialize)]
struct CanonicalRequest<'a> {
    reviewer_name: &'a str,
    rating: i64,
    review_text: &'a str,
    tech_name: Option<&'a str>,
    tech_photo_url: Option<&'a str>,
    source: Option<&'a str>,
    template: &'a str,
    size: &'a str,
    format: ImageFormat,
    brand_color: Option<&'a str>,
    logo_url: Option<&'a str>,
    base_url: &'a str,
}

/// A finished render.
#[derive(Debug, Clone)]
pub struct RenderedImage {
    pub bytes: Vec<u8>,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    pub cache_hit: bool,
    pub elapsed_ms: u128,
}

pub struct RenderCoordinator {
    engine: Arc<dyn ScreenshotEngine>,
    cache: RenderCache,
    company: CompanyConfig,
    templates_dir: PathBuf,
    default_template: String,
    default_size: String,
    /// Configured base URL; takes precedence over the inbound request's
    /// `scheme://host` when absolutising asset links.
    base_url_override: Option<String>,
    /// Used when neither an override nor an inbound request is available
    /// (auto-generate, callbacks).
    fallback_base_url: String,
    http: reqwest::Client,
}

impl RenderCoordinator {
    pub fn new(
        engine: Arc<dyn ScreenshotEngine>,
        company: CompanyConfig,
        templates_dir: PathBuf,
        default_template: String,
        default_size: String,
        base_url_override: Option<String>,
        fallback_base_url: String,
    ) -> Self {
        Self {
            engine,
            cache: RenderCache::default(),
            company,
            templates_dir,
            default_template,
            default_size,
            base_url_override,
            fallback_base_url,
            http: reqwest::Client::new(),
        }
    }

    /// Template names available to render requests.
    pub fn list_templates(&self) -> Vec<String> {
        let mut names = vec![DEFAULT_TEMPLATE.to_string()];
        if let Ok(entries) = std::fs::read_dir(&self.templates_dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().is_some_and(|ext| ext == "html") {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        if stem != DEFAULT_TEMPLATE {
                            names.push(stem.to_string());
                        }
                    }
                }
            }
        }
        names.sort();
        names
    }

    pub async fn browser_connected(&self) -> bool {
        self.engine.connected().await
    }

    pub async fn shutdown(&self) {
        self.engine.close().await;
    }

    /// Render one request, consulting the cache first. `request_base_url`
    /// is the inbound request's `scheme://host`, when there is one.
    pub async fn render(
        &self,
        request: &RenderRequest,
        request_base_url: Option<&str>,
    ) -> Result<RenderedImage, ApiError> {
        let started = Instant::now();

        let size_name = request.size.as_deref().unwrap_or(&self.default_size);
        let (width, height) = size_preset(size_name).ok_or_else(|| {
            ApiError::validation("size", format!("Unknown size preset: '{size_name}'"))
        })?;

        let format_name = request.format.as_deref().unwrap_or("png");
        let format = ImageFormat::from_name(format_name).ok_or_else(|| {
            ApiError::validation("format", format!("Unknown format: '{format_name}'"))
        })?;

        let template_name = request.template.as_deref().unwrap_or(&self.default_template);
        let base_url = self
            .base_url_override
            .as_deref()
            .or(request_base_url)
            .unwrap_or(&self.fallback_base_url);
        let key = cache_key(&CanonicalRequest {
            reviewer_name: &request.reviewer_name,
            rating: request.rating,
            review_text: &request.review_text,
            tech_name: request.tech_name.as_deref(),
            tech_photo_url: request.tech_photo_url.as_deref(),
            source: request.source.as_deref(),
            template: template_name,
            size: size_name,
            format,
            brand_color: request.brand_color.as_deref(),
            logo_url: request.logo_url.as_deref(),
            base_url,
        });

        if let Some(cached) = self.cache.get(&key, format) {
            return Ok(RenderedImage {
                bytes: cached.bytes,
                format: cached.format,
                width: cached.width,
                height: cached.height,
                cache_hit: true,
                elapsed_ms: started.elapsed().as_millis(),
            });
        }

        let template_text = self.load_template(template_name)?;
        let html = template::expand(
            &template_text,
            &self.company,
            &TemplateContext {
                reviewer_name: request.reviewer_name.clone(),
                review_text: request.review_text.clone(),
                rating: request.rating,
                tech_name: request.tech_name.clone(),
                tech_photo_url: request.tech_photo_url.clone(),
                source: request.source.clone(),
                brand_color: request.brand_color.clone(),
                logo_url: request.logo_url.clone(),
                base_url: base_url.to_string(),
            },
        );

        let bytes = self
            .engine
            .capture(&html, width, height, format)
            .await
            .map_err(|err| {
                error!(%err, template = template_name, "Render capture failed");
                ApiError::Internal(format!("Render failed: {err}"))
            })?;

        self.cache.put(
            key,
            CachedImage {
                bytes: bytes.clone(),
                format,
                width,
                height,
            },
        );

        Ok(RenderedImage {
            bytes,
            format,
            width,
            height,
            cache_hit: false,
            elapsed_ms: started.elapsed().as_millis(),
        })
    }

    /// Render a batch, preserving input order. Items run in parallel in
    /// chunks; one failed item does not abort the rest.
    pub async fn render_batch(
        &self,
        requests: &[RenderRequest],
        request_base_url: Option<&str>,
    ) -> Vec<Result<RenderedImage, ApiError>> {
        let mut results = Vec::with_capacity(requests.len());
        for chunk in requests.chunks(BATCH_CHUNK_SIZE) {
            let rendered =
                join_all(chunk.iter().map(|req| self.render(req, request_base_url))).await;
            results.extend(rendered);
        }
        results
    }

    /// Deliver a finished render to a callback URL. Failures are logged,
    /// never retried.
    pub async fn deliver_callback(&self, callback_url: &str, image: &RenderedImage) {
        let result = self
            .http
            .post(callback_url)
            .header("Content-Type", image.format.content_type())
            .body(image.bytes.clone())
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => {
                info!(callback_url, "Callback delivered");
            }
            Ok(response) => {
                warn!(callback_url, status = %response.status(), "Callback rejected");
            }
            Err(err) => {
                warn!(callback_url, %err, "Callback delivery failed");
            }
        }
    }

    fn load_template(&self, name: &str) -> Result<String, ApiError> {
        if name == DEFAULT_TEMPLATE {
            return Ok(BUILTIN_TEMPLATE.to_string());
        }
        // Template names come from requests; keep them to a safe alphabet
        // before touching the filesystem.
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ApiError::validation(
                "template",
                format!("Unknown template: '{name}'"),
            ));
        }
        let path = self.templates_dir.join(format!("{name}.html"));
        std::fs::read_to_string(&path).map_err(|_| {
            ApiError::validation("template", format!("Unknown template: '{name}'"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Engine that emits bytes with the right magic for the format and
    /// counts captures.
    struct StubEngine {
        captures: AtomicUsize,
    }

    impl StubEngine {
        fn new() -> Self {
            Self {
                captures: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ScreenshotEngine for StubEngine {
        async fn capture(
            &self,
            _html: &str,
            width: u32,
            _height: u32,
            format: ImageFormat,
        ) -> Result<Vec<u8>> {
            self.captures.fetch_add(1, Ordering::SeqCst);
            let mut bytes = match format {
                ImageFormat::Png => vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A],
                ImageFormat::Jpeg => vec![0xFF, 0xD8, 0xFF, 0xE0],
            };
            bytes.extend_from_slice(&width.to_be_bytes());
            Ok(bytes)
        }

        async fn connected(&self) -> bool {
            true
        }

        async fn close(&self) {}
    }

    fn coordinator() -> (Arc<StubEngine>, RenderCoordinator) {
        let engine = Arc::new(StubEngine::new());
        let coordinator = RenderCoordinator::new(
            engine.clone(),
            CompanyConfig {
                name: "Acme Plumbing".into(),
                phone: "(555) 123-4567".into(),
                brand_color: "#2563eb".into(),
                brand_color_dark: "#1e40af".into(),
                logo_url: "/logo.png".into(),
            },
            PathBuf::from("./templates"),
            DEFAULT_TEMPLATE.to_string(),
            DEFAULT_SIZE.to_string(),
            None,
            "http://localhost:3000".to_string(),
        );
        (engine, coordinator)
    }

    fn request() -> RenderRequest {
        RenderRequest {
            reviewer_name: "Jane D.".into(),
            rating: 5,
            review_text: "Excellent".into(),
            ..Default::default()
        }
    }

    #[test]
    fn size_presets_match_contract() {
        assert_eq!(size_preset("square"), Some((1080, 1080)));
        assert_eq!(size_preset("portrait"), Some((1080, 1350)));
        assert_eq!(size_preset("story"), Some((1080, 1920)));
        assert_eq!(size_preset("landscape"), Some((1200, 630)));
        assert_eq!(size_preset("banner"), None);
    }

    #[test]
    fn format_names_parse() {
        assert_eq!(ImageFormat::from_name("png"), Some(ImageFormat::Png));
        assert_eq!(ImageFormat::from_name("jpeg"), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::from_name("jpg"), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::from_name("webp"), None);
    }

    #[tokio::test]
    async fn render_defaults_to_square_png() {
        let (_, coordinator) = coordinator();
        let image = coordinator.render(&request(), None).await.unwrap();
        assert_eq!(image.format, ImageFormat::Png);
        assert_eq!((image.width, image.height), (1080, 1080));
        assert!(!image.cache_hit);
        assert_eq!(&image.bytes[..4], &[0x89, 0x50, 0x4E, 0x47]);
    }

    #[tokio::test]
    async fn second_render_hits_cache_without_recapture() {
        let (engine, coordinator) = coordinator();
        let first = coordinator.render(&request(), None).await.unwrap();
        let second = coordinator.render(&request(), None).await.unwrap();
        assert!(!first.cache_hit);
        assert!(second.cache_hit);
        assert_eq!(first.bytes, second.bytes);
        assert_eq!(engine.captures.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn differing_field_misses_cache() {
        let (engine, coordinator) = coordinator();
        coordinator.render(&request(), None).await.unwrap();
        let mut other = request();
        other.rating = 4;
        let image = coordinator.render(&other, None).await.unwrap();
        assert!(!image.cache_hit);
        assert_eq!(engine.captures.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn jpeg_landscape_round_trips() {
        let (_, coordinator) = coordinator();
        let mut req = request();
        req.size = Some("landscape".into());
        req.format = Some("jpeg".into());
        let image = coordinator.render(&req, None).await.unwrap();
        assert_eq!((image.width, image.height), (1200, 630));
        assert_eq!(&image.bytes[..2], &[0xFF, 0xD8]);
    }

    #[tokio::test]
    async fn unknown_size_format_and_template_reject() {
        let (_, coordinator) = coordinator();

        let mut req = request();
        req.size = Some("banner".into());
        assert!(matches!(
            coordinator.render(&req, None).await,
            Err(ApiError::BadRequest(_))
        ));

        let mut req = request();
        req.format = Some("webp".into());
        assert!(matches!(
            coordinator.render(&req, None).await,
            Err(ApiError::BadRequest(_))
        ));

        let mut req = request();
        req.template = Some("missing".into());
        assert!(matches!(
            coordinator.render(&req, None).await,
            Err(ApiError::BadRequest(_))
        ));

        let mut req = request();
        req.template = Some("../../etc/passwd".into());
        assert!(matches!(
            coordinator.render(&req, None).await,
            Err(ApiError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn batch_preserves_order() {
        let (_, coordinator) = coordinator();
        let requests: Vec<RenderRequest> = (1..=7)
            .map(|i| {
                let mut req = request();
                req.reviewer_name = format!("Reviewer {i}");
                req.rating = i % 5 + 1;
                req
            })
            .collect();

        let results = coordinator.render_batch(&requests, None).await;
        assert_eq!(results.len(), 7);
        assert!(results.iter().all(|r| r.is_ok()));
    }
}
