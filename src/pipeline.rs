//! Ingestion fan-out pipeline.
//!
//! Every batch of normalised reviews flows through the same steps, per
//! record and in order: deduplicate against the store, persist, optionally
//! render, optionally share to chat. Each downstream step records an
//! idempotent processing flag on the stored record; a failed step is
//! captured in the summary and never blocks the effects of earlier steps.

use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

use crate::chat::ChatClient;
use crate::models::Review;
use crate::render::{RenderCoordinator, RenderRequest};
use crate::store::{ProcessingFlags, ReviewStore};

/// Pipeline behaviour toggles, resolved from config at startup.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub auto_generate: bool,
    pub auto_share: bool,
    pub min_rating_for_auto_share: u8,
    pub default_template: String,
    pub default_size: String,
}

/// Outcome of one `process` call.
#[derive(Debug, Default, Serialize)]
pub struct IngestSummary {
    pub new: usize,
    pub duplicate: usize,
    pub generated: usize,
    pub shared: usize,
    pub errors: Vec<StepError>,
}

/// A failed downstream step for one record.
#[derive(Debug, Serialize)]
pub struct StepError {
    pub id: String,
    pub step: &'static str,
    pub error: String,
}

pub struct IngestPipeline {
    store: Arc<ReviewStore>,
    renderer: Arc<RenderCoordinator>,
    chat: Option<Arc<ChatClient>>,
    settings: PipelineSettings,
}

impl IngestPipeline {
    pub fn new(
        store: Arc<ReviewStore>,
        renderer: Arc<RenderCoordinator>,
        chat: Option<Arc<ChatClient>>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            renderer,
            chat,
            settings,
        }
    }

    /// Process a batch of records sequentially.
    pub async fn process(&self, reviews: Vec<Review>) -> IngestSummary {
        let mut summary = IngestSummary::default();

        for review in reviews {
            if self.store.has(&review.id) {
                summary.duplicate += 1;
                continue;
            }
            if self.store.add(review.clone()).is_err() {
                // Raced with another ingress path inserting the same id.
                summary.duplicate += 1;
                continue;
            }
            summary.new += 1;

            let mut image = None;
            if self.settings.auto_generate {
                match self
                    .renderer
                    .render(&render_request_for(&review, &self.settings), None)
                    .await
                {
                    Ok(rendered) => {
                        self.store
                            .mark_processed(&review.id, ProcessingFlags::image_generated());
                        summary.generated += 1;
                        image = Some(rendered);
                    }
                    Err(err) => {
                        error!(review = %review.id, %err, "Auto-generate failed");
                        summary.errors.push(StepError {
                            id: review.id.clone(),
                            step: "generate",
                            error: err.to_string(),
                        });
                    }
                }
            }

            if self.settings.auto_share
                && review.rating >= self.settings.min_rating_for_auto_share
            {
                if let (Some(chat), Some(image)) = (&self.chat, &image) {
                    match chat.share(&review, image).await {
                        Ok(()) => {
                            self.store
                                .mark_processed(&review.id, ProcessingFlags::chat_shared());
                            summary.shared += 1;
                        }
                        Err(err) => {
                            error!(review = %review.id, %err, "Auto-share failed");
                            summary.errors.push(StepError {
                                id: review.id.clone(),
                                step: "share",
                                error: err.to_string(),
                            });
                        }
                    }
                }
            }
        }

        if summary.new > 0 || summary.duplicate > 0 {
            info!(
                new = summary.new,
                duplicate = summary.duplicate,
                generated = summary.generated,
                shared = summary.shared,
                "Processed review batch"
            );
        }
        summary
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }
}

/// Build the default render request for an accepted record.
pub fn render_request_for(review: &Review, settings: &PipelineSettings) -> RenderRequest {
    RenderRequest {
        reviewer_name: review.reviewer_name.clone(),
        rating: i64::from(review.rating),
        review_text: review.review_text.clone(),
        tech_name: review.tech_name.clone(),
        tech_photo_url: review.tech_photo_url.clone(),
        source: Some(review.source.clone()),
        template: Some(settings.default_template.clone()),
        size: Some(settings.default_size.clone()),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::ScreenshotEngine;
    use crate::config::CompanyConfig;
    use crate::models::ReviewDraft;
    use crate::render::ImageFormat;
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    struct FlakyEngine {
        fail: AtomicBool,
    }

    #[async_trait]
    impl ScreenshotEngine for FlakyEngine {
        async fn capture(
            &self,
            _html: &str,
            _width: u32,
            _height: u32,
            _format: ImageFormat,
        ) -> Result<Vec<u8>> {
            if self.fail.load(Ordering::SeqCst) {
                bail!("capture exploded");
            }
            Ok(vec![0x89, 0x50, 0x4E, 0x47])
        }

        async fn connected(&self) -> bool {
            true
        }

        async fn close(&self) {}
    }

    fn build(dir: &TempDir, auto_generate: bool, fail_render: bool) -> IngestPipeline {
        let store =
            ReviewStore::open(dir.path().join("reviews.json"), Duration::from_millis(10)).unwrap();
        let renderer = Arc::new(RenderCoordinator::new(
            Arc::new(FlakyEngine {
                fail: AtomicBool::new(fail_render),
            }),
            CompanyConfig {
                name: "Acme".into(),
                phone: String::new(),
                brand_color: "#2563eb".into(),
                brand_color_dark: "#1e40af".into(),
                logo_url: String::new(),
            },
            PathBuf::from("./templates"),
            "default".into(),
            "square".into(),
            None,
            "http://localhost:3000".into(),
        ));
        IngestPipeline::new(
            store,
            renderer,
            None,
            PipelineSettings {
                auto_generate,
                auto_share: false,
                min_rating_for_auto_share: 4,
                default_template: "default".into(),
                default_size: "square".into(),
            },
        )
    }

    fn reviews(n: usize) -> Vec<Review> {
        (0..n)
            .map(|i| {
                ReviewDraft {
                    source: "google".into(),
                    source_review_id: Some(format!("r{i}")),
                    reviewer_name: Some(format!("Reviewer {i}")),
                    rating: Some(5),
                    review_text: Some("Great".into()),
                    ..Default::default()
                }
                .normalize()
            })
            .collect()
    }

    #[tokio::test]
    async fn accepts_new_and_counts_duplicates_on_replay() {
        let dir = TempDir::new().unwrap();
        let pipeline = build(&dir, false, false);

        let first = pipeline.process(reviews(3)).await;
        assert_eq!(first.new, 3);
        assert_eq!(first.duplicate, 0);
        assert!(pipeline.store.has("google:r0"));

        // Idempotent on duplicates: same input again only bumps duplicates.
        let second = pipeline.process(reviews(3)).await;
        assert_eq!(second.new, 0);
        assert_eq!(second.duplicate, 3);
        assert_eq!(pipeline.store.stats().total_ingested, 3);
    }

    #[tokio::test]
    async fn auto_generate_marks_flag() {
        let dir = TempDir::new().unwrap();
        let pipeline = build(&dir, true, false);

        let summary = pipeline.process(reviews(2)).await;
        assert_eq!(summary.generated, 2);
        assert!(summary.errors.is_empty());
        assert!(pipeline.store.get("google:r0").unwrap().image_generated);
    }

    #[tokio::test]
    async fn render_failure_keeps_record_and_records_error() {
        let dir = TempDir::new().unwrap();
        let pipeline = build(&dir, true, true);

        let summary = pipeline.process(reviews(2)).await;
        assert_eq!(summary.new, 2);
        assert_eq!(summary.generated, 0);
        assert_eq!(summary.errors.len(), 2);
        assert_eq!(summary.errors[0].step, "generate");
        // The records were persisted despite the render failures.
        assert!(pipeline.store.has("google:r0"));
        assert!(!pipeline.store.get("google:r0").unwrap().image_generated);
    }
}
