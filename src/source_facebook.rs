//! Facebook page ratings adapter.
//!
//! Polls the page ratings edge with a long-lived page access token using
//! offset pagination. The cursor is `"offset:<N>"` and advances by the
//! number of items returned; it is never reset automatically.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::config::FacebookSourceConfig;
use crate::models::{Review, ReviewDraft};
use crate::sources::{FetchOutcome, SourceAdapter};

const DEFAULT_API_BASE: &str = "https://graph.facebook.com/v19.0";
const PAGE_SIZE: u32 = 25;
const MAX_PAGES: u32 = 10;

pub struct FacebookSource {
    config: FacebookSourceConfig,
    global_interval: Duration,
    enabled: AtomicBool,
    client: reqwest::Client,
}

impl FacebookSource {
    pub fn new(config: FacebookSourceConfig, global_interval: Duration) -> Self {
        Self {
            config,
            global_interval,
            enabled: AtomicBool::new(false),
            client: reqwest::Client::new(),
        }
    }

    fn ratings_url(&self) -> String {
        format!(
            "{}/{}/ratings",
            self.config.api_base_url.as_deref().unwrap_or(DEFAULT_API_BASE),
            self.config.page_id
        )
    }

    fn map_review(&self, item: &Value) -> Option<Review> {
        // Ratings may arrive as a star value or only as a recommendation.
        let rating = item.get("rating").and_then(Value::as_i64).or_else(|| {
            match item.get("recommendation_type").and_then(Value::as_str) {
                Some("positive") => Some(5),
                Some("negative") => Some(1),
                _ => None,
            }
        })?;

        Some(
            ReviewDraft {
                source: self.name().to_string(),
                source_review_id: item
                    .get("open_graph_story_id")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                reviewer_name: item
                    .pointer("/reviewer/name")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                rating: Some(rating),
                review_text: item
                    .get("review_text")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                review_date: item
                    .get("created_time")
                    .and_then(Value::as_str)
                    .and_then(parse_graph_time),
                raw: item.clone(),
                ..Default::default()
            }
            .normalize(),
        )
    }
}

#[async_trait]
impl SourceAdapter for FacebookSource {
    fn name(&self) -> &str {
        "facebook"
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn poll_interval(&self) -> Option<Duration> {
        self.config
            .poll_interval_minutes
            .map(|m| Duration::from_secs(m * 60))
            .or(Some(self.global_interval))
    }

    fn webhook_secret(&self) -> Option<&str> {
        self.config.webhook_secret.as_deref()
    }

    async fn initialize(&self) -> Result<bool> {
        let usable = self.config.enabled
            && !self.config.access_token.is_empty()
            && !self.config.page_id.is_empty();
        self.enabled.store(usable, Ordering::SeqCst);
        Ok(usable)
    }

    async fn fetch(&self, cursor: Option<&str>) -> Result<FetchOutcome> {
        let start = cursor.map(parse_offset_cursor).transpose()?.unwrap_or(0);

        let mut reviews = Vec::new();
        let mut offset = start;

        for _ in 0..MAX_PAGES {
            let limit = PAGE_SIZE.to_string();
            let offset_param = offset.to_string();
            let response = self
                .client
                .get(self.ratings_url())
                .query(&[
                    ("access_token", self.config.access_token.as_str()),
                    ("fields", "review_text,rating,reviewer,created_time,recommendation_type,open_graph_story_id"),
                    ("limit", limit.as_str()),
                    ("offset", offset_param.as_str()),
                ])
                .send()
                .await
                .context("Facebook ratings request failed")?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                bail!("Facebook ratings endpoint returned {status}: {body}");
            }
            let body: Value = response
                .json()
                .await
                .context("Facebook ratings endpoint returned invalid JSON")?;

            let items = body
                .get("data")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let page_len = items.len();

            reviews.extend(items.iter().filter_map(|item| self.map_review(item)));
            offset += page_len as u64;

            if page_len < PAGE_SIZE as usize {
                break;
            }
        }

        Ok(FetchOutcome {
            reviews,
            cursor: (offset != start).then(|| format!("offset:{offset}")),
        })
    }

    fn parse(&self, payload: &Value) -> Result<Vec<Review>> {
        let items: Vec<&Value> = if let Some(array) = payload.as_array() {
            array.iter().collect()
        } else if let Some(array) = payload.get("data").and_then(Value::as_array) {
            array.iter().collect()
        } else {
            vec![payload]
        };

        let reviews: Vec<Review> = items
            .into_iter()
            .filter_map(|item| self.map_review(item))
            .collect();
        if reviews.is_empty() {
            bail!("Payload contained no Facebook ratings");
        }
        Ok(reviews)
    }
}

fn parse_offset_cursor(cursor: &str) -> Result<u64> {
    let Some(raw) = cursor.strip_prefix("offset:") else {
        bail!("Malformed Facebook cursor: '{cursor}'");
    };
    raw.parse()
        .with_context(|| format!("Malformed Facebook cursor: '{cursor}'"))
}

/// Graph API timestamps use a compact offset (`+0000`) that
/// `parse_from_rfc3339` rejects.
fn parse_graph_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .or_else(|| DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%z").ok())
        .map(|dt| dt.with_timezone(&Utc))
}
