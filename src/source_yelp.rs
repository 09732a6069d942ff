//! Yelp review feed adapter.
//!
//! Polls the business reviews endpoint with a static API key, newest first.
//! Yelp only returns review excerpts, so every record is flagged `partial`.
//! The cursor is the newest `review_date` seen; fetches drop anything at or
//! before it.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::config::YelpSourceConfig;
use crate::models::{Review, ReviewDraft};
use crate::sources::{FetchOutcome, SourceAdapter};

const DEFAULT_API_BASE: &str = "https://api.yelp.com/v3";
const PAGE_SIZE: u32 = 20;
/// Defensive ceiling on pagination; the feed is effectively bounded upstream.
const MAX_PAGES: u32 = 5;

pub struct YelpSource {
    config: YelpSourceConfig,
    global_interval: Duration,
    enabled: AtomicBool,
    client: reqwest::Client,
}

impl YelpSource {
    pub fn new(config: YelpSourceConfig, global_interval: Duration) -> Self {
        Self {
            config,
            global_interval,
            enabled: AtomicBool::new(false),
            client: reqwest::Client::new(),
        }
    }

    fn reviews_url(&self) -> String {
        format!(
            "{}/businesses/{}/reviews",
            self.config.api_base_url.as_deref().unwrap_or(DEFAULT_API_BASE),
            self.config.business_id
        )
    }

    fn map_review(&self, item: &Value) -> Option<Review> {
        let rating = item.get("rating")?.as_i64()?;
        Some(
            ReviewDraft {
                source: self.name().to_string(),
                source_review_id: item.get("id").and_then(Value::as_str).map(str::to_string),
                reviewer_name: item
                    .pointer("/user/name")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                rating: Some(rating),
                review_text: item.get("text").and_then(Value::as_str).map(str::to_string),
                review_date: item
                    .get("time_created")
                    .and_then(Value::as_str)
                    .and_then(parse_yelp_time),
                partial: true,
                raw: item.clone(),
                ..Default::default()
            }
            .normalize(),
        )
    }
}

#[async_trait]
impl SourceAdapter for YelpSource {
    fn name(&self) -> &str {
        "yelp"
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
            && !self.config.api_key.is_empty()
            && !self.config.business_id.is_empty();
        self.enabled.store(usable, Ordering::SeqCst);
        Ok(usable)
    }

    async fn fetch(&self, cursor: Option<&str>) -> Result<FetchOutcome> {
        let since = cursor.and_then(|c| DateTime::parse_from_rfc3339(c).ok());
        let since: Option<DateTime<Utc>> = since.map(|dt| dt.with_timezone(&Utc));

        let mut reviews = Vec::new();
        let mut newest = since;

        for page in 0..MAX_PAGES {
            let response = self
                .client
                .get(self.reviews_url())
                .bearer_auth(&self.config.api_key)
                .query(&[
                    ("limit", PAGE_SIZE.to_string()),
                    ("offset", (page * PAGE_SIZE).to_string()),
                    ("sort_by", "newest".to_string()),
                ])
                .send()
                .await
                .context("Yelp reviews request failed")?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                bail!("Yelp reviews endpoint returned {status}: {body}");
            }
            let body: Value = response
                .json()
                .await
                .context("Yelp reviews endpoint returned invalid JSON")?;

            let items = body
                .get("reviews")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let page_len = items.len();

            for item in &items {
                let Some(review) = self.map_review(item) else {
                    continue;
                };
                if newest.map_or(true, |n| review.review_date > n) {
                    newest = Some(review.review_date);
                }
                if since.map_or(true, |s| review.review_date > s) {
                    reviews.push(review);
                }
            }

            if page_len < PAGE_SIZE as usize {
                break;
            }
        }

        Ok(FetchOutcome {
            reviews,
            cursor: newest.map(|n| n.to_rfc3339()),
        })
    }

    fn parse(&self, payload: &Value) -> Result<Vec<Review>> {
        let items: Vec<&Value> = if let Some(array) = payload.as_array() {
            array.iter().collect()
        } else if let Some(array) = payload.get("reviews").and_then(Value::as_array) {
            array.iter().collect()
        } else {
            vec![payload]
        };

        let reviews: Vec<Review> = items
            .into_iter()
            .filter_map(|item| self.map_review(item))
            .collect();
        if reviews.is_empty() {
            bail!("Payload contained no Yelp reviews");
        }
        Ok(reviews)
    }
}

/// Yelp timestamps come as `"2026-01-15 10:30:00"` (no offset, UTC).
fn parse_yelp_time(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}
