//! Generic push-only adapter.
//!
//! Ingress for platforms without a dedicated adapter: webhook posts and the
//! import endpoint. Payload keys are mapped onto review fields through the
//! configurable field mapping before the common normalisation. Never polls.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::config::GenericSourceConfig;
use crate::models::{Review, ReviewDraft};
use crate::sources::{FetchOutcome, SourceAdapter};

pub struct GenericSource {
    config: GenericSourceConfig,
}

impl GenericSource {
    pub fn new(config: GenericSourceConfig) -> Self {
        Self { config }
    }

    /// Map one payload object onto a draft using the configured field names.
    fn map_item(&self, source: &str, item: &Value) -> Option<Review> {
        let mapping = &self.config.field_mapping;
        // Require at least one mapped field so arbitrary objects don't
        // normalise into empty five-star reviews.
        if item.get(&mapping.reviewer_name_field).is_none()
            && item.get(&mapping.rating_field).is_none()
            && item.get(&mapping.review_text_field).is_none()
        {
            return None;
        }

        Some(
            ReviewDraft {
                source: source.to_string(),
                source_review_id: string_field(item, "id")
                    .or_else(|| string_field(item, "review_id")),
                reviewer_name: string_field(item, &mapping.reviewer_name_field),
                rating: rating_field(item, &mapping.rating_field),
                review_text: string_field(item, &mapping.review_text_field),
                review_date: string_field(item, &mapping.review_date_field)
                    .as_deref()
                    .and_then(parse_date),
                tech_name: string_field(item, &mapping.tech_name_field),
                tech_photo_url: string_field(item, &mapping.tech_photo_url_field),
                raw: item.clone(),
                ..Default::default()
            }
            .normalize(),
        )
    }

    /// Parse with an explicit source tag, used by the import endpoint where
    /// the caller names the platform.
    pub fn parse_tagged(&self, source: &str, payload: &Value) -> Result<Vec<Review>> {
        let (source, items) = extract_items(source, payload)?;
        let reviews: Vec<Review> = items
            .iter()
            .filter_map(|item| self.map_item(&source, item))
            .collect();
        if reviews.is_empty() {
            bail!("Payload contained no reviews");
        }
        Ok(reviews)
    }
}

#[async_trait]
impl SourceAdapter for GenericSource {
    fn name(&self) -> &str {
        "generic"
    }

    fn enabled(&self) -> bool {
        true
    }

    fn polls(&self) -> bool {
        false
    }

    fn webhook_secret(&self) -> Option<&str> {
        self.config.webhook_secret.as_deref()
    }

    async fn initialize(&self) -> Result<bool> {
        Ok(true)
    }

    async fn fetch(&self, _cursor: Option<&str>) -> Result<FetchOutcome> {
        Ok(FetchOutcome::default())
    }

    fn parse(&self, payload: &Value) -> Result<Vec<Review>> {
        self.parse_tagged(self.name(), payload)
    }
}

/// Accepts either a bare array of review objects or
/// `{source: "...", reviews: [...]}`.
fn extract_items(default_source: &str, payload: &Value) -> Result<(String, Vec<Value>)> {
    if let Some(array) = payload.as_array() {
        return Ok((default_source.to_string(), array.clone()));
    }
    if let Some(array) = payload.get("reviews").and_then(Value::as_array) {
        let source = payload
            .get("source")
            .and_then(Value::as_str)
            .map(sanitize_source_tag)
            .unwrap_or_else(|| default_source.to_string());
        return Ok((source, array.clone()));
    }
    bail!("Expected a review array or an object with a 'reviews' array");
}

/// Source tags end up in record ids and filenames; restrict them to a safe
/// lowercase alphabet.
pub(crate) fn sanitize_source_tag(raw: &str) -> String {
    let tag: String = raw
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .take(32)
        .collect();
    if tag.is_empty() {
        "generic".to_string()
    } else {
        tag
    }
}

fn string_field(item: &Value, key: &str) -> Option<String> {
    item.get(key).and_then(|v| match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn rating_field(item: &Value, key: &str) -> Option<i64> {
    item.get(key).and_then(|v| match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

pub(crate) fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc())
        })
}
