//! Core data models for the review pipeline.
//!
//! The data lifecycle is:
//!
//! ```text
//! Source payload → ReviewDraft → normalize() → Review → store/add
//!                                                  ↓
//!                                             render() → image bytes
//!                                                  ↓
//!                                              share() → chat upload
//! ```
//!
//! A [`ReviewDraft`] is produced by a source adapter before normalisation.
//! A [`Review`] is the normalised, stored representation; its identity is
//! derived deterministically so the same review fetched twice maps onto the
//! same record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Maximum stored reviewer name length, in characters.
pub const MAX_REVIEWER_NAME_LEN: usize = 100;
/// Maximum stored review text length, in characters.
pub const MAX_REVIEW_TEXT_LEN: usize = 2000;

/// A normalised customer review as held in the store.
///
/// Identity rule: `id = "<source>:<token>"` where `token` is the
/// source-supplied review identifier or, when the source has none, the first
/// 16 hex characters of `SHA-256("<source>:<reviewer_name>:<review_text>:<rating>")`.
/// Two records are duplicates iff their `id` strings are equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    /// Globally unique derived identifier.
    pub id: String,
    /// Short source tag: `"google"`, `"yelp"`, `"facebook"`, `"generic"`, or `"import"`.
    pub source: String,
    pub reviewer_name: String,
    /// Star rating clamped to 1..=5.
    pub rating: u8,
    pub review_text: String,
    /// When the review was written (or last updated), UTC.
    pub review_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tech_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tech_photo_url: Option<String>,
    /// True when the source only returns an excerpt of the full text.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub partial: bool,
    /// Opaque source payload, kept for diagnostics.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub raw: serde_json::Value,
    /// When the record was accepted by the pipeline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub image_generated: bool,
    #[serde(default)]
    pub chat_shared: bool,
}

/// An un-normalised review as emitted by a source adapter.
///
/// Adapters map their payloads onto this shape; [`ReviewDraft::normalize`]
/// applies the shared invariants (rating clamp, length caps, defaults) and
/// derives the record id.
#[derive(Debug, Clone, Default)]
pub struct ReviewDraft {
    pub source: String,
    /// Source-supplied review identifier, when the platform has one.
    pub source_review_id: Option<String>,
    pub reviewer_name: Option<String>,
    pub rating: Option<i64>,
    pub review_text: Option<String>,
    pub review_date: Option<DateTime<Utc>>,
    pub tech_name: Option<String>,
    pub tech_photo_url: Option<String>,
    pub partial: bool,
    pub raw: serde_json::Value,
}

impl ReviewDraft {
    /// Apply the normalisation invariants and derive the record identity.
    pub fn normalize(self) -> Review {
        let rating = clamp_rating(self.rating.unwrap_or(5));
        let reviewer_name = truncate_chars(
            self.reviewer_name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| default_reviewer_name(&self.source)),
            MAX_REVIEWER_NAME_LEN,
        );
        let review_text =
            truncate_chars(self.review_text.unwrap_or_default(), MAX_REVIEW_TEXT_LEN);
        let review_date = self.review_date.unwrap_or_else(Utc::now);

        let token = match self.source_review_id.filter(|t| !t.is_empty()) {
            Some(token) => token,
            None => content_token(&self.source, &reviewer_name, &review_text, rating),
        };

        Review {
            id: format!("{}:{}", self.source, token),
            source: self.source,
            reviewer_name,
            rating,
            review_text,
            review_date,
            tech_name: self.tech_name.filter(|t| !t.trim().is_empty()),
            tech_photo_url: self.tech_photo_url.filter(|t| !t.trim().is_empty()),
            partial: self.partial,
            raw: self.raw,
            processed_at: None,
            image_generated: false,
            chat_shared: false,
        }
    }
}

/// Clamp a raw rating into the 1..=5 range.
pub fn clamp_rating(rating: i64) -> u8 {
    rating.clamp(1, 5) as u8
}

/// First 16 hex characters of the content hash, used when a source supplies
/// no review identifier.
fn content_token(source: &str, reviewer_name: &str, review_text: &str, rating: u8) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{source}:{reviewer_name}:{review_text}:{rating}").as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..16].to_string()
}

fn default_reviewer_name(source: &str) -> String {
    match source {
        "google" => "A Google customer".to_string(),
        "yelp" => "A Yelp customer".to_string(),
        "facebook" => "A Facebook customer".to_string(),
        _ => "A valued customer".to_string(),
    }
}

fn truncate_chars(s: String, max: usize) -> String {
    if s.chars().count() <= max {
        s
    } else {
        s.chars().take(max).collect()
    }
}
