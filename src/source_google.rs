//! Google Business Profile source adapter.
//!
//! Polls the Business Profile reviews endpoint with an OAuth access token
//! refreshed on demand from the stored refresh token. Access tokens are
//! cached until 60 seconds before expiry. Star ratings arrive as the enum
//! strings `ONE`..`FIVE`; the poll cursor is the newest `updateTime` (or
//! `createTime`) seen, serialised as RFC 3339.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

use crate::config::GoogleSourceConfig;
use crate::models::{Review, ReviewDraft};
use crate::sources::{FetchOutcome, SourceAdapter};

const DEFAULT_API_BASE: &str = "https://mybusiness.googleapis.com/v4";
const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const PAGE_SIZE: u32 = 50;

/// Refresh margin: a cached token is reused only while it has at least this
/// long left before expiry.
const TOKEN_REFRESH_MARGIN: chrono::Duration = chrono::Duration::seconds(60);

pub struct GoogleSource {
    config: GoogleSourceConfig,
    global_interval: Duration,
    enabled: AtomicBool,
    client: reqwest::Client,
    token: TokenCache,
}

impl GoogleSource {
    pub fn new(config: GoogleSourceConfig, global_interval: Duration) -> Self {
        Self {
            config,
            global_interval,
            enabled: AtomicBool::new(false),
            client: reqwest::Client::new(),
            token: TokenCache::default(),
        }
    }

    fn api_base(&self) -> &str {
        self.config.api_base_url.as_deref().unwrap_or(DEFAULT_API_BASE)
    }

    fn reviews_url(&self) -> String {
        format!(
            "{}/accounts/{}/locations/{}/reviews",
            self.api_base(),
            self.config.account_id,
            self.config.location_id
        )
    }

    /// Map one API review object onto a record. Returns `None` for objects
    /// with no usable content (e.g. a bare star rating update).
    fn map_review(&self, item: &Value) -> Option<Review> {
        let rating = star_rating(item.get("starRating")?.as_str()?)?;
        let review_date = item
            .get("updateTime")
            .or_else(|| item.get("createTime"))
            .and_then(Value::as_str)
            .and_then(parse_rfc3339);

        Some(
            ReviewDraft {
                source: self.name().to_string(),
                source_review_id: item
                    .get("reviewId")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                reviewer_name: item
                    .pointer("/reviewer/displayName")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                rating: Some(i64::from(rating)),
                review_text: item
                    .get("comment")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                review_date,
                raw: item.clone(),
                ..Default::default()
            }
            .normalize(),
        )
    }

    async fn access_token(&self) -> Result<String> {
        if let Some(token) = self.token.fresh() {
            return Ok(token);
        }

        let token_url = self
            .config
            .token_url
            .as_deref()
            .unwrap_or(DEFAULT_TOKEN_URL);
        let response = self
            .client
            .post(token_url)
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("refresh_token", self.config.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .context("Google token refresh request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Google token refresh returned {status}: {body}");
        }

        let grant: TokenGrant = response
            .json()
            .await
            .context("Google token refresh returned an unexpected body")?;
        debug!(expires_in = grant.expires_in, "Refreshed Google access token");
        self.token.put(&grant);
        Ok(grant.access_token)
    }
}

#[async_trait]
impl SourceAdapter for GoogleSource {
    fn name(&self) -> &str {
        "google"
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
            && !self.config.client_id.is_empty()
            && !self.config.client_secret.is_empty()
            && !self.config.refresh_token.is_empty()
            && !self.config.account_id.is_empty()
            && !self.config.location_id.is_empty();
        self.enabled.store(usable, Ordering::SeqCst);
        Ok(usable)
    }

    async fn fetch(&self, cursor: Option<&str>) -> Result<FetchOutcome> {
        let token = self.access_token().await?;
        let since = cursor.and_then(parse_rfc3339);

        let mut reviews = Vec::new();
        let mut newest: Option<DateTime<Utc>> = since;
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .get(self.reviews_url())
                .bearer_auth(&token)
                .query(&[("pageSize", PAGE_SIZE.to_string())]);
            if let Some(ref t) = page_token {
                request = request.query(&[("pageToken", t.as_str())]);
            }

            let response = request.send().await.context("Google reviews request failed")?;
            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                bail!("Google reviews endpoint returned {status}: {body}");
            }
            let page: Value = response
                .json()
                .await
                .context("Google reviews endpoint returned invalid JSON")?;

            for item in page
                .get("reviews")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
            {
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

            page_token = page
                .get("nextPageToken")
                .and_then(Value::as_str)
                .map(str::to_string);
            if page_token.is_none() {
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
        } else if let Some(single) = payload.get("review") {
            vec![single]
        } else {
            vec![payload]
        };

        let reviews: Vec<Review> = items
            .into_iter()
            .filter_map(|item| self.map_review(item))
            .collect();
        if reviews.is_empty() {
            bail!("Payload contained no Google reviews");
        }
        Ok(reviews)
    }
}

#[derive(Debug, Deserialize)]
struct TokenGrant {
    access_token: String,
    /// Lifetime in seconds.
    expires_in: i64,
}

/// Access-token cache with a time-bounded credential.
#[derive(Default)]
struct TokenCache {
    inner: Mutex<Option<CachedToken>>,
}

struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl TokenCache {
    /// Returns the cached token while it is at least the refresh margin away
    /// from expiry.
    fn fresh(&self) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .as_ref()
            .filter(|t| t.expires_at - TOKEN_REFRESH_MARGIN > Utc::now())
            .map(|t| t.access_token.clone())
    }

    fn put(&self, grant: &TokenGrant) {
        *self.inner.lock().unwrap() = Some(CachedToken {
            access_token: grant.access_token.clone(),
            expires_at: Utc::now() + chrono::Duration::seconds(grant.expires_in),
        });
    }
}

fn star_rating(value: &str) -> Option<u8> {
    match value {
        "ONE" => Some(1),
        "TWO" => Some(2),
        "THREE" => Some(3),
        "FOUR" => Some(4),
        "FIVE" => Some(5),
        _ => None,
    }
}

fn parse_rfc3339(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn source() -> GoogleSource {
        GoogleSource::new(
            GoogleSourceConfig {
                enabled: true,
                poll_interval_minutes: None,
                webhook_secret: None,
                client_id: "cid".into(),
                client_secret: "secret".into(),
                refresh_token: "refresh".into(),
                account_id: "123".into(),
                location_id: "456".into(),
                api_base_url: None,
                token_url: None,
            },
            Duration::from_secs(1800),
        )
    }

    #[test]
    fn star_enum_maps_to_integers() {
        assert_eq!(star_rating("ONE"), Some(1));
        assert_eq!(star_rating("FIVE"), Some(5));
        assert_eq!(star_rating("SIX"), None);
        assert_eq!(star_rating(""), None);
    }

    #[test]
    fn maps_api_review_shape() {
        let review = source()
            .map_review(&json!({
                "reviewId": "abc",
                "reviewer": {"displayName": "Jane D."},
                "starRating": "FOUR",
                "comment": "Quick and friendly",
                "createTime": "2026-01-10T08:00:00Z",
                "updateTime": "2026-01-11T09:30:00Z"
            }))
            .unwrap();
        assert_eq!(review.id, "google:abc");
        assert_eq!(review.rating, 4);
        assert_eq!(review.reviewer_name, "Jane D.");
        // updateTime wins over createTime
        assert_eq!(review.review_date.to_rfc3339(), "2026-01-11T09:30:00+00:00");
    }

    #[test]
    fn parse_accepts_wrapped_and_bare_payloads() {
        let s = source();
        let item = json!({
            "reviewId": "r1",
            "starRating": "FIVE",
            "comment": "Great"
        });

        assert_eq!(s.parse(&json!({"reviews": [item]})).unwrap().len(), 1);
        assert_eq!(s.parse(&json!({"review": item})).unwrap().len(), 1);
        assert_eq!(s.parse(&json!([item])).unwrap().len(), 1);
        assert!(s.parse(&json!({"unrelated": true})).is_err());
    }

    #[test]
    fn token_cache_honors_refresh_margin() {
        let cache = TokenCache::default();
        assert!(cache.fresh().is_none());

        cache.put(&TokenGrant {
            access_token: "tok".into(),
            expires_in: 3600,
        });
        assert_eq!(cache.fresh().as_deref(), Some("tok"));

        // A token expiring within the margin is treated as stale.
        cache.put(&TokenGrant {
            access_token: "stale".into(),
            expires_in: 30,
        });
        assert!(cache.fresh().is_none());
    }

    #[tokio::test]
    async fn initialize_requires_credentials() {
        let s = source();
        assert!(s.initialize().await.unwrap());
        assert!(s.enabled());

        let mut cfg = s.config.clone();
        cfg.refresh_token = String::new();
        let incomplete = GoogleSource::new(cfg, Duration::from_secs(1800));
        assert!(!incomplete.initialize().await.unwrap());
        assert!(!incomplete.enabled());
    }
}
