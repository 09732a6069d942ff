//! Chat workspace sharing.
//!
//! Uploads a rendered review image to the configured channel via the chat
//! API's multipart file-upload endpoint, with a composed message: star
//! glyphs, the platform label, the reviewer's name, the quoted review text,
//! and a technician mention when the technician is in the configured
//! mapping.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::ChatConfig;
use crate::models::Review;
use crate::render::RenderedImage;
use crate::template::{platform_badge, star_glyphs};

const DEFAULT_API_BASE: &str = "https://slack.com/api";

pub struct ChatClient {
    http: reqwest::Client,
    config: ChatConfig,
}

/// Upload envelope; everything beyond `ok`/`error` is opaque.
#[derive(Debug, Deserialize)]
struct UploadResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    file: Option<serde_json::Value>,
}

impl ChatClient {
    pub fn new(config: ChatConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    pub fn channel(&self) -> &str {
        &self.config.channel
    }

    /// Upload the rendered image with its composed message. Succeeds iff
    /// the remote API answers `ok: true`.
    pub async fn share(&self, review: &Review, image: &RenderedImage) -> Result<()> {
        let message = self.compose_message(review);
        let filename = image_filename(review, image);

        let file_part = reqwest::multipart::Part::bytes(image.bytes.clone())
            .file_name(filename.clone())
            .mime_str(image.format.content_type())
            .context("Invalid image content type")?;
        let form = reqwest::multipart::Form::new()
            .text("channels", self.config.channel.clone())
            .text("initial_comment", message)
            .text("filename", filename)
            .text("title", format!("Review from {}", review.reviewer_name))
            .part("file", file_part);

        let url = format!(
            "{}/files.upload",
            self.config
                .api_base_url
                .as_deref()
                .unwrap_or(DEFAULT_API_BASE)
        );
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.bot_token)
            .multipart(form)
            .send()
            .await
            .context("Chat upload request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            bail!("Chat upload endpoint returned {status}");
        }

        let body: UploadResponse = response
            .json()
            .await
            .context("Chat upload endpoint returned an unexpected body")?;
        if !body.ok {
            bail!(
                "Chat upload rejected: {}",
                body.error.unwrap_or_else(|| "unknown error".to_string())
            );
        }
        debug!(file = ?body.file, "Chat upload accepted");
        info!(review = %review.id, channel = %self.config.channel, "Review shared to chat");
        Ok(())
    }

    fn compose_message(&self, review: &Review) -> String {
        let mut message = match platform_badge(&review.source) {
            Some(badge) => format!(
                "{} New review on {}\n*{}*",
                star_glyphs(i64::from(review.rating)),
                badge.label,
                review.reviewer_name
            ),
            None => format!(
                "{} New review\n*{}*",
                star_glyphs(i64::from(review.rating)),
                review.reviewer_name
            ),
        };

        if !review.review_text.is_empty() {
            for line in review.review_text.lines() {
                message.push_str("\n> ");
                message.push_str(line);
            }
        }

        if let Some(mention) = review
            .tech_name
            .as_deref()
            .and_then(|name| self.mention_for(name))
        {
            message.push_str(&format!("\nTechnician: {mention}"));
        }
        message
    }

    /// Case-insensitive lookup of a technician's workspace mention.
    fn mention_for(&self, tech_name: &str) -> Option<String> {
        self.config
            .technicians
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(tech_name))
            .map(|(_, id)| format!("<@{id}>"))
    }
}

fn image_filename(review: &Review, image: &RenderedImage) -> String {
    format!(
        "review-{}-{}.{}",
        slug(&review.reviewer_name),
        Utc::now().timestamp_millis(),
        image.format.extension()
    )
}

fn slug(value: &str) -> String {
    let slug: String = value
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let slug = slug.trim_matches('-').to_string();
    if slug.is_empty() {
        "review".to_string()
    } else {
        slug
    }
}
