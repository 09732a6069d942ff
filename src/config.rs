use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub company: CompanyConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub chat: Option<ChatConfig>,
    pub ingestion: IngestionConfig,
}

/// Branding block injected into every rendered template.
#[derive(Debug, Deserialize, Clone)]
pub struct CompanyConfig {
    pub name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default = "default_brand_color")]
    pub brand_color: String,
    #[serde(default = "default_brand_color_dark")]
    pub brand_color_dark: String,
    #[serde(default)]
    pub logo_url: String,
}

fn default_brand_color() -> String {
    "#2563eb".to_string()
}
fn default_brand_color_dark() -> String {
    "#1e40af".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Base URL used to absolutise relative asset URLs in templates.
    /// When unset, each request's scheme://host is used instead.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_templates_dir")]
    pub templates_dir: PathBuf,
    #[serde(default = "default_technicians_dir")]
    pub technicians_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            base_url: None,
            templates_dir: default_templates_dir(),
            technicians_dir: default_technicians_dir(),
        }
    }
}

fn default_port() -> u16 {
    3000
}
fn default_templates_dir() -> PathBuf {
    PathBuf::from("./templates")
}
fn default_technicians_dir() -> PathBuf {
    PathBuf::from("./technicians")
}

/// Chat workspace integration. Optional; when absent, sharing endpoints
/// report `configured: false` and auto-share is skipped.
#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    pub bot_token: String,
    pub channel: String,
    /// Display name -> workspace mention id, matched case-insensitively.
    #[serde(default)]
    pub technicians: HashMap<String, String>,
    /// Override for the chat API base URL. Primarily for tests.
    #[serde(default)]
    pub api_base_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub auto_generate: bool,
    #[serde(default)]
    pub auto_share: bool,
    #[serde(default = "default_min_rating")]
    pub min_rating_for_auto_share: u8,
    #[serde(default = "default_template_name")]
    pub default_template: String,
    #[serde(default = "default_size_name")]
    pub default_size: String,
    /// Global poll interval floor, in minutes. Per-source intervals below
    /// this (or below 15 minutes) are raised to it.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_minutes: u64,
    pub data_path: PathBuf,
    /// Review records older than this horizon are removed by pruning.
    #[serde(default = "default_max_age_days")]
    pub max_review_age_days: u32,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub generic: GenericSourceConfig,
}

fn default_true() -> bool {
    true
}
fn default_min_rating() -> u8 {
    4
}
fn default_template_name() -> String {
    "default".to_string()
}
fn default_size_name() -> String {
    "square".to_string()
}
fn default_poll_interval() -> u64 {
    30
}
fn default_max_age_days() -> u32 {
    90
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SourcesConfig {
    pub google: Option<GoogleSourceConfig>,
    pub yelp: Option<YelpSourceConfig>,
    pub facebook: Option<FacebookSourceConfig>,
}

/// Google Business Profile. Reviews are fetched with an OAuth access token
/// refreshed from the stored refresh token.
#[derive(Debug, Deserialize, Clone)]
pub struct GoogleSourceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub poll_interval_minutes: Option<u64>,
    #[serde(default)]
    pub webhook_secret: Option<String>,
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    pub account_id: String,
    pub location_id: String,
    /// Override for the API base URL. Primarily for tests.
    #[serde(default)]
    pub api_base_url: Option<String>,
    /// Override for the OAuth token endpoint. Primarily for tests.
    #[serde(default)]
    pub token_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct YelpSourceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub poll_interval_minutes: Option<u64>,
    #[serde(default)]
    pub webhook_secret: Option<String>,
    pub api_key: String,
    pub business_id: String,
    #[serde(default)]
    pub api_base_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FacebookSourceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub poll_interval_minutes: Option<u64>,
    #[serde(default)]
    pub webhook_secret: Option<String>,
    pub access_token: String,
    pub page_id: String,
    #[serde(default)]
    pub api_base_url: Option<String>,
}

/// Webhook/import ingress for platforms without a dedicated adapter.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct GenericSourceConfig {
    #[serde(default)]
    pub webhook_secret: Option<String>,
    #[serde(default)]
    pub field_mapping: FieldMapping,
}

/// Maps payload keys onto review record fields before normalisation.
#[derive(Debug, Deserialize, Clone)]
pub struct FieldMapping {
    #[serde(default = "default_reviewer_name_field")]
    pub reviewer_name_field: String,
    #[serde(default = "default_rating_field")]
    pub rating_field: String,
    #[serde(default = "default_review_text_field")]
    pub review_text_field: String,
    #[serde(default = "default_review_date_field")]
    pub review_date_field: String,
    #[serde(default = "default_tech_name_field")]
    pub tech_name_field: String,
    #[serde(default = "default_tech_photo_url_field")]
    pub tech_photo_url_field: String,
}

impl Default for FieldMapping {
    fn default() -> Self {
        Self {
            reviewer_name_field: default_reviewer_name_field(),
            rating_field: default_rating_field(),
            review_text_field: default_review_text_field(),
            review_date_field: default_review_date_field(),
            tech_name_field: default_tech_name_field(),
            tech_photo_url_field: default_tech_photo_url_field(),
        }
    }
}

fn default_reviewer_name_field() -> String {
    "reviewer_name".to_string()
}
fn default_rating_field() -> String {
    "rating".to_string()
}
fn default_review_text_field() -> String {
    "review_text".to_string()
}
fn default_review_date_field() -> String {
    "review_date".to_string()
}
fn default_tech_name_field() -> String {
    "tech_name".to_string()
}
fn default_tech_photo_url_field() -> String {
    "tech_photo_url".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Environment overrides
    if let Ok(port) = std::env::var("PORT") {
        config.server.port = port
            .parse()
            .with_context(|| format!("Invalid PORT value: '{}'", port))?;
    }
    if let Ok(base_url) = std::env::var("BASE_URL") {
        if !base_url.is_empty() {
            config.server.base_url = Some(base_url);
        }
    }

    // Validate company
    if config.company.name.trim().is_empty() {
        anyhow::bail!("company.name must not be empty");
    }

    // Validate ingestion
    if !(1..=5).contains(&config.ingestion.min_rating_for_auto_share) {
        anyhow::bail!("ingestion.min_rating_for_auto_share must be in 1..=5");
    }
    if config.ingestion.data_path.as_os_str().is_empty() {
        anyhow::bail!("ingestion.data_path must not be empty");
    }
    if crate::render::size_preset(&config.ingestion.default_size).is_none() {
        anyhow::bail!(
            "Unknown ingestion.default_size: '{}'. Must be square, portrait, story, or landscape.",
            config.ingestion.default_size
        );
    }

    // Validate chat
    if let Some(chat) = &config.chat {
        if chat.bot_token.trim().is_empty() {
            anyhow::bail!("chat.bot_token must not be empty when [chat] is present");
        }
        if chat.channel.trim().is_empty() {
            anyhow::bail!("chat.channel must not be empty when [chat] is present");
        }
    }

    Ok(config)
}
