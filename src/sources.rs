//! Source adapter contract and registry.
//!
//! A [`SourceAdapter`] turns one external review platform into normalised
//! [`Review`] records, either by polling (`fetch`) or by parsing pushed
//! payloads (`parse`). Adapters own their remote API calls, pagination, and
//! payload mapping; they never consult the store or deduplicate — that
//! belongs to the ingestion pipeline.
//!
//! The [`SourceRegistry`] resolves all configured adapters from the config
//! file and is the single lookup table the scheduler and HTTP surface use.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::models::Review;

/// One page of polled reviews plus the cursor to persist for the next poll.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub reviews: Vec<Review>,
    /// New cursor value, or `None` when the cursor should not move.
    pub cursor: Option<String>,
}

/// A review platform adapter.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Unique source tag (`"google"`, `"yelp"`, `"facebook"`, `"generic"`).
    fn name(&self) -> &str;

    /// Whether the adapter passed `initialize`. Disabled adapters are never
    /// polled and reject manual polls.
    fn enabled(&self) -> bool;

    /// Whether the adapter participates in scheduled polling. Push-only
    /// adapters return `false`.
    fn polls(&self) -> bool {
        true
    }

    /// Preferred poll interval, when configured per source.
    fn poll_interval(&self) -> Option<Duration> {
        None
    }

    /// Shared secret for webhook signature verification, when configured.
    fn webhook_secret(&self) -> Option<&str> {
        None
    }

    /// Validate configuration and credentials. Returns whether the adapter
    /// is usable; the result is latched into [`SourceAdapter::enabled`].
    async fn initialize(&self) -> Result<bool>;

    /// Poll the platform for reviews newer than `cursor`.
    async fn fetch(&self, cursor: Option<&str>) -> Result<FetchOutcome>;

    /// Map a pushed payload (webhook or import) onto review records.
    fn parse(&self, payload: &serde_json::Value) -> Result<Vec<Review>>;
}

/// Lookup table of configured adapters, keyed by source tag.
pub struct SourceRegistry {
    sources: Vec<Arc<dyn SourceAdapter>>,
}

impl SourceRegistry {
    /// Resolve all adapters from the config file. The generic adapter is
    /// always present; platform adapters only when configured. The generic
    /// adapter is also returned directly for the import ingress, which
    /// parses with caller-supplied source tags.
    pub fn from_config(config: &Config) -> (Self, Arc<crate::source_generic::GenericSource>) {
        use crate::source_facebook::FacebookSource;
        use crate::source_generic::GenericSource;
        use crate::source_google::GoogleSource;
        use crate::source_yelp::YelpSource;

        let global_interval = Duration::from_secs(config.ingestion.poll_interval_minutes * 60);
        let mut sources: Vec<Arc<dyn SourceAdapter>> = Vec::new();

        if let Some(cfg) = &config.ingestion.sources.google {
            sources.push(Arc::new(GoogleSource::new(cfg.clone(), global_interval)));
        }
        if let Some(cfg) = &config.ingestion.sources.yelp {
            sources.push(Arc::new(YelpSource::new(cfg.clone(), global_interval)));
        }
        if let Some(cfg) = &config.ingestion.sources.facebook {
            sources.push(Arc::new(FacebookSource::new(cfg.clone(), global_interval)));
        }
        let generic = Arc::new(GenericSource::new(config.ingestion.generic.clone()));
        sources.push(generic.clone());

        (Self { sources }, generic)
    }

    /// Build a registry from pre-constructed adapters. Used by tests.
    pub fn from_adapters(sources: Vec<Arc<dyn SourceAdapter>>) -> Self {
        Self { sources }
    }

    /// Run `initialize` on every adapter, latching the enabled flags.
    pub async fn initialize_all(&self) {
        for source in &self.sources {
            match source.initialize().await {
                Ok(true) => tracing::info!(source = source.name(), "Source adapter enabled"),
                Ok(false) => {
                    tracing::info!(source = source.name(), "Source adapter disabled")
                }
                Err(err) => {
                    tracing::warn!(source = source.name(), %err, "Source adapter failed to initialize")
                }
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SourceAdapter>> {
        self.sources.iter().find(|s| s.name() == name).cloned()
    }

    pub fn all(&self) -> &[Arc<dyn SourceAdapter>] {
        &self.sources
    }

    /// Adapters that are enabled and participate in scheduled polling.
    pub fn pollable(&self) -> Vec<Arc<dyn SourceAdapter>> {
        self.sources
            .iter()
            .filter(|s| s.enabled() && s.polls())
            .cloned()
            .collect()
    }
}
