//! Poll scheduler.
//!
//! One polling loop per enabled adapter. First polls are staggered so
//! sources never fire simultaneously at startup; afterwards each loop
//! repeats on the adapter's base interval, doubled per consecutive failure
//! up to a hard cap. A per-source single-flight lock guarantees at most one
//! poll per source at a time; concurrent callers get `{skipped: true}`
//! without side effects. Manual polls bypass the interval but respect the
//! lock and the same state transitions.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ApiError;
use crate::pipeline::{IngestPipeline, IngestSummary};
use crate::sources::{SourceAdapter, SourceRegistry};
use crate::store::ReviewStore;

/// Gap between consecutive adapters' first polls.
const STAGGER_STEP: Duration = Duration::from_secs(5);
/// Floor for any poll interval.
const MIN_POLL_INTERVAL: Duration = Duration::from_secs(15 * 60);
/// Ceiling the backoff never exceeds.
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(2 * 60 * 60);

struct SourceState {
    /// Single-flight lock: held for the duration of one poll.
    inflight: tokio::sync::Mutex<()>,
    consecutive_failures: AtomicU32,
}

/// Result of one `poll_once` call.
#[derive(Debug, Default, Serialize)]
pub struct PollOutcome {
    pub source: String,
    pub skipped: bool,
    pub fetched: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<IngestSummary>,
}

/// Per-adapter state exposed on the status endpoint.
#[derive(Debug, Serialize)]
pub struct SourceStatus {
    pub source: String,
    pub enabled: bool,
    pub polls: bool,
    pub consecutive_failures: u32,
}

pub struct PollScheduler {
    registry: Arc<SourceRegistry>,
    store: Arc<ReviewStore>,
    pipeline: Arc<IngestPipeline>,
    global_interval: Duration,
    states: HashMap<String, Arc<SourceState>>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl PollScheduler {
    pub fn new(
        registry: Arc<SourceRegistry>,
        store: Arc<ReviewStore>,
        pipeline: Arc<IngestPipeline>,
        global_interval: Duration,
    ) -> Self {
        let states = registry
            .all()
            .iter()
            .map(|adapter| {
                (
                    adapter.name().to_string(),
                    Arc::new(SourceState {
                        inflight: tokio::sync::Mutex::new(()),
                        consecutive_failures: AtomicU32::new(0),
                    }),
                )
            })
            .collect();
        Self {
            registry,
            store,
            pipeline,
            global_interval,
            states,
            tasks: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Spawn one polling loop per enabled adapter, staggered by index.
    pub fn start(self: &Arc<Self>) {
        let pollable = self.registry.pollable();
        info!(sources = pollable.len(), "Starting poll scheduler");

        let mut tasks = self.tasks.lock().unwrap();
        for (index, adapter) in pollable.into_iter().enumerate() {
            let scheduler = self.clone();
            let name = adapter.name().to_string();
            let base = scheduler.base_interval(adapter.as_ref());

            tasks.push(tokio::spawn(async move {
                tokio::time::sleep(STAGGER_STEP * index as u32).await;
                loop {
                    match scheduler.poll_once(&name).await {
                        Ok(outcome) if outcome.skipped => {
                            debug!(source = %name, "Poll skipped; already in flight")
                        }
                        Ok(outcome) => {
                            debug!(source = %name, fetched = outcome.fetched, "Poll finished")
                        }
                        Err(err) => warn!(source = %name, %err, "Poll failed"),
                    }

                    let failures = scheduler.failures(&name);
                    tokio::time::sleep(effective_interval(base, failures)).await;
                }
            }));
        }
    }

    /// Cancel every polling loop and flush the store.
    pub async fn stop(&self) {
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock().unwrap());
        for task in &tasks {
            task.abort();
        }
        info!(cancelled = tasks.len(), "Poll scheduler stopped");
        self.store.shutdown().await;
    }

    /// Poll one source now. Respects the single-flight lock; `NotFound` for
    /// unknown or disabled adapters.
    pub async fn poll_once(&self, source: &str) -> Result<PollOutcome, ApiError> {
        let adapter = self
            .registry
            .get(source)
            .filter(|a| a.enabled())
            .ok_or_else(|| ApiError::NotFound(format!("Unknown or disabled source: '{source}'")))?;
        let state = self
            .states
            .get(source)
            .ok_or_else(|| ApiError::NotFound(format!("Unknown or disabled source: '{source}'")))?;

        let Ok(_guard) = state.inflight.try_lock() else {
            return Ok(PollOutcome {
                source: source.to_string(),
                skipped: true,
                ..Default::default()
            });
        };

        let cursor = self.store.get_cursor(source);
        let outcome = match adapter.fetch(cursor.as_deref()).await {
            Ok(outcome) => outcome,
            Err(err) => {
                state.consecutive_failures.fetch_add(1, Ordering::SeqCst);
                return Err(ApiError::Upstream(format!("{source} poll failed: {err}")));
            }
        };

        if let Some(new_cursor) = &outcome.cursor {
            if cursor.as_deref() != Some(new_cursor.as_str()) {
                self.store.set_cursor(source, new_cursor);
            }
        }
        self.store.set_last_poll_time(source);

        let fetched = outcome.reviews.len();
        let summary = self.pipeline.process(outcome.reviews).await;
        state.consecutive_failures.store(0, Ordering::SeqCst);

        Ok(PollOutcome {
            source: source.to_string(),
            skipped: false,
            fetched,
            summary: Some(summary),
        })
    }

    pub fn source_status(&self) -> Vec<SourceStatus> {
        self.registry
            .all()
            .iter()
            .map(|adapter| SourceStatus {
                source: adapter.name().to_string(),
                enabled: adapter.enabled(),
                polls: adapter.polls(),
                consecutive_failures: self.failures(adapter.name()),
            })
            .collect()
    }

    fn failures(&self, source: &str) -> u32 {
        self.states
            .get(source)
            .map(|s| s.consecutive_failures.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    fn base_interval(&self, adapter: &dyn SourceAdapter) -> Duration {
        adapter
            .poll_interval()
            .unwrap_or(self.global_interval)
            .max(self.global_interval)
            .max(MIN_POLL_INTERVAL)
    }
}

/// Backoff: `min(base * 2^failures, cap)`.
fn effective_interval(base: Duration, failures: u32) -> Duration {
    let multiplier = 2u64.saturating_pow(failures);
    let secs = base.as_secs().saturating_mul(multiplier);
    Duration::from_secs(secs).min(MAX_POLL_INTERVAL)
}
