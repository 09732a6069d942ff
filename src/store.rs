//! Persistent review store.
//!
//! A single versioned JSON document owns all review records, per-source
//! cursors, and ingestion stats. Mutations are write-through to memory and
//! mark the document dirty; a dedicated writer task coalesces dirty signals
//! and saves at most once per debounce window. The save path is crash-safe:
//! serialise, write `<path>.tmp`, copy the previous file to `<path>.bak`,
//! then rename the tmp file over the live one.
//!
//! On load, a parse error or a version mismatch discards the document and
//! starts fresh rather than failing startup.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::ApiError;
use crate::models::Review;

/// Current on-disk document version. Anything else is discarded on load.
const STORE_VERSION: u32 = 1;

/// Default debounce window between a mutation and the save that persists it.
pub const DEFAULT_SAVE_DEBOUNCE: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize, Deserialize)]
struct StoreDocument {
    version: u32,
    #[serde(default)]
    cursors: HashMap<String, String>,
    #[serde(default)]
    reviews: HashMap<String, Review>,
    #[serde(default)]
    stats: StoreStats,
}

impl StoreDocument {
    fn empty() -> Self {
        Self {
            version: STORE_VERSION,
            cursors: HashMap::new(),
            reviews: HashMap::new(),
            stats: StoreStats::default(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreStats {
    total_ingested: u64,
    #[serde(default)]
    last_poll_times: HashMap<String, DateTime<Utc>>,
}

/// Aggregate view returned by [`ReviewStore::stats`].
#[derive(Debug, Clone, Serialize)]
pub struct StatsView {
    pub total_ingested: u64,
    pub total_stored: usize,
    pub by_source: HashMap<String, u64>,
    pub last_poll_times: HashMap<String, DateTime<Utc>>,
}

/// Processing flags merged by [`ReviewStore::mark_processed`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessingFlags {
    pub image_generated: Option<bool>,
    pub chat_shared: Option<bool>,
}

impl ProcessingFlags {
    pub fn image_generated() -> Self {
        Self {
            image_generated: Some(true),
            chat_shared: None,
        }
    }

    pub fn chat_shared() -> Self {
        Self {
            image_generated: None,
            chat_shared: Some(true),
        }
    }
}

pub struct ReviewStore {
    path: PathBuf,
    doc: Mutex<StoreDocument>,
    dirty: AtomicBool,
    dirty_tx: mpsc::UnboundedSender<()>,
    /// Serialises concurrent save attempts (writer task vs explicit flush).
    save_lock: tokio::sync::Mutex<()>,
}

impl ReviewStore {
    /// Open (or initialise) the store at `path` and spawn the writer task.
    pub fn open(path: PathBuf, debounce: Duration) -> Result<Arc<Self>> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create data directory: {}", parent.display())
                })?;
            }
        }

        let (doc, dirty) = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<StoreDocument>(&content) {
                Ok(doc) if doc.version == STORE_VERSION => (doc, false),
                Ok(doc) => {
                    warn!(
                        found = doc.version,
                        expected = STORE_VERSION,
                        "Review store version mismatch; starting fresh"
                    );
                    (StoreDocument::empty(), true)
                }
                Err(err) => {
                    warn!(%err, "Review store unreadable; starting fresh");
                    (StoreDocument::empty(), true)
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                (StoreDocument::empty(), false)
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("Failed to read review store: {}", path.display()))
            }
        };

        info!(
            path = %path.display(),
            reviews = doc.reviews.len(),
            "Review store loaded"
        );

        let (dirty_tx, dirty_rx) = mpsc::unbounded_channel();
        let store = Arc::new(Self {
            path,
            doc: Mutex::new(doc),
            dirty: AtomicBool::new(dirty),
            dirty_tx,
            save_lock: tokio::sync::Mutex::new(()),
        });

        tokio::spawn(writer_task(Arc::downgrade(&store), dirty_rx, debounce));

        if dirty {
            store.mark_dirty();
        }
        Ok(store)
    }

    pub fn has(&self, id: &str) -> bool {
        self.doc.lock().unwrap().reviews.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<Review> {
        self.doc.lock().unwrap().reviews.get(id).cloned()
    }

    /// Insert a new record. Fails with `Conflict` when the id is taken.
    pub fn add(&self, mut review: Review) -> Result<(), ApiError> {
        {
            let mut doc = self.doc.lock().unwrap();
            if doc.reviews.contains_key(&review.id) {
                return Err(ApiError::Conflict(format!(
                    "Review already exists: {}",
                    review.id
                )));
            }
            review.processed_at = Some(Utc::now());
            doc.stats.total_ingested += 1;
            doc.reviews.insert(review.id.clone(), review);
        }
        self.mark_dirty();
        Ok(())
    }

    /// Merge processing flags into a stored record. No-op on unknown id.
    pub fn mark_processed(&self, id: &str, flags: ProcessingFlags) {
        let mut changed = false;
        {
            let mut doc = self.doc.lock().unwrap();
            if let Some(review) = doc.reviews.get_mut(id) {
                if let Some(generated) = flags.image_generated {
                    review.image_generated = generated;
                }
                if let Some(shared) = flags.chat_shared {
                    review.chat_shared = shared;
                }
                review.processed_at = Some(Utc::now());
                changed = true;
            }
        }
        if changed {
            self.mark_dirty();
        }
    }

    pub fn get_cursor(&self, source: &str) -> Option<String> {
        self.doc.lock().unwrap().cursors.get(source).cloned()
    }

    pub fn set_cursor(&self, source: &str, cursor: &str) {
        self.doc
            .lock()
            .unwrap()
            .cursors
            .insert(source.to_string(), cursor.to_string());
        self.mark_dirty();
    }

    pub fn set_last_poll_time(&self, source: &str) {
        self.doc
            .lock()
            .unwrap()
            .stats
            .last_poll_times
            .insert(source.to_string(), Utc::now());
        self.mark_dirty();
    }

    /// Most recent records, newest first, optionally filtered by source.
    /// `limit` is capped at 200.
    pub fn recent(&self, limit: usize, source: Option<&str>) -> Vec<Review> {
        let limit = limit.min(200);
        let doc = self.doc.lock().unwrap();
        let mut reviews: Vec<Review> = doc
            .reviews
            .values()
            .filter(|r| source.map_or(true, |s| r.source == s))
            .cloned()
            .collect();
        reviews.sort_by(|a, b| {
            b.review_date
                .cmp(&a.review_date)
                .then(b.processed_at.cmp(&a.processed_at))
        });
        reviews.truncate(limit);
        reviews
    }

    pub fn stats(&self) -> StatsView {
        let doc = self.doc.lock().unwrap();
        let mut by_source: HashMap<String, u64> = HashMap::new();
        for review in doc.reviews.values() {
            *by_source.entry(review.source.clone()).or_default() += 1;
        }
        StatsView {
            total_ingested: doc.stats.total_ingested,
            total_stored: doc.reviews.len(),
            by_source,
            last_poll_times: doc.stats.last_poll_times.clone(),
        }
    }

    /// Remove records older than `max_age_days`. Returns the removed count.
    pub fn prune(&self, max_age_days: u32) -> usize {
        let cutoff = Utc::now() - ChronoDuration::days(i64::from(max_age_days));
        let removed = {
            let mut doc = self.doc.lock().unwrap();
            let before = doc.reviews.len();
            doc.reviews.retain(|_, r| r.review_date >= cutoff);
            before - doc.reviews.len()
        };
        if removed > 0 {
            self.mark_dirty();
        }
        removed
    }

    /// Persist the current document immediately, bypassing the debounce.
    pub async fn flush_now(&self) -> Result<()> {
        self.save().await
    }

    /// Flush any pending save. Called on graceful shutdown.
    pub async fn shutdown(&self) {
        if self.dirty.load(Ordering::SeqCst) {
            if let Err(err) = self.save().await {
                warn!(%err, "Final review store flush failed");
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
        // Writer task coalesces; a full channel cannot happen (unbounded)
        // and a closed one only occurs during teardown.
        let _ = self.dirty_tx.send(());
    }

    async fn save(&self) -> Result<()> {
        let _guard = self.save_lock.lock().await;

        self.dirty.store(false, Ordering::SeqCst);
        let snapshot = {
            let doc = self.doc.lock().unwrap();
            serde_json::to_string_pretty(&*doc).context("Failed to serialise review store")
        };
        let snapshot = match snapshot {
            Ok(s) => s,
            Err(err) => {
                self.dirty.store(true, Ordering::SeqCst);
                return Err(err);
            }
        };

        if let Err(err) = self.write_atomic(&snapshot).await {
            self.dirty.store(true, Ordering::SeqCst);
            return Err(err);
        }
        debug!(path = %self.path.display(), "Review store saved");
        Ok(())
    }

    async fn write_atomic(&self, content: &str) -> Result<()> {
        let tmp = self.path.with_extension("json.tmp");
        let bak = self.path.with_extension("json.bak");

        tokio::fs::write(&tmp, content)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        if tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            tokio::fs::copy(&self.path, &bak)
                .await
                .with_context(|| format!("Failed to back up {}", self.path.display()))?;
        }
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

/// Coalesces dirty signals: the first signal arms the debounce window,
/// signals landing inside the window ride along with the same save.
async fn writer_task(
    store: Weak<ReviewStore>,
    mut dirty_rx: mpsc::UnboundedReceiver<()>,
    debounce: Duration,
) {
    while dirty_rx.recv().await.is_some() {
        tokio::time::sleep(debounce).await;
        while dirty_rx.try_recv().is_ok() {}

        let Some(store) = store.upgrade() else {
            return;
        };
        if !store.dirty.load(Ordering::SeqCst) {
            continue;
        }
        if let Err(err) = store.save().await {
            warn!(%err, "Debounced review store save failed; will retry");
        }
    }
}
