//! Content-addressed render cache.
//!
//! The key is a SHA-256 digest over the canonical JSON of the fully
//! resolved render request; the value is the finished image. Eviction is
//! LRU with a fixed capacity; hits refresh recency.

use lru::LruCache;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::Mutex;

use crate::render::ImageFormat;

/// Maximum cached images before the least recently used one is evicted.
const CACHE_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
pub struct CachedImage {
    pub bytes: Vec<u8>,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
}

pub struct RenderCache {
    inner: Mutex<LruCache<String, CachedImage>>,
}

impl Default for RenderCache {
    fn default() -> Self {
        Self {
            inner: Mutex::new(LruCache::new(
                NonZeroUsize::new(CACHE_CAPACITY).expect("capacity is non-zero"),
            )),
        }
    }
}

impl RenderCache {
    /// Look up a key, refreshing its recency. Only returns an entry whose
    /// format matches the request.
    pub fn get(&self, key: &str, format: ImageFormat) -> Option<CachedImage> {
        let mut inner = self.inner.lock().unwrap();
        inner.get(key).filter(|img| img.format == format).cloned()
    }

    /// Insert an entry, evicting the oldest when at capacity. Concurrent
    /// renders of the same key may both insert; the last writer wins.
    pub fn put(&self, key: String, image: CachedImage) {
        self.inner.lock().unwrap().put(key, image);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Digest of the canonical JSON serialisation of a resolved render request.
/// Two requests with identical fields share a key; any differing field
/// produces a different key.
pub fn cache_key<T: Serialize>(canonical: &T) -> String {
    let json = serde_json::to_string(canonical).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(format: ImageFormat) -> CachedImage {
        CachedImage {
            bytes: vec![1, 2, 3],
            format,
            width: 1080,
            height: 1080,
        }
    }

    #[derive(Serialize)]
    struct Key<'a> {
        name: &'a str,
        rating: u8,
    }

    #[test]
    fn key_is_deterministic_and_field_sensitive() {
        let a = cache_key(&Key { name: "Jane", rating: 5 });
        let b = cache_key(&Key { name: "Jane", rating: 5 });
        let c = cache_key(&Key { name: "Jane", rating: 4 });
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn hit_requires_matching_format() {
        let cache = RenderCache::default();
        cache.put("k".into(), image(ImageFormat::Png));
        assert!(cache.get("k", ImageFormat::Png).is_some());
        assert!(cache.get("k", ImageFormat::Jpeg).is_none());
    }

    #[test]
    fn evicts_least_recently_used_at_capacity() {
        let cache = RenderCache::default();
        for i in 0..CACHE_CAPACITY {
            cache.put(format!("k{i}"), image(ImageFormat::Png));
        }
        // Touch k0 so k1 becomes the eviction candidate.
        assert!(cache.get("k0", ImageFormat::Png).is_some());

        cache.put("overflow".into(), image(ImageFormat::Png));
        assert_eq!(cache.len(), CACHE_CAPACITY);
        assert!(cache.get("k0", ImageFormat::Png).is_some());
        assert!(cache.get("k1", ImageFormat::Png).is_none());
    }

    #[test]
    fn last_writer_wins() {
        let cache = RenderCache::default();
        cache.put("k".into(), image(ImageFormat::Png));
        let mut second = image(ImageFormat::Png);
        second.bytes = vec![9, 9];
        cache.put("k".into(), second);
        assert_eq!(cache.get("k", ImageFormat::Png).unwrap().bytes, vec![9, 9]);
    }
}
