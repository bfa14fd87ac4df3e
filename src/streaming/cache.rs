//! In-memory representation cache.
//!
//! Resolving a transmuxed video representation needs a keyframe scan of the
//! whole file, so resolved representations are kept per stream and id.

use dashmap::DashMap;
use reelforge_common::{Result, StreamKey};
use reelforge_media::{RepresentationId, StreamRepresentation};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

type CacheKey = (StreamKey, RepresentationId);

/// Entry in the representation cache.
struct CacheEntry {
    representation: Arc<StreamRepresentation>,
    last_accessed: Instant,
    file_modified: Option<SystemTime>,
}

/// Thread-safe cache of resolved representations.
pub struct RepresentationCache {
    entries: DashMap<CacheKey, CacheEntry>,
    max_entries: usize,
    ttl: Duration,
}

impl RepresentationCache {
    /// Create a new representation cache.
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: max_entries.max(1),
            ttl,
        }
    }

    /// Get a representation from cache or resolve it.
    ///
    /// `file_modified` is the current modification time of the source; an
    /// entry recorded against a different time is stale.
    pub async fn get_or_try_insert_with<F, Fut>(
        &self,
        stream: &StreamKey,
        id: &RepresentationId,
        file_modified: Option<SystemTime>,
        resolve: F,
    ) -> Result<Arc<StreamRepresentation>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<StreamRepresentation>>,
    {
        let key = (stream.clone(), id.clone());

        if let Some(mut entry) = self.entries.get_mut(&key) {
            if self.is_entry_valid(&entry, file_modified) {
                entry.last_accessed = Instant::now();
                return Ok(Arc::clone(&entry.representation));
            }
            // Entry is stale, remove it
            drop(entry);
            self.entries.remove(&key);
        }

        let representation = Arc::new(resolve().await?);

        // Evict old entries if at capacity
        if self.entries.len() >= self.max_entries {
            self.evict_oldest();
        }

        self.entries.insert(
            key,
            CacheEntry {
                representation: Arc::clone(&representation),
                last_accessed: Instant::now(),
                file_modified,
            },
        );
        Ok(representation)
    }

    /// Drop every entry of a stream.
    pub fn invalidate_stream(&self, stream: &StreamKey) {
        self.entries.retain(|(key, _), _| key != stream);
    }

    /// Clear all entries.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Get the number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove expired entries.
    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        self.entries
            .retain(|_, entry| now.duration_since(entry.last_accessed) < self.ttl);
    }

    fn is_entry_valid(&self, entry: &CacheEntry, file_modified: Option<SystemTime>) -> bool {
        if entry.last_accessed.elapsed() >= self.ttl {
            return false;
        }
        // If either side has no modification time, assume valid
        match (entry.file_modified, file_modified) {
            (Some(cached), Some(current)) => cached == current,
            _ => true,
        }
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.last_accessed)
            .map(|entry| entry.key().clone());

        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}

impl Default for RepresentationCache {
    fn default() -> Self {
        // Default: 256 entries, 1 hour TTL
        Self::new(256, Duration::from_secs(3600))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelforge_common::{FileLocator, Rational, Stream, StreamType};
    use reelforge_media::RepresentationResolver;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn audio_stream(index: u32) -> Stream {
        Stream {
            index,
            duration: 30.0,
            time_base: Rational::new(1, 48000),
            duration_ticks: 30 * 48000,
            codec: "mp4a.40.2".into(),
            codec_name: "aac".into(),
            bitrate: 192_000,
            frame_rate: Rational::default(),
            width: 0,
            height: 0,
            stream_type: StreamType::Audio,
            language: Some("eng".into()),
            title: None,
            default: true,
        }
    }

    fn key(index: u32) -> StreamKey {
        StreamKey::new(FileLocator::from_relative_path("a.mkv").unwrap(), index)
    }

    async fn resolve_counting(
        cache: &RepresentationCache,
        index: u32,
        modified: Option<SystemTime>,
        calls: &AtomicUsize,
    ) -> Arc<StreamRepresentation> {
        cache
            .get_or_try_insert_with(&key(index), &RepresentationId::Direct, modified, || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                RepresentationResolver::default().resolve(
                    &audio_stream(index),
                    &RepresentationId::Direct,
                    &[],
                )
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_cache_hit() {
        let cache = RepresentationCache::new(10, Duration::from_secs(3600));
        let calls = AtomicUsize::new(0);

        let first = resolve_counting(&cache, 1, None, &calls).await;
        let second = resolve_counting(&cache, 1, None, &calls).await;

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_modified_file_is_resolved_again() {
        let cache = RepresentationCache::new(10, Duration::from_secs(3600));
        let calls = AtomicUsize::new(0);
        let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(100);
        let t1 = SystemTime::UNIX_EPOCH + Duration::from_secs(200);

        resolve_counting(&cache, 1, Some(t0), &calls).await;
        resolve_counting(&cache, 1, Some(t0), &calls).await;
        resolve_counting(&cache, 1, Some(t1), &calls).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let cache = RepresentationCache::default();
        let id: RepresentationId = "720p/2000kbps".parse().unwrap();
        let id_ref = &id;
        let result = cache
            .get_or_try_insert_with(&key(1), &id, None, || async move {
                RepresentationResolver::default().resolve(&audio_stream(1), id_ref, &[])
            })
            .await;

        assert!(result.is_err());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_cache_eviction() {
        let cache = RepresentationCache::new(2, Duration::from_secs(3600));
        let calls = AtomicUsize::new(0);

        for i in 0..3 {
            resolve_counting(&cache, i, None, &calls).await;
        }

        // Should have evicted oldest, keeping only 2
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_stream() {
        let cache = RepresentationCache::new(10, Duration::from_secs(3600));
        let calls = AtomicUsize::new(0);
        resolve_counting(&cache, 1, None, &calls).await;
        resolve_counting(&cache, 2, None, &calls).await;

        cache.invalidate_stream(&key(1));
        assert_eq!(cache.len(), 1);
    }
}
