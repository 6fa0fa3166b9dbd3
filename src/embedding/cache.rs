//! Content-addressed LRU cache over an embedding provider.
//!
//! Keys are query fingerprints (SHA-256 of normalized text). Each slot is
//! a shared once-cell, which gives the cache its singleflight property: at
//! most one upstream call per key is in flight across concurrent requests,
//! and late arrivals join the pending computation instead of issuing their
//! own. A failed computation leaves the slot unset, so the next caller
//! retries upstream; no error sentinel is ever stored.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use lru::LruCache;
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::debug;

use super::{EmbeddingProvider, fingerprint};
use crate::error::MoeError;

type Slot = Arc<OnceCell<Arc<Vec<f32>>>>;

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CacheStats {
    /// Lookups resolved without an upstream call already in flight or needed.
    pub hits: u64,
    /// Lookups that required (or joined) an upstream computation.
    pub misses: u64,
    /// Current number of cached keys, including pending slots.
    pub size: usize,
    /// Cumulative wall-clock milliseconds spent in upstream calls.
    pub upstream_ms: u64,
}

/// LRU embedding cache with per-key singleflight.
pub struct EmbeddingCache {
    provider: Arc<dyn EmbeddingProvider>,
    slots: Mutex<LruCache<String, Slot>>,
    hits: AtomicU64,
    misses: AtomicU64,
    upstream_ms: AtomicU64,
}

impl EmbeddingCache {
    /// Creates a cache in front of the given provider.
    ///
    /// A zero capacity is clamped to one entry.
    #[must_use]
    pub fn new(provider: Arc<dyn EmbeddingProvider>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            provider,
            slots: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            upstream_ms: AtomicU64::new(0),
        }
    }

    /// Name of the wrapped provider.
    #[must_use]
    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Embeds one text, returning the cached vector when available.
    ///
    /// # Errors
    ///
    /// Propagates provider errors unchanged. The failed key is evicted so
    /// the next call retries upstream.
    pub async fn embed_one(&self, text: &str) -> Result<Arc<Vec<f32>>, MoeError> {
        let key = fingerprint(text);
        let slot = self.slot_for(&key);

        if let Some(vector) = slot.get() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(vector));
        }

        // Counted as a miss even when joining another task's in-flight
        // computation; upstream still sees exactly one call for the key.
        self.misses.fetch_add(1, Ordering::Relaxed);

        let result = slot
            .get_or_try_init(|| async {
                let start = Instant::now();
                let vector = self.provider.embed_one(text).await?;
                self.record_upstream(start);
                debug!(key = %key, dim = vector.len(), "embedding cache fill");
                Ok::<_, MoeError>(Arc::new(vector))
            })
            .await;

        match result {
            Ok(vector) => Ok(Arc::clone(vector)),
            Err(e) => {
                self.evict_unset(&key, &slot);
                Err(e)
            }
        }
    }

    /// Embeds a batch, splitting it into cached and uncached subsets and
    /// issuing a single upstream call for the uncached remainder. The cache
    /// is filled before returning; output order matches input order.
    ///
    /// # Errors
    ///
    /// Returns [`MoeError::EmbeddingUnavailable`] when the upstream batch
    /// fails or returns a different number of vectors than requested.
    pub async fn embed_many(&self, texts: &[String]) -> Result<Vec<Arc<Vec<f32>>>, MoeError> {
        let keys: Vec<String> = texts.iter().map(|t| fingerprint(t)).collect();
        let mut resolved: Vec<Option<Arc<Vec<f32>>>> = vec![None; texts.len()];
        let mut pending: Vec<usize> = Vec::new();

        {
            let mut slots = self.lock();
            for (i, key) in keys.iter().enumerate() {
                if let Some(slot) = slots.get(key)
                    && let Some(vector) = slot.get()
                {
                    resolved[i] = Some(Arc::clone(vector));
                } else {
                    pending.push(i);
                }
            }
        }

        self.hits
            .fetch_add((texts.len() - pending.len()) as u64, Ordering::Relaxed);

        if !pending.is_empty() {
            self.misses.fetch_add(pending.len() as u64, Ordering::Relaxed);

            let inputs: Vec<String> = pending.iter().map(|&i| texts[i].clone()).collect();
            let start = Instant::now();
            let vectors = self.provider.embed_many(&inputs).await?;
            self.record_upstream(start);

            if vectors.len() != inputs.len() {
                return Err(MoeError::EmbeddingUnavailable {
                    message: format!(
                        "batch embedding returned {} vectors for {} inputs",
                        vectors.len(),
                        inputs.len()
                    ),
                });
            }

            let mut slots = self.lock();
            for (&i, vector) in pending.iter().zip(vectors.into_iter()) {
                let arc = Arc::new(vector);
                let slot = slots.get_or_insert(keys[i].clone(), Slot::default);
                // A concurrent embed_one may have won the race; the slot's
                // resolved value is canonical either way.
                let _ = slot.set(Arc::clone(&arc));
                resolved[i] = slot.get().map(Arc::clone).or(Some(arc));
            }
        }

        let out: Vec<Arc<Vec<f32>>> = resolved.into_iter().flatten().collect();
        debug_assert_eq!(out.len(), texts.len());
        Ok(out)
    }

    /// Current counter snapshot.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size: self.lock().len(),
            upstream_ms: self.upstream_ms.load(Ordering::Relaxed),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_upstream(&self, start: Instant) {
        let elapsed = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.upstream_ms.fetch_add(elapsed, Ordering::Relaxed);
    }

    /// Returns the existing slot for a key or inserts a fresh one,
    /// touching the key's LRU position either way.
    fn slot_for(&self, key: &str) -> Slot {
        let mut slots = self.lock();
        if let Some(slot) = slots.get(key) {
            return Arc::clone(slot);
        }
        let slot = Slot::default();
        slots.put(key.to_string(), Arc::clone(&slot));
        slot
    }

    /// Drops a still-unset slot after a failed computation so the next
    /// caller retries upstream. Skipped when another task resolved or
    /// replaced the slot in the meantime.
    fn evict_unset(&self, key: &str, slot: &Slot) {
        let mut slots = self.lock();
        let stale = slots
            .peek(key)
            .is_some_and(|current| Arc::ptr_eq(current, slot) && current.get().is_none());
        if stale {
            slots.pop(key);
        }
    }
}

impl std::fmt::Debug for EmbeddingCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingCache")
            .field("provider", &self.provider.name())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;

    /// Provider returning a vector derived from the text length, with
    /// configurable latency and scripted failures.
    struct CountingProvider {
        calls: AtomicUsize,
        fail_first: AtomicUsize,
        delay: Duration,
    }

    impl CountingProvider {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_first: AtomicUsize::new(0),
                delay: Duration::ZERO,
            }
        }

        fn with_delay(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::new()
            }
        }

        fn failing_first(n: usize) -> Self {
            let provider = Self::new();
            provider.fail_first.store(n, Ordering::SeqCst);
            provider
        }

        fn vector_for(text: &str) -> Vec<f32> {
            #[allow(clippy::cast_precision_loss)]
            vec![text.len() as f32, 1.0, -0.5]
        }
    }

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn embed_one(&self, text: &str) -> Result<Vec<f32>, MoeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self
                .fail_first
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(MoeError::EmbeddingUnavailable {
                    message: "scripted failure".to_string(),
                });
            }
            Ok(Self::vector_for(text))
        }

        async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, MoeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|t| Self::vector_for(t)).collect())
        }
    }

    #[tokio::test]
    async fn test_get_after_put_bit_exact() {
        let provider = Arc::new(CountingProvider::new());
        let cache = EmbeddingCache::new(provider, 16);

        let first = cache
            .embed_one("hello")
            .await
            .unwrap_or_else(|e| panic!("embed failed: {e}"));
        let second = cache
            .embed_one("hello")
            .await
            .unwrap_or_else(|e| panic!("embed failed: {e}"));
        assert_eq!(*first, *second);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
    }

    #[tokio::test]
    async fn test_fingerprint_keying_ignores_whitespace() {
        let provider = Arc::new(CountingProvider::new());
        let cache = EmbeddingCache::new(Arc::clone(&provider) as Arc<dyn EmbeddingProvider>, 16);

        let _ = cache
            .embed_one("hello")
            .await
            .unwrap_or_else(|e| panic!("embed failed: {e}"));
        let _ = cache
            .embed_one("  hello  ")
            .await
            .unwrap_or_else(|e| panic!("embed failed: {e}"));

        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_singleflight_one_upstream_call() {
        let provider = Arc::new(CountingProvider::with_delay(Duration::from_millis(50)));
        let cache = Arc::new(EmbeddingCache::new(
            Arc::clone(&provider) as Arc<dyn EmbeddingProvider>,
            16,
        ));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(
                async move { cache.embed_one("burst").await },
            ));
        }
        for handle in handles {
            let result = handle
                .await
                .unwrap_or_else(|e| panic!("task join failed: {e}"));
            assert!(result.is_ok());
        }

        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_leaves_no_sentinel() {
        let provider = Arc::new(CountingProvider::failing_first(1));
        let cache = EmbeddingCache::new(Arc::clone(&provider) as Arc<dyn EmbeddingProvider>, 16);

        assert!(cache.embed_one("retry").await.is_err());
        assert_eq!(cache.stats().size, 0);

        let vector = cache
            .embed_one("retry")
            .await
            .unwrap_or_else(|e| panic!("retry should succeed: {e}"));
        assert_eq!(*vector, CountingProvider::vector_for("retry"));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let provider = Arc::new(CountingProvider::new());
        let cache = EmbeddingCache::new(Arc::clone(&provider) as Arc<dyn EmbeddingProvider>, 2);

        for text in ["a", "b", "c"] {
            let _ = cache
                .embed_one(text)
                .await
                .unwrap_or_else(|e| panic!("embed failed: {e}"));
        }
        assert_eq!(cache.stats().size, 2);

        // "a" was evicted; embedding it again goes upstream.
        let before = provider.calls.load(Ordering::SeqCst);
        let _ = cache
            .embed_one("a")
            .await
            .unwrap_or_else(|e| panic!("embed failed: {e}"));
        assert_eq!(provider.calls.load(Ordering::SeqCst), before + 1);
    }

    #[tokio::test]
    async fn test_embed_many_splits_cached_and_uncached() {
        let provider = Arc::new(CountingProvider::new());
        let cache = EmbeddingCache::new(Arc::clone(&provider) as Arc<dyn EmbeddingProvider>, 16);

        let _ = cache
            .embed_one("warm")
            .await
            .unwrap_or_else(|e| panic!("embed failed: {e}"));

        let texts = vec!["warm".to_string(), "cold".to_string()];
        let vectors = cache
            .embed_many(&texts)
            .await
            .unwrap_or_else(|e| panic!("batch failed: {e}"));

        assert_eq!(vectors.len(), 2);
        assert_eq!(*vectors[0], CountingProvider::vector_for("warm"));
        assert_eq!(*vectors[1], CountingProvider::vector_for("cold"));
        // One embed_one call plus one batch call for the single cold text.
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);

        // The batch filled the cache: both now hit.
        let before = provider.calls.load(Ordering::SeqCst);
        let _ = cache
            .embed_many(&texts)
            .await
            .unwrap_or_else(|e| panic!("batch failed: {e}"));
        assert_eq!(provider.calls.load(Ordering::SeqCst), before);
    }

    /// Provider whose batch response drops one vector.
    struct ShortBatchProvider;

    #[async_trait]
    impl EmbeddingProvider for ShortBatchProvider {
        fn name(&self) -> &'static str {
            "short-batch"
        }

        async fn embed_one(&self, _text: &str) -> Result<Vec<f32>, MoeError> {
            Ok(vec![1.0])
        }

        async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, MoeError> {
            Ok(texts.iter().skip(1).map(|_| vec![1.0]).collect())
        }
    }

    #[tokio::test]
    async fn test_embed_many_rejects_short_batch() {
        let cache = EmbeddingCache::new(Arc::new(ShortBatchProvider), 16);
        let texts = vec!["a".to_string(), "b".to_string()];
        let result = cache.embed_many(&texts).await;
        assert!(matches!(
            result,
            Err(MoeError::EmbeddingUnavailable { .. })
        ));
    }
}
