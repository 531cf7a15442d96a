//! Single-value TTL cache with serialized refreshes and stale fallback.
//!
//! Readers get an `Arc<V>` snapshot; a refresh builds the next value off to the
//! side and swaps it in under a short write lock, so nobody ever observes a
//! half-built value.

use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::time::Instant;

struct Entry<V> {
    value: Arc<V>,
    loaded_at: Instant,
    expired: bool,
}

pub struct TtlCache<V> {
    label: &'static str,
    ttl: Duration,
    slot: RwLock<Option<Entry<V>>>,
    refresh_lock: tokio::sync::Mutex<()>,
    /// Bumped by `invalidate`; a load that started under an older
    /// generation is stored already expired.
    generation: AtomicU64,
}

impl<V> TtlCache<V> {
    pub fn new(label: &'static str, ttl: Duration) -> Self {
        Self {
            label,
            ttl,
            slot: RwLock::new(None),
            refresh_lock: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh value, if any.
    fn fresh(&self) -> Option<Arc<V>> {
        let slot = self.slot.read().unwrap_or_else(|p| p.into_inner());
        slot.as_ref()
            .filter(|e| !e.expired && e.loaded_at.elapsed() < self.ttl)
            .map(|e| Arc::clone(&e.value))
    }

    /// Last loaded value regardless of age.
    pub fn peek(&self) -> Option<Arc<V>> {
        let slot = self.slot.read().unwrap_or_else(|p| p.into_inner());
        slot.as_ref().map(|e| Arc::clone(&e.value))
    }

    /// Time since the last successful load.
    pub fn age(&self) -> Option<Duration> {
        let slot = self.slot.read().unwrap_or_else(|p| p.into_inner());
        slot.as_ref().map(|e| e.loaded_at.elapsed())
    }

    pub fn is_stale(&self) -> bool {
        self.fresh().is_none()
    }

    /// Force the next `get` to reload. The old value stays available as a
    /// fallback if that reload fails.
    pub fn invalidate(&self) {
        let mut slot = self.slot.write().unwrap_or_else(|p| p.into_inner());
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(entry) = slot.as_mut() {
            entry.expired = true;
        }
    }

    fn swap_in(&self, value: V, started_at: u64) -> Arc<V> {
        let value = Arc::new(value);
        let mut slot = self.slot.write().unwrap_or_else(|p| p.into_inner());
        let expired = self.generation.load(Ordering::SeqCst) != started_at;
        if expired {
            tracing::debug!(cache = self.label, "invalidated during load, next read reloads");
        }
        *slot = Some(Entry {
            value: Arc::clone(&value),
            loaded_at: Instant::now(),
            expired,
        });
        value
    }

    /// Serve the cached value when fresh, otherwise load. A failed load falls
    /// back to the previous value; only a cold cache surfaces the error.
    pub async fn get<F, Fut, E>(&self, force: bool, loader: F) -> Result<Arc<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
        E: Display,
    {
        if !force {
            if let Some(value) = self.fresh() {
                return Ok(value);
            }
        }

        let _guard = self.refresh_lock.lock().await;
        // Another task may have refreshed while we waited.
        if !force {
            if let Some(value) = self.fresh() {
                return Ok(value);
            }
        }

        let started_at = self.generation.load(Ordering::SeqCst);
        match loader().await {
            Ok(value) => Ok(self.swap_in(value, started_at)),
            Err(e) => match self.peek() {
                Some(stale) => {
                    tracing::warn!(cache = self.label, "refresh failed, serving stale value: {}", e);
                    Ok(stale)
                }
                None => Err(e),
            },
        }
    }

    /// Strict reload: errors are returned even when a stale value exists.
    pub async fn refresh<F, Fut, E>(&self, loader: F) -> Result<Arc<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let _guard = self.refresh_lock.lock().await;
        let started_at = self.generation.load(Ordering::SeqCst);
        let value = loader().await?;
        Ok(self.swap_in(value, started_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn counting_load(counter: &AtomicUsize) -> Result<usize, String> {
        Ok(counter.fetch_add(1, Ordering::SeqCst) + 1)
    }

    #[tokio::test(start_paused = true)]
    async fn serves_fresh_value_until_ttl() {
        let cache = TtlCache::new("test", Duration::from_secs(60));
        let loads = AtomicUsize::new(0);

        assert_eq!(*cache.get(false, || counting_load(&loads)).await.unwrap(), 1);
        assert_eq!(*cache.get(false, || counting_load(&loads)).await.unwrap(), 1);

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(*cache.get(false, || counting_load(&loads)).await.unwrap(), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(*cache.get(false, || counting_load(&loads)).await.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn force_and_invalidate_reload() {
        let cache = TtlCache::new("test", Duration::from_secs(60));
        let loads = AtomicUsize::new(0);

        cache.get(false, || counting_load(&loads)).await.unwrap();
        assert_eq!(*cache.get(true, || counting_load(&loads)).await.unwrap(), 2);

        cache.invalidate();
        assert!(cache.is_stale());
        assert_eq!(*cache.get(false, || counting_load(&loads)).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn cold_failure_surfaces_error() {
        let cache: TtlCache<usize> = TtlCache::new("test", Duration::from_secs(60));
        let err = cache
            .get(false, || async { Err::<usize, _>("store down".to_string()) })
            .await
            .unwrap_err();
        assert_eq!(err, "store down");
        assert!(cache.peek().is_none());
    }

    #[tokio::test]
    async fn warm_failure_serves_stale() {
        let cache = TtlCache::new("test", Duration::from_secs(60));
        cache.get(false, || async { Ok::<_, String>(7usize) }).await.unwrap();
        cache.invalidate();

        let value = cache
            .get(false, || async { Err::<usize, _>("store down".to_string()) })
            .await
            .unwrap();
        assert_eq!(*value, 7);
    }

    #[tokio::test]
    async fn strict_refresh_returns_error_even_when_warm() {
        let cache = TtlCache::new("test", Duration::from_secs(60));
        cache.get(false, || async { Ok::<_, String>(7usize) }).await.unwrap();

        let err = cache
            .refresh(|| async { Err::<usize, _>("store down".to_string()) })
            .await
            .unwrap_err();
        assert_eq!(err, "store down");
        assert_eq!(*cache.peek().unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn age_tracks_last_load() {
        let cache = TtlCache::new("test", Duration::from_secs(60));
        assert!(cache.age().is_none());
        cache.get(false, || async { Ok::<_, String>(1usize) }).await.unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(cache.age(), Some(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn invalidate_during_load_forces_another_load() {
        let cache = Arc::new(TtlCache::new("test", Duration::from_secs(60)));
        let loads = Arc::new(AtomicUsize::new(0));
        let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let slow = {
            let cache = Arc::clone(&cache);
            let loads = Arc::clone(&loads);
            tokio::spawn(async move {
                cache
                    .get(false, || async move {
                        started_tx.send(()).ok();
                        release_rx.await.ok();
                        counting_load(&loads).await
                    })
                    .await
                    .unwrap()
            })
        };

        started_rx.await.unwrap();
        cache.invalidate();
        release_tx.send(()).unwrap();
        assert_eq!(*slow.await.unwrap(), 1);

        // The in-flight snapshot predates the invalidation and is not served as fresh.
        assert!(cache.is_stale());
        assert_eq!(*cache.get(false, || counting_load(&loads)).await.unwrap(), 2);
        assert!(!cache.is_stale());
    }
}
