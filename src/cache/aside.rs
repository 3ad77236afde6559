//! Read-through ("cache-aside") primitive used by every cached read path.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use metrics::counter;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use super::store::CacheStore;
use super::ttl::{TtlClass, TtlPolicy};

pub(crate) const METRIC_COALESCED: &str = "storyline_cache_coalesced_total";

/// Per-key gate shared by concurrent misses. Holds the serialized result of
/// the caller that ran the loader.
type Gate = Arc<Mutex<Option<String>>>;

/// Get-or-compute-and-store over a [`CacheStore`].
pub struct CacheAside {
    store: Arc<CacheStore>,
    ttl: TtlPolicy,
    coalesce: bool,
    in_flight: DashMap<String, Gate>,
}

impl CacheAside {
    pub fn new(store: Arc<CacheStore>) -> Self {
        let ttl = store.config().ttl;
        let coalesce = store.config().coalesce_misses;
        Self {
            store,
            ttl,
            coalesce,
            in_flight: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn ttl(&self) -> &TtlPolicy {
        &self.ttl
    }

    /// Return the cached value for `key`, or run `loader`, store its result
    /// for the duration of `class`, and return it.
    ///
    /// Loader errors are returned unchanged and never cached.
    pub async fn cached<T, E, F, Fut>(&self, key: &str, class: TtlClass, loader: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.cached_for(key, self.ttl.duration(class), loader).await
    }

    /// [`cached`](Self::cached) with an explicit TTL.
    pub async fn cached_for<T, E, F, Fut>(&self, key: &str, ttl: Duration, loader: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(hit) = self.store.get::<T>(key).await {
            return Ok(hit);
        }

        if !self.coalesce {
            let value = loader().await?;
            self.store.set(key, &value, ttl).await;
            return Ok(value);
        }

        let lease = GateLease::acquire(&self.in_flight, key);
        self.load_coalesced(&lease.gate, key, ttl, loader).await
    }

    async fn load_coalesced<T, E, F, Fut>(
        &self,
        gate: &Gate,
        key: &str,
        ttl: Duration,
        loader: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut slot: MutexGuard<'_, Option<String>> = match gate.try_lock() {
            Ok(slot) => slot,
            Err(_) => {
                let slot = gate.lock().await;
                if let Some(value) = slot.as_deref().and_then(decode::<T>) {
                    counter!(METRIC_COALESCED).increment(1);
                    debug!(key, outcome = "coalesced", "cache lookup");
                    return Ok(value);
                }
                // The previous holder failed or wrote nothing; the store may
                // still have been filled by someone else.
                if let Some(hit) = self.store.get::<T>(key).await {
                    return Ok(hit);
                }
                slot
            }
        };

        *slot = None;
        let value = loader().await?;

        match serde_json::to_string(&value) {
            Ok(payload) => {
                self.store.set_raw(key, payload.clone(), ttl).await;
                *slot = Some(payload);
            }
            Err(err) => {
                warn!(key, error = %err, "Cache value could not be encoded; skipping write-back");
            }
        }

        Ok(value)
    }

    #[cfg(test)]
    fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }
}

/// A caller's hold on a key's gate. Dropping it, on completion or when the
/// read is cancelled, unregisters the gate once no other caller holds it.
struct GateLease<'a> {
    registry: &'a DashMap<String, Gate>,
    key: &'a str,
    gate: Gate,
}

impl<'a> GateLease<'a> {
    fn acquire(registry: &'a DashMap<String, Gate>, key: &'a str) -> Self {
        let gate = Arc::clone(registry.entry(key.to_string()).or_default().value());
        Self {
            registry,
            key,
            gate,
        }
    }
}

impl Drop for GateLease<'_> {
    fn drop(&mut self) {
        drop(std::mem::take(&mut self.gate));
        // Only the registry's own reference left: nobody is loading or waiting.
        self.registry
            .remove_if(self.key, |_, gate| Arc::strong_count(gate) == 1);
    }
}

fn decode<T: DeserializeOwned>(payload: &str) -> Option<T> {
    serde_json::from_str(payload).ok()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use thiserror::Error;

    use super::*;
    use crate::cache::backend::MemoryBackend;
    use crate::cache::config::CacheConfig;

    #[derive(Debug, Error, PartialEq)]
    #[error("loader failed: {0}")]
    struct LoadError(&'static str);

    async fn connected(config: CacheConfig) -> (Arc<MemoryBackend>, CacheAside) {
        let backend = Arc::new(MemoryBackend::new());
        let store = Arc::new(CacheStore::with_backend(config, backend.clone()));
        store.connect().await;
        (backend, CacheAside::new(store))
    }

    async fn counted(calls: &AtomicUsize, value: u32) -> Result<u32, LoadError> {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(value)
    }

    #[tokio::test]
    async fn miss_runs_loader_once_then_hits() {
        let (backend, aside) = connected(CacheConfig::in_memory()).await;
        let first = AtomicUsize::new(0);
        let second = AtomicUsize::new(0);

        let value = aside
            .cached("series:list:10:0", TtlClass::List, || counted(&first, 1))
            .await
            .unwrap();
        assert_eq!(value, 1);

        let value = aside
            .cached("series:list:10:0", TtlClass::List, || counted(&second, 2))
            .await
            .unwrap();
        assert_eq!(value, 1);
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
        assert!(backend.contains("series:list:10:0"));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_is_recomputed_and_overwritten() {
        let (backend, aside) = connected(CacheConfig::in_memory()).await;
        let calls = AtomicUsize::new(0);
        let ttl = aside.ttl().duration(TtlClass::List);

        aside.cached("k", TtlClass::List, || counted(&calls, 1)).await.unwrap();
        tokio::time::advance(ttl).await;
        assert!(!backend.contains("k"));

        let value = aside.cached("k", TtlClass::List, || counted(&calls, 2)).await.unwrap();
        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let value = aside.cached("k", TtlClass::List, || counted(&calls, 3)).await.unwrap();
        assert_eq!(value, 2);
    }

    #[tokio::test]
    async fn deleted_entry_is_recomputed() {
        let (_, aside) = connected(CacheConfig::in_memory()).await;
        let calls = AtomicUsize::new(0);

        aside.cached("k", TtlClass::Entity, || counted(&calls, 1)).await.unwrap();
        aside.store().delete("k").await;
        let value = aside.cached("k", TtlClass::Entity, || counted(&calls, 2)).await.unwrap();

        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn loader_failure_propagates_and_is_not_cached() {
        let (backend, aside) = connected(CacheConfig::in_memory()).await;

        let err = aside
            .cached("k", TtlClass::Entity, || async {
                Err::<u32, _>(LoadError("db down"))
            })
            .await
            .unwrap_err();
        assert_eq!(err, LoadError("db down"));
        assert!(!backend.contains("k"));

        let calls = AtomicUsize::new(0);
        let value = aside.cached("k", TtlClass::Entity, || counted(&calls, 7)).await.unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(aside.in_flight_len(), 0);
    }

    #[tokio::test]
    async fn disconnected_store_always_runs_loader() {
        let store = Arc::new(CacheStore::new(CacheConfig {
            coalesce_misses: false,
            ..CacheConfig::default()
        }));
        let aside = CacheAside::new(store);
        let calls = AtomicUsize::new(0);

        for expected in 1..=3 {
            let value = aside
                .cached("k", TtlClass::Entity, || counted(&calls, expected))
                .await
                .unwrap();
            assert_eq!(value, expected);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    async fn slow(calls: &AtomicUsize, value: u32) -> Result<u32, LoadError> {
        calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(value)
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_misses_share_one_loader() {
        let (_, aside) = connected(CacheConfig::in_memory()).await;
        let calls = AtomicUsize::new(0);

        let (a, b, c) = tokio::join!(
            aside.cached("k", TtlClass::List, || slow(&calls, 1)),
            aside.cached("k", TtlClass::List, || slow(&calls, 2)),
            aside.cached("k", TtlClass::List, || slow(&calls, 3)),
        );

        assert_eq!((a.unwrap(), b.unwrap(), c.unwrap()), (1, 1, 1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(aside.in_flight_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn coalescing_works_without_a_store() {
        let aside = CacheAside::new(Arc::new(CacheStore::new(CacheConfig::default())));
        let calls = AtomicUsize::new(0);

        let (a, b) = tokio::join!(
            aside.cached("k", TtlClass::List, || slow(&calls, 1)),
            aside.cached("k", TtlClass::List, || slow(&calls, 2)),
        );

        assert_eq!((a.unwrap(), b.unwrap()), (1, 1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn without_coalescing_every_concurrent_miss_loads() {
        let config = CacheConfig {
            coalesce_misses: false,
            ..CacheConfig::in_memory()
        };
        let (_, aside) = connected(config).await;
        let calls = AtomicUsize::new(0);

        let (a, b) = tokio::join!(
            aside.cached("k", TtlClass::List, || slow(&calls, 1)),
            aside.cached("k", TtlClass::List, || slow(&calls, 2)),
        );

        assert!(a.is_ok() && b.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_read_releases_its_gate() {
        let (backend, aside) = connected(CacheConfig::in_memory()).await;

        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            aside.cached("k", TtlClass::List, || async {
                std::future::pending::<()>().await;
                Ok::<u32, LoadError>(0)
            }),
        )
        .await;

        assert!(abandoned.is_err());
        assert_eq!(aside.in_flight_len(), 0);
        assert!(!backend.contains("k"));

        let calls = AtomicUsize::new(0);
        let value = aside.cached("k", TtlClass::List, || counted(&calls, 4)).await.unwrap();
        assert_eq!(value, 4);
        assert_eq!(aside.in_flight_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_leader_hands_over_to_a_waiting_follower() {
        let (_, aside) = connected(CacheConfig::in_memory()).await;
        let calls = AtomicUsize::new(0);

        let leader = tokio::time::timeout(
            Duration::from_millis(10),
            aside.cached("k", TtlClass::List, || async {
                std::future::pending::<()>().await;
                Ok::<u32, LoadError>(0)
            }),
        );
        let (leader, follower) = tokio::join!(
            leader,
            aside.cached("k", TtlClass::List, || slow(&calls, 5)),
        );

        assert!(leader.is_err());
        assert_eq!(follower.unwrap(), 5);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(aside.in_flight_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn follower_loads_for_itself_when_leader_fails() {
        let (_, aside) = connected(CacheConfig::in_memory()).await;
        let calls = AtomicUsize::new(0);

        let calls = &calls;
        let failing = || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Err::<u32, _>(LoadError("timeout"))
        };

        let (leader, follower) = tokio::join!(
            aside.cached("k", TtlClass::List, failing),
            aside.cached("k", TtlClass::List, || slow(calls, 9)),
        );

        assert_eq!(leader.unwrap_err(), LoadError("timeout"));
        assert_eq!(follower.unwrap(), 9);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
