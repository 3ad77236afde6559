//! Fail-open cache store.
//!
//! Wraps a [`KvBackend`] with a connection lifecycle and turns every backend
//! failure into a miss (reads) or a no-op (writes). Nothing here ever fails
//! the surrounding business operation.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use metrics::counter;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::infra::redis::RedisBackend;

use super::backend::{KvBackend, MemoryBackend, StoreError};
use super::config::{BackendKind, CacheConfig};
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store";

pub(crate) const METRIC_CACHE_HIT: &str = "storyline_cache_hit_total";
pub(crate) const METRIC_CACHE_MISS: &str = "storyline_cache_miss_total";
pub(crate) const METRIC_STORE_ERROR: &str = "storyline_cache_store_error_total";
pub(crate) const METRIC_DECODE_ERROR: &str = "storyline_cache_decode_error_total";

/// Observable connection state of a [`CacheStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreStatus {
    /// Never connected, or explicitly disconnected.
    Disconnected,
    Connected { backend: &'static str },
    /// Connection refused or skipped; every operation is a no-op.
    Disabled { reason: String },
}

impl StoreStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, StoreStatus::Connected { .. })
    }
}

impl fmt::Display for StoreStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreStatus::Disconnected => f.write_str("disconnected"),
            StoreStatus::Connected { backend } => write!(f, "connected ({backend})"),
            StoreStatus::Disabled { reason } => write!(f, "disabled ({reason})"),
        }
    }
}

enum State {
    Disconnected,
    Connected(Arc<dyn KvBackend>),
    Disabled(String),
}

impl State {
    fn status(&self) -> StoreStatus {
        match self {
            State::Disconnected => StoreStatus::Disconnected,
            State::Connected(backend) => StoreStatus::Connected {
                backend: backend.name(),
            },
            State::Disabled(reason) => StoreStatus::Disabled {
                reason: reason.clone(),
            },
        }
    }
}

/// Shared handle to the key-value cache.
pub struct CacheStore {
    config: CacheConfig,
    state: RwLock<State>,
    /// Backend supplied by the caller instead of being opened from config.
    preset: Option<Arc<dyn KvBackend>>,
    connect_gate: Mutex<()>,
}

impl CacheStore {
    /// Create a store that opens its backend from `config` on `connect()`.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            state: RwLock::new(State::Disconnected),
            preset: None,
            connect_gate: Mutex::new(()),
        }
    }

    /// Create a store bound to an existing backend.
    pub fn with_backend(config: CacheConfig, backend: Arc<dyn KvBackend>) -> Self {
        Self {
            preset: Some(backend),
            ..Self::new(config)
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn status(&self) -> StoreStatus {
        rw_read(&self.state, SOURCE, "status").status()
    }

    /// Establish the backend connection.
    ///
    /// Idempotent while connected. A refused or skipped connection leaves the
    /// store disabled until the next call.
    pub async fn connect(&self) -> StoreStatus {
        let _gate = self.connect_gate.lock().await;

        let connected = matches!(
            &*rw_read(&self.state, SOURCE, "connect.check"),
            State::Connected(_)
        );
        if connected {
            return self.status();
        }

        let next = match self.config.disabled_reason() {
            Some(reason) => {
                info!(reason, "Cache store disabled");
                State::Disabled(reason.to_string())
            }
            None => match self.open().await {
                Ok(backend) => {
                    info!(backend = backend.name(), "Cache store connected");
                    State::Connected(backend)
                }
                Err(err) => {
                    warn!(
                        error = %err,
                        "Cache store unavailable; continuing with caching disabled"
                    );
                    State::Disabled(err.to_string())
                }
            },
        };

        *rw_write(&self.state, SOURCE, "connect.set") = next;
        self.status()
    }

    /// Drop the backend connection. Safe to call repeatedly.
    pub async fn disconnect(&self) {
        let _gate = self.connect_gate.lock().await;
        let previous = std::mem::replace(
            &mut *rw_write(&self.state, SOURCE, "disconnect"),
            State::Disconnected,
        );
        if let State::Connected(backend) = previous {
            info!(backend = backend.name(), "Cache store disconnected");
        }
    }

    async fn open(&self) -> Result<Arc<dyn KvBackend>, StoreError> {
        let backend: Arc<dyn KvBackend> = match (&self.preset, self.config.backend) {
            (Some(preset), _) => Arc::clone(preset),
            (None, BackendKind::Memory) => Arc::new(MemoryBackend::new()),
            (None, BackendKind::Redis) => Arc::new(
                RedisBackend::connect(&self.config.redis, self.config.connect_timeout).await?,
            ),
        };
        self.bounded("ping", self.config.connect_timeout, backend.ping())
            .await?;
        Ok(backend)
    }

    fn backend(&self) -> Option<Arc<dyn KvBackend>> {
        match &*rw_read(&self.state, SOURCE, "backend") {
            State::Connected(backend) => Some(Arc::clone(backend)),
            State::Disconnected | State::Disabled(_) => None,
        }
    }

    async fn bounded<T>(
        &self,
        op: &'static str,
        limit: Duration,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        tokio::time::timeout(limit, fut)
            .await
            .unwrap_or_else(|_| {
                Err(StoreError::Timeout {
                    op,
                    timeout_ms: limit.as_millis(),
                })
            })
    }

    /// Fetch and decode `key`. Absent, undecodable and unreachable entries
    /// all read as `None`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let backend = self.backend()?;

        let raw = match self
            .bounded("get", self.config.op_timeout, backend.get(key))
            .await
        {
            Ok(raw) => raw,
            Err(err) => {
                report_failure("get", key, &err);
                return None;
            }
        };

        let Some(raw) = raw else {
            counter!(METRIC_CACHE_MISS).increment(1);
            debug!(key, outcome = "miss", "cache lookup");
            return None;
        };

        match serde_json::from_str(&raw) {
            Ok(value) => {
                counter!(METRIC_CACHE_HIT).increment(1);
                debug!(key, outcome = "hit", "cache lookup");
                Some(value)
            }
            Err(err) => {
                counter!(METRIC_DECODE_ERROR).increment(1);
                counter!(METRIC_CACHE_MISS).increment(1);
                warn!(key, error = %err, "Discarding undecodable cache entry");
                None
            }
        }
    }

    /// Encode and store `value` under `key` for `ttl`. Best effort.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) {
        if let Err(err) = self.try_set(key, value, ttl).await {
            report_failure("set", key, &err);
        }
    }

    pub(crate) async fn set_raw(&self, key: &str, payload: String, ttl: Duration) {
        let Some(backend) = self.backend() else {
            return;
        };
        if let Err(err) = self
            .bounded("set", self.config.op_timeout, backend.set_ex(key, payload, ttl))
            .await
        {
            report_failure("set", key, &err);
        }
    }

    async fn try_set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let Some(backend) = self.backend() else {
            return Ok(());
        };
        let payload = serde_json::to_string(value)?;
        self.bounded("set", self.config.op_timeout, backend.set_ex(key, payload, ttl))
            .await
    }

    /// Remove one key. Best effort.
    pub async fn delete(&self, key: &str) {
        if let Err(err) = self.try_delete(key).await {
            report_failure("delete", key, &err);
        }
    }

    /// Remove every key matching `pattern`. Best effort.
    pub async fn delete_pattern(&self, pattern: &str) {
        if let Err(err) = self.try_delete_pattern(pattern).await {
            report_pattern_failure(pattern, &err);
        }
    }

    /// Remove one key, reporting failures. A disconnected store removes
    /// nothing and succeeds.
    pub async fn try_delete(&self, key: &str) -> Result<u64, StoreError> {
        let Some(backend) = self.backend() else {
            return Ok(0);
        };
        self.bounded("delete", self.config.op_timeout, backend.delete(key))
            .await
    }

    /// Remove every key matching `pattern`, reporting failures.
    pub async fn try_delete_pattern(&self, pattern: &str) -> Result<u64, StoreError> {
        let Some(backend) = self.backend() else {
            return Ok(0);
        };
        self.bounded(
            "delete_pattern",
            self.config.pattern_timeout,
            backend.delete_pattern(pattern),
        )
        .await
    }
}

fn report_failure(op: &'static str, key: &str, err: &StoreError) {
    counter!(METRIC_STORE_ERROR, "op" => op).increment(1);
    warn!(op, key, error = %err, "Cache operation failed; continuing without cache");
}

fn report_pattern_failure(pattern: &str, err: &StoreError) {
    let op = "delete_pattern";
    counter!(METRIC_STORE_ERROR, "op" => op).increment(1);
    warn!(op, pattern, error = %err, "Cache operation failed; continuing without cache");
}
