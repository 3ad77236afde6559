//! Key-value backends behind [`CacheStore`](super::CacheStore).
//!
//! Backends report every failure; turning failures into misses and no-ops
//! is the store's job.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use glob::Pattern;
use thiserror::Error;
use tokio::time::Instant;

use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::backend";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache backend error: {0}")]
    Backend(String),
    #[error("cache operation `{op}` timed out after {timeout_ms} ms")]
    Timeout { op: &'static str, timeout_ms: u128 },
    #[error("failed to encode cache value: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("invalid key pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

impl StoreError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }
}

/// Raw operations against a key-value store holding serialized values.
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    async fn ping(&self) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError>;

    /// Returns the number of removed keys (0 or 1).
    async fn delete(&self, key: &str) -> Result<u64, StoreError>;

    /// Removes every key matching a glob pattern in one batch. A pattern
    /// without matches is not an error.
    async fn delete_pattern(&self, pattern: &str) -> Result<u64, StoreError>;
}

/// Match `key` against a Redis-style glob pattern.
pub fn glob_matches(pattern: &str, key: &str) -> Result<bool, StoreError> {
    compile(pattern).map(|compiled| compiled.matches(key))
}

fn compile(pattern: &str) -> Result<Pattern, StoreError> {
    Pattern::new(pattern).map_err(|err| StoreError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: err.to_string(),
    })
}

struct MemoryEntry {
    value: String,
    expires_at: Instant,
}

impl MemoryEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Process-local backend with per-entry expiry.
///
/// Expiry follows the tokio clock, so tests can pause and advance time.
/// Expired entries are never returned and are purged on the next write.
#[derive(Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, MemoryEntry>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live keys matching `pattern`, sorted.
    pub fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let compiled = compile(pattern)?;
        let now = Instant::now();
        let entries = rw_read(&self.entries, SOURCE, "keys");
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(key, entry)| entry.is_live(now) && compiled.matches(key))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        rw_read(&self.entries, SOURCE, "contains")
            .get(key)
            .is_some_and(|entry| entry.is_live(now))
    }

    /// Store a raw payload, bypassing serialization. Useful to plant
    /// undecodable entries.
    pub fn insert_raw(&self, key: &str, value: &str, ttl: Duration) {
        rw_write(&self.entries, SOURCE, "insert_raw").insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        rw_read(&self.entries, SOURCE, "len")
            .values()
            .filter(|entry| entry.is_live(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        Ok(rw_read(&self.entries, SOURCE, "get")
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError> {
        if ttl.is_zero() {
            return Err(StoreError::backend("invalid expire time in 'setex' command"));
        }
        let now = Instant::now();
        let mut entries = rw_write(&self.entries, SOURCE, "set_ex");
        entries.retain(|_, entry| entry.is_live(now));
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value,
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<u64, StoreError> {
        let now = Instant::now();
        let removed = rw_write(&self.entries, SOURCE, "delete").remove(key);
        Ok(u64::from(removed.is_some_and(|entry| entry.is_live(now))))
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64, StoreError> {
        let compiled = compile(pattern)?;
        let now = Instant::now();
        let mut removed = 0;
        rw_write(&self.entries, SOURCE, "delete_pattern").retain(|key, entry| {
            if !compiled.matches(key) {
                return true;
            }
            if entry.is_live(now) {
                removed += 1;
            }
            false
        });
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn entries_expire_on_the_tokio_clock() {
        let backend = MemoryBackend::new();
        backend
            .set_ex("series:a", "1".to_string(), Duration::from_secs(10))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(backend.get("series:a").await.unwrap().as_deref(), Some("1"));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(backend.get("series:a").await.unwrap(), None);
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn zero_ttl_is_rejected() {
        let backend = MemoryBackend::new();
        let err = backend
            .set_ex("k", "v".to_string(), Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
    }

    #[tokio::test]
    async fn delete_reports_removed_count() {
        let backend = MemoryBackend::new();
        backend
            .set_ex("k", "v".to_string(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(backend.delete("k").await.unwrap(), 1);
        assert_eq!(backend.delete("k").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_pattern_removes_only_matches() {
        let backend = MemoryBackend::new();
        for key in ["series:1:kb:a", "series:1:kb:b", "series:1:canvas", "series:2:kb:a"] {
            backend
                .set_ex(key, "v".to_string(), Duration::from_secs(60))
                .await
                .unwrap();
        }

        assert_eq!(backend.delete_pattern("series:1:kb:*").await.unwrap(), 2);
        assert_eq!(
            backend.keys("*").unwrap(),
            vec!["series:1:canvas".to_string(), "series:2:kb:a".to_string()]
        );
    }

    #[tokio::test]
    async fn delete_pattern_without_matches_is_silent() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.delete_pattern("nothing:*").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn malformed_pattern_is_reported() {
        let backend = MemoryBackend::new();
        let err = backend.delete_pattern("series:[").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidPattern { .. }));
    }

    #[test]
    fn glob_question_mark_matches_one_char() {
        assert!(glob_matches("series:?", "series:1").unwrap());
        assert!(!glob_matches("series:?", "series:12").unwrap());
    }
}
