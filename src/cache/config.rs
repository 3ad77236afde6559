//! Cache configuration.
//!
//! Resolved from the `[cache]` and `[events]` tables of `storyline.toml`
//! (see `crate::config`).

use std::str::FromStr;
use std::time::Duration;

use super::ttl::TtlPolicy;

const DEFAULT_REDIS_PORT: u16 = 6379;
const DEFAULT_OP_TIMEOUT_MS: u64 = 250;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_PATTERN_TIMEOUT_MS: u64 = 10_000;

/// Which key-value store backs the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Redis,
    Memory,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown cache backend `{other}`")),
        }
    }
}

/// Connection parameters for the Redis backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisSettings {
    /// Absent host disables caching when the backend is Redis.
    pub host: Option<String>,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: u32,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            host: None,
            port: DEFAULT_REDIS_PORT,
            username: None,
            password: None,
            database: 0,
        }
    }
}

/// Resolved cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Master switch. When false `connect()` goes straight to disabled.
    pub enabled: bool,
    /// Test execution mode: never touch the network.
    pub test_mode: bool,
    pub backend: BackendKind,
    pub redis: RedisSettings,
    /// Upper bound on every individual store operation.
    pub op_timeout: Duration,
    pub connect_timeout: Duration,
    /// Budget for a whole pattern delete. A cursor scan over a large
    /// keyspace takes many round trips, so `op_timeout` does not apply.
    pub pattern_timeout: Duration,
    /// Share one loader run between concurrent misses on the same key.
    pub coalesce_misses: bool,
    pub ttl: TtlPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            test_mode: false,
            backend: BackendKind::Redis,
            redis: RedisSettings::default(),
            op_timeout: Duration::from_millis(DEFAULT_OP_TIMEOUT_MS),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            pattern_timeout: Duration::from_millis(DEFAULT_PATTERN_TIMEOUT_MS),
            coalesce_misses: true,
            ttl: TtlPolicy::default(),
        }
    }
}

impl CacheConfig {
    /// In-process configuration used by tests and the `memory` backend.
    pub fn in_memory() -> Self {
        Self {
            backend: BackendKind::Memory,
            ..Self::default()
        }
    }

    /// Returns the reason caching cannot be connected, if any.
    pub fn disabled_reason(&self) -> Option<&'static str> {
        if !self.enabled {
            return Some("disabled_by_config");
        }
        if self.test_mode {
            return Some("test_mode");
        }
        if self.backend == BackendKind::Redis && self.redis.host.is_none() {
            return Some("redis_host_missing");
        }
        None
    }
}

/// How `EventBus::emit` runs the handlers of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// Spawn handlers and return immediately (fire and forget).
    #[default]
    Background,
    /// Await every handler before returning to the emitter.
    Inline,
}

impl FromStr for DispatchMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "background" => Ok(Self::Background),
            "inline" => Ok(Self::Inline),
            other => Err(format!("unknown dispatch mode `{other}`")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert!(!config.test_mode);
        assert_eq!(config.backend, BackendKind::Redis);
        assert_eq!(config.redis.port, 6379);
        assert_eq!(config.redis.database, 0);
        assert_eq!(config.op_timeout, Duration::from_millis(250));
        assert_eq!(config.pattern_timeout, Duration::from_secs(10));
        assert!(config.coalesce_misses);
    }

    #[test]
    fn redis_without_host_is_disabled() {
        let config = CacheConfig::default();
        assert_eq!(config.disabled_reason(), Some("redis_host_missing"));
    }

    #[test]
    fn memory_backend_needs_no_host() {
        assert_eq!(CacheConfig::in_memory().disabled_reason(), None);
    }

    #[test]
    fn test_mode_wins_over_backend() {
        let config = CacheConfig {
            test_mode: true,
            ..CacheConfig::in_memory()
        };
        assert_eq!(config.disabled_reason(), Some("test_mode"));
    }

    #[test]
    fn parse_backend_and_dispatch_mode() {
        assert_eq!("Memory".parse::<BackendKind>(), Ok(BackendKind::Memory));
        assert!("memcached".parse::<BackendKind>().is_err());
        assert_eq!("inline".parse::<DispatchMode>(), Ok(DispatchMode::Inline));
        assert_eq!(DispatchMode::default(), DispatchMode::Background);
    }
}
