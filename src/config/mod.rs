//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use uuid::Uuid;

use crate::cache::{BackendKind, CacheConfig, DispatchMode, RedisSettings, TtlPolicy};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "storyline";
const ENV_PREFIX: &str = "STORYLINE";
const TEST_MODE_ENV: &str = "STORYLINE_TEST_MODE";

/// Command-line arguments for the Storyline binary.
#[derive(Debug, Parser)]
#[command(name = "storyline", version, about = "Storyline cache operations")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "STORYLINE_CONFIG_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: GlobalOverrides,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Connect to the cache store and report its status.
    Ping,
    /// Delete every cached entry belonging to a series.
    Purge(SeriesArgs),
    /// Print the cache keys and invalidation patterns of a series.
    Keys(SeriesArgs),
}

#[derive(Debug, Args, Clone)]
pub struct SeriesArgs {
    /// Series identifier.
    #[arg(long = "series", value_name = "UUID")]
    pub series: Uuid,
}

#[derive(Debug, Args, Default, Clone)]
pub struct GlobalOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Override the cache backend (redis|memory).
    #[arg(long = "cache-backend", value_name = "BACKEND", global = true)]
    pub cache_backend: Option<String>,

    /// Override the Redis host.
    #[arg(long = "redis-host", value_name = "HOST", global = true)]
    pub redis_host: Option<String>,

    /// Override the Redis port.
    #[arg(long = "redis-port", value_name = "PORT", global = true)]
    pub redis_port: Option<u16>,

    /// Override the Redis database index.
    #[arg(long = "redis-database", value_name = "INDEX", global = true)]
    pub redis_database: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub cache: CacheConfig,
    pub events: EventSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone, Copy)]
pub struct EventSettings {
    pub dispatch: DispatchMode,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    if std::env::var(TEST_MODE_ENV).is_ok_and(|value| is_truthy(&value)) {
        raw.cache.test_mode = Some(true);
    }
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    events: RawEventSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &GlobalOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(backend) = overrides.cache_backend.as_ref() {
            self.cache.backend = Some(backend.clone());
        }
        if let Some(host) = overrides.redis_host.as_ref() {
            self.cache.redis.host = Some(host.clone());
        }
        if let Some(port) = overrides.redis_port {
            self.cache.redis.port = Some(port);
        }
        if let Some(database) = overrides.redis_database {
            self.cache.redis.database = Some(database);
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    backend: Option<String>,
    test_mode: Option<bool>,
    op_timeout_ms: Option<u64>,
    connect_timeout_ms: Option<u64>,
    pattern_timeout_ms: Option<u64>,
    coalesce_misses: Option<bool>,
    redis: RawRedisSettings,
    ttl: TtlPolicy,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRedisSettings {
    host: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    database: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawEventSettings {
    dispatch: Option<String>,
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        Ok(Self {
            logging: build_logging_settings(raw.logging)?,
            cache: build_cache_settings(raw.cache)?,
            events: build_event_settings(raw.events)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheConfig, LoadError> {
    let defaults = CacheConfig::default();

    let backend = match cache.backend {
        Some(value) => BackendKind::from_str(&value)
            .map_err(|reason| LoadError::invalid("cache.backend", reason))?,
        None => defaults.backend,
    };

    let op_timeout = positive_millis(cache.op_timeout_ms, defaults.op_timeout, "cache.op_timeout_ms")?;
    let connect_timeout = positive_millis(
        cache.connect_timeout_ms,
        defaults.connect_timeout,
        "cache.connect_timeout_ms",
    )?;
    let pattern_timeout = positive_millis(
        cache.pattern_timeout_ms,
        defaults.pattern_timeout,
        "cache.pattern_timeout_ms",
    )?;
    if pattern_timeout < op_timeout {
        return Err(LoadError::invalid(
            "cache.pattern_timeout_ms",
            "must not be shorter than cache.op_timeout_ms",
        ));
    }

    if let Some(tier) = cache.ttl.zero_tier() {
        return Err(LoadError::invalid(
            "cache.ttl",
            format!("`{tier}` must be greater than zero"),
        ));
    }

    let redis_defaults = RedisSettings::default();
    let redis = RedisSettings {
        host: non_blank(cache.redis.host),
        port: cache.redis.port.unwrap_or(redis_defaults.port),
        username: non_blank(cache.redis.username),
        password: non_blank(cache.redis.password),
        database: cache.redis.database.unwrap_or(redis_defaults.database),
    };

    Ok(CacheConfig {
        enabled: cache.enabled.unwrap_or(defaults.enabled),
        test_mode: cache.test_mode.unwrap_or(defaults.test_mode),
        backend,
        redis,
        op_timeout,
        connect_timeout,
        pattern_timeout,
        coalesce_misses: cache.coalesce_misses.unwrap_or(defaults.coalesce_misses),
        ttl: cache.ttl,
    })
}

fn build_event_settings(events: RawEventSettings) -> Result<EventSettings, LoadError> {
    let dispatch = match events.dispatch {
        Some(value) => DispatchMode::from_str(&value)
            .map_err(|reason| LoadError::invalid("events.dispatch", reason))?,
        None => DispatchMode::default(),
    };
    Ok(EventSettings { dispatch })
}

fn positive_millis(
    value: Option<u64>,
    default: Duration,
    key: &'static str,
) -> Result<Duration, LoadError> {
    match value {
        Some(0) => Err(LoadError::invalid(key, "must be greater than zero")),
        Some(millis) => Ok(Duration::from_millis(millis)),
        None => Ok(default),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::EventBus;

    #[test]
    fn defaults_resolve_without_any_source() {
        let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

        assert_eq!(settings.logging.level, LevelFilter::INFO);
        assert!(matches!(settings.logging.format, LogFormat::Compact));
        assert_eq!(settings.cache.backend, BackendKind::Redis);
        assert_eq!(settings.cache.redis.host, None);
        assert_eq!(settings.cache.op_timeout, Duration::from_millis(250));
        assert_eq!(settings.cache.ttl, TtlPolicy::default());
        assert_eq!(settings.events.dispatch, DispatchMode::Background);
    }

    #[test]
    fn cli_overrides_take_highest_precedence() {
        let mut raw = RawSettings::default();
        raw.logging.level = Some("info".to_string());
        raw.cache.redis.host = Some("cache.internal".to_string());
        raw.cache.redis.port = Some(6380);

        let overrides = GlobalOverrides {
            log_level: Some("debug".to_string()),
            redis_port: Some(7000),
            ..Default::default()
        };

        raw.apply_overrides(&overrides);
        let settings = Settings::from_raw(raw).expect("valid settings");

        assert_eq!(settings.logging.level, LevelFilter::DEBUG);
        assert_eq!(settings.cache.redis.host.as_deref(), Some("cache.internal"));
        assert_eq!(settings.cache.redis.port, 7000);
    }

    #[test]
    fn cli_json_logging_enforces_format() {
        let mut raw = RawSettings::default();
        let overrides = GlobalOverrides {
            log_json: Some(true),
            ..Default::default()
        };

        raw.apply_overrides(&overrides);
        let settings = Settings::from_raw(raw).expect("valid settings");

        assert!(matches!(settings.logging.format, LogFormat::Json));
    }

    #[test]
    fn blank_redis_host_counts_as_absent() {
        let mut raw = RawSettings::default();
        raw.cache.redis.host = Some("   ".to_string());

        let settings = Settings::from_raw(raw).expect("valid settings");
        assert_eq!(settings.cache.redis.host, None);
        assert_eq!(settings.cache.disabled_reason(), Some("redis_host_missing"));
    }

    #[test]
    fn zero_ttl_tier_is_rejected() {
        let mut raw = RawSettings::default();
        raw.cache.ttl.list_seconds = 0;

        let err = Settings::from_raw(raw).expect_err("zero ttl must fail");
        assert!(matches!(err, LoadError::Invalid { key: "cache.ttl", .. }));
    }

    #[test]
    fn zero_op_timeout_is_rejected() {
        let mut raw = RawSettings::default();
        raw.cache.op_timeout_ms = Some(0);

        let err = Settings::from_raw(raw).expect_err("zero timeout must fail");
        assert!(matches!(
            err,
            LoadError::Invalid {
                key: "cache.op_timeout_ms",
                ..
            }
        ));
    }

    #[test]
    fn pattern_timeout_defaults_and_bounds() {
        let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");
        assert_eq!(settings.cache.pattern_timeout, Duration::from_secs(10));

        let mut raw = RawSettings::default();
        raw.cache.pattern_timeout_ms = Some(30_000);
        let settings = Settings::from_raw(raw).expect("valid settings");
        assert_eq!(settings.cache.pattern_timeout, Duration::from_secs(30));

        let mut raw = RawSettings::default();
        raw.cache.op_timeout_ms = Some(500);
        raw.cache.pattern_timeout_ms = Some(100);
        assert!(matches!(
            Settings::from_raw(raw),
            Err(LoadError::Invalid {
                key: "cache.pattern_timeout_ms",
                ..
            })
        ));
    }

    #[test]
    fn unknown_backend_and_dispatch_are_rejected() {
        let mut raw = RawSettings::default();
        raw.cache.backend = Some("memcached".to_string());
        assert!(matches!(
            Settings::from_raw(raw),
            Err(LoadError::Invalid {
                key: "cache.backend",
                ..
            })
        ));

        let mut raw = RawSettings::default();
        raw.events.dispatch = Some("eventually".to_string());
        assert!(matches!(
            Settings::from_raw(raw),
            Err(LoadError::Invalid {
                key: "events.dispatch",
                ..
            })
        ));
    }

    #[test]
    fn inline_dispatch_and_memory_backend_parse() {
        let mut raw = RawSettings::default();
        raw.cache.backend = Some("memory".to_string());
        raw.events.dispatch = Some("inline".to_string());

        let settings = Settings::from_raw(raw).expect("valid settings");
        assert_eq!(settings.cache.backend, BackendKind::Memory);
        assert_eq!(settings.events.dispatch, DispatchMode::Inline);
        assert_eq!(EventBus::from(&settings.events).mode(), DispatchMode::Inline);
    }

    #[test]
    fn event_bus_defaults_to_background_dispatch() {
        let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");
        assert_eq!(EventBus::from(&settings.events).mode(), DispatchMode::Background);
    }

    #[test]
    fn truthy_values() {
        assert!(is_truthy("1"));
        assert!(is_truthy(" TRUE "));
        assert!(is_truthy("on"));
        assert!(!is_truthy("0"));
        assert!(!is_truthy(""));
    }

    #[test]
    fn parse_purge_arguments() {
        let series = Uuid::new_v4();
        let series_arg = series.to_string();
        let args = CliArgs::parse_from([
            "storyline",
            "purge",
            "--series",
            series_arg.as_str(),
            "--log-level",
            "warn",
        ]);

        match args.command {
            Some(Command::Purge(purge)) => assert_eq!(purge.series, series),
            other => panic!("unexpected command: {other:?}"),
        }
        assert_eq!(args.overrides.log_level.as_deref(), Some("warn"));
    }

    #[test]
    fn parse_ping_with_backend_override() {
        let args = CliArgs::parse_from(["storyline", "--cache-backend", "memory", "ping"]);
        assert!(matches!(args.command, Some(Command::Ping)));
        assert_eq!(args.overrides.cache_backend.as_deref(), Some("memory"));
    }
}
