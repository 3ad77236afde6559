//! Storyline cache layer.
//!
//! - [`CacheStore`]: fail-open key-value store over Redis or process memory
//! - [`CacheAside`]: read-through helper used by every cached read
//! - [`EventBus`]: routes [`DomainEvent`]s from services to handlers
//! - [`InvalidationEngine`]: applies the [`RULES`] table on each event
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! backend = "redis"
//! op_timeout_ms = 250
//!
//! [cache.redis]
//! host = "127.0.0.1"
//!
//! [events]
//! dispatch = "background"
//! ```

mod aside;
mod backend;
mod bus;
mod config;
mod engine;
mod events;
pub mod keys;
mod lock;
mod rules;
mod store;
mod ttl;

pub use aside::CacheAside;
pub use backend::{KvBackend, MemoryBackend, StoreError, glob_matches};
pub use bus::{DispatchReport, EventBus, EventHandler, HandlerError, HandlerFailure};
pub use config::{BackendKind, CacheConfig, DispatchMode, RedisSettings};
pub use engine::{InvalidationEngine, InvalidationReport};
pub use events::{DomainEvent, Epoch, EventKind, EventPayload};
pub use rules::{Guard, InvalidationAction, RULES, Rule, RuleTable, Target};
pub use store::{CacheStore, StoreStatus};
pub use ttl::{TtlClass, TtlPolicy};

pub(crate) use aside::METRIC_COALESCED;
pub(crate) use bus::METRIC_HANDLER_FAILURE;
pub(crate) use engine::{METRIC_ACTION_FAILURE, METRIC_INVALIDATION_MS};
pub(crate) use store::{METRIC_CACHE_HIT, METRIC_CACHE_MISS, METRIC_DECODE_ERROR, METRIC_STORE_ERROR};
