//! Volatility tiers for cached reads.

use std::time::Duration;

use serde::Deserialize;

const DEFAULT_STATIC_SECS: u64 = 86_400;
const DEFAULT_USER_SECS: u64 = 60;
const DEFAULT_ENTITY_SECS: u64 = 600;
const DEFAULT_LIST_SECS: u64 = 120;
const DEFAULT_AGGREGATION_SECS: u64 = 3_600;

/// Named TTL tier. Every cached read declares one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TtlClass {
    /// Reference data that effectively never changes.
    Static,
    /// Per-user views; short lived.
    UserScoped,
    /// A single entity looked up by id.
    Entity,
    /// Paginated lists and search pages.
    List,
    /// Expensive derived views (exports, continuity graphs).
    Aggregation,
}

impl TtlClass {
    pub fn as_str(self) -> &'static str {
        match self {
            TtlClass::Static => "static",
            TtlClass::UserScoped => "user",
            TtlClass::Entity => "entity",
            TtlClass::List => "list",
            TtlClass::Aggregation => "aggregation",
        }
    }
}

/// Durations assigned to each [`TtlClass`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TtlPolicy {
    pub static_seconds: u64,
    pub user_seconds: u64,
    pub entity_seconds: u64,
    pub list_seconds: u64,
    pub aggregation_seconds: u64,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            static_seconds: DEFAULT_STATIC_SECS,
            user_seconds: DEFAULT_USER_SECS,
            entity_seconds: DEFAULT_ENTITY_SECS,
            list_seconds: DEFAULT_LIST_SECS,
            aggregation_seconds: DEFAULT_AGGREGATION_SECS,
        }
    }
}

impl TtlPolicy {
    pub fn seconds(&self, class: TtlClass) -> u64 {
        match class {
            TtlClass::Static => self.static_seconds,
            TtlClass::UserScoped => self.user_seconds,
            TtlClass::Entity => self.entity_seconds,
            TtlClass::List => self.list_seconds,
            TtlClass::Aggregation => self.aggregation_seconds,
        }
    }

    pub fn duration(&self, class: TtlClass) -> Duration {
        Duration::from_secs(self.seconds(class))
    }

    /// Name of the first tier configured with a zero duration, if any.
    pub fn zero_tier(&self) -> Option<&'static str> {
        [
            TtlClass::Static,
            TtlClass::UserScoped,
            TtlClass::Entity,
            TtlClass::List,
            TtlClass::Aggregation,
        ]
        .into_iter()
        .find(|class| self.seconds(*class) == 0)
        .map(TtlClass::as_str)
    }
}
