//! Event-driven cache invalidation.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use metrics::{counter, histogram};
use tracing::{debug, info, warn};

use super::bus::{EventBus, EventHandler, HandlerError};
use super::events::DomainEvent;
use super::rules::{InvalidationAction, RuleTable};
use super::store::CacheStore;

pub(crate) const METRIC_ACTION_FAILURE: &str = "storyline_invalidation_action_failure_total";
pub(crate) const METRIC_INVALIDATION_MS: &str = "storyline_invalidation_ms";

/// Outcome of applying the plan of one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InvalidationReport {
    /// Actions the store accepted.
    pub applied: usize,
    pub failed: usize,
    /// Keys actually removed across all applied actions.
    pub removed: u64,
}

/// Turns domain events into store deletes according to a [`RuleTable`].
pub struct InvalidationEngine {
    store: Arc<CacheStore>,
    rules: RuleTable,
}

impl InvalidationEngine {
    pub fn new(store: Arc<CacheStore>) -> Self {
        Self::with_rules(store, RuleTable::default())
    }

    pub fn with_rules(store: Arc<CacheStore>, rules: RuleTable) -> Self {
        Self { store, rules }
    }

    /// Subscribe to every event kind that has at least one rule.
    pub fn register(self: &Arc<Self>, bus: &EventBus) {
        for kind in self.rules.kinds() {
            bus.on(kind, Arc::clone(self) as Arc<dyn EventHandler>);
        }
    }

    /// Run every action planned for `event`. Each action is attempted even
    /// when an earlier one failed.
    pub async fn apply(&self, event: &DomainEvent) -> InvalidationReport {
        let started_at = Instant::now();
        let kind = event.kind();
        let actions = self.rules.plan(&event.payload);
        let mut report = InvalidationReport::default();

        for action in &actions {
            let outcome = match action {
                InvalidationAction::Key(key) => self.store.try_delete(key).await,
                InvalidationAction::Pattern(pattern) => {
                    self.store.try_delete_pattern(pattern).await
                }
            };

            match outcome {
                Ok(removed) => {
                    report.applied += 1;
                    report.removed += removed;
                    debug!(event_id = %event.id, action = %action, removed, "Invalidation action applied");
                }
                Err(err) => {
                    report.failed += 1;
                    counter!(METRIC_ACTION_FAILURE, "event_kind" => kind.as_str()).increment(1);
                    warn!(
                        event_id = %event.id,
                        event_kind = %kind,
                        series_id = %event.series_id(),
                        action = %action,
                        error = %err,
                        "Cache invalidation action failed"
                    );
                }
            }
        }

        histogram!(METRIC_INVALIDATION_MS, "event_kind" => kind.as_str())
            .record(started_at.elapsed().as_secs_f64() * 1000.0);

        info!(
            event_id = %event.id,
            event_kind = %kind,
            series_id = %event.series_id(),
            applied = report.applied,
            failed = report.failed,
            removed = report.removed,
            "Cache invalidation complete"
        );

        report
    }
}

#[async_trait]
impl EventHandler for InvalidationEngine {
    fn name(&self) -> &'static str {
        "cache_invalidation"
    }

    async fn handle(&self, event: &DomainEvent) -> Result<(), HandlerError> {
        let report = self.apply(event).await;
        if report.failed > 0 {
            return Err(HandlerError::Invalidation {
                failed: report.failed,
                total: report.failed + report.applied,
            });
        }
        Ok(())
    }
}
