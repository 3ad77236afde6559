//! In-process domain event bus.
//!
//! Handlers are registered per [`EventKind`] at startup. Each emission runs
//! the handlers of its kind one after another in registration order, either
//! on a spawned task (`Background`) or before `emit` returns (`Inline`).
//! Handler failures are logged and counted here and never reach the emitter.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use metrics::counter;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EventSettings;

use super::config::DispatchMode;
use super::events::{DomainEvent, Epoch, EventKind, EventPayload};
use super::lock::{mutex_lock, rw_read, rw_write};

const SOURCE: &str = "cache::bus";

pub(crate) const METRIC_HANDLER_FAILURE: &str = "storyline_event_handler_failure_total";

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{failed} of {total} invalidation actions failed")]
    Invalidation { failed: usize, total: usize },
    #[error("{0}")]
    Other(String),
}

/// Subscriber to domain events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Name used in logs and metric labels.
    fn name(&self) -> &'static str;

    async fn handle(&self, event: &DomainEvent) -> Result<(), HandlerError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerFailure {
    pub handler: &'static str,
    pub error: String,
}

/// Outcome of running every handler of one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub event_id: Uuid,
    pub epoch: Epoch,
    pub succeeded: usize,
    pub failures: Vec<HandlerFailure>,
}

impl DispatchReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

type Handlers = Vec<Arc<dyn EventHandler>>;

pub struct EventBus {
    mode: DispatchMode,
    handlers: RwLock<HashMap<EventKind, Handlers>>,
    epoch_counter: AtomicU64,
    in_flight: Mutex<JoinSet<()>>,
}

impl EventBus {
    pub fn new(mode: DispatchMode) -> Self {
        Self {
            mode,
            handlers: RwLock::new(HashMap::new()),
            epoch_counter: AtomicU64::new(0),
            in_flight: Mutex::new(JoinSet::new()),
        }
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    /// Register `handler` for every future emission of `kind`.
    pub fn on(&self, kind: EventKind, handler: Arc<dyn EventHandler>) {
        debug!(event_kind = %kind, handler = handler.name(), "Event handler registered");
        rw_write(&self.handlers, SOURCE, "on")
            .entry(kind)
            .or_default()
            .push(handler);
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        rw_read(&self.handlers, SOURCE, "handler_count")
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Publish an event according to the configured [`DispatchMode`].
    ///
    /// Never fails: handler errors are reported through logs and metrics.
    pub async fn emit(&self, payload: EventPayload) {
        match self.mode {
            DispatchMode::Inline => {
                self.emit_and_wait(payload).await;
            }
            DispatchMode::Background => self.spawn(payload),
        }
    }

    /// Publish an event and wait for all of its handlers.
    pub async fn emit_and_wait(&self, payload: EventPayload) -> DispatchReport {
        let event = self.envelope(payload);
        let handlers = self.handlers_for(event.kind());
        dispatch(event, handlers).await
    }

    /// Wait for every background dispatch started so far, including ones
    /// started while waiting.
    pub async fn flush(&self) {
        loop {
            let mut pending = std::mem::take(&mut *mutex_lock(&self.in_flight, SOURCE, "flush"));
            if pending.is_empty() {
                return;
            }
            while let Some(joined) = pending.join_next().await {
                log_join_failure(joined);
            }
        }
    }

    /// Background dispatches not yet reaped.
    pub fn in_flight(&self) -> usize {
        mutex_lock(&self.in_flight, SOURCE, "in_flight").len()
    }

    fn spawn(&self, payload: EventPayload) {
        let event = self.envelope(payload);
        let handlers = self.handlers_for(event.kind());
        if handlers.is_empty() {
            return;
        }

        let mut in_flight = mutex_lock(&self.in_flight, SOURCE, "spawn");
        while let Some(joined) = in_flight.try_join_next() {
            log_join_failure(joined);
        }
        in_flight.spawn(async move {
            dispatch(event, handlers).await;
        });
    }

    fn envelope(&self, payload: EventPayload) -> DomainEvent {
        let epoch = self.epoch_counter.fetch_add(1, Ordering::SeqCst);
        let event = DomainEvent::new(payload, epoch);

        info!(
            event_id = %event.id,
            event_epoch = event.epoch,
            event_kind = %event.kind(),
            series_id = %event.series_id(),
            "Domain event emitted"
        );

        event
    }

    fn handlers_for(&self, kind: EventKind) -> Handlers {
        rw_read(&self.handlers, SOURCE, "handlers_for")
            .get(&kind)
            .cloned()
            .unwrap_or_default()
    }
}

impl From<&EventSettings> for EventBus {
    fn from(settings: &EventSettings) -> Self {
        Self::new(settings.dispatch)
    }
}

async fn dispatch(event: DomainEvent, handlers: Handlers) -> DispatchReport {
    let kind = event.kind();
    let mut report = DispatchReport {
        event_id: event.id,
        epoch: event.epoch,
        succeeded: 0,
        failures: Vec::new(),
    };

    for handler in handlers {
        match handler.handle(&event).await {
            Ok(()) => report.succeeded += 1,
            Err(err) => {
                counter!(
                    METRIC_HANDLER_FAILURE,
                    "handler" => handler.name(),
                    "event_kind" => kind.as_str()
                )
                .increment(1);
                warn!(
                    event_id = %event.id,
                    event_kind = %kind,
                    series_id = %event.series_id(),
                    handler = handler.name(),
                    error = %err,
                    "Event handler failed"
                );
                report.failures.push(HandlerFailure {
                    handler: handler.name(),
                    error: err.to_string(),
                });
            }
        }
    }

    report
}

fn log_join_failure(joined: Result<(), tokio::task::JoinError>) {
    if let Err(err) = joined {
        warn!(error = %err, "Event dispatch task aborted");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    /// Appends its name to a shared journal, optionally after a delay.
    struct Journal {
        name: &'static str,
        entries: Arc<Mutex<Vec<&'static str>>>,
        delay: Option<Duration>,
        fail: bool,
    }

    impl Journal {
        fn new(name: &'static str, entries: &Arc<Mutex<Vec<&'static str>>>) -> Self {
            Self {
                name,
                entries: Arc::clone(entries),
                delay: None,
                fail: false,
            }
        }
    }

    #[async_trait]
    impl EventHandler for Journal {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn handle(&self, _event: &DomainEvent) -> Result<(), HandlerError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.entries.lock().unwrap().push(self.name);
            if self.fail {
                return Err(HandlerError::Other("boom".to_string()));
            }
            Ok(())
        }
    }

    fn created() -> EventPayload {
        EventPayload::SeriesCreated {
            series_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn handlers_run_in_registration_order() {
        let bus = EventBus::new(DispatchMode::Inline);
        let entries = Arc::new(Mutex::new(Vec::new()));
        for name in ["first", "second", "third"] {
            bus.on(EventKind::SeriesCreated, Arc::new(Journal::new(name, &entries)));
        }

        let report = bus.emit_and_wait(created()).await;

        assert_eq!(report.succeeded, 3);
        assert_eq!(*entries.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn events_only_reach_handlers_of_their_kind() {
        let bus = EventBus::new(DispatchMode::Inline);
        let entries = Arc::new(Mutex::new(Vec::new()));
        bus.on(EventKind::SeriesDeleted, Arc::new(Journal::new("deleted", &entries)));

        bus.emit(created()).await;

        assert!(entries.lock().unwrap().is_empty());
        assert_eq!(bus.handler_count(EventKind::SeriesDeleted), 1);
        assert_eq!(bus.handler_count(EventKind::SeriesCreated), 0);
    }

    #[tokio::test]
    async fn failing_handler_does_not_stop_the_rest() {
        let bus = EventBus::new(DispatchMode::Inline);
        let entries = Arc::new(Mutex::new(Vec::new()));
        bus.on(
            EventKind::SeriesCreated,
            Arc::new(Journal {
                fail: true,
                ..Journal::new("broken", &entries)
            }),
        );
        bus.on(EventKind::SeriesCreated, Arc::new(Journal::new("healthy", &entries)));

        let report = bus.emit_and_wait(created()).await;

        assert_eq!(report.succeeded, 1);
        assert_eq!(
            report.failures,
            vec![HandlerFailure {
                handler: "broken",
                error: "boom".to_string()
            }]
        );
        assert_eq!(*entries.lock().unwrap(), vec!["broken", "healthy"]);
    }

    #[tokio::test(start_paused = true)]
    async fn background_emit_returns_before_handlers_finish() {
        let bus = EventBus::new(DispatchMode::Background);
        let entries = Arc::new(Mutex::new(Vec::new()));
        bus.on(
            EventKind::SeriesCreated,
            Arc::new(Journal {
                delay: Some(Duration::from_secs(1)),
                ..Journal::new("slow", &entries)
            }),
        );

        bus.emit(created()).await;
        assert!(entries.lock().unwrap().is_empty());
        assert_eq!(bus.in_flight(), 1);

        bus.flush().await;
        assert_eq!(*entries.lock().unwrap(), vec!["slow"]);
        assert_eq!(bus.in_flight(), 0);
    }

    #[tokio::test]
    async fn inline_emit_waits_for_handlers() {
        let bus = EventBus::new(DispatchMode::Inline);
        let entries = Arc::new(Mutex::new(Vec::new()));
        bus.on(EventKind::SeriesCreated, Arc::new(Journal::new("inline", &entries)));

        bus.emit(created()).await;

        assert_eq!(*entries.lock().unwrap(), vec!["inline"]);
    }

    #[tokio::test]
    async fn emitting_without_handlers_is_a_no_op() {
        let bus = EventBus::new(DispatchMode::Background);
        bus.emit(created()).await;
        assert_eq!(bus.in_flight(), 0);
        bus.flush().await;
    }

    #[tokio::test]
    async fn epochs_increase_per_emission() {
        let bus = EventBus::new(DispatchMode::Inline);
        let first = bus.emit_and_wait(created()).await;
        let second = bus.emit_and_wait(created()).await;
        assert!(first.epoch < second.epoch);
        assert_ne!(first.event_id, second.event_id);
    }
}
