//! Application services: cached reads and event-emitting writes.

pub mod canvas;
pub mod error;
pub mod knowledge_base;
pub mod pagination;
pub mod repos;
pub mod scripts;
pub mod series;

use std::sync::Arc;

use crate::cache::{EventBus, EventPayload};

/// Emit `payload` on `bus`, if the service has one. Called only after the
/// repository write has succeeded.
pub(crate) async fn publish(bus: Option<&Arc<EventBus>>, payload: EventPayload) {
    if let Some(bus) = bus {
        bus.emit(payload).await;
    }
}
