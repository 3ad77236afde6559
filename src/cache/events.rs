//! Domain events.
//!
//! Every completed mutation is described by one [`DomainEvent`]. The bus
//! routes events by their [`EventKind`].

use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::types::{BatchOperation, EntityAction, KbEntityType};

/// Monotonic per-bus sequence number.
pub type Epoch = u64;

/// What happened. Carries the ids the invalidation rules need.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    SeriesCreated {
        series_id: Uuid,
    },
    SeriesUpdated {
        series_id: Uuid,
    },
    SeriesDeleted {
        series_id: Uuid,
    },
    ScriptCreated {
        series_id: Uuid,
        script_id: Uuid,
    },
    ScriptUpdated {
        series_id: Uuid,
        script_id: Uuid,
    },
    ScriptDeleted {
        series_id: Uuid,
        script_id: Uuid,
    },
    /// A knowledge-base entity was created, updated or deleted.
    KnowledgeBaseAction {
        series_id: Uuid,
        entity_id: Uuid,
        entity_type: KbEntityType,
        action: EntityAction,
    },
    /// Bulk upsert or delete of canvas nodes and edges.
    CanvasBatchMutated {
        series_id: Uuid,
        operation: BatchOperation,
        nodes: usize,
        edges: usize,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::SeriesCreated { .. } => EventKind::SeriesCreated,
            EventPayload::SeriesUpdated { .. } => EventKind::SeriesUpdated,
            EventPayload::SeriesDeleted { .. } => EventKind::SeriesDeleted,
            EventPayload::ScriptCreated { .. } => EventKind::ScriptCreated,
            EventPayload::ScriptUpdated { .. } => EventKind::ScriptUpdated,
            EventPayload::ScriptDeleted { .. } => EventKind::ScriptDeleted,
            EventPayload::KnowledgeBaseAction { .. } => EventKind::KnowledgeBaseAction,
            EventPayload::CanvasBatchMutated { .. } => EventKind::CanvasBatchMutated,
        }
    }

    /// The series every event is scoped to.
    pub fn series_id(&self) -> Uuid {
        match self {
            EventPayload::SeriesCreated { series_id }
            | EventPayload::SeriesUpdated { series_id }
            | EventPayload::SeriesDeleted { series_id }
            | EventPayload::ScriptCreated { series_id, .. }
            | EventPayload::ScriptUpdated { series_id, .. }
            | EventPayload::ScriptDeleted { series_id, .. }
            | EventPayload::KnowledgeBaseAction { series_id, .. }
            | EventPayload::CanvasBatchMutated { series_id, .. } => *series_id,
        }
    }
}

/// Field-less discriminant of [`EventPayload`]; the bus routing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    SeriesCreated,
    SeriesUpdated,
    SeriesDeleted,
    ScriptCreated,
    ScriptUpdated,
    ScriptDeleted,
    KnowledgeBaseAction,
    CanvasBatchMutated,
}

impl EventKind {
    pub const ALL: [EventKind; 8] = [
        EventKind::SeriesCreated,
        EventKind::SeriesUpdated,
        EventKind::SeriesDeleted,
        EventKind::ScriptCreated,
        EventKind::ScriptUpdated,
        EventKind::ScriptDeleted,
        EventKind::KnowledgeBaseAction,
        EventKind::CanvasBatchMutated,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::SeriesCreated => "series.created",
            EventKind::SeriesUpdated => "series.updated",
            EventKind::SeriesDeleted => "series.deleted",
            EventKind::ScriptCreated => "script.created",
            EventKind::ScriptUpdated => "script.updated",
            EventKind::ScriptDeleted => "script.deleted",
            EventKind::KnowledgeBaseAction => "knowledge_base.action",
            EventKind::CanvasBatchMutated => "canvas.batch_mutated",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Envelope published on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainEvent {
    /// Unique id, for correlating log lines.
    pub id: Uuid,
    pub epoch: Epoch,
    pub occurred_at: OffsetDateTime,
    pub payload: EventPayload,
}

impl DomainEvent {
    pub fn new(payload: EventPayload, epoch: Epoch) -> Self {
        Self {
            id: Uuid::new_v4(),
            epoch,
            occurred_at: OffsetDateTime::now_utc(),
            payload,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    pub fn series_id(&self) -> Uuid {
        self.payload.series_id()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn one_of_each(series_id: Uuid) -> Vec<EventPayload> {
        let id = Uuid::new_v4();
        vec![
            EventPayload::SeriesCreated { series_id },
            EventPayload::SeriesUpdated { series_id },
            EventPayload::SeriesDeleted { series_id },
            EventPayload::ScriptCreated {
                series_id,
                script_id: id,
            },
            EventPayload::ScriptUpdated {
                series_id,
                script_id: id,
            },
            EventPayload::ScriptDeleted {
                series_id,
                script_id: id,
            },
            EventPayload::KnowledgeBaseAction {
                series_id,
                entity_id: id,
                entity_type: KbEntityType::Location,
                action: EntityAction::Updated,
            },
            EventPayload::CanvasBatchMutated {
                series_id,
                operation: BatchOperation::Upsert,
                nodes: 3,
                edges: 1,
            },
        ]
    }

    #[test]
    fn every_payload_maps_to_its_own_kind() {
        let series_id = Uuid::new_v4();
        let kinds: Vec<EventKind> = one_of_each(series_id).iter().map(EventPayload::kind).collect();
        assert_eq!(kinds, EventKind::ALL.to_vec());
    }

    #[test]
    fn every_payload_exposes_its_series() {
        let series_id = Uuid::new_v4();
        for payload in one_of_each(series_id) {
            assert_eq!(payload.series_id(), series_id, "{:?}", payload.kind());
        }
    }

    #[test]
    fn kind_names_are_unique() {
        let names: HashSet<&str> = EventKind::ALL.iter().map(|kind| kind.as_str()).collect();
        assert_eq!(names.len(), EventKind::ALL.len());
    }

    #[test]
    fn envelope_gets_fresh_identity() {
        let payload = EventPayload::SeriesCreated {
            series_id: Uuid::nil(),
        };
        let a = DomainEvent::new(payload.clone(), 1);
        let b = DomainEvent::new(payload, 2);
        assert_ne!(a.id, b.id);
        assert_eq!(a.kind(), EventKind::SeriesCreated);
        assert_eq!(b.epoch, 2);
    }

    #[test]
    fn payload_serializes_with_kind_tag() {
        let payload = EventPayload::KnowledgeBaseAction {
            series_id: Uuid::nil(),
            entity_id: Uuid::nil(),
            entity_type: KbEntityType::Character,
            action: EntityAction::Deleted,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "knowledge_base_action");
        assert_eq!(json["entity_type"], "character");
        assert_eq!(json["action"], "deleted");
    }
}
