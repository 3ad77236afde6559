//! Domain entities mirrored from persistent storage.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::types::KbEntityType;

/// Top-level owning entity; every other record is nested under a series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesRecord {
    pub id: Uuid,
    pub title: String,
    pub logline: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptRecord {
    pub id: Uuid,
    pub series_id: Uuid,
    pub title: String,
    pub episode: Option<u32>,
    pub body: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Knowledge-base entry (character, location, ...) belonging to a series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KbEntityRecord {
    pub id: Uuid,
    pub series_id: Uuid,
    pub entity_type: KbEntityType,
    pub name: String,
    pub summary: String,
    /// Other knowledge-base entities this one references.
    pub related_ids: Vec<Uuid>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanvasNode {
    pub id: Uuid,
    pub label: String,
    pub x: f64,
    pub y: f64,
    pub entity_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanvasEdge {
    pub id: Uuid,
    pub from: Uuid,
    pub to: Uuid,
    pub label: Option<String>,
}

/// The whole canvas of a series. Cached as a single entry.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CanvasRecord {
    pub series_id: Uuid,
    pub nodes: Vec<CanvasNode>,
    pub edges: Vec<CanvasEdge>,
}

/// Full export of a series: its scripts and knowledge base. The canvas is
/// cached and invalidated on its own and is read through `CanvasService`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesExport {
    pub series: SeriesRecord,
    pub scripts: Vec<ScriptRecord>,
    pub knowledge_base: Vec<KbEntityRecord>,
}
