//! Cache key and invalidation-pattern builders.
//!
//! Keys are hierarchical: `series:<series-id>[:<sub-type>][:<qualifier>...]`.
//! Every parameter that distinguishes two cached results appears in the key,
//! and every key owned by a series starts with `series:<series-id>`, so
//! [`patterns::series_scope`] reaches all of them in one pattern delete.
//!
//! Ids are UUIDs in their fixed-width hyphenated form, which keeps the
//! `series:<id>*` prefix from ever matching a different series.

use uuid::Uuid;

use crate::domain::types::KbEntityType;

pub const SERIES_PREFIX: &str = "series";

/// A single series.
pub fn series(series_id: Uuid) -> String {
    format!("{SERIES_PREFIX}:{series_id}")
}

/// One page of the series index.
pub fn series_list(limit: u32, offset: u32) -> String {
    format!("{SERIES_PREFIX}:list:{limit}:{offset}")
}

/// Full export of a series.
pub fn series_export(series_id: Uuid) -> String {
    format!("{SERIES_PREFIX}:{series_id}:export")
}

pub fn script(series_id: Uuid, script_id: Uuid) -> String {
    format!("{SERIES_PREFIX}:{series_id}:script:{script_id}")
}

pub fn script_list(series_id: Uuid, limit: u32, offset: u32) -> String {
    format!("{SERIES_PREFIX}:{series_id}:scripts:{limit}:{offset}")
}

/// One page of knowledge-base entities of a single sub-type.
pub fn kb_list(series_id: Uuid, entity_type: KbEntityType, limit: u32, offset: u32) -> String {
    format!("{SERIES_PREFIX}:{series_id}:kb:{entity_type}:{limit}:{offset}")
}

/// Free-text knowledge-base search page.
///
/// The raw query sits before the two numeric segments, so the key stays
/// unambiguous even when the query itself contains `:`.
pub fn kb_search(series_id: Uuid, query: &str, limit: u32, offset: u32) -> String {
    format!("{SERIES_PREFIX}:{series_id}:kb:search:{query}:{limit}:{offset}")
}

pub fn kb_entity(series_id: Uuid, entity_id: Uuid) -> String {
    format!("{SERIES_PREFIX}:{series_id}:kb:entity:{entity_id}")
}

/// Continuity graph of a series.
pub fn continuity(series_id: Uuid) -> String {
    format!("{SERIES_PREFIX}:{series_id}:continuity")
}

/// Per-character slice of the continuity graph.
pub fn character_continuity(series_id: Uuid, character_id: Uuid) -> String {
    format!("{SERIES_PREFIX}:{series_id}:continuity:character:{character_id}")
}

/// The canvas of a series: one entry holding all nodes and edges.
pub fn canvas(series_id: Uuid) -> String {
    format!("{SERIES_PREFIX}:{series_id}:canvas")
}

/// Glob patterns for `delete_pattern`, each prefix-compatible with the key
/// builders above.
pub mod patterns {
    use uuid::Uuid;

    use super::SERIES_PREFIX;
    use crate::domain::types::KbEntityType;

    /// Every page of the series index.
    pub fn series_lists() -> String {
        format!("{SERIES_PREFIX}:list:*")
    }

    /// Every key owned by a series, the series entry itself included.
    pub fn series_scope(series_id: Uuid) -> String {
        format!("{SERIES_PREFIX}:{series_id}*")
    }

    pub fn script_lists(series_id: Uuid) -> String {
        format!("{SERIES_PREFIX}:{series_id}:scripts:*")
    }

    /// Every list page of one knowledge-base sub-type.
    pub fn kb_type(series_id: Uuid, entity_type: KbEntityType) -> String {
        format!("{SERIES_PREFIX}:{series_id}:kb:{entity_type}:*")
    }

    pub fn kb_search(series_id: Uuid) -> String {
        format!("{SERIES_PREFIX}:{series_id}:kb:search:*")
    }

    /// Everything cached for the knowledge base of a series.
    pub fn knowledge_base(series_id: Uuid) -> String {
        format!("{SERIES_PREFIX}:{series_id}:kb:*")
    }

    /// The continuity graph and all of its per-character slices.
    pub fn continuity(series_id: Uuid) -> String {
        format!("{SERIES_PREFIX}:{series_id}:continuity*")
    }
}
