//! Declarative invalidation rules.
//!
//! [`RULES`] maps each event kind to the cache targets it makes stale. A
//! target names a key or pattern builder from [`keys`]; a guard restricts a
//! row to knowledge-base events of certain entity types. [`RuleTable::plan`]
//! is the only interpreter of the table.

use std::fmt;

use uuid::Uuid;

use crate::domain::continuity::feeds_continuity;
use crate::domain::types::KbEntityType;

use super::events::{EventKind, EventPayload};
use super::keys::{self, patterns};

/// One store operation that restores coherence.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InvalidationAction {
    /// Remove one exact key.
    Key(String),
    /// Remove every key matching a glob pattern.
    Pattern(String),
}

impl InvalidationAction {
    pub fn target(&self) -> &str {
        match self {
            InvalidationAction::Key(key) => key,
            InvalidationAction::Pattern(pattern) => pattern,
        }
    }

    pub fn is_pattern(&self) -> bool {
        matches!(self, InvalidationAction::Pattern(_))
    }
}

impl fmt::Display for InvalidationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidationAction::Key(key) => write!(f, "key {key}"),
            InvalidationAction::Pattern(pattern) => write!(f, "pattern {pattern}"),
        }
    }
}

/// Cached view a rule makes stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// The single-series entry.
    Series,
    /// Every page of the series index.
    SeriesLists,
    SeriesExport,
    /// Everything nested under the series.
    SeriesScope,
    Script,
    ScriptLists,
    /// List pages of the entity's knowledge-base sub-type.
    KbTypeLists,
    KbSearch,
    KbEntity,
    /// The continuity graph and its per-character slices.
    Continuity,
    /// The per-character slice of the changed entity.
    CharacterContinuity,
    Canvas,
}

/// Condition on the knowledge-base entity type of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    Always,
    /// The entity type is read by the continuity graph.
    FeedsContinuity,
    RelationshipBearing,
}

impl Guard {
    fn admits(self, entity_type: Option<KbEntityType>) -> bool {
        match self {
            Guard::Always => true,
            Guard::FeedsContinuity => entity_type.is_some_and(feeds_continuity),
            Guard::RelationshipBearing => {
                entity_type.is_some_and(KbEntityType::is_relationship_bearing)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rule {
    pub kind: EventKind,
    pub target: Target,
    pub guard: Guard,
}

const fn rule(kind: EventKind, target: Target) -> Rule {
    Rule {
        kind,
        target,
        guard: Guard::Always,
    }
}

const fn guarded(kind: EventKind, target: Target, guard: Guard) -> Rule {
    Rule {
        kind,
        target,
        guard,
    }
}

pub static RULES: &[Rule] = &[
    rule(EventKind::SeriesCreated, Target::SeriesLists),
    rule(EventKind::SeriesUpdated, Target::Series),
    rule(EventKind::SeriesUpdated, Target::SeriesLists),
    rule(EventKind::SeriesUpdated, Target::SeriesExport),
    rule(EventKind::SeriesDeleted, Target::Series),
    rule(EventKind::SeriesDeleted, Target::SeriesLists),
    rule(EventKind::SeriesDeleted, Target::SeriesExport),
    rule(EventKind::SeriesDeleted, Target::SeriesScope),
    rule(EventKind::ScriptCreated, Target::ScriptLists),
    rule(EventKind::ScriptCreated, Target::SeriesExport),
    rule(EventKind::ScriptUpdated, Target::Script),
    rule(EventKind::ScriptUpdated, Target::ScriptLists),
    rule(EventKind::ScriptUpdated, Target::SeriesExport),
    rule(EventKind::ScriptDeleted, Target::Script),
    rule(EventKind::ScriptDeleted, Target::ScriptLists),
    rule(EventKind::ScriptDeleted, Target::SeriesExport),
    rule(EventKind::KnowledgeBaseAction, Target::KbTypeLists),
    rule(EventKind::KnowledgeBaseAction, Target::KbSearch),
    rule(EventKind::KnowledgeBaseAction, Target::SeriesExport),
    rule(EventKind::KnowledgeBaseAction, Target::KbEntity),
    guarded(
        EventKind::KnowledgeBaseAction,
        Target::Continuity,
        Guard::FeedsContinuity,
    ),
    guarded(
        EventKind::KnowledgeBaseAction,
        Target::CharacterContinuity,
        Guard::RelationshipBearing,
    ),
    rule(EventKind::CanvasBatchMutated, Target::Canvas),
];

/// Interpreter over a rule table.
#[derive(Debug, Clone, Copy)]
pub struct RuleTable {
    rules: &'static [Rule],
}

impl Default for RuleTable {
    fn default() -> Self {
        Self { rules: RULES }
    }
}

impl RuleTable {
    pub fn new(rules: &'static [Rule]) -> Self {
        Self { rules }
    }

    /// Event kinds with at least one rule, in declaration order.
    pub fn kinds(&self) -> Vec<EventKind> {
        let mut kinds = Vec::new();
        for rule in self.rules {
            if !kinds.contains(&rule.kind) {
                kinds.push(rule.kind);
            }
        }
        kinds
    }

    /// Store operations for `payload`, deduplicated, in declaration order.
    pub fn plan(&self, payload: &EventPayload) -> Vec<InvalidationAction> {
        let kind = payload.kind();
        let entity_type = kb_entity_type(payload);
        let mut actions: Vec<InvalidationAction> = Vec::new();

        for rule in self.rules {
            if rule.kind != kind || !rule.guard.admits(entity_type) {
                continue;
            }
            let Some(action) = resolve(rule.target, payload) else {
                continue;
            };
            if !actions.contains(&action) {
                actions.push(action);
            }
        }

        actions
    }
}

fn kb_entity_type(payload: &EventPayload) -> Option<KbEntityType> {
    match payload {
        EventPayload::KnowledgeBaseAction { entity_type, .. } => Some(*entity_type),
        _ => None,
    }
}

fn script_id(payload: &EventPayload) -> Option<Uuid> {
    match payload {
        EventPayload::ScriptCreated { script_id, .. }
        | EventPayload::ScriptUpdated { script_id, .. }
        | EventPayload::ScriptDeleted { script_id, .. } => Some(*script_id),
        _ => None,
    }
}

fn kb_entity_id(payload: &EventPayload) -> Option<Uuid> {
    match payload {
        EventPayload::KnowledgeBaseAction { entity_id, .. } => Some(*entity_id),
        _ => None,
    }
}

/// Build the concrete action for `target`. Targets needing a field the
/// payload lacks resolve to nothing.
fn resolve(target: Target, payload: &EventPayload) -> Option<InvalidationAction> {
    use InvalidationAction::{Key, Pattern};

    let series_id = payload.series_id();
    let action = match target {
        Target::Series => Key(keys::series(series_id)),
        Target::SeriesLists => Pattern(patterns::series_lists()),
        Target::SeriesExport => Key(keys::series_export(series_id)),
        Target::SeriesScope => Pattern(patterns::series_scope(series_id)),
        Target::Script => Key(keys::script(series_id, script_id(payload)?)),
        Target::ScriptLists => Pattern(patterns::script_lists(series_id)),
        Target::KbTypeLists => Pattern(patterns::kb_type(series_id, kb_entity_type(payload)?)),
        Target::KbSearch => Pattern(patterns::kb_search(series_id)),
        Target::KbEntity => Key(keys::kb_entity(series_id, kb_entity_id(payload)?)),
        Target::Continuity => Pattern(patterns::continuity(series_id)),
        Target::CharacterContinuity => Key(keys::character_continuity(
            series_id,
            kb_entity_id(payload)?,
        )),
        Target::Canvas => Key(keys::canvas(series_id)),
    };
    Some(action)
}
