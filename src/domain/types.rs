//! Shared domain enumerations.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::DomainError;

/// Sub-types of knowledge-base entities nested under a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KbEntityType {
    Character,
    Location,
    Item,
    Faction,
    Event,
    Lore,
}

impl KbEntityType {
    pub const ALL: [KbEntityType; 6] = [
        KbEntityType::Character,
        KbEntityType::Location,
        KbEntityType::Item,
        KbEntityType::Faction,
        KbEntityType::Event,
        KbEntityType::Lore,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            KbEntityType::Character => "character",
            KbEntityType::Location => "location",
            KbEntityType::Item => "item",
            KbEntityType::Faction => "faction",
            KbEntityType::Event => "event",
            KbEntityType::Lore => "lore",
        }
    }

    /// Characters carry relationships to other entities, so the continuity
    /// view also keeps a per-character slice.
    pub fn is_relationship_bearing(self) -> bool {
        matches!(self, KbEntityType::Character)
    }
}

impl fmt::Display for KbEntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KbEntityType {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        KbEntityType::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| DomainError::validation(format!("unknown entity type `{value}`")))
    }
}

/// What happened to a knowledge-base entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityAction {
    Created,
    Updated,
    Deleted,
}

impl EntityAction {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityAction::Created => "created",
            EntityAction::Updated => "updated",
            EntityAction::Deleted => "deleted",
        }
    }
}

/// Bulk operation applied to the canvas of a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOperation {
    Upsert,
    Delete,
}
