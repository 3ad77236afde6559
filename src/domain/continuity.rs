//! Continuity graph: the cross-reference view over knowledge-base entities.
//!
//! The graph only reads the entity types listed in [`CONTINUITY_SOURCES`].
//! Cache invalidation consults the same list, so a change to an entity type
//! outside of it never clears the cached graph.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::entities::KbEntityRecord;
use crate::domain::types::KbEntityType;

/// Entity types the continuity graph is built from.
pub const CONTINUITY_SOURCES: [KbEntityType; 5] = [
    KbEntityType::Character,
    KbEntityType::Location,
    KbEntityType::Item,
    KbEntityType::Faction,
    KbEntityType::Event,
];

pub fn feeds_continuity(kind: KbEntityType) -> bool {
    CONTINUITY_SOURCES.contains(&kind)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinuityNode {
    pub id: Uuid,
    pub name: String,
    pub entity_type: KbEntityType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContinuityLink {
    pub from: Uuid,
    pub to: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinuityGraph {
    pub series_id: Uuid,
    pub nodes: Vec<ContinuityNode>,
    pub links: Vec<ContinuityLink>,
}

/// Slice of the continuity graph centred on one character.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterContinuity {
    pub series_id: Uuid,
    pub character: ContinuityNode,
    pub neighbours: Vec<ContinuityNode>,
    pub links: Vec<ContinuityLink>,
}

impl ContinuityGraph {
    /// Build the graph from every knowledge-base entity of a series.
    ///
    /// Entities outside [`CONTINUITY_SOURCES`] are ignored, as are links that
    /// point at them. Output ordering is deterministic.
    pub fn build(series_id: Uuid, entities: &[KbEntityRecord]) -> Self {
        let nodes: BTreeMap<Uuid, &KbEntityRecord> = entities
            .iter()
            .filter(|entity| entity.series_id == series_id && feeds_continuity(entity.entity_type))
            .map(|entity| (entity.id, entity))
            .collect();

        let mut links = BTreeSet::new();
        for entity in nodes.values() {
            for related in &entity.related_ids {
                if *related != entity.id && nodes.contains_key(related) {
                    links.insert(ContinuityLink {
                        from: entity.id,
                        to: *related,
                    });
                }
            }
        }

        Self {
            series_id,
            nodes: nodes
                .values()
                .map(|entity| ContinuityNode {
                    id: entity.id,
                    name: entity.name.clone(),
                    entity_type: entity.entity_type,
                })
                .collect(),
            links: links.into_iter().collect(),
        }
    }

    /// Extract the slice around `character_id`, if it is a character node.
    pub fn for_character(&self, character_id: Uuid) -> Option<CharacterContinuity> {
        let character = self
            .nodes
            .iter()
            .find(|node| node.id == character_id && node.entity_type.is_relationship_bearing())?
            .clone();

        let links: Vec<ContinuityLink> = self
            .links
            .iter()
            .filter(|link| link.from == character_id || link.to == character_id)
            .copied()
            .collect();

        let neighbour_ids: BTreeSet<Uuid> = links
            .iter()
            .map(|link| if link.from == character_id { link.to } else { link.from })
            .collect();

        let neighbours = self
            .nodes
            .iter()
            .filter(|node| neighbour_ids.contains(&node.id))
            .cloned()
            .collect();

        Some(CharacterContinuity {
            series_id: self.series_id,
            character,
            neighbours,
            links,
        })
    }
}
