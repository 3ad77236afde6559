use std::sync::Arc;

use tracing::instrument;
use uuid::Uuid;

use crate::application::error::{AppError, ensure_non_empty};
use crate::application::pagination::{OffsetPage, PageRequest};
use crate::application::publish;
use crate::application::repos::{
    CreateKbEntityParams, KnowledgeBaseRepo, SeriesRepo, UpdateKbEntityParams,
};
use crate::cache::{CacheAside, EventBus, EventPayload, TtlClass, keys};
use crate::domain::continuity::{CharacterContinuity, ContinuityGraph};
use crate::domain::entities::KbEntityRecord;
use crate::domain::types::{EntityAction, KbEntityType};

#[derive(Debug, Clone)]
pub struct CreateKbEntityCommand {
    pub series_id: Uuid,
    pub entity_type: KbEntityType,
    pub name: String,
    pub summary: String,
    pub related_ids: Vec<Uuid>,
}

#[derive(Debug, Clone)]
pub struct UpdateKbEntityCommand {
    pub series_id: Uuid,
    pub id: Uuid,
    pub name: String,
    pub summary: String,
    pub related_ids: Vec<Uuid>,
}

#[derive(Clone)]
pub struct KnowledgeBaseService {
    series: Arc<dyn SeriesRepo>,
    entities: Arc<dyn KnowledgeBaseRepo>,
    cache: Arc<CacheAside>,
    events: Option<Arc<EventBus>>,
}

impl KnowledgeBaseService {
    pub fn new(
        series: Arc<dyn SeriesRepo>,
        entities: Arc<dyn KnowledgeBaseRepo>,
        cache: Arc<CacheAside>,
    ) -> Self {
        Self {
            series,
            entities,
            cache,
            events: None,
        }
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    pub async fn list(
        &self,
        series_id: Uuid,
        entity_type: KbEntityType,
        page: PageRequest,
    ) -> Result<OffsetPage<KbEntityRecord>, AppError> {
        self.cache
            .cached(
                &keys::kb_list(series_id, entity_type, page.limit, page.offset),
                TtlClass::List,
                || async {
                    Ok::<_, AppError>(
                        self.entities
                            .list_entities(series_id, entity_type, page)
                            .await?,
                    )
                },
            )
            .await
    }

    /// Free-text search over names and summaries.
    pub async fn search(
        &self,
        series_id: Uuid,
        query: &str,
        page: PageRequest,
    ) -> Result<OffsetPage<KbEntityRecord>, AppError> {
        ensure_non_empty(query, "query")?;
        let query = query.trim();
        self.cache
            .cached(
                &keys::kb_search(series_id, query, page.limit, page.offset),
                TtlClass::List,
                || async {
                    Ok::<_, AppError>(
                        self.entities
                            .search_entities(series_id, query, page)
                            .await?,
                    )
                },
            )
            .await
    }

    pub async fn get(&self, series_id: Uuid, id: Uuid) -> Result<KbEntityRecord, AppError> {
        self.cache
            .cached(&keys::kb_entity(series_id, id), TtlClass::Entity, || async {
                self.entities
                    .find_entity(series_id, id)
                    .await?
                    .ok_or_else(|| AppError::not_found("knowledge base entity"))
            })
            .await
    }

    /// Cross-reference graph over the series' knowledge base.
    pub async fn continuity(&self, series_id: Uuid) -> Result<ContinuityGraph, AppError> {
        self.cache
            .cached(
                &keys::continuity(series_id),
                TtlClass::Aggregation,
                || self.build_graph(series_id),
            )
            .await
    }

    /// The continuity graph seen from one character.
    pub async fn character_continuity(
        &self,
        series_id: Uuid,
        character_id: Uuid,
    ) -> Result<CharacterContinuity, AppError> {
        self.cache
            .cached(
                &keys::character_continuity(series_id, character_id),
                TtlClass::Aggregation,
                || async {
                    self.build_graph(series_id)
                        .await?
                        .for_character(character_id)
                        .ok_or_else(|| AppError::not_found("character"))
                },
            )
            .await
    }

    #[instrument(skip(self, command), fields(series_id = %command.series_id, entity_type = %command.entity_type))]
    pub async fn create(&self, command: CreateKbEntityCommand) -> Result<KbEntityRecord, AppError> {
        ensure_non_empty(&command.name, "name")?;
        self.ensure_series(command.series_id).await?;

        let entity = self
            .entities
            .create_entity(CreateKbEntityParams {
                series_id: command.series_id,
                entity_type: command.entity_type,
                name: command.name.trim().to_string(),
                summary: command.summary,
                related_ids: command.related_ids,
            })
            .await?;

        self.announce(&entity, EntityAction::Created).await;
        Ok(entity)
    }

    #[instrument(skip(self, command), fields(series_id = %command.series_id, entity_id = %command.id))]
    pub async fn update(&self, command: UpdateKbEntityCommand) -> Result<KbEntityRecord, AppError> {
        ensure_non_empty(&command.name, "name")?;
        let entity = self
            .entities
            .update_entity(UpdateKbEntityParams {
                series_id: command.series_id,
                id: command.id,
                name: command.name.trim().to_string(),
                summary: command.summary,
                related_ids: command.related_ids,
            })
            .await?;

        self.announce(&entity, EntityAction::Updated).await;
        Ok(entity)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, series_id: Uuid, id: Uuid) -> Result<(), AppError> {
        let entity = self.entities.delete_entity(series_id, id).await?;
        self.announce(&entity, EntityAction::Deleted).await;
        Ok(())
    }

    async fn build_graph(&self, series_id: Uuid) -> Result<ContinuityGraph, AppError> {
        self.ensure_series(series_id).await?;
        let entities = self.entities.all_entities(series_id).await?;
        Ok(ContinuityGraph::build(series_id, &entities))
    }

    async fn ensure_series(&self, series_id: Uuid) -> Result<(), AppError> {
        self.series
            .find_series(series_id)
            .await?
            .map(|_| ())
            .ok_or_else(|| AppError::not_found("series"))
    }

    async fn announce(&self, entity: &KbEntityRecord, action: EntityAction) {
        publish(
            self.events.as_ref(),
            EventPayload::KnowledgeBaseAction {
                series_id: entity.series_id,
                entity_id: entity.id,
                entity_type: entity.entity_type,
                action,
            },
        )
        .await;
    }
}
