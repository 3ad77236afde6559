use std::sync::Arc;

use tracing::instrument;
use uuid::Uuid;

use crate::application::error::{AppError, ensure_non_empty};
use crate::application::pagination::{OffsetPage, PageRequest};
use crate::application::publish;
use crate::application::repos::{
    CreateSeriesParams, KnowledgeBaseRepo, ScriptRepo, SeriesRepo, UpdateSeriesParams,
};
use crate::cache::{CacheAside, EventBus, EventPayload, TtlClass, keys};
use crate::domain::entities::{SeriesExport, SeriesRecord};

#[derive(Debug, Clone)]
pub struct CreateSeriesCommand {
    pub title: String,
    pub logline: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UpdateSeriesCommand {
    pub id: Uuid,
    pub title: String,
    pub logline: Option<String>,
}

#[derive(Clone)]
pub struct SeriesService {
    series: Arc<dyn SeriesRepo>,
    scripts: Arc<dyn ScriptRepo>,
    knowledge_base: Arc<dyn KnowledgeBaseRepo>,
    cache: Arc<CacheAside>,
    events: Option<Arc<EventBus>>,
}

impl SeriesService {
    pub fn new(
        series: Arc<dyn SeriesRepo>,
        scripts: Arc<dyn ScriptRepo>,
        knowledge_base: Arc<dyn KnowledgeBaseRepo>,
        cache: Arc<CacheAside>,
    ) -> Self {
        Self {
            series,
            scripts,
            knowledge_base,
            cache,
            events: None,
        }
    }

    /// Set the event bus notified after every write.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    pub async fn get(&self, id: Uuid) -> Result<SeriesRecord, AppError> {
        self.cache
            .cached(&keys::series(id), TtlClass::Entity, || async {
                self.series
                    .find_series(id)
                    .await?
                    .ok_or_else(|| AppError::not_found("series"))
            })
            .await
    }

    pub async fn list(&self, page: PageRequest) -> Result<OffsetPage<SeriesRecord>, AppError> {
        self.cache
            .cached(
                &keys::series_list(page.limit, page.offset),
                TtlClass::List,
                || async { Ok::<_, AppError>(self.series.list_series(page).await?) },
            )
            .await
    }

    /// Series, scripts and knowledge base in one document.
    pub async fn export(&self, id: Uuid) -> Result<SeriesExport, AppError> {
        self.cache
            .cached(&keys::series_export(id), TtlClass::Aggregation, || async {
                let series = self
                    .series
                    .find_series(id)
                    .await?
                    .ok_or_else(|| AppError::not_found("series"))?;
                let (scripts, knowledge_base) = tokio::try_join!(
                    self.scripts.all_scripts(id),
                    self.knowledge_base.all_entities(id),
                )?;
                Ok::<_, AppError>(SeriesExport {
                    series,
                    scripts,
                    knowledge_base,
                })
            })
            .await
    }

    #[instrument(skip(self, command), fields(title = %command.title))]
    pub async fn create(&self, command: CreateSeriesCommand) -> Result<SeriesRecord, AppError> {
        ensure_non_empty(&command.title, "title")?;
        let series = self
            .series
            .create_series(CreateSeriesParams {
                title: command.title.trim().to_string(),
                logline: command.logline,
            })
            .await?;

        publish(
            self.events.as_ref(),
            EventPayload::SeriesCreated {
                series_id: series.id,
            },
        )
        .await;

        Ok(series)
    }

    #[instrument(skip(self, command), fields(series_id = %command.id))]
    pub async fn update(&self, command: UpdateSeriesCommand) -> Result<SeriesRecord, AppError> {
        ensure_non_empty(&command.title, "title")?;
        let series = self
            .series
            .update_series(UpdateSeriesParams {
                id: command.id,
                title: command.title.trim().to_string(),
                logline: command.logline,
            })
            .await?;

        publish(
            self.events.as_ref(),
            EventPayload::SeriesUpdated {
                series_id: series.id,
            },
        )
        .await;

        Ok(series)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, id: Uuid) -> Result<(), AppError> {
        self.series.delete_series(id).await?;
        publish(self.events.as_ref(), EventPayload::SeriesDeleted { series_id: id }).await;
        Ok(())
    }
}
