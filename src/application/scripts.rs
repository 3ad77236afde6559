use std::sync::Arc;

use tracing::instrument;
use uuid::Uuid;

use crate::application::error::{AppError, ensure_non_empty};
use crate::application::pagination::{OffsetPage, PageRequest};
use crate::application::publish;
use crate::application::repos::{CreateScriptParams, ScriptRepo, SeriesRepo, UpdateScriptParams};
use crate::cache::{CacheAside, EventBus, EventPayload, TtlClass, keys};
use crate::domain::entities::ScriptRecord;

#[derive(Debug, Clone)]
pub struct CreateScriptCommand {
    pub series_id: Uuid,
    pub title: String,
    pub episode: Option<u32>,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct UpdateScriptCommand {
    pub series_id: Uuid,
    pub id: Uuid,
    pub title: String,
    pub episode: Option<u32>,
    pub body: String,
}

#[derive(Clone)]
pub struct ScriptService {
    series: Arc<dyn SeriesRepo>,
    scripts: Arc<dyn ScriptRepo>,
    cache: Arc<CacheAside>,
    events: Option<Arc<EventBus>>,
}

impl ScriptService {
    pub fn new(
        series: Arc<dyn SeriesRepo>,
        scripts: Arc<dyn ScriptRepo>,
        cache: Arc<CacheAside>,
    ) -> Self {
        Self {
            series,
            scripts,
            cache,
            events: None,
        }
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    pub async fn get(&self, series_id: Uuid, id: Uuid) -> Result<ScriptRecord, AppError> {
        self.cache
            .cached(&keys::script(series_id, id), TtlClass::Entity, || async {
                self.scripts
                    .find_script(series_id, id)
                    .await?
                    .ok_or_else(|| AppError::not_found("script"))
            })
            .await
    }

    pub async fn list(
        &self,
        series_id: Uuid,
        page: PageRequest,
    ) -> Result<OffsetPage<ScriptRecord>, AppError> {
        self.cache
            .cached(
                &keys::script_list(series_id, page.limit, page.offset),
                TtlClass::List,
                || async { Ok::<_, AppError>(self.scripts.list_scripts(series_id, page).await?) },
            )
            .await
    }

    #[instrument(skip(self, command), fields(series_id = %command.series_id))]
    pub async fn create(&self, command: CreateScriptCommand) -> Result<ScriptRecord, AppError> {
        ensure_non_empty(&command.title, "title")?;
        self.ensure_series(command.series_id).await?;

        let script = self
            .scripts
            .create_script(CreateScriptParams {
                series_id: command.series_id,
                title: command.title.trim().to_string(),
                episode: command.episode,
                body: command.body,
            })
            .await?;

        publish(
            self.events.as_ref(),
            EventPayload::ScriptCreated {
                series_id: script.series_id,
                script_id: script.id,
            },
        )
        .await;

        Ok(script)
    }

    #[instrument(skip(self, command), fields(series_id = %command.series_id, script_id = %command.id))]
    pub async fn update(&self, command: UpdateScriptCommand) -> Result<ScriptRecord, AppError> {
        ensure_non_empty(&command.title, "title")?;
        let script = self
            .scripts
            .update_script(UpdateScriptParams {
                series_id: command.series_id,
                id: command.id,
                title: command.title.trim().to_string(),
                episode: command.episode,
                body: command.body,
            })
            .await?;

        publish(
            self.events.as_ref(),
            EventPayload::ScriptUpdated {
                series_id: script.series_id,
                script_id: script.id,
            },
        )
        .await;

        Ok(script)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, series_id: Uuid, id: Uuid) -> Result<(), AppError> {
        self.scripts.delete_script(series_id, id).await?;
        publish(
            self.events.as_ref(),
            EventPayload::ScriptDeleted {
                series_id,
                script_id: id,
            },
        )
        .await;
        Ok(())
    }

    async fn ensure_series(&self, series_id: Uuid) -> Result<(), AppError> {
        self.series
            .find_series(series_id)
            .await?
            .map(|_| ())
            .ok_or_else(|| AppError::not_found("series"))
    }
}
