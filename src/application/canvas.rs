use std::sync::Arc;

use tracing::instrument;
use uuid::Uuid;

use crate::application::error::AppError;
use crate::application::publish;
use crate::application::repos::{CanvasBatch, CanvasRepo, SeriesRepo};
use crate::cache::{CacheAside, EventBus, EventPayload, TtlClass, keys};
use crate::domain::entities::CanvasRecord;

#[derive(Clone)]
pub struct CanvasService {
    series: Arc<dyn SeriesRepo>,
    canvas: Arc<dyn CanvasRepo>,
    cache: Arc<CacheAside>,
    events: Option<Arc<EventBus>>,
}

impl CanvasService {
    pub fn new(
        series: Arc<dyn SeriesRepo>,
        canvas: Arc<dyn CanvasRepo>,
        cache: Arc<CacheAside>,
    ) -> Self {
        Self {
            series,
            canvas,
            cache,
            events: None,
        }
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    /// All nodes and edges of the series canvas.
    pub async fn get(&self, series_id: Uuid) -> Result<CanvasRecord, AppError> {
        self.cache
            .cached(&keys::canvas(series_id), TtlClass::Entity, || async {
                self.ensure_series(series_id).await?;
                Ok::<_, AppError>(self.canvas.load_canvas(series_id).await?)
            })
            .await
    }

    /// Apply a bulk mutation and return the resulting canvas.
    #[instrument(skip(self, batch), fields(operation = ?batch.operation()))]
    pub async fn apply(
        &self,
        series_id: Uuid,
        batch: CanvasBatch,
    ) -> Result<CanvasRecord, AppError> {
        self.ensure_series(series_id).await?;
        let canvas = self.canvas.apply_batch(series_id, &batch).await?;

        let (nodes, edges) = batch.counts();
        publish(
            self.events.as_ref(),
            EventPayload::CanvasBatchMutated {
                series_id,
                operation: batch.operation(),
                nodes,
                edges,
            },
        )
        .await;

        Ok(canvas)
    }

    async fn ensure_series(&self, series_id: Uuid) -> Result<(), AppError> {
        self.series
            .find_series(series_id)
            .await?
            .map(|_| ())
            .ok_or_else(|| AppError::not_found("series"))
    }
}
