//! Process-local repositories.
//!
//! Back the `memory` demo and the integration tests. Records are kept in
//! insertion order, which is also the listing order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::application::pagination::{OffsetPage, PageRequest};
use crate::application::repos::{
    CanvasBatch, CanvasRepo, CreateKbEntityParams, CreateScriptParams, CreateSeriesParams,
    KnowledgeBaseRepo, RepoError, ScriptRepo, SeriesRepo, UpdateKbEntityParams,
    UpdateScriptParams, UpdateSeriesParams,
};
use crate::domain::entities::{CanvasRecord, KbEntityRecord, ScriptRecord, SeriesRecord};
use crate::domain::types::KbEntityType;

#[derive(Default)]
struct Tables {
    series: Vec<SeriesRecord>,
    scripts: Vec<ScriptRecord>,
    entities: Vec<KbEntityRecord>,
    canvases: HashMap<Uuid, CanvasRecord>,
}

#[derive(Default)]
pub struct MemoryRepositories {
    tables: RwLock<Tables>,
    unavailable: AtomicBool,
}

impl MemoryRepositories {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with a persistence error until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), RepoError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RepoError::from_persistence("repository unavailable"));
        }
        Ok(())
    }
}

fn matches_query(entity: &KbEntityRecord, needle: &str) -> bool {
    entity.name.to_lowercase().contains(needle) || entity.summary.to_lowercase().contains(needle)
}

#[async_trait]
impl SeriesRepo for MemoryRepositories {
    async fn list_series(&self, page: PageRequest) -> Result<OffsetPage<SeriesRecord>, RepoError> {
        self.check()?;
        let tables = self.tables.read().await;
        Ok(OffsetPage::slice(tables.series.clone(), page))
    }

    async fn find_series(&self, id: Uuid) -> Result<Option<SeriesRecord>, RepoError> {
        self.check()?;
        let tables = self.tables.read().await;
        Ok(tables.series.iter().find(|series| series.id == id).cloned())
    }

    async fn create_series(&self, params: CreateSeriesParams) -> Result<SeriesRecord, RepoError> {
        self.check()?;
        let now = OffsetDateTime::now_utc();
        let record = SeriesRecord {
            id: Uuid::new_v4(),
            title: params.title,
            logline: params.logline,
            created_at: now,
            updated_at: now,
        };
        self.tables.write().await.series.push(record.clone());
        Ok(record)
    }

    async fn update_series(&self, params: UpdateSeriesParams) -> Result<SeriesRecord, RepoError> {
        self.check()?;
        let mut tables = self.tables.write().await;
        let record = tables
            .series
            .iter_mut()
            .find(|series| series.id == params.id)
            .ok_or(RepoError::NotFound)?;
        record.title = params.title;
        record.logline = params.logline;
        record.updated_at = OffsetDateTime::now_utc();
        Ok(record.clone())
    }

    async fn delete_series(&self, id: Uuid) -> Result<(), RepoError> {
        self.check()?;
        let mut tables = self.tables.write().await;
        let before = tables.series.len();
        tables.series.retain(|series| series.id != id);
        if tables.series.len() == before {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl ScriptRepo for MemoryRepositories {
    async fn list_scripts(
        &self,
        series_id: Uuid,
        page: PageRequest,
    ) -> Result<OffsetPage<ScriptRecord>, RepoError> {
        Ok(OffsetPage::slice(self.all_scripts(series_id).await?, page))
    }

    async fn all_scripts(&self, series_id: Uuid) -> Result<Vec<ScriptRecord>, RepoError> {
        self.check()?;
        let tables = self.tables.read().await;
        Ok(tables
            .scripts
            .iter()
            .filter(|script| script.series_id == series_id)
            .cloned()
            .collect())
    }

    async fn find_script(
        &self,
        series_id: Uuid,
        id: Uuid,
    ) -> Result<Option<ScriptRecord>, RepoError> {
        self.check()?;
        let tables = self.tables.read().await;
        Ok(tables
            .scripts
            .iter()
            .find(|script| script.series_id == series_id && script.id == id)
            .cloned())
    }

    async fn create_script(&self, params: CreateScriptParams) -> Result<ScriptRecord, RepoError> {
        self.check()?;
        let now = OffsetDateTime::now_utc();
        let record = ScriptRecord {
            id: Uuid::new_v4(),
            series_id: params.series_id,
            title: params.title,
            episode: params.episode,
            body: params.body,
            created_at: now,
            updated_at: now,
        };
        self.tables.write().await.scripts.push(record.clone());
        Ok(record)
    }

    async fn update_script(&self, params: UpdateScriptParams) -> Result<ScriptRecord, RepoError> {
        self.check()?;
        let mut tables = self.tables.write().await;
        let record = tables
            .scripts
            .iter_mut()
            .find(|script| script.series_id == params.series_id && script.id == params.id)
            .ok_or(RepoError::NotFound)?;
        record.title = params.title;
        record.episode = params.episode;
        record.body = params.body;
        record.updated_at = OffsetDateTime::now_utc();
        Ok(record.clone())
    }

    async fn delete_script(&self, series_id: Uuid, id: Uuid) -> Result<(), RepoError> {
        self.check()?;
        let mut tables = self.tables.write().await;
        let before = tables.scripts.len();
        tables
            .scripts
            .retain(|script| !(script.series_id == series_id && script.id == id));
        if tables.scripts.len() == before {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl KnowledgeBaseRepo for MemoryRepositories {
    async fn list_entities(
        &self,
        series_id: Uuid,
        entity_type: KbEntityType,
        page: PageRequest,
    ) -> Result<OffsetPage<KbEntityRecord>, RepoError> {
        let entities = self
            .all_entities(series_id)
            .await?
            .into_iter()
            .filter(|entity| entity.entity_type == entity_type)
            .collect();
        Ok(OffsetPage::slice(entities, page))
    }

    async fn search_entities(
        &self,
        series_id: Uuid,
        query: &str,
        page: PageRequest,
    ) -> Result<OffsetPage<KbEntityRecord>, RepoError> {
        let needle = query.to_lowercase();
        let entities = self
            .all_entities(series_id)
            .await?
            .into_iter()
            .filter(|entity| matches_query(entity, &needle))
            .collect();
        Ok(OffsetPage::slice(entities, page))
    }

    async fn all_entities(&self, series_id: Uuid) -> Result<Vec<KbEntityRecord>, RepoError> {
        self.check()?;
        let tables = self.tables.read().await;
        Ok(tables
            .entities
            .iter()
            .filter(|entity| entity.series_id == series_id)
            .cloned()
            .collect())
    }

    async fn find_entity(
        &self,
        series_id: Uuid,
        id: Uuid,
    ) -> Result<Option<KbEntityRecord>, RepoError> {
        self.check()?;
        let tables = self.tables.read().await;
        Ok(tables
            .entities
            .iter()
            .find(|entity| entity.series_id == series_id && entity.id == id)
            .cloned())
    }

    async fn create_entity(
        &self,
        params: CreateKbEntityParams,
    ) -> Result<KbEntityRecord, RepoError> {
        self.check()?;
        let now = OffsetDateTime::now_utc();
        let record = KbEntityRecord {
            id: Uuid::new_v4(),
            series_id: params.series_id,
            entity_type: params.entity_type,
            name: params.name,
            summary: params.summary,
            related_ids: params.related_ids,
            created_at: now,
            updated_at: now,
        };
        self.tables.write().await.entities.push(record.clone());
        Ok(record)
    }

    async fn update_entity(
        &self,
        params: UpdateKbEntityParams,
    ) -> Result<KbEntityRecord, RepoError> {
        self.check()?;
        let mut tables = self.tables.write().await;
        let record = tables
            .entities
            .iter_mut()
            .find(|entity| entity.series_id == params.series_id && entity.id == params.id)
            .ok_or(RepoError::NotFound)?;
        record.name = params.name;
        record.summary = params.summary;
        record.related_ids = params.related_ids;
        record.updated_at = OffsetDateTime::now_utc();
        Ok(record.clone())
    }

    async fn delete_entity(&self, series_id: Uuid, id: Uuid) -> Result<KbEntityRecord, RepoError> {
        self.check()?;
        let mut tables = self.tables.write().await;
        let position = tables
            .entities
            .iter()
            .position(|entity| entity.series_id == series_id && entity.id == id)
            .ok_or(RepoError::NotFound)?;
        Ok(tables.entities.remove(position))
    }
}

#[async_trait]
impl CanvasRepo for MemoryRepositories {
    async fn load_canvas(&self, series_id: Uuid) -> Result<CanvasRecord, RepoError> {
        self.check()?;
        let tables = self.tables.read().await;
        Ok(tables
            .canvases
            .get(&series_id)
            .cloned()
            .unwrap_or_else(|| CanvasRecord {
                series_id,
                ..CanvasRecord::default()
            }))
    }

    async fn apply_batch(
        &self,
        series_id: Uuid,
        batch: &CanvasBatch,
    ) -> Result<CanvasRecord, RepoError> {
        self.check()?;
        let mut tables = self.tables.write().await;
        let canvas = tables
            .canvases
            .entry(series_id)
            .or_insert_with(|| CanvasRecord {
                series_id,
                ..CanvasRecord::default()
            });

        match batch {
            CanvasBatch::Upsert { nodes, edges } => {
                let known = |id: Uuid| {
                    nodes.iter().any(|node| node.id == id)
                        || canvas.nodes.iter().any(|node| node.id == id)
                };
                if let Some(dangling) = edges
                    .iter()
                    .find(|edge| !known(edge.from) || !known(edge.to))
                {
                    return Err(RepoError::InvalidInput {
                        message: format!("edge {} references an unknown node", dangling.id),
                    });
                }

                for node in nodes {
                    match canvas.nodes.iter_mut().find(|existing| existing.id == node.id) {
                        Some(existing) => *existing = node.clone(),
                        None => canvas.nodes.push(node.clone()),
                    }
                }
                for edge in edges {
                    match canvas.edges.iter_mut().find(|existing| existing.id == edge.id) {
                        Some(existing) => *existing = edge.clone(),
                        None => canvas.edges.push(edge.clone()),
                    }
                }
            }
            CanvasBatch::Delete { node_ids, edge_ids } => {
                canvas.nodes.retain(|node| !node_ids.contains(&node.id));
                canvas.edges.retain(|edge| {
                    !edge_ids.contains(&edge.id)
                        && !node_ids.contains(&edge.from)
                        && !node_ids.contains(&edge.to)
                });
            }
        }

        Ok(canvas.clone())
    }
}
