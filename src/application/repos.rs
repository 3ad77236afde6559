//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::application::pagination::{OffsetPage, PageRequest};
use crate::domain::entities::{
    CanvasEdge, CanvasNode, CanvasRecord, KbEntityRecord, ScriptRecord, SeriesRecord,
};
use crate::domain::types::{BatchOperation, KbEntityType};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct CreateSeriesParams {
    pub title: String,
    pub logline: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UpdateSeriesParams {
    pub id: Uuid,
    pub title: String,
    pub logline: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreateScriptParams {
    pub series_id: Uuid,
    pub title: String,
    pub episode: Option<u32>,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct UpdateScriptParams {
    pub series_id: Uuid,
    pub id: Uuid,
    pub title: String,
    pub episode: Option<u32>,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct CreateKbEntityParams {
    pub series_id: Uuid,
    pub entity_type: KbEntityType,
    pub name: String,
    pub summary: String,
    pub related_ids: Vec<Uuid>,
}

/// The entity type of an existing entry cannot change.
#[derive(Debug, Clone)]
pub struct UpdateKbEntityParams {
    pub series_id: Uuid,
    pub id: Uuid,
    pub name: String,
    pub summary: String,
    pub related_ids: Vec<Uuid>,
}

/// Bulk canvas mutation applied atomically.
#[derive(Debug, Clone)]
pub enum CanvasBatch {
    /// Insert or replace nodes and edges by id.
    Upsert {
        nodes: Vec<CanvasNode>,
        edges: Vec<CanvasEdge>,
    },
    /// Remove nodes and edges by id; edges touching a removed node go too.
    Delete {
        node_ids: Vec<Uuid>,
        edge_ids: Vec<Uuid>,
    },
}

impl CanvasBatch {
    pub fn operation(&self) -> BatchOperation {
        match self {
            CanvasBatch::Upsert { .. } => BatchOperation::Upsert,
            CanvasBatch::Delete { .. } => BatchOperation::Delete,
        }
    }

    /// Number of nodes and edges named by the batch.
    pub fn counts(&self) -> (usize, usize) {
        match self {
            CanvasBatch::Upsert { nodes, edges } => (nodes.len(), edges.len()),
            CanvasBatch::Delete { node_ids, edge_ids } => (node_ids.len(), edge_ids.len()),
        }
    }
}

#[async_trait]
pub trait SeriesRepo: Send + Sync {
    async fn list_series(&self, page: PageRequest) -> Result<OffsetPage<SeriesRecord>, RepoError>;

    async fn find_series(&self, id: Uuid) -> Result<Option<SeriesRecord>, RepoError>;

    async fn create_series(&self, params: CreateSeriesParams) -> Result<SeriesRecord, RepoError>;

    /// Fails with [`RepoError::NotFound`] when the series does not exist.
    async fn update_series(&self, params: UpdateSeriesParams) -> Result<SeriesRecord, RepoError>;

    /// Removes the series row only; nested records stay in storage.
    async fn delete_series(&self, id: Uuid) -> Result<(), RepoError>;
}

#[async_trait]
pub trait ScriptRepo: Send + Sync {
    async fn list_scripts(
        &self,
        series_id: Uuid,
        page: PageRequest,
    ) -> Result<OffsetPage<ScriptRecord>, RepoError>;

    async fn all_scripts(&self, series_id: Uuid) -> Result<Vec<ScriptRecord>, RepoError>;

    async fn find_script(
        &self,
        series_id: Uuid,
        id: Uuid,
    ) -> Result<Option<ScriptRecord>, RepoError>;

    async fn create_script(&self, params: CreateScriptParams) -> Result<ScriptRecord, RepoError>;

    async fn update_script(&self, params: UpdateScriptParams) -> Result<ScriptRecord, RepoError>;

    async fn delete_script(&self, series_id: Uuid, id: Uuid) -> Result<(), RepoError>;
}

#[async_trait]
pub trait KnowledgeBaseRepo: Send + Sync {
    async fn list_entities(
        &self,
        series_id: Uuid,
        entity_type: KbEntityType,
        page: PageRequest,
    ) -> Result<OffsetPage<KbEntityRecord>, RepoError>;

    /// Case-insensitive match on name and summary.
    async fn search_entities(
        &self,
        series_id: Uuid,
        query: &str,
        page: PageRequest,
    ) -> Result<OffsetPage<KbEntityRecord>, RepoError>;

    async fn all_entities(&self, series_id: Uuid) -> Result<Vec<KbEntityRecord>, RepoError>;

    async fn find_entity(
        &self,
        series_id: Uuid,
        id: Uuid,
    ) -> Result<Option<KbEntityRecord>, RepoError>;

    async fn create_entity(
        &self,
        params: CreateKbEntityParams,
    ) -> Result<KbEntityRecord, RepoError>;

    async fn update_entity(
        &self,
        params: UpdateKbEntityParams,
    ) -> Result<KbEntityRecord, RepoError>;

    /// Returns the removed record.
    async fn delete_entity(&self, series_id: Uuid, id: Uuid) -> Result<KbEntityRecord, RepoError>;
}

#[async_trait]
pub trait CanvasRepo: Send + Sync {
    /// An empty canvas when nothing was stored yet.
    async fn load_canvas(&self, series_id: Uuid) -> Result<CanvasRecord, RepoError>;

    async fn apply_batch(
        &self,
        series_id: Uuid,
        batch: &CanvasBatch,
    ) -> Result<CanvasRecord, RepoError>;
}
