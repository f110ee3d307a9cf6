//! In-memory document store behind the repository port.
//!
//! Tables are kept as JSON row arrays keyed by `TableId`, mirroring a
//! document database's collection-per-group layout with upsert writes:
//! `replace` overwrites a document's rows, `append` extends them, and
//! reading an absent document yields the empty table. The same storage
//! serves the read-only JSON view. Per-table operations are atomic under
//! the map's sharded locks, which is all the pipeline relies on — each
//! version is processed independently.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::domain::{Table, TableId, Version};
use crate::ports::{JsonViewer, Module, ModuleError, RepoError, Repository, ViewError};

pub struct DocStore {
    tables: DashMap<TableId, Vec<Value>>,
}

impl DocStore {
    pub fn new() -> Self {
        Self {
            tables: DashMap::new(),
        }
    }

    fn encode<R: Serialize>(rows: &[R]) -> Result<Vec<Value>, RepoError> {
        rows.iter()
            .map(|row| serde_json::to_value(row).map_err(|err| RepoError::Codec(err.to_string())))
            .collect()
    }
}

impl Default for DocStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<R> Repository<R> for DocStore
where
    R: Serialize + DeserializeOwned + Send + Sync,
{
    async fn get(&self, id: &TableId) -> Result<Table<R>, RepoError> {
        let Some(stored) = self.tables.get(id) else {
            return Ok(Table::empty(id.clone()));
        };

        let rows = stored
            .iter()
            .map(|value| {
                serde_json::from_value(value.clone()).map_err(|err| RepoError::Codec(err.to_string()))
            })
            .collect::<Result<Vec<R>, _>>()?;

        Ok(Table::new(id.clone(), rows))
    }

    async fn append(&self, version: &Version, rows: &[R]) -> Result<(), RepoError> {
        let mut encoded = Self::encode(rows)?;
        self.tables
            .entry(version.id().clone())
            .or_default()
            .append(&mut encoded);

        Ok(())
    }

    async fn replace(&self, version: &Version, rows: &[R]) -> Result<(), RepoError> {
        let encoded = Self::encode(rows)?;
        self.tables.insert(version.id().clone(), encoded);

        Ok(())
    }
}

#[async_trait]
impl JsonViewer for DocStore {
    async fn view_json(&self, id: &TableId) -> Result<Vec<u8>, ViewError> {
        let Some(stored) = self.tables.get(id) else {
            return Err(ViewError::NotFound(id.clone()));
        };

        serde_json::to_vec(&*stored).map_err(|err| ViewError::Storage(err.to_string()))
    }
}

/// Lifecycle wrapper so the store is sequenced like every other module.
pub struct StoreModule {
    store: std::sync::Arc<DocStore>,
}

impl StoreModule {
    pub fn new(store: std::sync::Arc<DocStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Module for StoreModule {
    fn name(&self) -> &'static str {
        "doc_store"
    }

    async fn start(&mut self) -> Result<(), ModuleError> {
        info!(tables = self.store.tables.len(), "document store ready");
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), ModuleError> {
        Ok(())
    }
}
