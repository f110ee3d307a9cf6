//! Port contracts consumed and exposed by the pipeline.
//!
//! The storage backend and the upstream data providers live behind these
//! narrow traits; the pipeline never talks to a database driver or an HTTP
//! client directly. The module lifecycle port is what the application
//! supervisor uses to sequence startup and teardown uniformly across the
//! bus, the store and the HTTP listener.

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::domain::{Table, TableId, Version};
use crate::events::{Event, UpdateError};

/// Storage failures surfaced by the repository port.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("storage failure: {0}")]
    Storage(String),

    #[error("row codec failure: {0}")]
    Codec(String),
}

/// Read/append/replace contract of the document store, per row type.
///
/// "Not found" is not an error: `get` of an absent table returns the
/// empty table so a first update can populate it. Writes are upserts and
/// must be safe for concurrent use across table versions.
#[async_trait]
pub trait Repository<R>: Send + Sync {
    async fn get(&self, id: &TableId) -> Result<Table<R>, RepoError>;

    async fn append(&self, version: &Version, rows: &[R]) -> Result<(), RepoError>;

    async fn replace(&self, version: &Version, rows: &[R]) -> Result<(), RepoError>;
}

/// Provider failures surfaced by gateways.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("provider request failed: {0}")]
    Provider(String),

    #[error("malformed provider payload: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        GatewayError::Provider(err.to_string())
    }
}

/// Per-table adapter to an external data provider.
///
/// Given the stored table and the as-of date, returns the candidate rows
/// for persistence. An empty vec means "nothing new" and ends the unit of
/// work silently; the gateway itself owns this change detection by
/// comparing the stored table's last row against fresh provider data.
/// Must be idempotent for the same inputs.
#[async_trait]
pub trait TableGateway<R>: Send + Sync {
    async fn fetch(&self, table: &Table<R>, as_of: NaiveDate) -> Result<Vec<R>, GatewayError>;
}

/// Chooses which table ids must react to an event.
///
/// Pure and side-effect-free: typically a match on the event variant and
/// the source id.
pub trait Selector: Send + Sync {
    fn select(&self, event: &Event) -> Result<Vec<TableId>, UpdateError>;
}

/// A failed invariant check on freshly fetched rows.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

/// Invariant check run against fetched rows before persistence.
pub type Validator<R> = fn(&Table<R>, &[R]) -> Result<(), ValidationError>;

/// Failures of the read-only JSON projection.
#[derive(Debug, thiserror::Error)]
pub enum ViewError {
    #[error("table {0} not found")]
    NotFound(TableId),

    #[error("storage failure: {0}")]
    Storage(String),
}

/// Read-only projection of a stored table's rows for HTTP consumption.
#[async_trait]
pub trait JsonViewer: Send + Sync {
    async fn view_json(&self, id: &TableId) -> Result<Vec<u8>, ViewError>;
}

/// Lifecycle failures reported by modules.
#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    #[error("start failed: {0}")]
    Start(String),

    #[error("shutdown failed: {0}")]
    Shutdown(String),
}

/// Uniform lifecycle contract for the application's long-lived parts.
///
/// The supervisor starts modules in dependency order and shuts them down
/// in reverse, each phase bounded by its own timeout.
#[async_trait]
pub trait Module: Send {
    fn name(&self) -> &'static str;

    async fn start(&mut self) -> Result<(), ModuleError>;

    async fn shutdown(&mut self) -> Result<(), ModuleError>;
}
