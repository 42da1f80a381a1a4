//! # Outbound Ports (Driven Ports)
//!
//! Dependencies the store needs from the outside world: a storage engine
//! handing out transactional sessions, and a clock.
//!
//! Production uses `PostgresEngine`; unit tests use `InMemoryEngine`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared_types::ColumnValue;
use uuid::Uuid;

use crate::domain::errors::StoreError;
use crate::domain::schema::{OrderBy, Row, TableSchema};

/// One unit-of-work's connection to storage.
///
/// Writes are staged in the session's transaction until [`commit`]; they are
/// visible to reads through this session but to no other session until
/// then. After [`close`] every call fails with `SessionClosed`.
///
/// [`commit`]: StorageSession::commit
/// [`close`]: StorageSession::close
#[async_trait]
pub trait StorageSession: Send + Sync {
    fn id(&self) -> Uuid;

    /// Insert a full row. Fails with `Conflict` on a duplicate primary key.
    async fn insert(&self, table: &TableSchema, row: Row) -> Result<(), StoreError>;

    /// Replace every non-key column of the row with the same primary key.
    /// Fails with `NotFound` if there is none.
    async fn update(&self, table: &TableSchema, row: Row) -> Result<(), StoreError>;

    async fn fetch_all(&self, table: &TableSchema) -> Result<Vec<Row>, StoreError>;

    async fn fetch_by_key(
        &self,
        table: &TableSchema,
        key: &ColumnValue,
    ) -> Result<Option<Row>, StoreError>;

    /// Rows whose `column` equals `value`, sorted by `order`.
    async fn fetch_where(
        &self,
        table: &TableSchema,
        column: &'static str,
        value: &ColumnValue,
        order: &[OrderBy],
    ) -> Result<Vec<Row>, StoreError>;

    async fn commit(&self) -> Result<(), StoreError>;

    async fn rollback(&self) -> Result<(), StoreError>;

    /// Roll back uncommitted work and give the connection back. Idempotent.
    async fn close(&self) -> Result<(), StoreError>;
}

/// Process-wide storage handle that opens sessions.
#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Engine name for logs.
    fn name(&self) -> &'static str;

    async fn open_session(&self) -> Result<Arc<dyn StorageSession>, StoreError>;

    /// Create the table and its indexes if missing.
    async fn migrate(&self, table: &TableSchema) -> Result<(), StoreError>;

    /// Drop the table and everything in it.
    async fn drop_all(&self, table: &TableSchema) -> Result<(), StoreError>;
}

/// Abstract time source for `created`/`modified` stamps.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

impl<T: TimeSource + ?Sized> TimeSource for Arc<T> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}
