//! PostgreSQL storage engine (sqlx).
//!
//! ## Pool strategies
//!
//! | Strategy | Behaviour |
//! |----------|-----------|
//! | `Queue { size }` | Bounded `PgPool`; sessions borrow a pooled connection |
//! | `NoPool` | Every session opens a dedicated connection and closes it on release |
//!
//! A session acquires its connection and issues `BEGIN` lazily, on the first
//! statement. Once a statement fails the transaction is rolled back so the
//! session stays usable, mirroring how Postgres aborts the transaction.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde_json::Value;
use shared_types::{CodecError, ColumnValue};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Connection, PgConnection, Postgres, Row as _};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::errors::StoreError;
use crate::domain::schema::{ColumnDef, ColumnKind, OrderBy, Row, TableSchema};
use crate::ports::outbound::{StorageEngine, StorageSession};

/// How sessions obtain connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolStrategy {
    /// Bounded pool of at most `size` connections.
    Queue { size: u32 },
    /// A dedicated connection per session.
    NoPool,
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub url: String,
    pub strategy: PoolStrategy,
    /// Upper bound on waiting for a pooled connection.
    pub acquire_timeout: Duration,
}

impl PostgresConfig {
    pub fn new(url: impl Into<String>, strategy: PoolStrategy) -> Self {
        Self {
            url: url.into(),
            strategy,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Clone)]
enum Backend {
    Pooled(PgPool),
    Unpooled(PgConnectOptions),
}

impl Backend {
    async fn connect(&self) -> Result<SessionConnection, StoreError> {
        match self {
            Backend::Pooled(pool) => Ok(SessionConnection::Pooled(
                pool.acquire().await.map_err(map_sqlx)?,
            )),
            Backend::Unpooled(options) => Ok(SessionConnection::Dedicated(
                PgConnection::connect_with(options)
                    .await
                    .map_err(map_sqlx)?,
            )),
        }
    }
}

enum SessionConnection {
    Pooled(PoolConnection<Postgres>),
    Dedicated(PgConnection),
}

impl SessionConnection {
    fn as_conn(&mut self) -> &mut PgConnection {
        match self {
            SessionConnection::Pooled(conn) => &mut **conn,
            SessionConnection::Dedicated(conn) => conn,
        }
    }

    /// Close a dedicated connection; pooled ones go back to the pool.
    async fn finish(self) -> Result<(), StoreError> {
        match self {
            SessionConnection::Pooled(conn) => {
                drop(conn);
                Ok(())
            }
            SessionConnection::Dedicated(conn) => conn.close().await.map_err(map_sqlx),
        }
    }
}

/// sqlx-backed [`StorageEngine`].
pub struct PostgresEngine {
    backend: Backend,
}

impl PostgresEngine {
    /// Build the engine. No connection is made until the first session or
    /// migration needs one.
    pub fn new(config: &PostgresConfig) -> Result<Self, StoreError> {
        let options = PgConnectOptions::from_str(&config.url).map_err(map_sqlx)?;
        let backend = match config.strategy {
            PoolStrategy::Queue { size } => Backend::Pooled(
                PgPoolOptions::new()
                    .max_connections(size)
                    .acquire_timeout(config.acquire_timeout)
                    .connect_lazy_with(options),
            ),
            PoolStrategy::NoPool => Backend::Unpooled(options),
        };
        info!(strategy = ?config.strategy, "Configured PostgreSQL engine");
        Ok(Self { backend })
    }

    /// Close the pool, waiting for borrowed connections to come back.
    pub async fn shutdown(&self) {
        if let Backend::Pooled(pool) = &self.backend {
            pool.close().await;
        }
    }

    async fn execute_all(&self, statements: &[String]) -> Result<(), StoreError> {
        let mut conn = self.backend.connect().await?;
        let mut result = Ok(());
        for sql in statements {
            debug!(sql = %sql, "Executing DDL");
            if let Err(e) = sqlx::query(sql).execute(conn.as_conn()).await {
                result = Err(map_sqlx(e));
                break;
            }
        }
        conn.finish().await?;
        result
    }
}

#[async_trait]
impl StorageEngine for PostgresEngine {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn open_session(&self) -> Result<Arc<dyn StorageSession>, StoreError> {
        Ok(Arc::new(PostgresSession {
            id: Uuid::new_v4(),
            backend: self.backend.clone(),
            state: Mutex::new(SessionState::default()),
        }))
    }

    async fn migrate(&self, table: &TableSchema) -> Result<(), StoreError> {
        let mut statements = vec![table.create_table_sql()];
        statements.extend(table.create_index_sql());
        self.execute_all(&statements).await?;
        info!(table = table.name, "Migrated table");
        Ok(())
    }

    async fn drop_all(&self, table: &TableSchema) -> Result<(), StoreError> {
        self.execute_all(&[table.drop_table_sql()]).await
    }
}

#[derive(Default)]
struct SessionState {
    conn: Option<SessionConnection>,
    in_transaction: bool,
    closed: bool,
}

/// Session of a [`PostgresEngine`].
pub struct PostgresSession {
    id: Uuid,
    backend: Backend,
    state: Mutex<SessionState>,
}

impl PostgresSession {
    /// The session's connection inside an open transaction.
    async fn transaction<'s>(
        &self,
        state: &'s mut SessionState,
    ) -> Result<&'s mut PgConnection, StoreError> {
        if state.closed {
            return Err(StoreError::SessionClosed {
                session: self.id.to_string(),
            });
        }
        if state.conn.is_none() {
            state.conn = Some(self.backend.connect().await?);
            debug!(session = %self.id, "Acquired connection");
        }
        let Some(conn) = state.conn.as_mut() else {
            return Err(StoreError::database("connection unavailable"));
        };
        let conn = conn.as_conn();
        if !state.in_transaction {
            sqlx::query("BEGIN")
                .execute(&mut *conn)
                .await
                .map_err(map_sqlx)?;
            state.in_transaction = true;
        }
        Ok(conn)
    }

    /// Roll back after a failed statement and hand the error back.
    async fn abort(&self, state: &mut SessionState, err: StoreError) -> StoreError {
        self.end_transaction(state, "ROLLBACK").await;
        err
    }

    async fn end_transaction(&self, state: &mut SessionState, verb: &'static str) {
        if let Err(e) = self.finish_transaction(state, verb).await {
            warn!(session = %self.id, error = %e, "Failed to {verb} after error");
        }
    }

    async fn finish_transaction(
        &self,
        state: &mut SessionState,
        verb: &'static str,
    ) -> Result<(), StoreError> {
        if !state.in_transaction {
            return Ok(());
        }
        state.in_transaction = false;
        if let Some(conn) = state.conn.as_mut() {
            sqlx::query(verb)
                .execute(conn.as_conn())
                .await
                .map_err(map_sqlx)?;
        }
        Ok(())
    }

    async fn fetch(
        &self,
        table: &TableSchema,
        filter: Option<(&'static str, &ColumnValue)>,
        order: &[OrderBy],
    ) -> Result<Vec<Row>, StoreError> {
        let sql = table.select_sql(filter.map(|(column, _)| column), order)?;
        let mut query = sqlx::query(&sql);
        if let Some((column, value)) = filter {
            let def = &table.columns[table.position(column)?];
            query = bind_value(query, def, value.clone())?;
        }
        let mut state = self.state.lock().await;
        let conn = self.transaction(&mut state).await?;
        match query.fetch_all(conn).await {
            Ok(rows) => rows.iter().map(|row| read_row(table, row)).collect(),
            Err(e) => Err(self.abort(&mut state, map_sqlx(e)).await),
        }
    }
}

#[async_trait]
impl StorageSession for PostgresSession {
    fn id(&self) -> Uuid {
        self.id
    }

    async fn insert(&self, table: &TableSchema, row: Row) -> Result<(), StoreError> {
        table.check_row(&row)?;
        let key = format!("0x{}", hex::encode(table.key_of(&row)?));
        let sql = table.insert_sql();
        let query = bind_row(sqlx::query(&sql), table, row)?;
        let mut state = self.state.lock().await;
        let conn = self.transaction(&mut state).await?;
        let err = match query.execute(conn).await {
            Ok(_) => return Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => StoreError::Conflict {
                table: table.name,
                key,
            },
            Err(e) => map_sqlx(e),
        };
        Err(self.abort(&mut state, err).await)
    }

    async fn update(&self, table: &TableSchema, row: Row) -> Result<(), StoreError> {
        table.check_row(&row)?;
        let key = format!("0x{}", hex::encode(table.key_of(&row)?));
        let sql = table.update_sql()?;
        let query = bind_row(sqlx::query(&sql), table, row)?;
        let mut state = self.state.lock().await;
        let conn = self.transaction(&mut state).await?;
        let err = match query.execute(conn).await {
            Ok(done) if done.rows_affected() > 0 => return Ok(()),
            Ok(_) => StoreError::NotFound {
                table: table.name,
                key,
            },
            Err(e) => map_sqlx(e),
        };
        Err(self.abort(&mut state, err).await)
    }

    async fn fetch_all(&self, table: &TableSchema) -> Result<Vec<Row>, StoreError> {
        self.fetch(table, None, &[]).await
    }

    async fn fetch_by_key(
        &self,
        table: &TableSchema,
        key: &ColumnValue,
    ) -> Result<Option<Row>, StoreError> {
        let rows = self.fetch(table, Some((table.primary_key, key)), &[]).await?;
        Ok(rows.into_iter().next())
    }

    async fn fetch_where(
        &self,
        table: &TableSchema,
        column: &'static str,
        value: &ColumnValue,
        order: &[OrderBy],
    ) -> Result<Vec<Row>, StoreError> {
        self.fetch(table, Some((column, value)), order).await
    }

    async fn commit(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        self.finish_transaction(&mut state, "COMMIT").await
    }

    async fn rollback(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        self.finish_transaction(&mut state, "ROLLBACK").await
    }

    async fn close(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Ok(());
        }
        state.closed = true;
        let rolled_back = self.finish_transaction(&mut state, "ROLLBACK").await;
        if let Some(conn) = state.conn.take() {
            conn.finish().await?;
            debug!(session = %self.id, "Released connection");
        }
        rolled_back
    }
}

impl Drop for PostgresSession {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        let Some(conn) = state.conn.take() else {
            return;
        };
        let in_transaction = state.in_transaction;
        let id = self.id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let mut conn = conn;
                    if in_transaction {
                        if let Err(e) = sqlx::query("ROLLBACK").execute(conn.as_conn()).await {
                            warn!(session = %id, error = %e, "Rollback of dropped session failed");
                        }
                    }
                    if let Err(e) = conn.finish().await {
                        warn!(session = %id, error = %e, "Close of dropped session failed");
                    }
                });
            }
            Err(_) => {
                // Without a runtime nothing can roll back; make sure a dirty
                // connection is not handed to the next borrower.
                if let SessionConnection::Pooled(conn) = conn {
                    drop(conn.detach());
                }
            }
        }
    }
}

// =============================================================================
// VALUE MAPPING
// =============================================================================

type PgQuery<'q> = Query<'q, Postgres, PgArguments>;

fn bind_row<'q>(
    mut query: PgQuery<'q>,
    table: &TableSchema,
    row: Row,
) -> Result<PgQuery<'q>, StoreError> {
    for (def, value) in table.columns.iter().zip(row) {
        query = bind_value(query, def, value)?;
    }
    Ok(query)
}

/// Bind one value; `NULL`s are typed after the column so Postgres never has
/// to guess.
fn bind_value<'q>(
    query: PgQuery<'q>,
    def: &ColumnDef,
    value: ColumnValue,
) -> Result<PgQuery<'q>, StoreError> {
    Ok(match value {
        ColumnValue::Null => match def.kind {
            ColumnKind::Uint256 => query.bind(None::<BigDecimal>),
            ColumnKind::Binary(_) => query.bind(None::<Vec<u8>>),
            ColumnKind::SmallInt => query.bind(None::<i16>),
            ColumnKind::Bool => query.bind(None::<bool>),
            ColumnKind::Json => query.bind(None::<sqlx::types::Json<Value>>),
            ColumnKind::Timestamp => query.bind(None::<DateTime<Utc>>),
        },
        ColumnValue::Integer(i) if def.kind == ColumnKind::SmallInt => {
            let narrow = i16::try_from(i).map_err(|_| CodecError::Range {
                codec: "smallint",
                value: i.to_string(),
            })?;
            query.bind(narrow)
        }
        ColumnValue::Integer(i) if def.kind == ColumnKind::Uint256 => {
            query.bind(BigDecimal::from(i))
        }
        ColumnValue::Integer(i) => query.bind(i),
        ColumnValue::Bool(b) => query.bind(b),
        ColumnValue::Float(f) => query.bind(f),
        ColumnValue::Numeric(d) => query.bind(d),
        ColumnValue::Text(s) => query.bind(s),
        ColumnValue::Bytes(b) => query.bind(b),
        ColumnValue::Json(v) => query.bind(sqlx::types::Json(v)),
        ColumnValue::Timestamp(t) => query.bind(t),
    })
}

fn read_row(table: &TableSchema, row: &PgRow) -> Result<Row, StoreError> {
    table
        .columns
        .iter()
        .map(|def| read_column(row, def))
        .collect()
}

fn read_column(row: &PgRow, def: &ColumnDef) -> Result<ColumnValue, StoreError> {
    let name = def.name;
    let value = match def.kind {
        ColumnKind::Uint256 => row.try_get::<Option<BigDecimal>, _>(name).map(ColumnValue::from),
        ColumnKind::Binary(_) => row.try_get::<Option<Vec<u8>>, _>(name).map(ColumnValue::from),
        ColumnKind::SmallInt => row
            .try_get::<Option<i16>, _>(name)
            .map(|v| v.map(i64::from).into()),
        ColumnKind::Bool => row.try_get::<Option<bool>, _>(name).map(ColumnValue::from),
        ColumnKind::Json => row
            .try_get::<Option<sqlx::types::Json<Value>>, _>(name)
            .map(|v| v.map_or(ColumnValue::Null, |json| ColumnValue::Json(json.0))),
        ColumnKind::Timestamp => row
            .try_get::<Option<DateTime<Utc>>, _>(name)
            .map(ColumnValue::from),
    };
    value.map_err(|e| match e {
        // The stored type does not match the declared one: schema drift.
        sqlx::Error::ColumnDecode { .. } => StoreError::Codec(CodecError::Type {
            codec: name,
            expected: "declared column type",
            found: "incompatible storage type",
        }),
        other => map_sqlx(other),
    })
}

fn map_sqlx(err: sqlx::Error) -> StoreError {
    StoreError::database(err.to_string())
}
