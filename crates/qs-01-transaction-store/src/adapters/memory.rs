//! In-memory storage engine for unit tests.
//!
//! Committed rows live behind one lock shared by every session. Each session
//! stages its writes privately and applies them atomically on commit, so
//! uncommitted work is invisible to other sessions the same way a database
//! transaction is.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use parking_lot::{Mutex, RwLock};
use shared_types::ColumnValue;
use uuid::Uuid;

use crate::domain::errors::StoreError;
use crate::domain::schema::{OrderBy, Row, TableSchema};
use crate::ports::outbound::{StorageEngine, StorageSession};

type Table = BTreeMap<Vec<u8>, Row>;

#[derive(Default)]
struct Committed {
    tables: HashMap<&'static str, Table>,
}

impl Committed {
    fn table(&self, schema: &TableSchema) -> Result<&Table, StoreError> {
        self.tables.get(schema.name).ok_or_else(|| missing_table(schema))
    }
}

fn missing_table(schema: &TableSchema) -> StoreError {
    StoreError::schema(format!("relation \"{}\" does not exist", schema.name))
}

fn conflict(schema: &TableSchema, key: &[u8]) -> StoreError {
    StoreError::Conflict {
        table: schema.name,
        key: hex_key(key),
    }
}

fn not_found(schema: &TableSchema, key: &[u8]) -> StoreError {
    StoreError::NotFound {
        table: schema.name,
        key: hex_key(key),
    }
}

fn hex_key(key: &[u8]) -> String {
    format!("0x{}", hex::encode(key))
}

/// In-memory [`StorageEngine`].
#[derive(Default)]
pub struct InMemoryEngine {
    committed: Arc<RwLock<Committed>>,
    open_sessions: Arc<AtomicUsize>,
}

impl InMemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sessions opened and not yet closed or dropped.
    #[must_use]
    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(AtomicOrdering::SeqCst)
    }

    /// Committed row count of a table.
    #[must_use]
    pub fn committed_rows(&self, table: &TableSchema) -> usize {
        self.committed
            .read()
            .tables
            .get(table.name)
            .map_or(0, BTreeMap::len)
    }
}

#[async_trait]
impl StorageEngine for InMemoryEngine {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn open_session(&self) -> Result<Arc<dyn StorageSession>, StoreError> {
        self.open_sessions.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(Arc::new(InMemorySession {
            id: Uuid::new_v4(),
            committed: Arc::clone(&self.committed),
            open_sessions: Arc::clone(&self.open_sessions),
            state: Mutex::new(SessionState::default()),
        }))
    }

    async fn migrate(&self, table: &TableSchema) -> Result<(), StoreError> {
        self.committed.write().tables.entry(table.name).or_default();
        Ok(())
    }

    async fn drop_all(&self, table: &TableSchema) -> Result<(), StoreError> {
        self.committed.write().tables.remove(table.name);
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum StagedWrite {
    Insert {
        table: &'static str,
        key: Vec<u8>,
        row: Row,
    },
    Update {
        table: &'static str,
        key: Vec<u8>,
        row: Row,
    },
}

#[derive(Default)]
struct SessionState {
    staged: Vec<StagedWrite>,
    closed: bool,
}

/// Session of an [`InMemoryEngine`].
pub struct InMemorySession {
    id: Uuid,
    committed: Arc<RwLock<Committed>>,
    open_sessions: Arc<AtomicUsize>,
    state: Mutex<SessionState>,
}

impl InMemorySession {
    fn ensure_open(&self, state: &SessionState) -> Result<(), StoreError> {
        if state.closed {
            return Err(StoreError::SessionClosed {
                session: self.id.to_string(),
            });
        }
        Ok(())
    }

    /// The table as this session sees it: committed rows overlaid with its
    /// own staged writes.
    fn view(&self, schema: &TableSchema, state: &SessionState) -> Result<Table, StoreError> {
        let mut table = self.committed.read().table(schema)?.clone();
        for write in &state.staged {
            match write {
                StagedWrite::Insert { table: name, key, row }
                | StagedWrite::Update { table: name, key, row }
                    if *name == schema.name =>
                {
                    table.insert(key.clone(), row.clone());
                }
                _ => {}
            }
        }
        Ok(table)
    }

    fn release(&self, state: &mut SessionState) {
        if !state.closed {
            state.closed = true;
            state.staged.clear();
            self.open_sessions.fetch_sub(1, AtomicOrdering::SeqCst);
        }
    }
}

#[async_trait]
impl StorageSession for InMemorySession {
    fn id(&self) -> Uuid {
        self.id
    }

    async fn insert(&self, table: &TableSchema, row: Row) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        self.ensure_open(&state)?;
        table.check_row(&row)?;
        let key = table.key_of(&row)?.to_vec();
        if self.view(table, &state)?.contains_key(&key) {
            return Err(conflict(table, &key));
        }
        state.staged.push(StagedWrite::Insert {
            table: table.name,
            key,
            row,
        });
        Ok(())
    }

    async fn update(&self, table: &TableSchema, row: Row) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        self.ensure_open(&state)?;
        table.check_row(&row)?;
        let key = table.key_of(&row)?.to_vec();
        if !self.view(table, &state)?.contains_key(&key) {
            return Err(not_found(table, &key));
        }
        state.staged.push(StagedWrite::Update {
            table: table.name,
            key,
            row,
        });
        Ok(())
    }

    async fn fetch_all(&self, table: &TableSchema) -> Result<Vec<Row>, StoreError> {
        let state = self.state.lock();
        self.ensure_open(&state)?;
        Ok(self.view(table, &state)?.into_values().collect())
    }

    async fn fetch_by_key(
        &self,
        table: &TableSchema,
        key: &ColumnValue,
    ) -> Result<Option<Row>, StoreError> {
        let state = self.state.lock();
        self.ensure_open(&state)?;
        let ColumnValue::Bytes(key) = key else {
            return Err(StoreError::schema(format!(
                "primary key of {} must be bytes, got {}",
                table.name,
                key.type_name()
            )));
        };
        Ok(self.view(table, &state)?.remove(key))
    }

    async fn fetch_where(
        &self,
        table: &TableSchema,
        column: &'static str,
        value: &ColumnValue,
        order: &[OrderBy],
    ) -> Result<Vec<Row>, StoreError> {
        let state = self.state.lock();
        self.ensure_open(&state)?;
        let position = table.position(column)?;
        let sort_keys = order
            .iter()
            .map(|o| -> Result<(usize, bool), StoreError> {
                Ok((table.position(o.column)?, o.descending))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut rows: Vec<Row> = self
            .view(table, &state)?
            .into_values()
            .filter(|row| compare_values(&row[position], value) == Some(Ordering::Equal))
            .collect();
        rows.sort_by(|a, b| {
            sort_keys
                .iter()
                .map(|&(i, descending)| {
                    let ord = compare_values(&a[i], &b[i]).unwrap_or(Ordering::Equal);
                    if descending {
                        ord.reverse()
                    } else {
                        ord
                    }
                })
                .find(|ord| ord.is_ne())
                .unwrap_or(Ordering::Equal)
        });
        Ok(rows)
    }

    async fn commit(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        self.ensure_open(&state)?;
        let staged = std::mem::take(&mut state.staged);
        let mut committed = self.committed.write();

        // Validate the whole batch against what other sessions committed in
        // the meantime before applying any of it.
        let mut inserted: Vec<(&'static str, &[u8])> = Vec::new();
        for write in &staged {
            match write {
                StagedWrite::Insert { table, key, .. } => {
                    let existing = committed.tables.get(table).ok_or_else(|| {
                        StoreError::schema(format!("relation \"{table}\" does not exist"))
                    })?;
                    if existing.contains_key(key) {
                        return Err(StoreError::Conflict {
                            table: *table,
                            key: hex_key(key),
                        });
                    }
                    inserted.push((*table, key.as_slice()));
                }
                StagedWrite::Update { table, key, .. } => {
                    let exists = committed
                        .tables
                        .get(table)
                        .is_some_and(|t| t.contains_key(key));
                    if !exists && !inserted.contains(&(*table, key.as_slice())) {
                        return Err(StoreError::NotFound {
                            table: *table,
                            key: hex_key(key),
                        });
                    }
                }
            }
        }

        for write in staged {
            let (StagedWrite::Insert { table, key, row } | StagedWrite::Update { table, key, row }) =
                write;
            committed.tables.entry(table).or_default().insert(key, row);
        }
        Ok(())
    }

    async fn rollback(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        self.ensure_open(&state)?;
        state.staged.clear();
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        self.release(&mut state);
        Ok(())
    }
}

impl Drop for InMemorySession {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if !state.closed {
            state.closed = true;
            self.open_sessions.fetch_sub(1, AtomicOrdering::SeqCst);
        }
    }
}

/// SQL-like comparison of two column values; `None` when incomparable.
/// `NULL` never compares equal, matching `= NULL` in SQL.
fn compare_values(a: &ColumnValue, b: &ColumnValue) -> Option<Ordering> {
    use ColumnValue as V;
    match (a, b) {
        (V::Null, _) | (_, V::Null) => None,
        (V::Bool(x), V::Bool(y)) => Some(x.cmp(y)),
        (V::Integer(x), V::Integer(y)) => Some(x.cmp(y)),
        (V::Numeric(x), V::Numeric(y)) => Some(x.cmp(y)),
        (V::Integer(x), V::Numeric(y)) => Some(BigDecimal::from(*x).cmp(y)),
        (V::Numeric(x), V::Integer(y)) => Some(x.cmp(&BigDecimal::from(*y))),
        (V::Float(x), V::Float(y)) => x.partial_cmp(y),
        (V::Text(x), V::Text(y)) => Some(x.cmp(y)),
        (V::Bytes(x), V::Bytes(y)) => Some(x.cmp(y)),
        (V::Timestamp(x), V::Timestamp(y)) => Some(x.cmp(y)),
        (V::Json(x), V::Json(y)) => (x == y).then_some(Ordering::Equal),
        _ => None,
    }
}
