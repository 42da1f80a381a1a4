//! # Table Schema
//!
//! Column layout shared by every storage engine. Rows travel between the
//! entity model and the engines as `Vec<ColumnValue>` aligned with
//! [`TableSchema::columns`]; the schema tells an engine how to create the
//! table, which column is the key, and which SQL type a `NULL` binds as.

use shared_types::{ColumnValue, UINT256_PRECISION};

use super::errors::StoreError;

/// One row, positionally aligned with the table's columns.
pub type Row = Vec<ColumnValue>;

/// Storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// `NUMERIC(78, 0)`.
    Uint256,
    /// `BYTEA`, optionally constrained to an exact width.
    Binary(Option<usize>),
    /// `SMALLINT`.
    SmallInt,
    /// `BOOLEAN`.
    Bool,
    /// `JSONB`.
    Json,
    /// `TIMESTAMPTZ`.
    Timestamp,
}

impl ColumnKind {
    #[must_use]
    pub fn sql_type(&self) -> String {
        match self {
            ColumnKind::Uint256 => format!("NUMERIC({UINT256_PRECISION}, 0)"),
            ColumnKind::Binary(_) => "BYTEA".to_string(),
            ColumnKind::SmallInt => "SMALLINT".to_string(),
            ColumnKind::Bool => "BOOLEAN".to_string(),
            ColumnKind::Json => "JSONB".to_string(),
            ColumnKind::Timestamp => "TIMESTAMPTZ".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub kind: ColumnKind,
    pub nullable: bool,
    /// Backed by a single-column index.
    pub indexed: bool,
}

impl ColumnDef {
    #[must_use]
    pub const fn required(name: &'static str, kind: ColumnKind) -> Self {
        Self {
            name,
            kind,
            nullable: false,
            indexed: false,
        }
    }

    #[must_use]
    pub const fn optional(name: &'static str, kind: ColumnKind) -> Self {
        Self {
            name,
            kind,
            nullable: true,
            indexed: false,
        }
    }

    #[must_use]
    pub const fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }
}

/// One column of a composite index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexColumn {
    pub name: &'static str,
    pub descending: bool,
}

/// A named composite index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexDef {
    pub name: &'static str,
    pub columns: &'static [IndexColumn],
}

/// Sort key for ordered fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderBy {
    pub column: &'static str,
    pub descending: bool,
}

impl OrderBy {
    #[must_use]
    pub const fn desc(column: &'static str) -> Self {
        Self {
            column,
            descending: true,
        }
    }

    #[must_use]
    pub const fn asc(column: &'static str) -> Self {
        Self {
            column,
            descending: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSchema {
    pub name: &'static str,
    pub columns: &'static [ColumnDef],
    /// Must name a `Binary` column.
    pub primary_key: &'static str,
    pub indexes: &'static [IndexDef],
}

impl TableSchema {
    /// Position of a column in a [`Row`].
    pub fn position(&self, column: &str) -> Result<usize, StoreError> {
        self.columns
            .iter()
            .position(|c| c.name == column)
            .ok_or_else(|| {
                StoreError::schema(format!("unknown column {column} in {}", self.name))
            })
    }

    pub fn primary_key_position(&self) -> Result<usize, StoreError> {
        self.position(self.primary_key)
    }

    /// Extract the primary key bytes of a row.
    pub fn key_of<'r>(&self, row: &'r [ColumnValue]) -> Result<&'r [u8], StoreError> {
        match row.get(self.primary_key_position()?) {
            Some(ColumnValue::Bytes(key)) => Ok(key),
            Some(other) => Err(StoreError::schema(format!(
                "primary key of {} must be bytes, got {}",
                self.name,
                other.type_name()
            ))),
            None => Err(self.width_mismatch(row.len())),
        }
    }

    /// Reject rows whose width or nullability does not match the columns.
    pub fn check_row(&self, row: &[ColumnValue]) -> Result<(), StoreError> {
        if row.len() != self.columns.len() {
            return Err(self.width_mismatch(row.len()));
        }
        for (column, value) in self.columns.iter().zip(row) {
            if value.is_null() && !column.nullable {
                return Err(StoreError::schema(format!(
                    "null value in column {} of {} violates not-null constraint",
                    column.name, self.name
                )));
            }
        }
        Ok(())
    }

    fn width_mismatch(&self, actual: usize) -> StoreError {
        StoreError::schema(format!(
            "row for {} has {actual} columns, expected {}",
            self.name,
            self.columns.len()
        ))
    }

    // =========================================================================
    // SQL
    // =========================================================================

    #[must_use]
    pub fn create_table_sql(&self) -> String {
        let columns: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                let mut def = format!("{} {}", quote(c.name), c.kind.sql_type());
                if !c.nullable {
                    def.push_str(" NOT NULL");
                }
                if c.name == self.primary_key {
                    def.push_str(" PRIMARY KEY");
                }
                if let ColumnKind::Binary(Some(width)) = c.kind {
                    def.push_str(&format!(" CHECK (octet_length({}) = {width})", quote(c.name)));
                }
                def
            })
            .collect();
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote(self.name),
            columns.join(", ")
        )
    }

    /// Single-column indexes first, then the composite ones.
    #[must_use]
    pub fn create_index_sql(&self) -> Vec<String> {
        let single = self.columns.iter().filter(|c| c.indexed).map(|c| {
            format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                quote(&format!("ix_{}_{}", self.name, c.name)),
                quote(self.name),
                quote(c.name)
            )
        });
        let composite = self.indexes.iter().map(|index| {
            let columns: Vec<String> = index
                .columns
                .iter()
                .map(|c| {
                    if c.descending {
                        format!("{} DESC", quote(c.name))
                    } else {
                        quote(c.name)
                    }
                })
                .collect();
            format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                quote(index.name),
                quote(self.name),
                columns.join(", ")
            )
        });
        single.chain(composite).collect()
    }

    #[must_use]
    pub fn drop_table_sql(&self) -> String {
        format!("DROP TABLE IF EXISTS {}", quote(self.name))
    }

    /// `INSERT` binding every column in row order.
    #[must_use]
    pub fn insert_sql(&self) -> String {
        let names: Vec<String> = self.columns.iter().map(|c| quote(c.name)).collect();
        let params: Vec<String> = (1..=self.columns.len()).map(|i| format!("${i}")).collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote(self.name),
            names.join(", "),
            params.join(", ")
        )
    }

    /// `UPDATE` by primary key. Parameters are bound in row order, so the key
    /// lands on its own position and is matched there rather than rewritten.
    pub fn update_sql(&self) -> Result<String, StoreError> {
        let key_param = self.primary_key_position()? + 1;
        let assignments: Vec<String> = self
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.name != self.primary_key)
            .map(|(i, c)| format!("{} = ${}", quote(c.name), i + 1))
            .collect();
        Ok(format!(
            "UPDATE {} SET {} WHERE {} = ${key_param}",
            quote(self.name),
            assignments.join(", "),
            quote(self.primary_key)
        ))
    }

    /// `SELECT` of every column, optionally filtered by equality on one
    /// column (bound as `$1`) and ordered.
    pub fn select_sql(
        &self,
        filter: Option<&str>,
        order: &[OrderBy],
    ) -> Result<String, StoreError> {
        let names: Vec<String> = self.columns.iter().map(|c| quote(c.name)).collect();
        let mut sql = format!("SELECT {} FROM {}", names.join(", "), quote(self.name));
        if let Some(column) = filter {
            self.position(column)?;
            sql.push_str(&format!(" WHERE {} = $1", quote(column)));
        }
        if !order.is_empty() {
            let keys = order
                .iter()
                .map(|o| -> Result<String, StoreError> {
                    self.position(o.column)?;
                    Ok(format!(
                        "{} {}",
                        quote(o.column),
                        if o.descending { "DESC" } else { "ASC" }
                    ))
                })
                .collect::<Result<Vec<_>, _>>()?;
            sql.push_str(&format!(" ORDER BY {}", keys.join(", ")));
        }
        Ok(sql)
    }
}

/// Quote an identifier; `to` and friends are reserved words.
fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
