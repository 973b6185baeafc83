//! SQLite access for the planning database.
//!
//! A `Store` owns exactly one connection; dropping it closes the connection, so
//! every request-scoped use releases the file on all exit paths. Table names are
//! never taken from callers verbatim: every scan is checked against the known
//! reference and fact tables first.

use std::path::Path;
use std::time::Duration;

use log::{debug, warn};
use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, Value, ValueRef};
use rusqlite::{params_from_iter, Connection};

use crate::config::PlanningConfig;
use crate::error::{PlanningError, Result};
use crate::schema::{is_known_table, CellValue, FactKind, Record, Table};

const CREATE_TABLES: &str = include_str!("sql/create_tables.sql");

impl ToSql for CellValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            CellValue::Null => ToSqlOutput::Owned(Value::Null),
            CellValue::Int(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            CellValue::Float(f) => ToSqlOutput::Owned(Value::Real(*f)),
            CellValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

impl FromSql for CellValue {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(match value {
            ValueRef::Null => CellValue::Null,
            ValueRef::Integer(i) => CellValue::Int(i),
            ValueRef::Real(f) => CellValue::Float(f),
            ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
                CellValue::Text(String::from_utf8_lossy(bytes).into_owned())
            }
        })
    }
}

pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) the database named by the config and apply the schema.
    pub fn open(config: &PlanningConfig) -> Result<Self> {
        config.validate()?;
        let path = config.database_path.as_path();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(PlanningError::CreateDir)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        let store = Self { conn };
        store.initialize()?;
        debug!("Opened planning database at {}", path.display());
        Ok(store)
    }

    /// Open a database at an explicit path with default settings.
    pub fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(&PlanningConfig::with_database(path.as_ref()))
    }

    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.initialize()?;
        Ok(store)
    }

    /// Create any missing tables and turn on foreign key enforcement.
    /// Safe to run against an existing database.
    pub fn initialize(&self) -> Result<()> {
        self.conn.execute_batch(CREATE_TABLES)?;
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(())
    }

    /// Borrow the underlying connection for ad-hoc queries.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run `f` inside a write transaction. Commits on Ok, rolls back on Err.
    ///
    /// `BEGIN IMMEDIATE` takes SQLite's write lock up front, so two uploads that
    /// both need a new reference name are serialized instead of both inserting it.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Self) -> Result<T>,
    {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        match f(self) {
            Ok(value) => match self.conn.execute_batch("COMMIT") {
                Ok(()) => Ok(value),
                Err(e) => {
                    if let Err(rollback) = self.conn.execute_batch("ROLLBACK") {
                        warn!("Rollback after failed commit also failed: {}", rollback);
                    }
                    Err(e.into())
                }
            },
            Err(e) => {
                if let Err(rollback) = self.conn.execute_batch("ROLLBACK") {
                    warn!("Rollback after failed transaction also failed: {}", rollback);
                }
                Err(e)
            }
        }
    }

    /// `SELECT * FROM <table>` for one of the known tables.
    pub fn select_all(&self, table: &str) -> Result<Table> {
        if !is_known_table(table) {
            return Err(PlanningError::UnknownTable(table.to_string()));
        }

        let mut stmt = self.conn.prepare(&format!("SELECT * FROM {}", table))?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        let mut rows = stmt.query([])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = Record::new();
            for (idx, column) in columns.iter().enumerate() {
                record.insert(column.clone(), row.get::<_, CellValue>(idx)?);
            }
            records.push(record);
        }

        Ok(Table {
            columns,
            rows: records,
        })
    }

    /// Remove every fact of `kind` recorded for `year`. Returns rows deleted.
    pub fn delete_year(&self, kind: FactKind, year_column: &str, year: i64) -> Result<usize> {
        if year_column != "fiscal_year" && year_column != "cap_year" {
            return Err(PlanningError::UnknownColumn {
                table: kind.table().to_string(),
                column: year_column.to_string(),
            });
        }
        let sql = format!("DELETE FROM {} WHERE {} = ?1", kind.table(), year_column);
        Ok(self.conn.execute(&sql, params_from_iter([year]))?)
    }

    pub fn row_count(&self, table: &str) -> Result<usize> {
        if !is_known_table(table) {
            return Err(PlanningError::UnknownTable(table.to_string()));
        }
        let count: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                row.get(0)
            })?;
        Ok(count as usize)
    }
}
