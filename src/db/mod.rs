use crate::errors::{MergeError, MergeResult};
use crate::query::Query;
use rusqlite::types::Value;
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Minimal query surface the merge engine needs from a relational store.
pub trait Store {
    fn execute_query(&self, query: &Query) -> MergeResult<Vec<Vec<Value>>>;

    fn scalar(&self, query: &Query) -> MergeResult<i64>;
}

/// Column names plus raw rows of a `SELECT`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl RowSet {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }
}

#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl Database {
    pub fn new(path: &Path) -> MergeResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        tracing::debug!(path = %path.display(), "opened sqlite store");

        Ok(Self {
            conn: Mutex::new(conn),
            db_path: Some(path.to_path_buf()),
        })
    }

    pub fn open_in_memory() -> MergeResult<Self> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            db_path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    pub fn execute_batch(&self, sql: &str) -> MergeResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(sql)?;
        Ok(())
    }

    pub fn select(&self, query: &Query) -> MergeResult<RowSet> {
        tracing::debug!(sql = %query.sql, params = query.params.len(), "executing select");
        let conn = self.lock()?;
        let mut statement = conn.prepare(&query.sql)?;
        let columns: Vec<String> = statement
            .column_names()
            .into_iter()
            .map(ToString::to_string)
            .collect();
        let width = columns.len();

        let mut rows = statement.query(rusqlite::params_from_iter(query.params.iter()))?;
        let mut result = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(width);
            for index in 0..width {
                values.push(row.get::<_, Value>(index)?);
            }
            result.push(values);
        }

        Ok(RowSet {
            columns,
            rows: result,
        })
    }

    fn lock(&self) -> MergeResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| MergeError::Internal("database mutex poisoned".to_string()))
    }
}

impl Store for Database {
    fn execute_query(&self, query: &Query) -> MergeResult<Vec<Vec<Value>>> {
        Ok(self.select(query)?.rows)
    }

    fn scalar(&self, query: &Query) -> MergeResult<i64> {
        tracing::debug!(sql = %query.sql, "executing scalar");
        let conn = self.lock()?;
        let value = conn.query_row(
            &query.sql,
            rusqlite::params_from_iter(query.params.iter()),
            |row| row.get::<_, i64>(0),
        )?;
        Ok(value)
    }
}
