//! [`SqlConnection`] over rusqlite.

use super::{ConnectionSource, Row, SqlConnection, SqlValue};
use crate::error::SqlError;
use compact_str::CompactString;
use rusqlite::types::{ToSql, ToSqlOutput, Value, ValueRef};
use rusqlite::{Connection, ErrorCode, OpenFlags, Transaction, params_from_iter};
use std::path::{Path, PathBuf};

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Integer(v) | SqlValue::Timestamp(v) => ToSqlOutput::Owned(Value::Integer(*v)),
            SqlValue::Float(v) => ToSqlOutput::Owned(Value::Real(*v)),
            SqlValue::Boolean(v) => ToSqlOutput::Owned(Value::Integer(i64::from(*v))),
            SqlValue::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
            SqlValue::Blob(v) => ToSqlOutput::Borrowed(ValueRef::Blob(v)),
        })
    }
}

impl From<ValueRef<'_>> for SqlValue {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => SqlValue::Null,
            ValueRef::Integer(v) => SqlValue::Integer(v),
            ValueRef::Real(v) => SqlValue::Float(v),
            ValueRef::Text(v) => SqlValue::Text(CompactString::from(String::from_utf8_lossy(v))),
            ValueRef::Blob(v) => SqlValue::Blob(v.to_vec()),
        }
    }
}

impl From<rusqlite::Error> for SqlError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(ErrorCode::ConstraintViolation) => SqlError::ConstraintViolation(err.to_string()),
            Some(ErrorCode::CannotOpen) | Some(ErrorCode::DatabaseBusy) => {
                SqlError::Unavailable(err.to_string())
            }
            _ => SqlError::backend(err),
        }
    }
}

fn execute_update(conn: &Connection, sql: &str, params: &[SqlValue]) -> Result<u64, SqlError> {
    let mut stmt = conn.prepare_cached(sql)?;
    let affected = stmt.execute(params_from_iter(params.iter()))?;
    Ok(affected as u64)
}

fn execute_batch_update(
    conn: &Connection,
    sql: &str,
    param_rows: &[Vec<SqlValue>],
) -> Result<Vec<u64>, SqlError> {
    let mut stmt = conn.prepare_cached(sql)?;
    let mut counts = Vec::with_capacity(param_rows.len());
    for params in param_rows {
        counts.push(stmt.execute(params_from_iter(params.iter()))? as u64);
    }
    Ok(counts)
}

fn execute_query(conn: &Connection, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, SqlError> {
    let mut stmt = conn.prepare_cached(sql)?;
    let columns = stmt.column_count();
    let mut rows = stmt.query(params_from_iter(params.iter()))?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(columns);
        for idx in 0..columns {
            values.push(SqlValue::from(row.get_ref(idx)?));
        }
        out.push(Row::from_values(values));
    }
    Ok(out)
}

fn execute_insert_returning_generated_key(
    conn: &Connection,
    sql: &str,
    params: &[SqlValue],
) -> Result<SqlValue, SqlError> {
    execute_update(conn, sql, params)?;
    Ok(SqlValue::Integer(conn.last_insert_rowid()))
}

impl SqlConnection for Connection {
    fn execute_update(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, SqlError> {
        execute_update(self, sql, params)
    }

    fn execute_batch_update(
        &mut self,
        sql: &str,
        param_rows: &[Vec<SqlValue>],
    ) -> Result<Vec<u64>, SqlError> {
        execute_batch_update(self, sql, param_rows)
    }

    fn execute_query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, SqlError> {
        execute_query(self, sql, params)
    }

    fn execute_insert_returning_generated_key(
        &mut self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<SqlValue, SqlError> {
        execute_insert_returning_generated_key(self, sql, params)
    }
}

impl SqlConnection for Transaction<'_> {
    fn execute_update(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, SqlError> {
        execute_update(self, sql, params)
    }

    fn execute_batch_update(
        &mut self,
        sql: &str,
        param_rows: &[Vec<SqlValue>],
    ) -> Result<Vec<u64>, SqlError> {
        execute_batch_update(self, sql, param_rows)
    }

    fn execute_query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, SqlError> {
        execute_query(self, sql, params)
    }

    fn execute_insert_returning_generated_key(
        &mut self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<SqlValue, SqlError> {
        execute_insert_returning_generated_key(self, sql, params)
    }
}

/// Opens a fresh connection to a database file on every acquire.
#[derive(Debug, Clone)]
pub struct SqliteFileSource {
    path: PathBuf,
    read_only: bool,
}

impl SqliteFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            read_only: false,
        }
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConnectionSource for SqliteFileSource {
    type Connection = Connection;

    fn acquire(&self) -> Result<Connection, SqlError> {
        let flags = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX
        } else {
            OpenFlags::default()
        };
        Connection::open_with_flags(&self.path, flags)
            .map_err(|e| SqlError::Unavailable(format!("{}: {e}", self.path.display())))
    }

    fn describe(&self) -> String {
        format!("sqlite:{}", self.path.display())
    }
}
