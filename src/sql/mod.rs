//! The narrow SQL surface the key-value engines run on.
//!
//! Callers own connections, transactions and pools; the engines only borrow a
//! connection for the duration of one operation.

#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod value;

pub use value::{Json, Row, SqlColumn, SqlValue};

use crate::error::SqlError;

/// Bind-parameter ceiling assumed when a backend does not report its own.
/// Matches SQLite's `SQLITE_MAX_VARIABLE_NUMBER` since 3.32.
pub const DEFAULT_MAX_BIND_PARAMETERS: usize = 32_766;

pub trait SqlConnection {
    /// Runs one statement, returning the affected row count.
    fn execute_update(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, SqlError>;

    /// Runs `sql` once per parameter row. The result has one affected row
    /// count per input row, in input order. An error aborts the remaining rows.
    fn execute_batch_update(
        &mut self,
        sql: &str,
        param_rows: &[Vec<SqlValue>],
    ) -> Result<Vec<u64>, SqlError>;

    fn execute_query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, SqlError>;

    fn execute_insert_returning_generated_key(
        &mut self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<SqlValue, SqlError>;

    /// Most parameters a single statement may bind. Batch lookups larger
    /// than this are split into several queries and their results merged.
    fn max_bind_parameters(&self) -> usize {
        DEFAULT_MAX_BIND_PARAMETERS
    }
}

impl<C: SqlConnection + ?Sized> SqlConnection for &mut C {
    fn execute_update(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, SqlError> {
        (**self).execute_update(sql, params)
    }

    fn execute_batch_update(
        &mut self,
        sql: &str,
        param_rows: &[Vec<SqlValue>],
    ) -> Result<Vec<u64>, SqlError> {
        (**self).execute_batch_update(sql, param_rows)
    }

    fn execute_query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, SqlError> {
        (**self).execute_query(sql, params)
    }

    fn execute_insert_returning_generated_key(
        &mut self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<SqlValue, SqlError> {
        (**self).execute_insert_returning_generated_key(sql, params)
    }

    fn max_bind_parameters(&self) -> usize {
        (**self).max_bind_parameters()
    }
}

/// Hands out connections to one database, typically a read replica.
pub trait ConnectionSource: Send + Sync {
    type Connection: SqlConnection;

    fn acquire(&self) -> Result<Self::Connection, SqlError>;

    /// Label used in log lines.
    fn describe(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }
}
