//! Versioned key-value storage over a single relational table.
//!
//! Every write stamps the row with a fresh random [`Version`]; conditional
//! writes (`swap`, `remove` and their batch forms) only apply when the row
//! still holds the version the caller read. The engines borrow a caller-owned
//! [`SqlConnection`] per operation and never manage transactions themselves.

pub mod config;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod record;
pub mod replica;
pub mod schema;
pub mod sql;
pub mod statements;
pub mod version;

pub use config::TableConfig;
pub use descriptor::TableDescriptor;
pub use engine::{KvRead, KvReader, KvTable, KvWriter, TableKey};
pub use error::{EncodeError, KvError, KvErrorCode, RowDecodeError, SqlError, TemplateError};
pub use record::{BatchOutcome, KeyValueVersion, KeyVersion, Record, ValueVersion};
pub use replica::ReplicatedReader;
pub use sql::{ConnectionSource, Json, Row, SqlColumn, SqlConnection, SqlValue};
#[cfg(feature = "sqlite")]
pub use sql::sqlite::SqliteFileSource;
pub use version::Version;
