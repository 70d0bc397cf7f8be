use crate::error::{EncodeError, RowDecodeError};
use crate::sql::{SqlColumn, SqlValue};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Opaque revision token of a record.
///
/// Every successful write draws a fresh random token. Tokens only support
/// equality; two versions of one key carry no ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    pub const fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> i64 {
        self.0
    }

    /// A random token that differs from every version in `replacing`.
    pub fn generate(replacing: &[Version]) -> Self {
        Self::avoiding(rand::random::<i64>(), replacing)
    }

    fn avoiding(candidate: i64, replacing: &[Version]) -> Self {
        let mut raw = candidate;
        while replacing.iter().any(|v| v.0 == raw) {
            raw = raw.wrapping_add(1);
        }
        Self(raw)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl From<Version> for SqlValue {
    fn from(version: Version) -> Self {
        SqlValue::Integer(version.0)
    }
}

impl SqlColumn for Version {
    fn to_sql(&self) -> Result<SqlValue, EncodeError> {
        Ok(SqlValue::from(*self))
    }

    fn from_sql(value: &SqlValue) -> Result<Self, RowDecodeError> {
        i64::from_sql(value).map(Self)
    }
}

/// Current wall clock in microseconds since the Unix epoch.
pub fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_micros()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
