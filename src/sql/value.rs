use crate::error::{EncodeError, RowDecodeError};
use compact_str::CompactString;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A bound parameter or a column read back from the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Text(CompactString),
    Blob(Vec<u8>),
    /// Microseconds since the Unix epoch.
    Timestamp(i64),
}

impl SqlValue {
    pub fn kind(&self) -> &'static str {
        match self {
            SqlValue::Null => "Null",
            SqlValue::Integer(_) => "Integer",
            SqlValue::Float(_) => "Float",
            SqlValue::Boolean(_) => "Boolean",
            SqlValue::Text(_) => "Text",
            SqlValue::Blob(_) => "Blob",
            SqlValue::Timestamp(_) => "Timestamp",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Row {
    pub values: Vec<SqlValue>,
}

impl Row {
    pub fn from_values(values: Vec<SqlValue>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Decodes the column at `index`; `column` only labels errors.
    pub fn get<T: SqlColumn>(&self, index: usize, column: &str) -> Result<T, RowDecodeError> {
        match self.values.get(index) {
            Some(value) => T::from_sql(value).map_err(|err| label(err, column)),
            None => Err(RowDecodeError::MissingColumn {
                column: column.to_string(),
                index,
            }),
        }
    }
}

fn label(err: RowDecodeError, column: &str) -> RowDecodeError {
    match err {
        RowDecodeError::TypeMismatch {
            expected, actual, ..
        } => RowDecodeError::TypeMismatch {
            column: column.to_string(),
            expected,
            actual,
        },
        other => other,
    }
}

fn mismatch(expected: &'static str, value: &SqlValue) -> RowDecodeError {
    RowDecodeError::TypeMismatch {
        column: String::new(),
        expected,
        actual: value.kind(),
    }
}

/// Binds a Rust value as a SQL parameter and decodes it back from a column.
/// Keys and values of a table are both carried through this trait.
pub trait SqlColumn: Sized {
    /// Fails when the value has no SQL representation; the write is then
    /// never sent.
    fn to_sql(&self) -> Result<SqlValue, EncodeError>;
    fn from_sql(value: &SqlValue) -> Result<Self, RowDecodeError>;
}

impl SqlColumn for i64 {
    fn to_sql(&self) -> Result<SqlValue, EncodeError> {
        Ok(SqlValue::Integer(*self))
    }

    fn from_sql(value: &SqlValue) -> Result<Self, RowDecodeError> {
        match value {
            SqlValue::Integer(v) | SqlValue::Timestamp(v) => Ok(*v),
            other => Err(mismatch("Integer", other)),
        }
    }
}

impl SqlColumn for i32 {
    fn to_sql(&self) -> Result<SqlValue, EncodeError> {
        Ok(SqlValue::Integer(i64::from(*self)))
    }

    fn from_sql(value: &SqlValue) -> Result<Self, RowDecodeError> {
        let wide = i64::from_sql(value)?;
        i32::try_from(wide).map_err(|_| RowDecodeError::Custom {
            message: format!("integer {wide} out of range for i32"),
        })
    }
}

impl SqlColumn for u32 {
    fn to_sql(&self) -> Result<SqlValue, EncodeError> {
        Ok(SqlValue::Integer(i64::from(*self)))
    }

    fn from_sql(value: &SqlValue) -> Result<Self, RowDecodeError> {
        let wide = i64::from_sql(value)?;
        u32::try_from(wide).map_err(|_| RowDecodeError::Custom {
            message: format!("integer {wide} out of range for u32"),
        })
    }
}

impl SqlColumn for bool {
    fn to_sql(&self) -> Result<SqlValue, EncodeError> {
        Ok(SqlValue::Boolean(*self))
    }

    fn from_sql(value: &SqlValue) -> Result<Self, RowDecodeError> {
        match value {
            SqlValue::Boolean(v) => Ok(*v),
            SqlValue::Integer(v) => Ok(*v != 0),
            other => Err(mismatch("Boolean", other)),
        }
    }
}

impl SqlColumn for f64 {
    fn to_sql(&self) -> Result<SqlValue, EncodeError> {
        Ok(SqlValue::Float(*self))
    }

    fn from_sql(value: &SqlValue) -> Result<Self, RowDecodeError> {
        match value {
            SqlValue::Float(v) => Ok(*v),
            SqlValue::Integer(v) => Ok(*v as f64),
            other => Err(mismatch("Float", other)),
        }
    }
}

impl SqlColumn for String {
    fn to_sql(&self) -> Result<SqlValue, EncodeError> {
        Ok(SqlValue::Text(CompactString::from(self.as_str())))
    }

    fn from_sql(value: &SqlValue) -> Result<Self, RowDecodeError> {
        match value {
            SqlValue::Text(v) => Ok(v.to_string()),
            other => Err(mismatch("Text", other)),
        }
    }
}

impl SqlColumn for CompactString {
    fn to_sql(&self) -> Result<SqlValue, EncodeError> {
        Ok(SqlValue::Text(self.clone()))
    }

    fn from_sql(value: &SqlValue) -> Result<Self, RowDecodeError> {
        match value {
            SqlValue::Text(v) => Ok(v.clone()),
            other => Err(mismatch("Text", other)),
        }
    }
}

impl SqlColumn for Vec<u8> {
    fn to_sql(&self) -> Result<SqlValue, EncodeError> {
        Ok(SqlValue::Blob(self.clone()))
    }

    fn from_sql(value: &SqlValue) -> Result<Self, RowDecodeError> {
        match value {
            SqlValue::Blob(v) => Ok(v.clone()),
            SqlValue::Text(v) => Ok(v.as_bytes().to_vec()),
            other => Err(mismatch("Blob", other)),
        }
    }
}

/// Stores any serde type as JSON text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Json<T>(pub T);

impl<T> Json<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T: Serialize + DeserializeOwned> SqlColumn for Json<T> {
    fn to_sql(&self) -> Result<SqlValue, EncodeError> {
        serde_json::to_string(&self.0)
            .map(|text| SqlValue::Text(text.into()))
            .map_err(|e| EncodeError::new::<T>(format!("json: {e}")))
    }

    fn from_sql(value: &SqlValue) -> Result<Self, RowDecodeError> {
        let text = match value {
            SqlValue::Text(v) => v.as_str(),
            other => return Err(mismatch("Text", other)),
        };
        serde_json::from_str(text)
            .map(Json)
            .map_err(|e| RowDecodeError::Custom {
                message: format!("invalid json column: {e}"),
            })
    }
}
