use thiserror::Error;

/// Error reported by a [`crate::sql::SqlConnection`] or
/// [`crate::sql::ConnectionSource`] implementation.
#[derive(Debug, Error)]
pub enum SqlError {
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
    #[error("connection unavailable: {0}")]
    Unavailable(String),
    #[error("sql backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl SqlError {
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        SqlError::Backend(Box::new(err))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("template ends with a dangling escape character")]
    DanglingEscape,
    #[error("template ends with a dangling placeholder marker")]
    DanglingMarker,
    #[error("no value for placeholder '${name}'")]
    MissingPlaceholder { name: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowDecodeError {
    #[error("missing column '{column}' at index {index}")]
    MissingColumn { column: String, index: usize },
    #[error("column '{column}' type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        column: String,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("{message}")]
    Custom { message: String },
}

/// A key or value that could not be turned into a bind parameter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot encode {type_name}: {message}")]
pub struct EncodeError {
    pub type_name: &'static str,
    pub message: String,
}

impl EncodeError {
    pub fn new<T: ?Sized>(message: impl Into<String>) -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvErrorCode {
    Io,
    InvalidConfig,
    Template,
    ConstraintViolation,
    Unavailable,
    Backend,
    Encode,
    Decode,
    BatchOutcomeMismatch,
}

impl KvErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            KvErrorCode::Io => "io",
            KvErrorCode::InvalidConfig => "invalid_config",
            KvErrorCode::Template => "template",
            KvErrorCode::ConstraintViolation => "constraint_violation",
            KvErrorCode::Unavailable => "unavailable",
            KvErrorCode::Backend => "backend",
            KvErrorCode::Encode => "encode",
            KvErrorCode::Decode => "decode",
            KvErrorCode::BatchOutcomeMismatch => "batch_outcome_mismatch",
        }
    }
}

#[derive(Debug, Error)]
pub enum KvError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {message}")]
    InvalidConfig { message: String },
    #[error("template error: {0}")]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Sql(#[from] SqlError),
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),
    #[error("decode error: {0}")]
    Decode(#[from] RowDecodeError),
    #[error("batch returned {actual} row outcomes for {expected} parameter rows")]
    BatchOutcomeMismatch { expected: usize, actual: usize },
}

impl KvError {
    pub(crate) fn invalid_config(message: impl Into<String>) -> Self {
        KvError::InvalidConfig {
            message: message.into(),
        }
    }

    pub fn code(&self) -> KvErrorCode {
        match self {
            KvError::Io(_) => KvErrorCode::Io,
            KvError::InvalidConfig { .. } => KvErrorCode::InvalidConfig,
            KvError::Template(_) => KvErrorCode::Template,
            KvError::Sql(SqlError::ConstraintViolation(_)) => KvErrorCode::ConstraintViolation,
            KvError::Sql(SqlError::Unavailable(_)) => KvErrorCode::Unavailable,
            KvError::Sql(SqlError::Backend(_)) => KvErrorCode::Backend,
            KvError::Encode(_) => KvErrorCode::Encode,
            KvError::Decode(_) => KvErrorCode::Decode,
            KvError::BatchOutcomeMismatch { .. } => KvErrorCode::BatchOutcomeMismatch,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }

    /// True for duplicate-key inserts and any other constraint the table enforces.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, KvError::Sql(SqlError::ConstraintViolation(_)))
    }
}
