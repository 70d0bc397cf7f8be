use crate::error::KvError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Physical names backing one versioned key-value table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    pub table: String,
    pub key_column: String,
    pub value_column: String,
    pub version_column: String,
    pub created_column: String,
    pub updated_column: String,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            table: "kv".into(),
            key_column: "key".into(),
            value_column: "value".into(),
            version_column: "version".into(),
            created_column: "created_at".into(),
            updated_column: "updated_at".into(),
        }
    }
}

impl TableConfig {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    pub fn with_key_column(mut self, name: impl Into<String>) -> Self {
        self.key_column = name.into();
        self
    }

    pub fn with_value_column(mut self, name: impl Into<String>) -> Self {
        self.value_column = name.into();
        self
    }

    pub fn with_version_column(mut self, name: impl Into<String>) -> Self {
        self.version_column = name.into();
        self
    }

    pub fn with_timestamp_columns(
        mut self,
        created: impl Into<String>,
        updated: impl Into<String>,
    ) -> Self {
        self.created_column = created.into();
        self.updated_column = updated.into();
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self, KvError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| KvError::invalid_config(format!("table config json: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, KvError> {
        let raw = fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&raw)
    }

    /// Names end up verbatim in SQL text, so they are restricted to plain
    /// identifiers. The table name may be schema-qualified (`schema.table`).
    pub fn validate(&self) -> Result<(), KvError> {
        for part in self.table.split('.') {
            check_identifier("table", part)?;
        }
        let columns = self.columns();
        for (role, name) in columns {
            check_identifier(role, name)?;
        }
        for (i, (role_a, a)) in columns.iter().enumerate() {
            for (role_b, b) in &columns[i + 1..] {
                if a.eq_ignore_ascii_case(b) {
                    return Err(KvError::invalid_config(format!(
                        "{role_a} and {role_b} both use column '{a}'"
                    )));
                }
            }
        }
        Ok(())
    }

    fn columns(&self) -> [(&'static str, &str); 5] {
        [
            ("key_column", self.key_column.as_str()),
            ("value_column", self.value_column.as_str()),
            ("version_column", self.version_column.as_str()),
            ("created_column", self.created_column.as_str()),
            ("updated_column", self.updated_column.as_str()),
        ]
    }
}

fn check_identifier(role: &str, name: &str) -> Result<(), KvError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(KvError::invalid_config(format!(
            "{role} '{name}' is not a valid SQL identifier"
        )))
    }
}
