pub mod predicates;
pub mod template;

use crate::config::TableConfig;
use crate::error::{KvError, TemplateError};
use template::Template;

/// Immutable mapping from the logical key-value roles to physical SQL names.
///
/// Templates reference the names as `$table`, `$key`, `$value`, `$version`,
/// `$created` and `$updated`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescriptor {
    table: String,
    key_column: String,
    value_column: String,
    version_column: String,
    created_column: String,
    updated_column: String,
}

impl TableDescriptor {
    pub fn new(config: TableConfig) -> Result<Self, KvError> {
        config.validate()?;
        Ok(Self {
            table: config.table,
            key_column: config.key_column,
            value_column: config.value_column,
            version_column: config.version_column,
            created_column: config.created_column,
            updated_column: config.updated_column,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn key_column(&self) -> &str {
        &self.key_column
    }

    pub fn value_column(&self) -> &str {
        &self.value_column
    }

    pub fn version_column(&self) -> &str {
        &self.version_column
    }

    pub fn created_column(&self) -> &str {
        &self.created_column
    }

    pub fn updated_column(&self) -> &str {
        &self.updated_column
    }

    pub fn lookup(&self, name: &str) -> Option<&str> {
        match name {
            "table" => Some(&self.table),
            "key" => Some(&self.key_column),
            "value" => Some(&self.value_column),
            "version" => Some(&self.version_column),
            "created" => Some(&self.created_column),
            "updated" => Some(&self.updated_column),
            _ => None,
        }
    }

    /// Substitutes the descriptor's names into `template`. With
    /// `throw_on_missing_placeholder` unset, placeholders the descriptor does
    /// not know are left as `$name` for a later pass.
    pub fn render(
        &self,
        template: &str,
        throw_on_missing_placeholder: bool,
    ) -> Result<String, TemplateError> {
        Template::parse(template)?
            .render_with(|name| self.lookup(name), throw_on_missing_placeholder)
    }

    /// First pass of a two-phase render: descriptor names are filled in and
    /// the remaining placeholders are kept as tokens.
    pub fn prepare(&self, template: &str) -> Result<Template, TemplateError> {
        Template::parse(&self.render(template, false)?)
    }

    pub fn to_config(&self) -> TableConfig {
        TableConfig {
            table: self.table.clone(),
            key_column: self.key_column.clone(),
            value_column: self.value_column.clone(),
            version_column: self.version_column.clone(),
            created_column: self.created_column.clone(),
            updated_column: self.updated_column.clone(),
        }
    }
}

impl TryFrom<TableConfig> for TableDescriptor {
    type Error = KvError;

    fn try_from(config: TableConfig) -> Result<Self, Self::Error> {
        Self::new(config)
    }
}

#[cfg(test)]
mod tests {
    use super::TableDescriptor;
    use crate::config::TableConfig;
    use crate::error::TemplateError;

    fn descriptor() -> TableDescriptor {
        TableDescriptor::new(
            TableConfig::new("sessions")
                .with_key_column("sid")
                .with_value_column("body")
                .with_version_column("rev")
                .with_timestamp_columns("born", "touched"),
        )
        .expect("descriptor")
    }

    #[test]
    fn renders_every_role() {
        let sql = descriptor()
            .render(
                "INSERT INTO $table ($key, $value, $version, $created, $updated)",
                true,
            )
            .expect("render");
        assert_eq!(sql, "INSERT INTO sessions (sid, body, rev, born, touched)");
    }

    #[test]
    fn strict_render_reports_unknown_placeholder() {
        let err = descriptor()
            .render("SELECT $value FROM $table WHERE $pairs", true)
            .expect_err("unknown placeholder");
        assert_eq!(
            err,
            TemplateError::MissingPlaceholder {
                name: "pairs".into()
            }
        );
    }

    #[test]
    fn prepare_keeps_manufactured_placeholders() {
        let template = descriptor()
            .prepare("SELECT $key, $value FROM $table WHERE $key IN ($keys)")
            .expect("prepare");
        assert_eq!(template.placeholders().collect::<Vec<_>>(), vec!["keys"]);
        let sql = template
            .render_with(|name| (name == "keys").then_some("?, ?, ?"), true)
            .expect("second pass");
        assert_eq!(sql, "SELECT sid, body FROM sessions WHERE sid IN (?, ?, ?)");
    }

    #[test]
    fn invalid_config_is_rejected() {
        let err = TableDescriptor::try_from(TableConfig::new("bad name")).expect_err("invalid");
        assert_eq!(err.code_str(), "invalid_config");
        assert_eq!(descriptor().to_config().table, "sessions");
    }
}
