use crate::descriptor::TableDescriptor;
use crate::error::KvError;

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS $table (\
$key $keytype PRIMARY KEY, \
$value $valuetype NOT NULL, \
$version BIGINT NOT NULL, \
$created BIGINT NOT NULL, \
$updated BIGINT NOT NULL)";

pub const DEFAULT_KEY_TYPE: &str = "TEXT";
pub const DEFAULT_VALUE_TYPE: &str = "TEXT";

/// DDL for a table laid out the way the engines expect. Timestamps hold epoch
/// microseconds.
pub fn create_table_sql(
    descriptor: &TableDescriptor,
    key_type: &str,
    value_type: &str,
) -> Result<String, KvError> {
    check_column_type("key", key_type)?;
    check_column_type("value", value_type)?;
    let template = descriptor.prepare(CREATE_TABLE)?;
    let sql = template.render_with(
        |name| match name {
            "keytype" => Some(key_type),
            "valuetype" => Some(value_type),
            _ => None,
        },
        true,
    )?;
    Ok(sql)
}

fn check_column_type(role: &str, ty: &str) -> Result<(), KvError> {
    let ok = !ty.trim().is_empty()
        && ty
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '(' | ')' | ','));
    if ok {
        Ok(())
    } else {
        Err(KvError::invalid_config(format!(
            "{role} column type {ty:?} is not a plain SQL type name"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::{DEFAULT_KEY_TYPE, create_table_sql};
    use crate::config::TableConfig;
    use crate::descriptor::TableDescriptor;

    #[test]
    fn renders_primary_key_and_not_null_columns() {
        let descriptor = TableDescriptor::new(
            TableConfig::new("carts")
                .with_key_column("cart_id")
                .with_value_column("payload"),
        )
        .expect("descriptor");
        let sql = create_table_sql(&descriptor, "BIGINT", "VARCHAR(255)").expect("ddl");
        assert_eq!(
            sql,
            "CREATE TABLE IF NOT EXISTS carts (cart_id BIGINT PRIMARY KEY, \
             payload VARCHAR(255) NOT NULL, version BIGINT NOT NULL, \
             created_at BIGINT NOT NULL, updated_at BIGINT NOT NULL)"
        );
    }

    #[test]
    fn rejects_types_that_smuggle_sql() {
        let descriptor = TableDescriptor::new(TableConfig::default()).expect("descriptor");
        let err = create_table_sql(&descriptor, DEFAULT_KEY_TYPE, "TEXT); DROP TABLE kv; --")
            .expect_err("injected type");
        assert_eq!(err.code_str(), "invalid_config");
        assert!(create_table_sql(&descriptor, "", "TEXT").is_err());
    }
}
