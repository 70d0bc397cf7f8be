use crate::descriptor::TableDescriptor;
use crate::descriptor::template::Template;
use crate::error::TemplateError;

const INSERT: &str =
    "INSERT INTO $table ($key, $value, $version, $created, $updated) VALUES (?, ?, ?, ?, ?)";
const UPDATE: &str = "UPDATE $table SET $value = ?, $version = ?, $updated = ? WHERE $key = ?";
const SWAP: &str =
    "UPDATE $table SET $value = ?, $version = ?, $updated = ? WHERE $key = ? AND $version = ?";
const TOUCH: &str = "UPDATE $table SET $version = ?, $updated = ? WHERE $key = ?";
const DELETE: &str = "DELETE FROM $table WHERE $key = ?";
const REMOVE: &str = "DELETE FROM $table WHERE $key = ? AND $version = ?";
const CONTAINS: &str = "SELECT $version FROM $table WHERE $key = ?";
const CONTAINS_VERSION: &str = "SELECT $key FROM $table WHERE $key = ? AND $version = ?";
const READ: &str = "SELECT $value FROM $table WHERE $key = ?";
const READ_FOR_VERSION: &str = "SELECT $value FROM $table WHERE $key = ? AND $version = ?";
const READ_ALL: &str = "SELECT $value, $version FROM $table WHERE $key = ?";
const READ_RECORD: &str =
    "SELECT $value, $version, $created, $updated FROM $table WHERE $key = ?";

const BATCH_CONTAINS: &str = "SELECT $key, $version FROM $table WHERE $key IN ($keys)";
const BATCH_CONTAINS_VERSION: &str = "SELECT $key FROM $table WHERE $pairs";
const BATCH_READ: &str = "SELECT $key, $value FROM $table WHERE $key IN ($keys)";
const BATCH_READ_FOR_VERSION: &str = "SELECT $key, $value FROM $table WHERE $pairs";
const BATCH_READ_ALL: &str = "SELECT $key, $value, $version FROM $table WHERE $key IN ($keys)";
const BATCH_READ_RECORD: &str =
    "SELECT $key, $value, $version, $created, $updated FROM $table WHERE $key IN ($keys)";

/// Placeholder filled with the `IN` list of a batch lookup.
pub const KEYS_PLACEHOLDER: &str = "keys";
/// Placeholder filled with the `(key = ? AND version = ?) OR ...` chain.
pub const PAIRS_PLACEHOLDER: &str = "pairs";

/// SQL text for one table. Single-row statements are final; batch lookups
/// still carry `$keys` or `$pairs` until the batch size is known.
#[derive(Debug, Clone)]
pub struct Statements {
    pub insert: String,
    pub update: String,
    pub swap: String,
    pub touch: String,
    pub delete: String,
    pub remove: String,
    pub contains: String,
    pub contains_version: String,
    pub read: String,
    pub read_for_version: String,
    pub read_all: String,
    pub read_record: String,
    pub batch_contains: Template,
    pub batch_contains_version: Template,
    pub batch_read: Template,
    pub batch_read_for_version: Template,
    pub batch_read_all: Template,
    pub batch_read_record: Template,
}

impl Statements {
    pub fn render(descriptor: &TableDescriptor) -> Result<Self, TemplateError> {
        let single = |template: &str| descriptor.render(template, true);
        Ok(Self {
            insert: single(INSERT)?,
            update: single(UPDATE)?,
            swap: single(SWAP)?,
            touch: single(TOUCH)?,
            delete: single(DELETE)?,
            remove: single(REMOVE)?,
            contains: single(CONTAINS)?,
            contains_version: single(CONTAINS_VERSION)?,
            read: single(READ)?,
            read_for_version: single(READ_FOR_VERSION)?,
            read_all: single(READ_ALL)?,
            read_record: single(READ_RECORD)?,
            batch_contains: descriptor.prepare(BATCH_CONTAINS)?,
            batch_contains_version: descriptor.prepare(BATCH_CONTAINS_VERSION)?,
            batch_read: descriptor.prepare(BATCH_READ)?,
            batch_read_for_version: descriptor.prepare(BATCH_READ_FOR_VERSION)?,
            batch_read_all: descriptor.prepare(BATCH_READ_ALL)?,
            batch_read_record: descriptor.prepare(BATCH_READ_RECORD)?,
        })
    }
}

/// Second render pass for a batch lookup.
pub fn complete(template: &Template, placeholder: &str, text: &str) -> Result<String, TemplateError> {
    template.render_with(|name| (name == placeholder).then_some(text), true)
}

#[cfg(test)]
mod tests {
    use super::{KEYS_PLACEHOLDER, PAIRS_PLACEHOLDER, Statements, complete};
    use crate::config::TableConfig;
    use crate::descriptor::TableDescriptor;
    use crate::descriptor::predicates::PredicateCache;

    fn statements() -> Statements {
        let descriptor = TableDescriptor::new(
            TableConfig::new("docs")
                .with_key_column("id")
                .with_value_column("body")
                .with_version_column("rev"),
        )
        .expect("descriptor");
        Statements::render(&descriptor).expect("render")
    }

    #[test]
    fn single_row_statements_are_final() {
        let s = statements();
        assert_eq!(
            s.insert,
            "INSERT INTO docs (id, body, rev, created_at, updated_at) VALUES (?, ?, ?, ?, ?)"
        );
        assert_eq!(
            s.swap,
            "UPDATE docs SET body = ?, rev = ?, updated_at = ? WHERE id = ? AND rev = ?"
        );
        assert_eq!(s.remove, "DELETE FROM docs WHERE id = ? AND rev = ?");
        assert!(!s.read_record.contains('$'));
    }

    #[test]
    fn batch_statements_complete_per_size() {
        let s = statements();
        let cache = PredicateCache::new("id", "rev");
        assert_eq!(
            complete(&s.batch_read, KEYS_PLACEHOLDER, &cache.in_list(3)).expect("in list"),
            "SELECT id, body FROM docs WHERE id IN (?, ?, ?)"
        );
        assert_eq!(
            complete(
                &s.batch_read_for_version,
                PAIRS_PLACEHOLDER,
                &cache.key_version_chain(2)
            )
            .expect("pairs"),
            "SELECT id, body FROM docs WHERE ((id = ? AND rev = ?) OR (id = ? AND rev = ?))"
        );
        assert!(complete(&s.batch_read, PAIRS_PLACEHOLDER, "x").is_err());
    }
}
