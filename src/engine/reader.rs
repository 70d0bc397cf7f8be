use super::{KvRead, TableContext, TableKey, key_params, pair_params};
use crate::descriptor::template::Template;
use crate::error::KvError;
use crate::record::{KeyVersion, Record, ValueVersion};
use crate::sql::{Row, SqlColumn, SqlConnection, SqlValue};
use crate::statements::{KEYS_PLACEHOLDER, PAIRS_PLACEHOLDER, complete};
use crate::version::Version;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

/// Point and batch lookups against one table.
pub struct KvReader<K, V> {
    ctx: Arc<TableContext>,
    _types: PhantomData<fn() -> (K, V)>,
}

impl<K, V> Clone for KvReader<K, V> {
    fn clone(&self) -> Self {
        Self {
            ctx: Arc::clone(&self.ctx),
            _types: PhantomData,
        }
    }
}

impl<K: TableKey, V: SqlColumn> KvReader<K, V> {
    pub(crate) fn from_context(ctx: Arc<TableContext>) -> Self {
        Self {
            ctx,
            _types: PhantomData,
        }
    }

    pub fn table(&self) -> &str {
        self.ctx.descriptor.table()
    }

    fn single<C>(&self, conn: &mut C, sql: &str, params: &[SqlValue]) -> Result<Option<Row>, KvError>
    where
        C: SqlConnection + ?Sized,
    {
        Ok(conn.execute_query(sql, params)?.into_iter().next())
    }

    /// Runs `template` once per chunk of keys that fits the connection's
    /// bind limit and concatenates the rows.
    fn by_keys<C>(&self, conn: &mut C, template: &Template, keys: &[K]) -> Result<Vec<Row>, KvError>
    where
        C: SqlConnection + ?Sized,
    {
        let chunk = conn.max_bind_parameters().max(1);
        let mut rows = Vec::new();
        for keys in keys.chunks(chunk) {
            let sql = complete(
                template,
                KEYS_PLACEHOLDER,
                &self.ctx.predicates.in_list(keys.len()),
            )?;
            rows.extend(conn.execute_query(&sql, &key_params(keys)?)?);
        }
        Ok(rows)
    }

    fn by_pairs<C>(
        &self,
        conn: &mut C,
        template: &Template,
        pairs: &[KeyVersion<K>],
    ) -> Result<Vec<Row>, KvError>
    where
        C: SqlConnection + ?Sized,
    {
        // Two parameters per pair.
        let chunk = (conn.max_bind_parameters() / 2).max(1);
        let mut rows = Vec::new();
        for pairs in pairs.chunks(chunk) {
            let sql = complete(
                template,
                PAIRS_PLACEHOLDER,
                &self.ctx.predicates.key_version_chain(pairs.len()),
            )?;
            rows.extend(conn.execute_query(&sql, &pair_params(pairs)?)?);
        }
        Ok(rows)
    }

    fn key_at(&self, row: &Row) -> Result<K, KvError> {
        Ok(row.get(0, self.ctx.descriptor.key_column())?)
    }

    fn value_at(&self, row: &Row, index: usize) -> Result<V, KvError> {
        Ok(row.get(index, self.ctx.descriptor.value_column())?)
    }

    fn version_at(&self, row: &Row, index: usize) -> Result<Version, KvError> {
        Ok(row.get(index, self.ctx.descriptor.version_column())?)
    }

    fn record_at(&self, row: &Row, offset: usize) -> Result<Record<V>, KvError> {
        let d = &self.ctx.descriptor;
        Ok(Record {
            value: self.value_at(row, offset)?,
            version: self.version_at(row, offset + 1)?,
            created_at: row.get(offset + 2, d.created_column())?,
            updated_at: row.get(offset + 3, d.updated_column())?,
        })
    }
}

impl<K: TableKey, V: SqlColumn> KvRead<K, V> for KvReader<K, V> {
    fn contains<C>(&self, conn: &mut C, key: &K) -> Result<Option<Version>, KvError>
    where
        C: SqlConnection + ?Sized,
    {
        self.single(conn, &self.ctx.statements.contains, &[key.to_sql()?])?
            .map(|row| self.version_at(&row, 0))
            .transpose()
    }

    fn contains_version<C>(&self, conn: &mut C, key: &K, version: Version) -> Result<bool, KvError>
    where
        C: SqlConnection + ?Sized,
    {
        let row = self.single(
            conn,
            &self.ctx.statements.contains_version,
            &[key.to_sql()?, SqlValue::from(version)],
        )?;
        Ok(row.is_some())
    }

    fn read<C>(&self, conn: &mut C, key: &K) -> Result<Option<V>, KvError>
    where
        C: SqlConnection + ?Sized,
    {
        self.single(conn, &self.ctx.statements.read, &[key.to_sql()?])?
            .map(|row| self.value_at(&row, 0))
            .transpose()
    }

    fn read_for_version<C>(
        &self,
        conn: &mut C,
        key: &K,
        version: Version,
    ) -> Result<Option<V>, KvError>
    where
        C: SqlConnection + ?Sized,
    {
        self.single(
            conn,
            &self.ctx.statements.read_for_version,
            &[key.to_sql()?, SqlValue::from(version)],
        )?
        .map(|row| self.value_at(&row, 0))
        .transpose()
    }

    fn read_all<C>(&self, conn: &mut C, key: &K) -> Result<Option<ValueVersion<V>>, KvError>
    where
        C: SqlConnection + ?Sized,
    {
        self.single(conn, &self.ctx.statements.read_all, &[key.to_sql()?])?
            .map(|row| -> Result<ValueVersion<V>, KvError> {
                Ok(ValueVersion {
                    value: self.value_at(&row, 0)?,
                    version: self.version_at(&row, 1)?,
                })
            })
            .transpose()
    }

    fn read_record<C>(&self, conn: &mut C, key: &K) -> Result<Option<Record<V>>, KvError>
    where
        C: SqlConnection + ?Sized,
    {
        self.single(conn, &self.ctx.statements.read_record, &[key.to_sql()?])?
            .map(|row| self.record_at(&row, 0))
            .transpose()
    }

    fn batch_contains<C>(&self, conn: &mut C, keys: &[K]) -> Result<HashMap<K, Version>, KvError>
    where
        C: SqlConnection + ?Sized,
    {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        self.by_keys(conn, &self.ctx.statements.batch_contains, keys)?
            .iter()
            .map(|row| -> Result<(K, Version), KvError> {
                Ok((self.key_at(row)?, self.version_at(row, 1)?))
            })
            .collect()
    }

    fn batch_contains_versions<C>(
        &self,
        conn: &mut C,
        pairs: &[KeyVersion<K>],
    ) -> Result<HashMap<K, bool>, KvError>
    where
        C: SqlConnection + ?Sized,
    {
        let mut out = pairs
            .iter()
            .map(|p| (p.key.clone(), false))
            .collect::<HashMap<_, _>>();
        if pairs.is_empty() {
            return Ok(out);
        }
        for row in self.by_pairs(conn, &self.ctx.statements.batch_contains_version, pairs)? {
            out.insert(self.key_at(&row)?, true);
        }
        Ok(out)
    }

    fn batch_read<C>(&self, conn: &mut C, keys: &[K]) -> Result<HashMap<K, V>, KvError>
    where
        C: SqlConnection + ?Sized,
    {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        self.by_keys(conn, &self.ctx.statements.batch_read, keys)?
            .iter()
            .map(|row| -> Result<(K, V), KvError> {
                Ok((self.key_at(row)?, self.value_at(row, 1)?))
            })
            .collect()
    }

    fn batch_read_for_versions<C>(
        &self,
        conn: &mut C,
        pairs: &[KeyVersion<K>],
    ) -> Result<HashMap<K, V>, KvError>
    where
        C: SqlConnection + ?Sized,
    {
        if pairs.is_empty() {
            return Ok(HashMap::new());
        }
        self.by_pairs(conn, &self.ctx.statements.batch_read_for_version, pairs)?
            .iter()
            .map(|row| -> Result<(K, V), KvError> {
                Ok((self.key_at(row)?, self.value_at(row, 1)?))
            })
            .collect()
    }

    fn batch_read_all<C>(
        &self,
        conn: &mut C,
        keys: &[K],
    ) -> Result<HashMap<K, ValueVersion<V>>, KvError>
    where
        C: SqlConnection + ?Sized,
    {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        self.by_keys(conn, &self.ctx.statements.batch_read_all, keys)?
            .iter()
            .map(|row| -> Result<(K, ValueVersion<V>), KvError> {
                let entry = ValueVersion {
                    value: self.value_at(row, 1)?,
                    version: self.version_at(row, 2)?,
                };
                Ok((self.key_at(row)?, entry))
            })
            .collect()
    }

    fn batch_read_records<C>(
        &self,
        conn: &mut C,
        keys: &[K],
    ) -> Result<HashMap<K, Record<V>>, KvError>
    where
        C: SqlConnection + ?Sized,
    {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        self.by_keys(conn, &self.ctx.statements.batch_read_record, keys)?
            .iter()
            .map(|row| -> Result<(K, Record<V>), KvError> {
                Ok((self.key_at(row)?, self.record_at(row, 1)?))
            })
            .collect()
    }
}
