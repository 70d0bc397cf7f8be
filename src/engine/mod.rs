pub mod reader;
pub mod writer;

pub use reader::KvReader;
pub use writer::KvWriter;

use crate::config::TableConfig;
use crate::descriptor::TableDescriptor;
use crate::descriptor::predicates::PredicateCache;
use crate::error::KvError;
use crate::record::{KeyVersion, Record, ValueVersion};
use crate::sql::{SqlColumn, SqlConnection, SqlValue};
use crate::statements::Statements;
use crate::version::Version;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::info;

/// Key types usable as the table's unique column.
pub trait TableKey: SqlColumn + Eq + Hash + Clone + fmt::Debug {}

impl<T: SqlColumn + Eq + Hash + Clone + fmt::Debug> TableKey for T {}

#[derive(Debug)]
pub(crate) struct TableContext {
    pub(crate) descriptor: TableDescriptor,
    pub(crate) statements: Statements,
    pub(crate) predicates: PredicateCache,
}

/// Entry point for one table: renders its SQL once and hands out readers and
/// writers that share it.
pub struct KvTable<K, V> {
    ctx: Arc<TableContext>,
    _types: PhantomData<fn() -> (K, V)>,
}

impl<K, V> Clone for KvTable<K, V> {
    fn clone(&self) -> Self {
        Self {
            ctx: Arc::clone(&self.ctx),
            _types: PhantomData,
        }
    }
}

impl<K: TableKey, V: SqlColumn> KvTable<K, V> {
    pub fn new(descriptor: TableDescriptor) -> Result<Self, KvError> {
        let statements = Statements::render(&descriptor)?;
        let predicates =
            PredicateCache::new(descriptor.key_column(), descriptor.version_column());
        info!(table = descriptor.table(), "key-value table ready");
        Ok(Self {
            ctx: Arc::new(TableContext {
                descriptor,
                statements,
                predicates,
            }),
            _types: PhantomData,
        })
    }

    pub fn from_config(config: TableConfig) -> Result<Self, KvError> {
        Self::new(TableDescriptor::new(config)?)
    }

    pub fn descriptor(&self) -> &TableDescriptor {
        &self.ctx.descriptor
    }

    pub fn statements(&self) -> &Statements {
        &self.ctx.statements
    }

    pub fn writer(&self) -> KvWriter<K, V> {
        KvWriter::from_context(Arc::clone(&self.ctx))
    }

    pub fn reader(&self) -> KvReader<K, V> {
        KvReader::from_context(Arc::clone(&self.ctx))
    }
}

/// Read operations shared by the plain reader and the replica-aware reader.
///
/// Batch lookups return maps that only hold the keys that were found.
pub trait KvRead<K: TableKey, V: SqlColumn> {
    fn contains<C>(&self, conn: &mut C, key: &K) -> Result<Option<Version>, KvError>
    where
        C: SqlConnection + ?Sized;

    fn contains_version<C>(&self, conn: &mut C, key: &K, version: Version) -> Result<bool, KvError>
    where
        C: SqlConnection + ?Sized;

    fn read<C>(&self, conn: &mut C, key: &K) -> Result<Option<V>, KvError>
    where
        C: SqlConnection + ?Sized;

    fn read_for_version<C>(
        &self,
        conn: &mut C,
        key: &K,
        version: Version,
    ) -> Result<Option<V>, KvError>
    where
        C: SqlConnection + ?Sized;

    fn read_all<C>(&self, conn: &mut C, key: &K) -> Result<Option<ValueVersion<V>>, KvError>
    where
        C: SqlConnection + ?Sized;

    fn read_record<C>(&self, conn: &mut C, key: &K) -> Result<Option<Record<V>>, KvError>
    where
        C: SqlConnection + ?Sized;

    fn batch_contains<C>(&self, conn: &mut C, keys: &[K]) -> Result<HashMap<K, Version>, KvError>
    where
        C: SqlConnection + ?Sized;

    /// Every requested key is present in the result, mapped to whether it
    /// currently holds its paired version.
    fn batch_contains_versions<C>(
        &self,
        conn: &mut C,
        pairs: &[KeyVersion<K>],
    ) -> Result<HashMap<K, bool>, KvError>
    where
        C: SqlConnection + ?Sized;

    fn batch_contains_version<C>(
        &self,
        conn: &mut C,
        keys: &[K],
        version: Version,
    ) -> Result<HashMap<K, bool>, KvError>
    where
        C: SqlConnection + ?Sized,
    {
        self.batch_contains_versions(conn, &pair_with(keys, version))
    }

    fn batch_read<C>(&self, conn: &mut C, keys: &[K]) -> Result<HashMap<K, V>, KvError>
    where
        C: SqlConnection + ?Sized;

    fn batch_read_for_versions<C>(
        &self,
        conn: &mut C,
        pairs: &[KeyVersion<K>],
    ) -> Result<HashMap<K, V>, KvError>
    where
        C: SqlConnection + ?Sized;

    fn batch_read_for_version<C>(
        &self,
        conn: &mut C,
        keys: &[K],
        version: Version,
    ) -> Result<HashMap<K, V>, KvError>
    where
        C: SqlConnection + ?Sized,
    {
        self.batch_read_for_versions(conn, &pair_with(keys, version))
    }

    fn batch_read_all<C>(
        &self,
        conn: &mut C,
        keys: &[K],
    ) -> Result<HashMap<K, ValueVersion<V>>, KvError>
    where
        C: SqlConnection + ?Sized;

    fn batch_read_records<C>(
        &self,
        conn: &mut C,
        keys: &[K],
    ) -> Result<HashMap<K, Record<V>>, KvError>
    where
        C: SqlConnection + ?Sized;
}

fn pair_with<K: Clone>(keys: &[K], version: Version) -> Vec<KeyVersion<K>> {
    keys.iter()
        .map(|key| KeyVersion::new(key.clone(), version))
        .collect()
}

/// Positional parameters for a `(key = ? AND version = ?) OR ...` chain.
pub(crate) fn pair_params<K: SqlColumn>(
    pairs: &[KeyVersion<K>],
) -> Result<Vec<SqlValue>, KvError> {
    let mut params = Vec::with_capacity(pairs.len() * 2);
    for pair in pairs {
        params.push(pair.key.to_sql()?);
        params.push(SqlValue::from(pair.version));
    }
    Ok(params)
}

pub(crate) fn key_params<K: SqlColumn>(keys: &[K]) -> Result<Vec<SqlValue>, KvError> {
    let params = keys
        .iter()
        .map(SqlColumn::to_sql)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(params)
}
