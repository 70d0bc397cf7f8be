use super::{TableContext, TableKey};
use crate::error::KvError;
use crate::record::{BatchOutcome, KeyValueVersion, KeyVersion};
use crate::sql::{SqlColumn, SqlConnection, SqlValue};
use crate::version::{Version, now_micros};
use smallvec::{SmallVec, smallvec};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

type Params = SmallVec<[SqlValue; 5]>;

/// Inserts, upserts and compare-and-swap writes against one table.
///
/// Every method runs on the caller's connection and inside whatever
/// transaction the caller has open. A failed precondition is reported as
/// `None` (single rows) or as zero affected rows (batches), never as an error.
pub struct KvWriter<K, V> {
    ctx: Arc<TableContext>,
    _types: PhantomData<fn() -> (K, V)>,
}

impl<K, V> Clone for KvWriter<K, V> {
    fn clone(&self) -> Self {
        Self {
            ctx: Arc::clone(&self.ctx),
            _types: PhantomData,
        }
    }
}

impl<K: TableKey, V: SqlColumn> KvWriter<K, V> {
    pub(crate) fn from_context(ctx: Arc<TableContext>) -> Self {
        Self {
            ctx,
            _types: PhantomData,
        }
    }

    pub fn table(&self) -> &str {
        self.ctx.descriptor.table()
    }

    /// Inserts a new row. Fails with a constraint violation when `key` exists.
    pub fn insert<C>(&self, conn: &mut C, key: &K, value: &V) -> Result<Version, KvError>
    where
        C: SqlConnection + ?Sized,
    {
        let version = Version::generate(&[]);
        let params = insert_params(key, value, version, now_micros())?;
        conn.execute_update(&self.ctx.statements.insert, &params)?;
        Ok(version)
    }

    /// Updates `key` unconditionally, inserting it when no row was updated.
    pub fn save<C>(&self, conn: &mut C, key: &K, value: &V) -> Result<Version, KvError>
    where
        C: SqlConnection + ?Sized,
    {
        let version = Version::generate(&[]);
        let now = now_micros();
        let updated = conn.execute_update(
            &self.ctx.statements.update,
            &update_params(key, value, version, now)?,
        )?;
        if updated == 0 {
            conn.execute_update(
                &self.ctx.statements.insert,
                &insert_params(key, value, version, now)?,
            )?;
        }
        Ok(version)
    }

    /// Replaces the value only if the row still holds `expected`. The new
    /// version always differs from `expected`.
    pub fn swap<C>(
        &self,
        conn: &mut C,
        key: &K,
        value: &V,
        expected: Version,
    ) -> Result<Option<Version>, KvError>
    where
        C: SqlConnection + ?Sized,
    {
        let version = Version::generate(&[expected]);
        let params = swap_params(key, value, expected, version, now_micros())?;
        let affected = conn.execute_update(&self.ctx.statements.swap, &params)?;
        Ok((affected > 0).then_some(version))
    }

    /// Assigns a fresh version and update timestamp without changing the
    /// value. `None` when `key` does not exist.
    pub fn touch<C>(&self, conn: &mut C, key: &K) -> Result<Option<Version>, KvError>
    where
        C: SqlConnection + ?Sized,
    {
        let version = Version::generate(&[]);
        let params = touch_params(key, version, now_micros())?;
        let affected = conn.execute_update(&self.ctx.statements.touch, &params)?;
        Ok((affected > 0).then_some(version))
    }

    pub fn delete<C>(&self, conn: &mut C, key: &K) -> Result<(), KvError>
    where
        C: SqlConnection + ?Sized,
    {
        let params: Params = smallvec![key.to_sql()?];
        conn.execute_update(&self.ctx.statements.delete, &params)?;
        Ok(())
    }

    /// Deletes `key` only if it still holds `version`. A missing row and a
    /// stale version both leave the table untouched and return `Ok(())`.
    pub fn remove<C>(&self, conn: &mut C, key: &K, version: Version) -> Result<(), KvError>
    where
        C: SqlConnection + ?Sized,
    {
        let params: Params = smallvec![key.to_sql()?, SqlValue::from(version)];
        conn.execute_update(&self.ctx.statements.remove, &params)?;
        Ok(())
    }

    /// Inserts every pair at one shared version. A duplicate key aborts the
    /// batch with a constraint violation.
    pub fn batch_insert<C>(&self, conn: &mut C, pairs: &[(K, V)]) -> Result<Version, KvError>
    where
        C: SqlConnection + ?Sized,
    {
        let version = Version::generate(&[]);
        if pairs.is_empty() {
            return Ok(version);
        }
        let now = now_micros();
        let rows = pairs
            .iter()
            .map(|(key, value)| insert_params(key, value, version, now).map(Params::into_vec))
            .collect::<Result<Vec<_>, _>>()?;
        let counts = conn.execute_batch_update(&self.ctx.statements.insert, &rows)?;
        expect_outcomes(counts, rows.len())?;
        Ok(version)
    }

    /// Batched upsert: one update pass over every pair, then one insert pass
    /// for exactly the pairs whose update matched no row.
    ///
    /// A key listed more than once is written once, with its last value.
    pub fn batch_save<C>(&self, conn: &mut C, pairs: &[(K, V)]) -> Result<Version, KvError>
    where
        C: SqlConnection + ?Sized,
    {
        let version = Version::generate(&[]);
        if pairs.is_empty() {
            return Ok(version);
        }
        let pairs = last_write_per_key(pairs);
        let now = now_micros();
        let updates = pairs
            .iter()
            .map(|(key, value)| update_params(key, value, version, now).map(Params::into_vec))
            .collect::<Result<Vec<_>, _>>()?;
        let counts = conn.execute_batch_update(&self.ctx.statements.update, &updates)?;
        let counts = expect_outcomes(counts, pairs.len())?;

        // Outcomes line up with `pairs` by position.
        let inserts = pairs
            .iter()
            .zip(&counts)
            .filter(|(_, count)| **count == 0)
            .map(|((key, value), _)| insert_params(key, value, version, now).map(Params::into_vec))
            .collect::<Result<Vec<_>, _>>()?;
        if !inserts.is_empty() {
            debug!(
                table = self.table(),
                updated = pairs.len() - inserts.len(),
                inserted = inserts.len(),
                "batch save inserting rows missed by update"
            );
            let counts = conn.execute_batch_update(&self.ctx.statements.insert, &inserts)?;
            expect_outcomes(counts, inserts.len())?;
        }
        Ok(version)
    }

    /// Swaps every pair that still holds `expected`. Returns the shared new
    /// version if any row matched; use [`Self::batch_swap_outcome`] for
    /// per-row results.
    pub fn batch_swap<C>(
        &self,
        conn: &mut C,
        pairs: &[(K, V)],
        expected: Version,
    ) -> Result<Option<Version>, KvError>
    where
        C: SqlConnection + ?Sized,
    {
        let outcome = self.swap_rows(
            conn,
            pairs.iter().map(|(key, value)| (key, value, expected)),
        )?;
        Ok(outcome.version_if_any())
    }

    /// Like [`Self::batch_swap`] with a separate expected version per row.
    pub fn batch_swap_each<C>(
        &self,
        conn: &mut C,
        triplets: &[KeyValueVersion<K, V>],
    ) -> Result<Option<Version>, KvError>
    where
        C: SqlConnection + ?Sized,
    {
        Ok(self.batch_swap_outcome(conn, triplets)?.version_if_any())
    }

    pub fn batch_swap_outcome<C>(
        &self,
        conn: &mut C,
        triplets: &[KeyValueVersion<K, V>],
    ) -> Result<BatchOutcome, KvError>
    where
        C: SqlConnection + ?Sized,
    {
        self.swap_rows(
            conn,
            triplets.iter().map(|t| (&t.key, &t.value, t.version)),
        )
    }

    fn swap_rows<'a, C, I>(&self, conn: &mut C, rows: I) -> Result<BatchOutcome, KvError>
    where
        C: SqlConnection + ?Sized,
        I: Iterator<Item = (&'a K, &'a V, Version)>,
        K: 'a,
        V: 'a,
    {
        let rows = rows.collect::<Vec<_>>();
        let expected = rows.iter().map(|(_, _, v)| *v).collect::<Vec<_>>();
        let version = Version::generate(&expected);
        if rows.is_empty() {
            return Ok(BatchOutcome {
                version,
                affected: Vec::new(),
            });
        }
        let now = now_micros();
        let params = rows
            .iter()
            .map(|(key, value, expected)| {
                swap_params(*key, *value, *expected, version, now).map(Params::into_vec)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let counts = conn.execute_batch_update(&self.ctx.statements.swap, &params)?;
        let affected = expect_outcomes(counts, params.len())?;
        Ok(BatchOutcome { version, affected })
    }

    /// Refreshes the version of every existing key. `None` only when none of
    /// the keys exist.
    pub fn batch_touch<C>(&self, conn: &mut C, keys: &[K]) -> Result<Option<Version>, KvError>
    where
        C: SqlConnection + ?Sized,
    {
        Ok(self.batch_touch_outcome(conn, keys)?.version_if_any())
    }

    pub fn batch_touch_outcome<C>(&self, conn: &mut C, keys: &[K]) -> Result<BatchOutcome, KvError>
    where
        C: SqlConnection + ?Sized,
    {
        let version = Version::generate(&[]);
        if keys.is_empty() {
            return Ok(BatchOutcome {
                version,
                affected: Vec::new(),
            });
        }
        let now = now_micros();
        let params = keys
            .iter()
            .map(|key| touch_params(key, version, now).map(Params::into_vec))
            .collect::<Result<Vec<_>, _>>()?;
        let counts = conn.execute_batch_update(&self.ctx.statements.touch, &params)?;
        let affected = expect_outcomes(counts, params.len())?;
        Ok(BatchOutcome { version, affected })
    }

    pub fn batch_delete<C>(&self, conn: &mut C, keys: &[K]) -> Result<(), KvError>
    where
        C: SqlConnection + ?Sized,
    {
        if keys.is_empty() {
            return Ok(());
        }
        let params = keys
            .iter()
            .map(|key| key.to_sql().map(|key| vec![key]))
            .collect::<Result<Vec<_>, _>>()?;
        let counts = conn.execute_batch_update(&self.ctx.statements.delete, &params)?;
        expect_outcomes(counts, params.len())?;
        Ok(())
    }

    /// Deletes every key that still holds `version`; other keys are left alone.
    pub fn batch_remove<C>(&self, conn: &mut C, keys: &[K], version: Version) -> Result<(), KvError>
    where
        C: SqlConnection + ?Sized,
    {
        self.remove_rows(conn, keys.iter().map(|key| (key, version)))
    }

    pub fn batch_remove_each<C>(&self, conn: &mut C, pairs: &[KeyVersion<K>]) -> Result<(), KvError>
    where
        C: SqlConnection + ?Sized,
    {
        self.remove_rows(conn, pairs.iter().map(|p| (&p.key, p.version)))
    }

    fn remove_rows<'a, C, I>(&self, conn: &mut C, rows: I) -> Result<(), KvError>
    where
        C: SqlConnection + ?Sized,
        I: Iterator<Item = (&'a K, Version)>,
        K: 'a,
    {
        let params = rows
            .map(|(key, version)| Ok(vec![key.to_sql()?, SqlValue::from(version)]))
            .collect::<Result<Vec<_>, KvError>>()?;
        if params.is_empty() {
            return Ok(());
        }
        let counts = conn.execute_batch_update(&self.ctx.statements.remove, &params)?;
        expect_outcomes(counts, params.len())?;
        Ok(())
    }
}

/// Keeps the last value given for each key, in first-seen key order.
fn last_write_per_key<K: TableKey, V>(pairs: &[(K, V)]) -> Vec<&(K, V)> {
    let mut slots: HashMap<&K, usize> = HashMap::with_capacity(pairs.len());
    let mut out: Vec<&(K, V)> = Vec::with_capacity(pairs.len());
    for pair in pairs {
        match slots.get(&pair.0) {
            Some(&slot) => out[slot] = pair,
            None => {
                slots.insert(&pair.0, out.len());
                out.push(pair);
            }
        }
    }
    if out.len() < pairs.len() {
        debug!(
            given = pairs.len(),
            distinct = out.len(),
            "batch save collapsed repeated keys"
        );
    }
    out
}

fn insert_params<K: SqlColumn, V: SqlColumn>(
    key: &K,
    value: &V,
    version: Version,
    now: i64,
) -> Result<Params, KvError> {
    Ok(smallvec![
        key.to_sql()?,
        value.to_sql()?,
        SqlValue::from(version),
        SqlValue::Timestamp(now),
        SqlValue::Timestamp(now),
    ])
}

fn update_params<K: SqlColumn, V: SqlColumn>(
    key: &K,
    value: &V,
    version: Version,
    now: i64,
) -> Result<Params, KvError> {
    Ok(smallvec![
        value.to_sql()?,
        SqlValue::from(version),
        SqlValue::Timestamp(now),
        key.to_sql()?,
    ])
}

fn swap_params<K: SqlColumn, V: SqlColumn>(
    key: &K,
    value: &V,
    expected: Version,
    version: Version,
    now: i64,
) -> Result<Params, KvError> {
    Ok(smallvec![
        value.to_sql()?,
        SqlValue::from(version),
        SqlValue::Timestamp(now),
        key.to_sql()?,
        SqlValue::from(expected),
    ])
}

fn touch_params<K: SqlColumn>(key: &K, version: Version, now: i64) -> Result<Params, KvError> {
    Ok(smallvec![SqlValue::from(version), SqlValue::Timestamp(now), key.to_sql()?])
}

fn expect_outcomes(counts: Vec<u64>, expected: usize) -> Result<Vec<u64>, KvError> {
    if counts.len() == expected {
        Ok(counts)
    } else {
        Err(KvError::BatchOutcomeMismatch {
            expected,
            actual: counts.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::config::TableConfig;
    use crate::engine::KvTable;
    use crate::error::{KvError, SqlError};
    use crate::record::KeyValueVersion;
    use crate::sql::{Row, SqlConnection, SqlValue};
    use crate::version::Version;

    /// Records statements and answers batch updates from a script.
    #[derive(Default)]
    struct ScriptedConnection {
        batch_outcomes: Vec<Vec<u64>>,
        batches: Vec<(String, Vec<Vec<SqlValue>>)>,
    }

    impl SqlConnection for ScriptedConnection {
        fn execute_update(&mut self, _sql: &str, _params: &[SqlValue]) -> Result<u64, SqlError> {
            Ok(1)
        }

        fn execute_batch_update(
            &mut self,
            sql: &str,
            param_rows: &[Vec<SqlValue>],
        ) -> Result<Vec<u64>, SqlError> {
            self.batches.push((sql.to_string(), param_rows.to_vec()));
            if self.batch_outcomes.is_empty() {
                return Ok(vec![1; param_rows.len()]);
            }
            Ok(self.batch_outcomes.remove(0))
        }

        fn execute_query(&mut self, _sql: &str, _params: &[SqlValue]) -> Result<Vec<Row>, SqlError> {
            Ok(Vec::new())
        }

        fn execute_insert_returning_generated_key(
            &mut self,
            _sql: &str,
            _params: &[SqlValue],
        ) -> Result<SqlValue, SqlError> {
            Ok(SqlValue::Integer(1))
        }
    }

    fn table() -> KvTable<i64, String> {
        KvTable::from_config(TableConfig::new("kv")).expect("table")
    }

    #[test]
    fn batch_save_inserts_exactly_the_missed_positions() {
        let writer = table().writer();
        let mut conn = ScriptedConnection {
            batch_outcomes: vec![vec![1, 0, 1, 0]],
            ..Default::default()
        };
        let pairs = vec![
            (1, "a".to_string()),
            (2, "b".to_string()),
            (3, "c".to_string()),
            (4, "d".to_string()),
        ];
        let version = writer.batch_save(&mut conn, &pairs).expect("save");

        assert_eq!(conn.batches.len(), 2);
        let (insert_sql, inserts) = &conn.batches[1];
        assert!(insert_sql.starts_with("INSERT INTO kv"));
        let inserted_keys = inserts.iter().map(|row| row[0].clone()).collect::<Vec<_>>();
        assert_eq!(
            inserted_keys,
            vec![SqlValue::Integer(2), SqlValue::Integer(4)]
        );
        assert!(inserts.iter().all(|row| row[2] == SqlValue::Integer(version.raw())));
    }

    #[test]
    fn batch_save_skips_insert_pass_when_everything_updated() {
        let writer = table().writer();
        let mut conn = ScriptedConnection::default();
        writer
            .batch_save(&mut conn, &[(1, "a".to_string())])
            .expect("save");
        assert_eq!(conn.batches.len(), 1);
    }

    #[test]
    fn batch_save_sends_each_key_once_with_its_last_value() {
        let writer = table().writer();
        let mut conn = ScriptedConnection {
            batch_outcomes: vec![vec![0, 0]],
            ..Default::default()
        };
        let pairs = vec![
            (1, "a".to_string()),
            (2, "b".to_string()),
            (1, "a2".to_string()),
        ];
        writer.batch_save(&mut conn, &pairs).expect("save");

        let (_, updates) = &conn.batches[0];
        assert_eq!(updates.len(), 2);
        let (_, inserts) = &conn.batches[1];
        let inserted = inserts
            .iter()
            .map(|row| (row[0].clone(), row[1].clone()))
            .collect::<Vec<_>>();
        assert_eq!(
            inserted,
            vec![
                (SqlValue::Integer(1), SqlValue::Text("a2".into())),
                (SqlValue::Integer(2), SqlValue::Text("b".into())),
            ]
        );
    }

    #[test]
    fn short_outcome_arrays_are_rejected() {
        let writer = table().writer();
        let mut conn = ScriptedConnection {
            batch_outcomes: vec![vec![1]],
            ..Default::default()
        };
        let err = writer
            .batch_save(&mut conn, &[(1, "a".to_string()), (2, "b".to_string())])
            .expect_err("mismatch");
        assert!(matches!(
            err,
            KvError::BatchOutcomeMismatch {
                expected: 2,
                actual: 1
            }
        ));
    }

    #[test]
    fn batch_swap_collapses_to_absent_only_when_no_row_matched() {
        let writer = table().writer();
        let expected = Version::from_raw(5);
        let triplets = vec![
            KeyValueVersion::new(1, "a".to_string(), expected),
            KeyValueVersion::new(2, "b".to_string(), Version::from_raw(6)),
        ];
        let mut conn = ScriptedConnection {
            batch_outcomes: vec![vec![0, 1], vec![0, 0]],
            ..Default::default()
        };
        let outcome = writer
            .batch_swap_outcome(&mut conn, &triplets)
            .expect("outcome");
        assert_eq!(outcome.affected, vec![0, 1]);
        assert_ne!(outcome.version, expected);
        assert_ne!(outcome.version, Version::from_raw(6));
        assert_eq!(
            writer.batch_swap_each(&mut conn, &triplets).expect("swap"),
            None
        );
    }

    #[test]
    fn empty_batches_do_not_reach_the_connection() {
        let writer = table().writer();
        let mut conn = ScriptedConnection::default();
        writer.batch_insert(&mut conn, &[]).expect("insert");
        writer.batch_save(&mut conn, &[]).expect("save");
        assert_eq!(
            writer
                .batch_swap(&mut conn, &[], Version::from_raw(1))
                .expect("swap"),
            None
        );
        assert_eq!(writer.batch_touch(&mut conn, &[]).expect("touch"), None);
        writer.batch_delete(&mut conn, &[]).expect("delete");
        writer
            .batch_remove(&mut conn, &[], Version::from_raw(1))
            .expect("remove");
        assert!(conn.batches.is_empty());
    }
}
