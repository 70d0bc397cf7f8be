//! Read scaling over replicas with primary-checked freshness.
//!
//! Latest-value reads ask the primary for the key's current version and then
//! ask a replica for the value at exactly that version. A replica that has not
//! caught up (or fails) is bypassed and the primary serves the missing keys,
//! so a read never returns data older than the version the primary reported
//! at the start of the call.

use crate::engine::{KvRead, KvReader, TableKey};
use crate::error::KvError;
use crate::record::{KeyVersion, Record, ValueVersion};
use crate::sql::{ConnectionSource, SqlColumn, SqlConnection};
use crate::version::Version;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, warn};

pub struct ReplicatedReader<K, V, S> {
    primary: KvReader<K, V>,
    replicas: RwLock<Vec<Arc<S>>>,
    next: AtomicUsize,
}

struct Pick<S> {
    index: usize,
    source: Arc<S>,
}

impl<K: TableKey, V: SqlColumn, S: ConnectionSource> ReplicatedReader<K, V, S> {
    pub fn new(primary: KvReader<K, V>, replicas: Vec<S>) -> Self {
        Self::with_shared(primary, replicas.into_iter().map(Arc::new).collect())
    }

    pub fn with_shared(primary: KvReader<K, V>, replicas: Vec<Arc<S>>) -> Self {
        Self {
            primary,
            replicas: RwLock::new(replicas),
            next: AtomicUsize::new(0),
        }
    }

    pub fn primary(&self) -> &KvReader<K, V> {
        &self.primary
    }

    pub fn replica_count(&self) -> usize {
        self.replicas.read().len()
    }

    pub fn set_replicas(&self, replicas: Vec<Arc<S>>) {
        *self.replicas.write() = replicas;
    }

    pub fn add_replica(&self, replica: S) {
        self.replicas.write().push(Arc::new(replica));
    }

    /// Round-robin pick. The counter is shared without coordination, so
    /// concurrent callers may land on the same replica.
    fn next_replica(&self) -> Option<Pick<S>> {
        let replicas = self.replicas.read();
        if replicas.is_empty() {
            return None;
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % replicas.len();
        Some(Pick {
            index,
            source: Arc::clone(&replicas[index]),
        })
    }

    /// Runs `op` on a connection from the picked replica. Failures are logged
    /// and reported as `None` so the caller falls back to the primary.
    fn on_replica<T, F>(&self, pick: &Pick<S>, op: F) -> Option<T>
    where
        F: FnOnce(&mut S::Connection) -> Result<T, KvError>,
    {
        let result = pick
            .source
            .acquire()
            .map_err(KvError::from)
            .and_then(|mut conn| op(&mut conn));
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(
                    table = self.primary.table(),
                    replica = pick.index,
                    source = %pick.source.describe(),
                    error = %err,
                    "replica read failed, using primary"
                );
                None
            }
        }
    }

    fn note_lag(&self, pick: &Pick<S>, missing: usize) {
        debug!(
            table = self.primary.table(),
            replica = pick.index,
            missing,
            "replica behind primary, reading from primary"
        );
    }
}

impl<K: TableKey, V: SqlColumn, S: ConnectionSource> KvRead<K, V> for ReplicatedReader<K, V, S> {
    /// Answered by the primary, which is the source of truth for versions.
    fn contains<C>(&self, conn: &mut C, key: &K) -> Result<Option<Version>, KvError>
    where
        C: SqlConnection + ?Sized,
    {
        self.primary.contains(conn, key)
    }

    fn contains_version<C>(&self, conn: &mut C, key: &K, version: Version) -> Result<bool, KvError>
    where
        C: SqlConnection + ?Sized,
    {
        let Some(pick) = self.next_replica() else {
            return self.primary.contains_version(conn, key, version);
        };
        if let Some(true) =
            self.on_replica(&pick, |rc| self.primary.contains_version(rc, key, version))
        {
            return Ok(true);
        }
        self.note_lag(&pick, 1);
        self.primary.contains_version(conn, key, version)
    }

    fn read<C>(&self, conn: &mut C, key: &K) -> Result<Option<V>, KvError>
    where
        C: SqlConnection + ?Sized,
    {
        let Some(pick) = self.next_replica() else {
            return self.primary.read(conn, key);
        };
        let Some(version) = self.primary.contains(conn, key)? else {
            return Ok(None);
        };
        if let Some(Some(value)) =
            self.on_replica(&pick, |rc| self.primary.read_for_version(rc, key, version))
        {
            return Ok(Some(value));
        }
        self.note_lag(&pick, 1);
        self.primary.read(conn, key)
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
        let Some(pick) = self.next_replica() else {
            return self.primary.read_for_version(conn, key, version);
        };
        if let Some(Some(value)) =
            self.on_replica(&pick, |rc| self.primary.read_for_version(rc, key, version))
        {
            return Ok(Some(value));
        }
        self.note_lag(&pick, 1);
        self.primary.read_for_version(conn, key, version)
    }

    fn read_all<C>(&self, conn: &mut C, key: &K) -> Result<Option<ValueVersion<V>>, KvError>
    where
        C: SqlConnection + ?Sized,
    {
        let Some(pick) = self.next_replica() else {
            return self.primary.read_all(conn, key);
        };
        let Some(version) = self.primary.contains(conn, key)? else {
            return Ok(None);
        };
        if let Some(Some(value)) =
            self.on_replica(&pick, |rc| self.primary.read_for_version(rc, key, version))
        {
            return Ok(Some(ValueVersion { value, version }));
        }
        self.note_lag(&pick, 1);
        self.primary.read_all(conn, key)
    }

    fn read_record<C>(&self, conn: &mut C, key: &K) -> Result<Option<Record<V>>, KvError>
    where
        C: SqlConnection + ?Sized,
    {
        let Some(pick) = self.next_replica() else {
            return self.primary.read_record(conn, key);
        };
        let Some(version) = self.primary.contains(conn, key)? else {
            return Ok(None);
        };
        let replicated = self
            .on_replica(&pick, |rc| self.primary.read_record(rc, key))
            .flatten()
            .filter(|record| record.version == version);
        if let Some(record) = replicated {
            return Ok(Some(record));
        }
        self.note_lag(&pick, 1);
        self.primary.read_record(conn, key)
    }

    fn batch_contains<C>(&self, conn: &mut C, keys: &[K]) -> Result<HashMap<K, Version>, KvError>
    where
        C: SqlConnection + ?Sized,
    {
        self.primary.batch_contains(conn, keys)
    }

    fn batch_contains_versions<C>(
        &self,
        conn: &mut C,
        pairs: &[KeyVersion<K>],
    ) -> Result<HashMap<K, bool>, KvError>
    where
        C: SqlConnection + ?Sized,
    {
        if pairs.is_empty() {
            return Ok(HashMap::new());
        }
        let Some(pick) = self.next_replica() else {
            return self.primary.batch_contains_versions(conn, pairs);
        };
        let mut found = self
            .on_replica(&pick, |rc| self.primary.batch_contains_versions(rc, pairs))
            .unwrap_or_default();
        let missing = pairs
            .iter()
            .filter(|p| found.get(&p.key) != Some(&true))
            .cloned()
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            self.note_lag(&pick, missing.len());
            found.extend(self.primary.batch_contains_versions(conn, &missing)?);
        }
        Ok(found)
    }

    fn batch_read<C>(&self, conn: &mut C, keys: &[K]) -> Result<HashMap<K, V>, KvError>
    where
        C: SqlConnection + ?Sized,
    {
        let Some(pick) = self.next_replica() else {
            return self.primary.batch_read(conn, keys);
        };
        let pairs = current_versions(self.primary.batch_contains(conn, keys)?);
        if pairs.is_empty() {
            return Ok(HashMap::new());
        }
        let mut found = self
            .on_replica(&pick, |rc| self.primary.batch_read_for_versions(rc, &pairs))
            .unwrap_or_default();
        let missing = missing_keys(&pairs, |key| found.contains_key(key));
        if !missing.is_empty() {
            self.note_lag(&pick, missing.len());
            found.extend(self.primary.batch_read(conn, &missing)?);
        }
        Ok(found)
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
        let Some(pick) = self.next_replica() else {
            return self.primary.batch_read_for_versions(conn, pairs);
        };
        let mut found = self
            .on_replica(&pick, |rc| self.primary.batch_read_for_versions(rc, pairs))
            .unwrap_or_default();
        let missing = pairs
            .iter()
            .filter(|p| !found.contains_key(&p.key))
            .cloned()
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            self.note_lag(&pick, missing.len());
            found.extend(self.primary.batch_read_for_versions(conn, &missing)?);
        }
        Ok(found)
    }

    fn batch_read_all<C>(
        &self,
        conn: &mut C,
        keys: &[K],
    ) -> Result<HashMap<K, ValueVersion<V>>, KvError>
    where
        C: SqlConnection + ?Sized,
    {
        let Some(pick) = self.next_replica() else {
            return self.primary.batch_read_all(conn, keys);
        };
        let pairs = current_versions(self.primary.batch_contains(conn, keys)?);
        if pairs.is_empty() {
            return Ok(HashMap::new());
        }
        let mut values = self
            .on_replica(&pick, |rc| self.primary.batch_read_for_versions(rc, &pairs))
            .unwrap_or_default();
        let mut found = HashMap::with_capacity(pairs.len());
        let mut missing = Vec::new();
        for pair in &pairs {
            match values.remove(&pair.key) {
                Some(value) => {
                    found.insert(
                        pair.key.clone(),
                        ValueVersion {
                            value,
                            version: pair.version,
                        },
                    );
                }
                None => missing.push(pair.key.clone()),
            }
        }
        if !missing.is_empty() {
            self.note_lag(&pick, missing.len());
            found.extend(self.primary.batch_read_all(conn, &missing)?);
        }
        Ok(found)
    }

    fn batch_read_records<C>(
        &self,
        conn: &mut C,
        keys: &[K],
    ) -> Result<HashMap<K, Record<V>>, KvError>
    where
        C: SqlConnection + ?Sized,
    {
        let Some(pick) = self.next_replica() else {
            return self.primary.batch_read_records(conn, keys);
        };
        let pairs = current_versions(self.primary.batch_contains(conn, keys)?);
        if pairs.is_empty() {
            return Ok(HashMap::new());
        }
        let present = pairs.iter().map(|p| p.key.clone()).collect::<Vec<_>>();
        let mut found = self
            .on_replica(&pick, |rc| self.primary.batch_read_records(rc, &present))
            .unwrap_or_default();
        // A replica row only counts when it is at the primary's version.
        let current = pairs
            .iter()
            .map(|p| (&p.key, p.version))
            .collect::<HashMap<_, _>>();
        found.retain(|key, record| current.get(key) == Some(&record.version));
        let missing = missing_keys(&pairs, |key| found.contains_key(key));
        if !missing.is_empty() {
            self.note_lag(&pick, missing.len());
            found.extend(self.primary.batch_read_records(conn, &missing)?);
        }
        Ok(found)
    }
}

fn current_versions<K>(versions: HashMap<K, Version>) -> Vec<KeyVersion<K>> {
    versions
        .into_iter()
        .map(|(key, version)| KeyVersion::new(key, version))
        .collect()
}

fn missing_keys<K: Clone>(pairs: &[KeyVersion<K>], found: impl Fn(&K) -> bool) -> Vec<K> {
    pairs
        .iter()
        .filter(|p| !found(&p.key))
        .map(|p| p.key.clone())
        .collect()
}
