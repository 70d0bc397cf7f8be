#![cfg(feature = "sqlite")]

use rusqlite::Connection;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tablekv::schema::create_table_sql;
use tablekv::{
    ConnectionSource, KeyVersion, KvRead, KvTable, ReplicatedReader, SqlError, SqliteFileSource,
    TableConfig, TableDescriptor, Version,
};
use tempfile::tempdir;

fn table() -> KvTable<i64, String> {
    KvTable::from_config(TableConfig::new("profiles")).expect("table")
}

fn create_db(path: &Path) -> Connection {
    let descriptor = TableDescriptor::new(TableConfig::new("profiles")).expect("descriptor");
    let conn = Connection::open(path).expect("open");
    conn.execute_batch(&create_table_sql(&descriptor, "INTEGER", "TEXT").expect("ddl"))
        .expect("create table");
    conn
}

/// Copies a row into a replica file, optionally with a different value, as
/// replication would have delivered it.
fn replicate(replica: &Connection, key: i64, value: &str, version: Version) {
    replica
        .execute(
            "INSERT OR REPLACE INTO profiles (key, value, version, created_at, updated_at) \
             VALUES (?1, ?2, ?3, 0, 0)",
            rusqlite::params![key, value, version.raw()],
        )
        .expect("replicate row");
}

struct CountingSource {
    inner: SqliteFileSource,
    acquired: Arc<AtomicUsize>,
}

impl ConnectionSource for CountingSource {
    type Connection = Connection;

    fn acquire(&self) -> Result<Connection, SqlError> {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        self.inner.acquire()
    }
}

struct DownSource;

impl ConnectionSource for DownSource {
    type Connection = Connection;

    fn acquire(&self) -> Result<Connection, SqlError> {
        Err(SqlError::Unavailable("replica offline".into()))
    }
}

#[test]
fn lagging_replica_never_serves_stale_values() {
    let dir = tempdir().expect("tempdir");
    let mut primary = create_db(&dir.path().join("primary.db"));
    let replica_path = dir.path().join("replica.db");
    let replica = create_db(&replica_path);

    let kv = table();
    let old = kv.writer().save(&mut primary, &5, &"old".into()).expect("save");
    replicate(&replica, 5, "old", old);
    let current = kv.writer().save(&mut primary, &5, &"new".into()).expect("save");

    let reader = ReplicatedReader::new(kv.reader(), vec![SqliteFileSource::new(&replica_path)]);
    assert_eq!(reader.read(&mut primary, &5).expect("read"), Some("new".into()));
    let all = reader
        .read_all(&mut primary, &5)
        .expect("read_all")
        .expect("row");
    assert_eq!(all.version, current);
    assert_eq!(all.value, "new");
    let record = reader
        .read_record(&mut primary, &5)
        .expect("record")
        .expect("row");
    assert_eq!(record.value, "new");
}

#[test]
fn caught_up_replica_serves_reads() {
    let dir = tempdir().expect("tempdir");
    let mut primary = create_db(&dir.path().join("primary.db"));
    let replica_path = dir.path().join("replica.db");
    let replica = create_db(&replica_path);

    let kv = table();
    let version = kv.writer().save(&mut primary, &1, &"primary".into()).expect("save");
    // Same version, marked value: only a replica read can return it.
    replicate(&replica, 1, "from-replica", version);

    let reader = ReplicatedReader::new(kv.reader(), vec![SqliteFileSource::new(&replica_path)]);
    assert_eq!(
        reader.read(&mut primary, &1).expect("read"),
        Some("from-replica".into())
    );
    assert_eq!(
        reader
            .read_for_version(&mut primary, &1, version)
            .expect("read for version"),
        Some("from-replica".into())
    );
    assert!(
        reader
            .contains_version(&mut primary, &1, version)
            .expect("contains version")
    );
}

#[test]
fn batch_reads_merge_replica_hits_with_primary_fallback() {
    let dir = tempdir().expect("tempdir");
    let mut primary = create_db(&dir.path().join("primary.db"));
    let replica_path = dir.path().join("replica.db");
    let replica = create_db(&replica_path);

    let kv = table();
    let input = vec![(1, "a".to_string()), (2, "b".to_string()), (3, "c".to_string())];
    let version = kv.writer().batch_save(&mut primary, &input).expect("save");
    replicate(&replica, 1, "a@replica", version);
    replicate(&replica, 2, "b-stale", Version::from_raw(version.raw().wrapping_add(1)));

    let reader = ReplicatedReader::new(kv.reader(), vec![SqliteFileSource::new(&replica_path)]);
    let values = reader
        .batch_read(&mut primary, &[1, 2, 3, 4])
        .expect("batch read");
    assert_eq!(
        values,
        HashMap::from([
            (1, "a@replica".to_string()),
            (2, "b".to_string()),
            (3, "c".to_string()),
        ])
    );

    let all = reader
        .batch_read_all(&mut primary, &[1, 2, 4])
        .expect("batch read all");
    assert_eq!(all.len(), 2);
    assert!(all.values().all(|row| row.version == version));
    assert_eq!(all[&2].value, "b");

    let records = reader
        .batch_read_records(&mut primary, &[1, 2, 3])
        .expect("records");
    assert_eq!(records.len(), 3);
    assert_eq!(records[&2].value, "b");

    let present = reader
        .batch_contains_versions(
            &mut primary,
            &[KeyVersion::new(1, version), KeyVersion::new(2, version), KeyVersion::new(4, version)],
        )
        .expect("contains versions");
    assert_eq!(present, HashMap::from([(1, true), (2, true), (4, false)]));

    let for_version = reader
        .batch_read_for_version(&mut primary, &[2, 3], version)
        .expect("read for version");
    assert_eq!(
        for_version,
        HashMap::from([(2, "b".to_string()), (3, "c".to_string())])
    );
}

#[test]
fn unavailable_replica_falls_back_to_primary() {
    let dir = tempdir().expect("tempdir");
    let mut primary = create_db(&dir.path().join("primary.db"));
    let kv = table();
    let version = kv.writer().save(&mut primary, &9, &"value".into()).expect("save");

    let reader = ReplicatedReader::new(kv.reader(), vec![DownSource]);
    assert_eq!(reader.read(&mut primary, &9).expect("read"), Some("value".into()));
    assert_eq!(
        reader
            .batch_read(&mut primary, &[9, 10])
            .expect("batch read"),
        HashMap::from([(9, "value".to_string())])
    );
    assert!(
        reader
            .contains_version(&mut primary, &9, version)
            .expect("contains version")
    );
    assert_eq!(reader.read(&mut primary, &10).expect("read missing"), None);
}

#[test]
fn empty_replica_list_reads_primary_and_contains_never_uses_replicas() {
    let dir = tempdir().expect("tempdir");
    let mut primary = create_db(&dir.path().join("primary.db"));
    let replica_path = dir.path().join("replica.db");
    create_db(&replica_path);
    let kv = table();
    let version = kv.writer().save(&mut primary, &1, &"x".into()).expect("save");

    let acquired = Arc::new(AtomicUsize::new(0));
    let reader: ReplicatedReader<i64, String, CountingSource> =
        ReplicatedReader::new(kv.reader(), Vec::new());
    assert_eq!(reader.replica_count(), 0);
    assert_eq!(reader.read(&mut primary, &1).expect("read"), Some("x".into()));

    reader.add_replica(CountingSource {
        inner: SqliteFileSource::new(&replica_path),
        acquired: Arc::clone(&acquired),
    });
    assert_eq!(reader.replica_count(), 1);
    assert_eq!(reader.contains(&mut primary, &1).expect("contains"), Some(version));
    assert_eq!(
        reader.batch_contains(&mut primary, &[1]).expect("batch contains"),
        HashMap::from([(1, version)])
    );
    assert_eq!(acquired.load(Ordering::SeqCst), 0);

    assert_eq!(reader.read(&mut primary, &1).expect("read"), Some("x".into()));
    assert_eq!(acquired.load(Ordering::SeqCst), 1);

    reader.set_replicas(Vec::new());
    assert_eq!(reader.read(&mut primary, &1).expect("read"), Some("x".into()));
    assert_eq!(acquired.load(Ordering::SeqCst), 1);
}

#[test]
fn replicas_are_picked_round_robin() {
    let dir = tempdir().expect("tempdir");
    let mut primary = create_db(&dir.path().join("primary.db"));
    let kv = table();
    let version = kv.writer().save(&mut primary, &1, &"p".into()).expect("save");

    let mut sources = Vec::new();
    for name in ["r0", "r1"] {
        let path = dir.path().join(format!("{name}.db"));
        let replica = create_db(&path);
        replicate(&replica, 1, name, version);
        sources.push(SqliteFileSource::new(&path).read_only(true));
    }

    let reader = ReplicatedReader::new(kv.reader(), sources);
    let served = (0..4)
        .map(|_| reader.read(&mut primary, &1).expect("read").expect("row"))
        .collect::<Vec<_>>();
    assert_eq!(served, vec!["r0", "r1", "r0", "r1"]);
}

#[test]
fn empty_version_batches_never_touch_a_replica() {
    let dir = tempdir().expect("tempdir");
    let mut primary = create_db(&dir.path().join("primary.db"));
    let replica_path = dir.path().join("replica.db");
    create_db(&replica_path);

    let acquired = Arc::new(AtomicUsize::new(0));
    let reader = ReplicatedReader::new(
        table().reader(),
        vec![CountingSource {
            inner: SqliteFileSource::new(&replica_path),
            acquired: Arc::clone(&acquired),
        }],
    );
    assert!(
        reader
            .batch_contains_versions(&mut primary, &[])
            .expect("contains versions")
            .is_empty()
    );
    assert!(
        reader
            .batch_read_for_versions(&mut primary, &[])
            .expect("read for versions")
            .is_empty()
    );
    assert!(
        reader
            .batch_read_for_version(&mut primary, &[], Version::from_raw(1))
            .expect("read for version")
            .is_empty()
    );
    assert_eq!(acquired.load(Ordering::SeqCst), 0);
}
