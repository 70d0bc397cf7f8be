use crate::version::Version;
use serde::{Deserialize, Serialize};

/// Value read together with the version it was written at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueVersion<V> {
    pub value: V,
    pub version: Version,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyVersion<K> {
    pub key: K,
    pub version: Version,
}

impl<K> KeyVersion<K> {
    pub fn new(key: K, version: Version) -> Self {
        Self { key, version }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValueVersion<K, V> {
    pub key: K,
    pub value: V,
    pub version: Version,
}

impl<K, V> KeyValueVersion<K, V> {
    pub fn new(key: K, value: V, version: Version) -> Self {
        Self {
            key,
            value,
            version,
        }
    }
}

/// Full row contents; timestamps are microseconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record<V> {
    pub value: V,
    pub version: Version,
    pub created_at: i64,
    pub updated_at: i64,
}

impl<V> From<Record<V>> for ValueVersion<V> {
    fn from(record: Record<V>) -> Self {
        Self {
            value: record.value,
            version: record.version,
        }
    }
}

/// Result of a batched write: the version shared by every row the batch
/// touched and the affected-row count of each input row, in input order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    pub version: Version,
    pub affected: Vec<u64>,
}

impl BatchOutcome {
    pub fn total_affected(&self) -> u64 {
        self.affected.iter().sum()
    }

    /// Input positions whose statement matched no row.
    pub fn missed(&self) -> impl Iterator<Item = usize> + '_ {
        self.affected
            .iter()
            .enumerate()
            .filter(|(_, count)| **count == 0)
            .map(|(idx, _)| idx)
    }

    /// The shared version when at least one row was written.
    pub fn version_if_any(&self) -> Option<Version> {
        (self.total_affected() > 0).then_some(self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::BatchOutcome;
    use crate::version::Version;

    #[test]
    fn outcome_collapses_to_absent_only_when_nothing_matched() {
        let version = Version::from_raw(9);
        let partial = BatchOutcome {
            version,
            affected: vec![0, 1, 0],
        };
        assert_eq!(partial.version_if_any(), Some(version));
        assert_eq!(partial.missed().collect::<Vec<_>>(), vec![0, 2]);

        let none = BatchOutcome {
            version,
            affected: vec![0, 0],
        };
        assert_eq!(none.version_if_any(), None);
        assert_eq!(none.total_affected(), 0);
    }
}
