use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Memoized batch predicate text, keyed by batch size.
///
/// Generation is a pure function of the size, so a racing miss just builds the
/// same string twice and keeps whichever lands first.
#[derive(Debug)]
pub struct PredicateCache {
    key_column: String,
    version_column: String,
    or_chains: RwLock<HashMap<usize, Arc<str>>>,
    in_lists: RwLock<HashMap<usize, Arc<str>>>,
}

impl PredicateCache {
    pub fn new(key_column: impl Into<String>, version_column: impl Into<String>) -> Self {
        Self {
            key_column: key_column.into(),
            version_column: version_column.into(),
            or_chains: RwLock::new(HashMap::new()),
            in_lists: RwLock::new(HashMap::new()),
        }
    }

    /// `size` copies of `(key = ? AND version = ?)` joined by `OR`. Binds
    /// alternate key, version, key, version.
    ///
    /// The disjunction is nested as a balanced tree so the parsed expression
    /// is `O(log size)` deep; SQLite caps expression depth at 1000.
    pub fn key_version_chain(&self, size: usize) -> Arc<str> {
        memoized(&self.or_chains, size, || {
            let clause = format!("({} = ? AND {} = ?)", self.key_column, self.version_column);
            let mut out = String::with_capacity(size * (clause.len() + 6));
            balanced_or(&mut out, &clause, size);
            out
        })
    }

    /// `?, ?, ...` for an `IN (...)` list of `size` keys.
    pub fn in_list(&self, size: usize) -> Arc<str> {
        memoized(&self.in_lists, size, || vec!["?"; size].join(", "))
    }

    pub fn cached_sizes(&self) -> usize {
        self.or_chains.read().len() + self.in_lists.read().len()
    }
}

fn balanced_or(out: &mut String, clause: &str, count: usize) {
    match count {
        0 => {}
        1 => out.push_str(clause),
        _ => {
            let left = count.div_ceil(2);
            out.push('(');
            balanced_or(out, clause, left);
            out.push_str(" OR ");
            balanced_or(out, clause, count - left);
            out.push(')');
        }
    }
}

fn memoized<F>(cache: &RwLock<HashMap<usize, Arc<str>>>, size: usize, build: F) -> Arc<str>
where
    F: FnOnce() -> String,
{
    if let Some(hit) = cache.read().get(&size) {
        return Arc::clone(hit);
    }
    let built: Arc<str> = Arc::from(build());
    Arc::clone(cache.write().entry(size).or_insert(built))
}
