use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// Key to set-of-values table. Keys whose set becomes empty are dropped, so the
/// table only tracks live entries.
#[derive(Debug, Clone)]
pub(crate) struct LocksTable<K, V> {
    entries: HashMap<K, HashSet<V>>,
}

impl<K, V> Default for LocksTable<K, V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<K, V> LocksTable<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone + Eq + Hash,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the entry was already present.
    pub fn insert(&mut self, key: &K, value: V) -> bool {
        self.entries.entry(key.clone()).or_default().insert(value)
    }

    pub fn remove(&mut self, key: &K, value: &V) -> bool {
        let Some(values) = self.entries.get_mut(key) else {
            return false;
        };
        let removed = values.remove(value);
        if values.is_empty() {
            self.entries.remove(key);
        }
        removed
    }

    pub fn contains(&self, key: &K, value: &V) -> bool {
        self.entries
            .get(key)
            .map_or(false, |values| values.contains(value))
    }

    pub fn values(&self, key: &K) -> impl Iterator<Item = &V> {
        self.entries.get(key).into_iter().flatten()
    }

    pub fn take(&mut self, key: &K) -> HashSet<V> {
        self.entries.remove(key).unwrap_or_default()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }
}
