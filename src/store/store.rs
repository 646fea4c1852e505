use std::hash::Hash;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("corrupt entry: {0}")]
    Corrupt(String),
}

/// Durable key/value persistence behind the cache.
///
/// `insert_if_absent` must be atomic: of two concurrent inserts for the same
/// key exactly one returns `true`, and the stored value is never replaced.
pub trait KeyValueStore<K, V>: Send + Sync {
    fn get(&self, key: &K) -> Result<Option<V>, StoreError>;

    /// put writes unconditionally.
    fn put(&self, key: K, value: V) -> Result<(), StoreError>;

    fn exists(&self, key: &K) -> Result<bool, StoreError>;

    fn insert_if_absent(&self, key: K, value: V) -> Result<bool, StoreError>;

    fn keys(&self) -> Result<Vec<K>, StoreError>;
}

/// Process-local store on a sharded concurrent map.
#[derive(Debug)]
pub struct InMemoryStore<K: Eq + Hash, V> {
    entries: DashMap<K, V>,
}

impl<K: Eq + Hash, V> InMemoryStore<K, V> {
    pub fn new() -> Self {
        InMemoryStore { entries: DashMap::new() }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Eq + Hash, V> Default for InMemoryStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> KeyValueStore<K, V> for InMemoryStore<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    fn get(&self, key: &K) -> Result<Option<V>, StoreError> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    fn put(&self, key: K, value: V) -> Result<(), StoreError> {
        self.entries.insert(key, value);
        Ok(())
    }

    fn exists(&self, key: &K) -> Result<bool, StoreError> {
        Ok(self.entries.contains_key(key))
    }

    fn insert_if_absent(&self, key: K, value: V) -> Result<bool, StoreError> {
        match self.entries.entry(key) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(value);
                Ok(true)
            }
        }
    }

    fn keys(&self) -> Result<Vec<K>, StoreError> {
        Ok(self.entries.iter().map(|e| e.key().clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_insert_if_absent_keeps_first_value() {
        let store: InMemoryStore<u64, String> = InMemoryStore::new();
        assert!(store.insert_if_absent(1, "first".into()).unwrap());
        assert!(!store.insert_if_absent(1, "second".into()).unwrap());
        assert_eq!(store.get(&1).unwrap().as_deref(), Some("first"));
        assert!(store.exists(&1).unwrap());
        assert!(!store.exists(&2).unwrap());
    }

    #[test]
    fn test_put_overwrites() {
        let store: InMemoryStore<u64, u32> = InMemoryStore::new();
        store.put(3, 1).unwrap();
        store.put(3, 2).unwrap();
        assert_eq!(store.get(&3).unwrap(), Some(2));
        assert_eq!(store.keys().unwrap(), vec![3]);
    }

    #[test]
    fn test_concurrent_inserts_have_one_winner() {
        let store: Arc<InMemoryStore<u64, usize>> = Arc::new(InMemoryStore::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.insert_if_absent(42, i).unwrap())
            })
            .collect();
        let winners = handles.into_iter().map(|h| h.join().unwrap()).filter(|&won| won).count();
        assert_eq!(winners, 1);
        assert_eq!(store.len(), 1);
    }
}
