use std::fs;
use std::io::{ErrorKind, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::store::store::{KeyValueStore, StoreError};

/// One JSON file per key under a directory.
///
/// Values are written to a scratch file first and then linked into place, so
/// readers never observe a half-written entry. Keys must render to
/// file-name-safe strings.
#[derive(Debug)]
pub struct JsonDirStore<K, V> {
    dir: PathBuf,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> JsonDirStore<K, V> {
    /// open creates the directory when missing.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(JsonDirStore { dir, _marker: PhantomData })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl<K: ToString, V: Serialize> JsonDirStore<K, V> {
    fn path_of(&self, key: &K) -> PathBuf {
        self.dir.join(format!("{}.json", key.to_string()))
    }

    fn write_scratch(&self, value: &V) -> Result<PathBuf, StoreError> {
        let scratch = self.dir.join(format!(".{}.tmp", Uuid::new_v4()));
        let body = serde_json::to_vec(value)?;
        let mut file = fs::File::create(&scratch)?;
        file.write_all(&body)?;
        file.sync_all()?;
        Ok(scratch)
    }
}

impl<K, V> KeyValueStore<K, V> for JsonDirStore<K, V>
where
    K: ToString + FromStr + Send + Sync,
    V: Serialize + DeserializeOwned + Send + Sync,
{
    fn get(&self, key: &K) -> Result<Option<V>, StoreError> {
        match fs::read(self.path_of(key)) {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, key: K, value: V) -> Result<(), StoreError> {
        let scratch = self.write_scratch(&value)?;
        fs::rename(&scratch, self.path_of(&key))?;
        Ok(())
    }

    fn exists(&self, key: &K) -> Result<bool, StoreError> {
        Ok(self.path_of(key).try_exists()?)
    }

    fn insert_if_absent(&self, key: K, value: V) -> Result<bool, StoreError> {
        let target = self.path_of(&key);
        if target.try_exists()? {
            return Ok(false);
        }
        let scratch = self.write_scratch(&value)?;
        let linked = fs::hard_link(&scratch, &target);
        if let Err(e) = fs::remove_file(&scratch) {
            warn!(path = %scratch.display(), error = %e, "scratch file left behind");
        }
        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self) -> Result<Vec<K>, StoreError> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| StoreError::Corrupt(format!("unreadable file name {}", path.display())))?;
            let key = K::from_str(stem)
                .map_err(|_| StoreError::Corrupt(format!("{} is not a valid key", path.display())))?;
            keys.push(key);
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("facemap-store-{}", Uuid::new_v4()))
    }

    #[test]
    fn test_insert_if_absent_never_overwrites() {
        let dir = scratch_dir();
        let store: JsonDirStore<u64, Vec<u32>> = JsonDirStore::open(&dir).unwrap();
        assert!(store.insert_if_absent(5, vec![1, 2]).unwrap());
        assert!(!store.insert_if_absent(5, vec![9]).unwrap());
        assert_eq!(store.get(&5).unwrap(), Some(vec![1, 2]));
        assert_eq!(store.get(&6).unwrap(), None);
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_keys_skip_scratch_files() {
        let dir = scratch_dir();
        let store: JsonDirStore<u64, String> = JsonDirStore::open(&dir).unwrap();
        store.put(1, "a".into()).unwrap();
        store.put(2, "b".into()).unwrap();
        store.put(2, "c".into()).unwrap();
        fs::write(dir.join(".leftover.tmp"), b"x").unwrap();

        let mut keys = store.keys().unwrap();
        keys.sort();
        assert_eq!(keys, vec![1, 2]);
        assert_eq!(store.get(&2).unwrap().as_deref(), Some("c"));
        assert!(store.exists(&1).unwrap());
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let dir = scratch_dir();
        let store: JsonDirStore<u64, String> = JsonDirStore::open(&dir).unwrap();
        fs::write(dir.join("3.json"), b"{not json").unwrap();
        assert!(matches!(store.get(&3), Err(StoreError::Serde(_))));
        fs::write(dir.join("nope.json"), b"\"x\"").unwrap();
        assert!(matches!(store.keys(), Err(StoreError::Corrupt(_))));
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_racing_inserts_leave_no_scratch_files() {
        let dir = scratch_dir();
        let store: Arc<JsonDirStore<u64, u32>> = Arc::new(JsonDirStore::open(&dir).unwrap());
        let handles: Vec<_> = (0..8u32)
            .map(|n| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.insert_if_absent(7, n).unwrap())
            })
            .collect();
        let winners = handles.into_iter().map(|h| h.join().unwrap()).filter(|won| *won).count();
        assert_eq!(winners, 1);

        let names: Vec<String> = fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["7.json".to_string()]);
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_cache_keys_name_the_files() {
        use crate::modules::cache_key::{CacheKey, RenderKey};
        use crate::modules::fingerprint::Fingerprint;

        let dir = scratch_dir();
        let store: JsonDirStore<CacheKey, String> = JsonDirStore::open(&dir).unwrap();
        let svg = CacheKey::new(RenderKey(1), Fingerprint(0xff));
        let json = CacheKey::new(RenderKey(2), Fingerprint(0xff));
        assert!(store.insert_if_absent(svg, "svg".into()).unwrap());
        assert!(store.insert_if_absent(json, "json".into()).unwrap());

        let mut keys = store.keys().unwrap();
        keys.sort();
        assert_eq!(keys, vec![svg, json]);
        assert_eq!(store.get(&json).unwrap().as_deref(), Some("json"));
        fs::remove_dir_all(dir).unwrap();
    }
}
