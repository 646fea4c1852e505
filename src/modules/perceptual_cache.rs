use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::config::CacheConfig;
use crate::error::Result;
use crate::modules::cache_key::{CacheKey, RenderKey};
use crate::modules::fingerprint::Fingerprint;
use crate::modules::renderer::Artifact;
use crate::store::store::{InMemoryStore, KeyValueStore};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub render: RenderKey,
    pub artifact: Artifact,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheHit {
    pub artifact: Artifact,
    /// Stored fingerprint that matched, equal to the query on an exact hit.
    pub matched: Fingerprint,
    pub distance: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Hit(CacheHit),
    Miss,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    Inserted,
    /// An entry for the key existed; it was left untouched.
    AlreadyPresent,
}

pub type CacheBackend = Arc<dyn KeyValueStore<CacheKey, CacheEntry>>;

/// Artifact cache keyed by render key and perceptual fingerprint.
///
/// Only entries with the query's render key are candidates; among those the
/// fingerprint may differ by up to the Hamming threshold.
#[derive(Clone)]
pub struct PerceptualCache {
    store: CacheBackend,
    hamming_threshold: u32,
}

impl PerceptualCache {
    pub fn new(store: CacheBackend, config: &CacheConfig) -> Self {
        PerceptualCache { store, hamming_threshold: config.hamming_threshold }
    }

    pub fn in_memory(config: &CacheConfig) -> Self {
        Self::new(Arc::new(InMemoryStore::new()), config)
    }

    pub fn hamming_threshold(&self) -> u32 {
        self.hamming_threshold
    }

    /// lookup finds the cached artifact of a key or its nearest neighbour.
    ///
    /// # Arguments
    /// * `key` - render key of the job plus the hash of its image
    ///
    /// # Returns
    /// * `Result<CacheLookup>`
    pub fn lookup(&self, key: CacheKey) -> Result<CacheLookup> {
        if let Some(entry) = self.store.get(&key)? {
            let matched = key.fingerprint;
            return Ok(CacheLookup::Hit(CacheHit { artifact: entry.artifact, matched, distance: 0 }));
        }

        let nearest = self
            .store
            .keys()?
            .into_iter()
            .filter(|candidate| candidate.render == key.render)
            .map(|candidate| (key.fingerprint.distance(&candidate.fingerprint), candidate))
            .min();

        match nearest {
            Some((distance, candidate)) if distance <= self.hamming_threshold => {
                debug!(query = %key, matched = %candidate, distance, "near-duplicate cache match");
                Ok(match self.store.get(&candidate)? {
                    Some(entry) => CacheLookup::Hit(CacheHit {
                        artifact: entry.artifact,
                        matched: candidate.fingerprint,
                        distance,
                    }),
                    None => CacheLookup::Miss,
                })
            }
            _ => Ok(CacheLookup::Miss),
        }
    }

    /// store records an artifact unless the key is already cached.
    pub fn store(&self, key: CacheKey, artifact: Artifact) -> Result<StoreOutcome> {
        let entry = CacheEntry {
            fingerprint: key.fingerprint,
            render: key.render,
            artifact,
            created_at: Utc::now(),
        };
        if self.store.insert_if_absent(key, entry)? {
            Ok(StoreOutcome::Inserted)
        } else {
            Ok(StoreOutcome::AlreadyPresent)
        }
    }
}

impl std::fmt::Debug for PerceptualCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerceptualCache")
            .field("hamming_threshold", &self.hamming_threshold)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::renderer::ArtifactKind;

    fn artifact(tag: &str) -> Artifact {
        Artifact::new(ArtifactKind::Vector, tag.as_bytes().to_vec())
    }

    const RENDER: RenderKey = RenderKey(7);

    fn key(bits: u64) -> CacheKey {
        CacheKey::new(RENDER, Fingerprint(bits))
    }

    fn cache(threshold: u32) -> PerceptualCache {
        PerceptualCache::in_memory(&CacheConfig { hamming_threshold: threshold })
    }

    #[test]
    fn test_exact_hit_and_miss() {
        let cache = cache(0);
        assert_eq!(cache.lookup(key(1)).unwrap(), CacheLookup::Miss);
        cache.store(key(1), artifact("a")).unwrap();
        match cache.lookup(key(1)).unwrap() {
            CacheLookup::Hit(hit) => {
                assert_eq!(hit.distance, 0);
                assert_eq!(hit.artifact, artifact("a"));
            }
            CacheLookup::Miss => panic!("expected a hit"),
        }
        assert_eq!(cache.lookup(key(3)).unwrap(), CacheLookup::Miss);
    }

    #[test]
    fn test_first_writer_wins() {
        let cache = cache(8);
        assert_eq!(cache.store(key(9), artifact("first")).unwrap(), StoreOutcome::Inserted);
        assert_eq!(cache.store(key(9), artifact("second")).unwrap(), StoreOutcome::AlreadyPresent);
        let CacheLookup::Hit(hit) = cache.lookup(key(9)).unwrap() else {
            panic!("expected a hit");
        };
        assert_eq!(hit.artifact, artifact("first"));
    }

    #[test]
    fn test_nearest_within_threshold() {
        let cache = cache(2);
        cache.store(key(0b0000), artifact("zero")).unwrap();
        cache.store(key(0b1111_0000), artifact("far")).unwrap();

        let CacheLookup::Hit(hit) = cache.lookup(key(0b0011)).unwrap() else {
            panic!("expected a near hit");
        };
        assert_eq!(hit.matched, Fingerprint(0));
        assert_eq!(hit.distance, 2);
        assert_eq!(hit.artifact, artifact("zero"));

        assert_eq!(cache.lookup(key(0b0111)).unwrap(), CacheLookup::Miss);
    }

    #[test]
    fn test_distance_tie_prefers_smallest_fingerprint() {
        let cache = cache(4);
        cache.store(key(0b0110), artifact("six")).unwrap();
        cache.store(key(0b0101), artifact("five")).unwrap();
        // 0b0100 is one bit away from both
        let CacheLookup::Hit(hit) = cache.lookup(key(0b0100)).unwrap() else {
            panic!("expected a hit");
        };
        assert_eq!(hit.matched, Fingerprint(0b0101));
    }

    #[test]
    fn test_other_render_key_is_never_a_hit() {
        let cache = cache(8);
        cache.store(key(0b1010), artifact("vector")).unwrap();
        let other = CacheKey::new(RenderKey(8), Fingerprint(0b1010));
        assert_eq!(cache.lookup(other).unwrap(), CacheLookup::Miss);

        // both settings coexist under the same fingerprint
        assert_eq!(cache.store(other, artifact("json")).unwrap(), StoreOutcome::Inserted);
        let CacheLookup::Hit(hit) = cache.lookup(other).unwrap() else {
            panic!("expected a hit");
        };
        assert_eq!(hit.artifact, artifact("json"));
    }
}
