//! In-process versioned cache.
//!
//! A sharded map holding values directly: no serialization, no I/O, and no
//! failure mode beyond memory. Guards run under the shard's entry lock.

use std::hash::Hash;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tessera_core::CacheError;

use super::traits::{
    should_evict, should_replace, CachedValue, EvictOutcome, PutOutcome, Versioned, VersionedCache,
};

#[derive(Debug)]
pub struct LocalVersionedCache<K, V>
where
    K: Eq + Hash,
{
    entries: DashMap<K, CachedValue<V>>,
}

impl<K: Eq + Hash, V> Default for LocalVersionedCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash, V> LocalVersionedCache<K, V> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[async_trait]
impl<K, V> VersionedCache<K, V> for LocalVersionedCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Versioned + Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &K) -> Result<Option<CachedValue<V>>, CacheError> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn put(&self, key: K, value: Option<V>) -> Result<PutOutcome, CacheError> {
        let incoming = CachedValue::from_option(value);
        match self.entries.entry(key) {
            Entry::Occupied(mut entry) => {
                if should_replace(entry.get().effective_version(), incoming.effective_version()) {
                    entry.insert(incoming);
                    Ok(PutOutcome::Stored)
                } else {
                    Ok(PutOutcome::SkippedNewer)
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(incoming);
                Ok(PutOutcome::Stored)
            }
        }
    }

    async fn evict(&self, key: &K) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn evict_version(&self, key: &K, version: i64) -> Result<EvictOutcome, CacheError> {
        match self.entries.entry(key.clone()) {
            Entry::Occupied(entry) => {
                if should_evict(entry.get().effective_version(), version) {
                    entry.remove();
                    Ok(EvictOutcome::Evicted)
                } else {
                    Ok(EvictOutcome::SkippedNewer)
                }
            }
            Entry::Vacant(_) => Ok(EvictOutcome::Absent),
        }
    }
}
