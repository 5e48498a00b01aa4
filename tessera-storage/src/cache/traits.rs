//! Versioned cache contract and cache-entry wrapper.
//!
//! A lookup has three outcomes:
//! - `None`: unknown, the store must be consulted
//! - `Some(CachedValue::present(v))`: cached value
//! - `Some(CachedValue::tombstone())`: the store was checked and the key does not exist

use async_trait::async_trait;
use tessera_core::{AttributeValue, CacheError};

/// Values that carry a store-assigned version.
pub trait Versioned {
    fn version(&self) -> Option<i64>;
}

impl Versioned for AttributeValue {
    fn version(&self) -> Option<i64> {
        self.version
    }
}

/// A cache entry: a value, or a tombstone confirming absence.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedValue<V> {
    inner: Option<V>,
}

impl<V> CachedValue<V> {
    pub fn present(value: V) -> Self {
        Self { inner: Some(value) }
    }

    pub fn tombstone() -> Self {
        Self { inner: None }
    }

    pub fn from_option(value: Option<V>) -> Self {
        Self { inner: value }
    }

    pub fn is_tombstone(&self) -> bool {
        self.inner.is_none()
    }

    pub fn value(&self) -> Option<&V> {
        self.inner.as_ref()
    }

    pub fn into_value(self) -> Option<V> {
        self.inner
    }
}

impl<V: Versioned> CachedValue<V> {
    /// Version used by the write and evict guards. Tombstones and
    /// unversioned values compare as 0.
    pub fn effective_version(&self) -> i64 {
        self.inner
            .as_ref()
            .and_then(Versioned::version)
            .unwrap_or(0)
    }
}

/// Result of a guarded `put`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Stored,
    /// The cache held a strictly newer version; nothing was written.
    SkippedNewer,
}

/// Result of a version-guarded evict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictOutcome {
    Evicted,
    /// Nothing was cached for the key.
    Absent,
    /// The cache held a strictly newer version; the entry was kept.
    SkippedNewer,
}

/// Write guard: overwrite unless the cached entry is strictly newer.
pub fn should_replace(cached_version: i64, incoming_version: i64) -> bool {
    incoming_version >= cached_version
}

/// Evict guard: remove only if the cached entry is not newer than `version`.
pub fn should_evict(cached_version: i64, version: i64) -> bool {
    cached_version <= version
}

/// Key/value cache with version-guarded writes and evictions.
///
/// Implementations must apply the guard and the write as one atomic step per
/// key, otherwise a concurrent writer can slip in between compare and write.
#[async_trait]
pub trait VersionedCache<K, V>: Send + Sync + 'static
where
    K: Send + Sync + 'static,
    V: Versioned + Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &K) -> Result<Option<CachedValue<V>>, CacheError>;

    /// Lookup several keys. Results are positional.
    async fn get_many(&self, keys: &[K]) -> Result<Vec<Option<CachedValue<V>>>, CacheError> {
        let mut found = Vec::with_capacity(keys.len());
        for key in keys {
            found.push(self.get(key).await?);
        }
        Ok(found)
    }

    /// Store a value, or a tombstone for `None`.
    async fn put(&self, key: K, value: Option<V>) -> Result<PutOutcome, CacheError>;

    /// Unconditional removal.
    async fn evict(&self, key: &K) -> Result<(), CacheError>;

    /// Remove the entry iff its version is `<= version`.
    async fn evict_version(&self, key: &K, version: i64) -> Result<EvictOutcome, CacheError>;
}
