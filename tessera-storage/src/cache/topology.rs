//! Cache topology selection.
//!
//! The topology is read once at startup; the resulting [`AttributeCache`]
//! never switches shape at run time.

use std::sync::Arc;

use async_trait::async_trait;
use tessera_core::{
    AttributeKey, AttributeValue, CacheError, CacheSettings, CacheTopology, ConfigError,
    TesseraResult, WireFormat,
};
use tracing::info;

use super::lmdb_backend::LmdbByteStore;
use super::local::LocalVersionedCache;
use super::remote::{ByteStore, RemoteVersionedCache};
use super::traits::{CachedValue, EvictOutcome, PutOutcome, VersionedCache};
use crate::codec::AttributeCodec;
use crate::dictionary::KeyDictionary;

pub enum AttributeCache {
    Local(LocalVersionedCache<AttributeKey, AttributeValue>),
    Remote(RemoteVersionedCache),
}

impl AttributeCache {
    pub fn local() -> Self {
        AttributeCache::Local(LocalVersionedCache::new())
    }

    pub fn remote(
        store: Arc<dyn ByteStore>,
        format: WireFormat,
        dictionary: Arc<dyn KeyDictionary>,
    ) -> Self {
        AttributeCache::Remote(RemoteVersionedCache::new(
            store,
            AttributeCodec::new(format),
            dictionary,
        ))
    }

    /// Build the configured cache. The remote topology opens its LMDB
    /// environment here.
    pub fn from_settings(
        settings: &CacheSettings,
        dictionary: Arc<dyn KeyDictionary>,
    ) -> TesseraResult<Self> {
        match (settings.topology, &settings.remote) {
            (CacheTopology::Local, _) => {
                info!(topology = %settings.topology, "Attribute cache ready");
                Ok(Self::local())
            }
            (CacheTopology::Remote, Some(remote)) => {
                let store = LmdbByteStore::open(&remote.path, remote.max_size_mb)
                    .map_err(CacheError::from)?;
                info!(
                    topology = %settings.topology,
                    path = %remote.path.display(),
                    max_size_mb = remote.max_size_mb,
                    wire_format = ?remote.wire_format,
                    "Attribute cache ready"
                );
                Ok(Self::remote(Arc::new(store), remote.wire_format, dictionary))
            }
            (CacheTopology::Remote, None) => Err(ConfigError::MissingRequired {
                field: "cache.remote".to_string(),
            }
            .into()),
        }
    }

    pub fn topology(&self) -> CacheTopology {
        match self {
            AttributeCache::Local(_) => CacheTopology::Local,
            AttributeCache::Remote(_) => CacheTopology::Remote,
        }
    }
}

#[async_trait]
impl VersionedCache<AttributeKey, AttributeValue> for AttributeCache {
    async fn get(
        &self,
        key: &AttributeKey,
    ) -> Result<Option<CachedValue<AttributeValue>>, CacheError> {
        match self {
            AttributeCache::Local(cache) => cache.get(key).await,
            AttributeCache::Remote(cache) => cache.get(key).await,
        }
    }

    async fn put(
        &self,
        key: AttributeKey,
        value: Option<AttributeValue>,
    ) -> Result<PutOutcome, CacheError> {
        match self {
            AttributeCache::Local(cache) => cache.put(key, value).await,
            AttributeCache::Remote(cache) => cache.put(key, value).await,
        }
    }

    async fn evict(&self, key: &AttributeKey) -> Result<(), CacheError> {
        match self {
            AttributeCache::Local(cache) => cache.evict(key).await,
            AttributeCache::Remote(cache) => cache.evict(key).await,
        }
    }

    async fn evict_version(
        &self,
        key: &AttributeKey,
        version: i64,
    ) -> Result<EvictOutcome, CacheError> {
        match self {
            AttributeCache::Local(cache) => cache.evict_version(key, version).await,
            AttributeCache::Remote(cache) => cache.evict_version(key, version).await,
        }
    }
}
