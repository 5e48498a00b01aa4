//! Tessera Storage - Attribute Cache-Aside Service
//!
//! Store port, key-name dictionary, remote-tier codec, versioned caches,
//! executors and the attribute service that ties them together.

pub mod cache;
pub mod codec;
pub mod dictionary;
pub mod executor;
pub mod metrics;
pub mod notify;
pub mod service;
pub mod store;

pub use cache::{
    AttributeCache, ByteStore, CachedValue, EvictOutcome, InMemoryByteStore, LmdbByteStore,
    LmdbCacheError, LocalVersionedCache, PutOutcome, RemoteKey, RemoteVersionedCache, Versioned,
    VersionedCache,
};
pub use codec::{AttributeCodec, MAX_TIMESTAMP};
pub use dictionary::{InMemoryKeyDictionary, KeyDictionary};
pub use executor::{CacheExecutor, CancelPolicy, DispatchMode, DispatchPool, Executors};
pub use metrics::{CacheMetrics, CacheStats};
pub use notify::{AttributeRecord, ChangeSink, NoopChangeSink, ObjectType, MAX_VERSION};
pub use service::AttributeCacheService;
pub use store::{AttributeStore, InMemoryAttributeStore};
