//! Versioned attribute caches.
//!
//! Two shapes sit behind [`VersionedCache`]:
//! - [`LocalVersionedCache`]: in-process map, values held as-is
//! - [`RemoteVersionedCache`]: serialized values in a [`ByteStore`] (LMDB or in-memory)
//!
//! [`AttributeCache`] is the sum type chosen from configuration at startup.

pub mod lmdb_backend;
pub mod local;
pub mod remote;
pub mod remote_key;
pub mod topology;
pub mod traits;

pub use lmdb_backend::{LmdbByteStore, LmdbCacheError};
pub use local::LocalVersionedCache;
pub use remote::{encode_envelope, envelope_version, ByteStore, InMemoryByteStore, RemoteVersionedCache};
pub use remote_key::{RemoteKey, REMOTE_KEY_LEN};
pub use topology::AttributeCache;
pub use traits::{
    should_evict, should_replace, CachedValue, EvictOutcome, PutOutcome, Versioned, VersionedCache,
};
