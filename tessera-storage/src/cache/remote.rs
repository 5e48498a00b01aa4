//! Serialized cache tier over a byte store.
//!
//! Values leave the process heap: every operation encodes or decodes, and
//! every operation can fail independently of the store call it backs.
//!
//! # Value Envelope
//!
//! `[version: 8 bytes BE i64][codec payload]`. An empty payload is a
//! tombstone; version 0 marks a tombstone or an unversioned value.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tessera_core::{AttributeKey, AttributeValue, CacheError};

use super::remote_key::RemoteKey;
use super::traits::{
    should_evict, should_replace, CachedValue, EvictOutcome, PutOutcome, VersionedCache,
};
use crate::codec::AttributeCodec;
use crate::dictionary::KeyDictionary;

const VERSION_LEN: usize = 8;

/// Byte-array key/value backend.
///
/// Conditional operations must evaluate their predicate and apply the write
/// in one atomic step.
pub trait ByteStore: Send + Sync + 'static {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, CacheError>;

    /// Write `value` when the key is absent or `replace(existing)` holds.
    fn put_if(
        &self,
        key: &[u8],
        value: &[u8],
        replace: &dyn Fn(&[u8]) -> bool,
    ) -> Result<PutOutcome, CacheError>;

    /// Returns whether a value was removed.
    fn delete(&self, key: &[u8]) -> Result<bool, CacheError>;

    /// Remove the value when `remove(existing)` holds.
    fn delete_if(&self, key: &[u8], remove: &dyn Fn(&[u8]) -> bool)
        -> Result<EvictOutcome, CacheError>;
}

/// Version stamped in an envelope. Short or corrupt envelopes read as 0.
pub fn envelope_version(bytes: &[u8]) -> i64 {
    bytes
        .get(..VERSION_LEN)
        .and_then(|head| head.try_into().ok())
        .map(i64::from_be_bytes)
        .unwrap_or(0)
}

pub fn encode_envelope(version: i64, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(VERSION_LEN + payload.len());
    bytes.extend_from_slice(&version.to_be_bytes());
    bytes.extend_from_slice(payload);
    bytes
}

// ============================================================================
// IN-MEMORY BYTE STORE
// ============================================================================

/// Byte store backed by a sharded map. Stands in for a network key/value
/// service in tests and single-node deployments.
#[derive(Debug, Default)]
pub struct InMemoryByteStore {
    entries: DashMap<Vec<u8>, Vec<u8>>,
}

impl InMemoryByteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ByteStore for InMemoryByteStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    fn put_if(
        &self,
        key: &[u8],
        value: &[u8],
        replace: &dyn Fn(&[u8]) -> bool,
    ) -> Result<PutOutcome, CacheError> {
        match self.entries.entry(key.to_vec()) {
            Entry::Occupied(mut entry) => {
                if replace(entry.get()) {
                    entry.insert(value.to_vec());
                    Ok(PutOutcome::Stored)
                } else {
                    Ok(PutOutcome::SkippedNewer)
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(value.to_vec());
                Ok(PutOutcome::Stored)
            }
        }
    }

    fn delete(&self, key: &[u8]) -> Result<bool, CacheError> {
        Ok(self.entries.remove(key).is_some())
    }

    fn delete_if(
        &self,
        key: &[u8],
        remove: &dyn Fn(&[u8]) -> bool,
    ) -> Result<EvictOutcome, CacheError> {
        match self.entries.entry(key.to_vec()) {
            Entry::Occupied(entry) => {
                if remove(entry.get()) {
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

// ============================================================================
// REMOTE VERSIONED CACHE
// ============================================================================

/// Attribute cache over a [`ByteStore`].
///
/// Byte store calls are synchronous. The remote topology runs this cache on
/// a pool of blocking threads so those calls stay off the async workers.
pub struct RemoteVersionedCache {
    store: Arc<dyn ByteStore>,
    codec: AttributeCodec,
    dictionary: Arc<dyn KeyDictionary>,
}

impl RemoteVersionedCache {
    pub fn new(
        store: Arc<dyn ByteStore>,
        codec: AttributeCodec,
        dictionary: Arc<dyn KeyDictionary>,
    ) -> Self {
        Self {
            store,
            codec,
            dictionary,
        }
    }

    pub fn codec(&self) -> AttributeCodec {
        self.codec
    }

    fn remote_key(&self, key: &AttributeKey) -> Result<RemoteKey, CacheError> {
        let key_id = self.dictionary.key_id(key.key())?;
        Ok(RemoteKey::new(key.entity_id(), key.scope(), key_id))
    }

    fn decode(
        &self,
        remote_key: &RemoteKey,
        bytes: &[u8],
    ) -> Result<CachedValue<AttributeValue>, CacheError> {
        if bytes.len() < VERSION_LEN {
            return Err(CacheError::Deserialization {
                reason: format!("envelope of {} bytes", bytes.len()),
            });
        }
        let payload = &bytes[VERSION_LEN..];
        if payload.is_empty() {
            return Ok(CachedValue::tombstone());
        }
        let version = envelope_version(bytes);
        let value = self
            .codec
            .deserialize(payload, remote_key.key_id(), self.dictionary.as_ref())?
            .with_version((version > 0).then_some(version));
        Ok(CachedValue::present(value))
    }
}

#[async_trait]
impl VersionedCache<AttributeKey, AttributeValue> for RemoteVersionedCache {
    async fn get(
        &self,
        key: &AttributeKey,
    ) -> Result<Option<CachedValue<AttributeValue>>, CacheError> {
        let remote_key = self.remote_key(key)?;
        match self.store.get(&remote_key.encode())? {
            Some(bytes) => self.decode(&remote_key, &bytes).map(Some),
            None => Ok(None),
        }
    }

    async fn put(
        &self,
        key: AttributeKey,
        value: Option<AttributeValue>,
    ) -> Result<PutOutcome, CacheError> {
        let remote_key = self.remote_key(&key)?;
        let (version, envelope) = match &value {
            Some(v) => {
                let version = v.version.unwrap_or(0);
                (version, encode_envelope(version, &self.codec.serialize(v)?))
            }
            None => (0, encode_envelope(0, &[])),
        };
        self.store.put_if(&remote_key.encode(), &envelope, &|existing: &[u8]| {
            should_replace(envelope_version(existing), version)
        })
    }

    async fn evict(&self, key: &AttributeKey) -> Result<(), CacheError> {
        let remote_key = self.remote_key(key)?;
        self.store.delete(&remote_key.encode())?;
        Ok(())
    }

    async fn evict_version(
        &self,
        key: &AttributeKey,
        version: i64,
    ) -> Result<EvictOutcome, CacheError> {
        let remote_key = self.remote_key(key)?;
        self.store.delete_if(&remote_key.encode(), &|existing: &[u8]| {
            should_evict(envelope_version(existing), version)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::InMemoryKeyDictionary;
    use tessera_core::{AttributeScope, EntityId, WireFormat};
    use uuid::Uuid;

    fn cache() -> (RemoteVersionedCache, Arc<InMemoryByteStore>) {
        let bytes = Arc::new(InMemoryByteStore::new());
        let cache = RemoteVersionedCache::new(
            bytes.clone(),
            AttributeCodec::new(WireFormat::V2),
            Arc::new(InMemoryKeyDictionary::new()),
        );
        (cache, bytes)
    }

    fn key(name: &str) -> AttributeKey {
        AttributeKey::new(AttributeScope::Server, EntityId::device(Uuid::new_v4()), name)
    }

    #[test]
    fn test_envelope_version() {
        assert_eq!(envelope_version(&encode_envelope(42, b"x")), 42);
        assert_eq!(envelope_version(&[1, 2]), 0);
    }

    #[tokio::test]
    async fn test_put_get_preserves_version() {
        let (cache, bytes) = cache();
        let k = key("temperature");
        let value = AttributeValue::double("temperature", 21.5, 1_000).with_version(Some(7));
        cache
            .put(k.clone(), Some(value.clone()))
            .await
            .expect("put should succeed");
        assert_eq!(bytes.len(), 1);

        let cached = cache
            .get(&k)
            .await
            .expect("get should succeed")
            .expect("entry should exist");
        assert_eq!(cached.into_value(), Some(value));
    }

    #[tokio::test]
    async fn test_tombstone_roundtrip() {
        let (cache, _bytes) = cache();
        let k = key("missing");
        cache.put(k.clone(), None).await.expect("put should succeed");
        let cached = cache
            .get(&k)
            .await
            .expect("get should succeed")
            .expect("entry should exist");
        assert!(cached.is_tombstone());
    }

    #[tokio::test]
    async fn test_versioned_evict() {
        let (cache, _bytes) = cache();
        let k = key("fw");
        let v2 = AttributeValue::string("fw", "2.0", 10).with_version(Some(2));
        cache.put(k.clone(), Some(v2)).await.expect("put should succeed");

        assert_eq!(
            cache.evict_version(&k, 1).await.expect("evict should succeed"),
            EvictOutcome::SkippedNewer
        );
        assert_eq!(
            cache.evict_version(&k, 2).await.expect("evict should succeed"),
            EvictOutcome::Evicted
        );
        assert_eq!(cache.get(&k).await.expect("get should succeed"), None);
    }

    #[tokio::test]
    async fn test_put_guard_keeps_newer() {
        let (cache, _bytes) = cache();
        let k = key("fw");
        let newer = AttributeValue::long("fw", 3, 10).with_version(Some(3));
        let older = AttributeValue::long("fw", 1, 5).with_version(Some(1));
        cache.put(k.clone(), Some(newer)).await.expect("put should succeed");
        assert_eq!(
            cache.put(k.clone(), Some(older)).await.expect("put should succeed"),
            PutOutcome::SkippedNewer
        );
        let cached = cache
            .get(&k)
            .await
            .expect("get should succeed")
            .and_then(CachedValue::into_value)
            .expect("value should be cached");
        assert_eq!(cached.version, Some(3));
    }

    #[tokio::test]
    async fn test_unencodable_timestamp_fails_put() {
        let (cache, bytes) = cache();
        let value = AttributeValue::long("n", 1, 10_000_000_000_000);
        assert!(matches!(
            cache.put(key("n"), Some(value)).await,
            Err(CacheError::Serialization { .. })
        ));
        assert!(bytes.is_empty());
    }
}
