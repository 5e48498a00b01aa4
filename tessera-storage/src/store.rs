//! Persistent store port.
//!
//! The store is the source of truth. Every successful write assigns the
//! attribute a new, strictly larger version. Adapters own retries and
//! timeouts; nothing above this trait retries a failed call.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use tessera_core::{AttributeKey, AttributeScope, AttributeValue, EntityId, StoreError, TenantId};
use tokio::sync::RwLock;

/// Async interface to the durable attribute store.
#[async_trait]
pub trait AttributeStore: Send + Sync + 'static {
    async fn find(
        &self,
        tenant_id: TenantId,
        entity_id: EntityId,
        scope: AttributeScope,
        key: &str,
    ) -> Result<Option<AttributeValue>, StoreError>;

    /// Batch read. Only keys that exist are returned, in no particular order.
    async fn find_keys(
        &self,
        tenant_id: TenantId,
        entity_id: EntityId,
        scope: AttributeScope,
        keys: &[String],
    ) -> Result<Vec<AttributeValue>, StoreError>;

    async fn find_all(
        &self,
        tenant_id: TenantId,
        entity_id: EntityId,
        scope: AttributeScope,
    ) -> Result<Vec<AttributeValue>, StoreError>;

    /// Distinct attribute names across all scopes of the given entities.
    async fn find_all_keys_by_entities(
        &self,
        tenant_id: TenantId,
        entity_ids: &[EntityId],
    ) -> Result<Vec<String>, StoreError>;

    /// Insert or overwrite. Returns the assigned version, or `None` when the
    /// adapter does not version its writes.
    async fn save(
        &self,
        tenant_id: TenantId,
        entity_id: EntityId,
        scope: AttributeScope,
        value: &AttributeValue,
    ) -> Result<Option<i64>, StoreError>;

    /// Delete the given keys. Each requested key is reported back with the
    /// version it held at the moment of deletion, or `None` when unknown.
    async fn remove_all(
        &self,
        tenant_id: TenantId,
        entity_id: EntityId,
        scope: AttributeScope,
        keys: &[String],
    ) -> Result<Vec<(String, Option<i64>)>, StoreError>;

    /// Cascade delete on entity removal. Returns every `(scope, key)` removed.
    async fn remove_all_by_entity(
        &self,
        tenant_id: TenantId,
        entity_id: EntityId,
    ) -> Result<Vec<(AttributeScope, String)>, StoreError>;
}

// ============================================================================
// IN-MEMORY ADAPTER
// ============================================================================

/// Versioned in-memory store.
///
/// Versions come from one global sequence, so a key that is deleted and
/// re-created never reuses an older version.
#[derive(Debug)]
pub struct InMemoryAttributeStore {
    records: RwLock<HashMap<AttributeKey, AttributeValue>>,
    next_version: AtomicI64,
    versioned: bool,
}

impl Default for InMemoryAttributeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryAttributeStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            next_version: AtomicI64::new(1),
            versioned: true,
        }
    }

    /// A store that never reports versions, like a legacy relational schema.
    pub fn unversioned() -> Self {
        Self {
            versioned: false,
            ..Self::new()
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    fn next_version(&self) -> Option<i64> {
        self.versioned
            .then(|| self.next_version.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl AttributeStore for InMemoryAttributeStore {
    async fn find(
        &self,
        _tenant_id: TenantId,
        entity_id: EntityId,
        scope: AttributeScope,
        key: &str,
    ) -> Result<Option<AttributeValue>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .get(&AttributeKey::new(scope, entity_id, key))
            .cloned())
    }

    async fn find_keys(
        &self,
        _tenant_id: TenantId,
        entity_id: EntityId,
        scope: AttributeScope,
        keys: &[String],
    ) -> Result<Vec<AttributeValue>, StoreError> {
        let records = self.records.read().await;
        Ok(keys
            .iter()
            .filter_map(|key| {
                records
                    .get(&AttributeKey::new(scope, entity_id, key.as_str()))
                    .cloned()
            })
            .collect())
    }

    async fn find_all(
        &self,
        _tenant_id: TenantId,
        entity_id: EntityId,
        scope: AttributeScope,
    ) -> Result<Vec<AttributeValue>, StoreError> {
        let records = self.records.read().await;
        let mut found: Vec<AttributeValue> = records
            .iter()
            .filter(|(k, _)| k.entity_id() == entity_id && k.scope() == scope)
            .map(|(_, v)| v.clone())
            .collect();
        found.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(found)
    }

    async fn find_all_keys_by_entities(
        &self,
        _tenant_id: TenantId,
        entity_ids: &[EntityId],
    ) -> Result<Vec<String>, StoreError> {
        let records = self.records.read().await;
        let names: BTreeSet<&str> = records
            .keys()
            .filter(|k| entity_ids.contains(&k.entity_id()))
            .map(AttributeKey::key)
            .collect();
        Ok(names.into_iter().map(str::to_string).collect())
    }

    async fn save(
        &self,
        _tenant_id: TenantId,
        entity_id: EntityId,
        scope: AttributeScope,
        value: &AttributeValue,
    ) -> Result<Option<i64>, StoreError> {
        let mut records = self.records.write().await;
        let version = self.next_version();
        records.insert(
            AttributeKey::new(scope, entity_id, value.key.as_str()),
            value.clone().with_version(version),
        );
        Ok(version)
    }

    async fn remove_all(
        &self,
        _tenant_id: TenantId,
        entity_id: EntityId,
        scope: AttributeScope,
        keys: &[String],
    ) -> Result<Vec<(String, Option<i64>)>, StoreError> {
        let mut records = self.records.write().await;
        Ok(keys
            .iter()
            .map(|key| {
                let removed = records.remove(&AttributeKey::new(scope, entity_id, key.as_str()));
                (key.clone(), removed.and_then(|v| v.version))
            })
            .collect())
    }

    async fn remove_all_by_entity(
        &self,
        _tenant_id: TenantId,
        entity_id: EntityId,
    ) -> Result<Vec<(AttributeScope, String)>, StoreError> {
        let mut records = self.records.write().await;
        let doomed: Vec<AttributeKey> = records
            .keys()
            .filter(|k| k.entity_id() == entity_id)
            .cloned()
            .collect();
        let mut removed = Vec::with_capacity(doomed.len());
        for key in doomed {
            records.remove(&key);
            removed.push((key.scope(), key.key().to_string()));
        }
        removed.sort();
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn ids() -> (TenantId, EntityId) {
        (TenantId::new(Uuid::new_v4()), EntityId::device(Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_save_assigns_increasing_versions() {
        let store = InMemoryAttributeStore::new();
        let (tenant, entity) = ids();
        let v1 = store
            .save(tenant, entity, AttributeScope::Server, &AttributeValue::long("n", 1, 10))
            .await
            .expect("save should succeed");
        let v2 = store
            .save(tenant, entity, AttributeScope::Server, &AttributeValue::long("n", 2, 11))
            .await
            .expect("save should succeed");
        assert!(v2 > v1);

        let found = store
            .find(tenant, entity, AttributeScope::Server, "n")
            .await
            .expect("find should succeed")
            .expect("value should exist");
        assert_eq!(found.version, v2);
    }

    #[tokio::test]
    async fn test_find_keys_returns_only_existing() {
        let store = InMemoryAttributeStore::new();
        let (tenant, entity) = ids();
        store
            .save(tenant, entity, AttributeScope::Client, &AttributeValue::boolean("a", true, 1))
            .await
            .expect("save should succeed");
        let found = store
            .find_keys(
                tenant,
                entity,
                AttributeScope::Client,
                &["a".to_string(), "b".to_string()],
            )
            .await
            .expect("find_keys should succeed");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].key, "a");
    }

    #[tokio::test]
    async fn test_remove_all_reports_deletion_version() {
        let store = InMemoryAttributeStore::new();
        let (tenant, entity) = ids();
        let version = store
            .save(tenant, entity, AttributeScope::Shared, &AttributeValue::string("s", "x", 1))
            .await
            .expect("save should succeed");
        let removed = store
            .remove_all(
                tenant,
                entity,
                AttributeScope::Shared,
                &["s".to_string(), "ghost".to_string()],
            )
            .await
            .expect("remove should succeed");
        assert_eq!(
            removed,
            vec![("s".to_string(), version), ("ghost".to_string(), None)]
        );
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_remove_all_by_entity_only_touches_entity() {
        let store = InMemoryAttributeStore::new();
        let (tenant, entity) = ids();
        let other = EntityId::asset(Uuid::new_v4());
        for scope in AttributeScope::ALL {
            store
                .save(tenant, entity, scope, &AttributeValue::long("k", 1, 1))
                .await
                .expect("save should succeed");
        }
        store
            .save(tenant, other, AttributeScope::Server, &AttributeValue::long("k", 1, 1))
            .await
            .expect("save should succeed");

        let removed = store
            .remove_all_by_entity(tenant, entity)
            .await
            .expect("cascade should succeed");
        assert_eq!(removed.len(), 3);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_find_all_keys_by_entities_is_distinct() {
        let store = InMemoryAttributeStore::new();
        let (tenant, first) = ids();
        let second = EntityId::device(Uuid::new_v4());
        for (entity, key) in [(first, "fw"), (first, "mode"), (second, "fw")] {
            store
                .save(tenant, entity, AttributeScope::Client, &AttributeValue::long(key, 1, 1))
                .await
                .expect("save should succeed");
        }
        let names = store
            .find_all_keys_by_entities(tenant, &[first, second])
            .await
            .expect("query should succeed");
        assert_eq!(names, vec!["fw".to_string(), "mode".to_string()]);
    }

    #[tokio::test]
    async fn test_unversioned_store_reports_none() {
        let store = InMemoryAttributeStore::unversioned();
        let (tenant, entity) = ids();
        let version = store
            .save(tenant, entity, AttributeScope::Server, &AttributeValue::long("n", 1, 1))
            .await
            .expect("save should succeed");
        assert_eq!(version, None);
    }
}
