//! Property-Based Tests for the Remote Cache Tier
//!
//! **Property 9: Topology Equivalence**
//!
//! The service behaves the same over the serialized remote tier as over the
//! in-process cache: write-through, tombstones, batch merge and guarded
//! eviction all hold, for both wire formats and for the LMDB backend.

use std::sync::Arc;

use proptest::prelude::*;
use tempfile::TempDir;
use tessera_test_utils::fixtures::{self, remote_harness};
use tessera_test_utils::generators::{arb_attribute_value, arb_scope};
use tessera_test_utils::{
    AttributeKey, AttributeScope, AttributeValue, ByteStore, InMemoryByteStore, KvValue,
    LmdbByteStore, VersionedCache, WireFormat,
};
use tokio::runtime::Runtime;

fn test_runtime() -> Result<Runtime, TestCaseError> {
    Runtime::new().map_err(|e| TestCaseError::fail(format!("Failed to create runtime: {}", e)))
}

fn arb_format() -> impl Strategy<Value = WireFormat> {
    prop_oneof![Just(WireFormat::V1), Just(WireFormat::V2)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn prop_remote_save_then_find(
        format in arb_format(),
        scope in arb_scope(),
        value in arb_attribute_value(),
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let bytes = Arc::new(InMemoryByteStore::new());
            let h = remote_harness(bytes.clone(), format);
            let version = h
                .service
                .save(h.tenant, h.entity, scope, value.clone())
                .await
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            prop_assert_eq!(bytes.len(), 1);

            let found = h
                .service
                .find(h.tenant, h.entity, scope, &value.key)
                .await
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            prop_assert_eq!(found, Some(value.with_version(version)));
            prop_assert_eq!(h.store.find_calls(), 0);
            prop_assert_eq!(h.service.stats().cache_errors, 0);
            Ok::<(), TestCaseError>(())
        })?;
    }
}

async fn exercise_remote(bytes: Arc<dyn ByteStore>) {
    let h = remote_harness(bytes, WireFormat::V2);
    let scope = AttributeScope::Server;

    // Tombstone on miss.
    assert_eq!(
        h.service
            .find(h.tenant, h.entity, scope, "temperature")
            .await
            .expect("find should succeed"),
        None
    );
    assert_eq!(
        h.service
            .find(h.tenant, h.entity, scope, "temperature")
            .await
            .expect("find should succeed"),
        None
    );
    assert_eq!(h.store.find_calls(), 1);

    // Write-through replaces the tombstone.
    let version = h
        .service
        .save(h.tenant, h.entity, scope, fixtures::temperature(22.0))
        .await
        .expect("save should succeed");
    let found = h
        .service
        .find(h.tenant, h.entity, scope, "temperature")
        .await
        .expect("find should succeed")
        .expect("saved value should be visible");
    assert_eq!(found.version, version);

    // Batch merge.
    let batch = h
        .service
        .find_many(
            h.tenant,
            h.entity,
            scope,
            &fixtures::keys(&["temperature", "firmware"]),
        )
        .await
        .expect("find_many should succeed");
    assert_eq!(batch.len(), 1);
    assert_eq!(h.store.find_keys_requests(), vec![fixtures::keys(&["firmware"])]);

    // Guarded removal.
    let removed = h
        .service
        .remove_all(h.tenant, h.entity, scope, &fixtures::keys(&["temperature"]))
        .await
        .expect("remove should succeed");
    assert_eq!(removed, fixtures::keys(&["temperature"]));
    assert_eq!(
        h.cache
            .get(&AttributeKey::new(scope, h.entity, "temperature"))
            .await
            .expect("get should succeed"),
        None
    );
    assert_eq!(h.service.stats().cache_errors, 0);
}

#[tokio::test]
async fn test_remote_tier_over_memory() {
    exercise_remote(Arc::new(InMemoryByteStore::new())).await;
}

#[tokio::test]
async fn test_remote_tier_over_lmdb() {
    let temp_dir = TempDir::new().expect("TempDir creation should succeed");
    let store = LmdbByteStore::open(temp_dir.path(), 10).expect("store creation should succeed");
    exercise_remote(Arc::new(store)).await;
}

/// A value whose timestamp the codec cannot encode is still saved; only the
/// cache write fails, and the next read falls through to the store.
#[tokio::test]
async fn test_unencodable_value_is_absorbed() {
    let h = remote_harness(Arc::new(InMemoryByteStore::new()), WireFormat::V2);
    let scope = AttributeScope::Client;
    let value = AttributeValue::long("far_future", 1, 10_000_000_000_000);
    h.service
        .save(h.tenant, h.entity, scope, value)
        .await
        .expect("save should succeed despite the cache");
    assert_eq!(h.service.stats().cache_errors, 1);

    let found = h
        .service
        .find(h.tenant, h.entity, scope, "far_future")
        .await
        .expect("find should succeed");
    assert!(found.is_some());
    assert_eq!(h.store.find_calls(), 1);
}

/// An encodable value already in the remote tier is dropped when a newer
/// save cannot be encoded, so reads follow the store.
#[tokio::test]
async fn test_unencodable_save_replaces_cached_version() {
    let h = remote_harness(Arc::new(InMemoryByteStore::new()), WireFormat::V2);
    let scope = AttributeScope::Server;
    let first = h
        .service
        .save(h.tenant, h.entity, scope, AttributeValue::long("n", 1, 1_000))
        .await
        .expect("first save should succeed");
    let second = h
        .service
        .save(h.tenant, h.entity, scope, AttributeValue::long("n", 2, 10_000_000_000_000))
        .await
        .expect("second save should succeed despite the cache");
    assert!(second > first);
    assert_eq!(
        h.cache
            .get(&AttributeKey::new(scope, h.entity, "n"))
            .await
            .expect("get should succeed"),
        None
    );

    let found = h
        .service
        .find(h.tenant, h.entity, scope, "n")
        .await
        .expect("find should succeed")
        .expect("value should exist");
    assert_eq!(found.version, second);
    assert_eq!(found.value, Some(KvValue::Long(2)));
    assert_eq!(h.store.find_calls(), 1);
}
