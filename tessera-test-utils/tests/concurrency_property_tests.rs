//! Property-Based Tests for Concurrent Misses
//!
//! **Property 6: Concurrent Miss Tolerance**
//!
//! N concurrent `find` calls for one uncached key are not coalesced. Each
//! may reach the store, at least one does, and all callers observe the same
//! value. The cache ends up holding that value.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tessera_test_utils::fixtures::{self, harness_with, LocalCache};
use tessera_test_utils::{
    AttributeKey, AttributeScope, AttributeStore, CacheTopology, CountingStore, VersionedCache,
};

const CALLERS: usize = 16;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_misses_agree() {
    let h = harness_with(
        CountingStore::new(),
        Arc::new(LocalCache::new()),
        CacheTopology::Local,
    );
    let scope = AttributeScope::Server;
    let version = h
        .store
        .inner()
        .save(h.tenant, h.entity, scope, &fixtures::temperature(30.5))
        .await
        .expect("seed should succeed");
    h.store.set_read_delay(Duration::from_millis(20));

    let results = join_all(
        (0..CALLERS).map(|_| h.service.find(h.tenant, h.entity, scope, "temperature")),
    )
    .await;

    let values: Vec<_> = results
        .into_iter()
        .map(|r| r.expect("find should succeed").expect("value should exist"))
        .collect();
    assert!(values.iter().all(|v| v == &values[0]));
    assert_eq!(values[0].version, version);

    let calls = h.store.find_calls();
    assert!((1..=CALLERS).contains(&calls), "store calls: {}", calls);

    let cached = h
        .cache
        .get(&AttributeKey::new(scope, h.entity, "temperature"))
        .await
        .expect("get should succeed")
        .and_then(|entry| entry.into_value())
        .expect("value should be cached");
    assert_eq!(cached, values[0]);

    let stats = h.service.stats();
    assert_eq!(stats.hits + stats.misses, CALLERS as u64);
}

/// A stale miss that finishes after a newer save must not overwrite it.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_slow_miss_does_not_clobber_newer_save() {
    let h = harness_with(
        CountingStore::new(),
        Arc::new(LocalCache::new()),
        CacheTopology::Local,
    );
    let scope = AttributeScope::Shared;
    h.store
        .inner()
        .save(h.tenant, h.entity, scope, &fixtures::firmware("1.0"))
        .await
        .expect("seed should succeed");
    h.store.set_read_delay(Duration::from_millis(50));

    let slow_read = h.service.find(h.tenant, h.entity, scope, "firmware");
    let save = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.service
            .save(h.tenant, h.entity, scope, fixtures::firmware("2.0"))
            .await
    };
    let (read, saved) = tokio::join!(slow_read, save);
    read.expect("find should succeed");
    let newer = saved.expect("save should succeed");

    let cached = h
        .cache
        .get(&AttributeKey::new(scope, h.entity, "firmware"))
        .await
        .expect("get should succeed")
        .and_then(|entry| entry.into_value())
        .expect("value should be cached");
    assert_eq!(cached.version, newer);
    assert_eq!(h.service.stats().skipped_writes, 1);
}
