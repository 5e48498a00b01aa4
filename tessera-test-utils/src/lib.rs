//! Tessera Test Utilities
//!
//! Shared test infrastructure for the Tessera workspace:
//! - Instrumented and failing store adapters
//! - A cache that fails on demand
//! - A change sink that records every notification
//! - Proptest generators for attribute types
//! - Fixtures that wire a service over either cache topology

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

// Re-export core types for convenience
pub use tessera_core::{
    AttributeKey, AttributeScope, AttributeValue, CacheError, CacheTopology, DataType, EntityId,
    EntityType, InvariantViolation, KvValue, StoreError, TenantId, TesseraConfig, TesseraError,
    TesseraResult, ValidationError, WireFormat,
};
pub use tessera_storage::{
    AttributeCache, AttributeCacheService, AttributeRecord, AttributeStore, ByteStore,
    CachedValue, ChangeSink, EvictOutcome, InMemoryAttributeStore, InMemoryByteStore,
    InMemoryKeyDictionary, KeyDictionary, LmdbByteStore, LocalVersionedCache, ObjectType,
    PutOutcome, RemoteVersionedCache, VersionedCache, MAX_VERSION,
};

/// Install a test-friendly tracing subscriber once per process.
///
/// Honors `RUST_LOG`; defaults to debug output for the Tessera crates.
pub fn init_test_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        use tracing_subscriber::layer::SubscriberExt;
        use tracing_subscriber::util::SubscriberInitExt;
        use tracing_subscriber::EnvFilter;

        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("tessera_storage=debug,tessera_core=debug,info"));
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .try_init();
    });
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// COUNTING STORE
// ============================================================================

/// Handles for a paused `remove_all`.
///
/// `deleted` fires once the inner store has applied the delete; the call
/// then waits on `release` before reporting back to the service.
#[derive(Debug, Clone, Default)]
pub struct RemoveGate {
    pub deleted: Arc<Notify>,
    pub release: Arc<Notify>,
}

/// Store adapter that counts calls and can pause or slow them down.
#[derive(Debug, Default)]
pub struct CountingStore {
    inner: InMemoryAttributeStore,
    find_calls: AtomicUsize,
    find_keys_calls: AtomicUsize,
    find_all_calls: AtomicUsize,
    save_calls: AtomicUsize,
    remove_calls: AtomicUsize,
    cascade_calls: AtomicUsize,
    find_keys_requests: Mutex<Vec<Vec<String>>>,
    read_delay: Mutex<Option<Duration>>,
    remove_gate: Mutex<Option<RemoveGate>>,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps a store that does not version its writes.
    pub fn unversioned() -> Self {
        Self {
            inner: InMemoryAttributeStore::unversioned(),
            ..Self::default()
        }
    }

    pub fn inner(&self) -> &InMemoryAttributeStore {
        &self.inner
    }

    pub fn find_calls(&self) -> usize {
        self.find_calls.load(Ordering::SeqCst)
    }

    pub fn find_keys_calls(&self) -> usize {
        self.find_keys_calls.load(Ordering::SeqCst)
    }

    pub fn find_all_calls(&self) -> usize {
        self.find_all_calls.load(Ordering::SeqCst)
    }

    pub fn save_calls(&self) -> usize {
        self.save_calls.load(Ordering::SeqCst)
    }

    pub fn remove_calls(&self) -> usize {
        self.remove_calls.load(Ordering::SeqCst)
    }

    pub fn cascade_calls(&self) -> usize {
        self.cascade_calls.load(Ordering::SeqCst)
    }

    /// Every key list passed to `find_keys`, in call order.
    pub fn find_keys_requests(&self) -> Vec<Vec<String>> {
        lock(&self.find_keys_requests).clone()
    }

    /// Hold each `find` and `find_keys` result for `delay` before answering,
    /// so the answer can be stale by the time it arrives.
    pub fn set_read_delay(&self, delay: Duration) {
        *lock(&self.read_delay) = Some(delay);
    }

    /// Pause the next `remove_all` after its delete and before it returns.
    pub fn gate_next_remove(&self) -> RemoveGate {
        let gate = RemoveGate::default();
        *lock(&self.remove_gate) = Some(gate.clone());
        gate
    }

    async fn read_pause(&self) {
        let delay = *lock(&self.read_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl AttributeStore for CountingStore {
    async fn find(
        &self,
        tenant_id: TenantId,
        entity_id: EntityId,
        scope: AttributeScope,
        key: &str,
    ) -> Result<Option<AttributeValue>, StoreError> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        let found = self.inner.find(tenant_id, entity_id, scope, key).await;
        self.read_pause().await;
        found
    }

    async fn find_keys(
        &self,
        tenant_id: TenantId,
        entity_id: EntityId,
        scope: AttributeScope,
        keys: &[String],
    ) -> Result<Vec<AttributeValue>, StoreError> {
        self.find_keys_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.find_keys_requests).push(keys.to_vec());
        let found = self.inner.find_keys(tenant_id, entity_id, scope, keys).await;
        self.read_pause().await;
        found
    }

    async fn find_all(
        &self,
        tenant_id: TenantId,
        entity_id: EntityId,
        scope: AttributeScope,
    ) -> Result<Vec<AttributeValue>, StoreError> {
        self.find_all_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.find_all(tenant_id, entity_id, scope).await
    }

    async fn find_all_keys_by_entities(
        &self,
        tenant_id: TenantId,
        entity_ids: &[EntityId],
    ) -> Result<Vec<String>, StoreError> {
        self.inner.find_all_keys_by_entities(tenant_id, entity_ids).await
    }

    async fn save(
        &self,
        tenant_id: TenantId,
        entity_id: EntityId,
        scope: AttributeScope,
        value: &AttributeValue,
    ) -> Result<Option<i64>, StoreError> {
        self.save_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.save(tenant_id, entity_id, scope, value).await
    }

    async fn remove_all(
        &self,
        tenant_id: TenantId,
        entity_id: EntityId,
        scope: AttributeScope,
        keys: &[String],
    ) -> Result<Vec<(String, Option<i64>)>, StoreError> {
        self.remove_calls.fetch_add(1, Ordering::SeqCst);
        let removed = self.inner.remove_all(tenant_id, entity_id, scope, keys).await?;
        let gate = lock(&self.remove_gate).take();
        if let Some(gate) = gate {
            gate.deleted.notify_one();
            gate.release.notified().await;
        }
        Ok(removed)
    }

    async fn remove_all_by_entity(
        &self,
        tenant_id: TenantId,
        entity_id: EntityId,
    ) -> Result<Vec<(AttributeScope, String)>, StoreError> {
        self.cascade_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.remove_all_by_entity(tenant_id, entity_id).await
    }
}

// ============================================================================
// FAILING STORE
// ============================================================================

/// Store whose every call fails with the configured error.
#[derive(Debug, Clone)]
pub struct FailingStore {
    error: StoreError,
}

impl FailingStore {
    pub fn new(error: StoreError) -> Self {
        Self { error }
    }

    pub fn unavailable() -> Self {
        Self::new(StoreError::Unavailable {
            reason: "store offline".to_string(),
        })
    }
}

#[async_trait]
impl AttributeStore for FailingStore {
    async fn find(
        &self,
        _tenant_id: TenantId,
        _entity_id: EntityId,
        _scope: AttributeScope,
        _key: &str,
    ) -> Result<Option<AttributeValue>, StoreError> {
        Err(self.error.clone())
    }

    async fn find_keys(
        &self,
        _tenant_id: TenantId,
        _entity_id: EntityId,
        _scope: AttributeScope,
        _keys: &[String],
    ) -> Result<Vec<AttributeValue>, StoreError> {
        Err(self.error.clone())
    }

    async fn find_all(
        &self,
        _tenant_id: TenantId,
        _entity_id: EntityId,
        _scope: AttributeScope,
    ) -> Result<Vec<AttributeValue>, StoreError> {
        Err(self.error.clone())
    }

    async fn find_all_keys_by_entities(
        &self,
        _tenant_id: TenantId,
        _entity_ids: &[EntityId],
    ) -> Result<Vec<String>, StoreError> {
        Err(self.error.clone())
    }

    async fn save(
        &self,
        _tenant_id: TenantId,
        _entity_id: EntityId,
        _scope: AttributeScope,
        _value: &AttributeValue,
    ) -> Result<Option<i64>, StoreError> {
        Err(self.error.clone())
    }

    async fn remove_all(
        &self,
        _tenant_id: TenantId,
        _entity_id: EntityId,
        _scope: AttributeScope,
        _keys: &[String],
    ) -> Result<Vec<(String, Option<i64>)>, StoreError> {
        Err(self.error.clone())
    }

    async fn remove_all_by_entity(
        &self,
        _tenant_id: TenantId,
        _entity_id: EntityId,
    ) -> Result<Vec<(AttributeScope, String)>, StoreError> {
        Err(self.error.clone())
    }
}

// ============================================================================
// FAILING CACHE
// ============================================================================

/// Local cache that fails reads, writes, or both.
///
/// Writes are `put`, `evict` and `evict_version`. Calls that do not fail
/// reach the wrapped cache.
#[derive(Debug, Default)]
pub struct FailingCache {
    inner: LocalVersionedCache<AttributeKey, AttributeValue>,
    fail_reads: bool,
    fail_writes: bool,
    fail_puts: bool,
    failures: AtomicUsize,
}

impl FailingCache {
    pub fn new(fail_reads: bool, fail_writes: bool) -> Self {
        Self {
            fail_reads,
            fail_writes,
            ..Self::default()
        }
    }

    pub fn unavailable() -> Self {
        Self::new(true, true)
    }

    pub fn failing_reads() -> Self {
        Self::new(true, false)
    }

    pub fn failing_writes() -> Self {
        Self::new(false, true)
    }

    /// Refuses puts only; reads and evictions reach the inner cache.
    pub fn failing_puts() -> Self {
        Self {
            fail_puts: true,
            ..Self::default()
        }
    }

    pub fn inner(&self) -> &LocalVersionedCache<AttributeKey, AttributeValue> {
        &self.inner
    }

    /// Number of calls that returned an error.
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    fn fail(&self, operation: &str) -> CacheError {
        self.failures.fetch_add(1, Ordering::SeqCst);
        CacheError::Backend {
            reason: format!("{} refused by test cache", operation),
        }
    }
}

#[async_trait]
impl VersionedCache<AttributeKey, AttributeValue> for FailingCache {
    async fn get(
        &self,
        key: &AttributeKey,
    ) -> Result<Option<CachedValue<AttributeValue>>, CacheError> {
        if self.fail_reads {
            return Err(self.fail("get"));
        }
        self.inner.get(key).await
    }

    async fn put(
        &self,
        key: AttributeKey,
        value: Option<AttributeValue>,
    ) -> Result<PutOutcome, CacheError> {
        if self.fail_writes || self.fail_puts {
            return Err(self.fail("put"));
        }
        self.inner.put(key, value).await
    }

    async fn evict(&self, key: &AttributeKey) -> Result<(), CacheError> {
        if self.fail_writes {
            return Err(self.fail("evict"));
        }
        self.inner.evict(key).await
    }

    async fn evict_version(
        &self,
        key: &AttributeKey,
        version: i64,
    ) -> Result<EvictOutcome, CacheError> {
        if self.fail_writes {
            return Err(self.fail("evict_version"));
        }
        self.inner.evict_version(key, version).await
    }
}

// ============================================================================
// RECORDING SINK
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub kind: ChangeKind,
    pub tenant_id: TenantId,
    pub object_type: ObjectType,
    pub record: AttributeRecord,
}

/// Change sink that keeps every notification in arrival order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Notification> {
        lock(&self.events).clone()
    }

    pub fn updates(&self) -> Vec<AttributeRecord> {
        self.records(ChangeKind::Update)
    }

    pub fn deletes(&self) -> Vec<AttributeRecord> {
        self.records(ChangeKind::Delete)
    }

    fn records(&self, kind: ChangeKind) -> Vec<AttributeRecord> {
        lock(&self.events)
            .iter()
            .filter(|event| event.kind == kind)
            .map(|event| event.record.clone())
            .collect()
    }

    fn push(
        &self,
        kind: ChangeKind,
        tenant_id: TenantId,
        object_type: ObjectType,
        record: AttributeRecord,
    ) {
        lock(&self.events).push(Notification {
            kind,
            tenant_id,
            object_type,
            record,
        });
    }
}

impl ChangeSink for RecordingSink {
    fn on_update(&self, tenant_id: TenantId, object_type: ObjectType, record: AttributeRecord) {
        self.push(ChangeKind::Update, tenant_id, object_type, record);
    }

    fn on_delete(&self, tenant_id: TenantId, object_type: ObjectType, record: AttributeRecord) {
        self.push(ChangeKind::Delete, tenant_id, object_type, record);
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating test data.

    use super::*;
    use proptest::prelude::*;
    use tessera_storage::MAX_TIMESTAMP;
    use uuid::Uuid;

    /// Generate a random UUID.
    pub fn arb_uuid() -> impl Strategy<Value = Uuid> {
        any::<[u8; 16]>().prop_map(Uuid::from_bytes)
    }

    pub fn arb_tenant_id() -> impl Strategy<Value = TenantId> {
        arb_uuid().prop_map(TenantId::new)
    }

    pub fn arb_entity_type() -> impl Strategy<Value = EntityType> {
        (0..EntityType::ALL.len()).prop_map(|i| EntityType::ALL[i])
    }

    /// Non-nil entity id of any type.
    pub fn arb_entity_id() -> impl Strategy<Value = EntityId> {
        (arb_entity_type(), arb_uuid())
            .prop_filter("nil entity", |(_, id)| !id.is_nil())
            .prop_map(|(entity_type, id)| EntityId::new(entity_type, id))
    }

    pub fn arb_scope() -> impl Strategy<Value = AttributeScope> {
        prop_oneof![
            Just(AttributeScope::Client),
            Just(AttributeScope::Server),
            Just(AttributeScope::Shared),
        ]
    }

    /// Attribute names that pass validation.
    pub fn arb_valid_key() -> impl Strategy<Value = String> {
        "[a-z][a-zA-Z0-9_.]{0,31}"
    }

    pub fn arb_timestamp() -> impl Strategy<Value = i64> {
        1i64..=MAX_TIMESTAMP
    }

    /// Strings free of the codec separator and free of markup.
    pub fn arb_text() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9 _.,-]{0,40}"
    }

    pub fn arb_kv_value() -> impl Strategy<Value = KvValue> {
        prop_oneof![
            any::<bool>().prop_map(KvValue::Boolean),
            arb_text().prop_map(KvValue::String),
            (-1.0e12f64..1.0e12f64).prop_map(KvValue::Double),
            any::<i64>().prop_map(KvValue::Long),
            (arb_text(), any::<i32>())
                .prop_map(|(s, n)| KvValue::Json(format!("{{\"label\":\"{}\",\"n\":{}}}", s, n))),
        ]
    }

    /// Unsaved attribute value; `version` is `None`.
    pub fn arb_attribute_value() -> impl Strategy<Value = AttributeValue> {
        (arb_valid_key(), arb_kv_value(), arb_timestamp())
            .prop_map(|(key, value, ts)| AttributeValue::new(key, value, ts))
    }

    /// Attribute value carrying a store version.
    pub fn arb_versioned_value() -> impl Strategy<Value = AttributeValue> {
        (arb_attribute_value(), 1i64..1_000_000)
            .prop_map(|(value, version)| value.with_version(Some(version)))
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-wired services and sample data for common scenarios.

    use super::*;
    use prometheus::Registry;
    use tessera_core::ExecutorSettings;
    use tessera_storage::{AttributeCodec, CacheMetrics, Executors};
    use tokio::runtime::Handle;
    use uuid::Uuid;

    pub type LocalCache = LocalVersionedCache<AttributeKey, AttributeValue>;

    /// A service together with handles to everything it was built from.
    pub struct Harness<C>
    where
        C: VersionedCache<AttributeKey, AttributeValue>,
    {
        pub service: AttributeCacheService<CountingStore, C>,
        pub store: Arc<CountingStore>,
        pub cache: Arc<C>,
        pub sink: Arc<RecordingSink>,
        pub registry: Registry,
        pub tenant: TenantId,
        pub entity: EntityId,
    }

    pub fn tenant() -> TenantId {
        TenantId::new(Uuid::new_v4())
    }

    pub fn device() -> EntityId {
        EntityId::device(Uuid::new_v4())
    }

    pub fn temperature(value: f64) -> AttributeValue {
        AttributeValue::double("temperature", value, 1_700_000_000_000)
    }

    pub fn firmware(version: &str) -> AttributeValue {
        AttributeValue::string("firmware", version, 1_700_000_000_000)
    }

    pub fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    /// Service over `cache` with the executors of `topology`.
    ///
    /// Must be called inside a tokio runtime.
    pub fn harness_with<C>(
        store: CountingStore,
        cache: Arc<C>,
        topology: CacheTopology,
    ) -> Harness<C>
    where
        C: VersionedCache<AttributeKey, AttributeValue>,
    {
        let store = Arc::new(store);
        let sink = Arc::new(RecordingSink::new());
        let registry = Registry::new();
        let executors = Executors::for_topology(
            topology,
            &ExecutorSettings {
                store_pool_size: 8,
                cache_pool_size: 4,
            },
            Handle::current(),
        );
        let metrics = CacheMetrics::new(&registry).expect("metrics should register");
        let service = AttributeCacheService::new(Arc::clone(&store), Arc::clone(&cache), executors, metrics)
            .with_sink(sink.clone());
        Harness {
            service,
            store,
            cache,
            sink,
            registry,
            tenant: tenant(),
            entity: device(),
        }
    }

    /// Local topology over a versioned in-memory store.
    pub fn local_harness() -> Harness<LocalCache> {
        harness_with(
            CountingStore::new(),
            Arc::new(LocalVersionedCache::new()),
            CacheTopology::Local,
        )
    }

    /// Remote topology over the given byte store, with the pooled cache
    /// executor.
    pub fn remote_harness(
        bytes: Arc<dyn ByteStore>,
        format: WireFormat,
    ) -> Harness<RemoteVersionedCache> {
        let cache = RemoteVersionedCache::new(
            bytes,
            AttributeCodec::new(format),
            Arc::new(InMemoryKeyDictionary::new()),
        );
        harness_with(CountingStore::new(), Arc::new(cache), CacheTopology::Remote)
    }
}
