//! Attribute cache service.
//!
//! Cache-aside reads, write-through saves and version-guarded removals over
//! an [`AttributeStore`] and a [`VersionedCache`].
//!
//! # Failure Policy
//!
//! - Store errors fail the operation and are never retried here.
//! - Cache errors never fail an operation whose store step succeeded. They
//!   are logged at `warn` and counted in [`CacheStats::cache_errors`]; a read
//!   whose cache lookup failed is treated as a miss. A save whose cache
//!   write failed evicts the key, so the next read goes to the store.
//! - Invariant violations are logged at `error` and always returned.
//!
//! # Ordering
//!
//! A cache write for a save happens only after the store acknowledged it,
//! and the change notification only after the cache write. Concurrent misses
//! for one key are not coalesced; each may query the store and write the
//! cache, and the cache write guard keeps the newest version.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use futures_util::future::try_join_all;
use prometheus::Registry;
use tessera_core::{
    AttributeKey, AttributeScope, AttributeValidator, AttributeValue, CacheError, EntityId,
    InvariantViolation, StoreError, TenantId, TesseraConfig, TesseraError, TesseraResult,
};
use tokio::runtime::Handle;
use tracing::{debug, error, warn};

use crate::cache::{AttributeCache, CachedValue, EvictOutcome, PutOutcome, VersionedCache};
use crate::dictionary::KeyDictionary;
use crate::executor::Executors;
use crate::metrics::{CacheMetrics, CacheStats};
use crate::notify::{AttributeRecord, ChangeSink, NoopChangeSink, ObjectType, MAX_VERSION};
use crate::store::AttributeStore;

pub struct AttributeCacheService<S, C = AttributeCache>
where
    S: AttributeStore,
    C: VersionedCache<AttributeKey, AttributeValue>,
{
    store: Arc<S>,
    cache: Arc<C>,
    sink: Arc<dyn ChangeSink>,
    executors: Executors,
    validator: AttributeValidator,
    metrics: CacheMetrics,
}

impl<S> AttributeCacheService<S, AttributeCache>
where
    S: AttributeStore,
{
    /// Wire the service from configuration. The cache topology is read once
    /// here and decides both the cache shape and the cache executor.
    pub fn from_config(
        config: &TesseraConfig,
        store: Arc<S>,
        dictionary: Arc<dyn KeyDictionary>,
        registry: &Registry,
        runtime: Handle,
    ) -> TesseraResult<Self> {
        config.validate()?;
        let cache = AttributeCache::from_settings(&config.cache, dictionary)?;
        let executors =
            Executors::for_topology(config.cache.topology, &config.executor, runtime);
        let metrics = CacheMetrics::new(registry)?;
        Ok(Self::new(store, Arc::new(cache), executors, metrics)
            .with_validator(AttributeValidator::new(&config.validation)))
    }
}

impl<S, C> AttributeCacheService<S, C>
where
    S: AttributeStore,
    C: VersionedCache<AttributeKey, AttributeValue>,
{
    pub fn new(store: Arc<S>, cache: Arc<C>, executors: Executors, metrics: CacheMetrics) -> Self {
        Self {
            store,
            cache,
            sink: Arc::new(NoopChangeSink),
            executors,
            validator: AttributeValidator::default(),
            metrics,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ChangeSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_validator(mut self, validator: AttributeValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<C> {
        &self.cache
    }

    pub fn stats(&self) -> CacheStats {
        self.metrics.snapshot()
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Single-key cache-aside read. A cached tombstone answers `None`
    /// without touching the store.
    pub async fn find(
        &self,
        tenant_id: TenantId,
        entity_id: EntityId,
        scope: AttributeScope,
        key: &str,
    ) -> TesseraResult<Option<AttributeValue>> {
        self.validator.validate_key(&entity_id, key)?;
        let attr_key = AttributeKey::new(scope, entity_id, key);

        if let Some(cached) = self.cache_get(&attr_key).await? {
            self.metrics.hits.inc();
            debug!(entity_id = %entity_id, scope = %scope, key, tombstone = cached.is_tombstone(), "Attribute cache hit");
            return Ok(cached.into_value());
        }
        self.metrics.misses.inc();
        debug!(entity_id = %entity_id, scope = %scope, key, "Attribute cache miss");

        let owned_key = key.to_string();
        let found = self
            .with_store(move |store| async move {
                store.find(tenant_id, entity_id, scope, &owned_key).await
            })
            .await?;
        self.cache_put(attr_key, found.clone()).await?;
        Ok(found)
    }

    /// Batch read with partial-hit merge.
    ///
    /// Requested keys are de-duplicated in first-seen order. Cache misses are
    /// resolved with one store call; keys the store does not return are
    /// cached as tombstones. Output follows request order and omits absent
    /// keys.
    pub async fn find_many(
        &self,
        tenant_id: TenantId,
        entity_id: EntityId,
        scope: AttributeScope,
        keys: &[String],
    ) -> TesseraResult<Vec<AttributeValue>> {
        for key in keys {
            self.validator.validate_key(&entity_id, key)?;
        }
        let mut seen = HashSet::with_capacity(keys.len());
        let unique: Vec<AttributeKey> = keys
            .iter()
            .filter(|key| seen.insert(key.as_str()))
            .map(|key| AttributeKey::new(scope, entity_id, key.as_str()))
            .collect();

        let cached = self.cache_get_many(entity_id, scope, &unique).await?;
        let mut resolved: HashMap<String, Option<AttributeValue>> =
            HashMap::with_capacity(unique.len());
        let mut missed: Vec<String> = Vec::new();
        for (attr_key, entry) in unique.iter().zip(cached) {
            match entry {
                Some(entry) => {
                    resolved.insert(attr_key.key().to_string(), entry.into_value());
                }
                None => missed.push(attr_key.key().to_string()),
            }
        }
        let hit_count = (unique.len() - missed.len()) as u64;
        self.metrics.hits.inc_by(hit_count);
        self.metrics.misses.inc_by(missed.len() as u64);
        debug!(
            entity_id = %entity_id,
            scope = %scope,
            hits = hit_count,
            misses = missed.len(),
            "Attribute batch lookup"
        );

        if !missed.is_empty() {
            let request = missed.clone();
            let found = self
                .with_store(move |store| async move {
                    store.find_keys(tenant_id, entity_id, scope, &request).await
                })
                .await?;

            let mut from_store: HashMap<String, AttributeValue> =
                HashMap::with_capacity(found.len());
            for value in found {
                if !missed.contains(&value.key) {
                    return Err(self.invariant(InvariantViolation::UnexpectedKey {
                        operation: "find_keys".to_string(),
                        key: value.key,
                    }));
                }
                from_store.insert(value.key.clone(), value);
            }

            let puts = missed.iter().map(|key| {
                let value = from_store.get(key).cloned();
                self.cache_put(AttributeKey::new(scope, entity_id, key.as_str()), value)
            });
            try_join_all(puts).await?;

            for key in missed {
                let value = from_store.remove(&key);
                resolved.insert(key, value);
            }
        }

        Ok(unique
            .iter()
            .filter_map(|attr_key| resolved.remove(attr_key.key()).flatten())
            .collect())
    }

    /// Every attribute of the entity in `scope`. Always read from the store;
    /// the result does not populate the cache.
    pub async fn find_all(
        &self,
        tenant_id: TenantId,
        entity_id: EntityId,
        scope: AttributeScope,
    ) -> TesseraResult<Vec<AttributeValue>> {
        self.validator.validate_entity(&entity_id)?;
        self.with_store(move |store| async move {
            store.find_all(tenant_id, entity_id, scope).await
        })
        .await
    }

    /// Distinct attribute names across the given entities. Store-direct.
    pub async fn find_all_keys_by_entities(
        &self,
        tenant_id: TenantId,
        entity_ids: &[EntityId],
    ) -> TesseraResult<Vec<String>> {
        for entity_id in entity_ids {
            self.validator.validate_entity(entity_id)?;
        }
        let entity_ids = entity_ids.to_vec();
        self.with_store(move |store| async move {
            store.find_all_keys_by_entities(tenant_id, &entity_ids).await
        })
        .await
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Write-through save: store, then cache, then notification.
    pub async fn save(
        &self,
        tenant_id: TenantId,
        entity_id: EntityId,
        scope: AttributeScope,
        value: AttributeValue,
    ) -> TesseraResult<Option<i64>> {
        self.validator.validate_key(&entity_id, &value.key)?;
        self.validator.validate_value(&value)?;
        self.save_validated(tenant_id, entity_id, scope, value).await
    }

    /// Batch save. Every value is validated before any is written; results
    /// follow input order.
    pub async fn save_all(
        &self,
        tenant_id: TenantId,
        entity_id: EntityId,
        scope: AttributeScope,
        values: Vec<AttributeValue>,
    ) -> TesseraResult<Vec<Option<i64>>> {
        for value in &values {
            self.validator.validate_key(&entity_id, &value.key)?;
            self.validator.validate_value(value)?;
        }
        try_join_all(
            values
                .into_iter()
                .map(|value| self.save_validated(tenant_id, entity_id, scope, value)),
        )
        .await
    }

    async fn save_validated(
        &self,
        tenant_id: TenantId,
        entity_id: EntityId,
        scope: AttributeScope,
        value: AttributeValue,
    ) -> TesseraResult<Option<i64>> {
        let to_store = value.clone();
        let version = self
            .with_store(move |store| async move {
                store.save(tenant_id, entity_id, scope, &to_store).await
            })
            .await?;

        let saved = value.with_version(version);
        let attr_key = AttributeKey::new(scope, entity_id, saved.key.as_str());
        self.write_through(attr_key, saved.clone()).await?;
        self.sink.on_update(
            tenant_id,
            ObjectType::Attribute,
            AttributeRecord::updated(entity_id, scope, saved),
        );
        Ok(version)
    }

    /// Delete keys, then evict each one guarded by its deletion version.
    ///
    /// A concurrent save that cached a newer version after the store delete
    /// keeps its entry. Keys whose deletion version is unknown are evicted
    /// unconditionally. Returns the removed keys.
    pub async fn remove_all(
        &self,
        tenant_id: TenantId,
        entity_id: EntityId,
        scope: AttributeScope,
        keys: &[String],
    ) -> TesseraResult<Vec<String>> {
        for key in keys {
            self.validator.validate_key(&entity_id, key)?;
        }
        let request = keys.to_vec();
        let removed = self
            .with_store(move |store| async move {
                store.remove_all(tenant_id, entity_id, scope, &request).await
            })
            .await?;

        if let Some((key, _)) = removed.iter().find(|(key, _)| !keys.contains(key)) {
            return Err(self.invariant(InvariantViolation::UnexpectedKey {
                operation: "remove_all".to_string(),
                key: key.clone(),
            }));
        }

        try_join_all(removed.iter().map(|(key, version)| {
            self.cache_evict(AttributeKey::new(scope, entity_id, key.as_str()), *version)
        }))
        .await?;

        let mut removed_keys = Vec::with_capacity(removed.len());
        for (key, version) in removed {
            self.sink.on_delete(
                tenant_id,
                ObjectType::Attribute,
                AttributeRecord::deleted(entity_id, scope, key.as_str(), version),
            );
            removed_keys.push(key);
        }
        Ok(removed_keys)
    }

    /// Cascade delete for a removed entity. Every removed attribute is
    /// evicted unconditionally and produces one deletion notification.
    /// Returns the number of attributes removed.
    pub async fn remove_all_by_entity(
        &self,
        tenant_id: TenantId,
        entity_id: EntityId,
    ) -> TesseraResult<usize> {
        self.validator.validate_entity(&entity_id)?;
        let removed = self
            .with_store(move |store| async move {
                store.remove_all_by_entity(tenant_id, entity_id).await
            })
            .await?;

        try_join_all(
            removed
                .iter()
                .map(|(scope, key)| self.cache_evict(AttributeKey::new(*scope, entity_id, key.as_str()), None)),
        )
        .await?;

        for (scope, key) in &removed {
            self.sink.on_delete(
                tenant_id,
                ObjectType::Attribute,
                AttributeRecord::deleted(entity_id, *scope, key.as_str(), Some(MAX_VERSION)),
            );
        }
        debug!(entity_id = %entity_id, removed = removed.len(), "Entity attributes removed");
        Ok(removed.len())
    }

    // ========================================================================
    // DISPATCH
    // ========================================================================

    async fn with_store<T, F, Fut>(&self, call: F) -> TesseraResult<T>
    where
        F: FnOnce(Arc<S>) -> Fut,
        Fut: Future<Output = Result<T, StoreError>> + Send + 'static,
        T: Send + 'static,
    {
        let task = call(Arc::clone(&self.store));
        let result = self
            .executors
            .store
            .run(task)
            .await
            .map_err(|violation| self.invariant(violation))?;
        Ok(result?)
    }

    /// Run a cache call on the cache executor. The inner result carries the
    /// cache failure for the caller to absorb.
    async fn with_cache<T, F, Fut>(&self, call: F) -> TesseraResult<Result<T, CacheError>>
    where
        F: FnOnce(Arc<C>) -> Fut,
        Fut: Future<Output = Result<T, CacheError>> + Send + 'static,
        T: Send + 'static,
    {
        let task = call(Arc::clone(&self.cache));
        self.executors
            .cache
            .run(task)
            .await
            .map_err(|violation| self.invariant(violation))
    }

    async fn cache_get(
        &self,
        attr_key: &AttributeKey,
    ) -> TesseraResult<Option<CachedValue<AttributeValue>>> {
        let key = attr_key.clone();
        match self
            .with_cache(move |cache| async move { cache.get(&key).await })
            .await?
        {
            Ok(found) => Ok(found),
            Err(e) => {
                self.absorb_cache_error("get", attr_key.entity_id(), attr_key.scope(), attr_key.key(), &e);
                Ok(None)
            }
        }
    }

    async fn cache_get_many(
        &self,
        entity_id: EntityId,
        scope: AttributeScope,
        keys: &[AttributeKey],
    ) -> TesseraResult<Vec<Option<CachedValue<AttributeValue>>>> {
        let request = keys.to_vec();
        match self
            .with_cache(move |cache| async move { cache.get_many(&request).await })
            .await?
        {
            Ok(found) if found.len() == keys.len() => Ok(found),
            Ok(found) => Err(self.invariant(InvariantViolation::ResultCountMismatch {
                operation: "get_many".to_string(),
                expected: keys.len(),
                actual: found.len(),
            })),
            Err(e) => {
                self.absorb_cache_error("get_many", entity_id, scope, "*", &e);
                Ok(vec![None; keys.len()])
            }
        }
    }

    /// Cache a freshly saved value. If the put fails, the entry is dropped
    /// instead so that an older cached version cannot outlive the save.
    async fn write_through(
        &self,
        attr_key: AttributeKey,
        saved: AttributeValue,
    ) -> TesseraResult<()> {
        if self.cache_put(attr_key.clone(), Some(saved)).await? {
            return Ok(());
        }
        let key = attr_key.clone();
        if let Err(e) = self
            .with_cache(move |cache| async move { cache.evict(&key).await })
            .await?
        {
            self.absorb_cache_error(
                "evict",
                attr_key.entity_id(),
                attr_key.scope(),
                attr_key.key(),
                &e,
            );
        }
        Ok(())
    }

    /// Returns `false` when the cache refused the write.
    async fn cache_put(
        &self,
        attr_key: AttributeKey,
        value: Option<AttributeValue>,
    ) -> TesseraResult<bool> {
        let key = attr_key.clone();
        let version = value.as_ref().and_then(|v| v.version);
        match self
            .with_cache(move |cache| async move { cache.put(key, value).await })
            .await?
        {
            Ok(PutOutcome::Stored) => {}
            Ok(PutOutcome::SkippedNewer) => {
                self.metrics.skipped_writes.inc();
                debug!(
                    entity_id = %attr_key.entity_id(),
                    scope = %attr_key.scope(),
                    key = attr_key.key(),
                    version = ?version,
                    "Cache write skipped, newer version cached"
                );
            }
            Err(e) => {
                self.absorb_cache_error("put", attr_key.entity_id(), attr_key.scope(), attr_key.key(), &e);
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn cache_evict(&self, attr_key: AttributeKey, version: Option<i64>) -> TesseraResult<()> {
        let key = attr_key.clone();
        let outcome = match version {
            Some(version) => {
                self.with_cache(move |cache| async move { cache.evict_version(&key, version).await })
                    .await?
            }
            None => {
                self.with_cache(move |cache| async move {
                    cache.evict(&key).await.map(|()| EvictOutcome::Evicted)
                })
                .await?
            }
        };
        match outcome {
            Ok(EvictOutcome::Evicted) | Ok(EvictOutcome::Absent) => {}
            Ok(EvictOutcome::SkippedNewer) => {
                self.metrics.skipped_evictions.inc();
                debug!(
                    entity_id = %attr_key.entity_id(),
                    scope = %attr_key.scope(),
                    key = attr_key.key(),
                    version = ?version,
                    "Eviction skipped, newer version cached"
                );
            }
            Err(e) => self.absorb_cache_error(
                "evict",
                attr_key.entity_id(),
                attr_key.scope(),
                attr_key.key(),
                &e,
            ),
        }
        Ok(())
    }

    fn absorb_cache_error(
        &self,
        operation: &'static str,
        entity_id: EntityId,
        scope: AttributeScope,
        key: &str,
        error: &CacheError,
    ) {
        self.metrics.cache_errors.inc();
        warn!(
            operation,
            entity_id = %entity_id,
            scope = %scope,
            key,
            error = %error,
            "Attribute cache call failed, serving store result"
        );
    }

    fn invariant(&self, violation: InvariantViolation) -> TesseraError {
        error!(error = %violation, "Attribute service invariant violated");
        violation.into()
    }
}
