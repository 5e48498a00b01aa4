//! Cache observability counters.
//!
//! Counters are registered on a caller-supplied Prometheus registry so the
//! embedding service decides how they are exported.

use prometheus::{IntCounter, Registry};
use tessera_core::ConfigError;

#[derive(Clone)]
pub struct CacheMetrics {
    /// Lookups answered by the cache, tombstones included.
    pub hits: IntCounter,
    /// Lookups that had to go to the store.
    pub misses: IntCounter,
    /// Cache failures absorbed by the service.
    pub cache_errors: IntCounter,
    /// Puts skipped because the cache held a newer version.
    pub skipped_writes: IntCounter,
    /// Versioned evictions skipped because the cache held a newer version.
    pub skipped_evictions: IntCounter,
}

impl CacheMetrics {
    /// Create and register all counters on `registry`.
    pub fn new(registry: &Registry) -> Result<Self, ConfigError> {
        Ok(Self {
            hits: register(
                registry,
                "tessera_attribute_cache_hits_total",
                "Attribute lookups served from the cache",
            )?,
            misses: register(
                registry,
                "tessera_attribute_cache_misses_total",
                "Attribute lookups that reached the store",
            )?,
            cache_errors: register(
                registry,
                "tessera_attribute_cache_errors_total",
                "Cache failures absorbed by the attribute service",
            )?,
            skipped_writes: register(
                registry,
                "tessera_attribute_cache_skipped_writes_total",
                "Cache writes skipped in favour of a newer cached version",
            )?,
            skipped_evictions: register(
                registry,
                "tessera_attribute_cache_skipped_evictions_total",
                "Versioned evictions skipped in favour of a newer cached version",
            )?,
        })
    }

    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.get(),
            misses: self.misses.get(),
            cache_errors: self.cache_errors.get(),
            skipped_writes: self.skipped_writes.get(),
            skipped_evictions: self.skipped_evictions.get(),
        }
    }
}

fn register(registry: &Registry, name: &str, help: &str) -> Result<IntCounter, ConfigError> {
    let failed = |e: prometheus::Error| ConfigError::InvalidValue {
        field: name.to_string(),
        reason: format!("Failed to register metric: {}", e),
    };
    let counter = IntCounter::new(name, help).map_err(failed)?;
    registry.register(Box::new(counter.clone())).map_err(failed)?;
    Ok(counter)
}

/// Point-in-time view of the cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub cache_errors: u64,
    pub skipped_writes: u64,
    pub skipped_evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
