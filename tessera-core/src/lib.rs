//! Tessera Core - Attribute Types
//!
//! Data model, error taxonomy, configuration and validation for the
//! attribute cache. No I/O lives here; the storage crate depends on this one.

pub mod attribute;
pub mod config;
pub mod entity;
pub mod error;
pub mod validation;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use attribute::{AttributeKey, AttributeScope, AttributeValue, DataType, KvValue};
pub use config::{
    CacheSettings, CacheTopology, ExecutorSettings, RemoteCacheSettings, TesseraConfig,
    ValidationSettings, WireFormat, DEFAULT_MAX_KEY_LENGTH,
};
pub use entity::{EntityId, EntityType, TenantId};
pub use error::{
    CacheError, ConfigError, InvariantViolation, StoreError, TesseraError, TesseraResult,
    ValidationError,
};
pub use validation::AttributeValidator;
