//! Error types for Tessera operations

use thiserror::Error;

/// Malformed keys or values, rejected before touching store or cache.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Type mismatch for {key}: declared {declared}, payload is {actual}")]
    TypeMismatch {
        key: String,
        declared: String,
        actual: String,
    },

    #[error("Unsafe content rejected in {field}")]
    UnsafeContent { field: String },
}

/// Failures reported by the persistent store. Never retried by the cache layer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store operation {operation} timed out")]
    Timeout { operation: String },

    #[error("Store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Constraint violation: {reason}")]
    ConstraintViolation { reason: String },

    #[error("Store lock poisoned")]
    LockPoisoned,
}

/// Failures of the cache tier. Absorbed by the service whenever the store
/// path can still complete.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Deserialization failed: {reason}")]
    Deserialization { reason: String },

    #[error("Cache backend error: {reason}")]
    Backend { reason: String },

    #[error("Unknown key id {key_id}")]
    UnknownKeyId { key_id: i32 },

    #[error("Cache lock poisoned")]
    LockPoisoned,
}

/// Internal bug class. Always surfaced, never swallowed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("Store returned unrequested key {key} from {operation}")]
    UnexpectedKey { operation: String, key: String },

    #[error("{operation} returned {actual} results for {expected} keys")]
    ResultCountMismatch {
        operation: String,
        expected: usize,
        actual: usize,
    },

    #[error("Task on {pool} pool failed: {reason}")]
    TaskFailed { pool: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Incompatible options: {option_a} and {option_b}")]
    IncompatibleOptions { option_a: String, option_b: String },

    #[error("Failed to read config file: {reason}")]
    Io { reason: String },

    #[error("Failed to parse config TOML: {reason}")]
    Parse { reason: String },
}

/// Master error type for all Tessera errors.
#[derive(Debug, Clone, Error)]
pub enum TesseraError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Invariant violation: {0}")]
    Invariant(#[from] InvariantViolation),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for Tessera operations.
pub type TesseraResult<T> = Result<T, TesseraError>;

// =============================================================================
// TESTS
// =============================================================================
