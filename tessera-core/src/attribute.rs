//! Attribute record model: scope, key, typed value.

use crate::EntityId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Namespace an attribute lives in. Part of the attribute identity: the same
/// name under two scopes is two distinct records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AttributeScope {
    /// Reported and written by the device itself.
    #[serde(rename = "CLIENT_SCOPE")]
    Client,
    /// Written by the platform, not visible to the device.
    #[serde(rename = "SERVER_SCOPE")]
    Server,
    /// Written by the platform, pushed to the device.
    #[serde(rename = "SHARED_SCOPE")]
    Shared,
}

impl AttributeScope {
    pub const ALL: [AttributeScope; 3] = [
        AttributeScope::Client,
        AttributeScope::Server,
        AttributeScope::Shared,
    ];

    pub fn as_byte(self) -> u8 {
        match self {
            AttributeScope::Client => 1,
            AttributeScope::Server => 2,
            AttributeScope::Shared => 3,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(AttributeScope::Client),
            2 => Some(AttributeScope::Server),
            3 => Some(AttributeScope::Shared),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            AttributeScope::Client => "CLIENT_SCOPE",
            AttributeScope::Server => "SERVER_SCOPE",
            AttributeScope::Shared => "SHARED_SCOPE",
        }
    }
}

impl fmt::Display for AttributeScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttributeScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|scope| scope.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown attribute scope: {}", s))
    }
}

/// Union tag of an attribute value.
///
/// The numeric tag is part of the remote-cache wire format and must not be
/// renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataType {
    Boolean,
    String,
    Double,
    Long,
    Json,
}

impl DataType {
    pub const ALL: [DataType; 5] = [
        DataType::Boolean,
        DataType::String,
        DataType::Double,
        DataType::Long,
        DataType::Json,
    ];

    /// Wire-format discriminator.
    pub fn tag(self) -> u8 {
        match self {
            DataType::Boolean => 0,
            DataType::String => 1,
            DataType::Double => 2,
            DataType::Long => 3,
            DataType::Json => 4,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.get(tag as usize).copied()
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Boolean => "BOOLEAN",
            DataType::String => "STRING",
            DataType::Double => "DOUBLE",
            DataType::Long => "LONG",
            DataType::Json => "JSON",
        };
        f.write_str(name)
    }
}

/// Typed attribute payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KvValue {
    Boolean(bool),
    String(String),
    Double(f64),
    Long(i64),
    /// JSON document kept as text; parsed only for validation.
    Json(String),
}

impl KvValue {
    pub fn data_type(&self) -> DataType {
        match self {
            KvValue::Boolean(_) => DataType::Boolean,
            KvValue::String(_) => DataType::String,
            KvValue::Double(_) => DataType::Double,
            KvValue::Long(_) => DataType::Long,
            KvValue::Json(_) => DataType::Json,
        }
    }

    /// Render the payload as plain text.
    pub fn value_as_string(&self) -> String {
        match self {
            KvValue::Boolean(b) => b.to_string(),
            KvValue::String(s) | KvValue::Json(s) => s.clone(),
            KvValue::Double(d) => d.to_string(),
            KvValue::Long(l) => l.to_string(),
        }
    }
}

/// A single attribute as stored and cached.
///
/// `value` is `None` for the explicit "attribute exists but its typed value
/// is unset" marker. That is not a tombstone: tombstones live in the cache
/// layer and mean the attribute does not exist at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeValue {
    pub key: String,
    pub data_type: DataType,
    pub value: Option<KvValue>,
    /// Epoch millis, set by the writer.
    pub last_update_ts: i64,
    /// Store-assigned, monotonically increasing per attribute key.
    /// `None` for stores without versioning and for unsaved values.
    pub version: Option<i64>,
}

impl AttributeValue {
    pub fn new(key: impl Into<String>, value: KvValue, last_update_ts: i64) -> Self {
        Self {
            key: key.into(),
            data_type: value.data_type(),
            value: Some(value),
            last_update_ts,
            version: None,
        }
    }

    /// An attribute whose typed value is explicitly unset.
    pub fn unset(key: impl Into<String>, data_type: DataType, last_update_ts: i64) -> Self {
        Self {
            key: key.into(),
            data_type,
            value: None,
            last_update_ts,
            version: None,
        }
    }

    pub fn boolean(key: impl Into<String>, value: bool, ts: i64) -> Self {
        Self::new(key, KvValue::Boolean(value), ts)
    }

    pub fn string(key: impl Into<String>, value: impl Into<String>, ts: i64) -> Self {
        Self::new(key, KvValue::String(value.into()), ts)
    }

    pub fn double(key: impl Into<String>, value: f64, ts: i64) -> Self {
        Self::new(key, KvValue::Double(value), ts)
    }

    pub fn long(key: impl Into<String>, value: i64, ts: i64) -> Self {
        Self::new(key, KvValue::Long(value), ts)
    }

    pub fn json(key: impl Into<String>, value: impl Into<String>, ts: i64) -> Self {
        Self::new(key, KvValue::Json(value.into()), ts)
    }

    /// Same record, stamped with a store-assigned version.
    pub fn with_version(mut self, version: Option<i64>) -> Self {
        self.version = version;
        self
    }

    pub fn has_value(&self) -> bool {
        self.value.is_some()
    }

    pub fn value_as_string(&self) -> Option<String> {
        self.value.as_ref().map(KvValue::value_as_string)
    }
}

/// Identity of an attribute: `(scope, entity, name)`.
///
/// Used as the cache key and as the store's natural key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributeKey {
    scope: AttributeScope,
    entity_id: EntityId,
    key: String,
}

impl AttributeKey {
    pub fn new(scope: AttributeScope, entity_id: EntityId, key: impl Into<String>) -> Self {
        Self {
            scope,
            entity_id,
            key: key.into(),
        }
    }

    pub fn scope(&self) -> AttributeScope {
        self.scope
    }

    pub fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for AttributeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.entity_id, self.scope, self.key)
    }
}
