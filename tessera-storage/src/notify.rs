//! Change-notification sink port.
//!
//! The service reports every successful save and remove to a downstream
//! consumer (search index, entity query service). Delivery is fire-and-forget:
//! a sink never fails the operation that triggered it.

use tessera_core::{AttributeScope, AttributeValue, EntityId, TenantId};

/// Deletion version meaning "gone for good": cascade deletes and removals
/// whose version the store did not report.
pub const MAX_VERSION: i64 = i64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Attribute,
}

/// Payload of a change notification.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeRecord {
    pub entity_id: EntityId,
    pub scope: AttributeScope,
    pub key: String,
    /// Store version after the write, or at deletion. 0 for unversioned writes.
    pub version: i64,
    /// The saved value; `None` on deletions.
    pub value: Option<AttributeValue>,
}

impl AttributeRecord {
    pub fn updated(entity_id: EntityId, scope: AttributeScope, value: AttributeValue) -> Self {
        Self {
            entity_id,
            scope,
            key: value.key.clone(),
            version: value.version.unwrap_or(0),
            value: Some(value),
        }
    }

    pub fn deleted(
        entity_id: EntityId,
        scope: AttributeScope,
        key: impl Into<String>,
        version: Option<i64>,
    ) -> Self {
        Self {
            entity_id,
            scope,
            key: key.into(),
            version: version.unwrap_or(MAX_VERSION),
            value: None,
        }
    }
}

pub trait ChangeSink: Send + Sync + 'static {
    fn on_update(&self, tenant_id: TenantId, object_type: ObjectType, record: AttributeRecord);

    fn on_delete(&self, tenant_id: TenantId, object_type: ObjectType, record: AttributeRecord);
}

/// Sink for deployments without a downstream consumer.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopChangeSink;

impl ChangeSink for NoopChangeSink {
    fn on_update(&self, _tenant_id: TenantId, _object_type: ObjectType, _record: AttributeRecord) {}

    fn on_delete(&self, _tenant_id: TenantId, _object_type: ObjectType, _record: AttributeRecord) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_deleted_without_version_is_max() {
        let record = AttributeRecord::deleted(
            EntityId::device(Uuid::new_v4()),
            AttributeScope::Server,
            "fw",
            None,
        );
        assert_eq!(record.version, MAX_VERSION);
        assert!(record.value.is_none());
    }

    #[test]
    fn test_updated_carries_value_version() {
        let value = AttributeValue::long("n", 1, 1).with_version(Some(12));
        let record =
            AttributeRecord::updated(EntityId::device(Uuid::new_v4()), AttributeScope::Client, value);
        assert_eq!(record.key, "n");
        assert_eq!(record.version, 12);

        let unversioned = AttributeRecord::updated(
            EntityId::device(Uuid::new_v4()),
            AttributeScope::Client,
            AttributeValue::long("n", 1, 1),
        );
        assert_eq!(unversioned.version, 0);
    }
}
