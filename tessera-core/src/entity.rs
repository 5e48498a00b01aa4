//! Owning-entity identity types.
//!
//! An attribute always belongs to exactly one entity (device, asset, tenant,
//! ...). The entity is identified by a type tag plus a UUID.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Entity type discriminator for polymorphic owner references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Tenant,
    Customer,
    User,
    Device,
    DeviceProfile,
    Asset,
    AssetProfile,
    EntityView,
    Edge,
    Dashboard,
    RuleChain,
}

impl EntityType {
    /// All entity types, in discriminant order.
    pub const ALL: [EntityType; 11] = [
        EntityType::Tenant,
        EntityType::Customer,
        EntityType::User,
        EntityType::Device,
        EntityType::DeviceProfile,
        EntityType::Asset,
        EntityType::AssetProfile,
        EntityType::EntityView,
        EntityType::Edge,
        EntityType::Dashboard,
        EntityType::RuleChain,
    ];

    /// Single-byte discriminant used by binary key encodings.
    pub fn as_byte(self) -> u8 {
        match self {
            EntityType::Tenant => 0,
            EntityType::Customer => 1,
            EntityType::User => 2,
            EntityType::Device => 3,
            EntityType::DeviceProfile => 4,
            EntityType::Asset => 5,
            EntityType::AssetProfile => 6,
            EntityType::EntityView => 7,
            EntityType::Edge => 8,
            EntityType::Dashboard => 9,
            EntityType::RuleChain => 10,
        }
    }

    /// Convert a byte back to an entity type.
    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::ALL.get(byte as usize).copied()
    }

    fn as_str(self) -> &'static str {
        match self {
            EntityType::Tenant => "TENANT",
            EntityType::Customer => "CUSTOMER",
            EntityType::User => "USER",
            EntityType::Device => "DEVICE",
            EntityType::DeviceProfile => "DEVICE_PROFILE",
            EntityType::Asset => "ASSET",
            EntityType::AssetProfile => "ASSET_PROFILE",
            EntityType::EntityView => "ENTITY_VIEW",
            EntityType::Edge => "EDGE",
            EntityType::Dashboard => "DASHBOARD",
            EntityType::RuleChain => "RULE_CHAIN",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown entity type: {}", s))
    }
}

/// Identity of an attribute owner: type tag plus UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId {
    entity_type: EntityType,
    id: Uuid,
}

impl EntityId {
    pub fn new(entity_type: EntityType, id: Uuid) -> Self {
        Self { entity_type, id }
    }

    /// Shorthand for a device-owned entity id.
    pub fn device(id: Uuid) -> Self {
        Self::new(EntityType::Device, id)
    }

    /// Shorthand for an asset-owned entity id.
    pub fn asset(id: Uuid) -> Self {
        Self::new(EntityType::Asset, id)
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The nil UUID never identifies a real entity.
    pub fn is_nil(&self) -> bool {
        self.id.is_nil()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.id)
    }
}

/// Tenant that owns the entity; carried through to change notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(Uuid);

impl TenantId {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// The system tenant (nil UUID), used for platform-level entities.
    pub fn system() -> Self {
        Self(Uuid::nil())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// The tenant viewed as an owning entity.
    pub fn as_entity(&self) -> EntityId {
        EntityId::new(EntityType::Tenant, self.0)
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
