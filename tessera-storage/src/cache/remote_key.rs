//! Binary cache keys for the remote tier.
//!
//! # Binary Format
//!
//! Fixed 22 bytes:
//! - Byte 0: entity type discriminant
//! - Bytes 1-16: entity id (UUID bytes)
//! - Byte 17: attribute scope
//! - Bytes 18-21: key id from the key-name dictionary, big-endian
//!
//! The first 17 bytes identify the entity.

use tessera_core::{AttributeScope, EntityId};

pub const REMOTE_KEY_LEN: usize = 22;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RemoteKey {
    entity_id: EntityId,
    scope: AttributeScope,
    key_id: i32,
}

impl RemoteKey {
    pub fn new(entity_id: EntityId, scope: AttributeScope, key_id: i32) -> Self {
        Self {
            entity_id,
            scope,
            key_id,
        }
    }

    pub fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    pub fn scope(&self) -> AttributeScope {
        self.scope
    }

    pub fn key_id(&self) -> i32 {
        self.key_id
    }

    pub fn encode(&self) -> [u8; REMOTE_KEY_LEN] {
        let mut bytes = [0u8; REMOTE_KEY_LEN];
        bytes[..17].copy_from_slice(&Self::entity_prefix(self.entity_id));
        bytes[17] = self.scope.as_byte();
        bytes[18..22].copy_from_slice(&self.key_id.to_be_bytes());
        bytes
    }

    /// Prefix shared by every key of `entity_id`.
    fn entity_prefix(entity_id: EntityId) -> [u8; 17] {
        let mut prefix = [0u8; 17];
        prefix[0] = entity_id.entity_type().as_byte();
        prefix[1..17].copy_from_slice(entity_id.id().as_bytes());
        prefix
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;
    use tessera_core::EntityType;
    use uuid::Uuid;

    fn entity_strategy() -> impl Strategy<Value = EntityId> {
        (0..EntityType::ALL.len(), any::<[u8; 16]>())
            .prop_map(|(i, bytes)| EntityId::new(EntityType::ALL[i], Uuid::from_bytes(bytes)))
    }

    fn scope_strategy() -> impl Strategy<Value = AttributeScope> {
        prop_oneof![
            Just(AttributeScope::Client),
            Just(AttributeScope::Server),
            Just(AttributeScope::Shared),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(1000))]

        #[test]
        fn prop_encode_decode_roundtrip(
            entity in entity_strategy(),
            scope in scope_strategy(),
            key_id in any::<i32>(),
        ) {
            let key = RemoteKey::new(entity, scope, key_id);
            prop_assert_eq!(RemoteKey::decode(&key.encode()), Some(key));
        }

        /// Distinct keys never share an encoding.
        #[test]
        fn prop_encoding_is_injective(
            a in (entity_strategy(), scope_strategy(), any::<i32>()),
            b in (entity_strategy(), scope_strategy(), any::<i32>()),
        ) {
            let ka = RemoteKey::new(a.0, a.1, a.2);
            let kb = RemoteKey::new(b.0, b.1, b.2);
            prop_assert_eq!(ka == kb, ka.encode() == kb.encode());
        }

        #[test]
        fn prop_entity_prefix_is_prefix(
            entity in entity_strategy(),
            scope in scope_strategy(),
            key_id in any::<i32>(),
        ) {
            let encoded = RemoteKey::new(entity, scope, key_id).encode();
            prop_assert_eq!(&encoded[..17], &RemoteKey::entity_prefix(entity)[..]);
        }
    }
}
