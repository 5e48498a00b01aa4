//! Key-name dictionary: interned attribute names.
//!
//! The remote tier stores a numeric key id instead of the attribute name,
//! both in the cache key and in place of the name inside the value payload.

use std::sync::atomic::{AtomicI32, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tessera_core::CacheError;

pub trait KeyDictionary: Send + Sync + 'static {
    /// Id for `name`, allocating a fresh one on first use.
    fn key_id(&self, name: &str) -> Result<i32, CacheError>;

    /// Reverse lookup. `Ok(None)` for an id that was never allocated.
    fn key_name(&self, key_id: i32) -> Result<Option<String>, CacheError>;
}

#[derive(Debug)]
pub struct InMemoryKeyDictionary {
    by_name: DashMap<String, i32>,
    by_id: DashMap<i32, String>,
    next_id: AtomicI32,
}

impl Default for InMemoryKeyDictionary {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryKeyDictionary {
    pub fn new() -> Self {
        Self {
            by_name: DashMap::new(),
            by_id: DashMap::new(),
            next_id: AtomicI32::new(1),
        }
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

impl KeyDictionary for InMemoryKeyDictionary {
    fn key_id(&self, name: &str) -> Result<i32, CacheError> {
        if let Some(id) = self.by_name.get(name) {
            return Ok(*id);
        }
        // The entry lock makes concurrent first uses agree on one id.
        match self.by_name.entry(name.to_string()) {
            Entry::Occupied(entry) => Ok(*entry.get()),
            Entry::Vacant(entry) => {
                let id = self
                    .next_id
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |id| id.checked_add(1))
                    .map_err(|_| CacheError::Backend {
                        reason: "key dictionary id space exhausted".to_string(),
                    })?;
                self.by_id.insert(id, name.to_string());
                entry.insert(id);
                Ok(id)
            }
        }
    }

    fn key_name(&self, key_id: i32) -> Result<Option<String>, CacheError> {
        Ok(self.by_id.get(&key_id).map(|name| name.clone()))
    }
}
