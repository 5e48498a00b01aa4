//! LMDB-backed byte store for the remote cache tier.
//!
//! Uses the heed crate (Rust bindings for LMDB) to keep cached attributes in
//! a memory-mapped file outside the process heap. The cache survives restarts
//! of the service and can be shared by processes on the same host.
//!
//! # Atomicity
//!
//! LMDB serializes writers. Conditional puts and deletes read the current
//! value and apply the write inside one write transaction, so the version
//! guard cannot interleave with another writer.

use std::path::Path;

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use tessera_core::CacheError;

use super::remote::ByteStore;
use super::traits::{EvictOutcome, PutOutcome};

/// Error type for LMDB environment and transaction failures.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCacheError> for CacheError {
    fn from(e: LmdbCacheError) -> Self {
        CacheError::Backend {
            reason: e.to_string(),
        }
    }
}

fn txn_error(e: heed::Error) -> LmdbCacheError {
    LmdbCacheError::Transaction(e.to_string())
}

pub struct LmdbByteStore {
    env: Env,
    db: Database<Bytes, Bytes>,
}

impl LmdbByteStore {
    /// Open (or create) the store.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the map in megabytes
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per path by this process and
        // the map is never truncated while open.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_error)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_error)?;

        Ok(Self { env, db })
    }

    /// Number of stored entries, tombstones included.
    pub fn len(&self) -> Result<u64, CacheError> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        Ok(self.db.len(&rtxn).map_err(txn_error)?)
    }

    pub fn is_empty(&self) -> Result<bool, CacheError> {
        Ok(self.len()? == 0)
    }

    /// Drop every entry. Required when switching wire formats.
    pub fn clear(&self) -> Result<(), CacheError> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        self.db.clear(&mut wtxn).map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;
        Ok(())
    }
}

impl ByteStore for LmdbByteStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, CacheError> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let value = self.db.get(&rtxn, key).map_err(txn_error)?;
        Ok(value.map(<[u8]>::to_vec))
    }

    fn put_if(
        &self,
        key: &[u8],
        value: &[u8],
        replace: &dyn Fn(&[u8]) -> bool,
    ) -> Result<PutOutcome, CacheError> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let write = match self.db.get(&wtxn, key).map_err(txn_error)? {
            Some(existing) => replace(existing),
            None => true,
        };
        if !write {
            wtxn.abort();
            return Ok(PutOutcome::SkippedNewer);
        }
        self.db.put(&mut wtxn, key, value).map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;
        Ok(PutOutcome::Stored)
    }

    fn delete(&self, key: &[u8]) -> Result<bool, CacheError> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let deleted = self.db.delete(&mut wtxn, key).map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;
        Ok(deleted)
    }

    fn delete_if(
        &self,
        key: &[u8],
        remove: &dyn Fn(&[u8]) -> bool,
    ) -> Result<EvictOutcome, CacheError> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let outcome = match self.db.get(&wtxn, key).map_err(txn_error)? {
            None => EvictOutcome::Absent,
            Some(existing) if remove(existing) => EvictOutcome::Evicted,
            Some(_) => EvictOutcome::SkippedNewer,
        };
        if outcome != EvictOutcome::Evicted {
            wtxn.abort();
            return Ok(outcome);
        }
        self.db.delete(&mut wtxn, key).map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::remote::{encode_envelope, envelope_version};
    use tempfile::TempDir;

    fn create_test_store() -> (LmdbByteStore, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let store = LmdbByteStore::open(temp_dir.path(), 10).expect("store creation should succeed");
        (store, temp_dir)
    }

    fn newer_than(version: i64) -> impl Fn(&[u8]) -> bool {
        move |existing| version >= envelope_version(existing)
    }

    #[test]
    fn test_put_and_get() {
        let (store, _temp_dir) = create_test_store();
        let value = encode_envelope(1, b"payload");
        assert_eq!(
            store.put_if(b"k", &value, &newer_than(1)).expect("put should succeed"),
            PutOutcome::Stored
        );
        assert_eq!(store.get(b"k").expect("get should succeed"), Some(value));
        assert_eq!(store.get(b"other").expect("get should succeed"), None);
    }

    #[test]
    fn test_conditional_put_keeps_newer() {
        let (store, _temp_dir) = create_test_store();
        let newer = encode_envelope(5, b"new");
        store.put_if(b"k", &newer, &newer_than(5)).expect("put should succeed");
        assert_eq!(
            store
                .put_if(b"k", &encode_envelope(4, b"old"), &newer_than(4))
                .expect("put should succeed"),
            PutOutcome::SkippedNewer
        );
        assert_eq!(store.get(b"k").expect("get should succeed"), Some(newer));
    }

    #[test]
    fn test_conditional_delete() {
        let (store, _temp_dir) = create_test_store();
        store
            .put_if(b"k", &encode_envelope(2, b"v"), &newer_than(2))
            .expect("put should succeed");

        let keep = |existing: &[u8]| envelope_version(existing) <= 1;
        assert_eq!(
            store.delete_if(b"k", &keep).expect("delete should succeed"),
            EvictOutcome::SkippedNewer
        );
        let drop_it = |existing: &[u8]| envelope_version(existing) <= 2;
        assert_eq!(
            store.delete_if(b"k", &drop_it).expect("delete should succeed"),
            EvictOutcome::Evicted
        );
        assert_eq!(
            store.delete_if(b"k", &drop_it).expect("delete should succeed"),
            EvictOutcome::Absent
        );
    }

    #[test]
    fn test_delete_and_clear() {
        let (store, _temp_dir) = create_test_store();
        for key in [b"a", b"b", b"c"] {
            store
                .put_if(key, &encode_envelope(1, b"v"), &newer_than(1))
                .expect("put should succeed");
        }
        assert!(store.delete(b"a").expect("delete should succeed"));
        assert!(!store.delete(b"a").expect("delete should succeed"));
        assert_eq!(store.len().expect("len should succeed"), 2);

        store.clear().expect("clear should succeed");
        assert!(store.is_empty().expect("len should succeed"));
    }

    #[test]
    fn test_reopen_persists() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        {
            let store =
                LmdbByteStore::open(temp_dir.path(), 10).expect("store creation should succeed");
            store
                .put_if(b"k", &encode_envelope(3, b"v"), &newer_than(3))
                .expect("put should succeed");
        }
        let store = LmdbByteStore::open(temp_dir.path(), 10).expect("reopen should succeed");
        let bytes = store.get(b"k").expect("get should succeed").expect("value should persist");
        assert_eq!(envelope_version(&bytes), 3);
    }
}
