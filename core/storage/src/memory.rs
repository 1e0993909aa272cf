//! In-memory blob store for testing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::blob::{BlobInfo, BlobStore};
use vaultkeep_common::{Error, PhysicalRef, Result};

#[derive(Debug, Clone)]
struct Entry {
    data: Vec<u8>,
    modified: DateTime<Utc>,
}

/// In-memory blob store.
///
/// All data is lost on drop. Writes can be made to fail on demand so
/// callers can exercise their rollback paths.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Arc<RwLock<HashMap<PhysicalRef, Entry>>>,
    fail_writes: AtomicBool,
}

impl MemoryBlobStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `put` fail with a storage error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of stored blobs.
    pub fn len(&self) -> usize {
        self.read().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<PhysicalRef, Entry>>> {
        self.blobs
            .read()
            .map_err(|_| Error::Storage("Memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<PhysicalRef, Entry>>> {
        self.blobs
            .write()
            .map_err(|_| Error::Storage("Memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn put(&self, blob: &PhysicalRef, data: Vec<u8>) -> Result<u64> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Storage(format!("Write rejected: {}", blob)));
        }
        let size = data.len() as u64;
        self.write()?.insert(
            blob.clone(),
            Entry {
                data,
                modified: Utc::now(),
            },
        );
        Ok(size)
    }

    async fn get(&self, blob: &PhysicalRef) -> Result<Vec<u8>> {
        self.read()?
            .get(blob)
            .map(|e| e.data.clone())
            .ok_or_else(|| Error::NotFound(format!("Blob not found: {}", blob)))
    }

    async fn delete(&self, blob: &PhysicalRef) -> Result<bool> {
        Ok(self.write()?.remove(blob).is_some())
    }

    async fn exists(&self, blob: &PhysicalRef) -> Result<bool> {
        Ok(self.read()?.contains_key(blob))
    }

    async fn list(&self) -> Result<Vec<BlobInfo>> {
        Ok(self
            .read()?
            .iter()
            .map(|(physical_ref, entry)| BlobInfo {
                physical_ref: physical_ref.clone(),
                size: entry.data.len() as u64,
                modified: entry.modified,
            })
            .collect())
    }

    async fn destroy(&self) -> Result<()> {
        self.write()?.clear();
        Ok(())
    }
}
