//! Blob store trait definition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use vaultkeep_common::{PhysicalRef, Result};

/// Listing entry for a stored blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobInfo {
    /// Physical reference (blob name).
    pub physical_ref: PhysicalRef,
    /// Ciphertext size in bytes.
    pub size: u64,
    /// Last modification time.
    pub modified: DateTime<Utc>,
}

/// Flat storage for ciphertext blobs.
///
/// Blobs are opaque: the store never interprets their contents and never
/// learns an item's display name or folder.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Get the backend name (e.g., "local", "memory").
    fn name(&self) -> &str;

    /// Write a blob, replacing any previous content.
    ///
    /// # Postconditions
    /// - On success the full blob is durable; a failed write leaves no
    ///   partial blob under `blob`
    /// - Returns the number of bytes stored
    async fn put(&self, blob: &PhysicalRef, data: Vec<u8>) -> Result<u64>;

    /// Read a blob.
    ///
    /// # Errors
    /// - `Error::NotFound` if no blob exists under `blob`
    async fn get(&self, blob: &PhysicalRef) -> Result<Vec<u8>>;

    /// Delete a blob.
    ///
    /// Returns `false` when the blob was already absent, which callers treat
    /// as success.
    async fn delete(&self, blob: &PhysicalRef) -> Result<bool>;

    /// Check if a blob exists.
    async fn exists(&self, blob: &PhysicalRef) -> Result<bool>;

    /// Enumerate every stored blob.
    async fn list(&self) -> Result<Vec<BlobInfo>>;

    /// Sum of stored blob sizes, measured from the physical layer.
    async fn total_size(&self) -> Result<u64> {
        Ok(self.list().await?.iter().map(|b| b.size).sum())
    }

    /// Remove every blob and the storage location itself.
    async fn destroy(&self) -> Result<()>;
}
