//! Local filesystem blob store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::blob::{BlobInfo, BlobStore};
use vaultkeep_common::{Error, PhysicalRef, Result};

/// Marker that tells backup tools to skip the blob directory.
/// See <https://bford.info/cachedir/>.
const CACHEDIR_TAG: &str = "CACHEDIR.TAG";
const CACHEDIR_TAG_CONTENT: &str = "Signature: 8a477f597d28d172789f06886806bc55\n\
# This directory holds VaultKeep ciphertext and is excluded from backups.\n";

/// Local filesystem blob store.
///
/// Stores every blob as one file in a flat directory, named by its
/// physical reference.
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    /// Create a new local store rooted at `root`.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    /// - A backup-exclusion marker is present in the root
    ///
    /// # Errors
    /// - Permission denied
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        // Create root if it doesn't exist (sync for constructor)
        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }
        let tag = root.join(CACHEDIR_TAG);
        if !tag.exists() {
            std::fs::write(&tag, CACHEDIR_TAG_CONTENT)?;
        }

        Ok(Self { root })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, blob: &PhysicalRef) -> PathBuf {
        self.root.join(blob.as_str())
    }

    /// Recreate the root after `destroy`.
    async fn ensure_root(&self) -> Result<()> {
        if !fs::try_exists(&self.root).await? {
            fs::create_dir_all(&self.root).await?;
            fs::write(self.root.join(CACHEDIR_TAG), CACHEDIR_TAG_CONTENT).await?;
        }
        Ok(())
    }
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn put(&self, blob: &PhysicalRef, data: Vec<u8>) -> Result<u64> {
        self.ensure_root().await?;

        let final_path = self.blob_path(blob);
        // Leading dot keeps temp files out of `list`.
        let temp_path = self
            .root
            .join(format!(".{}.{}.tmp", blob.as_str(), Uuid::new_v4().simple()));

        let write = async {
            let mut file = fs::File::create(&temp_path).await?;
            restrict_permissions(&temp_path).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
            fs::rename(&temp_path, &final_path).await?;
            Ok::<(), Error>(())
        };

        if let Err(e) = write.await {
            if let Err(cleanup) = fs::remove_file(&temp_path).await {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    warn!(blob = %blob, error = %cleanup, "Failed to remove temp blob");
                }
            }
            return Err(e);
        }

        debug!(blob = %blob, size = data.len(), "Blob written");
        Ok(data.len() as u64)
    }

    async fn get(&self, blob: &PhysicalRef) -> Result<Vec<u8>> {
        match fs::read(self.blob_path(blob)).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("Blob not found: {}", blob)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, blob: &PhysicalRef) -> Result<bool> {
        match fs::remove_file(self.blob_path(blob)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, blob: &PhysicalRef) -> Result<bool> {
        Ok(fs::try_exists(self.blob_path(blob)).await?)
    }

    async fn list(&self) -> Result<Vec<BlobInfo>> {
        if !fs::try_exists(&self.root).await? {
            return Ok(Vec::new());
        }

        let mut results = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            let fs_meta = entry.metadata().await?;
            if !fs_meta.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            // Skips the backup marker and in-flight temp files.
            let Ok(physical_ref) = PhysicalRef::parse(name) else {
                continue;
            };
            let modified: DateTime<Utc> = fs_meta
                .modified()
                .map(|t| t.into())
                .unwrap_or_else(|_| Utc::now());
            results.push(BlobInfo {
                physical_ref,
                size: fs_meta.len(),
                modified,
            });
        }

        Ok(results)
    }

    async fn destroy(&self) -> Result<()> {
        match fs::remove_dir_all(&self.root).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
