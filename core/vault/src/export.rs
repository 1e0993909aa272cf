//! Plaintext export into fresh temporary directories.
//!
//! Exports are the only place plaintext touches disk, and only on explicit
//! request. Every export gets its own directory under the export root so
//! [`Exporter::purge`] can remove them all.

use rand::distributions::Alphanumeric;
use rand::Rng;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use vaultkeep_common::Result;

const EXPORT_DIR_PREFIX: &str = "export-";
const SUFFIX_LEN: usize = 6;

/// Replace components that would escape or alias their directory.
fn safe_component(name: &str) -> String {
    match name.trim() {
        "" | "." | ".." => "_".to_string(),
        other => other.replace(['/', '\\'], "_"),
    }
}

fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SUFFIX_LEN)
        .map(char::from)
        .collect()
}

/// `photo.jpg` becomes `photo-x7Gk2q.jpg`.
fn with_suffix(name: &str, suffix: &str) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{}-{}.{}", stem, suffix, ext),
        _ => format!("{}-{}", name, suffix),
    }
}

#[cfg(unix)]
async fn restrict(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn restrict(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

/// Writes decrypted items for handoff to an external sharing mechanism.
#[derive(Debug, Clone)]
pub struct Exporter {
    root: PathBuf,
}

impl Exporter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create a fresh, owner-only export directory.
    pub async fn create_dir(&self) -> Result<PathBuf> {
        fs::create_dir_all(&self.root).await?;
        let dir = self
            .root
            .join(format!("{}{}", EXPORT_DIR_PREFIX, Uuid::new_v4().simple()));
        fs::create_dir(&dir).await?;
        restrict(&dir, 0o700).await?;
        debug!(dir = %dir.display(), "Export directory created");
        Ok(dir)
    }

    /// Write `data` as `name` inside `dir/subfolders...`.
    ///
    /// A colliding name gets a random suffix before its extension; existing
    /// files are never overwritten.
    pub async fn write_file(
        &self,
        dir: &Path,
        subfolders: &[String],
        name: &str,
        data: &[u8],
    ) -> Result<PathBuf> {
        let mut target_dir = dir.to_path_buf();
        for comp in subfolders {
            target_dir.push(safe_component(comp));
        }
        fs::create_dir_all(&target_dir).await?;

        let name = safe_component(name);
        let mut candidate = target_dir.join(&name);
        loop {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&candidate)
                .await
            {
                Ok(mut file) => {
                    restrict(&candidate, 0o600).await?;
                    file.write_all(data).await?;
                    file.flush().await?;
                    return Ok(candidate);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    candidate = target_dir.join(with_suffix(&name, &random_suffix()));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Delete every export directory. Returns how many were removed.
    pub async fn purge(&self) -> Result<usize> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with(EXPORT_DIR_PREFIX) || !entry.file_type().await?.is_dir() {
                continue;
            }
            match fs::remove_dir_all(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(dir = %name, error = %e, "Failed to remove export"),
            }
        }
        info!(removed, "Exports purged");
        Ok(removed)
    }
}
