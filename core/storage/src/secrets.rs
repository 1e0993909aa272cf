//! Secret storage for key material.
//!
//! Secrets are small named byte strings: the master key and the passcode
//! verifier. Platform keychains plug in behind [`SecretStore`]; the file
//! backend keeps each secret base64-encoded in an owner-only file.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::debug;
use zeroize::Zeroizing;

use vaultkeep_common::{Error, Result, SensitiveBytes};

/// Named secret storage.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Read a secret, `None` if it was never written.
    async fn get(&self, name: &str) -> Result<Option<SensitiveBytes>>;

    /// Store a secret, replacing any previous value.
    async fn put(&self, name: &str, value: &[u8]) -> Result<()>;

    /// Remove a secret. Removing an absent secret succeeds.
    async fn delete(&self, name: &str) -> Result<()>;
}

fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        && !name.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("Invalid secret name: {:?}", name)))
    }
}

/// Secrets kept as files in a private directory.
pub struct FileSecretStore {
    dir: PathBuf,
}

impl FileSecretStore {
    /// Create a store backed by `dir`, creating it owner-only if needed.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.exists() {
            std::fs::create_dir_all(&dir)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))?;
            }
        }
        Ok(Self { dir })
    }

    fn secret_path(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.dir.join(format!("{}.secret", name)))
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn get(&self, name: &str) -> Result<Option<SensitiveBytes>> {
        let path = self.secret_path(name)?;
        let encoded = match fs::read_to_string(&path).await {
            Ok(s) => Zeroizing::new(s),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let decoded = STANDARD
            .decode(encoded.trim())
            .map_err(|e| Error::Serialization(format!("Corrupt secret {}: {}", name, e)))?;
        Ok(Some(SensitiveBytes::new(decoded)))
    }

    async fn put(&self, name: &str, value: &[u8]) -> Result<()> {
        let path = self.secret_path(name)?;
        let temp = self.dir.join(format!(".{}.tmp", name));
        let encoded = Zeroizing::new(STANDARD.encode(value));

        fs::write(&temp, encoded.as_bytes()).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&temp, std::fs::Permissions::from_mode(0o600)).await?;
        }
        fs::rename(&temp, &path).await?;

        debug!(secret = name, "Secret stored");
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        match fs::remove_file(self.secret_path(name)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Process-local secret store for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemorySecretStore {
    secrets: RwLock<HashMap<String, SensitiveBytes>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get(&self, name: &str) -> Result<Option<SensitiveBytes>> {
        validate_name(name)?;
        Ok(self.secrets.read().await.get(name).cloned())
    }

    async fn put(&self, name: &str, value: &[u8]) -> Result<()> {
        validate_name(name)?;
        self.secrets
            .write()
            .await
            .insert(name.to_string(), SensitiveBytes::new(value.to_vec()));
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        self.secrets.write().await.remove(name);
        Ok(())
    }
}
