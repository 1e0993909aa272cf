//! Vault configuration and on-disk layout.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use vaultkeep_common::{Error, Result};

/// Vault format version for migration support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultVersion {
    pub major: u32,
    pub minor: u32,
}

impl VaultVersion {
    /// Current vault format version.
    pub const CURRENT: Self = Self { major: 1, minor: 0 };

    /// Check if this version is compatible with the current version.
    pub fn is_compatible(&self) -> bool {
        self.major == Self::CURRENT.major
    }
}

impl Default for VaultVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

/// Configuration file name in vault root.
pub const CONFIG_FILENAME: &str = "vault.config";

/// Blob directory name in vault root.
pub const DATA_DIRNAME: &str = "d";

/// SQLite index file name in vault root.
pub const INDEX_FILENAME: &str = "index.db";

/// Secret directory used by the file secret store.
pub const SECRETS_DIRNAME: &str = "secrets";

/// Default capacity of the change-event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Runtime configuration of a vault.
///
/// The serialized form doubles as the `vault.config` marker written at the
/// vault root on first preparation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Directory holding the index, blob directory and marker.
    pub root: PathBuf,
    /// Parent directory for plaintext exports.
    pub export_root: PathBuf,
    /// Buffered change events per subscriber before lagging.
    pub event_capacity: usize,
    /// Vault format version.
    pub version: VaultVersion,
    /// When the vault was first prepared.
    pub created_at: DateTime<Utc>,
}

impl VaultConfig {
    /// Create a configuration rooted at `root` with default settings.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            export_root: std::env::temp_dir().join("vaultkeep-exports"),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            version: VaultVersion::CURRENT,
            created_at: Utc::now(),
        }
    }

    /// Override the export parent directory.
    pub fn with_export_root(mut self, export_root: impl Into<PathBuf>) -> Self {
        self.export_root = export_root.into();
        self
    }

    /// Override the event channel capacity (at least 1).
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILENAME)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join(DATA_DIRNAME)
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILENAME)
    }

    pub fn secrets_dir(&self) -> PathBuf {
        self.root.join(SECRETS_DIRNAME)
    }

    /// Serialize configuration to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Read the marker stored at `path`, `None` if the vault is new.
    pub async fn load_marker(path: &Path) -> Result<Option<Self>> {
        match tokio::fs::read_to_string(path).await {
            Ok(json) => Ok(Some(Self::from_json(&json)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write this configuration as the vault marker.
    pub async fn save_marker(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::write(self.config_path(), self.to_json()?).await?;
        Ok(())
    }
}
