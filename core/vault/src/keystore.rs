//! Master key lifecycle.
//!
//! The key is random, persisted in a [`SecretStore`] and cached in memory
//! while the vault is unlocked. Evicting the cache only drops this store's
//! handle; operations already holding the key finish with it, and the bytes
//! are zeroized when the last handle drops.

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use vaultkeep_common::{Error, Result};
use vaultkeep_crypto::{KdfParams, MasterKey, PasscodeVerifier};
use vaultkeep_storage::SecretStore;

/// Secret name of the master key.
pub const MASTER_KEY_SECRET: &str = "master-key";

/// Secret name of the passcode verifier.
pub const PASSCODE_SECRET: &str = "passcode-verifier";

fn unavailable(e: Error) -> Error {
    Error::KeyUnavailable(e.to_string())
}

/// Owner of the master key and passcode material.
pub struct KeyStore {
    secrets: Arc<dyn SecretStore>,
    /// Also serializes first-time creation.
    cached: Mutex<Option<Arc<MasterKey>>>,
    kdf_params: KdfParams,
}

impl KeyStore {
    pub fn new(secrets: Arc<dyn SecretStore>) -> Self {
        Self::with_kdf_params(secrets, KdfParams::default())
    }

    /// Use custom Argon2id parameters for passcode verifiers.
    pub fn with_kdf_params(secrets: Arc<dyn SecretStore>, kdf_params: KdfParams) -> Self {
        Self {
            secrets,
            cached: Mutex::new(None),
            kdf_params,
        }
    }

    /// Return the master key, loading or creating it on first use.
    ///
    /// Concurrent first callers observe the same key.
    ///
    /// # Errors
    /// - `Error::KeyUnavailable` if the key can be neither read nor created
    pub async fn get_or_create_master_key(&self) -> Result<Arc<MasterKey>> {
        let mut cached = self.cached.lock().await;
        if let Some(key) = cached.as_ref() {
            return Ok(Arc::clone(key));
        }

        let key = match self
            .secrets
            .get(MASTER_KEY_SECRET)
            .await
            .map_err(unavailable)?
        {
            Some(stored) => {
                debug!("Master key loaded from secret store");
                MasterKey::from_slice(stored.as_bytes()).map_err(unavailable)?
            }
            None => {
                let key = MasterKey::generate();
                self.secrets
                    .put(MASTER_KEY_SECRET, key.as_bytes())
                    .await
                    .map_err(unavailable)?;
                info!("New master key generated");
                key
            }
        };

        let key = Arc::new(key);
        *cached = Some(Arc::clone(&key));
        Ok(key)
    }

    /// Drop the cached key; the next access re-reads the secret store.
    pub async fn clear_from_memory(&self) {
        if self.cached.lock().await.take().is_some() {
            debug!("Master key evicted from memory");
        }
    }

    /// The cached key, without consulting the secret store.
    pub async fn cached_master_key(&self) -> Option<Arc<MasterKey>> {
        self.cached.lock().await.clone()
    }

    pub async fn is_cached(&self) -> bool {
        self.cached.lock().await.is_some()
    }

    pub async fn has_passcode(&self) -> Result<bool> {
        Ok(self.secrets.get(PASSCODE_SECRET).await?.is_some())
    }

    /// Store a verifier for `passcode`, replacing any previous one.
    pub async fn set_passcode(&self, passcode: &str) -> Result<()> {
        let passcode = Zeroizing::new(passcode.as_bytes().to_vec());
        let params = self.kdf_params.clone();
        let verifier = tokio::task::spawn_blocking(move || {
            PasscodeVerifier::create(&passcode, params)
        })
        .await
        .map_err(|e| Error::Crypto(format!("Passcode task failed: {}", e)))??;

        self.secrets
            .put(PASSCODE_SECRET, &verifier.to_bytes()?)
            .await?;
        info!("Passcode set");
        Ok(())
    }

    /// Check `passcode` against the stored verifier. `false` if none is set.
    pub async fn verify_passcode(&self, passcode: &str) -> Result<bool> {
        let Some(stored) = self.secrets.get(PASSCODE_SECRET).await? else {
            return Ok(false);
        };
        let verifier = PasscodeVerifier::from_bytes(stored.as_bytes())?;
        let passcode = Zeroizing::new(passcode.as_bytes().to_vec());
        tokio::task::spawn_blocking(move || verifier.verify(&passcode))
            .await
            .map_err(|e| Error::Crypto(format!("Passcode task failed: {}", e)))?
    }

    pub async fn clear_passcode(&self) -> Result<()> {
        self.secrets.delete(PASSCODE_SECRET).await
    }

    /// Destroy the persisted key and passcode material and evict the cache.
    ///
    /// Ciphertext written under the old key becomes unrecoverable.
    pub async fn reset_all_secrets(&self) -> Result<()> {
        let mut cached = self.cached.lock().await;
        cached.take();
        self.secrets.delete(MASTER_KEY_SECRET).await?;
        if let Err(e) = self.secrets.delete(PASSCODE_SECRET).await {
            warn!(error = %e, "Failed to delete passcode material");
            return Err(e);
        }
        info!("All secrets destroyed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use vaultkeep_common::SensitiveBytes;
    use vaultkeep_storage::MemorySecretStore;

    fn fast_params() -> KdfParams {
        KdfParams {
            memory_cost: 8192,
            time_cost: 1,
            parallelism: 1,
        }
    }

    fn keystore() -> (KeyStore, Arc<MemorySecretStore>) {
        let secrets = Arc::new(MemorySecretStore::new());
        (
            KeyStore::with_kdf_params(secrets.clone(), fast_params()),
            secrets,
        )
    }

    #[tokio::test]
    async fn test_key_is_created_once_and_persisted() {
        let (store, secrets) = keystore();

        assert!(store.cached_master_key().await.is_none());
        let first = store.get_or_create_master_key().await.unwrap();
        let again = store.get_or_create_master_key().await.unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert!(Arc::ptr_eq(&first, &store.cached_master_key().await.unwrap()));

        let persisted = secrets.get(MASTER_KEY_SECRET).await.unwrap().unwrap();
        assert_eq!(persisted.as_bytes(), first.as_bytes());
    }

    #[tokio::test]
    async fn test_concurrent_first_access_shares_key() {
        let (store, _) = keystore();
        let store = Arc::new(store);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.get_or_create_master_key().await.unwrap() })
            })
            .collect();

        let mut keys = Vec::new();
        for h in handles {
            keys.push(h.await.unwrap());
        }
        assert!(keys.iter().all(|k| k.as_bytes() == keys[0].as_bytes()));
    }

    #[tokio::test]
    async fn test_clear_from_memory_refetches_same_key() {
        let (store, _) = keystore();
        let before = store.get_or_create_master_key().await.unwrap();

        store.clear_from_memory().await;
        assert!(!store.is_cached().await);
        assert!(store.cached_master_key().await.is_none());

        // The old handle stays usable.
        assert_eq!(before.as_bytes().len(), 32);
        let after = store.get_or_create_master_key().await.unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(before.as_bytes(), after.as_bytes());
    }

    #[tokio::test]
    async fn test_reset_generates_new_key() {
        let (store, _) = keystore();
        let old = store.get_or_create_master_key().await.unwrap();
        store.set_passcode("1234").await.unwrap();

        store.reset_all_secrets().await.unwrap();
        assert!(!store.has_passcode().await.unwrap());

        let new = store.get_or_create_master_key().await.unwrap();
        assert_ne!(old.as_bytes(), new.as_bytes());
    }

    #[tokio::test]
    async fn test_passcode_roundtrip() {
        let (store, _) = keystore();
        assert!(!store.has_passcode().await.unwrap());
        assert!(!store.verify_passcode("1234").await.unwrap());

        store.set_passcode("1234").await.unwrap();
        assert!(store.has_passcode().await.unwrap());
        assert!(store.verify_passcode("1234").await.unwrap());
        assert!(!store.verify_passcode("4321").await.unwrap());

        store.clear_passcode().await.unwrap();
        assert!(!store.has_passcode().await.unwrap());
    }

    struct BrokenSecrets;

    #[async_trait]
    impl SecretStore for BrokenSecrets {
        async fn get(&self, _name: &str) -> Result<Option<SensitiveBytes>> {
            Err(Error::Storage("keychain locked".to_string()))
        }
        async fn put(&self, _name: &str, _value: &[u8]) -> Result<()> {
            Err(Error::Storage("keychain locked".to_string()))
        }
        async fn delete(&self, _name: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_secret_store_failure_is_key_unavailable() {
        let store = KeyStore::new(Arc::new(BrokenSecrets));
        let err = store.get_or_create_master_key().await.unwrap_err();
        assert!(matches!(err, Error::KeyUnavailable(_)));
    }

    #[tokio::test]
    async fn test_corrupt_key_is_key_unavailable() {
        let (store, secrets) = keystore();
        secrets.put(MASTER_KEY_SECRET, b"short").await.unwrap();
        let err = store.get_or_create_master_key().await.unwrap_err();
        assert!(matches!(err, Error::KeyUnavailable(_)));
    }
}
