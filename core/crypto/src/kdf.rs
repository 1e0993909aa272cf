//! Passcode key derivation using Argon2id.
//!
//! Argon2id is a memory-hard password hashing function that provides
//! resistance to both GPU and time-memory trade-off attacks. VaultKeep only
//! uses it for passcode verifiers; the master key itself is random.

use argon2::{Algorithm, Argon2, Params, Version};
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::keys::{Salt, KEY_LENGTH};
use vaultkeep_common::{Error, Result};

/// Parameters for Argon2id key derivation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB (e.g., 65536 = 64 MiB).
    pub memory_cost: u32,
    /// Number of iterations.
    pub time_cost: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl KdfParams {
    /// Create parameters suitable for interactive use.
    ///
    /// These parameters provide a balance between security and usability,
    /// targeting approximately 0.5-1 second of derivation time.
    pub fn interactive() -> Self {
        Self {
            memory_cost: 65536, // 64 MiB
            time_cost: 3,
            parallelism: 4,
        }
    }

    /// Create moderate parameters for mobile devices.
    pub fn moderate() -> Self {
        Self {
            memory_cost: 32768, // 32 MiB
            time_cost: 3,
            parallelism: 2,
        }
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::interactive()
    }
}

/// Derive key bytes from a passcode and salt using Argon2id.
///
/// # Errors
/// - Returns error if passcode is empty
/// - Returns error if Argon2id parameters are invalid
///
/// # Security
/// - The derived bytes are zeroized when dropped
pub fn derive_key(
    passcode: &[u8],
    salt: &Salt,
    params: &KdfParams,
) -> Result<Zeroizing<[u8; KEY_LENGTH]>> {
    if passcode.is_empty() {
        return Err(Error::InvalidInput("Passcode cannot be empty".to_string()));
    }

    let argon2_params = Params::new(
        params.memory_cost,
        params.time_cost,
        params.parallelism,
        Some(KEY_LENGTH),
    )
    .map_err(|e| Error::Crypto(format!("Invalid KDF parameters: {}", e)))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut key_bytes = Zeroizing::new([0u8; KEY_LENGTH]);
    argon2
        .hash_password_into(passcode, salt.as_bytes(), &mut key_bytes[..])
        .map_err(|e| Error::Crypto(format!("Key derivation failed: {}", e)))?;

    Ok(key_bytes)
}

/// Stored passcode material.
///
/// Holds only a digest of the Argon2id output, never the passcode or the
/// derived key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasscodeVerifier {
    pub salt: Salt,
    pub params: KdfParams,
    pub digest: [u8; 32],
}

impl PasscodeVerifier {
    /// Build a verifier for `passcode` with a fresh salt.
    pub fn create(passcode: &[u8], params: KdfParams) -> Result<Self> {
        let salt = Salt::generate();
        let derived = derive_key(passcode, &salt, &params)?;
        Ok(Self {
            salt,
            params,
            digest: digest_of(&derived[..]),
        })
    }

    /// Check `passcode` in constant time.
    pub fn verify(&self, passcode: &[u8]) -> Result<bool> {
        if passcode.is_empty() {
            return Ok(false);
        }
        let derived = derive_key(passcode, &self.salt, &self.params)?;
        let candidate = digest_of(&derived[..]);
        Ok(bool::from(candidate[..].ct_eq(&self.digest[..])))
    }

    /// Serialize to bytes for the secret store.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from secret-store bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::Serialization(e.to_string()))
    }
}

fn digest_of(derived: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2b::<U32>::new();
    hasher.update(derived);
    hasher.update(b"passcode-verifier");
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}
