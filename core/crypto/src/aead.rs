//! Authenticated encryption using XChaCha20-Poly1305.
//!
//! XChaCha20-Poly1305 provides both confidentiality and authenticity,
//! with a 24-byte nonce that is safe for random generation.

use chacha20poly1305::{
    aead::{generic_array::GenericArray, Aead, AeadCore, KeyInit, OsRng, Payload},
    XChaCha20Poly1305,
};

use crate::keys::KEY_LENGTH;
use vaultkeep_common::{Error, Result};

/// Nonce size for XChaCha20-Poly1305 (24 bytes).
pub const NONCE_SIZE: usize = 24;

/// Authentication tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

fn cipher_for(key: &[u8]) -> Result<XChaCha20Poly1305> {
    if key.len() != KEY_LENGTH {
        return Err(Error::Crypto(format!(
            "Invalid key length: expected {}, got {}",
            KEY_LENGTH,
            key.len()
        )));
    }
    Ok(XChaCha20Poly1305::new(GenericArray::from_slice(key)))
}

/// Encrypt plaintext, binding `aad` into the authentication tag.
///
/// # Postconditions
/// - Returns nonce || ciphertext || tag
/// - The nonce is randomly generated
///
/// # Errors
/// - Returns error if key length is incorrect
/// - Returns error if encryption fails
pub fn seal(key: &[u8], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher_for(key)?;
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, Payload { msg: plaintext, aad })
        .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))?;

    // Prepend nonce to ciphertext
    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce);
    result.extend_from_slice(&ciphertext);

    Ok(result)
}

/// Decrypt data produced by [`seal`] with the same `aad`.
///
/// # Errors
/// - `Error::Crypto` if key length is incorrect
/// - `Error::Integrity` if the data is too short or authentication fails
///
/// # Security
/// - Authenticates before returning any plaintext
pub fn open(key: &[u8], aad: &[u8], sealed: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher_for(key)?;

    if sealed.len() < NONCE_SIZE + TAG_SIZE {
        return Err(Error::Integrity("Ciphertext too short".to_string()));
    }

    let (nonce_bytes, encrypted) = sealed.split_at(NONCE_SIZE);
    let nonce = GenericArray::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, Payload { msg: encrypted, aad })
        .map_err(|_| Error::Integrity("Authentication tag mismatch".to_string()))
}

/// Encrypt plaintext using XChaCha20-Poly1305 without associated data.
pub fn encrypt(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    seal(key, &[], plaintext)
}

/// Decrypt ciphertext produced by [`encrypt`].
pub fn decrypt(key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    open(key, &[], ciphertext)
}
