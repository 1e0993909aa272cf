//! Item envelope codec and content hashing.
//!
//! Envelope layout:
//!
//! ```text
//! version (1) || key_check (8) || nonce (24) || ciphertext || tag (16)
//! ```
//!
//! The 9-byte header is authenticated as associated data. `key_check` is a
//! short BLAKE2b fingerprint of the key. When it does not match, `decrypt`
//! retries authentication with the header the key would have produced: if
//! that succeeds only the header was altered and the envelope is reported as
//! corrupt, otherwise it was sealed under another key.

use blake2::digest::consts::{U32, U8};
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroizing;

use crate::aead::{self, NONCE_SIZE, TAG_SIZE};
use vaultkeep_common::{Error, Result};

/// Current envelope format version.
pub const ENVELOPE_VERSION: u8 = 1;

/// Size of the key fingerprint stored in the header.
pub const KEY_CHECK_SIZE: usize = 8;

/// Header size (version + key check).
pub const HEADER_SIZE: usize = 1 + KEY_CHECK_SIZE;

/// Smallest valid envelope (empty plaintext).
pub const MIN_ENVELOPE_SIZE: usize = HEADER_SIZE + NONCE_SIZE + TAG_SIZE;

/// Stateless encrypt/decrypt of item contents.
#[derive(Debug, Clone, Copy, Default)]
pub struct CipherCodec;

impl CipherCodec {
    /// Create a codec.
    pub fn new() -> Self {
        Self
    }

    /// Seal `plaintext` under `key` into a self-describing envelope.
    ///
    /// # Errors
    /// - Returns error if key length is incorrect
    pub fn encrypt(&self, plaintext: &[u8], key: &[u8]) -> Result<Vec<u8>> {
        let header = header_for(key);
        let sealed = aead::seal(key, &header, plaintext)?;

        let mut envelope = Vec::with_capacity(HEADER_SIZE + sealed.len());
        envelope.extend_from_slice(&header);
        envelope.extend_from_slice(&sealed);
        Ok(envelope)
    }

    /// Open an envelope produced by [`CipherCodec::encrypt`].
    ///
    /// # Errors
    /// - `Error::Integrity` if the envelope is truncated, has an unknown
    ///   version, an altered header, or fails authentication
    /// - `Error::KeyMismatch` if it was sealed under another key
    pub fn decrypt(&self, envelope: &[u8], key: &[u8]) -> Result<Vec<u8>> {
        if envelope.len() < MIN_ENVELOPE_SIZE {
            return Err(Error::Integrity(format!(
                "Envelope truncated: {} bytes",
                envelope.len()
            )));
        }

        let (header, sealed) = envelope.split_at(HEADER_SIZE);
        if header[0] != ENVELOPE_VERSION {
            return Err(Error::Integrity(format!(
                "Unknown envelope version {}",
                header[0]
            )));
        }

        if header[1..] != key_check(key) {
            return match aead::open(key, &header_for(key), sealed) {
                Ok(plaintext) => {
                    drop(Zeroizing::new(plaintext));
                    Err(Error::Integrity("Envelope header altered".to_string()))
                }
                Err(_) => Err(Error::KeyMismatch),
            };
        }

        aead::open(key, header, sealed)
    }

    /// Hash plaintext for duplicate detection.
    pub fn content_hash(&self, plaintext: &[u8]) -> ContentHash {
        ContentHash::of(plaintext)
    }
}

fn key_check(key: &[u8]) -> [u8; KEY_CHECK_SIZE] {
    let mut hasher = Blake2b::<U8>::new();
    hasher.update(key);
    hasher.update(b"keycheck");
    let mut out = [0u8; KEY_CHECK_SIZE];
    out.copy_from_slice(&hasher.finalize());
    out
}

fn header_for(key: &[u8]) -> [u8; HEADER_SIZE] {
    let mut header = [0u8; HEADER_SIZE];
    header[0] = ENVELOPE_VERSION;
    header[1..].copy_from_slice(&key_check(key));
    header
}

/// BLAKE2b-256 digest of an item's plaintext.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Hash `data`.
    pub fn of(data: &[u8]) -> Self {
        let digest = Blake2b::<U32>::digest(data);
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Self(out)
    }

    /// Parse the lowercase hex form.
    pub fn from_hex(value: &str) -> Result<Self> {
        let bytes = hex::decode(value)
            .map_err(|e| Error::Serialization(format!("Invalid content hash: {}", e)))?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| {
            Error::Serialization("Content hash must be 32 bytes".to_string())
        })?;
        Ok(Self(bytes))
    }

    /// Lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.to_hex())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl TryFrom<String> for ContentHash {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::from_hex(&value)
    }
}

impl From<ContentHash> for String {
    fn from(value: ContentHash) -> Self {
        value.to_hex()
    }
}
