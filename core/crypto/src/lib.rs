//! Cryptographic primitives for VaultKeep.
//!
//! This module provides:
//! - Authenticated encryption using XChaCha20-Poly1305
//! - The item envelope codec with key-mismatch detection
//! - Content hashing for duplicate detection
//! - Secure key types with automatic zeroization
//! - Argon2id passcode verifiers
//!
//! # Security Guarantees
//! - All key material is automatically zeroized on drop
//! - No plaintext or key material is ever logged
//! - Constant-time comparison for passcode verification

pub mod aead;
pub mod codec;
pub mod kdf;
pub mod keys;

pub use aead::{decrypt, encrypt};
pub use codec::{CipherCodec, ContentHash};
pub use kdf::{derive_key, KdfParams, PasscodeVerifier};
pub use keys::{FileKey, MasterKey, Salt, KEY_LENGTH};
