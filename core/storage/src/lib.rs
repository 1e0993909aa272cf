//! Storage backends for VaultKeep.
//!
//! This module provides two trait-based seams:
//! - [`BlobStore`]: flat storage of ciphertext blobs named by their
//!   physical reference
//! - [`SecretStore`]: small secrets (master key, passcode verifier) kept in
//!   the platform's most protected storage
//!
//! # Design Principles
//! - Backends never see plaintext; the vault engine encrypts before writing
//! - Async operations: all I/O is async
//! - Unified error semantics: a missing blob is `Error::NotFound` everywhere

pub mod blob;
pub mod local;
pub mod memory;
pub mod secrets;

pub use blob::{BlobInfo, BlobStore};
pub use local::LocalBlobStore;
pub use memory::MemoryBlobStore;
pub use secrets::{FileSecretStore, MemorySecretStore, SecretStore};
