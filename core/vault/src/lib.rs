//! Vault engine for VaultKeep.
//!
//! This module provides:
//! - Master key lifecycle ([`KeyStore`])
//! - The SQLite item catalog and side tables
//! - The virtual folder namespace and tree
//! - Snapshot queries: filter, sort, search, dedup, recency, breakdown
//! - [`VaultEngine`], which orchestrates all of the above
//!
//! # Architecture
//! The engine sits between the presentation layer and the blob store,
//! encrypting every item under its own key before it reaches storage.
//! Collaborators (secret store, blob store, photo library, usage sink) are
//! injected at construction.

pub mod config;
pub mod db;
pub mod engine;
pub mod events;
pub mod export;
pub mod folders;
pub mod item;
pub mod keystore;
pub mod query;
pub mod records;
pub mod side_tables;
pub mod tree;

pub use config::{VaultConfig, VaultVersion};
pub use engine::{DeviceStorage, EngineState, VaultEngine, VaultEngineBuilder};
pub use events::{PhotoLibrary, UsageEvent, UsageSink, VaultEvent};
pub use folders::FolderIndex;
pub use item::{ItemKind, NewItem, VaultItem};
pub use keystore::KeyStore;
pub use query::{ItemFilter, KindStats, Snapshot, SortOrder};
pub use records::RecordStore;
pub use tree::{build_tree, FolderNode};
