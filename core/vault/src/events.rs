//! Change notifications and interfaces to outside collaborators.

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::trace;

use vaultkeep_common::{FolderPath, ItemId, Result};

/// Emitted after every successful mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum VaultEvent {
    Ready,
    Locked,
    ItemsAdded { ids: Vec<ItemId> },
    ItemsDeleted { ids: Vec<ItemId> },
    ItemRenamed { id: ItemId, name: String },
    ItemsMoved { ids: Vec<ItemId>, folder: Option<FolderPath> },
    FolderCreated { path: FolderPath },
    FolderDeleted { path: FolderPath, items: usize },
    FolderMoved { from: FolderPath, to: FolderPath },
    PinToggled { id: ItemId, pinned: bool },
    ItemOpened { id: ItemId },
    Wiped,
}

/// Fire-and-forget notifications for the usage-learning collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsageEvent {
    PinToggled { id: ItemId, pinned: bool },
    Opened { id: ItemId, category: Option<String> },
}

/// Sending half of the usage channel. Never blocks and never fails.
#[derive(Debug, Clone, Default)]
pub struct UsageSink {
    tx: Option<mpsc::UnboundedSender<UsageEvent>>,
}

impl UsageSink {
    /// Create a sink and the receiver the collaborator drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<UsageEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that drops everything.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn send(&self, event: UsageEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                trace!("Usage receiver gone; event dropped");
            }
        }
    }
}

/// Device photo library, used to remove an asset after it was imported.
#[async_trait]
pub trait PhotoLibrary: Send + Sync {
    /// Request deletion of the asset with the given local identifier.
    ///
    /// Returns `false` when the user declined.
    async fn delete_asset(&self, asset_id: &str) -> Result<bool>;
}
