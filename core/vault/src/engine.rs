//! The vault engine.
//!
//! Composes the key store, codec, blob store and index into the operations
//! consumers call. Three rules hold across every operation:
//! - ciphertext is written before its record and deleted before it
//! - mutations are serialized and run to completion on the runtime even if
//!   the caller stops waiting
//! - readers see an immutable [`Snapshot`] swapped in after durable state
//!   changed

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::VaultConfig;
use crate::db::Database;
use crate::events::{PhotoLibrary, UsageEvent, UsageSink, VaultEvent};
use crate::export::Exporter;
use crate::folders::FolderIndex;
use crate::item::{validate_name, ItemKind, NewItem, VaultItem};
use crate::keystore::KeyStore;
use crate::query::{ItemFilter, KindStats, Snapshot, SortOrder};
use crate::records::RecordStore;
use crate::side_tables::SideTables;
use crate::tree::FolderNode;
use vaultkeep_common::{Error, FolderPath, ItemId, PhysicalRef, Result, SensitiveBytes};
use vaultkeep_crypto::{CipherCodec, FileKey, KdfParams, MasterKey};
use vaultkeep_storage::{BlobStore, LocalBlobStore, SecretStore};

type PrepareFuture = Shared<BoxFuture<'static, std::result::Result<(), Arc<Error>>>>;

enum Readiness {
    Uninitialized,
    Preparing(PrepareFuture),
    Ready,
}

/// Engine readiness as seen by the auth collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EngineState {
    Uninitialized,
    Preparing,
    Ready,
}

/// Capacity of the disk hosting the vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceStorage {
    pub mount_point: PathBuf,
    pub total_bytes: u64,
    pub available_bytes: u64,
}

/// Builder for [`VaultEngine`].
pub struct VaultEngineBuilder {
    config: VaultConfig,
    secrets: Arc<dyn SecretStore>,
    blobs: Option<Arc<dyn BlobStore>>,
    photos: Option<Arc<dyn PhotoLibrary>>,
    usage: UsageSink,
    kdf_params: KdfParams,
}

impl VaultEngineBuilder {
    /// Use `blobs` instead of a local store under the vault root.
    pub fn blob_store(mut self, blobs: Arc<dyn BlobStore>) -> Self {
        self.blobs = Some(blobs);
        self
    }

    pub fn photo_library(mut self, photos: Arc<dyn PhotoLibrary>) -> Self {
        self.photos = Some(photos);
        self
    }

    pub fn usage_sink(mut self, usage: UsageSink) -> Self {
        self.usage = usage;
        self
    }

    pub fn kdf_params(mut self, params: KdfParams) -> Self {
        self.kdf_params = params;
        self
    }

    /// Open the index and assemble the engine. Does not touch the key.
    ///
    /// # Errors
    /// - Vault root or index cannot be created
    pub fn build(self) -> Result<VaultEngine> {
        std::fs::create_dir_all(&self.config.root)?;
        let blobs: Arc<dyn BlobStore> = match self.blobs {
            Some(blobs) => blobs,
            None => Arc::new(LocalBlobStore::new(self.config.data_dir())?),
        };
        let db = Arc::new(Database::open(self.config.index_path())?);
        let (events, _) = broadcast::channel(self.config.event_capacity.max(1));

        let inner = EngineInner {
            keys: KeyStore::with_kdf_params(self.secrets, self.kdf_params),
            codec: CipherCodec::new(),
            blobs,
            records: RecordStore::new(db.clone()),
            side: SideTables::new(db.clone()),
            folders: FolderIndex::new(db),
            exporter: Exporter::new(self.config.export_root.clone()),
            photos: self.photos,
            usage: self.usage,
            events,
            readiness: Mutex::new(Readiness::Uninitialized),
            epoch: AtomicU64::new(0),
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
            write_lock: tokio::sync::Mutex::new(()),
            config: self.config,
        };
        info!(root = %inner.config.root.display(), blobs = inner.blobs.name(), "Vault engine created");
        Ok(VaultEngine {
            inner: Arc::new(inner),
        })
    }
}

struct EngineInner {
    config: VaultConfig,
    keys: KeyStore,
    codec: CipherCodec,
    blobs: Arc<dyn BlobStore>,
    records: RecordStore,
    side: SideTables,
    folders: FolderIndex,
    exporter: Exporter,
    photos: Option<Arc<dyn PhotoLibrary>>,
    usage: UsageSink,
    events: broadcast::Sender<VaultEvent>,
    readiness: Mutex<Readiness>,
    /// Bumped by lock and wipe so a stale preparation cannot mark the
    /// engine ready.
    epoch: AtomicU64,
    snapshot: RwLock<Arc<Snapshot>>,
    write_lock: tokio::sync::Mutex<()>,
}

/// Encrypted file vault.
///
/// Cheap to clone; clones share one engine.
#[derive(Clone)]
pub struct VaultEngine {
    inner: Arc<EngineInner>,
}

impl VaultEngine {
    pub fn builder(config: VaultConfig, secrets: Arc<dyn SecretStore>) -> VaultEngineBuilder {
        VaultEngineBuilder {
            config,
            secrets,
            blobs: None,
            photos: None,
            usage: UsageSink::disabled(),
            kdf_params: KdfParams::default(),
        }
    }

    pub fn config(&self) -> &VaultConfig {
        &self.inner.config
    }

    /// Key store, for passcode checks by the auth collaborator.
    pub fn key_store(&self) -> &KeyStore {
        &self.inner.keys
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VaultEvent> {
        self.inner.events.subscribe()
    }

    pub fn state(&self) -> EngineState {
        match &*self.inner.readiness() {
            Readiness::Uninitialized => EngineState::Uninitialized,
            Readiness::Preparing(_) => EngineState::Preparing,
            Readiness::Ready => EngineState::Ready,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state() == EngineState::Ready
    }

    pub fn is_loading(&self) -> bool {
        self.state() == EngineState::Preparing
    }

    /// Make the vault ready: key, format check, one-shot migration, orphan
    /// sweep, snapshot load.
    ///
    /// Idempotent. Concurrent callers share one preparation and its result.
    /// On failure the engine returns to `Uninitialized`.
    ///
    /// # Errors
    /// - `Error::Prepare` wrapping the failure of the shared preparation
    pub async fn prepare(&self) -> Result<()> {
        let pending = {
            let mut readiness = self.inner.readiness();
            match &*readiness {
                Readiness::Ready => return Ok(()),
                Readiness::Preparing(pending) => pending.clone(),
                Readiness::Uninitialized => {
                    let inner = Arc::clone(&self.inner);
                    let epoch = inner.epoch.load(Ordering::SeqCst);
                    let task = tokio::spawn(async move {
                        let _guard = inner.write_lock.lock().await;
                        let result = if inner.epoch.load(Ordering::SeqCst) == epoch {
                            inner.run_prepare().await
                        } else {
                            Err(Error::NotReady)
                        };
                        inner.finish_prepare(epoch, &result);
                        result
                    });
                    let pending = async move {
                        match task.await {
                            Ok(result) => result.map_err(Arc::new),
                            Err(e) => Err(Arc::new(Error::Storage(format!(
                                "Preparation task failed: {}",
                                e
                            )))),
                        }
                    }
                    .boxed()
                    .shared();
                    *readiness = Readiness::Preparing(pending.clone());
                    pending
                }
            }
        };
        pending.await.map_err(Error::Prepare)
    }

    /// Evict the key and discard the snapshot. The next `prepare` reloads
    /// everything.
    ///
    /// Mutations already accepted either finish before the eviction or are
    /// refused with `Error::NotReady`; none run against the locked vault.
    pub async fn lock(&self) {
        self.inner.invalidate();

        let inner = Arc::clone(&self.inner);
        let evicted = tokio::spawn(async move {
            let _guard = inner.write_lock.lock().await;
            let ready = matches!(*inner.readiness(), Readiness::Ready);
            if ready {
                // Prepared again after this lock; its key and snapshot are current.
                return;
            }
            inner.keys.clear_from_memory().await;
            inner.swap_snapshot(Snapshot::default());
        })
        .await;
        if let Err(e) = evicted {
            warn!(error = %e, "Lock task failed");
        }

        self.inner.emit(VaultEvent::Locked);
        info!("Vault locked");
    }

    fn ensure_ready(&self) -> Result<()> {
        self.ready_epoch().map(|_| ())
    }

    /// Epoch of the current readiness, if ready.
    fn ready_epoch(&self) -> Result<u64> {
        let readiness = self.inner.readiness();
        match *readiness {
            Readiness::Ready => Ok(self.inner.epoch.load(Ordering::SeqCst)),
            _ => Err(Error::NotReady),
        }
    }

    /// Run `op` on the runtime with the write lock held.
    ///
    /// With `epoch` set, `op` is refused unless the engine is still ready in
    /// that epoch once the lock is held.
    async fn exclusive<T, F, Fut>(&self, epoch: Option<u64>, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<EngineInner>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let _guard = inner.write_lock.lock().await;
            if let Some(epoch) = epoch {
                if !inner.is_ready_in(epoch) {
                    debug!("Vault locked before mutation ran");
                    return Err(Error::NotReady);
                }
            }
            op(Arc::clone(&inner)).await
        })
        .await
        .map_err(|e| Error::Storage(format!("Vault task failed: {}", e)))?
    }

    async fn mutate<T, F, Fut>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<EngineInner>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let epoch = self.ready_epoch()?;
        self.exclusive(Some(epoch), op).await
    }

    // ---- Mutations ----

    /// Encrypt and store a new item.
    ///
    /// The folder defaults to the category when unset.
    ///
    /// # Errors
    /// - `Error::InvalidInput` for a blank name
    /// - `Error::KeyUnavailable` when no key can be obtained
    /// - I/O or database errors; no record exists afterwards
    pub async fn add_item(&self, new: NewItem) -> Result<VaultItem> {
        self.mutate(move |inner| async move { inner.add_item(new).await })
            .await
    }

    /// Delete items and their blobs. Returns the number of records removed.
    pub async fn delete_items(&self, ids: Vec<ItemId>) -> Result<usize> {
        self.mutate(move |inner| async move { inner.delete_items(ids).await })
            .await
    }

    /// Delete a folder, every item in or under it, and their blobs.
    pub async fn delete_folder(&self, path: FolderPath) -> Result<usize> {
        self.mutate(move |inner| async move { inner.delete_folder(path).await })
            .await
    }

    pub async fn rename_item(&self, id: ItemId, new_name: String) -> Result<VaultItem> {
        self.mutate(move |inner| async move {
            let name = validate_name(&new_name)?;
            if !inner.records.rename(&id, &name)? {
                return Err(Error::NotFound(format!("Item not found: {}", id)));
            }
            inner.refresh_snapshot()?;
            inner.emit(VaultEvent::ItemRenamed {
                id: id.clone(),
                name: name.clone(),
            });
            info!(id = %id, "Item renamed");
            inner
                .records
                .get(&id)?
                .ok_or_else(|| Error::NotFound(format!("Item not found: {}", id)))
        })
        .await
    }

    /// Move items to `folder` (`None` = root). Returns records changed.
    pub async fn assign_folder(&self, ids: Vec<ItemId>, folder: Option<FolderPath>) -> Result<usize> {
        self.mutate(move |inner| async move {
            let folder = folder.filter(|f| !f.is_root());
            let changed = inner.records.set_folder(&ids, folder.as_ref())?;
            inner.refresh_snapshot()?;
            inner.emit(VaultEvent::ItemsMoved { ids, folder });
            debug!(changed, "Items assigned to folder");
            Ok(changed)
        })
        .await
    }

    /// Create an empty folder. Returns `false` if it already existed.
    pub async fn create_folder(&self, path: FolderPath) -> Result<bool> {
        self.mutate(move |inner| async move {
            let created = inner.folders.create_folder(&path)?;
            if created {
                inner.refresh_snapshot()?;
                inner.emit(VaultEvent::FolderCreated { path });
            }
            Ok(created)
        })
        .await
    }

    /// Move a folder under `parent` (`None` = root).
    ///
    /// Returns the new path, or `None` when nothing changed.
    pub async fn move_folder(
        &self,
        from: FolderPath,
        parent: Option<FolderPath>,
    ) -> Result<Option<FolderPath>> {
        self.mutate(move |inner| async move {
            let moved = inner.folders.move_folder(&from, parent.as_ref())?;
            inner.after_relocate(from, moved.clone())?;
            Ok(moved)
        })
        .await
    }

    pub async fn rename_folder(
        &self,
        path: FolderPath,
        new_name: String,
    ) -> Result<Option<FolderPath>> {
        self.mutate(move |inner| async move {
            let renamed = inner.folders.rename_folder(&path, &new_name)?;
            inner.after_relocate(path, renamed.clone())?;
            Ok(renamed)
        })
        .await
    }

    /// Flip the pin of an item. Returns the new state.
    pub async fn toggle_pin(&self, id: ItemId) -> Result<bool> {
        self.mutate(move |inner| async move {
            inner.require_item(&id)?;
            let pinned = inner.side.toggle_pin(&id)?;
            inner.refresh_snapshot()?;
            inner.emit(VaultEvent::PinToggled {
                id: id.clone(),
                pinned,
            });
            inner.usage.send(UsageEvent::PinToggled { id, pinned });
            Ok(pinned)
        })
        .await
    }

    /// Stamp an item as opened now. Returns its open count.
    pub async fn record_opened(&self, id: ItemId) -> Result<u64> {
        self.mutate(move |inner| async move {
            let item = inner.require_item(&id)?;
            let count = inner
                .side
                .record_opened(&id, Utc::now().timestamp_millis())?;
            inner.refresh_snapshot()?;
            inner.emit(VaultEvent::ItemOpened { id: id.clone() });
            inner.usage.send(UsageEvent::Opened {
                id,
                category: item.category,
            });
            Ok(count)
        })
        .await
    }

    /// Destroy every record, blob, side table, the key and passcode
    /// material. Irreversible. Allowed in any state.
    pub async fn wipe_all_data(&self) -> Result<()> {
        self.inner.invalidate();
        self.exclusive(None, |inner| async move { inner.wipe().await })
            .await
    }

    /// Ask the photo library to delete an imported asset.
    pub async fn request_library_deletion(&self, asset_id: &str) -> Result<bool> {
        let photos = self
            .inner
            .photos
            .as_ref()
            .ok_or_else(|| Error::InvalidInput("No photo library configured".to_string()))?;
        match photos.delete_asset(asset_id).await {
            Ok(deleted) => {
                info!(asset = asset_id, deleted, "Photo library deletion finished");
                Ok(deleted)
            }
            Err(e) => {
                warn!(asset = asset_id, error = %e, "Photo library deletion failed");
                Err(e)
            }
        }
    }

    // ---- Reads that touch ciphertext ----

    /// Decrypt an item for viewing.
    ///
    /// # Errors
    /// - `Error::NotFound` for an unknown id or missing blob
    /// - `Error::Integrity` / `Error::KeyMismatch` for unreadable ciphertext
    pub async fn read_item(&self, id: &ItemId) -> Result<SensitiveBytes> {
        self.ensure_ready()?;
        let item = self.inner.require_item(id)?;
        self.inner.decrypt_item(&item).await
    }

    /// Decrypt one item into a fresh export directory. Returns the file.
    pub async fn export_item(&self, id: &ItemId) -> Result<PathBuf> {
        self.ensure_ready()?;
        let item = self.inner.require_item(id)?;
        let plaintext = self.inner.decrypt_item(&item).await?;

        let dir = self.inner.exporter.create_dir().await?;
        match self
            .inner
            .exporter
            .write_file(&dir, &[], &item.original_name, plaintext.as_bytes())
            .await
        {
            Ok(path) => {
                info!(id = %id, "Item exported");
                Ok(path)
            }
            Err(e) => {
                discard_export(&dir).await;
                Err(e)
            }
        }
    }

    /// Decrypt a folder subtree into a fresh export directory, recreating
    /// nested folders. Returns the directory.
    pub async fn export_folder(&self, path: &FolderPath) -> Result<PathBuf> {
        self.ensure_ready()?;
        let snapshot = self.snapshot();
        let items: Vec<&VaultItem> = snapshot
            .items
            .iter()
            .filter(|i| i.folder().is_within(path))
            .collect();

        let dir = self.inner.exporter.create_dir().await?;
        for item in &items {
            let written = async {
                let plaintext = self.inner.decrypt_item(item).await?;
                let folder = item.folder();
                let relative = folder.relative_to(path).unwrap_or(&[]);
                self.inner
                    .exporter
                    .write_file(&dir, relative, &item.original_name, plaintext.as_bytes())
                    .await
            };
            if let Err(e) = written.await {
                discard_export(&dir).await;
                return Err(e);
            }
        }
        info!(folder = %path, items = items.len(), "Folder exported");
        Ok(dir)
    }

    /// Remove every export directory.
    pub async fn purge_exports(&self) -> Result<usize> {
        self.inner.exporter.purge().await
    }

    /// Sum of ciphertext sizes as stored, measured from the blob store.
    pub async fn total_storage_bytes(&self) -> Result<u64> {
        self.inner.blobs.total_size().await
    }

    /// Capacity of the disk holding the vault root.
    pub async fn device_storage(&self) -> Result<DeviceStorage> {
        let root = self.inner.config.root.clone();
        tokio::task::spawn_blocking(move || device_storage_for(&root))
            .await
            .map_err(|e| Error::Storage(format!("Disk query failed: {}", e)))?
    }

    // ---- Snapshot queries ----

    /// Current point-in-time view.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.inner.current_snapshot()
    }

    /// All items, newest first.
    pub fn items(&self) -> Vec<VaultItem> {
        self.snapshot().items.clone()
    }

    pub fn get_item(&self, id: &ItemId) -> Option<VaultItem> {
        self.snapshot().get(id).cloned()
    }

    pub fn filtered_items(&self, filter: ItemFilter, search: &str, sort: SortOrder) -> Vec<VaultItem> {
        self.snapshot().filtered_items(filter, search, sort)
    }

    pub fn items_in(&self, folder: Option<&FolderPath>) -> Vec<VaultItem> {
        self.snapshot().items_in(folder)
    }

    pub fn folder_nodes(&self) -> Vec<FolderNode> {
        self.snapshot().folder_nodes()
    }

    pub fn existing_item(&self, name: &str, folder: Option<&FolderPath>) -> Option<VaultItem> {
        self.snapshot().existing_item(name, folder).cloned()
    }

    pub fn unique_item_name(&self, base: &str, folder: Option<&FolderPath>) -> String {
        self.snapshot().unique_item_name(base, folder)
    }

    pub fn find_exact_duplicates(&self) -> Vec<Vec<VaultItem>> {
        self.snapshot().find_exact_duplicates()
    }

    pub fn recent_items(&self, limit: Option<usize>) -> Vec<VaultItem> {
        self.snapshot().recent_items(limit)
    }

    pub fn breakdown_by_type(&self) -> BTreeMap<ItemKind, KindStats> {
        self.snapshot().breakdown_by_type()
    }

    pub fn is_pinned(&self, id: &ItemId) -> bool {
        self.snapshot().is_pinned(id)
    }

    pub fn open_count(&self, id: &ItemId) -> u64 {
        self.snapshot().open_count(id)
    }
}

async fn discard_export(dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(dir).await {
        warn!(dir = %dir.display(), error = %e, "Failed to remove partial export");
    }
}

fn device_storage_for(root: &Path) -> Result<DeviceStorage> {
    let root = std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    let disks = sysinfo::Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|d| root.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().components().count())
        .map(|d| DeviceStorage {
            mount_point: d.mount_point().to_path_buf(),
            total_bytes: d.total_space(),
            available_bytes: d.available_space(),
        })
        .ok_or_else(|| Error::NotFound(format!("No disk hosts {}", root.display())))
}

impl EngineInner {
    fn readiness(&self) -> MutexGuard<'_, Readiness> {
        self.readiness.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start a new epoch and drop readiness; pending work of the old epoch
    /// is refused.
    fn invalidate(&self) {
        let mut readiness = self.readiness();
        self.epoch.fetch_add(1, Ordering::SeqCst);
        *readiness = Readiness::Uninitialized;
    }

    fn is_ready_in(&self, epoch: u64) -> bool {
        let readiness = self.readiness();
        matches!(*readiness, Readiness::Ready) && self.epoch.load(Ordering::SeqCst) == epoch
    }

    fn current_snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshot.read().unwrap_or_else(|e| e.into_inner()))
    }

    fn swap_snapshot(&self, snapshot: Snapshot) {
        *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(snapshot);
    }

    fn emit(&self, event: VaultEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn load_snapshot(&self) -> Result<Snapshot> {
        Ok(Snapshot {
            items: self.records.list_all()?,
            pinned: self.side.pinned()?,
            folders: self.folders.folders()?,
            recency: self.side.recency()?,
            open_counts: self.side.open_counts()?,
        })
    }

    fn refresh_snapshot(&self) -> Result<()> {
        let snapshot = self.load_snapshot()?;
        self.swap_snapshot(snapshot);
        Ok(())
    }

    fn require_item(&self, id: &ItemId) -> Result<VaultItem> {
        self.current_snapshot()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Item not found: {}", id)))
    }

    /// Every blob is sealed under its own key derived from its name.
    fn file_key(key: &MasterKey, physical_ref: &PhysicalRef) -> FileKey {
        key.derive_file_key(physical_ref.as_str().as_bytes())
    }

    async fn decrypt_item(&self, item: &VaultItem) -> Result<SensitiveBytes> {
        // Never reload an evicted key for a read.
        let key = self.keys.cached_master_key().await.ok_or(Error::NotReady)?;
        let envelope = self.blobs.get(&item.physical_ref).await?;
        let file_key = Self::file_key(&key, &item.physical_ref);
        let plaintext = self.codec.decrypt(&envelope, file_key.as_bytes())?;
        Ok(SensitiveBytes::new(plaintext))
    }

    async fn run_prepare(&self) -> Result<()> {
        debug!("Preparing vault");
        self.keys.get_or_create_master_key().await?;

        match VaultConfig::load_marker(&self.config.config_path()).await? {
            Some(marker) if !marker.version.is_compatible() => {
                return Err(Error::InvalidInput(format!(
                    "Incompatible vault version: {:?}",
                    marker.version
                )));
            }
            Some(_) => {}
            None => self.config.save_marker().await?,
        }

        if !self.side.legacy_migration_done()? {
            let adopted = self.records.adopt_category_as_folder()?;
            self.side.mark_legacy_migration_done()?;
            info!(adopted, "Legacy category folders migrated");
        }

        self.sweep_orphans().await;
        self.refresh_snapshot()?;
        Ok(())
    }

    /// Publish the outcome of a preparation. Runs under the write lock, so
    /// a lock or wipe that made it stale evicts after it.
    fn finish_prepare(&self, epoch: u64, result: &Result<()>) {
        let mut readiness = self.readiness();
        if self.epoch.load(Ordering::SeqCst) != epoch {
            debug!("Preparation outlived a lock or wipe; result discarded");
            return;
        }
        match result {
            Ok(()) => {
                *readiness = Readiness::Ready;
                self.emit(VaultEvent::Ready);
                info!("Vault ready");
            }
            Err(e) => {
                *readiness = Readiness::Uninitialized;
                warn!(error = %e, "Vault preparation failed");
            }
        }
    }

    /// Delete blobs no record refers to. Failures are logged only.
    async fn sweep_orphans(&self) {
        let referenced: HashSet<PhysicalRef> = match self.records.list_all() {
            Ok(items) => items.into_iter().map(|i| i.physical_ref).collect(),
            Err(e) => {
                warn!(error = %e, "Orphan sweep skipped");
                return;
            }
        };
        let blobs = match self.blobs.list().await {
            Ok(blobs) => blobs,
            Err(e) => {
                warn!(error = %e, "Orphan sweep skipped");
                return;
            }
        };

        let mut swept = 0;
        for blob in blobs.iter().filter(|b| !referenced.contains(&b.physical_ref)) {
            match self.blobs.delete(&blob.physical_ref).await {
                Ok(_) => swept += 1,
                Err(e) => warn!(blob = %blob.physical_ref, error = %e, "Failed to sweep orphan"),
            }
        }
        if swept > 0 {
            info!(swept, "Orphaned blobs removed");
        }
    }

    async fn add_item(&self, new: NewItem) -> Result<VaultItem> {
        let key = self.keys.get_or_create_master_key().await?;
        let physical_ref = PhysicalRef::generate();
        let content_hash = self.codec.content_hash(new.data.as_bytes());
        let (item, plaintext) = new.into_record(physical_ref, content_hash)?;

        let file_key = Self::file_key(&key, &item.physical_ref);
        let envelope = self.codec.encrypt(plaintext.as_bytes(), file_key.as_bytes())?;
        drop(plaintext);

        self.blobs.put(&item.physical_ref, envelope).await?;

        if let Err(e) = self.records.insert(&item) {
            if let Err(cleanup) = self.blobs.delete(&item.physical_ref).await {
                warn!(blob = %item.physical_ref, error = %cleanup, "Failed to remove blob of rejected record");
            }
            return Err(e);
        }

        self.refresh_snapshot()?;
        self.emit(VaultEvent::ItemsAdded {
            ids: vec![item.id.clone()],
        });
        info!(id = %item.id, size = item.size, "Item added");
        Ok(item)
    }

    /// Best-effort blob removal; a missing blob already satisfies it.
    async fn delete_blobs(&self, items: &[VaultItem]) {
        for item in items {
            if let Err(e) = self.blobs.delete(&item.physical_ref).await {
                warn!(blob = %item.physical_ref, error = %e, "Failed to delete blob");
            }
        }
    }

    fn forget(&self, ids: &[ItemId]) {
        if let Err(e) = self.side.forget_items(ids) {
            warn!(error = %e, "Failed to clear side tables of deleted items");
        }
    }

    async fn delete_items(&self, ids: Vec<ItemId>) -> Result<usize> {
        let doomed = self.records.find_by_ids(&ids)?;
        self.delete_blobs(&doomed).await;

        let ids: Vec<ItemId> = doomed.into_iter().map(|i| i.id).collect();
        let deleted = self.records.delete_by_ids(&ids)?;
        self.forget(&ids);

        self.refresh_snapshot()?;
        self.emit(VaultEvent::ItemsDeleted { ids });
        info!(deleted, "Items deleted");
        Ok(deleted)
    }

    async fn delete_folder(&self, path: FolderPath) -> Result<usize> {
        let doomed = self.records.find_by_folder_prefix(&path)?;
        self.delete_blobs(&doomed).await;

        let removed = self.folders.delete_folder(&path)?;
        let ids: Vec<ItemId> = removed.into_iter().map(|i| i.id).collect();
        self.forget(&ids);

        self.refresh_snapshot()?;
        info!(folder = %path, deleted = ids.len(), "Folder deleted");
        self.emit(VaultEvent::FolderDeleted {
            path,
            items: ids.len(),
        });
        Ok(ids.len())
    }

    fn after_relocate(&self, from: FolderPath, to: Option<FolderPath>) -> Result<()> {
        if let Some(to) = to {
            self.refresh_snapshot()?;
            self.emit(VaultEvent::FolderMoved { from, to });
        }
        Ok(())
    }

    async fn wipe(&self) -> Result<()> {
        self.records.clear()?;
        self.side.clear()?;
        self.blobs.destroy().await?;
        self.keys.reset_all_secrets().await?;
        match tokio::fs::remove_file(self.config.config_path()).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        self.swap_snapshot(Snapshot::default());
        self.emit(VaultEvent::Wiped);
        info!("Vault wiped");
        Ok(())
    }
}
