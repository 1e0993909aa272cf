//! End-to-end behaviour of the vault engine against in-memory collaborators.

use async_trait::async_trait;
use futures::FutureExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use vaultkeep_common::{Error, FolderPath, ItemId, PhysicalRef, Result, SensitiveBytes};
use vaultkeep_crypto::{ContentHash, KdfParams};
use vaultkeep_storage::{BlobStore, MemoryBlobStore, MemorySecretStore, SecretStore};
use vaultkeep_vault::db::Database;
use vaultkeep_vault::{
    EngineState, ItemFilter, NewItem, PhotoLibrary, RecordStore, SortOrder, UsageEvent,
    UsageSink, VaultConfig, VaultEngine, VaultEvent, VaultItem,
};

fn fast_params() -> KdfParams {
    KdfParams {
        memory_cost: 8192,
        time_cost: 1,
        parallelism: 1,
    }
}

struct Harness {
    temp: TempDir,
    engine: VaultEngine,
    blobs: Arc<MemoryBlobStore>,
}

fn build(temp: &TempDir, blobs: Arc<MemoryBlobStore>, secrets: Arc<dyn SecretStore>) -> VaultEngine {
    let config = VaultConfig::new(temp.path().join("vault"))
        .with_export_root(temp.path().join("exports"));
    VaultEngine::builder(config, secrets)
        .blob_store(blobs)
        .kdf_params(fast_params())
        .build()
        .unwrap()
}

async fn ready() -> Harness {
    let temp = TempDir::new().unwrap();
    let blobs = Arc::new(MemoryBlobStore::new());
    let engine = build(&temp, blobs.clone(), Arc::new(MemorySecretStore::new()));
    engine.prepare().await.unwrap();
    Harness {
        temp,
        engine,
        blobs,
    }
}

async fn add(engine: &VaultEngine, name: &str, data: &[u8], folder: Option<&str>) -> VaultItem {
    let mut new = NewItem::new(data.to_vec(), name, "application/octet-stream");
    if let Some(folder) = folder {
        new = new.folder(FolderPath::parse(folder));
    }
    engine.add_item(new).await.unwrap()
}

fn folder_of(engine: &VaultEngine, id: &ItemId) -> String {
    engine.get_item(id).unwrap().folder().as_string()
}

#[tokio::test]
async fn add_filter_rename_scenario() {
    let h = ready().await;
    let photo = h
        .engine
        .add_item(NewItem::new(vec![7u8; 1024], "photo.jpg", "image/jpeg").image(true))
        .await
        .unwrap();

    let images = h
        .engine
        .filtered_items(ItemFilter::Images, "", SortOrder::Newest);
    assert_eq!(images, vec![photo.clone()]);
    assert_eq!(photo.size, 1024);

    h.engine
        .rename_item(photo.id.clone(), "vacation.jpg".to_string())
        .await
        .unwrap();
    assert_eq!(
        h.engine.existing_item("vacation.jpg", None).map(|i| i.id),
        Some(photo.id.clone())
    );
    assert!(h.engine.existing_item("photo.jpg", None).is_none());

    let plaintext = h.engine.read_item(&photo.id).await.unwrap();
    assert_eq!(plaintext.as_bytes(), &[7u8; 1024][..]);
}

#[tokio::test]
async fn unique_item_name_counts_up() {
    let h = ready().await;
    add(&h.engine, "doc.pdf", b"1", None).await;
    assert_eq!(h.engine.unique_item_name("doc.pdf", None), "doc (1).pdf");

    add(&h.engine, "doc (1).pdf", b"2", None).await;
    assert_eq!(h.engine.unique_item_name("doc.pdf", None), "doc (2).pdf");
}

#[tokio::test]
async fn duplicates_grouped_by_plaintext() {
    let h = ready().await;
    let a = add(&h.engine, "a.bin", b"same bytes", None).await;
    let b = add(&h.engine, "b.bin", b"same bytes", Some("Elsewhere")).await;
    let unique = add(&h.engine, "c.bin", b"different", None).await;

    assert_eq!(a.content_hash, b.content_hash);
    assert_eq!(a.content_hash, ContentHash::of(b"same bytes"));
    assert_ne!(a.physical_ref, b.physical_ref);

    let groups = h.engine.find_exact_duplicates();
    assert_eq!(groups.len(), 1);
    let mut ids: Vec<_> = groups[0].iter().map(|i| i.id.clone()).collect();
    ids.sort();
    let mut expected = vec![a.id, b.id];
    expected.sort();
    assert_eq!(ids, expected);
    assert!(groups.iter().flatten().all(|i| i.id != unique.id));
}

#[tokio::test]
async fn folder_move_rewrites_only_the_subtree() {
    let h = ready().await;
    let inside = add(&h.engine, "1", b"1", Some("A/B")).await;
    let nested = add(&h.engine, "2", b"2", Some("A/B/Deep")).await;
    let outside = add(&h.engine, "3", b"3", Some("A/BB")).await;

    let moved = h
        .engine
        .move_folder(FolderPath::parse("A/B"), Some(FolderPath::parse("C")))
        .await
        .unwrap();
    assert_eq!(moved, Some(FolderPath::parse("C/B")));
    assert_eq!(folder_of(&h.engine, &inside.id), "C/B");
    assert_eq!(folder_of(&h.engine, &nested.id), "C/B/Deep");
    assert_eq!(folder_of(&h.engine, &outside.id), "A/BB");

    // Moving to the current parent changes nothing.
    let before = h.engine.items();
    let noop = h
        .engine
        .move_folder(FolderPath::parse("C/B"), Some(FolderPath::parse("C")))
        .await
        .unwrap();
    assert!(noop.is_none());
    assert_eq!(h.engine.items(), before);

    // Blobs never move.
    assert_eq!(h.engine.read_item(&nested.id).await.unwrap().as_bytes(), b"2");
}

#[tokio::test]
async fn pinned_items_float_to_the_front() {
    let h = ready().await;
    let mut ids = Vec::new();
    for name in ["a", "b", "c", "d"] {
        ids.push(add(&h.engine, name, name.as_bytes(), None).await.id);
    }
    h.engine.toggle_pin(ids[1].clone()).await.unwrap();
    h.engine.toggle_pin(ids[3].clone()).await.unwrap();

    let names: Vec<_> = h
        .engine
        .filtered_items(ItemFilter::All, "", SortOrder::NameAscending)
        .into_iter()
        .map(|i| i.original_name)
        .collect();
    assert_eq!(names, ["b", "d", "a", "c"]);
    assert!(h.engine.is_pinned(&ids[1]));

    assert!(!h.engine.toggle_pin(ids[1].clone()).await.unwrap());
    assert!(!h.engine.is_pinned(&ids[1]));
}

#[tokio::test]
async fn create_folder_is_idempotent() {
    let h = ready().await;
    let path = FolderPath::parse("Empty/Nested");

    assert!(h.engine.create_folder(path.clone()).await.unwrap());
    assert!(!h.engine.create_folder(path.clone()).await.unwrap());
    assert_eq!(h.engine.snapshot().folders.len(), 1);

    let nodes = h.engine.folder_nodes();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].children[0].path, path);
}

#[tokio::test]
async fn folder_delete_cascades_but_spares_prefix_siblings() {
    let h = ready().await;
    let x = add(&h.engine, "x", b"x", Some("X")).await;
    let nested = add(&h.engine, "xz", b"xz", Some("X/Z")).await;
    let sibling = add(&h.engine, "xy", b"xy", Some("XY")).await;
    h.engine.create_folder(FolderPath::parse("X/Empty")).await.unwrap();
    h.engine.toggle_pin(x.id.clone()).await.unwrap();

    let deleted = h.engine.delete_folder(FolderPath::parse("X")).await.unwrap();
    assert_eq!(deleted, 2);

    assert!(h.engine.get_item(&x.id).is_none());
    assert!(h.engine.get_item(&nested.id).is_none());
    assert!(!h.blobs.exists(&x.physical_ref).await.unwrap());
    assert!(!h.blobs.exists(&nested.physical_ref).await.unwrap());
    assert!(!h.engine.is_pinned(&x.id));

    assert_eq!(folder_of(&h.engine, &sibling.id), "XY");
    assert!(h.blobs.exists(&sibling.physical_ref).await.unwrap());
    assert!(h.engine.snapshot().folders.is_empty());
    assert_eq!(h.blobs.len(), 1);
}

#[tokio::test]
async fn delete_tolerates_missing_blob() {
    let h = ready().await;
    let item = add(&h.engine, "gone", b"data", None).await;
    h.blobs.delete(&item.physical_ref).await.unwrap();

    assert_eq!(h.engine.delete_items(vec![item.id.clone()]).await.unwrap(), 1);
    assert!(h.engine.items().is_empty());
}

#[tokio::test]
async fn wipe_then_prepare_yields_empty_vault_and_new_key() {
    let h = ready().await;
    let old_key = *h
        .engine
        .key_store()
        .get_or_create_master_key()
        .await
        .unwrap()
        .as_bytes();
    add(&h.engine, "a", b"a", Some("Folder")).await;
    h.engine.create_folder(FolderPath::parse("Empty")).await.unwrap();
    h.engine.key_store().set_passcode("2468").await.unwrap();

    h.engine.wipe_all_data().await.unwrap();
    assert_eq!(h.engine.state(), EngineState::Uninitialized);
    assert!(h.engine.items().is_empty());
    assert!(h.blobs.is_empty());
    assert!(!h.engine.key_store().has_passcode().await.unwrap());

    h.engine.prepare().await.unwrap();
    assert!(h.engine.items().is_empty());
    assert!(h.engine.folder_nodes().is_empty());
    let new_key = *h
        .engine
        .key_store()
        .get_or_create_master_key()
        .await
        .unwrap()
        .as_bytes();
    assert_ne!(old_key, new_key);
}

#[tokio::test]
async fn concurrent_prepare_is_single_flight() {
    let temp = TempDir::new().unwrap();
    let engine = build(
        &temp,
        Arc::new(MemoryBlobStore::new()),
        Arc::new(MemorySecretStore::new()),
    );
    let mut events = engine.subscribe();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.prepare().await })
        })
        .collect();
    for h in handles {
        h.await.unwrap().unwrap();
    }

    assert!(engine.is_ready());
    assert_eq!(events.recv().await.unwrap(), VaultEvent::Ready);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn mutations_require_ready() {
    let temp = TempDir::new().unwrap();
    let engine = build(
        &temp,
        Arc::new(MemoryBlobStore::new()),
        Arc::new(MemorySecretStore::new()),
    );

    let err = engine
        .add_item(NewItem::new(b"x".to_vec(), "x", "text/plain"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotReady));
}

#[tokio::test]
async fn lock_discards_snapshot_and_prepare_reloads() {
    let h = ready().await;
    let item = add(&h.engine, "kept", b"kept", None).await;

    h.engine.lock().await;
    assert_eq!(h.engine.state(), EngineState::Uninitialized);
    assert!(h.engine.items().is_empty());
    assert!(!h.engine.key_store().is_cached().await);
    assert!(matches!(
        h.engine.read_item(&item.id).await.unwrap_err(),
        Error::NotReady
    ));

    h.engine.prepare().await.unwrap();
    let ids: Vec<_> = h.engine.items().into_iter().map(|i| i.id).collect();
    assert_eq!(ids, vec![item.id.clone()]);
    assert_eq!(h.engine.read_item(&item.id).await.unwrap().as_bytes(), b"kept");
}

#[tokio::test]
async fn failed_blob_write_creates_no_record() {
    let h = ready().await;
    h.blobs.set_fail_writes(true);

    let result = h
        .engine
        .add_item(NewItem::new(b"x".to_vec(), "x.txt", "text/plain"))
        .await;
    assert!(result.is_err());
    assert!(h.engine.items().is_empty());

    h.blobs.set_fail_writes(false);
    h.engine.lock().await;
    h.engine.prepare().await.unwrap();
    assert!(h.engine.items().is_empty());
}

#[tokio::test]
async fn tampered_blob_is_unreadable() {
    let h = ready().await;
    let item = add(&h.engine, "secret.txt", b"top secret", None).await;

    let mut envelope = h.blobs.get(&item.physical_ref).await.unwrap();
    let last = envelope.len() - 1;
    envelope[last] ^= 0x01;
    h.blobs.put(&item.physical_ref, envelope).await.unwrap();

    let err = h.engine.read_item(&item.id).await.unwrap_err();
    assert!(err.is_unreadable());
    // The record stays; it is never silently replaced.
    assert!(h.engine.get_item(&item.id).is_some());
}

#[tokio::test]
async fn blobs_never_hold_plaintext() {
    let h = ready().await;
    let item = add(&h.engine, "note.txt", b"plaintext marker", None).await;

    let envelope = h.blobs.get(&item.physical_ref).await.unwrap();
    assert!(!envelope
        .windows(b"plaintext marker".len())
        .any(|w| w == b"plaintext marker"));
    assert!(h.engine.total_storage_bytes().await.unwrap() > item.size);
}

#[tokio::test]
async fn prepare_sweeps_orphaned_blobs() {
    let temp = TempDir::new().unwrap();
    let blobs = Arc::new(MemoryBlobStore::new());
    let orphan = PhysicalRef::generate();
    blobs.put(&orphan, vec![1, 2, 3]).await.unwrap();

    let engine = build(&temp, blobs.clone(), Arc::new(MemorySecretStore::new()));
    engine.prepare().await.unwrap();

    assert!(!blobs.exists(&orphan).await.unwrap());
    assert_eq!(engine.total_storage_bytes().await.unwrap(), 0);
}

#[tokio::test]
async fn legacy_categories_become_folders_once() {
    let temp = TempDir::new().unwrap();
    let blobs = Arc::new(MemoryBlobStore::new());
    let engine = build(&temp, blobs.clone(), Arc::new(MemorySecretStore::new()));

    let legacy = VaultItem {
        id: ItemId::generate(),
        original_name: "receipt.pdf".to_string(),
        mime_type: "application/pdf".to_string(),
        size: 3,
        created_at: chrono::DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
        physical_ref: PhysicalRef::generate(),
        category: Some("Receipts".to_string()),
        folder_path: None,
        content_hash: ContentHash::of(b"pdf"),
        is_image: false,
    };
    blobs.put(&legacy.physical_ref, vec![0; 3]).await.unwrap();
    let db = Arc::new(Database::open(engine.config().index_path()).unwrap());
    RecordStore::new(db).insert(&legacy).unwrap();

    engine.prepare().await.unwrap();
    assert_eq!(folder_of(&engine, &legacy.id), "Receipts");

    // The flag keeps a later un-filed item where the user put it.
    engine
        .assign_folder(vec![legacy.id.clone()], None)
        .await
        .unwrap();
    engine.lock().await;
    engine.prepare().await.unwrap();
    assert_eq!(folder_of(&engine, &legacy.id), "");
}

#[tokio::test]
async fn category_is_default_folder() {
    let h = ready().await;
    let item = h
        .engine
        .add_item(NewItem::new(b"x".to_vec(), "scan.png", "image/png").category("Documents"))
        .await
        .unwrap();
    assert_eq!(item.folder_path, Some(FolderPath::parse("Documents")));
    assert_eq!(h.engine.items_in(Some(&FolderPath::parse("Documents"))).len(), 1);
}

#[tokio::test]
async fn events_and_usage_notifications() {
    let temp = TempDir::new().unwrap();
    let (usage, mut usage_rx) = UsageSink::channel();
    let config = VaultConfig::new(temp.path().join("vault"));
    let engine = VaultEngine::builder(config, Arc::new(MemorySecretStore::new()))
        .blob_store(Arc::new(MemoryBlobStore::new()))
        .usage_sink(usage)
        .build()
        .unwrap();
    engine.prepare().await.unwrap();
    let mut events = engine.subscribe();

    let item = engine
        .add_item(NewItem::new(b"x".to_vec(), "x.txt", "text/plain").category("Work"))
        .await
        .unwrap();
    assert_eq!(
        events.recv().await.unwrap(),
        VaultEvent::ItemsAdded {
            ids: vec![item.id.clone()]
        }
    );

    engine.toggle_pin(item.id.clone()).await.unwrap();
    assert_eq!(engine.record_opened(item.id.clone()).await.unwrap(), 1);
    assert_eq!(engine.record_opened(item.id.clone()).await.unwrap(), 2);
    assert_eq!(engine.open_count(&item.id), 2);
    assert_eq!(engine.recent_items(None), vec![item.clone()]);

    assert_eq!(
        usage_rx.recv().await.unwrap(),
        UsageEvent::PinToggled {
            id: item.id.clone(),
            pinned: true
        }
    );
    assert_eq!(
        usage_rx.recv().await.unwrap(),
        UsageEvent::Opened {
            id: item.id.clone(),
            category: Some("Work".to_string())
        }
    );
    assert!(matches!(
        events.recv().await.unwrap(),
        VaultEvent::PinToggled { pinned: true, .. }
    ));
}

#[tokio::test]
async fn dropped_caller_does_not_abandon_a_write() {
    let h = ready().await;
    let mut events = h.engine.subscribe();

    let pending = h
        .engine
        .add_item(NewItem::new(b"x".to_vec(), "x.txt", "text/plain"));
    assert!(pending.now_or_never().is_none());

    assert!(matches!(
        events.recv().await.unwrap(),
        VaultEvent::ItemsAdded { .. }
    ));
    assert_eq!(h.engine.items().len(), 1);
}

#[tokio::test]
async fn accepted_write_does_not_outlive_lock() {
    let h = ready().await;
    let mut events = h.engine.subscribe();

    let pending = h
        .engine
        .add_item(NewItem::new(b"late".to_vec(), "late.txt", "text/plain"));
    assert!(pending.now_or_never().is_none());
    h.engine.lock().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(h.engine.state(), EngineState::Uninitialized);
    assert!(h.engine.items().is_empty());
    assert!(!h.engine.key_store().is_cached().await);
    assert!(h.blobs.is_empty());
    assert_eq!(events.recv().await.unwrap(), VaultEvent::Locked);
    assert!(events.try_recv().is_err());

    h.engine.prepare().await.unwrap();
    assert!(h.engine.items().is_empty());
}

#[tokio::test]
async fn preparation_interrupted_by_lock_does_not_clobber_the_next() {
    let h = ready().await;
    let item = add(&h.engine, "kept.txt", b"kept", None).await;
    h.engine.lock().await;

    // Start a preparation, then lock before it runs.
    assert!(h.engine.prepare().now_or_never().is_none());
    assert!(h.engine.is_loading());
    h.engine.lock().await;
    assert_eq!(h.engine.state(), EngineState::Uninitialized);

    h.engine.prepare().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(h.engine.is_ready());
    assert!(h.engine.key_store().is_cached().await);
    let ids: Vec<_> = h.engine.items().into_iter().map(|i| i.id).collect();
    assert_eq!(ids, vec![item.id.clone()]);
    assert_eq!(h.engine.read_item(&item.id).await.unwrap().as_bytes(), b"kept");
}

#[tokio::test]
async fn rejected_record_removes_its_fresh_blob() {
    let h = ready().await;
    let kept = add(&h.engine, "kept.txt", b"kept", None).await;
    let before = h.engine.items();

    let db = Database::open(h.engine.config().index_path()).unwrap();
    db.with_conn(|conn| {
        conn.execute_batch(
            "CREATE TRIGGER reject_items BEFORE INSERT ON items \
             BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
        )?;
        Ok(())
    })
    .unwrap();

    let err = h
        .engine
        .add_item(NewItem::new(b"new".to_vec(), "new.txt", "text/plain"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Database(_)));

    assert_eq!(h.engine.items(), before);
    assert_eq!(h.blobs.len(), 1);
    assert!(h.blobs.exists(&kept.physical_ref).await.unwrap());

    db.with_conn(|conn| {
        conn.execute_batch("DROP TRIGGER reject_items;")?;
        Ok(())
    })
    .unwrap();
    add(&h.engine, "new.txt", b"new", None).await;
    assert_eq!(h.blobs.len(), 2);
}

#[tokio::test]
async fn export_folder_recreates_structure() {
    let h = ready().await;
    add(&h.engine, "a.txt", b"first", Some("Trips")).await;
    add(&h.engine, "a.txt", b"second", Some("Trips")).await;
    add(&h.engine, "b.txt", b"day one", Some("Trips/Day1")).await;
    add(&h.engine, "skip.txt", b"not exported", Some("TripsOther")).await;

    let dir = h.engine.export_folder(&FolderPath::parse("Trips")).await.unwrap();
    assert!(dir.starts_with(h.temp.path().join("exports")));

    let mut top: Vec<String> = std::fs::read_dir(&dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    top.sort();
    assert_eq!(top.len(), 3);
    assert!(top.contains(&"a.txt".to_string()));
    assert!(top.contains(&"Day1".to_string()));
    assert!(top.iter().any(|n| n.starts_with("a-") && n.ends_with(".txt")));
    assert_eq!(std::fs::read(dir.join("Day1/b.txt")).unwrap(), b"day one");

    assert_eq!(h.engine.purge_exports().await.unwrap(), 1);
    assert!(!dir.exists());
}

#[tokio::test]
async fn export_item_writes_plaintext_copy() {
    let h = ready().await;
    let item = add(&h.engine, "report.pdf", b"%PDF", None).await;

    let path = h.engine.export_item(&item.id).await.unwrap();
    assert_eq!(path.file_name().unwrap(), "report.pdf");
    assert_eq!(std::fs::read(&path).unwrap(), b"%PDF");
}

struct FlakySecrets {
    inner: MemorySecretStore,
    failing: AtomicBool,
}

#[async_trait]
impl SecretStore for FlakySecrets {
    async fn get(&self, name: &str) -> Result<Option<SensitiveBytes>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Storage("keychain unavailable".to_string()));
        }
        self.inner.get(name).await
    }
    async fn put(&self, name: &str, value: &[u8]) -> Result<()> {
        self.inner.put(name, value).await
    }
    async fn delete(&self, name: &str) -> Result<()> {
        self.inner.delete(name).await
    }
}

#[tokio::test]
async fn failed_prepare_returns_to_uninitialized() {
    let temp = TempDir::new().unwrap();
    let secrets = Arc::new(FlakySecrets {
        inner: MemorySecretStore::new(),
        failing: AtomicBool::new(true),
    });
    let engine = build(&temp, Arc::new(MemoryBlobStore::new()), secrets.clone());

    let err = engine.prepare().await.unwrap_err();
    match err {
        Error::Prepare(inner) => assert!(matches!(*inner, Error::KeyUnavailable(_))),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(engine.state(), EngineState::Uninitialized);

    secrets.failing.store(false, Ordering::SeqCst);
    engine.prepare().await.unwrap();
    assert!(engine.is_ready());
}

struct RecordingLibrary;

#[async_trait]
impl PhotoLibrary for RecordingLibrary {
    async fn delete_asset(&self, asset_id: &str) -> Result<bool> {
        Ok(asset_id == "IMG_0001")
    }
}

#[tokio::test]
async fn library_deletion_is_forwarded() {
    let temp = TempDir::new().unwrap();
    let engine = VaultEngine::builder(
        VaultConfig::new(temp.path()),
        Arc::new(MemorySecretStore::new()),
    )
    .blob_store(Arc::new(MemoryBlobStore::new()))
    .photo_library(Arc::new(RecordingLibrary))
    .build()
    .unwrap();

    assert!(engine.request_library_deletion("IMG_0001").await.unwrap());
    assert!(!engine.request_library_deletion("IMG_0002").await.unwrap());

    let bare = build(
        &temp,
        Arc::new(MemoryBlobStore::new()),
        Arc::new(MemorySecretStore::new()),
    );
    assert!(bare.request_library_deletion("IMG_0001").await.is_err());
}
