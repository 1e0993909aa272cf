//! Auxiliary key/value tables stored next to the records.
//!
//! Each table is one JSON value under a fixed key in `side_tables`.

use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use crate::db::Database;
use vaultkeep_common::{Error, FolderPath, ItemId, Result};

pub(crate) const PINNED_KEY: &str = "pinned_ids";
pub(crate) const FOLDERS_KEY: &str = "folder_paths";
pub(crate) const RECENCY_KEY: &str = "recently_opened";
pub(crate) const OPEN_COUNTS_KEY: &str = "open_counts";
pub(crate) const LEGACY_MIGRATION_KEY: &str = "legacy_folder_migration_done";

pub(crate) fn get_json<T: DeserializeOwned>(conn: &Connection, key: &str) -> Result<Option<T>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM side_tables WHERE key = ?1",
            [key],
            |row| row.get(0),
        )
        .optional()?;
    raw.map(|json| serde_json::from_str(&json).map_err(Error::from))
        .transpose()
}

pub(crate) fn put_json<T: Serialize>(conn: &Connection, key: &str, value: &T) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO side_tables (key, value) VALUES (?1, ?2)",
        params![key, serde_json::to_string(value)?],
    )?;
    Ok(())
}

pub(crate) fn folders(conn: &Connection) -> Result<BTreeSet<FolderPath>> {
    Ok(get_json::<BTreeSet<FolderPath>>(conn, FOLDERS_KEY)?
        .unwrap_or_default()
        .into_iter()
        .filter(|p| !p.is_root())
        .collect())
}

/// Pins, folders, recency, open counters and the migration flag.
pub struct SideTables {
    db: Arc<Database>,
}

impl SideTables {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn pinned(&self) -> Result<HashSet<ItemId>> {
        self.db
            .with_conn(|conn| Ok(get_json(conn, PINNED_KEY)?.unwrap_or_default()))
    }

    /// Flip the pin of `id`. Returns the new state.
    pub fn toggle_pin(&self, id: &ItemId) -> Result<bool> {
        self.db.transaction(|tx| {
            let mut pins: HashSet<ItemId> = get_json(tx, PINNED_KEY)?.unwrap_or_default();
            let pinned = if pins.remove(id) {
                false
            } else {
                pins.insert(id.clone());
                true
            };
            put_json(tx, PINNED_KEY, &pins)?;
            Ok(pinned)
        })
    }

    /// Explicitly created folders.
    pub fn folders(&self) -> Result<BTreeSet<FolderPath>> {
        self.db.with_conn(folders)
    }

    /// Last-opened time per item, epoch milliseconds.
    pub fn recency(&self) -> Result<HashMap<ItemId, i64>> {
        self.db
            .with_conn(|conn| Ok(get_json(conn, RECENCY_KEY)?.unwrap_or_default()))
    }

    pub fn open_counts(&self) -> Result<HashMap<ItemId, u64>> {
        self.db
            .with_conn(|conn| Ok(get_json(conn, OPEN_COUNTS_KEY)?.unwrap_or_default()))
    }

    /// Stamp `id` as opened at `at_millis` and bump its counter.
    /// Returns the new open count.
    pub fn record_opened(&self, id: &ItemId, at_millis: i64) -> Result<u64> {
        self.db.transaction(|tx| {
            let mut recency: HashMap<ItemId, i64> = get_json(tx, RECENCY_KEY)?.unwrap_or_default();
            recency.insert(id.clone(), at_millis);
            put_json(tx, RECENCY_KEY, &recency)?;

            let mut counts: HashMap<ItemId, u64> =
                get_json(tx, OPEN_COUNTS_KEY)?.unwrap_or_default();
            let count = counts.entry(id.clone()).or_insert(0);
            *count += 1;
            let count = *count;
            put_json(tx, OPEN_COUNTS_KEY, &counts)?;
            Ok(count)
        })
    }

    /// Drop pins, recency and counters of deleted items.
    pub fn forget_items(&self, ids: &[ItemId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.db.transaction(|tx| {
            let mut pins: HashSet<ItemId> = get_json(tx, PINNED_KEY)?.unwrap_or_default();
            let mut recency: HashMap<ItemId, i64> = get_json(tx, RECENCY_KEY)?.unwrap_or_default();
            let mut counts: HashMap<ItemId, u64> =
                get_json(tx, OPEN_COUNTS_KEY)?.unwrap_or_default();
            for id in ids {
                pins.remove(id);
                recency.remove(id);
                counts.remove(id);
            }
            put_json(tx, PINNED_KEY, &pins)?;
            put_json(tx, RECENCY_KEY, &recency)?;
            put_json(tx, OPEN_COUNTS_KEY, &counts)?;
            Ok(())
        })
    }

    pub fn legacy_migration_done(&self) -> Result<bool> {
        self.db.with_conn(|conn| {
            Ok(get_json::<bool>(conn, LEGACY_MIGRATION_KEY)?.unwrap_or(false))
        })
    }

    pub fn mark_legacy_migration_done(&self) -> Result<()> {
        self.db
            .with_conn(|conn| put_json(conn, LEGACY_MIGRATION_KEY, &true))
    }

    /// Remove every side table, including the migration flag.
    pub fn clear(&self) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute("DELETE FROM side_tables", [])?;
            Ok(())
        })
    }
}
