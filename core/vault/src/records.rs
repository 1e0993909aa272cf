//! Metadata catalog: one row per vault item.

use chrono::DateTime;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::Arc;
use tracing::debug;

use crate::db::Database;
use crate::item::VaultItem;
use vaultkeep_common::{Error, FolderPath, ItemId, PhysicalRef, Result};
use vaultkeep_crypto::ContentHash;

const COLUMNS: &str = "id, original_name, mime_type, size, created_at, physical_ref, \
                       category, folder_path, content_hash, is_image";

/// Column values before validation.
struct RawItem {
    id: String,
    original_name: String,
    mime_type: String,
    size: i64,
    created_at: i64,
    physical_ref: String,
    category: Option<String>,
    folder_path: Option<String>,
    content_hash: String,
    is_image: bool,
}

impl RawItem {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            original_name: row.get(1)?,
            mime_type: row.get(2)?,
            size: row.get(3)?,
            created_at: row.get(4)?,
            physical_ref: row.get(5)?,
            category: row.get(6)?,
            folder_path: row.get(7)?,
            content_hash: row.get(8)?,
            is_image: row.get(9)?,
        })
    }
}

impl TryFrom<RawItem> for VaultItem {
    type Error = Error;

    fn try_from(raw: RawItem) -> Result<Self> {
        let created_at = DateTime::from_timestamp_millis(raw.created_at).ok_or_else(|| {
            Error::Database(format!("Invalid timestamp for item {}", raw.id))
        })?;
        Ok(Self {
            id: ItemId::new(raw.id)?,
            original_name: raw.original_name,
            mime_type: raw.mime_type,
            size: u64::try_from(raw.size).unwrap_or(0),
            created_at,
            physical_ref: PhysicalRef::parse(raw.physical_ref)?,
            category: raw.category,
            folder_path: FolderPath::from_optional(raw.folder_path.as_deref()),
            content_hash: ContentHash::from_hex(&raw.content_hash)?,
            is_image: raw.is_image,
        })
    }
}

fn folder_column(folder: Option<&FolderPath>) -> Option<String> {
    folder.filter(|f| !f.is_root()).map(FolderPath::as_string)
}

fn query_items<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<VaultItem>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, RawItem::from_row)?;
    let mut items = Vec::new();
    for row in rows {
        items.push(VaultItem::try_from(row?)?);
    }
    Ok(items)
}

pub(crate) fn list_all(conn: &Connection) -> Result<Vec<VaultItem>> {
    query_items(
        conn,
        &format!("SELECT {COLUMNS} FROM items ORDER BY created_at DESC, rowid DESC"),
        [],
    )
}

pub(crate) fn find_by_folder_prefix(conn: &Connection, path: &FolderPath) -> Result<Vec<VaultItem>> {
    if path.is_root() {
        return list_all(conn);
    }
    let exact = path.as_string();
    let nested = format!("{}/", exact);
    query_items(
        conn,
        &format!(
            "SELECT {COLUMNS} FROM items \
             WHERE folder_path = ?1 OR substr(folder_path, 1, length(?2)) = ?2 \
             ORDER BY created_at DESC, rowid DESC"
        ),
        params![exact, nested],
    )
}

pub(crate) fn set_folder_of(conn: &Connection, id: &ItemId, folder: Option<&FolderPath>) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE items SET folder_path = ?1 WHERE id = ?2",
        params![folder_column(folder), id.as_str()],
    )?;
    Ok(changed > 0)
}

pub(crate) fn rewrite_folder_prefix(
    conn: &Connection,
    from: &FolderPath,
    to: &FolderPath,
) -> Result<usize> {
    let mut rewritten = 0;
    for item in find_by_folder_prefix(conn, from)? {
        let current = item.folder();
        if let Some(next) = current.rebase(from, to) {
            set_folder_of(conn, &item.id, Some(&next))?;
            rewritten += 1;
        }
    }
    Ok(rewritten)
}

pub(crate) fn delete_by_folder_prefix(conn: &Connection, path: &FolderPath) -> Result<Vec<VaultItem>> {
    let doomed = find_by_folder_prefix(conn, path)?;
    for item in &doomed {
        conn.execute("DELETE FROM items WHERE id = ?1", params![item.id.as_str()])?;
    }
    Ok(doomed)
}

/// Durable item catalog backed by SQLite.
pub struct RecordStore {
    db: Arc<Database>,
}

impl RecordStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new record.
    ///
    /// # Errors
    /// - `Error::Database` on constraint violation (duplicate id or blob)
    pub fn insert(&self, item: &VaultItem) -> Result<()> {
        debug!(id = %item.id, "Inserting record");
        self.db.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO items ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                ),
                params![
                    item.id.as_str(),
                    item.original_name,
                    item.mime_type,
                    i64::try_from(item.size).unwrap_or(i64::MAX),
                    item.created_at.timestamp_millis(),
                    item.physical_ref.as_str(),
                    item.category,
                    folder_column(item.folder_path.as_ref()),
                    item.content_hash.to_hex(),
                    item.is_image,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get(&self, id: &ItemId) -> Result<Option<VaultItem>> {
        self.db.with_conn(|conn| {
            let raw = conn
                .query_row(
                    &format!("SELECT {COLUMNS} FROM items WHERE id = ?1"),
                    [id.as_str()],
                    RawItem::from_row,
                )
                .optional()?;
            raw.map(VaultItem::try_from).transpose()
        })
    }

    /// Every record, newest first. No implicit limit.
    pub fn list_all(&self) -> Result<Vec<VaultItem>> {
        self.db.with_conn(list_all)
    }

    /// Records with the given ids, newest first. Unknown ids are skipped.
    pub fn find_by_ids(&self, ids: &[ItemId]) -> Result<Vec<VaultItem>> {
        let wanted: std::collections::HashSet<&ItemId> = ids.iter().collect();
        Ok(self
            .list_all()?
            .into_iter()
            .filter(|item| wanted.contains(&item.id))
            .collect())
    }

    /// Records directly in `folder` (`None` = root).
    pub fn find_by_exact_folder(&self, folder: Option<&FolderPath>) -> Result<Vec<VaultItem>> {
        self.db.with_conn(|conn| match folder_column(folder) {
            Some(path) => query_items(
                conn,
                &format!(
                    "SELECT {COLUMNS} FROM items WHERE folder_path = ?1 \
                     ORDER BY created_at DESC, rowid DESC"
                ),
                [path],
            ),
            None => query_items(
                conn,
                &format!(
                    "SELECT {COLUMNS} FROM items WHERE folder_path IS NULL \
                     ORDER BY created_at DESC, rowid DESC"
                ),
                [],
            ),
        })
    }

    /// Records in `path` or any folder nested under it.
    ///
    /// Matching is component-wise: `A` never matches `AB`.
    pub fn find_by_folder_prefix(&self, path: &FolderPath) -> Result<Vec<VaultItem>> {
        self.db.with_conn(|conn| find_by_folder_prefix(conn, path))
    }

    /// Change an item's display name. Returns `false` if the id is unknown.
    pub fn rename(&self, id: &ItemId, new_name: &str) -> Result<bool> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE items SET original_name = ?1 WHERE id = ?2",
                params![new_name, id.as_str()],
            )?;
            Ok(changed > 0)
        })
    }

    /// Move items to `folder` in one transaction. Returns rows changed.
    pub fn set_folder(&self, ids: &[ItemId], folder: Option<&FolderPath>) -> Result<usize> {
        self.db.transaction(|tx| {
            let mut changed = 0;
            for id in ids {
                if set_folder_of(tx, id, folder)? {
                    changed += 1;
                }
            }
            Ok(changed)
        })
    }

    /// Replace the `from` prefix with `to` on every record under `from`.
    pub fn rewrite_folder_prefix(&self, from: &FolderPath, to: &FolderPath) -> Result<usize> {
        self.db.transaction(|tx| rewrite_folder_prefix(tx, from, to))
    }

    /// Delete records by id in one transaction. Returns rows deleted.
    pub fn delete_by_ids(&self, ids: &[ItemId]) -> Result<usize> {
        self.db.transaction(|tx| {
            let mut deleted = 0;
            for id in ids {
                deleted += tx.execute("DELETE FROM items WHERE id = ?1", [id.as_str()])?;
            }
            Ok(deleted)
        })
    }

    /// Delete every record in or under `path`, returning what was removed.
    pub fn delete_by_folder_prefix(&self, path: &FolderPath) -> Result<Vec<VaultItem>> {
        self.db.transaction(|tx| delete_by_folder_prefix(tx, path))
    }

    /// Give records that have a category but no folder that category as
    /// their folder. Returns rows changed.
    pub fn adopt_category_as_folder(&self) -> Result<usize> {
        self.db.transaction(|tx| {
            let candidates: Vec<(String, String)> = {
                let mut stmt = tx.prepare(
                    "SELECT id, category FROM items \
                     WHERE folder_path IS NULL AND category IS NOT NULL",
                )?;
                let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
                rows.collect::<rusqlite::Result<_>>()?
            };

            let mut adopted = 0;
            for (id, category) in candidates {
                if let Some(folder) = FolderPath::from_optional(Some(&category)) {
                    tx.execute(
                        "UPDATE items SET folder_path = ?1 WHERE id = ?2",
                        params![folder.as_string(), id],
                    )?;
                    adopted += 1;
                }
            }
            Ok(adopted)
        })
    }

    /// Delete every record.
    pub fn clear(&self) -> Result<usize> {
        self.db
            .with_conn(|conn| Ok(conn.execute("DELETE FROM items", [])?))
    }

    pub fn count(&self) -> Result<usize> {
        self.db.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))?;
            Ok(usize::try_from(n).unwrap_or(0))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::fixtures::{item, item_in};
    use chrono::Duration;

    fn store() -> RecordStore {
        RecordStore::new(Arc::new(Database::in_memory().unwrap()))
    }

    #[test]
    fn test_insert_get_roundtrip() {
        let store = store();
        let mut record = item_in("report.pdf", "Work/2024");
        record.category = Some("Work".to_string());
        store.insert(&record).unwrap();

        assert_eq!(store.get(&record.id).unwrap(), Some(record.clone()));
        assert_eq!(store.count().unwrap(), 1);
        assert!(store.get(&ItemId::generate()).unwrap().is_none());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let store = store();
        let record = item("a.txt", "text/plain");
        store.insert(&record).unwrap();
        assert!(matches!(store.insert(&record), Err(Error::Database(_))));
    }

    #[test]
    fn test_list_all_newest_first() {
        let store = store();
        let mut old = item("old.txt", "text/plain");
        old.created_at = old.created_at - Duration::seconds(60);
        let new = item("new.txt", "text/plain");
        store.insert(&old).unwrap();
        store.insert(&new).unwrap();

        let names: Vec<_> = store
            .list_all()
            .unwrap()
            .into_iter()
            .map(|i| i.original_name)
            .collect();
        assert_eq!(names, ["new.txt", "old.txt"]);
    }

    #[test]
    fn test_prefix_match_is_component_wise() {
        let store = store();
        for (name, folder) in [("1", "X"), ("2", "X/Y"), ("3", "XY"), ("4", "X/Y/Z")] {
            store.insert(&item_in(name, folder)).unwrap();
        }
        store.insert(&item("root", "text/plain")).unwrap();

        let mut names: Vec<_> = store
            .find_by_folder_prefix(&FolderPath::parse("X"))
            .unwrap()
            .into_iter()
            .map(|i| i.original_name)
            .collect();
        names.sort();
        assert_eq!(names, ["1", "2", "4"]);

        let exact = store
            .find_by_exact_folder(Some(&FolderPath::parse("X")))
            .unwrap();
        assert_eq!(exact.len(), 1);
        let at_root = store.find_by_exact_folder(None).unwrap();
        assert_eq!(at_root[0].original_name, "root");
    }

    #[test]
    fn test_rewrite_folder_prefix() {
        let store = store();
        let inside = item_in("in", "A/B");
        let nested = item_in("nested", "A/B/C");
        let sibling = item_in("sibling", "A/BC");
        for i in [&inside, &nested, &sibling] {
            store.insert(i).unwrap();
        }

        let n = store
            .rewrite_folder_prefix(&FolderPath::parse("A/B"), &FolderPath::parse("C/B"))
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(
            store.get(&inside.id).unwrap().unwrap().folder_path,
            Some(FolderPath::parse("C/B"))
        );
        assert_eq!(
            store.get(&nested.id).unwrap().unwrap().folder_path,
            Some(FolderPath::parse("C/B/C"))
        );
        assert_eq!(
            store.get(&sibling.id).unwrap().unwrap().folder_path,
            Some(FolderPath::parse("A/BC"))
        );
    }

    #[test]
    fn test_rename_and_set_folder() {
        let store = store();
        let a = item("a.jpg", "image/jpeg");
        let b = item("b.jpg", "image/jpeg");
        store.insert(&a).unwrap();
        store.insert(&b).unwrap();

        assert!(store.rename(&a.id, "renamed.jpg").unwrap());
        assert!(!store.rename(&ItemId::generate(), "x").unwrap());
        assert_eq!(store.get(&a.id).unwrap().unwrap().original_name, "renamed.jpg");

        let folder = FolderPath::parse("Trips");
        assert_eq!(store.set_folder(&[a.id.clone(), b.id.clone()], Some(&folder)).unwrap(), 2);
        assert_eq!(store.find_by_exact_folder(Some(&folder)).unwrap().len(), 2);

        store.set_folder(&[a.id.clone()], None).unwrap();
        assert!(store.get(&a.id).unwrap().unwrap().folder_path.is_none());
    }

    #[test]
    fn test_delete_by_ids_and_prefix() {
        let store = store();
        let a = item_in("a", "X");
        let b = item_in("b", "X/Y");
        let c = item_in("c", "XY");
        for i in [&a, &b, &c] {
            store.insert(i).unwrap();
        }

        let removed = store.delete_by_folder_prefix(&FolderPath::parse("X")).unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(store.count().unwrap(), 1);

        assert_eq!(store.delete_by_ids(&[c.id.clone(), a.id.clone()]).unwrap(), 1);
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_find_by_ids() {
        let store = store();
        let a = item("a", "text/plain");
        let b = item("b", "text/plain");
        store.insert(&a).unwrap();
        store.insert(&b).unwrap();

        let found = store.find_by_ids(&[a.id.clone(), ItemId::generate()]).unwrap();
        assert_eq!(found, vec![a]);
    }

    #[test]
    fn test_adopt_category_as_folder() {
        let store = store();
        let mut legacy = item("legacy", "text/plain");
        legacy.category = Some("Receipts".to_string());
        let mut filed = item_in("filed", "Elsewhere");
        filed.category = Some("Receipts".to_string());
        let mut blank = item("blank", "text/plain");
        blank.category = Some("  ".to_string());
        for i in [&legacy, &filed, &blank] {
            store.insert(i).unwrap();
        }

        assert_eq!(store.adopt_category_as_folder().unwrap(), 1);
        assert_eq!(
            store.get(&legacy.id).unwrap().unwrap().folder_path,
            Some(FolderPath::parse("Receipts"))
        );
        assert_eq!(
            store.get(&filed.id).unwrap().unwrap().folder_path,
            Some(FolderPath::parse("Elsewhere"))
        );
        assert!(store.get(&blank.id).unwrap().unwrap().folder_path.is_none());
        assert_eq!(store.adopt_category_as_folder().unwrap(), 0);
    }

    #[test]
    fn test_clear() {
        let store = store();
        store.insert(&item("a", "text/plain")).unwrap();
        store.insert(&item("b", "text/plain")).unwrap();
        assert_eq!(store.clear().unwrap(), 2);
        assert_eq!(store.count().unwrap(), 0);
    }
}
