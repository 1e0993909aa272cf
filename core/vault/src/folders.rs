//! Virtual folder namespace.
//!
//! Folders are logical: records carry a folder path and empty folders live
//! in the explicit folder set. Moving or renaming rewrites paths only; blobs
//! never move.

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::db::Database;
use crate::item::VaultItem;
use crate::records;
use crate::side_tables::{self, FOLDERS_KEY};
use crate::tree::{build_tree, FolderNode};
use vaultkeep_common::{Error, FolderPath, Result};

fn require_folder(path: &FolderPath) -> Result<()> {
    if path.is_root() {
        return Err(Error::InvalidInput("The root is not a folder".to_string()));
    }
    Ok(())
}

/// Folder operations over the index database.
pub struct FolderIndex {
    db: Arc<Database>,
}

impl FolderIndex {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Explicitly created folders.
    pub fn folders(&self) -> Result<BTreeSet<FolderPath>> {
        self.db.with_conn(side_tables::folders)
    }

    /// Record `path` as a folder. Returns `false` if it was already known.
    pub fn create_folder(&self, path: &FolderPath) -> Result<bool> {
        require_folder(path)?;
        self.db.transaction(|tx| {
            let mut folders = side_tables::folders(tx)?;
            if !folders.insert(path.clone()) {
                return Ok(false);
            }
            side_tables::put_json(tx, FOLDERS_KEY, &folders)?;
            debug!(folder = %path, "Folder created");
            Ok(true)
        })
    }

    /// Delete every record in or under `path` and forget the folder and its
    /// nested explicit folders. Returns the deleted records.
    ///
    /// Blobs are not touched here; the caller owns them.
    pub fn delete_folder(&self, path: &FolderPath) -> Result<Vec<VaultItem>> {
        require_folder(path)?;
        self.db.transaction(|tx| {
            let removed = records::delete_by_folder_prefix(tx, path)?;
            let mut folders = side_tables::folders(tx)?;
            folders.retain(|f| !f.is_within(path));
            side_tables::put_json(tx, FOLDERS_KEY, &folders)?;
            info!(folder = %path, items = removed.len(), "Folder deleted");
            Ok(removed)
        })
    }

    /// Move `from` under `parent` (`None` = root), keeping its name.
    ///
    /// Returns the new path, or `None` when the folder already lives there.
    ///
    /// # Errors
    /// - `Error::InvalidInput` if `from` is the root or `parent` lies inside
    ///   `from`
    pub fn move_folder(
        &self,
        from: &FolderPath,
        parent: Option<&FolderPath>,
    ) -> Result<Option<FolderPath>> {
        require_folder(from)?;
        let name = from
            .name()
            .ok_or_else(|| Error::InvalidInput("Folder has no name".to_string()))?;
        let target = parent.cloned().unwrap_or_else(FolderPath::root).join(name)?;
        self.relocate(from, target)
    }

    /// Give `path` a new last component.
    ///
    /// Returns the new path, or `None` when the name is unchanged. Renaming
    /// onto an existing sibling merges the two folders.
    pub fn rename_folder(&self, path: &FolderPath, new_name: &str) -> Result<Option<FolderPath>> {
        require_folder(path)?;
        let target = path.parent().unwrap_or_else(FolderPath::root).join(new_name)?;
        self.relocate(path, target)
    }

    fn relocate(&self, from: &FolderPath, to: FolderPath) -> Result<Option<FolderPath>> {
        if &to == from {
            return Ok(None);
        }
        if to.is_within(from) {
            return Err(Error::InvalidInput(format!(
                "Cannot move folder {} into itself",
                from
            )));
        }

        self.db.transaction(|tx| {
            let rewritten = records::rewrite_folder_prefix(tx, from, &to)?;
            let folders: BTreeSet<FolderPath> = side_tables::folders(tx)?
                .into_iter()
                .map(|f| f.rebase(from, &to).unwrap_or(f))
                .collect();
            side_tables::put_json(tx, FOLDERS_KEY, &folders)?;
            info!(from = %from, to = %to, items = rewritten, "Folder moved");
            Ok(())
        })?;
        Ok(Some(to))
    }

    /// Materialize the tree from durable state.
    pub fn tree(&self) -> Result<Vec<FolderNode>> {
        self.db.with_conn(|conn| {
            let folders = side_tables::folders(conn)?;
            let items = records::list_all(conn)?;
            Ok(build_tree(&folders, &items))
        })
    }
}
