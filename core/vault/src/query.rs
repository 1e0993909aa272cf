//! Read-only query surface over an in-memory snapshot.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::item::{ItemKind, VaultItem};
use crate::tree::{build_tree, compare_names, FolderNode};
use vaultkeep_common::{FolderPath, ItemId};
use vaultkeep_crypto::ContentHash;

/// Narrow a listing by derived type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemFilter {
    #[default]
    All,
    Images,
    Videos,
    Documents,
    /// Everything that is not an image, video or document.
    Others,
}

impl ItemFilter {
    pub fn matches(&self, item: &VaultItem) -> bool {
        match self {
            ItemFilter::All => true,
            ItemFilter::Images => item.kind() == ItemKind::Image,
            ItemFilter::Videos => item.kind() == ItemKind::Video,
            ItemFilter::Documents => item.kind() == ItemKind::Document,
            ItemFilter::Others => item.kind() == ItemKind::Other,
        }
    }
}

/// Listing order. Every order is stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Newest,
    Oldest,
    NameAscending,
    NameDescending,
    SizeAscending,
    SizeDescending,
}

/// Count and plaintext bytes of one item kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KindStats {
    pub count: usize,
    pub bytes: u64,
}

/// Stably sort `items` in place.
pub fn sort_items(items: &mut [VaultItem], order: SortOrder) {
    match order {
        SortOrder::Newest => items.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        SortOrder::Oldest => items.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
        SortOrder::NameAscending => {
            items.sort_by(|a, b| compare_names(&a.original_name, &b.original_name))
        }
        SortOrder::NameDescending => {
            items.sort_by(|a, b| compare_names(&b.original_name, &a.original_name))
        }
        SortOrder::SizeAscending => items.sort_by_key(|i| i.size),
        SortOrder::SizeDescending => items.sort_by(|a, b| b.size.cmp(&a.size)),
    }
}

/// Move pinned items to the front, keeping relative order on both sides.
pub fn partition_pinned(items: Vec<VaultItem>, pinned: &HashSet<ItemId>) -> Vec<VaultItem> {
    let (mut front, back): (Vec<_>, Vec<_>) =
        items.into_iter().partition(|i| pinned.contains(&i.id));
    front.extend(back);
    front
}

/// Case-insensitive substring match on name, category and folder.
pub fn matches_search(item: &VaultItem, needle: &str) -> bool {
    let needle = needle.trim().to_lowercase();
    if needle.is_empty() {
        return true;
    }
    item.original_name.to_lowercase().contains(&needle)
        || item
            .category
            .as_deref()
            .is_some_and(|c| c.to_lowercase().contains(&needle))
        || item
            .folder_path
            .as_ref()
            .is_some_and(|f| f.as_string().to_lowercase().contains(&needle))
}

/// `"doc.pdf"` becomes `"doc (n).pdf"`; names without a stem dot keep the
/// suffix at the end.
fn numbered_name(base: &str, n: usize) -> String {
    match base.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{} ({}).{}", stem, n, ext),
        _ => format!("{} ({})", base, n),
    }
}

/// Point-in-time view of the vault used by every read query.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Newest first.
    pub items: Vec<VaultItem>,
    pub pinned: HashSet<ItemId>,
    pub folders: BTreeSet<FolderPath>,
    /// Last-opened epoch milliseconds.
    pub recency: HashMap<ItemId, i64>,
    pub open_counts: HashMap<ItemId, u64>,
}

impl Snapshot {
    pub fn get(&self, id: &ItemId) -> Option<&VaultItem> {
        self.items.iter().find(|i| &i.id == id)
    }

    pub fn is_pinned(&self, id: &ItemId) -> bool {
        self.pinned.contains(id)
    }

    pub fn open_count(&self, id: &ItemId) -> u64 {
        self.open_counts.get(id).copied().unwrap_or(0)
    }

    /// Search, filter, sort, then float pinned items to the front.
    pub fn filtered_items(&self, filter: ItemFilter, search: &str, sort: SortOrder) -> Vec<VaultItem> {
        let mut items: Vec<VaultItem> = self
            .items
            .iter()
            .filter(|i| filter.matches(i) && matches_search(i, search))
            .cloned()
            .collect();
        sort_items(&mut items, sort);
        partition_pinned(items, &self.pinned)
    }

    /// Items directly in `folder` (`None` = root), pinned first.
    pub fn items_in(&self, folder: Option<&FolderPath>) -> Vec<VaultItem> {
        let folder = folder.filter(|f| !f.is_root());
        let items = self.items.iter().filter(|i| i.is_in(folder)).cloned().collect();
        partition_pinned(items, &self.pinned)
    }

    pub fn folder_nodes(&self) -> Vec<FolderNode> {
        build_tree(&self.folders, &self.items)
    }

    /// Item named exactly `name` directly in `folder`.
    pub fn existing_item(&self, name: &str, folder: Option<&FolderPath>) -> Option<&VaultItem> {
        let folder = folder.filter(|f| !f.is_root());
        self.items
            .iter()
            .find(|i| i.original_name == name && i.is_in(folder))
    }

    /// First of `base`, `base (1)`, `base (2)`, ... not taken in `folder`.
    pub fn unique_item_name(&self, base: &str, folder: Option<&FolderPath>) -> String {
        let base = base.trim();
        if self.existing_item(base, folder).is_none() {
            return base.to_string();
        }
        (1..)
            .map(|n| numbered_name(base, n))
            .find(|candidate| self.existing_item(candidate, folder).is_none())
            .unwrap_or_else(|| base.to_string())
    }

    /// Groups of two or more items with identical plaintext.
    ///
    /// Groups appear in order of their newest member; members keep snapshot
    /// order.
    pub fn find_exact_duplicates(&self) -> Vec<Vec<VaultItem>> {
        let mut order: Vec<ContentHash> = Vec::new();
        let mut groups: HashMap<ContentHash, Vec<VaultItem>> = HashMap::new();
        for item in &self.items {
            groups
                .entry(item.content_hash)
                .or_insert_with(|| {
                    order.push(item.content_hash);
                    Vec::new()
                })
                .push(item.clone());
        }
        order
            .into_iter()
            .filter_map(|hash| groups.remove(&hash))
            .filter(|group| group.len() > 1)
            .collect()
    }

    /// Opened items, most recently opened first.
    pub fn recent_items(&self, limit: Option<usize>) -> Vec<VaultItem> {
        let mut opened: Vec<(i64, &VaultItem)> = self
            .items
            .iter()
            .filter_map(|i| self.recency.get(&i.id).map(|at| (*at, i)))
            .collect();
        opened.sort_by(|a, b| b.0.cmp(&a.0));
        opened
            .into_iter()
            .take(limit.unwrap_or(usize::MAX))
            .map(|(_, i)| i.clone())
            .collect()
    }

    /// Per-kind counts and plaintext bytes. Every kind is present.
    pub fn breakdown_by_type(&self) -> BTreeMap<ItemKind, KindStats> {
        let mut breakdown: BTreeMap<ItemKind, KindStats> = [
            ItemKind::Image,
            ItemKind::Video,
            ItemKind::Document,
            ItemKind::Other,
        ]
        .into_iter()
        .map(|k| (k, KindStats::default()))
        .collect();
        for item in &self.items {
            let stats = breakdown.entry(item.kind()).or_default();
            stats.count += 1;
            stats.bytes += item.size;
        }
        breakdown
    }

    /// Sum of plaintext sizes recorded in metadata.
    pub fn logical_bytes(&self) -> u64 {
        self.items.iter().map(|i| i.size).sum()
    }
}
