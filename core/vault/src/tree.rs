//! Virtual folder tree.
//!
//! The tree is derived: it merges explicitly created folders with the
//! folders referenced by items, and is rebuilt from a snapshot on demand.

use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use crate::item::VaultItem;
use vaultkeep_common::FolderPath;

/// A folder in the virtual hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FolderNode {
    pub name: String,
    /// Components from the root to this node.
    pub path: FolderPath,
    /// Items directly in this folder.
    pub items: Vec<VaultItem>,
    pub children: Vec<FolderNode>,
}

impl FolderNode {
    /// Items in this folder and every descendant.
    pub fn total_items(&self) -> usize {
        self.items.len() + self.children.iter().map(FolderNode::total_items).sum::<usize>()
    }

    /// Find the node at `path` within this subtree.
    pub fn find(&self, path: &FolderPath) -> Option<&FolderNode> {
        if &self.path == path {
            return Some(self);
        }
        if !path.is_within(&self.path) {
            return None;
        }
        self.children.iter().find_map(|child| child.find(path))
    }
}

/// Case-insensitive name order, ties broken by exact name.
pub fn compare_names(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

#[derive(Default)]
struct Branch {
    children: BTreeMap<String, Branch>,
    items: Vec<VaultItem>,
}

impl Branch {
    fn descend(&mut self, path: &FolderPath) -> &mut Branch {
        path.components()
            .iter()
            .fold(self, |node, comp| node.children.entry(comp.clone()).or_default())
    }
}

fn materialize(children: BTreeMap<String, Branch>, parent: &FolderPath) -> Vec<FolderNode> {
    let mut nodes: Vec<FolderNode> = children
        .into_iter()
        .filter_map(|(name, branch)| {
            let path = parent.join(&name).ok()?;
            Some(FolderNode {
                children: materialize(branch.children, &path),
                items: branch.items,
                name,
                path,
            })
        })
        .collect();
    nodes.sort_by(|a, b| compare_names(&a.name, &b.name));
    nodes
}

/// Build the folder forest from explicit folders and item folders.
///
/// Root-level items are not part of any node. Each node's items keep the
/// order they have in `items`.
pub fn build_tree(folders: &BTreeSet<FolderPath>, items: &[VaultItem]) -> Vec<FolderNode> {
    let mut root = Branch::default();
    for folder in folders.iter().filter(|f| !f.is_root()) {
        root.descend(folder);
    }
    for item in items {
        if let Some(folder) = item.folder_path.as_ref().filter(|f| !f.is_root()) {
            root.descend(folder).items.push(item.clone());
        }
    }
    materialize(root.children, &FolderPath::root())
}
