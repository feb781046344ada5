use hashlink::LinkedHashMap;
use serde_derive::{Deserialize, Serialize};

use crate::tree::{Directory, PathTree, TreeNode};

/// Named entries of an exported directory, in insertion order unless sorted.
pub type Entries<T> = LinkedHashMap<String, T>;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ExportDirectory {
    pub name: String,
    pub total: u64,
    pub files: Entries<u64>,
    pub subdirectories: Entries<ExportDirectory>,
}

/// A file exports as its bare count, a directory as an [`ExportDirectory`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum ExportNode {
    File(u64),
    Directory(ExportDirectory),
}

impl ExportDirectory {
    /// Reorders `files` and `subdirectories` by name, recursively.
    pub fn sorted(self) -> Self {
        ExportDirectory {
            name: self.name,
            total: self.total,
            files: sort_entries(self.files, |count| count),
            subdirectories: sort_entries(self.subdirectories, ExportDirectory::sorted),
        }
    }
}

impl ExportNode {
    pub fn sorted(self) -> Self {
        match self {
            ExportNode::Directory(directory) => ExportNode::Directory(directory.sorted()),
            file => file,
        }
    }

    pub fn total(&self) -> u64 {
        match self {
            ExportNode::File(count) => *count,
            ExportNode::Directory(directory) => directory.total,
        }
    }
}

fn sort_entries<T>(entries: Entries<T>, f: impl Fn(T) -> T) -> Entries<T> {
    let mut entries: Vec<(String, T)> = entries.into_iter().collect();
    entries.sort_by(|(a, _), (b, _)| a.cmp(b));
    entries
        .into_iter()
        .map(|(name, value)| (name, f(value)))
        .collect()
}

impl Directory {
    pub fn to_export(&self) -> ExportDirectory {
        let mut files = Entries::new();
        let mut subdirectories = Entries::new();
        for (name, child) in self.children() {
            match child {
                TreeNode::File { count, .. } => {
                    files.insert(name.clone(), *count);
                }
                TreeNode::Directory(directory) => {
                    subdirectories.insert(name.clone(), directory.to_export());
                }
            }
        }
        ExportDirectory {
            name: self.name().to_string(),
            total: self.total(),
            files,
            subdirectories,
        }
    }
}

impl TreeNode {
    pub fn to_export(&self) -> ExportNode {
        match self {
            TreeNode::File { .. } => ExportNode::File(self.own_count()),
            TreeNode::Directory(directory) => ExportNode::Directory(directory.to_export()),
        }
    }
}

impl PathTree {
    /// The whole tree, starting at the unnamed root directory.
    pub fn to_export_tree(&self) -> ExportDirectory {
        self.root().to_export()
    }
}
