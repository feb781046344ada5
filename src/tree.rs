use std::borrow::Borrow;
use std::fmt;
use std::iter;

use hashlink::LinkedHashMap;
use tracing::trace;

use crate::record::Record;

/// Children of a directory, in insertion order.
pub type Children = LinkedHashMap<String, TreeNode>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Directory,
    File,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Directory => f.write_str("directory"),
            NodeKind::File => f.write_str("file"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    #[error("path has no segments")]
    EmptyPath,

    #[error("count {count} for {path:?} is negative")]
    InvalidCount { path: String, count: i64 },

    #[error("cannot insert {path:?}: {segment:?} already exists as a {existing}")]
    StructuralConflict {
        path: String,
        segment: String,
        existing: NodeKind,
    },

    #[error("inserting {path:?} would overflow a directory total")]
    CountOverflow { path: String },

    #[error("no node at {path:?}")]
    NotFound { path: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directory {
    name: String,
    /// Sum of the aggregate counts of `children`.
    total: u64,
    children: Children,
}

impl Directory {
    fn new(name: &str) -> Self {
        Directory {
            name: name.to_string(),
            total: 0,
            children: Children::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn children(&self) -> &Children {
        &self.children
    }

    pub fn child(&self, name: &str) -> Option<&TreeNode> {
        self.children.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Number of files anywhere below this directory.
    pub fn file_count(&self) -> usize {
        self.children.values().map(TreeNode::file_count).sum()
    }

    /// The total this directory would have after setting `segments` to
    /// `count`, without touching anything.
    fn planned_total(&self, segments: &[&str], count: u64, path: &str) -> Result<u64, TreeError> {
        let Some((name, rest)) = segments.split_first() else {
            return Err(TreeError::EmptyPath);
        };

        let updated = match (self.children.get(*name), rest.is_empty()) {
            (Some(TreeNode::Directory(_)), true) => {
                return Err(conflict(path, name, NodeKind::Directory))
            }
            (Some(TreeNode::File { .. }), false) => {
                return Err(conflict(path, name, NodeKind::File))
            }
            (Some(TreeNode::Directory(directory)), false) => {
                directory.planned_total(rest, count, path)?
            }
            // A new chain of directories holds nothing but the new file.
            (Some(TreeNode::File { .. }), true) | (None, _) => count,
        };

        let others = self
            .children
            .iter()
            .filter(|(child_name, _)| child_name.as_str() != *name)
            .map(|(_, child)| child.aggregate_count());
        checked_total(others.chain(iter::once(updated)), path)
    }

    /// Sets the file at `segments` and recomputes the totals on the way back
    /// up. Only called once `planned_total` has accepted the same insertion.
    fn apply(&mut self, segments: &[&str], count: u64, path: &str) -> Result<(), TreeError> {
        let Some((name, rest)) = segments.split_first() else {
            return Err(TreeError::EmptyPath);
        };

        if rest.is_empty() {
            match self.children.get_mut(*name) {
                Some(TreeNode::File { count: existing, .. }) => *existing = count,
                Some(TreeNode::Directory(_)) => {
                    return Err(conflict(path, name, NodeKind::Directory))
                }
                None => {
                    trace!(path, name = *name, count, "new file");
                    self.children.insert(
                        name.to_string(),
                        TreeNode::File {
                            name: name.to_string(),
                            count,
                        },
                    );
                }
            }
        } else {
            let child = self
                .children
                .entry(name.to_string())
                .or_insert_with(|| TreeNode::Directory(Directory::new(name)));
            match child {
                TreeNode::Directory(directory) => directory.apply(rest, count, path)?,
                TreeNode::File { .. } => return Err(conflict(path, name, NodeKind::File)),
            }
        }

        // Recompute rather than add a delta so re-inserting a path cannot double count.
        self.total = checked_total(self.children.values().map(TreeNode::aggregate_count), path)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeNode {
    Directory(Directory),
    File { name: String, count: u64 },
}

impl TreeNode {
    pub fn name(&self) -> &str {
        match self {
            TreeNode::Directory(directory) => directory.name(),
            TreeNode::File { name, .. } => name,
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            TreeNode::Directory(_) => NodeKind::Directory,
            TreeNode::File { .. } => NodeKind::File,
        }
    }

    /// Directories never carry a count of their own.
    pub fn own_count(&self) -> u64 {
        match self {
            TreeNode::Directory(_) => 0,
            TreeNode::File { count, .. } => *count,
        }
    }

    pub fn aggregate_count(&self) -> u64 {
        match self {
            TreeNode::Directory(directory) => directory.total(),
            TreeNode::File { count, .. } => *count,
        }
    }

    pub fn children(&self) -> Option<&Children> {
        match self {
            TreeNode::Directory(directory) => Some(directory.children()),
            TreeNode::File { .. } => None,
        }
    }

    pub fn child(&self, name: &str) -> Option<&TreeNode> {
        self.children().and_then(|children| children.get(name))
    }

    /// Number of file nodes at or below this node.
    pub fn file_count(&self) -> usize {
        match self {
            TreeNode::Directory(directory) => directory.file_count(),
            TreeNode::File { .. } => 1,
        }
    }
}

/// Builds a directory tree out of flat `(path, count)` records, keeping every
/// directory's total equal to the sum of its children.
#[derive(Debug, Clone)]
pub struct PathTree {
    root: Directory,
    separator: char,
}

impl Default for PathTree {
    fn default() -> Self {
        PathTree::new('/')
    }
}

impl PathTree {
    pub fn new(separator: char) -> Self {
        PathTree {
            root: Directory::new(""),
            separator,
        }
    }

    pub fn separator(&self) -> char {
        self.separator
    }

    /// The unnamed top-level directory.
    pub fn root(&self) -> &Directory {
        &self.root
    }

    pub fn total(&self) -> u64 {
        self.root.total()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Number of files in the tree.
    pub fn len(&self) -> usize {
        self.root.file_count()
    }

    fn segments<'p>(&self, path: &'p str) -> Vec<&'p str> {
        path.split(self.separator)
            .filter(|segment| !segment.is_empty())
            .collect()
    }

    /// Sets the count of the file at `path`, creating any missing directories
    /// on the way. On error the tree is left untouched.
    pub fn insert(&mut self, path: &str, count: i64) -> Result<(), TreeError> {
        let segments = self.segments(path);
        if segments.is_empty() {
            return Err(TreeError::EmptyPath);
        }
        let count = u64::try_from(count).map_err(|_| TreeError::InvalidCount {
            path: path.to_string(),
            count,
        })?;

        self.root.planned_total(&segments, count, path)?;
        self.root.apply(&segments, count, path)
    }

    /// Inserts `records` in order, stopping at the first rejected one.
    pub fn insert_all<I, R>(&mut self, records: I) -> Result<(), TreeError>
    where
        I: IntoIterator<Item = R>,
        R: Borrow<Record>,
    {
        for record in records {
            let record = record.borrow();
            self.insert(&record.path, record.count)?;
        }
        Ok(())
    }

    /// Inserts `records` in order and hands back the ones that were rejected,
    /// together with the reason, instead of stopping.
    pub fn insert_all_skipping_conflicts<I, R>(&mut self, records: I) -> Vec<(R, TreeError)>
    where
        I: IntoIterator<Item = R>,
        R: Borrow<Record>,
    {
        let mut rejected = Vec::new();
        for record in records {
            let result = {
                let record = record.borrow();
                self.insert(&record.path, record.count)
            };
            if let Err(err) = result {
                rejected.push((record, err));
            }
        }
        rejected
    }

    /// Looks up the node at `path`. The root itself is not a node; use
    /// [`PathTree::root`] for it.
    pub fn query(&self, path: &str) -> Result<&TreeNode, TreeError> {
        let not_found = || TreeError::NotFound {
            path: path.to_string(),
        };
        let segments = self.segments(path);
        let (first, rest) = segments.split_first().ok_or_else(not_found)?;
        let mut current = self.root.child(first).ok_or_else(not_found)?;
        for segment in rest {
            current = current.child(segment).ok_or_else(not_found)?;
        }
        Ok(current)
    }
}

fn checked_total(mut counts: impl Iterator<Item = u64>, path: &str) -> Result<u64, TreeError> {
    counts
        .try_fold(0u64, u64::checked_add)
        .ok_or_else(|| TreeError::CountOverflow {
            path: path.to_string(),
        })
}

fn conflict(path: &str, segment: &str, existing: NodeKind) -> TreeError {
    TreeError::StructuralConflict {
        path: path.to_string(),
        segment: segment.to_string(),
        existing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;

    fn assert_rollup(directory: &Directory) {
        let children = directory.children();
        let sum: u64 = children.values().map(TreeNode::aggregate_count).sum();
        assert_eq!(
            directory.total(),
            sum,
            "directory {:?} does not roll up",
            directory.name()
        );
        for child in children.values() {
            match child {
                TreeNode::Directory(directory) => {
                    assert_eq!(child.own_count(), 0);
                    assert_rollup(directory);
                }
                TreeNode::File { .. } => assert_eq!(child.own_count(), child.aggregate_count()),
            }
        }
    }

    fn records(pairs: &[(&str, i64)]) -> Vec<Record> {
        pairs
            .iter()
            .map(|(path, count)| Record::new(*path, *count))
            .collect()
    }

    #[test]
    fn test_concrete_scenario() {
        let mut tree = PathTree::default();
        tree.insert_all(&records(&[
            ("src/x.cpp", 2),
            ("src/y.cpp", 3),
            ("src/sub/z.cpp", 1),
        ]))
        .unwrap();

        let src = tree.query("src").unwrap();
        assert_eq!(src.kind(), NodeKind::Directory);
        assert_eq!(src.aggregate_count(), 6);
        assert_eq!(tree.query("src/x.cpp").unwrap().own_count(), 2);
        assert_eq!(tree.query("src/y.cpp").unwrap().own_count(), 3);
        assert_eq!(tree.query("src/sub").unwrap().aggregate_count(), 1);
        assert_eq!(tree.query("src/sub/z.cpp").unwrap().kind(), NodeKind::File);
        assert_eq!(tree.total(), 6);
        assert_eq!(tree.len(), 3);
    }

    #[test]
    fn test_rollup_holds_after_every_insert() {
        let mut tree = PathTree::default();
        for record in records(&[
            ("a/b/c.cpp", 4),
            ("a/d.cpp", 1),
            ("a/b/e/f.cpp", 7),
            ("g.cpp", 2),
            ("a/b/c.cpp", 1),
            ("a/b/e/h.cpp", 0),
        ]) {
            tree.insert(&record.path, record.count).unwrap();
            assert_rollup(tree.root());
        }
        assert_eq!(tree.total(), 11);
        assert_eq!(tree.query("a/b").unwrap().aggregate_count(), 8);
    }

    #[test]
    fn test_reinsert_is_idempotent() {
        let mut once = PathTree::default();
        once.insert("src/x.cpp", 5).unwrap();

        let mut twice = PathTree::default();
        twice.insert("src/x.cpp", 5).unwrap();
        twice.insert("src/x.cpp", 5).unwrap();

        assert_eq!(once.root(), twice.root());
        assert_eq!(twice.total(), 5);
    }

    #[test]
    fn test_reinsert_replaces_count() {
        let mut tree = PathTree::default();
        tree.insert("src/x.cpp", 5).unwrap();
        tree.insert("src/y.cpp", 1).unwrap();
        tree.insert("src/x.cpp", 2).unwrap();
        assert_eq!(tree.query("src").unwrap().aggregate_count(), 3);
    }

    #[test]
    fn test_order_independence() {
        let set = records(&[
            ("src/x.cpp", 2),
            ("src/y.cpp", 3),
            ("src/sub/z.cpp", 1),
            ("lib/w.cpp", 9),
        ]);

        let mut forward = PathTree::default();
        forward.insert_all(&set).unwrap();
        let mut backward = PathTree::default();
        backward.insert_all(set.iter().rev()).unwrap();

        assert_eq!(
            forward.to_export_tree().sorted(),
            backward.to_export_tree().sorted()
        );
        assert_eq!(forward.total(), backward.total());
    }

    #[test]
    fn test_descending_into_file_conflicts() {
        let mut tree = PathTree::default();
        tree.insert("a/b", 3).unwrap();
        let err = tree.insert("a/b/c", 1).unwrap_err();
        assert_eq!(
            err,
            TreeError::StructuralConflict {
                path: "a/b/c".to_string(),
                segment: "b".to_string(),
                existing: NodeKind::File,
            }
        );
        // Nothing changed.
        assert_eq!(tree.query("a/b").unwrap().own_count(), 3);
        assert_eq!(tree.total(), 3);
    }

    #[test]
    fn test_file_over_directory_conflicts() {
        let mut tree = PathTree::default();
        tree.insert("a/b/c", 1).unwrap();
        let err = tree.insert("a/b", 3).unwrap_err();
        assert!(matches!(
            err,
            TreeError::StructuralConflict {
                existing: NodeKind::Directory,
                ..
            }
        ));
        assert_eq!(tree.query("a/b").unwrap().kind(), NodeKind::Directory);
        assert_eq!(tree.total(), 1);
    }

    #[rstest]
    #[case("")]
    #[case("/")]
    #[case("//")]
    fn test_empty_path(#[case] path: &str) {
        let mut tree = PathTree::default();
        assert_eq!(tree.insert(path, 1), Err(TreeError::EmptyPath));
        assert!(tree.is_empty());
    }

    #[test]
    fn test_negative_count() {
        let mut tree = PathTree::default();
        assert_eq!(
            tree.insert("src/x.cpp", -1),
            Err(TreeError::InvalidCount {
                path: "src/x.cpp".to_string(),
                count: -1,
            })
        );
        assert!(tree.is_empty());
    }

    #[test]
    fn test_insert_all_stops_at_first_error() {
        let mut tree = PathTree::default();
        let result = tree.insert_all(&records(&[("a/b", 3), ("a/b/c", 1), ("d", 2)]));
        assert!(matches!(result, Err(TreeError::StructuralConflict { .. })));
        assert!(tree.query("d").is_err());
    }

    #[test]
    fn test_skipping_conflicts_reports_rejected() {
        let mut tree = PathTree::default();
        let rejected = tree.insert_all_skipping_conflicts(records(&[
            ("a/b", 3),
            ("a/b/c", 1),
            ("d", -2),
            ("e", 2),
        ]));
        assert_eq!(rejected.len(), 2);
        assert_eq!(rejected[0].0.path, "a/b/c");
        assert!(matches!(rejected[1].1, TreeError::InvalidCount { .. }));
        assert_eq!(tree.total(), 5);
    }

    #[test]
    fn test_empty_input_is_empty_tree() {
        let mut tree = PathTree::default();
        tree.insert_all(Vec::<Record>::new()).unwrap();
        assert!(tree.is_empty());
        assert_eq!(tree.total(), 0);
        assert_eq!(tree.len(), 0);
    }

    #[test]
    fn test_query_not_found() {
        let mut tree = PathTree::default();
        tree.insert("src/x.cpp", 1).unwrap();
        assert_eq!(
            tree.query("src/nope.cpp"),
            Err(TreeError::NotFound {
                path: "src/nope.cpp".to_string()
            })
        );
        // Cannot look inside a file either.
        assert!(tree.query("src/x.cpp/deeper").is_err());
    }

    #[test]
    fn test_root_is_not_a_node() {
        let mut tree = PathTree::default();
        tree.insert("src/x.cpp", 4).unwrap();
        assert_eq!(tree.root().name(), "");
        assert_eq!(tree.root().total(), 4);
        assert!(matches!(tree.query(""), Err(TreeError::NotFound { .. })));
        assert!(matches!(tree.query("/"), Err(TreeError::NotFound { .. })));
    }

    #[test]
    fn test_total_overflow_is_rejected() {
        let mut tree = PathTree::default();
        tree.insert("a/x.cpp", i64::MAX).unwrap();
        tree.insert("a/y.cpp", i64::MAX).unwrap();
        let before = tree.clone();

        assert_eq!(
            tree.insert("a/z.cpp", i64::MAX),
            Err(TreeError::CountOverflow {
                path: "a/z.cpp".to_string()
            })
        );
        assert_eq!(tree.root(), before.root());
        assert!(tree.query("a/z.cpp").is_err());
        assert_eq!(tree.total(), 2 * i64::MAX as u64);
        assert_rollup(tree.root());
    }

    #[test]
    fn test_raising_a_count_into_overflow_keeps_old_count() {
        let mut tree = PathTree::default();
        tree.insert("a/x.cpp", i64::MAX).unwrap();
        tree.insert("b/y.cpp", i64::MAX).unwrap();
        tree.insert("b/z.cpp", 0).unwrap();
        tree.insert("b/z.cpp", 1).unwrap();
        assert_eq!(tree.total(), u64::MAX);

        let result = tree.insert("b/z.cpp", i64::MAX);
        assert!(matches!(result, Err(TreeError::CountOverflow { .. })));
        assert_eq!(tree.query("b/z.cpp").unwrap().own_count(), 1);
        assert_rollup(tree.root());
    }

    #[test]
    fn test_skipping_overflow_keeps_going() {
        let mut tree = PathTree::default();
        let rejected = tree.insert_all_skipping_conflicts(records(&[
            ("a/x.cpp", i64::MAX),
            ("a/y.cpp", i64::MAX),
            ("a/z.cpp", i64::MAX),
            ("b.cpp", 1),
        ]));
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].0.path, "a/z.cpp");
        assert_eq!(tree.query("b.cpp").unwrap().own_count(), 1);
        assert_rollup(tree.root());
    }

    #[test]
    fn test_backslash_separator() {
        let mut tree = PathTree::new('\\');
        tree.insert(r"Protocol\MQTT\CDO.cpp", 2).unwrap();
        tree.insert(r"Protocol\Modbus\ModbusTCP.cpp", 5).unwrap();
        assert_eq!(tree.query("Protocol").unwrap().aggregate_count(), 7);
        assert_eq!(tree.query(r"Protocol\MQTT").unwrap().aggregate_count(), 2);
        // Forward slashes are part of the name with this separator.
        assert!(tree.query("Protocol/MQTT").is_err());
    }

    #[test]
    fn test_segments_are_case_sensitive() {
        let mut tree = PathTree::default();
        tree.insert("Src/a.cpp", 1).unwrap();
        tree.insert("src/a.cpp", 2).unwrap();
        assert_eq!(tree.query("Src").unwrap().aggregate_count(), 1);
        assert_eq!(tree.query("src").unwrap().aggregate_count(), 2);
    }
}
