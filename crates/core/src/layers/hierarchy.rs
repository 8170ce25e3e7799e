//! Nested category tree for hierarchical layers.
//!
//! Each level's key is the corresponding classifier's output. Leaf file
//! lists live in their own field beside the child map, so a file list can
//! never collide with a category name.

use crate::types::FileId;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default)]
pub struct HNode {
    pub children: BTreeMap<String, HNode>,
    pub files: Vec<FileId>,
}

impl HNode {
    /// Insert a file under the given category chain, creating intermediate
    /// nodes as needed.
    pub fn insert(&mut self, levels: &[String], fid: FileId) {
        let mut node = self;
        for level in levels {
            node = node.children.entry(level.clone()).or_default();
        }
        node.files.push(fid);
    }

    /// Walk a segment chain through the category tree. `None` when any
    /// segment is not a category at its level.
    pub fn walk(&self, segments: &[&str]) -> Option<&HNode> {
        let mut node = self;
        for segment in segments {
            node = node.children.get(*segment)?;
        }
        Some(node)
    }

    /// Collect every file id in this subtree.
    pub fn collect_files(&self, out: &mut BTreeSet<FileId>) {
        out.extend(self.files.iter().copied());
        for child in self.children.values() {
            child.collect_files(out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_walk() {
        let mut root = HNode::default();
        root.insert(&["py".into(), "small".into()], 0);
        root.insert(&["py".into(), "small".into()], 1);
        root.insert(&["rs".into(), "tiny".into()], 2);

        let node = root.walk(&["py", "small"]).unwrap();
        assert_eq!(node.files, vec![0, 1]);
        assert!(root.walk(&["py", "huge"]).is_none());
        assert_eq!(root.walk(&[]).unwrap().children.len(), 2);
    }

    #[test]
    fn files_and_categories_coexist_at_a_node() {
        let mut root = HNode::default();
        root.insert(&["docs".into()], 0);
        root.insert(&["docs".into(), "old".into()], 1);

        let docs = root.walk(&["docs"]).unwrap();
        assert_eq!(docs.files, vec![0]);
        assert_eq!(docs.children.len(), 1);
    }

    #[test]
    fn collect_files_spans_subtree() {
        let mut root = HNode::default();
        root.insert(&["a".into()], 0);
        root.insert(&["a".into(), "b".into()], 1);
        root.insert(&["c".into()], 2);

        let mut all = BTreeSet::new();
        root.collect_files(&mut all);
        assert_eq!(all.len(), 3);

        let mut under_a = BTreeSet::new();
        root.walk(&["a"]).unwrap().collect_files(&mut under_a);
        assert_eq!(under_a, [0, 1].into());
    }
}
