//! Virtual layers: organizational projections over the indexed file set.
//!
//! A layer owns a reverse index (`category → [files]`) rebuilt on demand.
//! Index state walks `Empty → Built → Stale → Built`; invalidation marks
//! the layer stale and the next resolve or list rebuilds under the layer's
//! exclusion lock. Indexes reference files by arena id, so a rebuild is an
//! atomic replacement and never copies file metadata.

pub mod classifier;
pub mod date;
pub mod hierarchy;
pub mod tag;

use crate::error::{FsError, FsResult};
use crate::types::{FileId, FileInfo};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;
use tracing::debug;

pub use classifier::{Classifier, ClassifierKind};
pub use date::DateField;
pub use hierarchy::HNode;
pub use tag::TagExtractor;

/// Level sentinel for files a hierarchy classifier could not place.
pub const UNCLASSIFIED: &str = "__unclassified__";

/// The per-variant behavior of a layer.
pub enum LayerKind {
    Classifier(Classifier),
    Date(DateField),
    Tag(Vec<TagExtractor>),
    Hierarchy(Vec<Classifier>),
}

impl LayerKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            LayerKind::Classifier(_) => "classifier",
            LayerKind::Date(_) => "date",
            LayerKind::Tag(_) => "tag",
            LayerKind::Hierarchy(_) => "hierarchical",
        }
    }
}

/// One entry in a synthetic directory listing. `file` is set for leaves.
#[derive(Debug, Clone)]
pub struct LayerEntry {
    pub name: String,
    pub file: Option<FileId>,
}

/// What a layer sub-path points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerNode {
    Dir,
    File(FileId),
}

/// The rule-admitted slice of the arena a layer indexes over.
#[derive(Clone, Copy)]
pub struct LayerView<'a> {
    pub files: &'a [FileInfo],
    pub admitted: &'a [FileId],
}

enum IndexState {
    Empty,
    Built(LayerIndex),
    Stale,
}

enum LayerIndex {
    /// Classifier and tag layers: one level of categories.
    Flat(BTreeMap<String, Vec<FileId>>),
    /// Date layers: year → month → day.
    Dated(BTreeMap<String, BTreeMap<String, BTreeMap<String, Vec<FileId>>>>),
    /// Hierarchical layers: nested categories of arbitrary depth.
    Tree(HNode),
}

/// A named virtual layer with its index and exclusion lock.
pub struct Layer {
    pub name: String,
    pub kind: LayerKind,
    index: RwLock<IndexState>,
}

/// Collapse a raw classifier/tag output into a single path segment. Returns
/// `None` for outputs that are empty after trimming.
pub fn sanitize_category(raw: &str) -> Option<String> {
    let cleaned = raw.trim().replace('/', "-");
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

impl Layer {
    pub fn new(name: String, kind: LayerKind) -> Self {
        Self { name, kind, index: RwLock::new(IndexState::Empty) }
    }

    /// Transition to Stale; the next resolve or list rebuilds.
    pub fn mark_stale(&self) {
        let mut guard = self.index.write().unwrap_or_else(|p| p.into_inner());
        if matches!(*guard, IndexState::Built(_)) {
            *guard = IndexState::Stale;
        }
    }

    /// Build the index from the current admitted file set, replacing any
    /// prior index atomically. Deterministic and idempotent.
    pub fn build_index(&self, view: &LayerView<'_>) {
        let built = self.build(view);
        let mut guard = self.index.write().unwrap_or_else(|p| p.into_inner());
        *guard = IndexState::Built(built);
    }

    /// Full rebuild, regardless of current state.
    pub fn refresh(&self, view: &LayerView<'_>) {
        self.build_index(view);
    }

    fn ensure_built(&self, view: &LayerView<'_>) {
        {
            let guard = self.index.read().unwrap_or_else(|p| p.into_inner());
            if matches!(*guard, IndexState::Built(_)) {
                return;
            }
        }
        let mut guard = self.index.write().unwrap_or_else(|p| p.into_inner());
        if !matches!(*guard, IndexState::Built(_)) {
            debug!(layer = self.name.as_str(), "rebuilding layer index");
            *guard = IndexState::Built(self.build(view));
        }
    }

    fn build(&self, view: &LayerView<'_>) -> LayerIndex {
        match &self.kind {
            LayerKind::Classifier(classifier) => {
                let ctx = classifier.prepare(view);
                let mut map: BTreeMap<String, Vec<FileId>> = BTreeMap::new();
                for &fid in view.admitted {
                    let file = &view.files[fid as usize];
                    let raw = classifier.classify(file, &ctx);
                    let category =
                        sanitize_category(&raw).unwrap_or_else(|| UNCLASSIFIED.to_string());
                    map.entry(category).or_default().push(fid);
                }
                LayerIndex::Flat(map)
            }
            LayerKind::Date(field) => {
                let mut map: BTreeMap<String, BTreeMap<String, BTreeMap<String, Vec<FileId>>>> =
                    BTreeMap::new();
                for &fid in view.admitted {
                    let file = &view.files[fid as usize];
                    let (year, month, day) = date::date_keys(field.timestamp(file));
                    map.entry(year)
                        .or_default()
                        .entry(month)
                        .or_default()
                        .entry(day)
                        .or_default()
                        .push(fid);
                }
                LayerIndex::Dated(map)
            }
            LayerKind::Tag(extractors) => {
                let mut map: BTreeMap<String, Vec<FileId>> = BTreeMap::new();
                for &fid in view.admitted {
                    let file = &view.files[fid as usize];
                    let mut tags: BTreeSet<String> = BTreeSet::new();
                    for extractor in extractors {
                        tags.extend(extractor.extract(file));
                    }
                    for tag in tags {
                        if let Some(tag) = sanitize_category(&tag) {
                            map.entry(tag).or_default().push(fid);
                        }
                    }
                }
                LayerIndex::Flat(map)
            }
            LayerKind::Hierarchy(classifiers) => {
                let ctxs: Vec<_> = classifiers.iter().map(|c| c.prepare(view)).collect();
                let mut root = HNode::default();
                for &fid in view.admitted {
                    let file = &view.files[fid as usize];
                    let levels: Vec<String> = classifiers
                        .iter()
                        .zip(&ctxs)
                        .map(|(c, ctx)| {
                            sanitize_category(&c.classify(file, ctx))
                                .unwrap_or_else(|| UNCLASSIFIED.to_string())
                        })
                        .collect();
                    root.insert(&levels, fid);
                }
                LayerIndex::Tree(root)
            }
        }
    }

    /// Resolve a layer-relative sub-path to its backing file.
    pub fn resolve(&self, sub: &str, view: &LayerView<'_>) -> FsResult<FileId> {
        match self.lookup(sub, view)? {
            LayerNode::File(fid) => Ok(fid),
            LayerNode::Dir => Err(FsError::InvalidInput(format!(
                "{}/{sub} is a synthetic directory",
                self.name
            ))),
        }
    }

    /// Classify a sub-path as a synthetic directory or a file leaf.
    pub fn lookup(&self, sub: &str, view: &LayerView<'_>) -> FsResult<LayerNode> {
        self.ensure_built(view);
        let guard = self.index.read().unwrap_or_else(|p| p.into_inner());
        let IndexState::Built(index) = &*guard else {
            return Err(FsError::Internal(format!("layer {} index unavailable", self.name)));
        };

        if sub.is_empty() {
            return Ok(LayerNode::Dir);
        }
        let segments: Vec<&str> = sub.split('/').collect();

        match index {
            LayerIndex::Flat(map) => match segments.as_slice() {
                [category] => {
                    if map.contains_key(*category) {
                        Ok(LayerNode::Dir)
                    } else {
                        Err(not_found(&self.name, sub))
                    }
                }
                [category, name] => {
                    let ids = map.get(*category).ok_or_else(|| not_found(&self.name, sub))?;
                    find_by_name(ids, name, view)
                        .map(LayerNode::File)
                        .ok_or_else(|| not_found(&self.name, sub))
                }
                _ => Err(not_found(&self.name, sub)),
            },
            LayerIndex::Dated(map) => match segments.as_slice() {
                [year] => {
                    if map.contains_key(*year) {
                        Ok(LayerNode::Dir)
                    } else {
                        Err(not_found(&self.name, sub))
                    }
                }
                [year, month] => {
                    if map.get(*year).is_some_and(|m| m.contains_key(*month)) {
                        Ok(LayerNode::Dir)
                    } else {
                        Err(not_found(&self.name, sub))
                    }
                }
                [year, month, day] => {
                    let present = map
                        .get(*year)
                        .and_then(|m| m.get(*month))
                        .is_some_and(|d| d.contains_key(*day));
                    if present {
                        Ok(LayerNode::Dir)
                    } else {
                        Err(not_found(&self.name, sub))
                    }
                }
                [year, month, day, name] => {
                    let ids = map
                        .get(*year)
                        .and_then(|m| m.get(*month))
                        .and_then(|d| d.get(*day))
                        .ok_or_else(|| not_found(&self.name, sub))?;
                    find_by_name(ids, name, view)
                        .map(LayerNode::File)
                        .ok_or_else(|| not_found(&self.name, sub))
                }
                _ => Err(not_found(&self.name, sub)),
            },
            LayerIndex::Tree(root) => {
                // Walk as deep as the category tree goes; the remainder, if
                // exactly one segment, names a file at that node.
                if root.walk(&segments).is_some() {
                    return Ok(LayerNode::Dir);
                }
                if segments.len() >= 2 {
                    let (dirs, name) = segments.split_at(segments.len() - 1);
                    if let Some(node) = root.walk(dirs) {
                        if let Some(fid) = find_by_name(&node.files, name[0], view) {
                            return Ok(LayerNode::File(fid));
                        }
                    }
                }
                Err(not_found(&self.name, sub))
            }
        }
    }

    /// List the synthetic children at a sub-path. Never includes `.`/`..`.
    pub fn list(&self, sub: &str, view: &LayerView<'_>) -> FsResult<Vec<LayerEntry>> {
        self.ensure_built(view);
        let guard = self.index.read().unwrap_or_else(|p| p.into_inner());
        let IndexState::Built(index) = &*guard else {
            return Err(FsError::Internal(format!("layer {} index unavailable", self.name)));
        };

        let segments: Vec<&str> =
            if sub.is_empty() { Vec::new() } else { sub.split('/').collect() };

        match index {
            LayerIndex::Flat(map) => match segments.as_slice() {
                [] => Ok(map.keys().map(|c| dir_entry(c)).collect()),
                [category] => {
                    let ids = map.get(*category).ok_or_else(|| not_found(&self.name, sub))?;
                    Ok(file_entries(ids, view))
                }
                _ => Err(not_found(&self.name, sub)),
            },
            LayerIndex::Dated(map) => match segments.as_slice() {
                [] => Ok(map.keys().map(|y| dir_entry(y)).collect()),
                [year] => {
                    let months = map.get(*year).ok_or_else(|| not_found(&self.name, sub))?;
                    Ok(months.keys().map(|m| dir_entry(m)).collect())
                }
                [year, month] => {
                    let days = map
                        .get(*year)
                        .and_then(|m| m.get(*month))
                        .ok_or_else(|| not_found(&self.name, sub))?;
                    Ok(days.keys().map(|d| dir_entry(d)).collect())
                }
                [year, month, day] => {
                    let ids = map
                        .get(*year)
                        .and_then(|m| m.get(*month))
                        .and_then(|d| d.get(*day))
                        .ok_or_else(|| not_found(&self.name, sub))?;
                    Ok(file_entries(ids, view))
                }
                _ => Err(not_found(&self.name, sub)),
            },
            LayerIndex::Tree(root) => {
                let node = root.walk(&segments).ok_or_else(|| not_found(&self.name, sub))?;
                let mut entries: Vec<LayerEntry> =
                    node.children.keys().map(|c| dir_entry(c)).collect();
                entries.extend(file_entries(&node.files, view));
                Ok(entries)
            }
        }
    }

    /// Distinct files currently indexed, for statistics.
    pub fn file_total(&self) -> usize {
        let guard = self.index.read().unwrap_or_else(|p| p.into_inner());
        let IndexState::Built(index) = &*guard else { return 0 };
        let mut distinct: BTreeSet<FileId> = BTreeSet::new();
        match index {
            LayerIndex::Flat(map) => {
                for ids in map.values() {
                    distinct.extend(ids.iter().copied());
                }
            }
            LayerIndex::Dated(map) => {
                for months in map.values() {
                    for days in months.values() {
                        for ids in days.values() {
                            distinct.extend(ids.iter().copied());
                        }
                    }
                }
            }
            LayerIndex::Tree(root) => root.collect_files(&mut distinct),
        }
        distinct.len()
    }
}

fn not_found(layer: &str, sub: &str) -> FsError {
    FsError::NotFound(format!("{layer}/{sub}"))
}

fn dir_entry(name: &str) -> LayerEntry {
    LayerEntry { name: name.to_string(), file: None }
}

/// Map ids to leaf entries, deduplicating basename collisions: the first id
/// (arena order is rel-path order) wins, shadowed files stay reachable via
/// their direct paths.
fn file_entries(ids: &[FileId], view: &LayerView<'_>) -> Vec<LayerEntry> {
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    let mut entries = Vec::with_capacity(ids.len());
    for &fid in ids {
        let name = view.files[fid as usize].file_name();
        if seen.insert(name) {
            entries.push(LayerEntry { name: name.to_string(), file: Some(fid) });
        } else {
            debug!(name, "basename collision in layer listing, shadowed");
        }
    }
    entries
}

fn find_by_name(ids: &[FileId], name: &str, view: &LayerView<'_>) -> Option<FileId> {
    ids.iter().copied().find(|&fid| view.files[fid as usize].file_name() == name)
}
