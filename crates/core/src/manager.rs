//! Layer manager: owns the source roots, the indexed file set, and the
//! layer list, and routes mount-relative paths to backing or virtual space.
//!
//! Reads take the manager's read lock and work against a snapshot of Arc'd
//! state; scans, index rebuilds, and structural layer changes take the write
//! lock. Per-layer index locks nest inside the manager lock, never the other
//! way around.

use crate::error::{FsError, FsResult};
use crate::layers::{Layer, LayerView};
use crate::path::resolve_within_root;
use crate::rules::{decide, Rule, Verdict};
use crate::scan::{scan_sources, ScanOptions};
use crate::types::{
    attrs_from_metadata, EntryKind, FileArena, FileAttrs, FileId, FileInfo, SourceRoot,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// Where a canonical mount-relative path routes.
pub enum Route {
    /// The mount root itself.
    Root,
    /// First segment named a layer; the remainder is layer-relative.
    Layer(Arc<Layer>, String),
    /// Direct request against the merged backing view.
    Backing(String),
}

/// A root-level directory entry in the merged view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootEntry {
    LayerName,
    Backing,
}

struct ManagerState {
    sources: Arc<Vec<SourceRoot>>,
    files: FileArena,
    admitted: Arc<Vec<FileId>>,
    layers: Vec<Arc<Layer>>,
    last_scan: i64,
}

/// Consistent view of the manager's state for one operation.
pub struct Snapshot {
    pub sources: Arc<Vec<SourceRoot>>,
    pub files: FileArena,
    pub admitted: Arc<Vec<FileId>>,
    pub layers: Vec<Arc<Layer>>,
    pub last_scan: i64,
}

impl Snapshot {
    pub fn layer_view(&self) -> LayerView<'_> {
        LayerView { files: &self.files, admitted: &self.admitted }
    }
}

pub struct LayerManager {
    state: RwLock<ManagerState>,
    scan_opts: ScanOptions,
    max_symlink_depth: u32,
}

/// Attribute record derived from an indexed file, for rule evaluation.
pub fn attrs_of(info: &FileInfo) -> FileAttrs {
    FileAttrs {
        kind: EntryKind::File,
        size: info.size,
        mtime: info.mtime,
        ctime: info.ctime,
        atime: info.atime,
        mode: info.mode,
        nlink: 1,
        uid: 0,
        gid: 0,
    }
}

impl LayerManager {
    pub fn new(
        sources: Vec<SourceRoot>,
        layers: Vec<Arc<Layer>>,
        scan_opts: ScanOptions,
        max_symlink_depth: u32,
    ) -> Self {
        Self {
            state: RwLock::new(ManagerState {
                sources: Arc::new(sources),
                files: Arc::new(Vec::new()),
                admitted: Arc::new(Vec::new()),
                layers,
                last_scan: 0,
            }),
            scan_opts,
            max_symlink_depth,
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        let state = self.state.read().unwrap_or_else(|p| p.into_inner());
        Snapshot {
            sources: Arc::clone(&state.sources),
            files: Arc::clone(&state.files),
            admitted: Arc::clone(&state.admitted),
            layers: state.layers.clone(),
            last_scan: state.last_scan,
        }
    }

    /// Walk every source root, merge collisions by priority (lower wins),
    /// recompute the rule-admitted set, and mark all layers stale.
    pub fn scan_sources(&self, rules: &[Rule]) {
        let sources = {
            let state = self.state.read().unwrap_or_else(|p| p.into_inner());
            Arc::clone(&state.sources)
        };

        let scanned = scan_sources(&sources, &self.scan_opts);

        // Sources are priority-sorted, so the lowest source index wins a
        // rel-path collision.
        let mut merged: BTreeMap<String, FileInfo> = BTreeMap::new();
        for file in scanned {
            match merged.get(&file.rel_path) {
                Some(existing) if existing.source <= file.source => {
                    debug!(
                        path = file.rel_path.as_str(),
                        winner = existing.source,
                        loser = file.source,
                        "source collision"
                    );
                }
                _ => {
                    merged.insert(file.rel_path.clone(), file);
                }
            }
        }
        let files: Vec<FileInfo> = merged.into_values().collect();
        let admitted = admit(&files, rules);
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        let mut state = self.state.write().unwrap_or_else(|p| p.into_inner());
        info!(files = files.len(), admitted = admitted.len(), "scan complete");
        state.files = Arc::new(files);
        state.admitted = Arc::new(admitted);
        state.last_scan = now;
        for layer in &state.layers {
            layer.mark_stale();
        }
        self.warn_layer_shadowing(&state);
    }

    /// Recompute the admitted set under a new rule list without rescanning.
    pub fn refilter(&self, rules: &[Rule]) {
        let mut state = self.state.write().unwrap_or_else(|p| p.into_inner());
        let admitted = admit(&state.files, rules);
        state.admitted = Arc::new(admitted);
        for layer in &state.layers {
            layer.mark_stale();
        }
    }

    /// Rebuild every layer's index from the current file set. Layers are
    /// independent; order does not matter.
    pub fn rebuild_indexes(&self) {
        let snapshot = self.snapshot();
        let view = snapshot.layer_view();
        for layer in &snapshot.layers {
            layer.build_index(&view);
        }
    }

    /// Mark every layer stale without rebuilding.
    pub fn mark_layers_stale(&self) {
        let state = self.state.read().unwrap_or_else(|p| p.into_inner());
        for layer in &state.layers {
            layer.mark_stale();
        }
    }

    pub fn add_layer(&self, layer: Arc<Layer>) -> FsResult<()> {
        let mut state = self.state.write().unwrap_or_else(|p| p.into_inner());
        if state.layers.iter().any(|l| l.name == layer.name) {
            return Err(FsError::Conflict(format!("layer '{}' already exists", layer.name)));
        }
        info!(layer = layer.name.as_str(), kind = layer.kind.type_name(), "layer added");
        state.layers.push(layer);
        Ok(())
    }

    pub fn remove_layer(&self, name: &str) -> FsResult<()> {
        let mut state = self.state.write().unwrap_or_else(|p| p.into_inner());
        let before = state.layers.len();
        state.layers.retain(|l| l.name != name);
        if state.layers.len() == before {
            return Err(FsError::NotFound(format!("layer '{name}'")));
        }
        info!(layer = name, "layer removed");
        Ok(())
    }

    /// Replace sources and layers wholesale (configuration reload). The new
    /// state becomes visible atomically; in-flight operations finish on the
    /// snapshot they already hold.
    pub fn replace(&self, sources: Vec<SourceRoot>, layers: Vec<Arc<Layer>>) {
        let mut state = self.state.write().unwrap_or_else(|p| p.into_inner());
        state.sources = Arc::new(sources);
        state.layers = layers;
        state.files = Arc::new(Vec::new());
        state.admitted = Arc::new(Vec::new());
    }

    /// Route a canonical path: layer names shadow top-level backing entries
    /// of the same name.
    pub fn route(&self, canonical: &str) -> Route {
        if canonical.is_empty() {
            return Route::Root;
        }
        let state = self.state.read().unwrap_or_else(|p| p.into_inner());
        let (head, rest) = match crate::path::split_first(canonical) {
            Some(parts) => parts,
            None => return Route::Root,
        };
        if let Some(layer) = state.layers.iter().find(|l| l.name == head) {
            return Route::Layer(Arc::clone(layer), rest.to_string());
        }
        Route::Backing(canonical.to_string())
    }

    /// Resolve a direct path against the sources in priority order; first
    /// hit wins. Symlinks are followed only within the owning root.
    pub fn resolve_backing(&self, rel: &str) -> FsResult<(PathBuf, usize)> {
        let sources = {
            let state = self.state.read().unwrap_or_else(|p| p.into_inner());
            Arc::clone(&state.sources)
        };
        for (idx, source) in sources.iter().enumerate() {
            match resolve_within_root(&source.root_path, rel, self.max_symlink_depth) {
                Ok(path) => return Ok((path, idx)),
                Err(FsError::NotFound(_)) => continue,
                Err(other) => return Err(other),
            }
        }
        Err(FsError::NotFound(rel.to_string()))
    }

    /// Merged root listing: backing top-level entries unioned with layer
    /// names. On a collision the layer wins.
    pub fn list_root(&self) -> BTreeMap<String, RootEntry> {
        let snapshot = self.snapshot();
        let mut entries: BTreeMap<String, RootEntry> = BTreeMap::new();
        for name in self.list_backing_dir("").unwrap_or_default().keys() {
            entries.insert(name.clone(), RootEntry::Backing);
        }
        for layer in &snapshot.layers {
            if entries.insert(layer.name.clone(), RootEntry::LayerName)
                == Some(RootEntry::Backing)
            {
                warn!(name = layer.name.as_str(), "layer shadows backing entry");
            }
        }
        entries
    }

    /// Merged listing of one backing directory across sources; lower
    /// priority wins name collisions.
    pub fn list_backing_dir(&self, rel: &str) -> FsResult<BTreeMap<String, usize>> {
        let sources = {
            let state = self.state.read().unwrap_or_else(|p| p.into_inner());
            Arc::clone(&state.sources)
        };
        let mut entries: BTreeMap<String, usize> = BTreeMap::new();
        let mut found_any = false;
        for (idx, source) in sources.iter().enumerate() {
            let dir = source.root_path.join(rel);
            let read = match std::fs::read_dir(&dir) {
                Ok(read) => read,
                Err(_) => continue,
            };
            found_any = true;
            for entry in read.flatten() {
                let name = entry.file_name().to_string_lossy().into_owned();
                match entries.get(&name) {
                    Some(&winner) => {
                        debug!(name = name.as_str(), winner, loser = idx, "listing collision");
                    }
                    None => {
                        entries.insert(name, idx);
                    }
                }
            }
        }
        if !found_any && !rel.is_empty() {
            return Err(FsError::NotFound(rel.to_string()));
        }
        Ok(entries)
    }

    pub fn source(&self, idx: usize) -> Option<SourceRoot> {
        let state = self.state.read().unwrap_or_else(|p| p.into_inner());
        state.sources.get(idx).cloned()
    }

    pub fn max_symlink_depth(&self) -> u32 {
        self.max_symlink_depth
    }

    fn warn_layer_shadowing(&self, state: &ManagerState) {
        for layer in &state.layers {
            for source in state.sources.iter() {
                if source.root_path.join(&layer.name).exists() {
                    warn!(
                        layer = layer.name.as_str(),
                        source = %source.root_path.display(),
                        "layer name shadows a backing entry"
                    );
                }
            }
        }
    }
}

/// Ids of files the rule set admits, in arena order.
fn admit(files: &[FileInfo], rules: &[Rule]) -> Vec<FileId> {
    files
        .iter()
        .enumerate()
        .filter(|(_, info)| decide(&info.rel_path, &attrs_of(info), rules) == Verdict::Visible)
        .map(|(idx, _)| idx as FileId)
        .collect()
}

/// Stat a resolved backing path and translate the metadata.
pub fn stat_backing(path: &std::path::Path) -> FsResult<FileAttrs> {
    let meta = std::fs::symlink_metadata(path)?;
    Ok(attrs_from_metadata(&meta))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{Classifier, ClassifierKind, LayerKind};
    use crate::pattern::Pattern;
    use crate::rules::{RuleKind, RulePredicate};
    use std::fs;

    fn manager_over(dirs: &[&std::path::Path]) -> LayerManager {
        let sources = dirs
            .iter()
            .enumerate()
            .map(|(i, d)| SourceRoot {
                root_path: d.to_path_buf(),
                priority: i as i32,
                readonly: false,
            })
            .collect();
        LayerManager::new(sources, Vec::new(), ScanOptions::default(), 10)
    }

    fn exclude(glob: &str) -> Rule {
        Rule {
            name: glob.to_string(),
            kind: RuleKind::Exclude,
            predicate: RulePredicate {
                patterns: vec![Pattern::glob(glob).unwrap()],
                ..Default::default()
            },
        }
    }

    #[test]
    fn scan_merges_sources_by_priority() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        fs::write(a.path().join("shared.txt"), b"from-a").unwrap();
        fs::write(b.path().join("shared.txt"), b"from-b").unwrap();
        fs::write(b.path().join("only-b.txt"), b"b").unwrap();

        let manager = manager_over(&[a.path(), b.path()]);
        manager.scan_sources(&[]);
        let snapshot = manager.snapshot();
        assert_eq!(snapshot.files.len(), 2);
        let shared = snapshot.files.iter().find(|f| f.rel_path == "shared.txt").unwrap();
        assert_eq!(shared.source, 0, "lower priority source wins");
    }

    #[test]
    fn rules_filter_the_admitted_set() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("keep.txt"), b"k").unwrap();
        fs::write(dir.path().join("drop.tmp"), b"d").unwrap();

        let manager = manager_over(&[dir.path()]);
        manager.scan_sources(&[exclude("**/*.tmp")]);
        let snapshot = manager.snapshot();
        assert_eq!(snapshot.files.len(), 2);
        assert_eq!(snapshot.admitted.len(), 1);
        let admitted_file = &snapshot.files[snapshot.admitted[0] as usize];
        assert_eq!(admitted_file.rel_path, "keep.txt");
    }

    #[test]
    fn route_prefers_layers_over_backing() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("by-type")).unwrap();
        let manager = manager_over(&[dir.path()]);
        manager
            .add_layer(Arc::new(Layer::new(
                "by-type".into(),
                LayerKind::Classifier(Classifier::new(ClassifierKind::Extension)),
            )))
            .unwrap();

        match manager.route("by-type/py") {
            Route::Layer(layer, sub) => {
                assert_eq!(layer.name, "by-type");
                assert_eq!(sub, "py");
            }
            _ => panic!("expected layer route"),
        }
        assert!(matches!(manager.route("plain.txt"), Route::Backing(_)));
        assert!(matches!(manager.route(""), Route::Root));
    }

    #[test]
    fn list_root_unions_backing_and_layers() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();
        let manager = manager_over(&[dir.path()]);
        manager
            .add_layer(Arc::new(Layer::new(
                "by-date".into(),
                LayerKind::Classifier(Classifier::new(ClassifierKind::Extension)),
            )))
            .unwrap();

        let root = manager.list_root();
        assert_eq!(root.get("a.txt"), Some(&RootEntry::Backing));
        assert_eq!(root.get("by-date"), Some(&RootEntry::LayerName));
    }

    #[test]
    fn add_duplicate_layer_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_over(&[dir.path()]);
        let mk = || {
            Arc::new(Layer::new(
                "dup".into(),
                LayerKind::Classifier(Classifier::new(ClassifierKind::Extension)),
            ))
        };
        manager.add_layer(mk()).unwrap();
        assert!(matches!(manager.add_layer(mk()), Err(FsError::Conflict(_))));
        manager.remove_layer("dup").unwrap();
        assert!(matches!(manager.remove_layer("dup"), Err(FsError::NotFound(_))));
    }

    #[test]
    fn resolve_backing_first_hit_wins() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        fs::write(b.path().join("only-b.txt"), b"b").unwrap();

        let manager = manager_over(&[a.path(), b.path()]);
        let (path, source) = manager.resolve_backing("only-b.txt").unwrap();
        assert_eq!(source, 1);
        assert_eq!(path, b.path().join("only-b.txt"));
        assert!(matches!(manager.resolve_backing("absent"), Err(FsError::NotFound(_))));
    }
}
