//! The resolver: maps mount-relative paths onto backing files, virtual
//! layers, or synthetic directories, applying rules on the way in and
//! transforms on the way out, with the cache levels amortizing everything.
//!
//! Lock order is manager → layer → handle table → cache; no cache or layer
//! operation reenters the resolver. Errors never panic across this boundary
//! — internal invariant violations surface as `Internal`.

use crate::cache::{CacheSet, CacheTuning, ContentKey, TransformedKey};
use crate::config::Config;
use crate::error::{FsError, FsResult};
use crate::layers::LayerNode;
use crate::manager::{attrs_of, stat_backing, LayerManager, Route, RootEntry};
use crate::path::normalize;
use crate::rules::{decide, Rule, Verdict};
use crate::transform::{apply_all, Pipeline, PipelinePlan, TransformLimits};
use crate::types::{EntryKind, FileAttrs, WHOLE_FILE_CACHE_LIMIT};
use dashmap::DashMap;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, error, warn};

#[cfg(unix)]
use std::os::unix::fs::FileExt;

// ---------------------------------------------------------------------------
// Options, handles, counters
// ---------------------------------------------------------------------------

/// Behavioral knobs fixed at mount time.
#[derive(Debug, Clone)]
pub struct ResolverOptions {
    pub write_through: bool,
    pub max_open_handles: usize,
    pub max_inflight_transforms: usize,
    /// Largest file read whole for transformation; bigger files pass through.
    pub max_file_size: u64,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            write_through: false,
            max_open_handles: 10_000,
            max_inflight_transforms: 100,
            max_file_size: 1024 * 1024 * 1024,
        }
    }
}

/// Per-handle state. Positional I/O keeps the handle lock-free.
pub struct Handle {
    pub path: String,
    pub real_path: PathBuf,
    pub source: usize,
    pub writable: bool,
    pub plan: Option<Arc<PipelinePlan>>,
    file: std::fs::File,
}

/// One synthetic directory listing entry.
#[derive(Debug, Clone, Serialize)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
}

#[derive(Default)]
pub struct OpCounters {
    pub getattr: AtomicU64,
    pub readdir: AtomicU64,
    pub open: AtomicU64,
    pub read: AtomicU64,
    pub write: AtomicU64,
}

#[derive(Default)]
pub struct TransformCounters {
    pub applied: AtomicU64,
    pub degraded: AtomicU64,
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

pub struct Resolver {
    pub manager: LayerManager,
    rules: RwLock<Arc<Vec<Rule>>>,
    pipeline: RwLock<Arc<Pipeline>>,
    pub caches: CacheSet,
    plans: DashMap<String, Option<Arc<PipelinePlan>>>,
    handles: DashMap<u64, Arc<Handle>>,
    next_handle: AtomicU64,
    inflight_transforms: AtomicUsize,
    transform_limits: TransformLimits,
    opts: ResolverOptions,
    pub ops: OpCounters,
    pub transforms: TransformCounters,
}

impl Resolver {
    pub fn new(
        manager: LayerManager,
        rules: Vec<Rule>,
        pipeline: Pipeline,
        cache_tuning: &CacheTuning,
        transform_limits: TransformLimits,
        opts: ResolverOptions,
    ) -> Self {
        Self {
            manager,
            rules: RwLock::new(Arc::new(rules)),
            pipeline: RwLock::new(Arc::new(pipeline)),
            caches: CacheSet::new(cache_tuning),
            plans: DashMap::new(),
            handles: DashMap::new(),
            next_handle: AtomicU64::new(0),
            inflight_transforms: AtomicUsize::new(0),
            transform_limits,
            opts,
            ops: OpCounters::default(),
            transforms: TransformCounters::default(),
        }
    }

    pub fn rules(&self) -> Arc<Vec<Rule>> {
        Arc::clone(&self.rules.read().unwrap_or_else(|p| p.into_inner()))
    }

    pub fn open_handle_count(&self) -> usize {
        self.handles.len()
    }

    /// Swap in a new rule list, refilter the file set, and drop caches that
    /// may now disagree with the rules.
    pub fn set_rules(&self, rules: Vec<Rule>) {
        let arc = Arc::new(rules);
        *self.rules.write().unwrap_or_else(|p| p.into_inner()) = Arc::clone(&arc);
        self.manager.refilter(&arc);
        self.caches.attrs.clear();
    }

    /// Full configuration switchover: sources, rules, transforms, layers.
    /// In-flight operations finish on the snapshots they already hold.
    pub fn reload(&self, config: &Config) -> FsResult<()> {
        let rules = config.build_rules()?;
        let pipeline = config.build_pipeline()?;
        let layers = config.build_layers()?;

        self.manager.replace(config.source_roots(), layers);
        *self.rules.write().unwrap_or_else(|p| p.into_inner()) = Arc::new(rules);
        *self.pipeline.write().unwrap_or_else(|p| p.into_inner()) = Arc::new(pipeline);
        self.plans.clear();
        self.caches.clear();
        self.rescan();
        Ok(())
    }

    /// Re-enumerate the backing store and refresh the admitted set.
    pub fn rescan(&self) {
        let rules = self.rules();
        self.manager.scan_sources(&rules);
    }

    /// Targeted invalidation: drop cache entries for the subtree and mark
    /// layer indexes stale.
    pub fn invalidate(&self, path: &str) -> FsResult<()> {
        let canonical = normalize(path)?;
        let real = match self.manager.route(&canonical) {
            Route::Backing(rel) => self.manager.resolve_backing(&rel).ok().map(|(p, _)| p),
            _ => None,
        };
        self.caches.invalidate(&canonical, real.as_deref());
        self.plans.remove(&canonical);
        self.manager.mark_layers_stale();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // getattr
    // -----------------------------------------------------------------------

    pub fn getattr(&self, path: &str) -> FsResult<FileAttrs> {
        self.ops.getattr.fetch_add(1, Ordering::Relaxed);
        let canonical = normalize(path)?;

        if let Some(attrs) = self.caches.attrs.get(&canonical) {
            return Ok(attrs);
        }

        let attrs = self.getattr_cold(&canonical)?;
        self.caches.attrs.put(canonical, attrs.clone(), 0);
        Ok(attrs)
    }

    fn getattr_cold(&self, canonical: &str) -> FsResult<FileAttrs> {
        let snapshot = self.manager.snapshot();
        match self.manager.route(canonical) {
            Route::Root => {
                Ok(FileAttrs::synthetic_dir(snapshot.last_scan, self.opts.write_through))
            }
            Route::Layer(layer, sub) => {
                let view = snapshot.layer_view();
                match layer.lookup(&sub, &view)? {
                    LayerNode::Dir => Ok(FileAttrs::synthetic_dir(snapshot.last_scan, false)),
                    LayerNode::File(fid) => {
                        let info = &snapshot.files[fid as usize];
                        // Delegate to the backing file; fall back to indexed
                        // attributes when the stat races a deletion.
                        Ok(stat_backing(&info.real_path).unwrap_or_else(|_| attrs_of(info)))
                    }
                }
            }
            Route::Backing(rel) => {
                let (real, _) = self.manager.resolve_backing(&rel)?;
                let attrs = stat_backing(&real)?;
                let rules = self.rules();
                if decide(canonical, &attrs, &rules) == Verdict::Hidden {
                    return Err(FsError::NotFound(canonical.to_string()));
                }
                Ok(attrs)
            }
        }
    }

    // -----------------------------------------------------------------------
    // readdir
    // -----------------------------------------------------------------------

    pub fn readdir(&self, path: &str) -> FsResult<Vec<DirEntry>> {
        self.ops.readdir.fetch_add(1, Ordering::Relaxed);
        let canonical = normalize(path)?;
        let snapshot = self.manager.snapshot();
        let rules = self.rules();

        match self.manager.route(&canonical) {
            Route::Root => {
                let mut entries = Vec::new();
                for (name, kind) in self.manager.list_root() {
                    match kind {
                        RootEntry::LayerName => {
                            entries.push(DirEntry { name, kind: EntryKind::Dir });
                        }
                        RootEntry::Backing => {
                            if let Some(entry) = self.visible_child(&canonical, &name, &rules) {
                                entries.push(entry);
                            }
                        }
                    }
                }
                Ok(entries)
            }
            Route::Layer(layer, sub) => {
                let view = snapshot.layer_view();
                let listed = layer.list(&sub, &view)?;
                let mut entries = Vec::with_capacity(listed.len());
                for item in listed {
                    match item.file {
                        None => entries.push(DirEntry { name: item.name, kind: EntryKind::Dir }),
                        Some(fid) => {
                            // Leaf attrs come from the arena; populate L1
                            // opportunistically so the follow-up getattr hits.
                            let info = &snapshot.files[fid as usize];
                            let child = child_path(&canonical, &item.name);
                            self.caches.attrs.put(child, attrs_of(info), 0);
                            entries.push(DirEntry { name: item.name, kind: EntryKind::File });
                        }
                    }
                }
                Ok(entries)
            }
            Route::Backing(rel) => {
                let (real, _) = self.manager.resolve_backing(&rel)?;
                let attrs = stat_backing(&real)?;
                if !attrs.is_dir() {
                    return Err(FsError::InvalidInput(format!("{canonical} is not a directory")));
                }
                if decide(&canonical, &attrs, &rules) == Verdict::Hidden {
                    return Err(FsError::NotFound(canonical.to_string()));
                }
                let mut entries = Vec::new();
                for name in self.manager.list_backing_dir(&rel)?.keys() {
                    if let Some(entry) = self.visible_child(&canonical, name, &rules) {
                        entries.push(entry);
                    }
                }
                Ok(entries)
            }
        }
    }

    /// Stat one child of a backing directory, apply the rules, and feed L1.
    /// Bad children are omitted, never fatal for the listing.
    fn visible_child(&self, parent: &str, name: &str, rules: &[Rule]) -> Option<DirEntry> {
        let child = child_path(parent, name);
        let attrs = match self.manager.resolve_backing(&child).and_then(|(p, _)| stat_backing(&p))
        {
            Ok(attrs) => attrs,
            Err(e) => {
                debug!(path = child.as_str(), error = %e, "skipping unreadable child");
                return None;
            }
        };
        if decide(&child, &attrs, rules) == Verdict::Hidden {
            return None;
        }
        let kind = attrs.kind;
        self.caches.attrs.put(child, attrs, 0);
        Some(DirEntry { name: name.to_string(), kind })
    }

    // -----------------------------------------------------------------------
    // open / read / write / release
    // -----------------------------------------------------------------------

    pub fn open(&self, path: &str, write: bool) -> FsResult<u64> {
        self.ops.open.fetch_add(1, Ordering::Relaxed);
        let canonical = normalize(path)?;
        if self.handles.len() >= self.opts.max_open_handles {
            return Err(FsError::RateLimited(format!(
                "open handle limit {} reached",
                self.opts.max_open_handles
            )));
        }

        let snapshot = self.manager.snapshot();
        let (real, source, writable) = match self.manager.route(&canonical) {
            Route::Root => {
                return Err(FsError::InvalidInput(format!("{canonical} is a directory")))
            }
            Route::Layer(layer, sub) => {
                if write {
                    // Virtual paths have no defined write-through target.
                    return Err(FsError::InvalidInput(format!(
                        "cannot write through virtual path {canonical}"
                    )));
                }
                let view = snapshot.layer_view();
                match layer.lookup(&sub, &view)? {
                    LayerNode::Dir => {
                        return Err(FsError::InvalidInput(format!("{canonical} is a directory")))
                    }
                    LayerNode::File(fid) => {
                        let info = &snapshot.files[fid as usize];
                        (info.real_path.clone(), info.source, false)
                    }
                }
            }
            Route::Backing(rel) => {
                let (real, source_idx) = self.manager.resolve_backing(&rel)?;
                let attrs = stat_backing(&real)?;
                if attrs.is_dir() {
                    return Err(FsError::InvalidInput(format!("{canonical} is a directory")));
                }
                let rules = self.rules();
                if decide(&canonical, &attrs, &rules) == Verdict::Hidden {
                    return Err(FsError::NotFound(canonical.to_string()));
                }
                let writable = if write {
                    self.require_writable(source_idx)?;
                    true
                } else {
                    false
                };
                (real, source_idx, writable)
            }
        };

        let plan = self.plan_for(&canonical);
        if writable && plan.is_some() {
            return Err(FsError::InvalidInput(format!(
                "{canonical} has transforms applied and cannot be opened for writing"
            )));
        }

        let file = std::fs::OpenOptions::new().read(true).write(writable).open(&real)?;
        let id = self.next_handle.fetch_add(1, Ordering::Relaxed) + 1;
        self.handles.insert(
            id,
            Arc::new(Handle { path: canonical, real_path: real, source, writable, plan, file }),
        );
        Ok(id)
    }

    /// Memoized per-path stage selection.
    fn plan_for(&self, canonical: &str) -> Option<Arc<PipelinePlan>> {
        if let Some(cached) = self.plans.get(canonical) {
            return cached.value().clone();
        }
        let pipeline = Arc::clone(&self.pipeline.read().unwrap_or_else(|p| p.into_inner()));
        let plan = pipeline.plan_for(canonical).map(Arc::new);
        self.plans.insert(canonical.to_string(), plan.clone());
        plan
    }

    pub fn read(&self, handle_id: u64, offset: u64, length: u32) -> FsResult<Vec<u8>> {
        self.ops.read.fetch_add(1, Ordering::Relaxed);
        let handle = self
            .handles
            .get(&handle_id)
            .map(|h| Arc::clone(h.value()))
            .ok_or_else(|| FsError::InvalidInput(format!("unknown handle {handle_id}")))?;

        match &handle.plan {
            Some(plan) => self.read_transformed(&handle, plan, offset, length),
            None => self.read_plain(&handle, offset, length),
        }
    }

    fn read_transformed(
        &self,
        handle: &Handle,
        plan: &Arc<PipelinePlan>,
        offset: u64,
        length: u32,
    ) -> FsResult<Vec<u8>> {
        let key =
            TransformedKey { path: handle.real_path.clone(), fingerprint: plan.fingerprint };
        if let Some(bytes) = self.caches.transformed.get(&key) {
            return Ok(slice_window(&bytes, offset, length));
        }

        let whole_key = ContentKey::Whole(handle.real_path.clone());
        let original = match self.caches.content.get(&whole_key) {
            Some(bytes) => bytes,
            None => {
                let meta = handle.file.metadata()?;
                if meta.len() > self.opts.max_file_size {
                    // Too big to transform; serve the raw window instead.
                    warn!(
                        path = handle.path.as_str(),
                        size = meta.len(),
                        "file exceeds transform size bound, passing through"
                    );
                    self.transforms.degraded.fetch_add(1, Ordering::Relaxed);
                    return read_at(&handle.file, offset, length);
                }
                let bytes = Arc::new(std::fs::read(&handle.real_path)?);
                self.caches.content.put(whole_key, Arc::clone(&bytes), bytes.len() as u64);
                bytes
            }
        };

        let _gate = TransformGate::acquire(
            &self.inflight_transforms,
            self.opts.max_inflight_transforms,
        )?;
        let source_root = self.manager.source(handle.source).map(|s| s.root_path);
        let outcome = apply_all(
            plan,
            (*original).clone(),
            &handle.path,
            &handle.real_path,
            source_root.as_deref(),
            &self.transform_limits,
        )?;
        self.transforms.applied.fetch_add(1, Ordering::Relaxed);
        if outcome.degraded {
            self.transforms.degraded.fetch_add(1, Ordering::Relaxed);
        }

        let bytes = Arc::new(outcome.bytes);
        self.caches.transformed.put(key, Arc::clone(&bytes), bytes.len() as u64);
        Ok(slice_window(&bytes, offset, length))
    }

    fn read_plain(&self, handle: &Handle, offset: u64, length: u32) -> FsResult<Vec<u8>> {
        let meta = handle.file.metadata()?;
        if meta.len() <= WHOLE_FILE_CACHE_LIMIT {
            let key = ContentKey::Whole(handle.real_path.clone());
            let bytes = match self.caches.content.get(&key) {
                Some(bytes) => bytes,
                None => {
                    let bytes = Arc::new(std::fs::read(&handle.real_path)?);
                    self.caches.content.put(key, Arc::clone(&bytes), bytes.len() as u64);
                    bytes
                }
            };
            return Ok(slice_window(&bytes, offset, length));
        }

        // Large file: offset-aware caching of the requested window only.
        let key = ContentKey::Range(handle.real_path.clone(), offset, length as u64);
        if let Some(bytes) = self.caches.content.get(&key) {
            return Ok((*bytes).clone());
        }
        let window = read_at(&handle.file, offset, length)?;
        self.caches.content.put(key, Arc::new(window.clone()), window.len() as u64);
        Ok(window)
    }

    pub fn write(&self, handle_id: u64, offset: u64, data: &[u8]) -> FsResult<usize> {
        self.ops.write.fetch_add(1, Ordering::Relaxed);
        let handle = self
            .handles
            .get(&handle_id)
            .map(|h| Arc::clone(h.value()))
            .ok_or_else(|| FsError::InvalidInput(format!("unknown handle {handle_id}")))?;
        if !handle.writable {
            return Err(FsError::PermissionDenied(format!(
                "{} is not open for writing",
                handle.path
            )));
        }
        write_at(&handle.file, offset, data)?;
        self.caches.invalidate(&handle.path, Some(&handle.real_path));
        Ok(data.len())
    }

    /// Close a handle. Never fails observably; problems are logged.
    pub fn release(&self, handle_id: u64) {
        if self.handles.remove(&handle_id).is_none() {
            debug!(handle = handle_id, "release of unknown handle");
        }
    }

    // -----------------------------------------------------------------------
    // Mutating namespace operations (write-through only)
    // -----------------------------------------------------------------------

    fn require_writable(&self, source_idx: usize) -> FsResult<()> {
        if !self.opts.write_through {
            return Err(FsError::PermissionDenied("mount is read-only".into()));
        }
        let source = self
            .manager
            .source(source_idx)
            .ok_or_else(|| FsError::Internal(format!("source {source_idx} vanished")))?;
        if source.readonly {
            return Err(FsError::PermissionDenied(format!(
                "source {} is read-only",
                source.root_path.display()
            )));
        }
        Ok(())
    }

    /// Pick the backing location for a new entry: the highest-priority
    /// writable source whose parent directory exists.
    fn create_target(&self, canonical: &str) -> FsResult<(PathBuf, usize)> {
        if !self.opts.write_through {
            return Err(FsError::PermissionDenied("mount is read-only".into()));
        }
        match self.manager.route(canonical) {
            Route::Backing(rel) => {
                let parent = crate::path::parent(&rel);
                let snapshot = self.manager.snapshot();
                for (idx, source) in snapshot.sources.iter().enumerate() {
                    if source.readonly {
                        continue;
                    }
                    if source.root_path.join(parent).is_dir() {
                        return Ok((source.root_path.join(&rel), idx));
                    }
                }
                Err(FsError::NotFound(format!("no writable source holds {parent}")))
            }
            _ => Err(FsError::InvalidInput(format!(
                "cannot create {canonical} under a virtual path"
            ))),
        }
    }

    pub fn mkdir(&self, path: &str, mode: u32) -> FsResult<()> {
        let canonical = normalize(path)?;
        if self.manager.resolve_backing(&canonical).is_ok() {
            return Err(FsError::Conflict(format!("{canonical} already exists")));
        }
        let (target, _) = self.create_target(&canonical)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            std::fs::DirBuilder::new().mode(mode & 0o777).create(&target)?;
        }
        #[cfg(not(unix))]
        {
            let _ = mode;
            std::fs::create_dir(&target)?;
        }
        self.caches.invalidate(&canonical, Some(&target));
        Ok(())
    }

    pub fn unlink(&self, path: &str) -> FsResult<()> {
        let canonical = normalize(path)?;
        let attrs = self.getattr(&canonical)?;
        if attrs.is_dir() {
            return Err(FsError::InvalidInput(format!("{canonical} is a directory")));
        }
        let (real, source_idx) = match self.manager.route(&canonical) {
            Route::Backing(rel) => self.manager.resolve_backing(&rel)?,
            _ => {
                return Err(FsError::InvalidInput(format!(
                    "cannot unlink virtual path {canonical}"
                )))
            }
        };
        self.require_writable(source_idx)?;
        std::fs::remove_file(&real)?;
        self.caches.invalidate(&canonical, Some(&real));
        self.manager.mark_layers_stale();
        Ok(())
    }

    pub fn rmdir(&self, path: &str) -> FsResult<()> {
        let canonical = normalize(path)?;
        let (real, source_idx) = match self.manager.route(&canonical) {
            Route::Backing(rel) => self.manager.resolve_backing(&rel)?,
            _ => {
                return Err(FsError::InvalidInput(format!(
                    "cannot remove virtual path {canonical}"
                )))
            }
        };
        self.require_writable(source_idx)?;
        if std::fs::read_dir(&real)?.next().is_some() {
            return Err(FsError::Conflict(format!("{canonical} is not empty")));
        }
        std::fs::remove_dir(&real)?;
        self.caches.invalidate(&canonical, Some(&real));
        Ok(())
    }

    pub fn rename(&self, from: &str, to: &str) -> FsResult<()> {
        let from_canonical = normalize(from)?;
        let to_canonical = normalize(to)?;
        let (from_real, source_idx) = match self.manager.route(&from_canonical) {
            Route::Backing(rel) => self.manager.resolve_backing(&rel)?,
            _ => {
                return Err(FsError::InvalidInput(format!(
                    "cannot rename virtual path {from_canonical}"
                )))
            }
        };
        self.require_writable(source_idx)?;
        let source = self
            .manager
            .source(source_idx)
            .ok_or_else(|| FsError::Internal(format!("source {source_idx} vanished")))?;
        let to_real = match self.manager.route(&to_canonical) {
            Route::Backing(rel) => source.root_path.join(rel),
            _ => {
                return Err(FsError::InvalidInput(format!(
                    "cannot rename onto virtual path {to_canonical}"
                )))
            }
        };
        std::fs::rename(&from_real, &to_real)?;
        self.caches.invalidate(&from_canonical, Some(&from_real));
        self.caches.invalidate(&to_canonical, Some(&to_real));
        self.manager.mark_layers_stale();
        Ok(())
    }

    pub fn truncate(&self, path: &str, size: u64) -> FsResult<()> {
        let canonical = normalize(path)?;
        let (real, source_idx) = match self.manager.route(&canonical) {
            Route::Backing(rel) => self.manager.resolve_backing(&rel)?,
            _ => {
                return Err(FsError::InvalidInput(format!(
                    "cannot truncate virtual path {canonical}"
                )))
            }
        };
        self.require_writable(source_idx)?;
        let file = std::fs::OpenOptions::new().write(true).open(&real)?;
        file.set_len(size)?;
        self.caches.invalidate(&canonical, Some(&real));
        Ok(())
    }

    /// Create a new empty file under a writable source and open it.
    pub fn create(&self, path: &str) -> FsResult<u64> {
        let canonical = normalize(path)?;
        if self.manager.resolve_backing(&canonical).is_ok() {
            return Err(FsError::Conflict(format!("{canonical} already exists")));
        }
        let (target, source_idx) = self.create_target(&canonical)?;
        let file =
            std::fs::OpenOptions::new().read(true).write(true).create_new(true).open(&target)?;
        self.caches.invalidate(&canonical, Some(&target));
        self.manager.mark_layers_stale();

        let id = self.next_handle.fetch_add(1, Ordering::Relaxed) + 1;
        self.handles.insert(
            id,
            Arc::new(Handle {
                path: canonical,
                real_path: target,
                source: source_idx,
                writable: true,
                plan: None,
                file,
            }),
        );
        Ok(id)
    }

    /// Filesystem totals synthesized from the indexed view.
    pub fn statfs(&self) -> StatFs {
        let snapshot = self.manager.snapshot();
        let total_bytes: u64 =
            snapshot.admitted.iter().map(|&fid| snapshot.files[fid as usize].size).sum();
        const BSIZE: u64 = 4096;
        StatFs {
            block_size: BSIZE as u32,
            blocks: total_bytes.div_ceil(BSIZE),
            blocks_free: 0,
            files: snapshot.admitted.len() as u64,
            name_max: crate::types::MAX_NAME_BYTES as u32,
        }
    }
}

/// Synthesized statfs totals; the view is not a real block device.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StatFs {
    pub block_size: u32,
    pub blocks: u64,
    pub blocks_free: u64,
    pub files: u64,
    pub name_max: u32,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn child_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

/// Slice a read window out of a whole buffer; past-the-end reads are empty.
fn slice_window(bytes: &[u8], offset: u64, length: u32) -> Vec<u8> {
    let start = offset.min(bytes.len() as u64) as usize;
    let end = (start + length as usize).min(bytes.len());
    bytes[start..end].to_vec()
}

#[cfg(unix)]
fn read_at(file: &std::fs::File, offset: u64, length: u32) -> FsResult<Vec<u8>> {
    let mut buf = vec![0u8; length as usize];
    let mut filled = 0usize;
    while filled < buf.len() {
        let n = file.read_at(&mut buf[filled..], offset + filled as u64)?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}

#[cfg(unix)]
fn write_at(file: &std::fs::File, offset: u64, data: &[u8]) -> FsResult<()> {
    file.write_all_at(data, offset)?;
    Ok(())
}

#[cfg(not(unix))]
fn read_at(_file: &std::fs::File, _offset: u64, _length: u32) -> FsResult<Vec<u8>> {
    Err(FsError::Internal("positional reads require a unix platform".into()))
}

#[cfg(not(unix))]
fn write_at(_file: &std::fs::File, _offset: u64, _data: &[u8]) -> FsResult<()> {
    Err(FsError::Internal("positional writes require a unix platform".into()))
}

/// Counting gate for in-flight transforms; drops decrement.
struct TransformGate<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> TransformGate<'a> {
    fn acquire(counter: &'a AtomicUsize, max: usize) -> FsResult<Self> {
        let acquired = counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if current < max {
                    Some(current + 1)
                } else {
                    None
                }
            })
            .is_ok();
        if acquired {
            Ok(Self { counter })
        } else {
            Err(FsError::RateLimited(format!("transform concurrency limit {max} reached")))
        }
    }
}

impl Drop for TransformGate<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

// The resolver promises not to panic across the operations boundary; wrap
// poisoned-lock recovery and log anything that still escapes in the facade.
pub(crate) fn log_internal(context: &str, err: &FsError) {
    if matches!(err, FsError::Internal(_)) {
        error!(context, error = %err, "internal resolver error");
    }
}
