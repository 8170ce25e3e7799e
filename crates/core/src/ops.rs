//! Operations facade: the contract consumed by the kernel-facing adapter
//! and the control plane.
//!
//! A thin layer over the resolver. The cache manager, configuration, and
//! layer state are all explicitly constructed values owned here and threaded
//! through — there is no process-wide mutable state.

use crate::cache::CacheLevelStats;
use crate::config::Config;
use crate::error::FsResult;
use crate::manager::LayerManager;
use crate::resolver::{log_internal, DirEntry, Resolver, ResolverOptions, StatFs};
use crate::types::FileAttrs;
use serde::Serialize;
use std::sync::Arc;

/// The mounted filesystem view.
pub struct ShadowFs {
    resolver: Arc<Resolver>,
}

impl ShadowFs {
    /// Build the whole engine from a validated configuration, scan the
    /// sources, and prime the layer indexes.
    pub fn build(config: &Config) -> FsResult<Arc<Self>> {
        let rules = config.build_rules()?;
        let pipeline = config.build_pipeline()?;
        let layers = config.build_layers()?;
        let manager = LayerManager::new(
            config.source_roots(),
            layers,
            config.scan_options(),
            config.limits.max_symlink_depth,
        );
        let opts = ResolverOptions {
            write_through: config.write_through,
            max_open_handles: config.limits.max_open_handles,
            max_inflight_transforms: config.limits.max_inflight_transforms,
            max_file_size: config.limits.max_file_size,
        };
        let resolver = Resolver::new(
            manager,
            rules,
            pipeline,
            &config.cache_tuning(),
            config.transform_limits(),
            opts,
        );
        resolver.rescan();
        resolver.manager.rebuild_indexes();
        Ok(Arc::new(Self { resolver: Arc::new(resolver) }))
    }

    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    // -----------------------------------------------------------------------
    // The mount-facing contract
    // -----------------------------------------------------------------------

    pub fn getattr(&self, path: &str) -> FsResult<FileAttrs> {
        self.resolver.getattr(path).inspect_err(|e| log_internal("getattr", e))
    }

    pub fn readdir(&self, path: &str) -> FsResult<Vec<DirEntry>> {
        self.resolver.readdir(path).inspect_err(|e| log_internal("readdir", e))
    }

    pub fn open(&self, path: &str, write: bool) -> FsResult<u64> {
        self.resolver.open(path, write).inspect_err(|e| log_internal("open", e))
    }

    pub fn create(&self, path: &str) -> FsResult<u64> {
        self.resolver.create(path).inspect_err(|e| log_internal("create", e))
    }

    pub fn read(&self, handle: u64, offset: u64, length: u32) -> FsResult<Vec<u8>> {
        self.resolver.read(handle, offset, length).inspect_err(|e| log_internal("read", e))
    }

    pub fn write(&self, handle: u64, offset: u64, data: &[u8]) -> FsResult<usize> {
        self.resolver.write(handle, offset, data).inspect_err(|e| log_internal("write", e))
    }

    pub fn release(&self, handle: u64) {
        self.resolver.release(handle);
    }

    pub fn mkdir(&self, path: &str, mode: u32) -> FsResult<()> {
        self.resolver.mkdir(path, mode).inspect_err(|e| log_internal("mkdir", e))
    }

    pub fn unlink(&self, path: &str) -> FsResult<()> {
        self.resolver.unlink(path).inspect_err(|e| log_internal("unlink", e))
    }

    pub fn rmdir(&self, path: &str) -> FsResult<()> {
        self.resolver.rmdir(path).inspect_err(|e| log_internal("rmdir", e))
    }

    pub fn rename(&self, from: &str, to: &str) -> FsResult<()> {
        self.resolver.rename(from, to).inspect_err(|e| log_internal("rename", e))
    }

    pub fn truncate(&self, path: &str, size: u64) -> FsResult<()> {
        self.resolver.truncate(path, size).inspect_err(|e| log_internal("truncate", e))
    }

    pub fn statfs(&self) -> StatFs {
        self.resolver.statfs()
    }

    // -----------------------------------------------------------------------
    // Control-plane operations
    // -----------------------------------------------------------------------

    pub fn reload(&self, config: &Config) -> FsResult<()> {
        self.resolver.reload(config)
    }

    pub fn rescan(&self) {
        self.resolver.rescan();
    }

    pub fn invalidate(&self, path: &str) -> FsResult<()> {
        self.resolver.invalidate(path)
    }

    pub fn clear_caches(&self) {
        self.resolver.caches.clear();
    }

    /// Read-only introspection counters.
    pub fn statistics(&self) -> Statistics {
        let snapshot = self.resolver.manager.snapshot();
        let layers = snapshot
            .layers
            .iter()
            .map(|layer| LayerStats {
                name: layer.name.clone(),
                kind: layer.kind.type_name().to_string(),
                files: layer.file_total(),
            })
            .collect();

        let l1 = self.resolver.caches.attrs.stats();
        let l2 = self.resolver.caches.content.stats();
        let l3 = self.resolver.caches.transformed.stats();

        Statistics {
            indexed_files: snapshot.files.len(),
            admitted_files: snapshot.admitted.len(),
            open_handles: self.resolver.open_handle_count(),
            layers,
            cache: CacheStats {
                l1_hit_rate: l1.hit_rate(),
                l2_hit_rate: l2.hit_rate(),
                l3_hit_rate: l3.hit_rate(),
                l1,
                l2,
                l3,
            },
            operations: OperationStats {
                getattr: self.resolver.ops.getattr.load(std::sync::atomic::Ordering::Relaxed),
                readdir: self.resolver.ops.readdir.load(std::sync::atomic::Ordering::Relaxed),
                open: self.resolver.ops.open.load(std::sync::atomic::Ordering::Relaxed),
                read: self.resolver.ops.read.load(std::sync::atomic::Ordering::Relaxed),
                write: self.resolver.ops.write.load(std::sync::atomic::Ordering::Relaxed),
            },
            transforms: TransformStats {
                applied: self
                    .resolver
                    .transforms
                    .applied
                    .load(std::sync::atomic::Ordering::Relaxed),
                degraded: self
                    .resolver
                    .transforms
                    .degraded
                    .load(std::sync::atomic::Ordering::Relaxed),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Statistics types (serialized by the control plane)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct Statistics {
    pub indexed_files: usize,
    pub admitted_files: usize,
    pub open_handles: usize,
    pub layers: Vec<LayerStats>,
    pub cache: CacheStats,
    pub operations: OperationStats,
    pub transforms: TransformStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct LayerStats {
    pub name: String,
    pub kind: String,
    pub files: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub l1: CacheLevelStats,
    pub l2: CacheLevelStats,
    pub l3: CacheLevelStats,
    pub l1_hit_rate: f64,
    pub l2_hit_rate: f64,
    pub l3_hit_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OperationStats {
    pub getattr: u64,
    pub readdir: u64,
    pub open: u64,
    pub read: u64,
    pub write: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransformStats {
    pub applied: u64,
    pub degraded: u64,
}
