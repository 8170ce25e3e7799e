//! Backing enumerator: walk the configured source roots and produce one
//! [`FileInfo`] per regular file.
//!
//! Per-entry errors (permission denied, broken symlinks) are logged and
//! skipped; traversal continues. Hidden files are walked — visibility is the
//! rule engine's call, not the walker's.

use crate::types::{FileInfo, SourceRoot};
use ignore::WalkBuilder;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Walk options, from the `limits`/source configuration.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Dereference symlinks that stay within their source root. When false,
    /// symlinks are yielded as-is and never followed.
    pub follow_symlinks: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self { follow_symlinks: true }
    }
}

/// Walk every source root and collect the file stream.
///
/// `source` on each record is the index of the owning root in `sources`;
/// collision handling across roots happens in the layer manager, not here.
pub fn scan_sources(sources: &[SourceRoot], opts: &ScanOptions) -> Vec<FileInfo> {
    let mut all = Vec::new();
    for (idx, source) in sources.iter().enumerate() {
        if !source.root_path.exists() {
            warn!(root = %source.root_path.display(), "source root missing, skipping");
            continue;
        }
        let candidates = collect_files(&source.root_path, opts);
        let mut files = describe_files(&source.root_path, idx, candidates, opts);
        debug!(root = %source.root_path.display(), files = files.len(), "scanned source root");
        all.append(&mut files);
    }
    // Deterministic order for index builds regardless of walk interleaving.
    all.sort_by(|a, b| a.rel_path.cmp(&b.rel_path).then(a.source.cmp(&b.source)));
    all
}

/// Traverse one root and gather regular-file paths. Traversal runs serially;
/// the per-file stat work is what parallelizes well, and that happens in
/// [`describe_files`].
fn collect_files(root: &Path, opts: &ScanOptions) -> Vec<PathBuf> {
    let mut builder = WalkBuilder::new(root);
    // No ignore-file or hidden-file filtering: every backing entry is a
    // candidate until the rules say otherwise.
    builder.standard_filters(false).follow_links(opts.follow_symlinks);

    let mut paths = Vec::new();
    for entry in builder.build() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "walk error, skipping entry");
                continue;
            }
        };
        if entry.file_type().is_some_and(|ft| ft.is_file()) {
            paths.push(entry.into_path());
        }
    }
    paths
}

/// Stat each candidate in parallel and build its record. Entries that fail
/// to stat, or that a followed link carried outside the root, are dropped
/// with a log line.
fn describe_files(
    root: &Path,
    source_idx: usize,
    candidates: Vec<PathBuf>,
    opts: &ScanOptions,
) -> Vec<FileInfo> {
    candidates
        .into_par_iter()
        .filter_map(|abs| {
            if opts.follow_symlinks && !abs.starts_with(root) {
                warn!(path = %abs.display(), "symlink target outside source root, skipping");
                return None;
            }
            let meta = match std::fs::metadata(&abs) {
                Ok(meta) => meta,
                Err(e) => {
                    warn!(path = %abs.display(), error = %e, "stat failed, skipping");
                    return None;
                }
            };
            let rel = relative_key(root, &abs)?;
            let (mtime, ctime, atime, mode) = timestamps(&meta);
            Some(FileInfo::new(abs, rel, source_idx, meta.len(), mtime, ctime, atime, mode))
        })
        .collect()
}

/// Source-root-relative path with `/` separators on every platform.
fn relative_key(root: &Path, abs: &Path) -> Option<String> {
    let rel = abs.strip_prefix(root).ok()?;
    let segments: Vec<String> =
        rel.components().map(|c| c.as_os_str().to_string_lossy().into_owned()).collect();
    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}

#[cfg(unix)]
fn timestamps(meta: &std::fs::Metadata) -> (i64, i64, i64, u32) {
    use std::os::unix::fs::MetadataExt;
    (meta.mtime(), meta.ctime(), meta.atime(), meta.mode() & 0o7777)
}

#[cfg(not(unix))]
fn timestamps(meta: &std::fs::Metadata) -> (i64, i64, i64, u32) {
    let secs = |t: std::io::Result<std::time::SystemTime>| {
        t.ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    };
    let mtime = secs(meta.modified());
    (mtime, mtime, secs(meta.accessed()), 0o644)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn source(path: &Path) -> SourceRoot {
        SourceRoot { root_path: path.to_path_buf(), priority: 1, readonly: false }
    }

    #[test]
    fn scan_finds_nested_and_hidden_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/b.py"), b"b").unwrap();
        fs::write(dir.path().join(".hidden"), b"h").unwrap();

        let files = scan_sources(&[source(dir.path())], &ScanOptions::default());
        let rels: Vec<&str> = files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(rels, vec![".hidden", "a.txt", "sub/b.py"]);
    }

    #[test]
    fn scan_records_size_and_extension() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("data.JSON"), b"{}").unwrap();
        let files = scan_sources(&[source(dir.path())], &ScanOptions::default());
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].size, 2);
        assert_eq!(files[0].extension, "json");
    }

    #[test]
    fn missing_root_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();
        let gone = SourceRoot {
            root_path: dir.path().join("nope"),
            priority: 0,
            readonly: false,
        };
        let files =
            scan_sources(&[gone, source(dir.path())], &ScanOptions::default());
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].source, 1);
    }

    #[test]
    fn directories_are_not_yielded() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("only/dirs/here")).unwrap();
        let files = scan_sources(&[source(dir.path())], &ScanOptions::default());
        assert!(files.is_empty());
    }

    #[test]
    fn relative_keys_use_forward_slashes() {
        let root = Path::new("/backing");
        assert_eq!(
            relative_key(root, Path::new("/backing/a/b/c.txt")),
            Some("a/b/c.txt".to_string())
        );
        assert_eq!(relative_key(root, root), None);
        assert_eq!(relative_key(root, Path::new("/elsewhere/x")), None);
    }
}
