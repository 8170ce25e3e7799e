//! Core data model: backing files, source roots, and attribute records.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum length of a mount-relative path, in bytes.
pub const MAX_PATH_BYTES: usize = 4096;

/// Maximum length of a single path segment, in bytes.
pub const MAX_NAME_BYTES: usize = 255;

/// Default cap on symlink chain depth during backing resolution.
pub const DEFAULT_SYMLINK_DEPTH: u32 = 10;

/// Files up to this size are cached whole in L2; larger files are served by
/// positional reads with range-keyed cache entries.
pub const WHOLE_FILE_CACHE_LIMIT: u64 = 4 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Source roots
// ---------------------------------------------------------------------------

/// A configured backing directory. Lower `priority` wins on collisions.
#[derive(Debug, Clone)]
pub struct SourceRoot {
    pub root_path: PathBuf,
    pub priority: i32,
    pub readonly: bool,
}

// ---------------------------------------------------------------------------
// FileInfo arena
// ---------------------------------------------------------------------------

/// Index into the [`FileArena`]. Layer indexes reference files by id so a
/// rebuild is an atomic swap of the arena+index pair.
pub type FileId = u32;

/// Immutable record for one backing file, produced at scan time.
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Absolute path in the backing store.
    pub real_path: PathBuf,
    /// Path relative to the source root, `/`-separated. Doubles as the
    /// mount-relative path for direct (non-virtual) access.
    pub rel_path: String,
    /// Index of the owning source root in the manager's source list.
    pub source: usize,
    pub size: u64,
    pub mtime: i64,
    pub ctime: i64,
    pub atime: i64,
    pub mode: u32,
    /// Lowercased extension without the dot; empty when none.
    pub extension: String,
    mime: OnceLock<String>,
}

impl FileInfo {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        real_path: PathBuf,
        rel_path: String,
        source: usize,
        size: u64,
        mtime: i64,
        ctime: i64,
        atime: i64,
        mode: u32,
    ) -> Self {
        let extension = rel_path
            .rsplit('/')
            .next()
            .and_then(|name| name.rsplit_once('.'))
            .map(|(stem, ext)| if stem.is_empty() { "" } else { ext })
            .unwrap_or("")
            .to_lowercase();
        Self { real_path, rel_path, source, size, mtime, ctime, atime, mode, extension, mime: OnceLock::new() }
    }

    /// Final path segment.
    pub fn file_name(&self) -> &str {
        self.rel_path.rsplit('/').next().unwrap_or(&self.rel_path)
    }

    /// MIME type, detected by extension first and magic bytes as a fallback.
    /// Computed once per file and cached.
    pub fn mime(&self) -> &str {
        self.mime.get_or_init(|| {
            if let Some(guess) = mime_guess::from_path(&self.real_path).first() {
                return guess.essence_str().to_string();
            }
            sniff_magic(&self.real_path).to_string()
        })
    }
}

/// Minimal magic-byte table for files whose extension is unknown to the
/// mime database. Reads at most 512 bytes; any error yields octet-stream.
fn sniff_magic(path: &Path) -> &'static str {
    use std::io::Read;
    let mut head = [0u8; 512];
    let n = match std::fs::File::open(path).and_then(|mut f| f.read(&mut head)) {
        Ok(n) => n,
        Err(_) => return "application/octet-stream",
    };
    let head = &head[..n];
    if head.starts_with(b"%PDF") {
        "application/pdf"
    } else if head.starts_with(b"\x89PNG") {
        "image/png"
    } else if head.starts_with(b"GIF8") {
        "image/gif"
    } else if head.starts_with(b"\xff\xd8\xff") {
        "image/jpeg"
    } else if head.starts_with(b"PK\x03\x04") {
        "application/zip"
    } else if head.starts_with(b"\x7fELF") {
        "application/x-executable"
    } else if head.starts_with(b"\x1f\x8b") {
        "application/gzip"
    } else if !head.contains(&0) {
        "text/plain"
    } else {
        "application/octet-stream"
    }
}

/// Contiguous store of all indexed files. Swapped atomically on rescan.
pub type FileArena = Arc<Vec<FileInfo>>;

// ---------------------------------------------------------------------------
// Attribute records
// ---------------------------------------------------------------------------

/// What kind of entry an attribute record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
}

/// Attribute record returned by `getattr` and cached in L1.
#[derive(Debug, Clone, Serialize)]
pub struct FileAttrs {
    pub kind: EntryKind,
    pub size: u64,
    pub mtime: i64,
    pub ctime: i64,
    pub atime: i64,
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
}

impl FileAttrs {
    /// Synthesize attributes for a virtual directory (layer roots, category
    /// directories, the mount root). Times come from the last scan so the
    /// view looks stable between rebuilds.
    pub fn synthetic_dir(timestamp: i64, writable: bool) -> Self {
        Self {
            kind: EntryKind::Dir,
            size: 0,
            mtime: timestamp,
            ctime: timestamp,
            atime: timestamp,
            mode: if writable { 0o755 } else { 0o555 },
            nlink: 2,
            uid: 0,
            gid: 0,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }
}

#[cfg(unix)]
pub fn attrs_from_metadata(meta: &std::fs::Metadata) -> FileAttrs {
    use std::os::unix::fs::MetadataExt;
    let kind = if meta.file_type().is_symlink() {
        EntryKind::Symlink
    } else if meta.is_dir() {
        EntryKind::Dir
    } else {
        EntryKind::File
    };
    FileAttrs {
        kind,
        size: meta.len(),
        mtime: meta.mtime(),
        ctime: meta.ctime(),
        atime: meta.atime(),
        mode: meta.mode() & 0o7777,
        nlink: meta.nlink() as u32,
        uid: meta.uid(),
        gid: meta.gid(),
    }
}

#[cfg(not(unix))]
pub fn attrs_from_metadata(meta: &std::fs::Metadata) -> FileAttrs {
    let kind = if meta.is_dir() { EntryKind::Dir } else { EntryKind::File };
    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    FileAttrs {
        kind,
        size: meta.len(),
        mtime,
        ctime: mtime,
        atime: mtime,
        mode: if meta.permissions().readonly() { 0o444 } else { 0o644 },
        nlink: 1,
        uid: 0,
        gid: 0,
    }
}

// ---------------------------------------------------------------------------
// FileMeta — attribute interface for classifiers and extractors
// ---------------------------------------------------------------------------

/// Attribute interface over indexed files. Layers and tag extractors work
/// against this trait so tests can substitute a synthetic implementation
/// without a backing store.
pub trait FileMeta {
    fn real_path(&self) -> &Path;
    fn rel_path(&self) -> &str;
    fn file_name(&self) -> &str;
    fn size(&self) -> u64;
    fn mtime(&self) -> i64;
    fn ctime(&self) -> i64;
    fn atime(&self) -> i64;
    fn extension(&self) -> &str;
    fn mime(&self) -> &str;
}

impl FileMeta for FileInfo {
    fn real_path(&self) -> &Path {
        &self.real_path
    }
    fn rel_path(&self) -> &str {
        &self.rel_path
    }
    fn file_name(&self) -> &str {
        FileInfo::file_name(self)
    }
    fn size(&self) -> u64 {
        self.size
    }
    fn mtime(&self) -> i64 {
        self.mtime
    }
    fn ctime(&self) -> i64 {
        self.ctime
    }
    fn atime(&self) -> i64 {
        self.atime
    }
    fn extension(&self) -> &str {
        &self.extension
    }
    fn mime(&self) -> &str {
        FileInfo::mime(self)
    }
}
