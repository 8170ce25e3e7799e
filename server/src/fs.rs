//! Kernel-facing FUSE adapter: translates fuser callbacks into operations
//! on the [`ShadowFs`] facade and maps core error kinds onto errnos.
//!
//! FUSE speaks inodes; the core speaks mount-relative paths. The adapter
//! keeps the bidirectional inode table and nothing else — all real state
//! lives behind the facade.

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request, TimeOrNow,
};
use shadowfs_core::error::FsError;
use shadowfs_core::ops::ShadowFs;
use shadowfs_core::types::{EntryKind, FileAttrs};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

const TTL: Duration = Duration::from_secs(1);
const ROOT_INO: u64 = 1;

/// Map a core error kind to the closest errno.
pub fn errno(err: &FsError) -> i32 {
    match err {
        FsError::NotFound(_) => libc::ENOENT,
        FsError::PermissionDenied(_) => libc::EACCES,
        FsError::InvalidInput(_) => libc::EINVAL,
        FsError::Conflict(_) => libc::EEXIST,
        FsError::Timeout(_) => libc::ETIMEDOUT,
        FsError::RateLimited(_) => libc::EBUSY,
        FsError::Dependency(_) | FsError::Internal(_) | FsError::Degraded(_) => libc::EIO,
    }
}

// ---------------------------------------------------------------------------
// Inode table
// ---------------------------------------------------------------------------

/// Bidirectional ino ↔ canonical-path map. Inos are allocated on first
/// lookup and stay stable for the lifetime of the mount.
struct InodeTable {
    by_ino: HashMap<u64, String>,
    by_path: HashMap<String, u64>,
    next: u64,
}

impl InodeTable {
    fn new() -> Self {
        let mut table = Self { by_ino: HashMap::new(), by_path: HashMap::new(), next: 2 };
        table.by_ino.insert(ROOT_INO, String::new());
        table.by_path.insert(String::new(), ROOT_INO);
        table
    }

    fn path_of(&self, ino: u64) -> Option<String> {
        self.by_ino.get(&ino).cloned()
    }

    fn ino_for(&mut self, path: &str) -> u64 {
        if let Some(&ino) = self.by_path.get(path) {
            return ino;
        }
        let ino = self.next;
        self.next += 1;
        self.by_ino.insert(ino, path.to_string());
        self.by_path.insert(path.to_string(), ino);
        ino
    }

    fn remap(&mut self, from: &str, to: &str) {
        if let Some(ino) = self.by_path.remove(from) {
            self.by_ino.insert(ino, to.to_string());
            self.by_path.insert(to.to_string(), ino);
        }
    }

    fn drop_path(&mut self, path: &str) {
        if let Some(ino) = self.by_path.remove(path) {
            self.by_ino.remove(&ino);
        }
    }
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

pub struct ShadowFuse {
    fs: Arc<ShadowFs>,
    inodes: Mutex<InodeTable>,
    uid: u32,
    gid: u32,
}

impl ShadowFuse {
    pub fn new(fs: Arc<ShadowFs>) -> Self {
        Self {
            fs,
            inodes: Mutex::new(InodeTable::new()),
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
        }
    }

    fn path_of(&self, ino: u64) -> Option<String> {
        self.inodes.lock().unwrap_or_else(|p| p.into_inner()).path_of(ino)
    }

    fn ino_for(&self, path: &str) -> u64 {
        self.inodes.lock().unwrap_or_else(|p| p.into_inner()).ino_for(path)
    }

    fn child(&self, parent_ino: u64, name: &OsStr) -> Option<String> {
        let parent = self.path_of(parent_ino)?;
        let name = name.to_str()?;
        Some(if parent.is_empty() { name.to_string() } else { format!("{parent}/{name}") })
    }

    fn fuse_attr(&self, ino: u64, attrs: &FileAttrs) -> FileAttr {
        let kind = match attrs.kind {
            EntryKind::Dir => FileType::Directory,
            EntryKind::Symlink => FileType::Symlink,
            EntryKind::File => FileType::RegularFile,
        };
        // Synthetic entries carry no ownership; present them as the
        // mounting user's.
        let (uid, gid) = if attrs.uid == 0 && attrs.gid == 0 {
            (self.uid, self.gid)
        } else {
            (attrs.uid, attrs.gid)
        };
        FileAttr {
            ino,
            size: attrs.size,
            blocks: attrs.size.div_ceil(512),
            atime: epoch_time(attrs.atime),
            mtime: epoch_time(attrs.mtime),
            ctime: epoch_time(attrs.ctime),
            crtime: epoch_time(attrs.ctime),
            kind,
            perm: (attrs.mode & 0o7777) as u16,
            nlink: attrs.nlink.max(1),
            uid,
            gid,
            rdev: 0,
            blksize: 4096,
            flags: 0,
        }
    }
}

fn epoch_time(secs: i64) -> SystemTime {
    if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs as u64)
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs())
    }
}

impl Filesystem for ShadowFuse {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(path) = self.child(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.fs.getattr(&path) {
            Ok(attrs) => {
                let ino = self.ino_for(&path);
                reply.entry(&TTL, &self.fuse_attr(ino, &attrs), 0);
            }
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.fs.getattr(&path) {
            Ok(attrs) => reply.attr(&TTL, &self.fuse_attr(ino, &attrs)),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let entries = match self.fs.readdir(&path) {
            Ok(entries) => entries,
            Err(e) => {
                reply.error(errno(&e));
                return;
            }
        };

        let parent_ino = if ino == ROOT_INO {
            ROOT_INO
        } else {
            self.ino_for(shadowfs_core::path::parent(&path))
        };
        let mut all: Vec<(u64, FileType, String)> = Vec::with_capacity(entries.len() + 2);
        all.push((ino, FileType::Directory, ".".to_string()));
        all.push((parent_ino, FileType::Directory, "..".to_string()));
        for entry in entries {
            let child = if path.is_empty() {
                entry.name.clone()
            } else {
                format!("{path}/{}", entry.name)
            };
            let kind = match entry.kind {
                EntryKind::Dir => FileType::Directory,
                EntryKind::Symlink => FileType::Symlink,
                EntryKind::File => FileType::RegularFile,
            };
            all.push((self.ino_for(&child), kind, entry.name));
        }

        for (i, (entry_ino, kind, name)) in all.into_iter().enumerate().skip(offset as usize) {
            if reply.add(entry_ino, (i + 1) as i64, kind, &name) {
                break;
            }
        }
        reply.ok();
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let write = flags & libc::O_ACCMODE != libc::O_RDONLY;
        match self.fs.open(&path, write) {
            Ok(handle) => reply.opened(handle, 0),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        match self.fs.read(fh, offset.max(0) as u64, size) {
            Ok(bytes) => reply.data(&bytes),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        match self.fs.write(fh, offset.max(0) as u64, data) {
            Ok(written) => reply.written(written as u32),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        self.fs.release(fh);
        reply.ok();
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let Some(path) = self.child(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        let handle = match self.fs.create(&path) {
            Ok(handle) => handle,
            Err(e) => {
                reply.error(errno(&e));
                return;
            }
        };
        match self.fs.getattr(&path) {
            Ok(attrs) => {
                let ino = self.ino_for(&path);
                reply.created(&TTL, &self.fuse_attr(ino, &attrs), 0, handle, 0);
            }
            Err(e) => {
                self.fs.release(handle);
                reply.error(errno(&e));
            }
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let Some(path) = self.child(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        if let Err(e) = self.fs.mkdir(&path, mode) {
            reply.error(errno(&e));
            return;
        }
        match self.fs.getattr(&path) {
            Ok(attrs) => {
                let ino = self.ino_for(&path);
                reply.entry(&TTL, &self.fuse_attr(ino, &attrs), 0);
            }
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(path) = self.child(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.fs.unlink(&path) {
            Ok(()) => {
                self.inodes.lock().unwrap_or_else(|p| p.into_inner()).drop_path(&path);
                reply.ok();
            }
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(path) = self.child(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.fs.rmdir(&path) {
            Ok(()) => {
                self.inodes.lock().unwrap_or_else(|p| p.into_inner()).drop_path(&path);
                reply.ok();
            }
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let (Some(from), Some(to)) = (self.child(parent, name), self.child(newparent, newname))
        else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.fs.rename(&from, &to) {
            Ok(()) => {
                self.inodes.lock().unwrap_or_else(|p| p.into_inner()).remap(&from, &to);
                reply.ok();
            }
            Err(e) => reply.error(errno(&e)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        if let Some(size) = size {
            if let Err(e) = self.fs.truncate(&path, size) {
                reply.error(errno(&e));
                return;
            }
        } else {
            debug!(path = path.as_str(), "setattr without size is a no-op");
        }
        match self.fs.getattr(&path) {
            Ok(attrs) => reply.attr(&TTL, &self.fuse_attr(ino, &attrs)),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        let stat = self.fs.statfs();
        reply.statfs(
            stat.blocks,
            stat.blocks_free,
            stat.blocks_free,
            stat.files,
            0,
            stat.block_size,
            stat.name_max,
            stat.block_size,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inode_table_allocates_and_remaps() {
        let mut table = InodeTable::new();
        assert_eq!(table.path_of(ROOT_INO), Some(String::new()));

        let a = table.ino_for("dir/a.txt");
        assert_eq!(table.ino_for("dir/a.txt"), a, "inos are stable");
        let b = table.ino_for("dir/b.txt");
        assert_ne!(a, b);

        table.remap("dir/a.txt", "dir/renamed.txt");
        assert_eq!(table.path_of(a), Some("dir/renamed.txt".to_string()));
        assert_eq!(table.ino_for("dir/renamed.txt"), a);

        table.drop_path("dir/renamed.txt");
        assert_eq!(table.path_of(a), None);
    }

    #[test]
    fn errno_mapping_matches_contract() {
        assert_eq!(errno(&FsError::NotFound("x".into())), libc::ENOENT);
        assert_eq!(errno(&FsError::PermissionDenied("x".into())), libc::EACCES);
        assert_eq!(errno(&FsError::InvalidInput("x".into())), libc::EINVAL);
        assert_eq!(errno(&FsError::Conflict("x".into())), libc::EEXIST);
        assert_eq!(errno(&FsError::Timeout("x".into())), libc::ETIMEDOUT);
        assert_eq!(errno(&FsError::RateLimited("x".into())), libc::EBUSY);
        assert_eq!(errno(&FsError::Internal("x".into())), libc::EIO);
    }

    #[test]
    fn negative_epochs_map_before_unix_epoch() {
        assert!(epoch_time(-60) < UNIX_EPOCH);
        assert_eq!(epoch_time(0), UNIX_EPOCH);
    }
}
