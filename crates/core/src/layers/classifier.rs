//! Built-in classifiers: extension, size bucket, mime, glob table, and
//! VCS status.
//!
//! A classifier maps each file to exactly one category string. The VCS
//! classifier snapshots repository status once per index build and never
//! raises — anything it cannot answer is `unknown`.

use crate::layers::LayerView;
use crate::pattern::Pattern;
use crate::types::FileMeta;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Category used by the extension classifier for files without one.
pub const NO_EXTENSION: &str = "no-extension";

/// Category used by the glob-table classifier when nothing matches.
pub const UNMATCHED: &str = "other";

#[derive(Debug, Clone)]
pub enum ClassifierKind {
    Extension,
    SizeBucket,
    Mime,
    /// First-match glob table: `(pattern, category)`.
    PatternTable(Vec<(Pattern, String)>),
    VcsStatus,
}

pub struct Classifier {
    pub kind: ClassifierKind,
}

/// Per-rebuild context. Only the VCS classifier needs one.
#[derive(Default)]
pub struct ClassifierCtx {
    vcs: Option<VcsSnapshot>,
}

impl Classifier {
    pub fn new(kind: ClassifierKind) -> Self {
        Self { kind }
    }

    /// Build whatever per-rebuild state classification needs.
    pub fn prepare(&self, view: &LayerView<'_>) -> ClassifierCtx {
        match self.kind {
            ClassifierKind::VcsStatus => ClassifierCtx {
                vcs: Some(VcsSnapshot::build(
                    view.admitted.iter().map(|&fid| view.files[fid as usize].real_path.as_path()),
                )),
            },
            _ => ClassifierCtx::default(),
        }
    }

    /// Category for one file. Pure given the prepared context.
    pub fn classify(&self, file: &dyn FileMeta, ctx: &ClassifierCtx) -> String {
        match &self.kind {
            ClassifierKind::Extension => {
                let ext = file.extension();
                if ext.is_empty() {
                    NO_EXTENSION.to_string()
                } else {
                    ext.to_string()
                }
            }
            ClassifierKind::SizeBucket => size_bucket(file.size()).to_string(),
            ClassifierKind::Mime => file.mime().to_string(),
            ClassifierKind::PatternTable(table) => table
                .iter()
                .find(|(pattern, _)| pattern.matches(file.rel_path()))
                .map(|(_, category)| category.clone())
                .unwrap_or_else(|| UNMATCHED.to_string()),
            ClassifierKind::VcsStatus => ctx
                .vcs
                .as_ref()
                .map(|snapshot| snapshot.status_of(file.real_path()))
                .unwrap_or("unknown")
                .to_string(),
        }
    }
}

/// Bucket boundaries: tiny ≤ 1 KiB, small ≤ 1 MiB, medium ≤ 100 MiB,
/// large ≤ 1 GiB, huge above.
pub fn size_bucket(size: u64) -> &'static str {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;
    const GIB: u64 = 1024 * MIB;
    if size <= KIB {
        "tiny"
    } else if size <= MIB {
        "small"
    } else if size <= 100 * MIB {
        "medium"
    } else if size <= GIB {
        "large"
    } else {
        "huge"
    }
}

// ---------------------------------------------------------------------------
// VCS status snapshot
// ---------------------------------------------------------------------------

/// Working-tree status captured once per index build. Files under no
/// repository, and every file when discovery or status listing fails, are
/// `unknown`; tracked files without pending changes are `clean`.
pub struct VcsSnapshot {
    status_by_path: HashMap<PathBuf, &'static str>,
    workdirs: Vec<PathBuf>,
}

impl VcsSnapshot {
    pub fn build<'a>(paths: impl Iterator<Item = &'a Path>) -> Self {
        let mut dir_to_workdir: HashMap<PathBuf, Option<PathBuf>> = HashMap::new();
        let mut workdirs: Vec<PathBuf> = Vec::new();
        let mut status_by_path: HashMap<PathBuf, &'static str> = HashMap::new();

        for path in paths {
            let Some(parent) = path.parent() else { continue };
            let workdir = dir_to_workdir
                .entry(parent.to_path_buf())
                .or_insert_with(|| discover_workdir(parent))
                .clone();
            let Some(workdir) = workdir else { continue };
            if !workdirs.contains(&workdir) {
                match load_statuses(&workdir) {
                    Ok(statuses) => {
                        status_by_path.extend(statuses);
                        workdirs.push(workdir);
                    }
                    Err(e) => {
                        debug!(workdir = %workdir.display(), error = %e, "vcs status unavailable");
                    }
                }
            }
        }

        Self { status_by_path, workdirs }
    }

    pub fn status_of(&self, path: &Path) -> &'static str {
        if let Some(status) = self.status_by_path.get(path) {
            return status;
        }
        // Inside a readable repository but not in the status list: clean.
        if self.workdirs.iter().any(|wd| path.starts_with(wd)) {
            "clean"
        } else {
            "unknown"
        }
    }
}

fn discover_workdir(dir: &Path) -> Option<PathBuf> {
    let repo = git2::Repository::discover(dir).ok()?;
    repo.workdir().map(|p| p.to_path_buf())
}

fn load_statuses(workdir: &Path) -> Result<Vec<(PathBuf, &'static str)>, git2::Error> {
    let repo = git2::Repository::open(workdir)?;
    let mut opts = git2::StatusOptions::new();
    opts.include_untracked(true).include_ignored(true).recurse_untracked_dirs(true);
    let statuses = repo.statuses(Some(&mut opts))?;

    let mut out = Vec::with_capacity(statuses.len());
    for entry in statuses.iter() {
        let Some(rel) = entry.path() else { continue };
        out.push((workdir.join(rel), status_name(entry.status())));
    }
    Ok(out)
}

fn status_name(status: git2::Status) -> &'static str {
    use git2::Status;
    if status.intersects(Status::CONFLICTED) {
        "conflicted"
    } else if status.intersects(Status::INDEX_NEW | Status::INDEX_MODIFIED | Status::INDEX_RENAMED)
    {
        "staged"
    } else if status.intersects(Status::WT_MODIFIED | Status::WT_RENAMED | Status::WT_TYPECHANGE) {
        "modified"
    } else if status.intersects(Status::WT_NEW) {
        "untracked"
    } else if status.intersects(Status::WT_DELETED | Status::INDEX_DELETED) {
        "deleted"
    } else if status.intersects(Status::IGNORED) {
        "ignored"
    } else {
        "clean"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FileInfo;
    use std::path::PathBuf;

    fn file(rel: &str, size: u64) -> FileInfo {
        FileInfo::new(PathBuf::from("/b").join(rel), rel.to_string(), 0, size, 0, 0, 0, 0o644)
    }

    #[test]
    fn extension_classifier_uses_sentinel_for_none() {
        let c = Classifier::new(ClassifierKind::Extension);
        let ctx = ClassifierCtx::default();
        assert_eq!(c.classify(&file("a.Py", 1), &ctx), "py");
        assert_eq!(c.classify(&file("Makefile", 1), &ctx), NO_EXTENSION);
    }

    #[test]
    fn size_buckets_at_boundaries() {
        assert_eq!(size_bucket(0), "tiny");
        assert_eq!(size_bucket(1024), "tiny");
        assert_eq!(size_bucket(1025), "small");
        assert_eq!(size_bucket(1024 * 1024), "small");
        assert_eq!(size_bucket(100 * 1024 * 1024), "medium");
        assert_eq!(size_bucket(1024 * 1024 * 1024), "large");
        assert_eq!(size_bucket(1024 * 1024 * 1024 + 1), "huge");
    }

    #[test]
    fn pattern_table_is_first_match() {
        let c = Classifier::new(ClassifierKind::PatternTable(vec![
            (Pattern::glob("**/*.rs").unwrap(), "rust".into()),
            (Pattern::glob("src/**").unwrap(), "src".into()),
        ]));
        let ctx = ClassifierCtx::default();
        assert_eq!(c.classify(&file("src/main.rs", 1), &ctx), "rust");
        assert_eq!(c.classify(&file("src/data.json", 1), &ctx), "src");
        assert_eq!(c.classify(&file("README", 1), &ctx), UNMATCHED);
    }

    #[test]
    fn vcs_status_without_repo_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loose.txt");
        std::fs::write(&path, "x").unwrap();
        let snapshot = VcsSnapshot::build([path.as_path()].into_iter());
        assert_eq!(snapshot.status_of(&path), "unknown");
    }
}
