//! Mount-relative path normalization and symlink confinement.
//!
//! Canonical form: `""` for the mount root, otherwise `a/b/c` with single
//! separators and no leading or trailing slash. Normalization is idempotent.

use crate::error::{FsError, FsResult};
use crate::types::{MAX_NAME_BYTES, MAX_PATH_BYTES};
use std::path::{Path, PathBuf};

/// Canonicalize a mount-relative path.
///
/// Collapses duplicate separators, resolves `.`, applies `..` segment-wise,
/// and rejects anything that would escape the mount root, embed NUL or
/// control characters, or exceed the path/segment length bounds.
pub fn normalize(input: &str) -> FsResult<String> {
    if input.len() > MAX_PATH_BYTES {
        return Err(FsError::InvalidInput(format!(
            "path exceeds {MAX_PATH_BYTES} bytes"
        )));
    }
    if input.bytes().any(|b| b == 0 || b < 0x20 || b == 0x7f) {
        return Err(FsError::InvalidInput("path contains control characters".into()));
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in input.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(FsError::InvalidInput(format!(
                        "path escapes mount root: {input}"
                    )));
                }
            }
            name => {
                if name.len() > MAX_NAME_BYTES {
                    return Err(FsError::InvalidInput(format!(
                        "path segment exceeds {MAX_NAME_BYTES} bytes"
                    )));
                }
                segments.push(name);
            }
        }
    }

    Ok(segments.join("/"))
}

/// First segment of a canonical path, if any.
pub fn first_segment(canonical: &str) -> Option<&str> {
    if canonical.is_empty() {
        None
    } else {
        Some(canonical.split('/').next().unwrap_or(canonical))
    }
}

/// Split a canonical path into its first segment and the remainder.
pub fn split_first(canonical: &str) -> Option<(&str, &str)> {
    first_segment(canonical).map(|head| {
        let rest = canonical.get(head.len()..).unwrap_or("");
        (head, rest.strip_prefix('/').unwrap_or(rest))
    })
}

/// Parent of a canonical path (`""` for top-level entries and the root).
pub fn parent(canonical: &str) -> &str {
    canonical.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

/// Resolve `root/rel`, following symlinks only within `root` and capping the
/// chain depth. A link that leaves the root, or a chain deeper than the cap,
/// resolves to `NotFound` — the entry simply does not exist in the view.
pub fn resolve_within_root(root: &Path, rel: &str, max_depth: u32) -> FsResult<PathBuf> {
    let mut current = root.join(rel);
    let mut depth = 0u32;

    loop {
        let meta = match std::fs::symlink_metadata(&current) {
            Ok(m) => m,
            Err(e) => return Err(e.into()),
        };
        if !meta.file_type().is_symlink() {
            return Ok(current);
        }
        if depth >= max_depth {
            return Err(FsError::NotFound(format!(
                "symlink chain exceeds depth {max_depth}: {rel}"
            )));
        }
        depth += 1;

        let target = std::fs::read_link(&current)?;
        let resolved = if target.is_absolute() {
            target
        } else {
            current.parent().unwrap_or(root).join(target)
        };
        // Normalize out `..` components lexically before the containment check.
        let mut flattened = PathBuf::new();
        for comp in resolved.components() {
            match comp {
                std::path::Component::ParentDir => {
                    flattened.pop();
                }
                std::path::Component::CurDir => {}
                other => flattened.push(other),
            }
        }
        if !flattened.starts_with(root) {
            return Err(FsError::NotFound(format!("symlink leaves source root: {rel}")));
        }
        current = flattened;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_separators_and_dots() {
        assert_eq!(normalize("/a//b/./c/").unwrap(), "a/b/c");
        assert_eq!(normalize("a/b/c").unwrap(), "a/b/c");
        assert_eq!(normalize("./a").unwrap(), "a");
    }

    #[test]
    fn root_forms_normalize_to_empty() {
        assert_eq!(normalize("/").unwrap(), "");
        assert_eq!(normalize("").unwrap(), "");
        assert_eq!(normalize("//.").unwrap(), "");
    }

    #[test]
    fn parent_dir_resolves_within_root() {
        assert_eq!(normalize("a/b/../c").unwrap(), "a/c");
        assert_eq!(normalize("a/..").unwrap(), "");
    }

    #[test]
    fn escape_is_rejected() {
        assert!(normalize("..").is_err());
        assert!(normalize("a/../../b").is_err());
        assert!(normalize("/../etc/passwd").is_err());
    }

    #[test]
    fn control_characters_are_rejected() {
        assert!(normalize("a\0b").is_err());
        assert!(normalize("a\nb").is_err());
        assert!(normalize("a\x07b").is_err());
    }

    #[test]
    fn length_bounds_are_enforced() {
        let long_segment = "x".repeat(MAX_NAME_BYTES + 1);
        assert!(normalize(&long_segment).is_err());

        let at_bound = "x".repeat(MAX_NAME_BYTES);
        assert_eq!(normalize(&at_bound).unwrap(), at_bound);

        let long_path = (0..40).map(|_| "y".repeat(120)).collect::<Vec<_>>().join("/");
        assert!(long_path.len() > MAX_PATH_BYTES);
        assert!(normalize(&long_path).is_err());
    }

    #[test]
    fn normalization_is_idempotent() {
        for input in ["/a//b/./c/", "a/b/../c", "", "/", "x/y/z"] {
            let once = normalize(input).unwrap();
            assert_eq!(normalize(&once).unwrap(), once, "input: {input}");
        }
    }

    #[test]
    fn split_first_peels_one_segment() {
        assert_eq!(split_first("by-type/py/a.py"), Some(("by-type", "py/a.py")));
        assert_eq!(split_first("top.txt"), Some(("top.txt", "")));
        assert_eq!(split_first(""), None);
    }

    #[test]
    fn parent_of_canonical_paths() {
        assert_eq!(parent("a/b/c"), "a/b");
        assert_eq!(parent("a"), "");
        assert_eq!(parent(""), "");
    }

    #[test]
    fn symlinks_resolve_within_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::write(root.join("real.txt"), b"data").unwrap();
        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(root.join("real.txt"), root.join("link.txt")).unwrap();
            let resolved = resolve_within_root(root, "link.txt", 10).unwrap();
            assert_eq!(resolved, root.join("real.txt"));
        }
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escaping_root_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("root");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(dir.path().join("outside.txt"), b"secret").unwrap();
        std::os::unix::fs::symlink(dir.path().join("outside.txt"), root.join("sneaky")).unwrap();
        let err = resolve_within_root(&root, "sneaky", 10).unwrap_err();
        assert!(matches!(err, FsError::NotFound(_)));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_loop_hits_depth_cap() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::os::unix::fs::symlink(root.join("b"), root.join("a")).unwrap();
        std::os::unix::fs::symlink(root.join("a"), root.join("b")).unwrap();
        let err = resolve_within_root(root, "a", 10).unwrap_err();
        assert!(matches!(err, FsError::NotFound(_)));
    }
}
