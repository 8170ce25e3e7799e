//! Tag extractors. A file's tag set is the deduplicated union of every
//! extractor's output; extractor failure is non-fatal and yields no tags.

use crate::pattern::Pattern;
use crate::types::FileMeta;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

pub enum TagExtractor {
    /// Extended attribute holding a tag list (best-effort, unix only).
    Xattr { attr: String },
    /// Sidecar file `<name><suffix>` next to the backing file, JSON list or
    /// CSV.
    Sidecar { suffix: String },
    /// Filename glob → tags.
    FilenameGlob { table: Vec<(Pattern, Vec<String>)> },
    /// Full-path glob → tags.
    PathGlob { table: Vec<(Pattern, Vec<String>)> },
    /// Extension → tags.
    ExtensionMap { table: BTreeMap<String, Vec<String>> },
}

impl TagExtractor {
    /// Zero or more tags for one file.
    pub fn extract(&self, file: &dyn FileMeta) -> BTreeSet<String> {
        match self {
            TagExtractor::Xattr { attr } => read_xattr_tags(file, attr),
            TagExtractor::Sidecar { suffix } => {
                let sidecar =
                    PathBuf::from(format!("{}{suffix}", file.real_path().to_string_lossy()));
                match std::fs::read_to_string(&sidecar) {
                    Ok(content) => parse_tag_list(&content),
                    Err(_) => BTreeSet::new(),
                }
            }
            TagExtractor::FilenameGlob { table } => table
                .iter()
                .filter(|(pattern, _)| pattern.matches(file.file_name()))
                .flat_map(|(_, tags)| tags.iter().cloned())
                .collect(),
            TagExtractor::PathGlob { table } => table
                .iter()
                .filter(|(pattern, _)| pattern.matches(file.rel_path()))
                .flat_map(|(_, tags)| tags.iter().cloned())
                .collect(),
            TagExtractor::ExtensionMap { table } => table
                .get(file.extension())
                .map(|tags| tags.iter().cloned().collect())
                .unwrap_or_default(),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            TagExtractor::Xattr { .. } => "xattr",
            TagExtractor::Sidecar { .. } => "sidecar",
            TagExtractor::FilenameGlob { .. } => "filename-glob",
            TagExtractor::PathGlob { .. } => "path-glob",
            TagExtractor::ExtensionMap { .. } => "extension-map",
        }
    }
}

#[cfg(unix)]
fn read_xattr_tags(file: &dyn FileMeta, attr: &str) -> BTreeSet<String> {
    match xattr::get(file.real_path(), attr) {
        Ok(Some(bytes)) => match String::from_utf8(bytes) {
            Ok(text) => parse_tag_list(&text),
            Err(_) => BTreeSet::new(),
        },
        _ => BTreeSet::new(),
    }
}

#[cfg(not(unix))]
fn read_xattr_tags(_file: &dyn FileMeta, _attr: &str) -> BTreeSet<String> {
    BTreeSet::new()
}

/// Parse a tag list: a JSON array of strings, or a comma/whitespace-separated
/// list. Tags are trimmed; empties are dropped.
pub fn parse_tag_list(text: &str) -> BTreeSet<String> {
    if let Ok(serde_json::Value::Array(items)) = serde_json::from_str(text) {
        return items
            .into_iter()
            .filter_map(|v| match v {
                serde_json::Value::String(s) => Some(s),
                other => Some(other.to_string()),
            })
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }
    text.split([',', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FileInfo;

    fn file(rel: &str) -> FileInfo {
        FileInfo::new(PathBuf::from("/b").join(rel), rel.to_string(), 0, 1, 0, 0, 0, 0o644)
    }

    #[test]
    fn parse_csv_tags() {
        let tags = parse_tag_list("a, b,,  c ");
        assert_eq!(tags, ["a", "b", "c"].map(String::from).into());
    }

    #[test]
    fn parse_json_tags() {
        let tags = parse_tag_list(r#"["x", " y ", ""]"#);
        assert_eq!(tags, ["x", "y"].map(String::from).into());
    }

    #[test]
    fn extension_map_extractor() {
        let extractor = TagExtractor::ExtensionMap {
            table: [("py".to_string(), vec!["code".to_string(), "python".to_string()])]
                .into_iter()
                .collect(),
        };
        assert_eq!(
            extractor.extract(&file("m.py")),
            ["code", "python"].map(String::from).into()
        );
        assert!(extractor.extract(&file("m.rs")).is_empty());
    }

    #[test]
    fn path_glob_extractor_unions_matches() {
        let extractor = TagExtractor::PathGlob {
            table: vec![
                (Pattern::glob("docs/**").unwrap(), vec!["docs".to_string()]),
                (Pattern::glob("**/*.md").unwrap(), vec!["markdown".to_string()]),
            ],
        };
        assert_eq!(
            extractor.extract(&file("docs/guide.md")),
            ["docs", "markdown"].map(String::from).into()
        );
    }

    #[test]
    fn sidecar_extractor_reads_adjacent_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("photo.jpg");
        std::fs::write(&target, b"jpeg").unwrap();
        std::fs::write(dir.path().join("photo.jpg.tags"), "travel, 2024").unwrap();

        let info = FileInfo::new(target, "photo.jpg".into(), 0, 4, 0, 0, 0, 0o644);
        let extractor = TagExtractor::Sidecar { suffix: ".tags".into() };
        assert_eq!(extractor.extract(&info), ["2024", "travel"].map(String::from).into());
    }

    #[test]
    fn missing_sidecar_is_empty_not_an_error() {
        let extractor = TagExtractor::Sidecar { suffix: ".tags".into() };
        assert!(extractor.extract(&file("nothing.here")).is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn xattr_extractor_reads_user_tags() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("tagged.txt");
        std::fs::write(&target, b"x").unwrap();
        let info = FileInfo::new(target.clone(), "tagged.txt".into(), 0, 1, 0, 0, 0, 0o644);
        let extractor = TagExtractor::Xattr { attr: "user.tags".into() };

        // Some filesystems (tmpfs without user_xattr) refuse user xattrs;
        // only assert when the write succeeded.
        if xattr::set(&target, "user.tags", b"a,b").is_ok() {
            assert_eq!(extractor.extract(&info), ["a", "b"].map(String::from).into());
        } else {
            assert!(extractor.extract(&info).is_empty());
        }
    }
}
