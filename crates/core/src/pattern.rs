//! Glob and regex matching against canonical mount-relative paths.
//!
//! Patterns are compiled once per rule/transform and reused for every match.

use crate::error::{FsError, FsResult};
use globset::{GlobBuilder, GlobMatcher};
use regex::Regex;

/// A compiled path pattern.
#[derive(Debug, Clone)]
pub enum Pattern {
    Glob(GlobMatcher),
    Regex(Regex),
}

impl Pattern {
    /// Compile a glob. `*` and `?` stay within a path segment; `**` crosses
    /// segments; character classes are supported.
    pub fn glob(pattern: &str) -> FsResult<Self> {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| FsError::InvalidInput(format!("bad glob '{pattern}': {e}")))?;
        Ok(Pattern::Glob(glob.compile_matcher()))
    }

    /// Compile a regex, anchored the way the caller wrote it.
    pub fn regex(pattern: &str) -> FsResult<Self> {
        let re = Regex::new(pattern)
            .map_err(|e| FsError::InvalidInput(format!("bad regex '{pattern}': {e}")))?;
        Ok(Pattern::Regex(re))
    }

    /// Match against a canonical mount-relative path.
    pub fn matches(&self, path: &str) -> bool {
        match self {
            Pattern::Glob(matcher) => matcher.is_match(path),
            Pattern::Regex(re) => re.is_match(path),
        }
    }

    /// The pattern source, for fingerprinting and diagnostics.
    pub fn source(&self) -> &str {
        match self {
            Pattern::Glob(matcher) => matcher.glob().glob(),
            Pattern::Regex(re) => re.as_str(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_star_stays_within_segment() {
        let p = Pattern::glob("*.txt").unwrap();
        assert!(p.matches("a.txt"));
        assert!(!p.matches("dir/a.txt"));
    }

    #[test]
    fn double_star_crosses_segments() {
        let p = Pattern::glob("**/*.txt").unwrap();
        assert!(p.matches("dir/a.txt"));
        assert!(p.matches("a/b/c.txt"));
        // a leading `**/` also matches entries at the root
        assert!(p.matches("a.txt"));
    }

    #[test]
    fn question_mark_and_classes() {
        let p = Pattern::glob("file?.[ch]").unwrap();
        assert!(p.matches("file1.c"));
        assert!(p.matches("fileX.h"));
        assert!(!p.matches("file10.c"));
    }

    #[test]
    fn hidden_file_glob() {
        let p = Pattern::glob(".*").unwrap();
        assert!(p.matches(".hidden"));
        assert!(!p.matches("visible.txt"));
    }

    #[test]
    fn regex_matching() {
        let p = Pattern::regex(r"^test_.*\.py$").unwrap();
        assert!(p.matches("test_foo.py"));
        assert!(!p.matches("foo_test.py"));
    }

    #[test]
    fn invalid_patterns_are_invalid_input() {
        assert!(matches!(Pattern::glob("a[").unwrap_err(), FsError::InvalidInput(_)));
        assert!(matches!(Pattern::regex("a(").unwrap_err(), FsError::InvalidInput(_)));
    }
}
