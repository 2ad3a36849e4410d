//! Exclude matcher (C4): compiles ignore patterns and tests paths against
//! them with gitignore-compatible semantics (spec §4.4).
//!
//! Ports the matcher rather than reimplementing anchoring/negation edge
//! cases (spec §9 design note), using the `ignore` crate's
//! `gitignore::Gitignore`, the same gitignore engine `ripgrep` and, in
//! this retrieval pack, `rustic_core`'s `LocalSource`
//! (`other_examples/...rustic-rs-rustic__crates-rustic_core-src-backend-ignore.rs`)
//! use for path-filtering during a directory walk.

use crate::error::EngineError;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::path::Path;
use typed_path::Utf8UnixPath as UnixPath;

/// A compiled, ordered set of ignore patterns.
pub struct ExcludeSet {
    matcher: Gitignore,
}

impl ExcludeSet {
    /// Builds an `ExcludeSet` from an in-memory list of patterns (the
    /// CLI's repeatable `--exclude <pattern>`), applied in the given order.
    pub fn from_patterns(patterns: &[String]) -> Result<Self, EngineError> {
        let mut builder = GitignoreBuilder::new("/");
        for pattern in patterns {
            builder
                .add_line(None, pattern)
                .map_err(|e| EngineError::Config(format!("bad exclude pattern: {e}")))?;
        }
        let matcher = builder
            .build()
            .map_err(|e| EngineError::Config(format!("failed to compile excludes: {e}")))?;
        Ok(Self { matcher })
    }

    /// Builds an `ExcludeSet` from an exclude file: UTF-8 text, one pattern
    /// per line, `#` comments, blank lines ignored (spec §6), optionally
    /// joined with additional inline `--exclude` patterns applied after
    /// (so a later `--exclude` negation can override a file-sourced rule,
    /// per the ordered-patterns contract in §4.4).
    pub fn from_file_and_patterns(
        file: Option<&Path>,
        patterns: &[String],
    ) -> Result<Self, EngineError> {
        let mut builder = GitignoreBuilder::new("/");
        if let Some(path) = file {
            let contents = std::fs::read_to_string(path).map_err(|e| {
                EngineError::Config(format!("could not read exclude file {path:?}: {e}"))
            })?;
            for line in contents.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                builder
                    .add_line(None, line)
                    .map_err(|e| EngineError::Config(format!("bad exclude pattern: {e}")))?;
            }
        }
        for pattern in patterns {
            builder
                .add_line(None, pattern)
                .map_err(|e| EngineError::Config(format!("bad exclude pattern: {e}")))?;
        }
        let matcher = builder
            .build()
            .map_err(|e| EngineError::Config(format!("failed to compile excludes: {e}")))?;
        Ok(Self { matcher })
    }

    /// An `ExcludeSet` with no patterns: matches nothing.
    pub fn empty() -> Self {
        Self::from_patterns(&[]).expect("empty pattern set always compiles")
    }

    /// Tests whether `relative_path` (POSIX-separated, relative to the
    /// inventory root) is excluded. Checks the path and every ancestor
    /// directory, so a directory-only pattern (trailing `/`) excludes
    /// everything beneath it too, not just the directory entry itself.
    pub fn matches(&self, relative_path: &UnixPath, is_directory: bool) -> bool {
        let anchored = format!("/{}", relative_path.as_str());
        self.matcher
            .matched_path_or_any_parents(Path::new(&anchored), is_directory)
            .is_ignore()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use typed_path::Utf8UnixPathBuf as UnixPathBuf;

    fn p(s: &str) -> UnixPathBuf {
        UnixPathBuf::from(s)
    }

    #[test]
    fn directory_suffix_matches_dirs_only() {
        let set = ExcludeSet::from_patterns(&[".thumbnails/".to_string()]).unwrap();
        assert!(set.matches(&p("DCIM/.thumbnails"), true));
        assert!(!set.matches(&p("DCIM/.thumbnails"), false));
    }

    #[test]
    fn negation_overrides_earlier_match() {
        let set = ExcludeSet::from_patterns(&[
            "*.jpg".to_string(),
            "!keep.jpg".to_string(),
        ])
        .unwrap();
        assert!(set.matches(&p("DCIM/a.jpg"), false));
        assert!(!set.matches(&p("DCIM/keep.jpg"), false));
    }

    #[test]
    fn anchored_pattern_only_matches_root() {
        let set = ExcludeSet::from_patterns(&["/build".to_string()]).unwrap();
        assert!(set.matches(&p("build"), true));
        assert!(!set.matches(&p("nested/build"), true));
    }

    #[test]
    fn double_star_matches_any_depth() {
        let set = ExcludeSet::from_patterns(&["**/cache".to_string()]).unwrap();
        assert!(set.matches(&p("a/b/cache"), true));
        assert!(set.matches(&p("cache"), true));
    }

    #[test]
    fn star_does_not_cross_separator() {
        let set = ExcludeSet::from_patterns(&["a/*/c".to_string()]).unwrap();
        assert!(set.matches(&p("a/b/c"), false));
        assert!(!set.matches(&p("a/b/d/c"), false));
    }
}
