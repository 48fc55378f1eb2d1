//! Skip patterns for directory scanning.
//!
//! A `.goldieskip` file at the scanned directory's root replaces the
//! built-in defaults; its non-empty, non-comment (`#`) lines are shell
//! globs. A trailing `/` marks a directory pattern. Patterns match both
//! basenames and path components, so `node_modules/` prunes that subtree
//! wherever it appears.

use std::path::Path;

use globset::{GlobBuilder, GlobMatcher};
use tracing::{debug, warn};

/// Patterns applied when no `.goldieskip` file exists.
const DEFAULT_PATTERNS: &[&str] = &[
    ".[!.]*", // dotfiles and dot-directories
    "node_modules/",
    "vendor/",
    "__pycache__/",
    "AGENTS.md",
    "CLAUDE.md",
];

/// Name of the per-directory skip file.
pub const SKIP_FILE: &str = ".goldieskip";

struct SkipPattern {
    matcher: GlobMatcher,
    dir_only: bool,
}

/// A compiled set of skip patterns for one scan.
pub struct SkipList {
    patterns: Vec<SkipPattern>,
}

impl SkipList {
    /// Load patterns for a scan rooted at `dir`.
    ///
    /// A present-but-empty skip file yields an empty list (nothing
    /// skipped); an absent file yields the defaults.
    pub fn load(dir: &Path) -> Self {
        let skip_file = dir.join(SKIP_FILE);
        match std::fs::read_to_string(&skip_file) {
            Ok(content) => {
                let lines: Vec<String> = content
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty() && !line.starts_with('#'))
                    .map(str::to_string)
                    .collect();
                debug!("loaded {} skip patterns from {SKIP_FILE}", lines.len());
                Self::from_patterns(&lines)
            }
            Err(_) => {
                let defaults: Vec<String> =
                    DEFAULT_PATTERNS.iter().map(|p| p.to_string()).collect();
                Self::from_patterns(&defaults)
            }
        }
    }

    /// Compile a pattern list; invalid globs are dropped with a warning.
    pub fn from_patterns(patterns: &[String]) -> Self {
        let mut compiled = Vec::with_capacity(patterns.len());
        for raw in patterns {
            let dir_only = raw.ends_with('/');
            let trimmed = raw.trim_end_matches('/');
            if trimmed.is_empty() {
                continue;
            }
            match GlobBuilder::new(trimmed).literal_separator(true).build() {
                Ok(glob) => compiled.push(SkipPattern {
                    matcher: glob.compile_matcher(),
                    dir_only,
                }),
                Err(err) => warn!("ignoring invalid skip pattern {raw:?}: {err}"),
            }
        }
        Self { patterns: compiled }
    }

    /// Whether a path (relative to the scan root) should be skipped.
    pub fn should_skip(&self, rel_path: &str, is_dir: bool) -> bool {
        let rel_path = rel_path.trim_start_matches('/');
        if rel_path.is_empty() {
            return false;
        }

        let basename = rel_path.rsplit('/').next().unwrap_or(rel_path);
        let component_count = rel_path.split('/').count();

        for pattern in &self.patterns {
            // Any parent component matching prunes the whole subtree.
            let parent_hit = rel_path
                .split('/')
                .take(component_count - 1)
                .any(|comp| pattern.matcher.is_match(comp));
            if parent_hit {
                return true;
            }

            if pattern.dir_only && !is_dir {
                continue;
            }
            if pattern.matcher.is_match(basename) || pattern.matcher.is_match(rel_path) {
                return true;
            }
        }

        false
    }

    /// Number of active patterns.
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn list(patterns: &[&str]) -> SkipList {
        let owned: Vec<String> = patterns.iter().map(|p| p.to_string()).collect();
        SkipList::from_patterns(&owned)
    }

    #[test]
    fn defaults_skip_dotfiles_and_dependency_dirs() {
        let tmp = TempDir::new().unwrap();
        let skip = SkipList::load(tmp.path());

        assert!(skip.should_skip(".git", true));
        assert!(skip.should_skip(".env", false));
        assert!(skip.should_skip("node_modules", true));
        assert!(skip.should_skip("node_modules/pkg/index.js", false));
        assert!(skip.should_skip("src/vendor/lib.go", false));
        assert!(skip.should_skip("CLAUDE.md", false));
        assert!(!skip.should_skip("readme.md", false));
        assert!(!skip.should_skip("src/main.rs", false));
    }

    #[test]
    fn skip_file_replaces_defaults() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join(SKIP_FILE),
            "# comment\n\n*.log\nbuild/\n",
        )
        .unwrap();

        let skip = SkipList::load(tmp.path());
        assert_eq!(skip.len(), 2);
        assert!(skip.should_skip("debug.log", false));
        assert!(skip.should_skip("build", true));
        assert!(skip.should_skip("build/out.txt", false));
        // Defaults no longer apply.
        assert!(!skip.should_skip(".git", true));
        assert!(!skip.should_skip("node_modules", true));
    }

    #[test]
    fn empty_skip_file_skips_nothing() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join(SKIP_FILE), "# only comments\n\n").unwrap();

        let skip = SkipList::load(tmp.path());
        assert!(skip.is_empty());
        assert!(!skip.should_skip(".git", true));
        assert!(!skip.should_skip("anything", false));
    }

    #[test]
    fn directory_patterns_do_not_match_plain_files() {
        let skip = list(&["build/"]);
        assert!(skip.should_skip("build", true));
        assert!(!skip.should_skip("build", false));
        assert!(skip.should_skip("build/a.txt", false));
    }

    #[test]
    fn invalid_patterns_are_dropped() {
        let skip = list(&["[", "*.md"]);
        assert_eq!(skip.len(), 1);
        assert!(skip.should_skip("notes.md", false));
    }
}
