//! Path-acceptance policy shared by repository discovery and bulk cache population.
//!
//! Names are matched with gitignore semantics (via the `ignore` crate): a pattern
//! without a slash matches a basename at any depth, a trailing `/` restricts it to
//! directories. VCS metadata names (`.git`, `.hg`, ...) are always rejected.

use std::path::{Path, PathBuf};

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use tracing::warn;

use crate::repository::factory::VARIANT_METADATA_NAMES;

pub struct PathAccepter {
    root: PathBuf,
    matcher: Gitignore,
}

impl PathAccepter {
    /// Build an accepter rooted at `root` from user patterns plus VCS metadata names.
    /// Invalid patterns are logged and skipped.
    pub fn new(root: &Path, patterns: &[String]) -> Self {
        let mut builder = GitignoreBuilder::new(root);
        for name in VARIANT_METADATA_NAMES {
            if let Err(e) = builder.add_line(None, name) {
                warn!(pattern = %name, error = %e, "Invalid built-in ignore pattern");
            }
        }
        for pattern in patterns {
            if let Err(e) = builder.add_line(None, pattern) {
                warn!(pattern = %pattern, error = %e, "Skipping invalid ignore pattern");
            }
        }
        let matcher = builder.build().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to build ignore matcher, accepting everything");
            Gitignore::empty()
        });
        Self {
            root: root.to_path_buf(),
            matcher,
        }
    }

    /// Whether `path` (or any of its parents below the root) is rejected by the policy.
    pub fn is_ignored(&self, path: &Path, is_dir: bool) -> bool {
        let rel = match path.strip_prefix(&self.root) {
            Ok(rel) => rel.to_path_buf(),
            // Outside the root only the basename can be judged.
            Err(_) => match path.file_name() {
                Some(name) => PathBuf::from(name),
                None => return false,
            },
        };
        if rel.as_os_str().is_empty() {
            return false;
        }
        self.matcher
            .matched_path_or_any_parents(&rel, is_dir)
            .is_ignore()
    }

    /// Accept an existing path: not ignored, and not a dangling symlink.
    pub fn accept(&self, path: &Path) -> bool {
        match std::fs::metadata(path) {
            Ok(meta) => !self.is_ignored(path, meta.is_dir()),
            Err(_) => false,
        }
    }
}
