//! Memoized file-to-repository resolution.
//!
//! A lookup walks from the file up towards the filesystem root and stops at the
//! first directory that is a registered repository root, so a nested checkout
//! wins over the repository that contains it. Every directory visited on the way
//! is memoized. Directories that resolved to nothing are memoized as negative
//! entries and backfilled once the walk finds the owner further up.
//!
//! A negative entry is only a hint: another walk may be about to backfill it, so
//! a walk that meets one keeps going up instead of answering "no repository".

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::registry::RepositoryMap;
use crate::repository::Repository;
use crate::{canonical_or_absolute, normalize_absolute, path_key};

type Memo = HashMap<String, Option<Arc<dyn Repository>>>;

#[derive(Default)]
pub struct PathLookupCache {
    memo: RwLock<Memo>,
}

/// `path == prefix` or `path` lies below `prefix`.
fn is_under(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some("") => true,
        Some(rest) => rest.starts_with('/') || rest.starts_with('\\') || prefix.ends_with('/'),
        None => false,
    }
}

impl PathLookupCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_memo(&self, key: &str) -> Option<Option<Arc<dyn Repository>>> {
        self.memo
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    /// Repository owning `path`, if any.
    pub fn resolve(&self, path: &Path, map: &RepositoryMap) -> Option<Arc<dyn Repository>> {
        if map.repositories.is_empty() {
            return None;
        }
        let absolute = normalize_absolute(path);
        let canonical = path_key(&canonical_or_absolute(path));

        // Parents of registered roots that can contain this path, most specific first.
        let mut parents: Vec<&str> = map
            .root_parents
            .iter()
            .map(String::as_str)
            .filter(|p| is_under(&canonical, p))
            .collect();
        if parents.is_empty() {
            return None;
        }
        parents.sort_by(|a, b| b.len().cmp(&a.len()));

        let mut unresolved: Vec<String> = Vec::new();
        let mut found: Option<Arc<dyn Repository>> = None;

        for dir in absolute.ancestors() {
            let key = path_key(dir);
            match self.read_memo(&key) {
                Some(Some(repo)) => {
                    found = Some(repo);
                    break;
                }
                Some(None) => {
                    unresolved.push(key);
                    continue;
                }
                None => {}
            }

            if let Some(repo) = Self::repo_for_path(dir, &key, &parents, map) {
                if dir.is_dir() {
                    self.memo
                        .write()
                        .unwrap_or_else(|e| e.into_inner())
                        .insert(key, Some(Arc::clone(&repo)));
                }
                found = Some(repo);
                break;
            }
            if dir.is_dir() {
                self.memo
                    .write()
                    .unwrap_or_else(|e| e.into_inner())
                    .entry(key.clone())
                    .or_insert(None);
                unresolved.push(key);
            }
        }

        if let Some(repo) = &found {
            if !unresolved.is_empty() {
                let mut memo = self.memo.write().unwrap_or_else(|e| e.into_inner());
                for key in unresolved {
                    memo.insert(key, Some(Arc::clone(repo)));
                }
            }
        } else {
            debug!(path = %path.display(), "No repository owns path");
        }
        found
    }

    /// Registered root at `dir`: either `dir` itself is a root key, or its
    /// canonical form lies under one of the candidate parents and is a root.
    fn repo_for_path(
        dir: &Path,
        key: &str,
        parents: &[&str],
        map: &RepositoryMap,
    ) -> Option<Arc<dyn Repository>> {
        if let Some(repo) = map.repositories.get(key) {
            return Some(Arc::clone(repo));
        }
        let canonical = path_key(&canonical_or_absolute(dir));
        for parent in parents {
            let Some(rel) = canonical.strip_prefix(parent) else { continue };
            let rel = rel.trim_start_matches(['/', '\\']);
            if rel.is_empty() {
                continue;
            }
            let candidate = path_key(&Path::new(parent).join(rel));
            if let Some(repo) = map.repositories.get(&candidate) {
                return Some(Arc::clone(repo));
            }
        }
        None
    }

    /// Drop every entry that points at one of the removed repository roots.
    pub fn repositories_removed(&self, removed_roots: &[String]) {
        let mut memo = self.memo.write().unwrap_or_else(|e| e.into_inner());
        memo.retain(|_, repo| match repo {
            Some(r) => !removed_roots.contains(&path_key(r.directory())),
            None => true,
        });
    }

    /// Forget everything (the set of repositories changed).
    pub fn clear(&self) {
        self.memo.write().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn len(&self) -> usize {
        self.memo.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Memoized answer for `dir`: `Some(None)` is a negative entry.
    pub fn memoized(&self, dir: &Path) -> Option<Option<Arc<dyn Repository>>> {
        self.read_memo(&path_key(dir))
    }
}
