//! Repository discovery and the shared set of known repositories.
//!
//! The set is an immutable [`RepositoryMap`] behind an `Arc`; every change builds
//! a new map and swaps it in, so readers never observe a half-updated registry.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::accept::PathAccepter;
use crate::config::Configuration;
use crate::exec::CommandTimeoutType;
use crate::lookup::PathLookupCache;
use crate::pool;
use crate::repository::factory::RepositoryFactory;
use crate::repository::Repository;
use crate::{canonical_or_absolute, path_key};

/// Registered repositories keyed by canonical root, plus the parent directory
/// of every root (the candidate prefixes for path lookups).
#[derive(Clone, Default)]
pub struct RepositoryMap {
    pub repositories: HashMap<String, Arc<dyn Repository>>,
    pub root_parents: BTreeSet<String>,
}

impl RepositoryMap {
    pub fn insert(&mut self, repo: Arc<dyn Repository>) {
        let dir = repo.directory().to_path_buf();
        if let Some(parent) = dir.parent() {
            self.root_parents.insert(path_key(parent));
        }
        self.repositories.insert(path_key(&dir), repo);
    }

    /// Remove the root at `key`; parents are recomputed from what remains.
    pub fn remove(&mut self, key: &str) -> Option<Arc<dyn Repository>> {
        let removed = self.repositories.remove(key)?;
        self.root_parents = self
            .repositories
            .values()
            .filter_map(|r| r.directory().parent().map(path_key))
            .collect();
        Some(removed)
    }

    pub fn get(&self, root: &Path) -> Option<&Arc<dyn Repository>> {
        self.repositories.get(&path_key(&canonical_or_absolute(root)))
    }

    pub fn len(&self) -> usize {
        self.repositories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.repositories.is_empty()
    }

    /// Repositories ordered by root directory.
    pub fn sorted(&self) -> Vec<Arc<dyn Repository>> {
        let mut repos: Vec<Arc<dyn Repository>> = self.repositories.values().cloned().collect();
        repos.sort_by(|a, b| a.directory().cmp(b.directory()));
        repos
    }
}

pub struct RepositoryRegistry {
    factory: RepositoryFactory,
    current: RwLock<Arc<RepositoryMap>>,
    lookup: PathLookupCache,
}

impl RepositoryRegistry {
    pub fn new(factory: RepositoryFactory) -> Self {
        Self {
            factory,
            current: RwLock::new(Arc::new(RepositoryMap::default())),
            lookup: PathLookupCache::new(),
        }
    }

    pub fn config(&self) -> &Arc<Configuration> {
        self.factory.config()
    }

    pub fn factory(&self) -> &RepositoryFactory {
        &self.factory
    }

    pub fn lookup(&self) -> &PathLookupCache {
        &self.lookup
    }

    /// Current registry contents; cheap, and stable while held.
    pub fn snapshot(&self) -> Arc<RepositoryMap> {
        Arc::clone(&self.current.read().unwrap_or_else(|e| e.into_inner()))
    }

    fn swap(&self, map: RepositoryMap) {
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(map);
    }

    /// Owning repository of `path`.
    pub fn get_repository(&self, path: &Path) -> Option<Arc<dyn Repository>> {
        let map = self.snapshot();
        self.lookup.resolve(path, &map)
    }

    /// Repository rooted exactly at `root`.
    pub fn repository_at(&self, root: &Path) -> Option<Arc<dyn Repository>> {
        self.snapshot().get(root).cloned()
    }

    pub fn repositories(&self) -> Vec<Arc<dyn Repository>> {
        self.snapshot().sorted()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    // ─── Discovery ──────────────────────────────────────────────────

    /// Discover repositories at and below each of `dirs` and register them.
    ///
    /// Each candidate tree is scanned in parallel; a probe failure skips that
    /// candidate only. Returns the repositories found by this call.
    pub fn add_repositories(&self, dirs: &[PathBuf], kind: CommandTimeoutType) -> Vec<Arc<dyn Repository>> {
        let start = Instant::now();
        let config = Arc::clone(self.config());
        let accepter = PathAccepter::new(&config.source_root(), &config.ignored_names);

        let per_dir = pool::run_parallel(dirs.to_vec(), config.invalidation_threads(kind), |dir| {
            let mut found = Vec::new();
            let dir = canonical_or_absolute(&dir);
            self.scan(
                vec![dir],
                config.scanning_depth,
                config.nesting_maximum,
                false,
                kind,
                &accepter,
                &mut found,
            );
            found
        });
        let found: Vec<Arc<dyn Repository>> = per_dir.into_iter().flatten().collect();

        let mut map = (*self.snapshot()).clone();
        for repo in &found {
            map.insert(Arc::clone(repo));
        }
        self.swap(map);
        self.lookup.clear();

        info!(
            added = found.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Repository discovery finished"
        );
        found
    }

    /// Probe each candidate; recurse into non-repositories while `depth` lasts,
    /// and into repositories that allow sub-repositories while `nesting` lasts.
    #[allow(clippy::too_many_arguments)]
    fn scan(
        &self,
        candidates: Vec<PathBuf>,
        depth: usize,
        nesting: usize,
        is_nested: bool,
        kind: CommandTimeoutType,
        accepter: &PathAccepter,
        found: &mut Vec<Arc<dyn Repository>>,
    ) {
        for dir in candidates {
            if !dir.is_dir() {
                continue;
            }
            match self.factory.get_repository(&dir, kind, is_nested) {
                Some(repo) => {
                    let nested_allowed = repo.supports_sub_repositories() && nesting > 0;
                    found.push(repo);
                    if nested_allowed {
                        self.scan(subdirectories(&dir, accepter), depth, nesting - 1, true, kind, accepter, found);
                    }
                }
                None if depth > 0 => {
                    self.scan(subdirectories(&dir, accepter), depth - 1, nesting, is_nested, kind, accepter, found);
                }
                None => {}
            }
        }
    }

    // ─── Invalidation and removal ───────────────────────────────────

    /// Re-probe the given repository roots and make them the registry contents.
    ///
    /// Probes run in parallel (fewer workers on interactive paths); the new map
    /// replaces the old one only after every probe finished. Roots that no
    /// longer hold a usable repository are logged and dropped.
    pub fn invalidate_repositories(&self, roots: &[PathBuf], kind: CommandTimeoutType) -> Vec<Arc<dyn Repository>> {
        let start = Instant::now();
        let threads = self.config().invalidation_threads(kind);
        let probed = pool::run_parallel(roots.to_vec(), threads, |root| {
            let repo = self.factory.revalidate(&root, kind, false);
            if repo.is_none() {
                warn!(repo = %root.display(), "Could not revalidate repository");
            }
            repo
        });

        let mut map = RepositoryMap::default();
        let mut valid = Vec::new();
        for repo in probed.into_iter().flatten() {
            map.insert(Arc::clone(&repo));
            valid.push(repo);
        }
        valid.sort_by(|a, b| a.directory().cmp(b.directory()));
        self.swap(map);
        self.lookup.clear();

        info!(
            requested = roots.len(),
            valid = valid.len(),
            threads,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Repositories invalidated"
        );
        valid
    }

    /// Unregister the repositories rooted at `roots`; returns those removed.
    pub fn remove_repositories(&self, roots: &[PathBuf]) -> Vec<Arc<dyn Repository>> {
        let mut map = (*self.snapshot()).clone();
        let mut removed = Vec::new();
        for root in roots {
            let key = path_key(&canonical_or_absolute(root));
            match map.remove(&key) {
                Some(repo) => removed.push(repo),
                None => debug!(repo = %root.display(), "Not a registered repository"),
            }
        }
        if removed.is_empty() {
            return removed;
        }
        self.swap(map);
        let keys: Vec<String> = removed.iter().map(|r| path_key(r.directory())).collect();
        self.lookup.repositories_removed(&keys);
        info!(removed = removed.len(), "Repositories removed");
        removed
    }
}

/// Accepted immediate subdirectories of `dir`, sorted for a stable scan order.
fn subdirectories(dir: &Path, accepter: &PathAccepter) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Cannot list directory");
            return Vec::new();
        }
    };
    let mut dirs: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir() && accepter.accept(p))
        .collect();
    dirs.sort();
    dirs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::factory::RepositoryVariant;
    use crate::testing::{make_repo_dir, MockVariant};

    fn registry(src: &Path, variants: Vec<Box<dyn RepositoryVariant>>, tweak: impl FnOnce(&mut Configuration)) -> RepositoryRegistry {
        let mut config = Configuration {
            source_root: src.to_path_buf(),
            data_root: src.join("../data"),
            ..Default::default()
        };
        tweak(&mut config);
        RepositoryRegistry::new(RepositoryFactory::with_variants(Arc::new(config), variants))
    }

    fn roots(repos: &[Arc<dyn Repository>]) -> Vec<String> {
        repos.iter().map(|r| r.info().directory_relative.clone()).collect()
    }

    #[test]
    fn test_discovers_repositories_within_depth() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        make_repo_dir(&src, "a", ".mock", &["f.c"]);
        make_repo_dir(&src.join("group"), "b", ".mock", &["g.c"]);
        make_repo_dir(&src.join("x/y/z"), "deep", ".mock", &["h.c"]);

        let reg = registry(&src, vec![Box::new(MockVariant::new("mock", ".mock"))], |c| c.scanning_depth = 2);
        let found = reg.add_repositories(&[src.clone()], CommandTimeoutType::Indexer);
        assert_eq!(found.len(), 2);
        assert_eq!(roots(&reg.repositories()), vec!["/a", "/group/b"]);
    }

    #[test]
    fn test_nested_discovery_respects_nesting_budget() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        let proj = make_repo_dir(&src, "proj", ".mock", &["main.c"]);
        let vendor = make_repo_dir(&proj, "vendor", ".mock", &["v.c"]);
        make_repo_dir(&vendor, "inner", ".mock", &["i.c"]);

        let reg = registry(&src, vec![Box::new(MockVariant::new("mock", ".mock"))], |c| c.nesting_maximum = 1);
        reg.add_repositories(&[src.clone()], CommandTimeoutType::Indexer);
        assert_eq!(roots(&reg.repositories()), vec!["/proj", "/proj/vendor"]);
    }

    #[test]
    fn test_no_nested_scan_without_sub_repository_support() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        let proj = make_repo_dir(&src, "proj", ".mock", &["main.c"]);
        make_repo_dir(&proj, "vendor", ".mock", &["v.c"]);

        let reg = registry(
            &src,
            vec![Box::new(MockVariant::new("mock", ".mock").sub_repositories(false))],
            |_| {},
        );
        reg.add_repositories(&[src.clone()], CommandTimeoutType::Indexer);
        assert_eq!(roots(&reg.repositories()), vec!["/proj"]);
    }

    #[test]
    fn test_nested_non_nestable_variant_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        let proj = make_repo_dir(&src, "proj", ".outer", &["main.c"]);
        make_repo_dir(&proj, "flat", ".flat", &["f.c"]);
        make_repo_dir(&proj, "vendor", ".outer", &["v.c"]);

        let reg = registry(
            &src,
            vec![
                Box::new(MockVariant::new("outer", ".outer")),
                Box::new(MockVariant::new("flat", ".flat").nestable(false)),
            ],
            |_| {},
        );
        reg.add_repositories(&[src.clone()], CommandTimeoutType::Indexer);
        assert_eq!(roots(&reg.repositories()), vec!["/proj", "/proj/vendor"]);
    }

    #[test]
    fn test_ignored_names_are_not_scanned() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        make_repo_dir(&src, "keep", ".mock", &["f.c"]);
        make_repo_dir(&src, "node_modules", ".mock", &["f.c"]);

        let reg = registry(&src, vec![Box::new(MockVariant::new("mock", ".mock"))], |c| {
            c.ignored_names = vec!["node_modules/".to_string()];
        });
        reg.add_repositories(&[src.clone()], CommandTimeoutType::Indexer);
        assert_eq!(roots(&reg.repositories()), vec!["/keep"]);
    }

    #[test]
    fn test_broken_candidate_does_not_stop_discovery() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        make_repo_dir(&src, "broken", ".bad", &["f.c"]);
        make_repo_dir(&src, "good", ".mock", &["f.c"]);

        let reg = registry(
            &src,
            vec![
                Box::new(MockVariant::new("bad", ".bad").working(false)),
                Box::new(MockVariant::new("mock", ".mock")),
            ],
            |_| {},
        );
        let found = reg.add_repositories(&[src.join("broken"), src.join("good")], CommandTimeoutType::Indexer);
        assert_eq!(roots(&found), vec!["/good"]);
    }

    #[test]
    fn test_lookup_through_registry() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        let proj = make_repo_dir(&src, "proj", ".outer", &["main.c"]);
        let vendor = make_repo_dir(&proj, "vendor", ".inner", &["file.c"]);
        let reg = registry(
            &src,
            vec![
                Box::new(MockVariant::new("outer", ".outer").nestable(false)),
                Box::new(MockVariant::new("inner", ".inner")),
            ],
            |_| {},
        );
        reg.add_repositories(&[src.clone()], CommandTimeoutType::Indexer);

        assert_eq!(reg.get_repository(&vendor.join("file.c")).unwrap().info().kind, "inner");
        assert_eq!(reg.get_repository(&proj.join("main.c")).unwrap().info().kind, "outer");
        assert!(reg.get_repository(&src).is_none());
    }

    #[test]
    fn test_invalidation_replaces_contents() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        let a = make_repo_dir(&src, "a", ".mock", &["f.c"]);
        let b = make_repo_dir(&src, "b", ".mock", &["f.c"]);
        let reg = registry(&src, vec![Box::new(MockVariant::new("mock", ".mock"))], |c| {
            c.repository_invalidation_parallelism = 4;
        });
        reg.add_repositories(&[src.clone()], CommandTimeoutType::Indexer);
        assert_eq!(reg.len(), 2);
        let before = reg.repository_at(&a).unwrap();

        std::fs::remove_dir_all(&b).unwrap();
        let valid = reg.invalidate_repositories(&[a.clone(), b.clone()], CommandTimeoutType::Interactive);
        assert_eq!(roots(&valid), vec!["/a"]);
        assert_eq!(roots(&reg.repositories()), vec!["/a"]);
        let after = reg.repository_at(&a).unwrap();
        assert!(!Arc::ptr_eq(&before, &after), "revalidation builds a new descriptor");
    }

    #[test]
    fn test_snapshot_is_stable_across_swaps() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        let a = make_repo_dir(&src, "a", ".mock", &["f.c"]);
        let reg = registry(&src, vec![Box::new(MockVariant::new("mock", ".mock"))], |_| {});
        reg.add_repositories(&[src.clone()], CommandTimeoutType::Indexer);

        let held = reg.snapshot();
        reg.remove_repositories(&[a.clone()]);
        assert_eq!(held.len(), 1);
        assert!(reg.is_empty());
    }

    #[test]
    fn test_remove_purges_lookup() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        let a = make_repo_dir(&src, "a", ".mock", &["f.c"]);
        let reg = registry(&src, vec![Box::new(MockVariant::new("mock", ".mock"))], |_| {});
        reg.add_repositories(&[src.clone()], CommandTimeoutType::Indexer);
        assert!(reg.get_repository(&a.join("f.c")).is_some());

        let removed = reg.remove_repositories(&[a.clone()]);
        assert_eq!(removed.len(), 1);
        assert!(reg.get_repository(&a.join("f.c")).is_none());
        assert!(reg.lookup().memoized(&a).is_none());
        assert!(reg.remove_repositories(&[a]).is_empty());
    }
}
