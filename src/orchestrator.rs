//! Entry point for history and annotation requests.
//!
//! [`HistoryOrchestrator`] owns the repository registry and the caches. For a
//! file it finds the owning repository, serves from the history cache when it
//! can and otherwise decides whether a live query is allowed (remote policy,
//! index-done policy) before running it. Bulk population and cache
//! maintenance for whole repositories also go through here.

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::cache::annotation::FileAnnotationCache;
use crate::cache::history::{FileHistoryCache, StoreSummary};
use crate::config::{Configuration, RemoteScm};
use crate::error::{HistoryError, Result};
use crate::exec::CommandTimeoutType;
use crate::history::annotation::Annotation;
use crate::history::{History, HistoryEntry};
use crate::pool::run_parallel;
use crate::registry::RepositoryRegistry;
use crate::repository::factory::RepositoryFactory;
use crate::repository::{Repository, RepositoryInfo};

pub struct HistoryOrchestrator {
    config: Arc<Configuration>,
    registry: RepositoryRegistry,
    history_cache: Option<FileHistoryCache>,
    annotation_cache: Option<FileAnnotationCache>,
}

impl HistoryOrchestrator {
    /// Orchestrator over the shipped repository variants.
    pub fn new(config: Configuration) -> Result<Self> {
        config.validate()?;
        Self::with_factory(RepositoryFactory::new(Arc::new(config)))
    }

    /// Orchestrator over the variants known to `factory`. Cache directories
    /// are created for every cache enabled in the configuration.
    pub fn with_factory(factory: RepositoryFactory) -> Result<Self> {
        let config = Arc::clone(factory.config());
        let history_cache = if config.history_cache_enabled {
            let cache = FileHistoryCache::new(Arc::clone(&config));
            cache.initialize()?;
            Some(cache)
        } else {
            None
        };
        let annotation_cache = if config.annotation_cache_enabled {
            let cache = FileAnnotationCache::new(Arc::clone(&config));
            cache.initialize()?;
            Some(cache)
        } else {
            None
        };
        Ok(Self {
            config,
            registry: RepositoryRegistry::new(factory),
            history_cache,
            annotation_cache,
        })
    }

    pub fn config(&self) -> &Arc<Configuration> {
        &self.config
    }

    pub fn registry(&self) -> &RepositoryRegistry {
        &self.registry
    }

    pub fn history_cache(&self) -> Option<&FileHistoryCache> {
        self.history_cache.as_ref()
    }

    pub fn annotation_cache(&self) -> Option<&FileAnnotationCache> {
        self.annotation_cache.as_ref()
    }

    pub fn get_repository(&self, file: &Path) -> Option<Arc<dyn Repository>> {
        self.registry.get_repository(file)
    }

    /// History cache, when enabled and able to hold this repository.
    fn cache_for(&self, repo: &dyn Repository) -> Option<&FileHistoryCache> {
        self.history_cache
            .as_ref()
            .filter(|c| c.supports_repository(repo))
    }

    fn live_query_allowed(&self, repo: &dyn Repository, ui: bool) -> bool {
        !repo.is_remote()
            || self
                .config
                .remote_scm
                .allows_live_query(ui, repo.has_history_for_directories())
    }

    // ─── History ────────────────────────────────────────────────────

    /// History of `file` (a file or directory), newest first.
    ///
    /// `Ok(None)` means no history is available: no owning repository, history
    /// disabled, or a live query that policy does not allow. Without
    /// `with_files` the changed-file lists are stripped from the entries.
    pub fn get_history(&self, file: &Path, with_files: bool, ui: bool) -> Result<Option<History>> {
        let Some(repo) = self.get_repository(file) else {
            debug!(file = %file.display(), "No repository for file");
            return Ok(None);
        };
        let repo = repo.as_ref();
        if !repo.info().history_enabled || !repo.is_working() || !repo.file_has_history(file) {
            return Ok(None);
        }

        let cache = self.cache_for(repo);
        if let Some(cache) = cache {
            match cache.get(file, repo) {
                Ok(Some(mut history)) => {
                    if !with_files {
                        history.strip();
                    }
                    return Ok(Some(history));
                }
                Ok(None) => {}
                Err(e) => warn!(file = %file.display(), error = %e, "History cache read failed"),
            }
            if cache.is_history_index_done(repo)
                && repo.has_history_for_directories()
                && !self.config.fetch_history_when_not_in_cache
            {
                debug!(file = %file.display(), "Not in cache after indexing, skipping live query");
                return Ok(None);
            }
        }

        if !self.live_query_allowed(repo, ui) {
            debug!(
                file = %file.display(),
                policy = ?self.config.remote_scm,
                "Live query of remote repository not allowed"
            );
            return Ok(None);
        }

        let start = Instant::now();
        let mut history = repo.history(file, None, None)?;
        if self.config.tags_enabled && repo.has_file_based_tags() && repo.tag_list().is_some() {
            repo.assign_tags_in_history(&mut history)?;
        }
        let elapsed = start.elapsed();

        if let Some(cache) = cache {
            if file.is_file()
                && (cache.has_cache_for_file(file) || elapsed > self.config.history_reader_time_limit())
            {
                if let Err(e) = cache.store_file(&history, file, repo) {
                    warn!(file = %file.display(), error = %e, "Cannot store history in cache");
                } else {
                    debug!(file = %file.display(), elapsed_ms = elapsed.as_millis() as u64, "Cached live history");
                }
            }
        }

        if !with_files {
            history.strip();
        }
        Ok(Some(history))
    }

    /// Whether history can be offered for `file`. Remote repositories count
    /// under every policy but `off`; with `off` only cached files do.
    pub fn has_history(&self, file: &Path) -> bool {
        let Some(repo) = self.get_repository(file) else {
            return false;
        };
        let repo = repo.as_ref();
        if !repo.info().history_enabled || !repo.is_working() || !repo.file_has_history(file) {
            return false;
        }
        !repo.is_remote() || self.config.remote_scm != RemoteScm::Off || self.has_history_cache_for_file(file)
    }

    pub fn has_history_cache_for_file(&self, file: &Path) -> bool {
        let Some(cache) = &self.history_cache else {
            return false;
        };
        match self.get_repository(file) {
            Some(repo) if file.is_dir() => cache.has_cache_for_directory(file, repo.as_ref()),
            _ => cache.has_cache_for_file(file),
        }
    }

    // ─── Annotation ─────────────────────────────────────────────────

    pub fn has_annotation(&self, file: &Path) -> bool {
        if file.is_dir() {
            return false;
        }
        let Some(repo) = self.get_repository(file) else {
            return false;
        };
        let repo = repo.as_ref();
        repo.is_working() && repo.file_has_annotation(file) && self.live_query_allowed(repo, true)
    }

    /// Per-line blame of `file` at `revision` (latest when `None`), completed
    /// with each revision's description and file version.
    pub fn annotate(&self, file: &Path, revision: Option<&str>) -> Result<Option<Annotation>> {
        let Some(repo) = self.get_repository(file) else {
            return Ok(None);
        };
        let repo = repo.as_ref();
        if !repo.is_working() || !repo.file_has_annotation(file) {
            return Ok(None);
        }

        let history = match self.get_history(file, false, true) {
            Ok(h) => h,
            Err(e) => {
                warn!(file = %file.display(), error = %e, "Cannot get history for annotation");
                None
            }
        };
        let latest = history
            .as_ref()
            .and_then(|h| h.latest_revision())
            .map(str::to_string);
        let for_latest = match revision {
            None => true,
            Some(rev) => latest.as_deref() == Some(rev),
        };

        let annotation_cache = self
            .annotation_cache
            .as_ref()
            .filter(|_| repo.info().annotation_cache_enabled && for_latest);
        if let Some(cache) = annotation_cache {
            match cache.get(file, latest.as_deref()) {
                Ok(Some(annotation)) => {
                    debug!(file = %file.display(), "Annotation served from cache");
                    return Ok(Some(annotation));
                }
                Ok(None) => {}
                Err(e) => warn!(file = %file.display(), error = %e, "Annotation cache read failed"),
            }
        }

        if !self.live_query_allowed(repo, true) {
            return Ok(None);
        }
        let Some(mut annotation) = repo.annotate(file, revision)? else {
            return Ok(None);
        };
        if let Some(history) = &history {
            complete_annotation(repo, &mut annotation, history);
        }
        if revision.is_none() {
            annotation.revision = latest.clone();
        }

        if let Some(cache) = annotation_cache {
            if annotation.revision.is_some() {
                if let Err(e) = cache.store(file, &annotation) {
                    warn!(file = %file.display(), error = %e, "Cannot store annotation");
                }
            }
        }
        Ok(Some(annotation))
    }

    /// Write the contents of `file` at `revision` to `sink`. Returns false when
    /// no repository owns the file or the file does not exist at that revision.
    pub fn get_revision(&self, sink: &mut dyn Write, file: &Path, revision: &str) -> Result<bool> {
        let Some(repo) = self.get_repository(file) else {
            return Ok(false);
        };
        let (Some(parent), Some(basename)) = (file.parent(), file.file_name()) else {
            return Err(HistoryError::Usage(format!("{} has no file name", file.display())));
        };
        repo.history_get(sink, parent, &basename.to_string_lossy(), revision)
    }

    // ─── Bulk population ────────────────────────────────────────────

    /// Populate the history cache of every given repository, in parallel.
    /// Each repository resumes from its latest cached revision.
    pub fn create_cache(
        &self,
        repos: &[Arc<dyn Repository>],
    ) -> Vec<(Arc<dyn Repository>, Result<Option<StoreSummary>>)> {
        let start = Instant::now();
        let results = run_parallel(repos.to_vec(), self.config.history_threads(), |repo| {
            let result = self.create_cache_for_repository(repo.as_ref());
            (repo, result)
        });
        info!(
            repositories = repos.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "History cache population finished"
        );
        results
    }

    /// Populate the history cache of one repository. `Ok(None)` when the
    /// repository is not cacheable.
    pub fn create_cache_for_repository(&self, repo: &dyn Repository) -> Result<Option<StoreSummary>> {
        let Some(cache) = self.cache_for(repo) else {
            debug!(repo = %repo.directory().display(), "Repository does not support history cache");
            return Ok(None);
        };
        if !repo.info().history_enabled || !repo.is_working() {
            return Ok(None);
        }

        let dir = repo.directory().to_path_buf();
        let since = cache.get_latest_cached_revision(repo).unwrap_or_else(|e| {
            warn!(repo = %dir.display(), error = %e, "Cannot read latest cached revision");
            None
        });

        if let Some(since) = since.as_deref() {
            match repo.history(&dir, Some(since), None) {
                Ok(history) => {
                    let summary = cache.store(&history, repo, Some(since), None)?;
                    debug!(
                        repo = %dir.display(),
                        since,
                        files = summary.files,
                        renamed = summary.renamed,
                        failed = summary.failed,
                        "Updated history cache"
                    );
                    return Ok(Some(summary));
                }
                Err(e) => {
                    warn!(
                        repo = %dir.display(),
                        since,
                        error = %e,
                        "Incremental history fetch failed, rebuilding cache"
                    );
                    cache.clear(repo)?;
                }
            }
        }

        let history = repo.history(&dir, None, None)?;
        let summary = cache.store(&history, repo, None, None)?;
        debug!(
            repo = %dir.display(),
            files = summary.files,
            renamed = summary.renamed,
            failed = summary.failed,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Created history cache"
        );
        Ok(Some(summary))
    }

    // ─── Cache maintenance ──────────────────────────────────────────

    /// Clear the history and annotation caches of the repositories rooted at
    /// `roots`. Returns the roots whose cache was cleared.
    pub fn clear_cache(&self, roots: &[PathBuf]) -> Vec<PathBuf> {
        let mut cleared = Vec::new();
        for root in roots {
            let Some(repo) = self.registry.repository_at(root) else {
                warn!(root = %root.display(), "Not a known repository");
                continue;
            };
            if self.clear_repository_cache(repo.as_ref()) {
                cleared.push(repo.directory().to_path_buf());
            }
        }
        cleared
    }

    fn clear_repository_cache(&self, repo: &dyn Repository) -> bool {
        let mut ok = true;
        if let Some(cache) = &self.history_cache {
            if let Err(e) = cache.clear(repo) {
                warn!(repo = %repo.directory().display(), error = %e, "Cannot clear history cache");
                ok = false;
            }
        }
        if let Some(cache) = &self.annotation_cache {
            let nested: Vec<PathBuf> = self
                .registry
                .repositories()
                .iter()
                .map(|r| r.directory().to_path_buf())
                .filter(|d| d != repo.directory() && d.starts_with(repo.directory()))
                .collect();
            if let Err(e) = cache.clear(repo, &nested) {
                warn!(repo = %repo.directory().display(), error = %e, "Cannot clear annotation cache");
                ok = false;
            }
        }
        ok
    }

    /// Remove the cached history and annotation of one file.
    pub fn clear_cache_file(&self, file: &Path) -> Result<()> {
        if let Some(cache) = &self.history_cache {
            cache.clear_file(file)?;
        }
        if let Some(cache) = &self.annotation_cache {
            cache.clear_file(file)?;
        }
        Ok(())
    }

    /// Clear the caches of the given repositories and forget the repositories.
    pub fn remove_cache(&self, roots: &[PathBuf]) -> Vec<PathBuf> {
        let cleared = self.clear_cache(roots);
        self.registry.remove_repositories(&cleared);
        cleared
    }

    pub fn get_latest_cached_revision(&self, repo: &dyn Repository) -> Result<Option<String>> {
        match &self.history_cache {
            Some(cache) => cache.get_latest_cached_revision(repo),
            None => Ok(None),
        }
    }

    // ─── Repositories ───────────────────────────────────────────────

    /// Descriptors of every known repository, sorted by root.
    pub fn get_repositories(&self) -> Vec<RepositoryInfo> {
        self.registry
            .repositories()
            .iter()
            .map(|r| r.info().clone())
            .collect()
    }

    /// Latest cached revision of every known repository, keyed by relative root.
    pub fn cache_markers(&self) -> HashMap<String, Option<String>> {
        self.registry
            .repositories()
            .iter()
            .map(|r| {
                let marker = self.get_latest_cached_revision(r.as_ref()).unwrap_or(None);
                (r.info().directory_relative.clone(), marker)
            })
            .collect()
    }

    pub fn add_repositories(&self, dirs: &[PathBuf], kind: CommandTimeoutType) -> Vec<Arc<dyn Repository>> {
        self.registry.add_repositories(dirs, kind)
    }

    pub fn invalidate_repositories(&self, roots: &[PathBuf], kind: CommandTimeoutType) -> Vec<Arc<dyn Repository>> {
        self.registry.invalidate_repositories(roots, kind)
    }

    pub fn remove_repositories(&self, roots: &[PathBuf]) -> Vec<Arc<dyn Repository>> {
        self.registry.remove_repositories(roots)
    }
}

/// Fill in descriptions and file versions from the file's history, and
/// disable lines whose revision is not part of it.
fn complete_annotation(repo: &dyn Repository, annotation: &mut Annotation, history: &History) {
    let present: HashSet<String> = annotation
        .revisions()
        .into_iter()
        .map(str::to_string)
        .collect();

    // Newest first; the oldest matched revision gets version 1.
    let matched: Vec<(String, &HistoryEntry)> = history
        .entries()
        .iter()
        .map(|e| (repo.revision_for_annotate(&e.revision), e))
        .filter(|(rev, _)| present.contains(rev))
        .collect();
    let total = matched.len();
    for (idx, (rev, entry)) in matched.iter().enumerate() {
        let mut desc = format!(
            "changeset: {}\nauthor: {}\ndate: {}\n",
            entry.revision, entry.author, entry.date
        );
        if let Some(tags) = entry.tags_display() {
            desc.push_str(&format!("tags: {}\n", tags));
        }
        desc.push_str(&entry.message);
        annotation.add_desc(rev, desc);
        annotation.add_file_version(rev, total - idx);
    }
    let known: HashSet<&str> = matched.iter().map(|(rev, _)| rev.as_str()).collect();
    annotation.set_enabled(|rev| known.contains(rev));
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
