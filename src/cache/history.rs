//! Per-file history cache with incremental, crash-safe bulk population.
//!
//! Layout below `<data_root>/historycache`, mirroring the source tree:
//!
//! ```text
//! proj/                   repository root (mirrored)
//!   __latest_rev          newest revision covered by the cache (plain text)
//!   __dir_history.hist    history of the repository root, without tags
//!   src/main.c.hist       changesets touching src/main.c, newest first
//!   src/main.c.tags       revision -> tag names for those changesets
//! ```
//!
//! The marker is written only after every record of a population pass has been
//! stored, and removed before anything else when a repository's cache is cleared.
//! "Marker present" therefore implies "every file is cached as of that revision".

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::accept::PathAccepter;
use crate::cache::storage::{self, is_fresh, load_record, remove_if_exists, remove_tree, save_record, write_atomic};
use crate::cache::{mirrored_dir, record_path, HISTORY_CACHE_DIR};
use crate::config::Configuration;
use crate::error::{HistoryError, Result};
use crate::history::{History, HistoryEntry};
use crate::pool;
use crate::repository::Repository;

pub const HISTORY_SUFFIX: &str = ".hist";
pub const TAGS_SUFFIX: &str = ".tags";
pub const LATEST_REVISION_MARKER: &str = "__latest_rev";
pub const DIRECTORY_HISTORY_RECORD: &str = "__dir_history.hist";

/// Revision -> tag names, stored next to a history record.
pub type TagRecord = BTreeMap<String, Vec<String>>;

/// Outcome of one bulk population pass.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StoreSummary {
    /// Regular files whose record was written.
    pub files: usize,
    /// Renamed files whose record was rebuilt from their own history.
    pub renamed: usize,
    /// Files whose record could not be written.
    pub failed: usize,
    /// Marker value written at the end of the pass, if any.
    pub latest_revision: Option<String>,
    #[serde(skip)]
    pub elapsed: Duration,
}

/// Splice a fresh fetch (`newer`, newest first) on top of a cached record.
///
/// Entries of `newer` that are already at the head of `cached` (a pass that
/// was interrupted after this file had been written) are not duplicated.
/// A revision of `newer` found deeper in `cached` means the two do not line
/// up and the merge is refused.
pub fn merge_entries(newer: Vec<HistoryEntry>, cached: Vec<HistoryEntry>) -> Result<Vec<HistoryEntry>> {
    let fresh: HashSet<&str> = newer.iter().map(|e| e.revision.as_str()).collect();
    let overlap = cached
        .iter()
        .take_while(|e| fresh.contains(e.revision.as_str()))
        .count();
    if let Some(stray) = cached[overlap..].iter().find(|e| fresh.contains(e.revision.as_str())) {
        return Err(HistoryError::Consistency(format!(
            "Revision '{}' is already cached below newer changesets",
            stray.revision
        )));
    }
    let mut merged = newer;
    merged.extend(cached.into_iter().skip(overlap));
    Ok(merged)
}

pub struct FileHistoryCache {
    config: Arc<Configuration>,
    root: PathBuf,
}

impl FileHistoryCache {
    pub fn new(config: Arc<Configuration>) -> Self {
        let root = config.data_root.join(HISTORY_CACHE_DIR);
        Self { config, root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn initialize(&self) -> Result<()> {
        storage::ensure_dir(&self.root)
    }

    /// Bulk population needs a whole-directory log.
    pub fn supports_repository(&self, repo: &dyn Repository) -> bool {
        repo.has_history_for_directories()
    }

    // ─── Paths ──────────────────────────────────────────────────────

    fn repository_dir(&self, repo: &dyn Repository) -> Result<PathBuf> {
        mirrored_dir(&self.root, &self.config, repo.directory())
    }

    fn history_path(&self, file: &Path) -> Result<PathBuf> {
        record_path(&self.root, &self.config, file, HISTORY_SUFFIX)
    }

    fn tags_path(&self, file: &Path) -> Result<PathBuf> {
        record_path(&self.root, &self.config, file, TAGS_SUFFIX)
    }

    fn marker_path(&self, repo: &dyn Repository) -> Result<PathBuf> {
        Ok(self.repository_dir(repo)?.join(LATEST_REVISION_MARKER))
    }

    fn directory_record_path(&self, repo: &dyn Repository) -> Result<PathBuf> {
        Ok(self.repository_dir(repo)?.join(DIRECTORY_HISTORY_RECORD))
    }

    fn is_repository_root(file: &Path, repo: &dyn Repository) -> bool {
        crate::canonical_or_absolute(file) == repo.directory()
    }

    // ─── Bulk population ────────────────────────────────────────────

    /// Store the per-file histories contained in `history` (a whole-repository
    /// log, newest first) and then the latest-revision marker.
    ///
    /// With `since`, `history` holds only changesets newer than `since` and is
    /// merged on top of the existing records; a record that cannot be read is
    /// rebuilt from the file's own complete history instead. Renamed files are
    /// always rebuilt that way (up to `till`). A failure for one file is logged
    /// and counted; the marker is only written when every file succeeded.
    pub fn store(
        &self,
        history: &History,
        repo: &dyn Repository,
        since: Option<&str>,
        till: Option<&str>,
    ) -> Result<StoreSummary> {
        let start = Instant::now();
        let repo_dir = repo.directory().to_path_buf();
        let accepter = PathAccepter::new(&repo_dir, &self.config.ignored_names);
        let merge = since.is_some();
        let handle_renamed = repo.info().handle_renamed_files;

        let by_file = history.by_file(|rel| accepter.accept(&repo_dir.join(rel)));
        let mut regular: Vec<(String, Vec<HistoryEntry>)> = Vec::new();
        let mut renamed: Vec<String> = Vec::new();
        for (rel, entries) in by_file {
            if handle_renamed && history.is_renamed(&rel) {
                renamed.push(rel);
            } else {
                regular.push((rel, entries));
            }
        }
        debug!(
            repo = %repo_dir.display(),
            regular = regular.len(),
            renamed = renamed.len(),
            incremental = merge,
            "Storing history"
        );

        let attempted = regular.len() + renamed.len();
        let regular_results = pool::run_parallel(regular, self.config.history_threads(), |(rel, entries)| {
            let file = repo_dir.join(&rel);
            self.store_entries(entries, &file, repo, merge, till).map_err(|e| {
                warn!(file = %file.display(), error = %e, "Failed to store history");
            })
        });

        let renamed_results = pool::run_parallel(renamed, self.config.renamed_history_threads(), |rel| {
            let file = repo_dir.join(&rel);
            let stored = repo.history(&file, None, till).and_then(|mut h| {
                h.strip();
                self.store_entries(h.into_entries(), &file, repo, false, till)
            });
            stored.map_err(|e| {
                warn!(file = %file.display(), error = %e, "Failed to store history of renamed file");
            })
        });

        let files = regular_results.iter().filter(|r| r.is_ok()).count();
        let renamed = renamed_results.iter().filter(|r| r.is_ok()).count();
        // Panicked items leave no result at all.
        let mut summary = StoreSummary {
            files,
            renamed,
            failed: attempted - files - renamed,
            ..Default::default()
        };

        // File lists stay so that the root can be served with them.
        let mut root_history = history.clone();
        root_history.strip_tags();
        if let Err(e) = self.store_directory_history(root_history, repo, merge, till) {
            warn!(repo = %repo_dir.display(), error = %e, "Failed to store directory history");
            summary.failed += 1;
        }

        // Join point passed: every record of this pass is on disk.
        if summary.failed == 0 {
            if let Some(latest) = history.latest_revision() {
                self.store_latest_cached_revision(repo, latest)?;
                summary.latest_revision = Some(latest.to_string());
            }
        } else {
            warn!(
                repo = %repo_dir.display(),
                failed = summary.failed,
                "Not updating latest cached revision after failures"
            );
        }

        summary.elapsed = start.elapsed();
        info!(
            repo = %repo_dir.display(),
            files = summary.files,
            renamed = summary.renamed,
            failed = summary.failed,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "History cache populated"
        );
        Ok(summary)
    }

    /// Store one file's history as a full overwrite (used for live results
    /// that were slow to obtain).
    pub fn store_file(&self, history: &History, file: &Path, repo: &dyn Repository) -> Result<()> {
        let mut h = history.clone();
        h.strip();
        self.store_entries(h.into_entries(), file, repo, false, None)
    }

    fn store_entries(
        &self,
        entries: Vec<HistoryEntry>,
        file: &Path,
        repo: &dyn Repository,
        merge: bool,
        till: Option<&str>,
    ) -> Result<()> {
        let path = self.history_path(file)?;
        let file_based_tags =
            self.config.tags_enabled && repo.has_file_based_tags() && repo.tag_list().is_some();

        let mut history = if merge {
            match self.load_with_tags(&path, file) {
                Ok(Some(cached)) => History::new(merge_entries(entries, cached.into_entries())?),
                Ok(None) => History::new(entries),
                Err(e) => {
                    warn!(file = %file.display(), error = %e, "Cached history unreadable, refetching");
                    let mut full = repo.history(file, None, till)?;
                    full.strip();
                    full
                }
            }
        } else {
            History::new(entries)
        };

        if file_based_tags {
            // New tags can point at old revisions, so reassign over the whole list.
            history.strip_tags();
            repo.assign_tags_in_history(&mut history)?;
        }
        self.write_history(&path, file, history.into_entries())
    }

    fn write_history(&self, path: &Path, file: &Path, mut entries: Vec<HistoryEntry>) -> Result<()> {
        let mut tags = TagRecord::new();
        for e in &mut entries {
            if !e.tags.is_empty() {
                tags.insert(e.revision.clone(), std::mem::take(&mut e.tags));
            }
        }
        save_record(path, &entries)?;

        let tags_path = self.tags_path(file)?;
        if tags.is_empty() {
            remove_if_exists(&tags_path)?;
        } else {
            save_record(&tags_path, &tags)?;
        }
        Ok(())
    }

    fn store_directory_history(
        &self,
        history: History,
        repo: &dyn Repository,
        merge: bool,
        till: Option<&str>,
    ) -> Result<()> {
        let path = self.directory_record_path(repo)?;
        let entries = if merge {
            match load_record::<Vec<HistoryEntry>>(&path) {
                Ok(Some(cached)) => merge_entries(history.into_entries(), cached)?,
                Ok(None) => history.into_entries(),
                Err(e) => {
                    warn!(repo = %repo.directory().display(), error = %e, "Directory record unreadable, refetching");
                    let mut full = repo.history(repo.directory(), None, till)?;
                    full.strip_tags();
                    full.into_entries()
                }
            }
        } else {
            history.into_entries()
        };
        save_record(&path, &entries)
    }

    // ─── Retrieval ──────────────────────────────────────────────────

    fn load_with_tags(&self, path: &Path, file: &Path) -> Result<Option<History>> {
        let Some(mut entries) = load_record::<Vec<HistoryEntry>>(path)? else {
            return Ok(None);
        };
        if let Some(tags) = self.get_tags(file)? {
            for e in &mut entries {
                if let Some(t) = tags.get(&e.revision) {
                    e.add_tags(t);
                }
            }
        }
        Ok(Some(History::new(entries)))
    }

    /// Cached history of `file`, or `None` on a miss (no record, or a record
    /// older than the file). The repository root itself is served from the
    /// directory history record.
    pub fn get(&self, file: &Path, repo: &dyn Repository) -> Result<Option<History>> {
        if Self::is_repository_root(file, repo) {
            return self.get_directory_history(repo);
        }
        if file.is_dir() {
            return Ok(None);
        }
        let path = self.history_path(file)?;
        if !is_fresh(&path, file) {
            debug!(file = %file.display(), "History cache miss");
            return Ok(None);
        }
        self.load_with_tags(&path, file)
    }

    /// Tag record of `file`, loadable without the changesets.
    pub fn get_tags(&self, file: &Path) -> Result<Option<TagRecord>> {
        load_record(&self.tags_path(file)?)
    }

    pub fn get_directory_history(&self, repo: &dyn Repository) -> Result<Option<History>> {
        let path = self.directory_record_path(repo)?;
        Ok(load_record::<Vec<HistoryEntry>>(&path)?.map(History::new))
    }

    pub fn has_cache_for_file(&self, file: &Path) -> bool {
        self.history_path(file).map(|p| p.is_file()).unwrap_or(false)
    }

    pub fn has_cache_for_directory(&self, dir: &Path, repo: &dyn Repository) -> bool {
        if Self::is_repository_root(dir, repo) {
            return self
                .directory_record_path(repo)
                .map(|p| p.is_file())
                .unwrap_or(false);
        }
        mirrored_dir(&self.root, &self.config, dir)
            .map(|p| p.is_dir())
            .unwrap_or(false)
    }

    // ─── Latest cached revision ─────────────────────────────────────

    pub fn get_latest_cached_revision(&self, repo: &dyn Repository) -> Result<Option<String>> {
        let path = self.marker_path(repo)?;
        match fs::read_to_string(&path) {
            Ok(s) => {
                let rev = s.trim().to_string();
                Ok(if rev.is_empty() { None } else { Some(rev) })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(HistoryError::cache(&path, format!("cannot read marker: {}", e))),
        }
    }

    pub fn store_latest_cached_revision(&self, repo: &dyn Repository, revision: &str) -> Result<()> {
        let path = self.marker_path(repo)?;
        write_atomic(&path, format!("{}\n", revision).as_bytes())?;
        debug!(repo = %repo.directory().display(), revision, "Stored latest cached revision");
        Ok(())
    }

    /// Whether a population pass has completed for `repo` at least once.
    pub fn is_history_index_done(&self, repo: &dyn Repository) -> bool {
        self.marker_path(repo).map(|p| p.is_file()).unwrap_or(false)
    }

    // ─── Clearing ───────────────────────────────────────────────────

    /// Remove the cache of `repo`: the marker first, then its records.
    /// Subtrees that belong to nested repositories are left alone.
    pub fn clear(&self, repo: &dyn Repository) -> Result<()> {
        remove_if_exists(&self.marker_path(repo)?)?;
        let dir = self.repository_dir(repo)?;
        remove_tree(&dir, &is_repository_cache)?;
        info!(repo = %repo.directory().display(), "Cleared history cache");
        Ok(())
    }

    /// Remove the record (and tag record) of one file.
    pub fn clear_file(&self, file: &Path) -> Result<()> {
        let path = self.history_path(file)?;
        remove_if_exists(&path)?;
        remove_if_exists(&self.tags_path(file)?)?;
        if let Some(parent) = path.parent() {
            if parent != self.root {
                // Only succeeds when empty.
                let _ = fs::remove_dir(parent);
            }
        }
        Ok(())
    }
}

/// Whether `dir` holds another repository's marker or directory record.
fn is_repository_cache(dir: &Path) -> bool {
    dir.join(LATEST_REVISION_MARKER).exists() || dir.join(DIRECTORY_HISTORY_RECORD).exists()
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod tests;
