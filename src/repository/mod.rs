//! Repository capability contract and the state shared by every VCS variant.
//!
//! Each variant is one concrete type implementing [`Repository`]; behavior common
//! to all variants lives in free functions ([`remove_and_verify_oldest_changeset`],
//! [`crate::history::tags::assign_tags`]) rather than in a base type.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::Configuration;
use crate::error::{HistoryError, Result};
use crate::exec::{CommandTimeoutType, Executor};
use crate::history::annotation::Annotation;
use crate::history::tags::{self, TagList};
use crate::history::History;

pub mod factory;
pub mod git;
pub mod log;
pub mod mercurial;

/// Descriptor of a discovered repository. Filled in by the factory and never
/// partially updated afterwards; revalidation builds a new one.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryInfo {
    /// Variant name ("git", "mercurial", ...).
    pub kind: String,
    /// Canonical absolute root directory.
    pub directory: PathBuf,
    /// Root relative to the source root (`/proj/vendor`).
    pub directory_relative: String,
    pub parent: Option<String>,
    pub branch: Option<String>,
    pub current_version: Option<String>,
    pub working: bool,
    pub remote: bool,
    pub handle_renamed_files: bool,
    pub history_enabled: bool,
    pub annotation_cache_enabled: bool,
    pub merge_commits_enabled: bool,
    pub supports_sub_repositories: bool,
    pub nestable: bool,
    pub history_for_directories: bool,
    pub file_based_tags: bool,
}

/// State every variant carries: its descriptor, client binary, timeouts,
/// the memoized working flag and the tag list.
#[derive(Debug)]
pub struct RepositoryBase {
    pub info: RepositoryInfo,
    command: String,
    indexer_timeout: Duration,
    interactive_timeout: Duration,
    working: OnceLock<bool>,
    tags: RwLock<Option<Arc<TagList>>>,
}

impl RepositoryBase {
    pub fn new(kind: &str, directory: &Path, command: String, config: &Configuration) -> Self {
        let directory = crate::canonical_or_absolute(directory);
        let directory_relative = config
            .path_relative_to_source_root(&directory)
            .unwrap_or_else(|_| crate::path_key(&directory));
        Self {
            info: RepositoryInfo {
                kind: kind.to_string(),
                directory,
                directory_relative,
                history_enabled: config.history_enabled,
                handle_renamed_files: config.handle_renamed_files,
                annotation_cache_enabled: config.annotation_cache_enabled,
                merge_commits_enabled: config.merge_commits_enabled,
                ..Default::default()
            },
            command,
            indexer_timeout: config.command_timeout(CommandTimeoutType::Indexer),
            interactive_timeout: config.command_timeout(CommandTimeoutType::Interactive),
            working: OnceLock::new(),
            tags: RwLock::new(None),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Executor for the client binary, running in the repository root.
    pub fn executor(&self, kind: CommandTimeoutType) -> Executor {
        let timeout = match kind {
            CommandTimeoutType::Indexer => self.indexer_timeout,
            CommandTimeoutType::Interactive => self.interactive_timeout,
        };
        Executor::new(&self.command, &self.info.directory, timeout)
    }
}

/// The capability contract every VCS variant implements.
pub trait Repository: Send + Sync {
    fn base(&self) -> &RepositoryBase;
    fn base_mut(&mut self) -> &mut RepositoryBase;

    /// Run the client once to see whether it is usable at all.
    fn check_working(&self) -> bool;

    fn supports_sub_repositories(&self) -> bool {
        false
    }

    fn is_nestable(&self) -> bool {
        false
    }

    /// Whether a whole-directory log can be produced in one call.
    fn has_history_for_directories(&self) -> bool {
        false
    }

    /// Whether tags must be precomputed as a repository-wide list before
    /// they can be assigned to changesets.
    fn has_file_based_tags(&self) -> bool {
        false
    }

    /// Whether `history` accepts a `till` revision.
    fn supports_per_partes(&self) -> bool {
        false
    }

    /// History of `file` (a file or directory inside the repository), newest first.
    ///
    /// With `since`, only changesets strictly newer than `since` are returned;
    /// a `since` revision unknown to the repository is a [`HistoryError::Consistency`].
    fn history(&self, file: &Path, since: Option<&str>, till: Option<&str>) -> Result<History>;

    /// Per-line blame of `file` at `revision` (latest when `None`).
    fn annotate(&self, file: &Path, revision: Option<&str>) -> Result<Option<Annotation>>;

    /// Write the contents of `parent/basename` at `revision` to `sink`.
    /// Returns false when the file does not exist at that revision.
    fn history_get(
        &self,
        sink: &mut dyn Write,
        parent: &Path,
        basename: &str,
        revision: &str,
    ) -> Result<bool>;

    fn file_has_history(&self, _file: &Path) -> bool {
        true
    }

    fn file_has_annotation(&self, file: &Path) -> bool {
        file.is_file()
    }

    /// Revision form used by `annotate` output, for matching against history.
    fn revision_for_annotate(&self, revision: &str) -> String {
        revision.to_string()
    }

    fn determine_parent(&self, _kind: CommandTimeoutType) -> Result<Option<String>> {
        Ok(None)
    }

    fn determine_branch(&self, _kind: CommandTimeoutType) -> Result<Option<String>> {
        Ok(None)
    }

    fn determine_current_version(&self, _kind: CommandTimeoutType) -> Result<Option<String>> {
        Ok(None)
    }

    fn build_tag_list(&self, _kind: CommandTimeoutType) -> Result<Option<TagList>> {
        Ok(None)
    }

    // ─── Provided ───────────────────────────────────────────────────

    fn info(&self) -> &RepositoryInfo {
        &self.base().info
    }

    fn directory(&self) -> &Path {
        &self.base().info.directory
    }

    /// Memoized [`Repository::check_working`]; computed at most once per instance.
    fn is_working(&self) -> bool {
        *self.base().working.get_or_init(|| self.check_working())
    }

    fn is_remote(&self) -> bool {
        self.base().info.remote
    }

    fn tag_list(&self) -> Option<Arc<TagList>> {
        self.base()
            .tags
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn set_tag_list(&self, tags: Option<TagList>) {
        *self.base().tags.write().unwrap_or_else(|e| e.into_inner()) = tags.map(Arc::new);
    }

    fn assign_tags_in_history(&self, history: &mut History) -> Result<()> {
        tags::assign_tags(self.tag_list().as_deref(), history)
    }

    /// Path of `file` relative to the repository root, forward slashes.
    fn repo_relative_path(&self, file: &Path) -> Result<String> {
        crate::relative_to(self.directory(), file).ok_or_else(|| {
            HistoryError::Usage(format!(
                "{} is not inside repository {}",
                file.display(),
                self.directory().display()
            ))
        })
    }
}

impl std::fmt::Debug for dyn Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("kind", &self.info().kind)
            .field("directory", &self.info().directory)
            .finish()
    }
}

/// For fetches that include the `since` boundary changeset as their oldest
/// entry: drop it, failing if it is missing or is a different revision.
pub fn remove_and_verify_oldest_changeset(history: &mut History, since: &str) -> Result<()> {
    let matches = history
        .entries()
        .last()
        .map(|e| e.revision == since)
        .unwrap_or(false);
    if !matches {
        return Err(HistoryError::Consistency(format!(
            "Cached revision '{}' not found in the repository",
            since
        )));
    }
    history.entries_mut().pop();
    Ok(())
}

/// Cut a full history down to the changesets newer than `since` (and not newer
/// than `till`), for variants that can only produce the full list.
pub fn slice_history(history: History, since: Option<&str>, till: Option<&str>) -> Result<History> {
    let renamed = history.renamed_files().clone();
    let mut entries = history.into_entries();

    if let Some(till) = till {
        let pos = entries
            .iter()
            .position(|e| e.revision == till)
            .ok_or_else(|| HistoryError::Consistency(format!("Revision '{}' not found in the repository", till)))?;
        entries.drain(..pos);
    }
    let mut sliced = match since {
        Some(since) => {
            let end = entries
                .iter()
                .position(|e| e.revision == since)
                .map(|p| p + 1)
                .unwrap_or(entries.len());
            entries.truncate(end);
            let mut h = History::new(entries);
            remove_and_verify_oldest_changeset(&mut h, since)?;
            h
        }
        None => History::new(entries),
    };
    sliced = sliced.with_renamed_files(renamed);
    Ok(sliced)
}
