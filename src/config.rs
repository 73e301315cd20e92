//! Runtime configuration: global toggles, per-repository overrides, timeouts
//! and parallelism levels. Loaded from a JSON file; every field has a default.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HistoryError, Result};
use crate::exec::CommandTimeoutType;

/// Policy for live queries against repositories whose history lives on a remote server.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteScm {
    /// Always allowed.
    On,
    /// Never allowed; only cached history is served.
    #[default]
    Off,
    /// Allowed for interactive (UI) requests only.
    UiOnly,
    /// Allowed when the repository can produce whole-directory history.
    DirBased,
}

impl RemoteScm {
    /// Whether a live query may reach a remote repository.
    pub fn allows_live_query(self, ui: bool, has_history_for_directories: bool) -> bool {
        match self {
            RemoteScm::On => true,
            RemoteScm::UiOnly => ui,
            RemoteScm::DirBased => has_history_for_directories,
            RemoteScm::Off => false,
        }
    }
}

/// Optional per-repository overrides of the global toggles.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryOverrides {
    pub handle_renamed_files: Option<bool>,
    pub history_enabled: Option<bool>,
    pub annotation_cache_enabled: Option<bool>,
    pub merge_commits_enabled: Option<bool>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Root of the source tree; cache paths mirror paths relative to it.
    pub source_root: PathBuf,
    /// Root of the cache tree.
    pub data_root: PathBuf,

    pub history_enabled: bool,
    pub history_cache_enabled: bool,
    pub annotation_cache_enabled: bool,
    pub handle_renamed_files: bool,
    pub merge_commits_enabled: bool,
    pub tags_enabled: bool,
    pub remote_scm: RemoteScm,

    /// How many directory levels below a candidate directory are scanned for repositories.
    pub scanning_depth: usize,
    /// How many levels of repositories nested in other repositories are discovered.
    pub nesting_maximum: usize,

    pub command_timeout_secs: u64,
    pub interactive_command_timeout_secs: u64,
    /// Live file history slower than this is written back to the cache.
    pub history_reader_time_limit_ms: u64,
    /// Fetch history live for files missing from an already populated cache.
    pub fetch_history_when_not_in_cache: bool,

    /// Worker counts (0 = available parallelism).
    pub history_parallelism: usize,
    pub history_renamed_parallelism: usize,
    pub repository_invalidation_parallelism: usize,

    /// Variant names (e.g. "git") that are never selected.
    pub disabled_repositories: Vec<String>,
    /// Variant name -> client binary override.
    pub repo_commands: HashMap<String, String>,
    /// Gitignore-style name patterns rejected by the path-acceptance policy.
    pub ignored_names: Vec<String>,
    /// Overrides keyed by the repository root relative to `source_root`.
    pub repositories: HashMap<String, RepositoryOverrides>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            source_root: PathBuf::from("."),
            data_root: default_data_root(),
            history_enabled: true,
            history_cache_enabled: true,
            annotation_cache_enabled: false,
            handle_renamed_files: false,
            merge_commits_enabled: false,
            tags_enabled: false,
            remote_scm: RemoteScm::Off,
            scanning_depth: 2,
            nesting_maximum: 1,
            command_timeout_secs: 600,
            interactive_command_timeout_secs: 30,
            history_reader_time_limit_ms: 30_000,
            fetch_history_when_not_in_cache: true,
            history_parallelism: 0,
            history_renamed_parallelism: 0,
            repository_invalidation_parallelism: 0,
            disabled_repositories: Vec::new(),
            repo_commands: HashMap::new(),
            ignored_names: Vec::new(),
            repositories: HashMap::new(),
        }
    }
}

/// Default cache root: `<local data dir>/repohist`.
pub fn default_data_root() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join("repohist")
}

fn available_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl Configuration {
    /// Load configuration from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            HistoryError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Configuration = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.command_timeout_secs == 0 || self.interactive_command_timeout_secs == 0 {
            return Err(HistoryError::Config(
                "command timeouts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Canonical source root (falls back to the normalized absolute path).
    pub fn source_root(&self) -> PathBuf {
        crate::canonical_or_absolute(&self.source_root)
    }

    /// Path of `path` relative to the source root, with forward slashes and a leading `/`.
    pub fn path_relative_to_source_root(&self, path: &Path) -> Result<String> {
        let root = self.source_root();
        match crate::relative_to(&root, path) {
            Some(rel) if rel.is_empty() => Ok("/".to_string()),
            Some(rel) => Ok(format!("/{}", rel)),
            None => Err(HistoryError::OutsideSourceRoot {
                path: path.display().to_string(),
                root: root.display().to_string(),
            }),
        }
    }

    pub fn command_timeout(&self, kind: CommandTimeoutType) -> Duration {
        match kind {
            CommandTimeoutType::Indexer => Duration::from_secs(self.command_timeout_secs),
            CommandTimeoutType::Interactive => {
                Duration::from_secs(self.interactive_command_timeout_secs)
            }
        }
    }

    pub fn history_reader_time_limit(&self) -> Duration {
        Duration::from_millis(self.history_reader_time_limit_ms)
    }

    pub fn history_threads(&self) -> usize {
        non_zero_or_auto(self.history_parallelism)
    }

    pub fn renamed_history_threads(&self) -> usize {
        non_zero_or_auto(self.history_renamed_parallelism)
    }

    /// Probe parallelism: full width when indexing, a quarter of it on interactive paths.
    pub fn invalidation_threads(&self, kind: CommandTimeoutType) -> usize {
        let full = non_zero_or_auto(self.repository_invalidation_parallelism);
        match kind {
            CommandTimeoutType::Indexer => full,
            CommandTimeoutType::Interactive => (full / 4).max(1),
        }
    }

    pub fn is_repository_type_disabled(&self, name: &str) -> bool {
        self.disabled_repositories
            .iter()
            .any(|d| d.eq_ignore_ascii_case(name))
    }

    /// Client binary for a variant, honoring `repo_commands` overrides.
    pub fn repo_command(&self, name: &str, default: &str) -> String {
        self.repo_commands
            .get(name)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    pub fn overrides_for(&self, relative_root: &str) -> Option<&RepositoryOverrides> {
        self.repositories.get(relative_root).or_else(|| {
            self.repositories
                .get(relative_root.trim_start_matches('/'))
        })
    }
}

fn non_zero_or_auto(n: usize) -> usize {
    if n == 0 { available_threads() } else { n }
}
