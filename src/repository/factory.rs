//! Repository detection: probes an ordered list of variants for a directory and
//! returns a fully initialized repository.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::Configuration;
use crate::error::{HistoryError, Result};
use crate::exec::CommandTimeoutType;
use crate::repository::git::GitVariant;
use crate::repository::mercurial::MercurialVariant;
use crate::repository::Repository;

/// Metadata names of the shipped variants; never offered to discovery or caching.
pub const VARIANT_METADATA_NAMES: &[&str] = &[
    ".git",
    ".gitignore",
    ".gitattributes",
    ".gitmodules",
    ".hg",
    ".hgignore",
    ".hgtags",
    ".hgsub",
    ".hgsubstate",
];

/// One VCS variant: how to recognize its working copies and how to build a
/// repository object for one.
pub trait RepositoryVariant: Send + Sync {
    /// Name used in configuration (`disabled_repositories`, `repo_commands`).
    fn name(&self) -> &'static str;

    /// Whether a repository of this variant may live inside another repository.
    fn is_nestable(&self) -> bool;

    /// Ownership check for `dir`; cheap marker checks should not spawn processes.
    fn is_repository_for(&self, dir: &Path, kind: CommandTimeoutType) -> bool;

    fn instantiate(&self, dir: &Path, config: &Configuration) -> Box<dyn Repository>;
}

pub struct RepositoryFactory {
    variants: Vec<Box<dyn RepositoryVariant>>,
    config: Arc<Configuration>,
}

impl RepositoryFactory {
    /// Factory with the shipped variants, cheapest marker checks first.
    pub fn new(config: Arc<Configuration>) -> Self {
        Self::with_variants(
            config,
            vec![Box::new(MercurialVariant), Box::new(GitVariant)],
        )
    }

    pub fn with_variants(config: Arc<Configuration>, variants: Vec<Box<dyn RepositoryVariant>>) -> Self {
        Self { variants, config }
    }

    pub fn config(&self) -> &Arc<Configuration> {
        &self.config
    }

    pub fn variant_names(&self) -> Vec<&'static str> {
        self.variants.iter().map(|v| v.name()).collect()
    }

    /// Find the repository rooted at `dir`, if any. Probe failures are logged
    /// and reported as no repository.
    pub fn get_repository(
        &self,
        dir: &Path,
        kind: CommandTimeoutType,
        is_nested: bool,
    ) -> Option<Arc<dyn Repository>> {
        self.probe(dir, kind, is_nested).unwrap_or_else(|e| {
            warn!(error = %e, "Skipping directory");
            None
        })
    }

    /// Variants are tried in order; disabled ones, and non-nestable ones when
    /// `is_nested`, are skipped. A detected variant whose client is not usable is
    /// skipped as well, and when no other variant claims `dir` the result is a
    /// `Probe` error naming them. Failures to determine parent, branch, current
    /// version or tags are logged and leave the property unset.
    pub fn probe(
        &self,
        dir: &Path,
        kind: CommandTimeoutType,
        is_nested: bool,
    ) -> Result<Option<Arc<dyn Repository>>> {
        let mut unusable: Vec<String> = Vec::new();
        for variant in &self.variants {
            if self.config.is_repository_type_disabled(variant.name()) {
                continue;
            }
            if is_nested && !variant.is_nestable() {
                continue;
            }
            if !variant.is_repository_for(dir, kind) {
                continue;
            }

            let mut repo = variant.instantiate(dir, &self.config);
            if !repo.is_working() {
                debug!(
                    repo = %dir.display(),
                    variant = variant.name(),
                    command = repo.base().command(),
                    "Repository client is not working, skipping"
                );
                unusable.push(format!("{} ({})", variant.name(), repo.base().command()));
                continue;
            }

            self.initialize(repo.as_mut(), kind);
            info!(
                repo = %dir.display(),
                variant = variant.name(),
                nested = is_nested,
                "Discovered repository"
            );
            return Ok(Some(Arc::from(repo)));
        }
        if !unusable.is_empty() {
            return Err(HistoryError::Probe {
                dir: dir.display().to_string(),
                message: format!("client not working for {}", unusable.join(", ")),
            });
        }
        debug!(dir = %dir.display(), "No repository found");
        Ok(None)
    }

    fn initialize(&self, repo: &mut dyn Repository, kind: CommandTimeoutType) {
        let dir = repo.directory().display().to_string();

        let parent = repo.determine_parent(kind).unwrap_or_else(|e| {
            warn!(repo = %dir, error = %e, "Failed to determine parent");
            None
        });
        let branch = repo.determine_branch(kind).unwrap_or_else(|e| {
            warn!(repo = %dir, error = %e, "Failed to determine branch");
            None
        });
        let current_version = repo.determine_current_version(kind).unwrap_or_else(|e| {
            warn!(repo = %dir, error = %e, "Failed to determine current version");
            None
        });

        let overrides = self
            .config
            .overrides_for(&repo.info().directory_relative)
            .cloned()
            .unwrap_or_default();

        let working = repo.is_working();
        let supports_sub_repositories = repo.supports_sub_repositories();
        let nestable = repo.is_nestable();
        let history_for_directories = repo.has_history_for_directories();
        let file_based_tags = repo.has_file_based_tags();

        let info = &mut repo.base_mut().info;
        info.parent = parent;
        info.branch = branch;
        info.current_version = current_version;
        info.working = working;
        info.supports_sub_repositories = supports_sub_repositories;
        info.nestable = nestable;
        info.history_for_directories = history_for_directories;
        info.file_based_tags = file_based_tags;
        if let Some(v) = overrides.handle_renamed_files {
            info.handle_renamed_files = v;
        }
        if let Some(v) = overrides.history_enabled {
            info.history_enabled = v;
        }
        if let Some(v) = overrides.annotation_cache_enabled {
            info.annotation_cache_enabled = v;
        }
        if let Some(v) = overrides.merge_commits_enabled {
            info.merge_commits_enabled = v;
        }

        if self.config.tags_enabled && file_based_tags {
            match repo.build_tag_list(kind) {
                Ok(tags) => repo.set_tag_list(tags),
                Err(e) => warn!(repo = %dir, error = %e, "Failed to build tag list"),
            }
        }
    }

    /// Re-probe a previously discovered repository root.
    pub fn revalidate(&self, dir: &Path, kind: CommandTimeoutType, is_nested: bool) -> Option<Arc<dyn Repository>> {
        if !dir.is_dir() {
            warn!(repo = %dir.display(), "Repository directory no longer exists");
            return None;
        }
        self.get_repository(dir, kind, is_nested)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockVariant;

    fn factory(config: Configuration, variants: Vec<Box<dyn RepositoryVariant>>) -> RepositoryFactory {
        RepositoryFactory::with_variants(Arc::new(config), variants)
    }

    #[test]
    fn test_first_matching_variant_wins() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join(".mock")).unwrap();
        std::fs::create_dir(tmp.path().join(".other")).unwrap();
        let f = factory(
            Configuration::default(),
            vec![
                Box::new(MockVariant::new("first", ".mock")),
                Box::new(MockVariant::new("second", ".other")),
            ],
        );
        let repo = f.get_repository(tmp.path(), CommandTimeoutType::Indexer, false).unwrap();
        assert_eq!(repo.info().kind, "first");
    }

    #[test]
    fn test_disabled_variant_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join(".mock")).unwrap();
        std::fs::create_dir(tmp.path().join(".other")).unwrap();
        let config = Configuration {
            disabled_repositories: vec!["first".to_string()],
            ..Default::default()
        };
        let f = factory(
            config,
            vec![
                Box::new(MockVariant::new("first", ".mock")),
                Box::new(MockVariant::new("second", ".other")),
            ],
        );
        let repo = f.get_repository(tmp.path(), CommandTimeoutType::Indexer, false).unwrap();
        assert_eq!(repo.info().kind, "second");
    }

    #[test]
    fn test_non_nestable_variant_skipped_when_nested() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join(".mock")).unwrap();
        let f = factory(
            Configuration::default(),
            vec![Box::new(MockVariant::new("flat", ".mock").nestable(false))],
        );
        assert!(f.get_repository(tmp.path(), CommandTimeoutType::Indexer, true).is_none());
        assert!(f.get_repository(tmp.path(), CommandTimeoutType::Indexer, false).is_some());
    }

    #[test]
    fn test_not_working_variant_is_never_selected() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join(".mock")).unwrap();
        let f = factory(
            Configuration::default(),
            vec![
                Box::new(MockVariant::new("broken", ".mock").working(false)),
                Box::new(MockVariant::new("fallback", ".mock")),
            ],
        );
        let repo = f.get_repository(tmp.path(), CommandTimeoutType::Indexer, false).unwrap();
        assert_eq!(repo.info().kind, "fallback");
    }

    #[test]
    fn test_detected_but_unusable_variant_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join(".mock")).unwrap();
        let f = factory(
            Configuration::default(),
            vec![Box::new(MockVariant::new("broken", ".mock").working(false))],
        );
        let err = f.probe(tmp.path(), CommandTimeoutType::Indexer, false).unwrap_err();
        assert!(matches!(err, HistoryError::Probe { .. }));
        assert!(err.to_string().contains("broken"));
        assert!(f.get_repository(tmp.path(), CommandTimeoutType::Indexer, false).is_none());

        let plain = tempfile::tempdir().unwrap();
        assert!(f.probe(plain.path(), CommandTimeoutType::Indexer, false).unwrap().is_none());
    }

    #[test]
    fn test_secondary_property_failures_do_not_abort() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join(".mock")).unwrap();
        let f = factory(
            Configuration::default(),
            vec![Box::new(MockVariant::new("flaky", ".mock").failing_properties())],
        );
        let repo = f.get_repository(tmp.path(), CommandTimeoutType::Indexer, false).unwrap();
        assert_eq!(repo.info().parent, None);
        assert_eq!(repo.info().branch, None);
        assert_eq!(repo.info().current_version, None);
    }

    #[test]
    fn test_properties_and_overrides_are_filled() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("proj");
        std::fs::create_dir_all(root.join(".mock")).unwrap();
        let mut config = Configuration {
            source_root: tmp.path().to_path_buf(),
            ..Default::default()
        };
        config.repositories.insert(
            "/proj".to_string(),
            crate::config::RepositoryOverrides {
                handle_renamed_files: Some(true),
                ..Default::default()
            },
        );
        let f = factory(config, vec![Box::new(MockVariant::new("mock", ".mock"))]);
        let repo = f.get_repository(&root, CommandTimeoutType::Indexer, false).unwrap();
        let info = repo.info();
        assert_eq!(info.directory_relative, "/proj");
        assert_eq!(info.parent.as_deref(), Some("https://example.com/mock"));
        assert_eq!(info.branch.as_deref(), Some("main"));
        assert!(info.handle_renamed_files);
        assert!(info.working);
        assert!(info.history_for_directories);
    }

    #[test]
    fn test_tag_list_built_when_enabled() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join(".mock")).unwrap();
        let config = Configuration {
            tags_enabled: true,
            ..Default::default()
        };
        let f = factory(config, vec![Box::new(MockVariant::new("mock", ".mock").file_based_tags())]);
        let repo = f.get_repository(tmp.path(), CommandTimeoutType::Indexer, false).unwrap();
        assert!(repo.tag_list().is_some());
    }

    #[test]
    fn test_plain_directory_has_no_repository() {
        let tmp = tempfile::tempdir().unwrap();
        let f = factory(Configuration::default(), vec![Box::new(MockVariant::new("mock", ".mock"))]);
        assert!(f.get_repository(tmp.path(), CommandTimeoutType::Indexer, false).is_none());
    }

    #[test]
    fn test_shipped_variant_order() {
        let f = RepositoryFactory::new(Arc::new(Configuration::default()));
        assert_eq!(f.variant_names(), vec!["mercurial", "git"]);
    }
}
