//! Mercurial variant. Drives the `hg` CLI through templates that render the
//! shared log format, so it reuses [`parse_log_stream`].

use std::collections::BTreeSet;
use std::io::{Cursor, Write};
use std::path::Path;

use crate::config::Configuration;
use crate::error::{HistoryError, Result};
use crate::exec::CommandTimeoutType;
use crate::history::annotation::Annotation;
use crate::history::History;
use crate::repository::factory::RepositoryVariant;
use crate::repository::log::{parse_log_stream, COMMIT_PREFIX, END_OF_MESSAGE, FIELD_SEP, RENAMED_PREFIX};
use crate::repository::{slice_history, Repository, RepositoryBase};

pub const NAME: &str = "mercurial";

/// Pseudo-tag Mercurial attaches to the newest changeset.
const TIP: &str = "tip";

pub struct MercurialVariant;

impl RepositoryVariant for MercurialVariant {
    fn name(&self) -> &'static str {
        NAME
    }

    fn is_nestable(&self) -> bool {
        true
    }

    fn is_repository_for(&self, dir: &Path, _kind: CommandTimeoutType) -> bool {
        dir.join(".hg").is_dir()
    }

    fn instantiate(&self, dir: &Path, config: &Configuration) -> Box<dyn Repository> {
        Box::new(MercurialRepository::new(dir, config))
    }
}

pub struct MercurialRepository {
    base: RepositoryBase,
    tags_enabled: bool,
}

impl MercurialRepository {
    pub fn new(dir: &Path, config: &Configuration) -> Self {
        let command = config.repo_command(NAME, "hg");
        Self {
            base: RepositoryBase::new(NAME, dir, command, config),
            tags_enabled: config.tags_enabled,
        }
    }

    pub(crate) fn log_template() -> String {
        format!(
            "{c}{{node}}{s}{{date|hgdate}}{s}{{author}}{s}{{tags}}\\n{{desc}}\\n{e}\\n{{files % '{{file}}\\n'}}{{file_copies % '{r}{{name}}\\n'}}",
            c = COMMIT_PREFIX,
            s = FIELD_SEP,
            e = END_OF_MESSAGE,
            r = RENAMED_PREFIX,
        )
    }
}

/// Renamed files reported by `hg log` that live below `rel`.
pub(crate) fn renamed_under(renamed: BTreeSet<String>, rel: &str) -> BTreeSet<String> {
    if rel.is_empty() {
        return renamed;
    }
    let prefix = format!("{}/", rel);
    renamed.into_iter().filter(|r| r.starts_with(&prefix)).collect()
}

/// Parse `hg annotate -T "{lines % '{node}␞{user}\n'}"` output.
pub(crate) fn parse_annotate(output: &str) -> Vec<(String, String)> {
    output
        .lines()
        .filter_map(|line| {
            let (node, user) = line.split_once(FIELD_SEP)?;
            let node = node.trim();
            if node.is_empty() {
                return None;
            }
            Some((node.to_string(), user.trim().to_string()))
        })
        .collect()
}

impl Repository for MercurialRepository {
    fn base(&self) -> &RepositoryBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut RepositoryBase {
        &mut self.base
    }

    fn check_working(&self) -> bool {
        self.base
            .executor(CommandTimeoutType::Interactive)
            .args(["--version", "--quiet"])
            .run()
            .map(|o| o.success())
            .unwrap_or(false)
    }

    fn supports_sub_repositories(&self) -> bool {
        true
    }

    fn is_nestable(&self) -> bool {
        true
    }

    fn has_history_for_directories(&self) -> bool {
        true
    }

    /// Tags come with each changeset in the log output.
    fn has_file_based_tags(&self) -> bool {
        false
    }

    fn history(&self, file: &Path, since: Option<&str>, till: Option<&str>) -> Result<History> {
        if till.is_some() {
            return Err(HistoryError::Usage(format!(
                "{} does not support history up to a given revision",
                NAME
            )));
        }
        let rel = self.repo_relative_path(file)?;
        let is_dir = file.is_dir();
        let info = self.info();

        let mut exec = self
            .base
            .executor(CommandTimeoutType::Indexer)
            .args(["log", "--template"])
            .arg(Self::log_template());
        if !info.merge_commits_enabled {
            exec = exec.arg("--no-merges");
        }
        if !is_dir && info.handle_renamed_files {
            exec = exec.arg("--follow");
        }
        if !rel.is_empty() {
            exec = exec.arg(rel.clone());
        }

        let output = exec.run_checked()?;
        let ignored: &[&str] = &[TIP];
        let mut parsed = parse_log_stream(Cursor::new(output.stdout), NAME, ignored)?;
        if !self.tags_enabled {
            for entry in &mut parsed.entries {
                entry.tags.clear();
            }
        }

        let mut history = History::new(parsed.entries);
        if is_dir && info.handle_renamed_files {
            history = history.with_renamed_files(renamed_under(parsed.renamed, &rel));
        }
        slice_history(history, since, None)
    }

    fn annotate(&self, file: &Path, revision: Option<&str>) -> Result<Option<Annotation>> {
        let rel = self.repo_relative_path(file)?;
        let mut exec = self
            .base
            .executor(CommandTimeoutType::Interactive)
            .args(["annotate", "-T"])
            .arg(format!("{{lines % '{{node}}{}{{user}}\\n'}}", FIELD_SEP));
        if let Some(rev) = revision {
            exec = exec.args(["-r", rev]);
        }
        let output = exec.arg(rel.clone()).run_checked()?;

        let mut annotation = Annotation::new(&rel);
        annotation.revision = revision.map(str::to_string);
        for (node, user) in parse_annotate(&output.stdout_lossy()) {
            annotation.add_line(&node, &user, true);
        }
        Ok(Some(annotation))
    }

    fn history_get(
        &self,
        sink: &mut dyn Write,
        parent: &Path,
        basename: &str,
        revision: &str,
    ) -> Result<bool> {
        let rel = self.repo_relative_path(&parent.join(basename))?;
        let output = self
            .base
            .executor(CommandTimeoutType::Interactive)
            .args(["cat", "-r", revision])
            .arg(rel)
            .run()?;
        if !output.success() {
            return Ok(false);
        }
        sink.write_all(&output.stdout)?;
        Ok(true)
    }

    fn determine_parent(&self, kind: CommandTimeoutType) -> Result<Option<String>> {
        let output = self.base.executor(kind).args(["paths", "default"]).run()?;
        let url = output.stdout_lossy().trim().to_string();
        Ok(if output.success() && !url.is_empty() { Some(url) } else { None })
    }

    fn determine_branch(&self, kind: CommandTimeoutType) -> Result<Option<String>> {
        let output = self.base.executor(kind).arg("branch").run_checked()?;
        let branch = output.stdout_lossy().trim().to_string();
        Ok(if branch.is_empty() { None } else { Some(branch) })
    }

    fn determine_current_version(&self, kind: CommandTimeoutType) -> Result<Option<String>> {
        let output = self
            .base
            .executor(kind)
            .args(["log", "-l", "1", "-r", ".", "--template"])
            .arg("{date|isodatesec} {node|short} {author|user} {desc|firstline}")
            .run_checked()?;
        let version = output.stdout_lossy().trim().to_string();
        Ok(if version.is_empty() { None } else { Some(version) })
    }
}
