//! Git variant: drives the `git` CLI.
//!
//! Revisions are full 40-hex commit hashes everywhere (log, blame, tags), so
//! annotation lines match history entries without shortening.

use std::collections::{BTreeSet, HashMap};
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::config::Configuration;
use crate::error::{HistoryError, Result};
use crate::exec::CommandTimeoutType;
use crate::history::annotation::Annotation;
use crate::history::tags::{TagEntry, TagList};
use crate::history::History;
use crate::repository::factory::RepositoryVariant;
use crate::repository::log::{parse_log_stream, COMMIT_PREFIX, END_OF_MESSAGE, FIELD_SEP};
use crate::repository::{Repository, RepositoryBase};

pub const NAME: &str = "git";

pub struct GitVariant;

impl RepositoryVariant for GitVariant {
    fn name(&self) -> &'static str {
        NAME
    }

    fn is_nestable(&self) -> bool {
        true
    }

    /// `.git` is a directory in a plain clone and a file in worktrees/submodules.
    fn is_repository_for(&self, dir: &Path, _kind: CommandTimeoutType) -> bool {
        dir.join(".git").exists()
    }

    fn instantiate(&self, dir: &Path, config: &Configuration) -> Box<dyn Repository> {
        Box::new(GitRepository::new(dir, config))
    }
}

pub struct GitRepository {
    base: RepositoryBase,
}

impl GitRepository {
    pub fn new(dir: &Path, config: &Configuration) -> Self {
        let command = config.repo_command(NAME, "git");
        Self {
            base: RepositoryBase::new(NAME, dir, command, config),
        }
    }

    fn log_format() -> String {
        format!(
            "--format={}%H{}%at{}%aN <%aE>{}%n%B%n{}",
            COMMIT_PREFIX, FIELD_SEP, FIELD_SEP, FIELD_SEP, END_OF_MESSAGE
        )
    }

    /// Fail unless `since` is a commit that is an ancestor of HEAD; anything else
    /// means the history the cache was built from has been rewritten.
    fn verify_boundary(&self, since: &str) -> Result<()> {
        let exists = self
            .base
            .executor(CommandTimeoutType::Indexer)
            .args(["rev-parse", "--verify", "--quiet"])
            .arg(format!("{}^{{commit}}", since))
            .run()?
            .success();
        let ancestor = exists
            && self
                .base
                .executor(CommandTimeoutType::Indexer)
                .args(["merge-base", "--is-ancestor", since, "HEAD"])
                .run()?
                .success();
        if !ancestor {
            return Err(HistoryError::Consistency(format!(
                "Cached revision '{}' not found in the repository",
                since
            )));
        }
        Ok(())
    }

    /// Files renamed within `range` below `rel` (repository-relative, new names).
    fn renamed_files(&self, rel: &str, range: Option<&str>) -> Result<BTreeSet<String>> {
        let mut exec = self
            .base
            .executor(CommandTimeoutType::Indexer)
            .args(["-c", "core.quotePath=false", "log", "--find-renames=8", "--name-status"])
            .arg(format!("--format={}%H", COMMIT_PREFIX));
        if let Some(range) = range {
            exec = exec.arg(range);
        }
        exec = exec.arg("--");
        if !rel.is_empty() {
            exec = exec.arg(rel);
        }
        let output = exec.run_checked()?;
        parse_renames(&output.stdout_lossy(), rel)
    }
}

const RENAME_PATTERN: &str = r"^R\d+\t([^\t]+)\t([^\t]+)$";

static RENAME_LINE: OnceLock<Regex> = OnceLock::new();

fn rename_regex() -> Result<&'static Regex> {
    if let Some(re) = RENAME_LINE.get() {
        return Ok(re);
    }
    let re = Regex::new(RENAME_PATTERN).map_err(|e| HistoryError::InvalidRegex {
        pattern: RENAME_PATTERN.to_string(),
        source: e,
    })?;
    Ok(RENAME_LINE.get_or_init(|| re))
}

/// Collect new names from `--name-status` rename lines (`R087\told\tnew`) under `rel`.
pub(crate) fn parse_renames(output: &str, rel: &str) -> Result<BTreeSet<String>> {
    let re = rename_regex()?;
    let prefix = format!("{}/", rel);
    Ok(output
        .lines()
        .filter_map(|line| re.captures(line))
        .map(|caps| caps[2].to_string())
        .filter(|new| rel.is_empty() || new.starts_with(&prefix))
        .collect())
}

/// Parse `git blame --porcelain` output into (commit, author) per line.
///
/// Git emits the full header block only the first time a commit appears;
/// later lines of the same commit reuse the author seen then.
pub(crate) fn parse_blame_porcelain(output: &str) -> Vec<(String, String)> {
    let mut results = Vec::new();
    let mut authors: HashMap<String, String> = HashMap::new();
    let mut lines = output.lines();

    while let Some(line) = lines.next() {
        let mut parts = line.split_whitespace();
        let Some(hash) = parts.next() else { continue };
        if hash.len() != 40 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            continue;
        }

        let mut author: Option<String> = None;
        for header in lines.by_ref() {
            if header.starts_with('\t') {
                break;
            }
            if let Some(name) = header.strip_prefix("author ") {
                author = Some(name.to_string());
            }
        }

        let author = match author {
            Some(a) => {
                authors.insert(hash.to_string(), a.clone());
                a
            }
            None => authors.get(hash).cloned().unwrap_or_default(),
        };
        results.push((hash.to_string(), author));
    }
    results
}

/// Parse `git for-each-ref` tag output into a tag list grouped by commit.
///
/// Line format: `name␞objectname␞*objectname␞authordate␞*authordate`; the
/// starred fields are filled for annotated tags only.
pub(crate) fn parse_tags(output: &str) -> TagList {
    let mut by_commit: HashMap<String, (i64, Vec<String>)> = HashMap::new();
    for line in output.lines() {
        let fields: Vec<&str> = line.split(FIELD_SEP).collect();
        if fields.len() < 5 {
            continue;
        }
        let name = fields[0].trim();
        let commit = if fields[2].trim().is_empty() { fields[1].trim() } else { fields[2].trim() };
        let date = if fields[4].trim().is_empty() { fields[3].trim() } else { fields[4].trim() };
        // Tags of trees/blobs carry no date.
        let Ok(date) = date.parse::<i64>() else { continue };
        if name.is_empty() || commit.is_empty() {
            continue;
        }
        let slot = by_commit.entry(commit.to_string()).or_insert((date, Vec::new()));
        slot.1.push(name.to_string());
    }
    by_commit
        .into_iter()
        .map(|(commit, (date, mut names))| {
            names.sort();
            TagEntry::by_date(&commit, date, names)
        })
        .collect()
}

impl Repository for GitRepository {
    fn base(&self) -> &RepositoryBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut RepositoryBase {
        &mut self.base
    }

    fn check_working(&self) -> bool {
        self.base
            .executor(CommandTimeoutType::Interactive)
            .arg("--version")
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

    fn has_file_based_tags(&self) -> bool {
        true
    }

    fn supports_per_partes(&self) -> bool {
        true
    }

    fn history(&self, file: &Path, since: Option<&str>, till: Option<&str>) -> Result<History> {
        let rel = self.repo_relative_path(file)?;
        let is_dir = file.is_dir();
        let info = self.info();

        if let Some(since) = since {
            self.verify_boundary(since)?;
        }
        let range = match (since, till) {
            (Some(s), Some(t)) => Some(format!("{}..{}", s, t)),
            (Some(s), None) => Some(format!("{}..HEAD", s)),
            (None, Some(t)) => Some(t.to_string()),
            (None, None) => None,
        };

        let mut exec = self
            .base
            .executor(CommandTimeoutType::Indexer)
            .args(["-c", "core.quotePath=false", "log", "--name-only"])
            .arg(Self::log_format());
        if !info.merge_commits_enabled {
            exec = exec.arg("--no-merges");
        }
        if !is_dir && info.handle_renamed_files {
            exec = exec.arg("--follow");
        }
        if let Some(range) = &range {
            exec = exec.arg(range.clone());
        }
        exec = exec.arg("--");
        if !rel.is_empty() {
            exec = exec.arg(rel.clone());
        }

        let output = exec.run_checked()?;
        let parsed = parse_log_stream(Cursor::new(output.stdout), NAME, &[])?;
        let mut history = History::new(parsed.entries);
        if is_dir && info.handle_renamed_files {
            history = history.with_renamed_files(self.renamed_files(&rel, range.as_deref())?);
        }
        Ok(history)
    }

    fn annotate(&self, file: &Path, revision: Option<&str>) -> Result<Option<Annotation>> {
        let rel = self.repo_relative_path(file)?;
        let mut exec = self
            .base
            .executor(CommandTimeoutType::Interactive)
            .args(["blame", "--porcelain"]);
        if let Some(rev) = revision {
            exec = exec.arg(rev);
        }
        let output = exec.arg("--").arg(rel.clone()).run_checked()?;

        let mut annotation = Annotation::new(&rel);
        annotation.revision = revision.map(str::to_string);
        for (hash, author) in parse_blame_porcelain(&output.stdout_lossy()) {
            annotation.add_line(&hash, &author, true);
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
            .arg("show")
            .arg(format!("{}:{}", revision, rel))
            .run()?;
        if !output.success() {
            return Ok(false);
        }
        sink.write_all(&output.stdout)?;
        Ok(true)
    }

    fn determine_parent(&self, kind: CommandTimeoutType) -> Result<Option<String>> {
        let output = self
            .base
            .executor(kind)
            .args(["config", "--get", "remote.origin.url"])
            .run()?;
        let url = output.stdout_lossy().trim().to_string();
        Ok(if output.success() && !url.is_empty() { Some(url) } else { None })
    }

    fn determine_branch(&self, kind: CommandTimeoutType) -> Result<Option<String>> {
        let output = self
            .base
            .executor(kind)
            .args(["rev-parse", "--abbrev-ref", "HEAD"])
            .run_checked()?;
        let branch = output.stdout_lossy().trim().to_string();
        Ok(if branch.is_empty() { None } else { Some(branch) })
    }

    fn determine_current_version(&self, kind: CommandTimeoutType) -> Result<Option<String>> {
        let output = self
            .base
            .executor(kind)
            .args(["log", "-1", "--format=%cI %h %an %s"])
            .run_checked()?;
        let version = output.stdout_lossy().trim().to_string();
        Ok(if version.is_empty() { None } else { Some(version) })
    }

    fn build_tag_list(&self, kind: CommandTimeoutType) -> Result<Option<TagList>> {
        let format = format!(
            "--format=%(refname:strip=2){sep}%(objectname){sep}%(*objectname){sep}%(authordate:unix){sep}%(*authordate:unix)",
            sep = FIELD_SEP
        );
        let output = self
            .base
            .executor(kind)
            .args(["for-each-ref", format.as_str(), "refs/tags"])
            .run_checked()?;
        Ok(Some(parse_tags(&output.stdout_lossy())))
    }
}

#[cfg(test)]
#[path = "git_tests.rs"]
mod tests;
