//! In-memory repository variant used by unit tests.
//!
//! A `MockVariant` recognizes directories containing its marker entry and
//! produces `MockRepository` objects that answer history, annotate and
//! contents queries from a scripted changeset list shared through `MockState`.

use std::collections::{BTreeSet, HashMap};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use crate::config::Configuration;
use crate::error::{HistoryError, Result};
use crate::exec::CommandTimeoutType;
use crate::history::annotation::Annotation;
use crate::history::tags::TagList;
use crate::history::{History, HistoryEntry};
use crate::repository::factory::RepositoryVariant;
use crate::repository::{slice_history, Repository, RepositoryBase};

/// One scripted changeset.
#[derive(Clone, Debug)]
pub struct MockChangeset {
    pub entry: HistoryEntry,
    /// (old, new) repository-relative paths renamed in this changeset.
    pub renames: Vec<(String, String)>,
}

/// State shared between a test and every repository object created for it.
#[derive(Default)]
pub struct MockState {
    /// Newest first.
    pub changesets: RwLock<Vec<MockChangeset>>,
    pub blame: RwLock<HashMap<String, Vec<(String, String)>>>,
    pub tags: RwLock<TagList>,
    pub history_calls: AtomicUsize,
    pub fail_history: AtomicBool,
}

impl MockState {
    /// Record a new changeset on top of the existing ones.
    pub fn commit(&self, revision: &str, date: i64, message: &str, files: &[&str]) {
        self.commit_with_renames(revision, date, message, files, &[]);
    }

    pub fn commit_with_renames(
        &self,
        revision: &str,
        date: i64,
        message: &str,
        files: &[&str],
        renames: &[(&str, &str)],
    ) {
        let entry = HistoryEntry::new(revision, "tester", date, message).with_files(files.iter().copied());
        let renames = renames
            .iter()
            .map(|(o, n)| (o.to_string(), n.to_string()))
            .collect();
        self.changesets
            .write()
            .unwrap()
            .insert(0, MockChangeset { entry, renames });
    }

    pub fn set_blame(&self, file: &str, lines: &[(&str, &str)]) {
        self.blame.write().unwrap().insert(
            file.to_string(),
            lines.iter().map(|(r, a)| (r.to_string(), a.to_string())).collect(),
        );
    }

    pub fn history_calls(&self) -> usize {
        self.history_calls.load(Ordering::SeqCst)
    }

    /// Per-file history following renames backwards, as a VCS `--follow` does.
    fn file_history(&self, rel: &str) -> Vec<HistoryEntry> {
        let mut names: BTreeSet<String> = BTreeSet::new();
        names.insert(rel.to_string());
        let mut out = Vec::new();
        for cs in self.changesets.read().unwrap().iter() {
            let touched = cs.entry.files.iter().any(|f| names.contains(f));
            if touched {
                let mut e = cs.entry.clone();
                e.files.retain(|f| names.contains(f));
                out.push(e);
            }
            for (old, new) in &cs.renames {
                if names.contains(new) {
                    names.insert(old.clone());
                }
            }
        }
        out
    }

    fn dir_history(&self, rel: &str) -> (Vec<HistoryEntry>, BTreeSet<String>) {
        let under = |f: &str| rel.is_empty() || f == rel || f.starts_with(&format!("{}/", rel));
        let mut out = Vec::new();
        let mut renamed = BTreeSet::new();
        for cs in self.changesets.read().unwrap().iter() {
            if cs.entry.files.iter().any(|f| under(f)) {
                out.push(cs.entry.clone());
            }
            for (_, new) in &cs.renames {
                if under(new) {
                    renamed.insert(new.clone());
                }
            }
        }
        (out, renamed)
    }
}

#[derive(Clone)]
pub struct MockVariant {
    name: &'static str,
    marker: &'static str,
    nestable: bool,
    working: bool,
    sub_repositories: bool,
    remote: bool,
    dir_history: bool,
    file_based_tags: bool,
    failing_properties: bool,
    pub state: Arc<MockState>,
}

impl MockVariant {
    pub fn new(name: &'static str, marker: &'static str) -> Self {
        Self {
            name,
            marker,
            nestable: true,
            working: true,
            sub_repositories: true,
            remote: false,
            dir_history: true,
            file_based_tags: false,
            failing_properties: false,
            state: Arc::new(MockState::default()),
        }
    }

    pub fn nestable(mut self, v: bool) -> Self {
        self.nestable = v;
        self
    }

    pub fn working(mut self, v: bool) -> Self {
        self.working = v;
        self
    }

    pub fn sub_repositories(mut self, v: bool) -> Self {
        self.sub_repositories = v;
        self
    }

    pub fn remote(mut self, v: bool) -> Self {
        self.remote = v;
        self
    }

    pub fn dir_history(mut self, v: bool) -> Self {
        self.dir_history = v;
        self
    }

    pub fn file_based_tags(mut self) -> Self {
        self.file_based_tags = true;
        self
    }

    pub fn failing_properties(mut self) -> Self {
        self.failing_properties = true;
        self
    }

}

impl RepositoryVariant for MockVariant {
    fn name(&self) -> &'static str {
        self.name
    }

    fn is_nestable(&self) -> bool {
        self.nestable
    }

    fn is_repository_for(&self, dir: &Path, _kind: CommandTimeoutType) -> bool {
        dir.join(self.marker).exists()
    }

    fn instantiate(&self, dir: &Path, config: &Configuration) -> Box<dyn Repository> {
        let mut base = RepositoryBase::new(self.name, dir, format!("{}-client", self.name), config);
        base.info.remote = self.remote;
        Box::new(MockRepository {
            base,
            variant: self.clone(),
        })
    }
}

pub struct MockRepository {
    base: RepositoryBase,
    variant: MockVariant,
}

impl Repository for MockRepository {
    fn base(&self) -> &RepositoryBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut RepositoryBase {
        &mut self.base
    }

    fn check_working(&self) -> bool {
        self.variant.working
    }

    fn supports_sub_repositories(&self) -> bool {
        self.variant.sub_repositories
    }

    fn is_nestable(&self) -> bool {
        self.variant.nestable
    }

    fn has_history_for_directories(&self) -> bool {
        self.variant.dir_history
    }

    fn has_file_based_tags(&self) -> bool {
        self.variant.file_based_tags
    }

    fn supports_per_partes(&self) -> bool {
        true
    }

    fn history(&self, file: &Path, since: Option<&str>, till: Option<&str>) -> Result<History> {
        let state = &self.variant.state;
        state.history_calls.fetch_add(1, Ordering::SeqCst);
        if state.fail_history.load(Ordering::SeqCst) {
            return Err(HistoryError::Command {
                command: "mock log".to_string(),
                dir: self.directory().display().to_string(),
                message: "scripted failure".to_string(),
            });
        }
        let rel = self.repo_relative_path(file)?;
        let history = if file.is_dir() {
            let (entries, renamed) = state.dir_history(&rel);
            let mut h = History::new(entries);
            if self.info().handle_renamed_files {
                h = h.with_renamed_files(renamed);
            }
            h
        } else {
            History::new(state.file_history(&rel))
        };
        slice_history(history, since, till)
    }

    fn annotate(&self, file: &Path, revision: Option<&str>) -> Result<Option<Annotation>> {
        let rel = self.repo_relative_path(file)?;
        let blame = self.variant.state.blame.read().unwrap();
        let Some(lines) = blame.get(&rel) else {
            return Ok(None);
        };
        let mut annotation = Annotation::new(&rel);
        annotation.revision = revision.map(str::to_string);
        for (rev, author) in lines {
            annotation.add_line(rev, author, true);
        }
        Ok(Some(annotation))
    }

    fn history_get(
        &self,
        sink: &mut dyn Write,
        _parent: &Path,
        basename: &str,
        revision: &str,
    ) -> Result<bool> {
        write!(sink, "{}@{}", basename, revision)?;
        Ok(true)
    }

    fn determine_parent(&self, _kind: CommandTimeoutType) -> Result<Option<String>> {
        if self.variant.failing_properties {
            return Err(HistoryError::Usage("no remote".to_string()));
        }
        Ok(Some(format!("https://example.com/{}", self.variant.name)))
    }

    fn determine_branch(&self, _kind: CommandTimeoutType) -> Result<Option<String>> {
        if self.variant.failing_properties {
            return Err(HistoryError::Usage("detached".to_string()));
        }
        Ok(Some("main".to_string()))
    }

    fn determine_current_version(&self, _kind: CommandTimeoutType) -> Result<Option<String>> {
        if self.variant.failing_properties {
            return Err(HistoryError::Usage("empty".to_string()));
        }
        let cs = self.variant.state.changesets.read().unwrap();
        Ok(cs.first().map(|c| c.entry.revision.clone()))
    }

    fn build_tag_list(&self, _kind: CommandTimeoutType) -> Result<Option<TagList>> {
        Ok(Some(self.variant.state.tags.read().unwrap().clone()))
    }
}

/// Create `<parent>/<name>` with the variant marker and the given files.
pub fn make_repo_dir(parent: &Path, name: &str, marker: &str, files: &[&str]) -> std::path::PathBuf {
    let root = parent.join(name);
    std::fs::create_dir_all(root.join(marker)).unwrap();
    for f in files {
        let p = root.join(f);
        if let Some(dir) = p.parent() {
            std::fs::create_dir_all(dir).unwrap();
        }
        std::fs::write(&p, format!("content of {}", f)).unwrap();
    }
    root
}
