//! History data model: changesets, per-file history lists, tags and annotations.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

pub mod annotation;
pub mod tags;

/// One changeset as seen by a single repository.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Opaque, VCS-specific revision identifier.
    pub revision: String,
    pub author: String,
    /// Unix timestamp (seconds since epoch).
    pub date: i64,
    pub message: String,
    /// False for administrative/merge placeholders that carry no content change.
    pub active: bool,
    /// Repository-relative paths touched by this changeset (forward slashes).
    pub files: BTreeSet<String>,
    pub tags: Vec<String>,
}

impl HistoryEntry {
    pub fn new(revision: &str, author: &str, date: i64, message: &str) -> Self {
        Self {
            revision: revision.to_string(),
            author: author.to_string(),
            date,
            message: message.to_string(),
            active: true,
            files: BTreeSet::new(),
            tags: Vec::new(),
        }
    }

    pub fn with_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.files.extend(files.into_iter().map(Into::into));
        self
    }

    pub fn add_tags(&mut self, tags: &[String]) {
        for tag in tags {
            if !self.tags.contains(tag) {
                self.tags.push(tag.clone());
            }
        }
    }

    /// Tags as a single display string (`"v1.0, release"`).
    pub fn tags_display(&self) -> Option<String> {
        if self.tags.is_empty() {
            None
        } else {
            Some(self.tags.join(", "))
        }
    }

    /// Drop the touched-file list.
    pub fn strip(&mut self) {
        self.files.clear();
    }
}

/// Ordered changeset list, newest first.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct History {
    entries: Vec<HistoryEntry>,
    /// Repository-relative paths of files renamed within this history.
    renamed_files: BTreeSet<String>,
    latest_revision: Option<String>,
}

impl History {
    /// Entries must already be ordered newest first.
    pub fn new(entries: Vec<HistoryEntry>) -> Self {
        Self {
            entries,
            renamed_files: BTreeSet::new(),
            latest_revision: None,
        }
    }

    pub fn with_renamed_files<I, S>(mut self, renamed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.renamed_files.extend(renamed.into_iter().map(Into::into));
        self
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut Vec<HistoryEntry> {
        &mut self.entries
    }

    pub fn into_entries(self) -> Vec<HistoryEntry> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn renamed_files(&self) -> &BTreeSet<String> {
        &self.renamed_files
    }

    pub fn is_renamed(&self, path: &str) -> bool {
        self.renamed_files.contains(path)
    }

    /// Explicit latest-revision marker, or the newest entry's revision.
    pub fn latest_revision(&self) -> Option<&str> {
        self.latest_revision
            .as_deref()
            .or_else(|| self.entries.first().map(|e| e.revision.as_str()))
    }

    pub fn set_latest_revision(&mut self, revision: Option<String>) {
        self.latest_revision = revision;
    }

    /// Oldest entry's revision.
    pub fn oldest_revision(&self) -> Option<&str> {
        self.entries.last().map(|e| e.revision.as_str())
    }

    /// Discard per-entry file lists once they are no longer needed.
    pub fn strip(&mut self) {
        for e in &mut self.entries {
            e.strip();
        }
    }

    /// Clear all tags (before reassigning them over a merged list).
    pub fn strip_tags(&mut self) {
        for e in &mut self.entries {
            e.tags.clear();
        }
    }

    /// Invert a directory-wide history into per-file histories.
    ///
    /// `keep` decides whether a path participates; it is called once per distinct path.
    /// Each resulting list keeps the newest-first order of `self`.
    pub fn by_file(&self, mut keep: impl FnMut(&str) -> bool) -> HashMap<String, Vec<HistoryEntry>> {
        let mut accepted: HashMap<&str, bool> = HashMap::new();
        let mut map: HashMap<String, Vec<HistoryEntry>> = HashMap::new();
        for entry in &self.entries {
            let mut stripped: Option<HistoryEntry> = None;
            for file in &entry.files {
                let ok = *accepted
                    .entry(file.as_str())
                    .or_insert_with(|| keep(file.as_str()));
                if !ok {
                    continue;
                }
                let e = stripped.get_or_insert_with(|| {
                    let mut e = entry.clone();
                    e.strip();
                    e
                });
                map.entry(file.clone()).or_default().push(e.clone());
            }
        }
        map
    }
}
