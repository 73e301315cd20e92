use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

/// One annotated line: the revision and author that last changed it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationLine {
    pub revision: String,
    pub author: String,
    /// False when the revision is not part of the file's visible history.
    pub enabled: bool,
}

/// Per-line blame for one file, optionally completed with log metadata.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub filename: String,
    /// Revision the annotation was produced for (`None` = working copy / latest).
    pub revision: Option<String>,
    lines: Vec<AnnotationLine>,
    /// Revision -> description shown next to the line.
    desc: HashMap<String, String>,
    /// Revision -> file version (oldest revision = 1).
    file_versions: HashMap<String, usize>,
    widest_revision: usize,
    widest_author: usize,
}

impl Annotation {
    pub fn new(filename: &str) -> Self {
        Self {
            filename: filename.to_string(),
            ..Default::default()
        }
    }

    pub fn add_line(&mut self, revision: &str, author: &str, enabled: bool) {
        self.widest_revision = self.widest_revision.max(revision.chars().count());
        self.widest_author = self.widest_author.max(author.chars().count());
        self.lines.push(AnnotationLine {
            revision: revision.to_string(),
            author: author.to_string(),
            enabled,
        });
    }

    pub fn lines(&self) -> &[AnnotationLine] {
        &self.lines
    }

    pub fn size(&self) -> usize {
        self.lines.len()
    }

    /// 1-based line accessors, as displayed.
    pub fn revision(&self, line: usize) -> Option<&str> {
        self.line(line).map(|l| l.revision.as_str())
    }

    pub fn author(&self, line: usize) -> Option<&str> {
        self.line(line).map(|l| l.author.as_str())
    }

    fn line(&self, line: usize) -> Option<&AnnotationLine> {
        line.checked_sub(1).and_then(|i| self.lines.get(i))
    }

    /// Distinct revisions appearing in the annotation.
    pub fn revisions(&self) -> BTreeSet<&str> {
        self.lines.iter().map(|l| l.revision.as_str()).collect()
    }

    pub fn add_desc(&mut self, revision: &str, desc: String) {
        self.desc.insert(revision.to_string(), desc);
    }

    pub fn desc(&self, revision: &str) -> Option<&str> {
        self.desc.get(revision).map(String::as_str)
    }

    pub fn add_file_version(&mut self, revision: &str, version: usize) {
        self.file_versions.insert(revision.to_string(), version);
    }

    pub fn file_version(&self, revision: &str) -> Option<usize> {
        self.file_versions.get(revision).copied()
    }

    pub fn file_versions_count(&self) -> usize {
        self.file_versions.len()
    }

    /// Recompute each line's `enabled` flag from its revision.
    pub fn set_enabled(&mut self, mut enabled: impl FnMut(&str) -> bool) {
        for line in &mut self.lines {
            line.enabled = enabled(&line.revision);
        }
    }

    pub fn widest_revision(&self) -> usize {
        self.widest_revision
    }

    pub fn widest_author(&self) -> usize {
        self.widest_author
    }
}
