//! Repository-wide tag list and tag-to-changeset assignment.
//!
//! Variants without linear revision numbers compare tags to changesets by commit
//! date. This is an approximation of ancestry: two branches committed at
//! interleaved times can receive each other's tags.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{HistoryError, Result};
use crate::history::{History, HistoryEntry};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagEntry {
    /// Unix timestamp of the tagged changeset.
    pub date: i64,
    /// Linear revision number, for variants that have one.
    pub number: Option<u64>,
    /// Revision the tag points at.
    pub revision: String,
    pub tags: Vec<String>,
}

impl TagEntry {
    pub fn by_date(revision: &str, date: i64, tags: Vec<String>) -> Self {
        Self {
            date,
            number: None,
            revision: revision.to_string(),
            tags,
        }
    }

    pub fn by_number(number: u64, date: i64, tags: Vec<String>) -> Self {
        Self {
            date,
            number: Some(number),
            revision: number.to_string(),
            tags,
        }
    }

    /// Order of the tag relative to a changeset: `Greater` or `Equal` when the
    /// changeset is the tagged one or older than it.
    pub fn compare_to_entry(&self, entry: &HistoryEntry) -> Ordering {
        if let (Some(n), Ok(rev)) = (self.number, entry.revision.parse::<u64>()) {
            return n.cmp(&rev);
        }
        self.date.cmp(&entry.date)
    }
}

impl Ord for TagEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.number, other.number) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => self.date.cmp(&other.date),
        }
        .then_with(|| self.revision.cmp(&other.revision))
    }
}

impl PartialOrd for TagEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Tags ordered from the oldest to the newest tagged changeset.
pub type TagList = BTreeSet<TagEntry>;

/// Assign each tag of `tags` to the newest changeset in `history` that is not
/// newer than the tag.
///
/// `tags` is `None` when the repository never built its tag list; that is a
/// usage error for repositories whose tags live at commit granularity.
pub fn assign_tags(tags: Option<&TagList>, history: &mut History) -> Result<()> {
    let tags = tags.ok_or_else(|| {
        HistoryError::Usage("tag list has not been built for this repository".to_string())
    })?;

    let mut pending = tags.iter().rev().peekable();
    for entry in history.entries_mut().iter_mut() {
        while let Some(tag) = pending.peek() {
            if tag.compare_to_entry(entry) == Ordering::Less {
                break;
            }
            entry.add_tags(&tag.tags);
            pending.next();
        }
        if pending.peek().is_none() {
            break;
        }
    }
    Ok(())
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn every_tag_assigned_at_most_once(
            dates in proptest::collection::btree_set(0i64..1000, 1..20),
            tag_dates in proptest::collection::vec(0i64..1000, 0..20),
        ) {
            let entries: Vec<HistoryEntry> = dates
                .iter()
                .rev()
                .map(|d| HistoryEntry::new(&format!("r{}", d), "a", *d, "m"))
                .collect();
            let oldest = *dates.iter().next().unwrap();
            let mut h = History::new(entries);
            let list: TagList = tag_dates
                .iter()
                .enumerate()
                .map(|(i, d)| TagEntry::by_date(&format!("t{}", i), *d, vec![format!("tag{}", i)]))
                .collect();
            assign_tags(Some(&list), &mut h).unwrap();

            let assigned: usize = h.entries().iter().map(|e| e.tags.len()).sum();
            let expected = list.iter().filter(|t| t.date >= oldest).count();
            prop_assert_eq!(assigned, expected);
            for e in h.entries() {
                for t in &e.tags {
                    let tag = list.iter().find(|x| &x.tags[0] == t).unwrap();
                    prop_assert!(tag.date >= e.date);
                }
            }
        }
    }
}
