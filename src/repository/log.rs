//! Streaming parser for the log format every shipped variant is asked to emit.
//!
//! Each changeset is rendered by the VCS client as:
//!
//! ```text
//! COMMIT:<revision>␞<unix timestamp>␞<author>␞<space-separated tags>
//! <message lines...>
//! ␟
//! <touched file>
//! RENAMED:<new name of a renamed file>
//! <blank lines are ignored>
//! ```

use std::collections::BTreeSet;
use std::io::BufRead;

use tracing::warn;

use crate::error::{HistoryError, Result};
use crate::history::HistoryEntry;

/// Field separator in the header line: U+241E (SYMBOL FOR RECORD SEPARATOR).
/// Never appears in commit data.
pub const FIELD_SEP: &str = "␞";

/// Terminates the free-text message: U+241F (SYMBOL FOR UNIT SEPARATOR) on its own line.
pub const END_OF_MESSAGE: &str = "␟";

pub const COMMIT_PREFIX: &str = "COMMIT:";
pub const RENAMED_PREFIX: &str = "RENAMED:";

/// Parsed log: entries in output order plus the renamed-file paths seen.
#[derive(Debug, Default)]
pub struct ParsedLog {
    pub entries: Vec<HistoryEntry>,
    pub renamed: BTreeSet<String>,
}

enum State {
    Idle,
    Message,
    Files,
}

/// Parse log output line by line.
///
/// Malformed headers are logged and the changeset is skipped; `ignored_tags`
/// are dropped from the tag field (e.g. Mercurial's `tip`).
pub fn parse_log_stream(reader: impl BufRead, tool: &str, ignored_tags: &[&str]) -> Result<ParsedLog> {
    let mut parsed = ParsedLog::default();
    let mut current: Option<HistoryEntry> = None;
    let mut state = State::Idle;
    let mut message: Vec<String> = Vec::new();

    for line_result in reader.lines() {
        let line = line_result.map_err(|e| HistoryError::Parse {
            tool: tool.to_string(),
            message: format!("I/O error reading log: {}", e),
        })?;

        if let Some(header) = line.strip_prefix(COMMIT_PREFIX) {
            if let Some(done) = current.take() {
                parsed.entries.push(done);
            }
            message.clear();
            current = parse_header(header, ignored_tags);
            if current.is_none() {
                let preview: String = line.chars().take(100).collect();
                warn!(tool, line = %preview, "Skipping malformed log header");
            }
            state = State::Message;
            continue;
        }

        match state {
            State::Idle => {}
            State::Message => {
                if line == END_OF_MESSAGE {
                    if let Some(entry) = current.as_mut() {
                        entry.message = message.join("\n").trim_end().to_string();
                    }
                    state = State::Files;
                } else {
                    message.push(line);
                }
            }
            State::Files => {
                let Some(entry) = current.as_mut() else { continue };
                if let Some(renamed) = line.strip_prefix(RENAMED_PREFIX) {
                    let renamed = renamed.trim();
                    if !renamed.is_empty() {
                        parsed.renamed.insert(renamed.to_string());
                    }
                } else {
                    let file = line.trim();
                    if !file.is_empty() {
                        entry.files.insert(file.to_string());
                    }
                }
            }
        }
    }
    if let Some(done) = current.take() {
        parsed.entries.push(done);
    }
    Ok(parsed)
}

fn parse_header(header: &str, ignored_tags: &[&str]) -> Option<HistoryEntry> {
    let fields: Vec<&str> = header.split(FIELD_SEP).collect();
    if fields.len() < 3 {
        return None;
    }
    let revision = fields[0].trim();
    if revision.is_empty() {
        return None;
    }
    // Mercurial's hgdate is "<unix> <tz offset>"; only the first token matters.
    let date: i64 = fields[1].split_whitespace().next()?.parse().ok()?;
    let mut entry = HistoryEntry::new(revision, fields[2].trim(), date, "");
    if let Some(tags) = fields.get(3) {
        let tags: Vec<String> = tags
            .split_whitespace()
            .filter(|t| !ignored_tags.contains(t))
            .map(str::to_string)
            .collect();
        entry.add_tags(&tags);
    }
    Some(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn parse(input: &str) -> ParsedLog {
        parse_log_stream(Cursor::new(input.as_bytes()), "test", &["tip"]).unwrap()
    }

    const LOG: &str = concat!(
        "COMMIT:cccc␞1700002000␞Alice <alice@example.com>␞\n",
        "Rename b\n",
        "\n",
        "Longer body line\n",
        "␟\n",
        "\n",
        "b2.txt\n",
        "RENAMED:b2.txt\n",
        "COMMIT:bbbb␞1700001000 -3600␞Bob <bob@example.com>␞v1.0 tip\n",
        "Edit a\n",
        "␟\n",
        "a.txt\n",
        "\n",
        "COMMIT:aaaa␞1700000000␞Alice <alice@example.com>␞\n",
        "Initial\n",
        "␟\n",
        "a.txt\n",
        "b.txt\n",
    );

    #[test]
    fn test_parses_all_entries_in_order() {
        let log = parse(LOG);
        let revs: Vec<&str> = log.entries.iter().map(|e| e.revision.as_str()).collect();
        assert_eq!(revs, vec!["cccc", "bbbb", "aaaa"]);
    }

    #[test]
    fn test_multiline_message_kept() {
        let log = parse(LOG);
        assert_eq!(log.entries[0].message, "Rename b\n\nLonger body line");
        assert_eq!(log.entries[1].message, "Edit a");
    }

    #[test]
    fn test_files_and_renames() {
        let log = parse(LOG);
        assert_eq!(log.entries[2].files.len(), 2);
        assert!(log.entries[0].files.contains("b2.txt"));
        assert!(log.renamed.contains("b2.txt"));
        assert_eq!(log.renamed.len(), 1);
    }

    #[test]
    fn test_hgdate_and_ignored_tags() {
        let log = parse(LOG);
        assert_eq!(log.entries[1].date, 1700001000);
        assert_eq!(log.entries[1].tags, vec!["v1.0".to_string()]);
    }

    #[test]
    fn test_malformed_header_skips_changeset() {
        let input = concat!(
            "COMMIT:broken\n",
            "msg\n",
            "␟\n",
            "x.txt\n",
            "COMMIT:ok␞10␞A␞\n",
            "msg\n",
            "␟\n",
            "y.txt\n",
        );
        let log = parse(input);
        assert_eq!(log.entries.len(), 1);
        assert_eq!(log.entries[0].revision, "ok");
        assert!(!log.entries[0].files.contains("x.txt"));
    }

    #[test]
    fn test_empty_input() {
        let log = parse("");
        assert!(log.entries.is_empty());
        assert!(log.renamed.is_empty());
    }
}
