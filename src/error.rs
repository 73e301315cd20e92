//! Unified error type for repository discovery and history caching.

use thiserror::Error;

/// All errors that can occur while probing repositories, querying history,
/// or reading and writing the history/annotation caches.
///
/// Expected absences (no owning repository, cache miss, no annotation) are
/// not errors; they are reported as `Ok(None)` by the callers.
#[derive(Error, Debug)]
pub enum HistoryError {
    /// I/O error (cache file read/write, directory access)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Cache record (de)serialization error (bincode)
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Invalid regex pattern
    #[error("Invalid regex pattern '{pattern}': {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Configuration file could not be parsed
    #[error("Invalid configuration: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation is not supported by this repository or was called incorrectly
    #[error("{0}")]
    Usage(String),

    /// Cache record is missing, corrupt or cannot be written
    #[error("Cache error for {path}: {message}")]
    Cache { path: String, message: String },

    /// Repository probe or instantiation failed
    #[error("Failed to probe repository at {dir}: {message}")]
    Probe { dir: String, message: String },

    /// External VCS command exited unsuccessfully or could not be spawned
    #[error("Command '{command}' failed in {dir}: {message}")]
    Command {
        command: String,
        dir: String,
        message: String,
    },

    /// External VCS command exceeded its timeout and was killed
    #[error("Command '{command}' timed out after {secs}s")]
    CommandTimeout { command: String, secs: u64 },

    /// External VCS command produced output that could not be parsed
    #[error("Unexpected output from {tool}: {message}")]
    Parse { tool: String, message: String },

    /// Incremental update found history that does not line up with the cache
    #[error("{0}")]
    Consistency(String),

    /// Path cannot be expressed relative to the source root
    #[error("Path {path} is outside of source root {root}")]
    OutsideSourceRoot { path: String, root: String },
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, HistoryError>;

impl HistoryError {
    pub(crate) fn cache(path: &std::path::Path, message: impl Into<String>) -> Self {
        HistoryError::Cache {
            path: path.display().to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_display() {
        let err = HistoryError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "file not found",
        ));
        assert!(err.to_string().contains("I/O error"));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_io_error_from_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err: HistoryError = io_err.into();
        assert!(matches!(err, HistoryError::Io(_)));
    }

    #[test]
    fn test_consistency_display_is_message() {
        let err = HistoryError::Consistency("Cached revision 'abc' not found in the repository".into());
        assert_eq!(err.to_string(), "Cached revision 'abc' not found in the repository");
    }

    #[test]
    fn test_invalid_regex_display() {
        let regex_err = regex::Regex::new("[invalid").unwrap_err();
        let err = HistoryError::InvalidRegex {
            pattern: "[invalid".to_string(),
            source: regex_err,
        };
        assert!(err.to_string().contains("[invalid"));
    }

    #[test]
    fn test_command_timeout_display() {
        let err = HistoryError::CommandTimeout {
            command: "git log".to_string(),
            secs: 30,
        };
        let msg = err.to_string();
        assert!(msg.contains("git log"));
        assert!(msg.contains("30s"));
    }

    #[test]
    fn test_outside_source_root_display() {
        let err = HistoryError::OutsideSourceRoot {
            path: "/etc/passwd".to_string(),
            root: "/src".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("/etc/passwd"));
        assert!(msg.contains("/src"));
    }

    #[test]
    fn test_cache_helper_includes_path() {
        let err = HistoryError::cache(std::path::Path::new("/data/historycache/a.hist"), "corrupt");
        assert!(err.to_string().contains("/data/historycache/a.hist"));
        assert!(err.to_string().contains("corrupt"));
    }
}
