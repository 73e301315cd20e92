//! # repohist: multi-VCS history and annotation cache
//!
//! Discovers version-control repositories under a source root, maps any file to
//! the repository that owns it, and serves per-file change history and
//! line annotations either from a persistent, incrementally-updated on-disk cache
//! or from a live query against the VCS client.
//!
//! ## Library usage
//!
//! Construct a [`Configuration`], build a [`HistoryOrchestrator`] from it, register
//! repositories with [`HistoryOrchestrator::add_repositories`], then query
//! [`HistoryOrchestrator::get_history`] / [`HistoryOrchestrator::annotate`].
//! The `repohist` binary is a thin CLI over this library.

use std::path::{Component, Path, PathBuf};

pub mod accept;
pub mod cache;
pub mod config;
pub mod error;
pub mod exec;
pub mod history;
pub mod lookup;
pub mod orchestrator;
pub mod pool;
pub mod registry;
pub mod repository;

#[cfg(test)]
pub(crate) mod testing;

pub use accept::PathAccepter;
pub use cache::annotation::FileAnnotationCache;
pub use cache::history::{FileHistoryCache, StoreSummary};
pub use config::{Configuration, RemoteScm, RepositoryOverrides};
pub use error::{HistoryError, Result};
pub use exec::CommandTimeoutType;
pub use history::annotation::{Annotation, AnnotationLine};
pub use history::tags::TagEntry;
pub use history::{History, HistoryEntry};
pub use lookup::PathLookupCache;
pub use orchestrator::HistoryOrchestrator;
pub use registry::RepositoryRegistry;
pub use repository::factory::RepositoryFactory;
pub use repository::{Repository, RepositoryInfo};

// ─── Stable hashing ─────────────────────────────────────────────────

/// Stable FNV-1a hash (deterministic across Rust versions, unlike `DefaultHasher`).
///
/// Accepts multiple byte slices that are fed into the hash sequentially.
#[must_use]
pub fn stable_hash(parts: &[&[u8]]) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01B3;
    let mut hash = FNV_OFFSET;
    for part in parts {
        for &byte in *part {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(FNV_PRIME);
        }
    }
    hash
}

// ─── Path helpers ───────────────────────────────────────────────────

/// Strip the `\\?\` extended-length path prefix that Windows canonicalize adds.
#[must_use]
pub fn clean_path(p: &str) -> String {
    p.strip_prefix(r"\\?\").unwrap_or(p).to_string()
}

/// String form of a path, used as a map key for registered roots and memo entries.
#[must_use]
pub fn path_key(path: &Path) -> String {
    clean_path(&path.to_string_lossy())
}

/// Make a path absolute against the current directory and fold `.`/`..`
/// components lexically. Does not touch the filesystem.
#[must_use]
pub fn normalize_absolute(path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("/"))
            .join(path)
    };

    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Canonical form of a path if it exists, otherwise its lexically normalized absolute form.
#[must_use]
pub fn canonical_or_absolute(path: &Path) -> PathBuf {
    match std::fs::canonicalize(path) {
        Ok(p) => PathBuf::from(clean_path(&p.to_string_lossy())),
        Err(_) => normalize_absolute(path),
    }
}

/// Repository-relative form of `file` with forward slashes (`""` for the root itself).
///
/// Both paths are compared in canonical form so that a file reached through a
/// symlink still resolves against its real repository root.
#[must_use]
pub fn relative_to(root: &Path, file: &Path) -> Option<String> {
    let root = canonical_or_absolute(root);
    let file = canonical_or_absolute(file);
    let rel = file.strip_prefix(&root).ok()?;
    Some(rel.to_string_lossy().replace('\\', "/"))
}


// ─── Property-based tests (proptest) ─────────────────────────────────

#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn stable_hash_matches_concatenation(a in ".{0,32}", b in ".{0,32}") {
            let joined = format!("{}{}", a, b);
            prop_assert_eq!(
                stable_hash(&[a.as_bytes(), b.as_bytes()]),
                stable_hash(&[joined.as_bytes()])
            );
        }

        #[test]
        fn normalize_absolute_has_no_dot_components(parts in proptest::collection::vec("[a-z]{1,6}|\\.|\\.\\.", 0..10)) {
            let p = format!("/{}", parts.join("/"));
            let normalized = normalize_absolute(Path::new(&p));
            prop_assert!(normalized.is_absolute());
            for c in normalized.components() {
                prop_assert!(!matches!(c, Component::CurDir | Component::ParentDir));
            }
        }
    }
}
