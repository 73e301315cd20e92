//! On-disk caches derived from repository history.
//!
//! Both caches mirror the source tree below their own directory in the data
//! root: `<data_root>/historycache/proj/src/main.c.hist` holds the history of
//! `<source_root>/proj/src/main.c`. Per-repository bookkeeping files live in the
//! repository's mirrored root directory.

use std::path::{Path, PathBuf};

use crate::config::Configuration;
use crate::error::Result;
use crate::stable_hash;

pub mod annotation;
pub mod history;
pub(crate) mod storage;

pub const HISTORY_CACHE_DIR: &str = "historycache";
pub const ANNOTATION_CACHE_DIR: &str = "annotationcache";

/// Longest file name most filesystems accept, in bytes.
pub const MAX_NAME_BYTES: usize = 255;

/// Width of the hex hash inserted into shortened names.
const HASH_HEX_LEN: usize = 16;

/// Cache directory that mirrors `dir` (a directory under the source root).
pub(crate) fn mirrored_dir(cache_root: &Path, config: &Configuration, dir: &Path) -> Result<PathBuf> {
    let rel = config.path_relative_to_source_root(dir)?;
    let mut out = cache_root.to_path_buf();
    for part in rel.split('/').filter(|p| !p.is_empty()) {
        out.push(part);
    }
    Ok(out)
}

/// Record path for `file`: its mirrored location with `suffix` appended to the
/// file name, shortened when the result would be too long for the filesystem.
pub(crate) fn record_path(cache_root: &Path, config: &Configuration, file: &Path, suffix: &str) -> Result<PathBuf> {
    let rel = config.path_relative_to_source_root(file)?;
    let mut parts: Vec<&str> = rel.split('/').filter(|p| !p.is_empty()).collect();
    let name = parts.pop().unwrap_or_default();
    let mut out = cache_root.to_path_buf();
    for part in parts {
        out.push(part);
    }
    out.push(tandem_name(name, suffix));
    Ok(out)
}

/// `name + suffix`, or a shortened name with a stable hash of `name` inserted
/// before the extension when that would exceed [`MAX_NAME_BYTES`].
///
/// Two long names sharing a prefix still map to distinct records because the
/// hash covers the full original name.
pub fn tandem_name(name: &str, suffix: &str) -> String {
    if name.len() + suffix.len() <= MAX_NAME_BYTES {
        return format!("{}{}", name, suffix);
    }

    let (stem, ext) = match name.rfind('.') {
        Some(dot) if dot > 0 && name.len() - dot <= 16 => name.split_at(dot),
        _ => (name, ""),
    };
    let hash = stable_hash(&[name.as_bytes()]);
    let budget = MAX_NAME_BYTES
        .saturating_sub(suffix.len() + ext.len() + HASH_HEX_LEN + 1);

    let mut cut = budget.min(stem.len());
    while cut > 0 && !stem.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}~{:016x}{}{}", &stem[..cut], hash, ext, suffix)
}
