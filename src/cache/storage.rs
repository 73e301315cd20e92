//! Record I/O shared by the history and annotation caches.
//!
//! A record is the magic bytes followed by an LZ4 frame of bincode data
//! (`(format_version, payload)`). Writes go to a temporary file in the same
//! directory and are renamed into place, so readers see either the old or
//! the new record, never a torn one.

use std::fs;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{HistoryError, Result};
use crate::stable_hash;

/// Magic bytes identifying LZ4-compressed records.
pub const LZ4_MAGIC: &[u8; 4] = b"LZ4S";

/// Bumped whenever a record payload changes shape.
pub const FORMAT_VERSION: u32 = 1;

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Temporary sibling used for atomic replacement, unique per write. Kept short
/// so that it fits even when the final name is already at the length limit.
fn tmp_path_for(path: &Path) -> PathBuf {
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let seq = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let unique = stable_hash(&[name.as_bytes(), &std::process::id().to_le_bytes()]);
    path.with_file_name(format!(".{:016x}.{}.tmp", unique, seq))
}

/// Create `dir` and its parents; concurrent creators are fine.
pub fn ensure_dir(dir: &Path) -> Result<()> {
    match fs::create_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && dir.is_dir() => Ok(()),
        Err(e) => Err(HistoryError::cache(dir, format!("cannot create directory: {}", e))),
    }
}

/// Replace `path` with `bytes` atomically.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let tmp = tmp_path_for(path);
    fs::write(&tmp, bytes).map_err(|e| HistoryError::cache(&tmp, format!("write failed: {}", e)))?;
    rename_into_place(&tmp, path)
}

fn rename_into_place(tmp: &Path, path: &Path) -> Result<()> {
    fs::rename(tmp, path).map_err(|e| {
        let _ = fs::remove_file(tmp);
        HistoryError::cache(path, format!("cannot rename temporary file: {}", e))
    })
}

/// Serialize `data` into the record at `path` (bincode + LZ4, atomic replace).
pub fn save_record<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let tmp = tmp_path_for(path);
    let written = (|| -> Result<()> {
        let file = fs::File::create(&tmp)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(LZ4_MAGIC)?;
        let mut encoder = lz4_flex::frame::FrameEncoder::new(writer);
        bincode::serialize_into(&mut encoder, &(FORMAT_VERSION, data))?;
        let mut writer = encoder
            .finish()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        writer.flush()?;
        Ok(())
    })();
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp);
        return Err(HistoryError::cache(path, format!("write failed: {}", e)));
    }
    rename_into_place(&tmp, path)?;
    debug!(path = %path.display(), "Stored cache record");
    Ok(())
}

/// Load the record at `path`. A missing file is `Ok(None)`; anything unreadable is a cache error.
pub fn load_record<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let file = match fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(HistoryError::cache(path, format!("cannot open: {}", e))),
    };
    let mut reader = BufReader::new(file);

    let mut magic = [0u8; 4];
    reader
        .read_exact(&mut magic)
        .map_err(|e| HistoryError::cache(path, format!("read error (magic bytes): {}", e)))?;
    if &magic != LZ4_MAGIC {
        return Err(HistoryError::cache(path, "not a cache record"));
    }

    let decoder = lz4_flex::frame::FrameDecoder::new(reader);
    let (version, payload): (u32, T) = bincode::deserialize_from(decoder)
        .map_err(|e| HistoryError::cache(path, format!("LZ4 deserialization failed: {}", e)))?;
    if version != FORMAT_VERSION {
        return Err(HistoryError::cache(
            path,
            format!("format version mismatch: file has {}, expected {}", version, FORMAT_VERSION),
        ));
    }
    Ok(Some(payload))
}

/// Remove a file, treating "already gone" as success.
pub fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(HistoryError::cache(path, format!("cannot remove: {}", e))),
    }
}

/// Remove `dir` recursively. Subdirectories for which `keep` holds are left in
/// place, and so are their ancestors.
pub fn remove_tree(dir: &Path, keep: &dyn Fn(&Path) -> bool) -> Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(HistoryError::cache(dir, format!("cannot list: {}", e))),
    };
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            if !keep(&path) {
                remove_tree(&path, keep)?;
            }
        } else {
            remove_if_exists(&path)?;
        }
    }
    // Only succeeds when nothing was kept below it.
    let _ = fs::remove_dir(dir);
    Ok(())
}

pub fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// A record is fresh unless the source file was modified after it was written.
pub fn is_fresh(record: &Path, source: &Path) -> bool {
    match (modified(record), modified(source)) {
        (Some(r), Some(s)) => r >= s,
        (Some(_), None) => true,
        (None, _) => false,
    }
}
