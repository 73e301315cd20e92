//! Annotation cache: one completed annotation per file, valid only for the
//! revision it was produced for.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::cache::storage::{self, is_fresh, load_record, remove_if_exists, remove_tree, save_record};
use crate::cache::{mirrored_dir, record_path, ANNOTATION_CACHE_DIR};
use crate::config::Configuration;
use crate::error::{HistoryError, Result};
use crate::history::annotation::Annotation;
use crate::repository::Repository;

pub const ANNOTATION_SUFFIX: &str = ".ann";

pub struct FileAnnotationCache {
    config: Arc<Configuration>,
    root: PathBuf,
}

impl FileAnnotationCache {
    pub fn new(config: Arc<Configuration>) -> Self {
        let root = config.data_root.join(ANNOTATION_CACHE_DIR);
        Self { config, root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn initialize(&self) -> Result<()> {
        storage::ensure_dir(&self.root)
    }

    fn path_for(&self, file: &Path) -> Result<PathBuf> {
        record_path(&self.root, &self.config, file, ANNOTATION_SUFFIX)
    }

    /// Cached annotation of `file`, served only when it was produced for
    /// `latest_revision` and the file has not changed since.
    pub fn get(&self, file: &Path, latest_revision: Option<&str>) -> Result<Option<Annotation>> {
        let Some(latest) = latest_revision else {
            return Ok(None);
        };
        let path = self.path_for(file)?;
        if !is_fresh(&path, file) {
            return Ok(None);
        }
        let Some(annotation) = load_record::<Annotation>(&path)? else {
            return Ok(None);
        };
        if annotation.revision.as_deref() != Some(latest) {
            debug!(file = %file.display(), latest, "Cached annotation is for an older revision");
            return Ok(None);
        }
        Ok(Some(annotation))
    }

    /// Store a completed annotation; it must name the revision it describes.
    pub fn store(&self, file: &Path, annotation: &Annotation) -> Result<()> {
        if annotation.revision.is_none() {
            return Err(HistoryError::Usage(format!(
                "annotation of {} has no revision and cannot be cached",
                file.display()
            )));
        }
        save_record(&self.path_for(file)?, annotation)
    }

    pub fn clear_file(&self, file: &Path) -> Result<()> {
        remove_if_exists(&self.path_for(file)?)?;
        Ok(())
    }

    /// Remove every annotation of `repo`. Records under `nested` (roots of
    /// repositories inside it) are left alone.
    pub fn clear(&self, repo: &dyn Repository, nested: &[PathBuf]) -> Result<()> {
        let dir = mirrored_dir(&self.root, &self.config, repo.directory())?;
        let keep = nested
            .iter()
            .map(|n| mirrored_dir(&self.root, &self.config, n))
            .collect::<Result<Vec<_>>>()?;
        remove_tree(&dir, &|d: &Path| keep.iter().any(|k| k == d))?;
        debug!(repo = %repo.directory().display(), kept = keep.len(), "Cleared annotation cache");
        Ok(())
    }
}
