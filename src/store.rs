use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::Builder;

use crate::domain::DatasetId;
use crate::error::SyncError;

/// The output directory: one `<identifier>.csv` per processed dataset.
#[derive(Debug, Clone)]
pub struct OutputStore {
    root: Utf8PathBuf,
}

impl OutputStore {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn dataset_path(&self, id: &DatasetId) -> Utf8PathBuf {
        self.root.join(id.file_name())
    }

    pub fn ensure_root(&self) -> Result<(), SyncError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| SyncError::Filesystem(format!("create {}: {err}", self.root)))
    }

    pub fn exists(&self, id: &DatasetId) -> bool {
        self.dataset_path(id).as_std_path().exists()
    }

    /// Writes through a temp file in the same directory, so readers never see
    /// a half-written CSV at the final path.
    pub fn write_dataset(&self, id: &DatasetId, content: &[u8]) -> Result<Utf8PathBuf, SyncError> {
        self.ensure_root()?;
        let path = self.dataset_path(id);
        write_bytes_atomic(&path, content)?;
        Ok(path)
    }
}

pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), SyncError> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or(Utf8Path::new("."));
    let mut temp = Builder::new()
        .prefix(".cms-hospitals")
        .suffix(".part")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| SyncError::Filesystem(format!("temp file in {parent}: {err}")))?;
    temp.write_all(content)
        .map_err(|err| SyncError::Filesystem(format!("write {path}: {err}")))?;
    temp.persist(path.as_std_path())
        .map_err(|err| SyncError::Filesystem(format!("persist {path}: {}", err.error)))?;
    Ok(())
}
