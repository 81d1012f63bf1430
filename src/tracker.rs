use std::collections::BTreeMap;
use std::fs;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::{DatasetId, DatasetRecord};
use crate::error::SyncError;
use crate::store::write_bytes_atomic;

/// Which datasets were processed, keyed by identifier, with the catalog
/// `modified` value seen at the time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetadata {
    #[serde(default)]
    pub last_run: Option<String>,
    #[serde(default)]
    pub processed_files: BTreeMap<String, String>,
}

impl RunMetadata {
    /// `None` when the file is missing, unreadable or not valid metadata.
    pub fn load(path: &Utf8Path) -> Option<Self> {
        let content = match fs::read_to_string(path.as_std_path()) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                warn!(path = %path, error = %err, "run metadata unreadable; treating as first run");
                return None;
            }
        };
        match serde_json::from_str(&content) {
            Ok(metadata) => Some(metadata),
            Err(err) => {
                warn!(path = %path, error = %err, "run metadata corrupt; treating as first run");
                None
            }
        }
    }

    pub fn load_or_default(path: &Utf8Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    pub fn needs_processing(&self, record: &DatasetRecord) -> bool {
        self.stored(&record.id)
            .is_none_or(|stored| stored != record.modified)
    }

    pub fn record_processed(&mut self, record: &DatasetRecord) {
        self.processed_files
            .insert(record.id.as_str().to_string(), record.modified.clone());
    }

    pub fn stored(&self, id: &DatasetId) -> Option<&str> {
        self.processed_files.get(id.as_str()).map(|value| value.as_str())
    }

    pub fn mark_run(&mut self, timestamp: String) {
        self.last_run = Some(timestamp);
    }

    pub fn len(&self) -> usize {
        self.processed_files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processed_files.is_empty()
    }

    pub fn save(&self, path: &Utf8Path) -> Result<(), SyncError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_str().is_empty()) {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| SyncError::Filesystem(format!("create {parent}: {err}")))?;
        }
        let content = serde_json::to_vec_pretty(self)
            .map_err(|err| SyncError::Filesystem(err.to_string()))?;
        write_bytes_atomic(path, &content)
    }
}

/// Splits records into (changed, unchanged). `force` marks everything changed.
pub fn partition(
    records: Vec<DatasetRecord>,
    metadata: &RunMetadata,
    force: bool,
) -> (Vec<DatasetRecord>, Vec<DatasetRecord>) {
    records
        .into_iter()
        .partition(|record| force || metadata.needs_processing(record))
}
