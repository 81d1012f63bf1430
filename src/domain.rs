use std::fmt;
use std::str::FromStr;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Catalog identifier of a dataset, e.g. `xubh-q36u`. Also used as the
/// output file stem, so anything that could escape the output directory is
/// rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DatasetId(String);

impl DatasetId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn file_name(&self) -> String {
        format!("{}.csv", self.0)
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DatasetId {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let is_valid = !trimmed.is_empty()
            && !trimmed.starts_with('.')
            && !trimmed.contains("..")
            && trimmed
                .chars()
                .all(|ch| !ch.is_control() && !matches!(ch, '/' | '\\' | ':'));
        if !is_valid {
            return Err(SyncError::InvalidDatasetId(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetRecord {
    pub id: DatasetId,
    pub title: Option<String>,
    pub download_url: String,
    pub modified: String,
    pub themes: Vec<String>,
}

/// A catalog entry that matched the theme but could not become a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedEntry {
    pub identifier: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub records: Vec<DatasetRecord>,
    pub rejected: Vec<RejectedEntry>,
    pub total_entries: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingOutcome {
    Success { path: Utf8PathBuf, rows: usize },
    Skipped,
    Failed(String),
}

impl ProcessingOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ProcessingOutcome::Success { .. } => "processed",
            ProcessingOutcome::Skipped => "skipped",
            ProcessingOutcome::Failed(_) => "failed",
        }
    }
}
