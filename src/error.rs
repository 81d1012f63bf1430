use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum SyncError {
    #[error("request failed: {0}")]
    Network(String),

    #[error("server returned status {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error("malformed response: {0}")]
    Format(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid dataset identifier: {0:?}")]
    InvalidDatasetId(String),

    #[error("failed to start worker pool: {0}")]
    ThreadPool(String),
}

/// Coarse grouping used for exit codes and log wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    Format,
    Io,
    Config,
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Network(_) | SyncError::HttpStatus { .. } => ErrorKind::Network,
            SyncError::Format(_) | SyncError::InvalidDatasetId(_) => ErrorKind::Format,
            SyncError::Filesystem(_) | SyncError::ThreadPool(_) => ErrorKind::Io,
            SyncError::ConfigRead(_) | SyncError::ConfigParse(_) | SyncError::InvalidConfig(_) => {
                ErrorKind::Config
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_group_variants() {
        assert_eq!(SyncError::Network("x".into()).kind(), ErrorKind::Network);
        assert_eq!(
            SyncError::HttpStatus {
                status: 503,
                message: "busy".into()
            }
            .kind(),
            ErrorKind::Network
        );
        assert_eq!(SyncError::Format("x".into()).kind(), ErrorKind::Format);
        assert_eq!(SyncError::Filesystem("x".into()).kind(), ErrorKind::Io);
        assert_eq!(SyncError::InvalidConfig("x".into()).kind(), ErrorKind::Config);
    }
}
