use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

pub const DEFAULT_BASE_URL: &str =
    "https://data.cms.gov/provider-data/api/1/metastore/schemas/dataset/items";
pub const DEFAULT_CONFIG_FILE: &str = "cms-hospitals.json";
pub const DEFAULT_THEME: &str = "Hospitals";
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Field names used to read catalog entries. Defaults match the CMS
/// metastore `dataset/items` listing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CatalogSchema {
    pub identifier: String,
    pub theme: String,
    pub modified: String,
    pub title: String,
    pub distribution: String,
    pub download_url: String,
}

impl Default for CatalogSchema {
    fn default() -> Self {
        Self {
            identifier: "identifier".to_string(),
            theme: "theme".to_string(),
            modified: "modified".to_string(),
            title: "title".to_string(),
            distribution: "distribution".to_string(),
            download_url: "downloadURL".to_string(),
        }
    }
}

/// On-disk config file. Every field is optional.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub output_dir: Option<Utf8PathBuf>,
    #[serde(default)]
    pub metadata_file: Option<Utf8PathBuf>,
    #[serde(default)]
    pub theme: Option<String>,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub error_log: Option<Utf8PathBuf>,
    #[serde(default)]
    pub success_log: Option<Utf8PathBuf>,
    #[serde(default)]
    pub schema: Option<CatalogSchema>,
}

/// Values given on the command line; applied last.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub base_url: Option<String>,
    pub output_dir: Option<Utf8PathBuf>,
    pub metadata_file: Option<Utf8PathBuf>,
    pub theme: Option<String>,
    pub workers: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedConfig {
    pub base_url: String,
    pub output_dir: Utf8PathBuf,
    pub metadata_file: Utf8PathBuf,
    pub theme: String,
    pub workers: usize,
    /// Per-request timeout; zero disables it.
    pub timeout_secs: u64,
    pub error_log: Utf8PathBuf,
    pub success_log: Utf8PathBuf,
    pub schema: CatalogSchema,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            output_dir: Utf8PathBuf::from("hospital_data"),
            metadata_file: Utf8PathBuf::from("run_metadata.json"),
            theme: DEFAULT_THEME.to_string(),
            workers: DEFAULT_WORKERS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            error_log: Utf8PathBuf::from("errors.log"),
            success_log: Utf8PathBuf::from("success.log"),
            schema: CatalogSchema::default(),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Defaults, then the config file, then `CMS_*` environment variables,
    /// then command-line overrides.
    pub fn resolve(
        path: Option<&str>,
        overrides: &ConfigOverrides,
    ) -> Result<ResolvedConfig, SyncError> {
        let config = Self::read_file(path)?;
        Self::resolve_with(config, |key| std::env::var(key).ok(), overrides)
    }

    pub fn read_file(path: Option<&str>) -> Result<Config, SyncError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| SyncError::ConfigRead(config_path.clone()))?;
        serde_json::from_str(&content).map_err(|err| SyncError::ConfigParse(err.to_string()))
    }

    pub fn resolve_with<F>(
        config: Config,
        env: F,
        overrides: &ConfigOverrides,
    ) -> Result<ResolvedConfig, SyncError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut resolved = ResolvedConfig::default();

        if let Some(value) = config.base_url {
            resolved.base_url = value;
        }
        if let Some(value) = config.output_dir {
            resolved.output_dir = value;
        }
        if let Some(value) = config.metadata_file {
            resolved.metadata_file = value;
        }
        if let Some(value) = config.theme {
            resolved.theme = value;
        }
        if let Some(value) = config.workers {
            resolved.workers = value;
        }
        if let Some(value) = config.timeout_secs {
            resolved.timeout_secs = value;
        }
        if let Some(value) = config.error_log {
            resolved.error_log = value;
        }
        if let Some(value) = config.success_log {
            resolved.success_log = value;
        }
        if let Some(value) = config.schema {
            resolved.schema = value;
        }

        if let Some(value) = env("CMS_BASE_URL") {
            resolved.base_url = value;
        }
        if let Some(value) = env("CMS_OUTPUT_DIR") {
            resolved.output_dir = Utf8PathBuf::from(value);
        }
        if let Some(value) = env("CMS_METADATA_FILE") {
            resolved.metadata_file = Utf8PathBuf::from(value);
        }
        if let Some(value) = env("CMS_THEME") {
            resolved.theme = value;
        }
        if let Some(value) = env("CMS_WORKERS") {
            resolved.workers = parse_number("CMS_WORKERS", &value)?;
        }
        if let Some(value) = env("CMS_TIMEOUT_SECS") {
            resolved.timeout_secs = parse_number("CMS_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = env("CMS_ERROR_LOG") {
            resolved.error_log = Utf8PathBuf::from(value);
        }
        if let Some(value) = env("CMS_SUCCESS_LOG") {
            resolved.success_log = Utf8PathBuf::from(value);
        }

        if let Some(value) = &overrides.base_url {
            resolved.base_url = value.clone();
        }
        if let Some(value) = &overrides.output_dir {
            resolved.output_dir = value.clone();
        }
        if let Some(value) = &overrides.metadata_file {
            resolved.metadata_file = value.clone();
        }
        if let Some(value) = &overrides.theme {
            resolved.theme = value.clone();
        }
        if let Some(value) = overrides.workers {
            resolved.workers = value;
        }

        resolved.validate()?;
        Ok(resolved)
    }
}

impl ResolvedConfig {
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.workers == 0 {
            return Err(SyncError::InvalidConfig(
                "workers must be at least 1".to_string(),
            ));
        }
        if self.theme.trim().is_empty() {
            return Err(SyncError::InvalidConfig("theme must not be empty".to_string()));
        }
        if self.base_url.trim().is_empty() {
            return Err(SyncError::InvalidConfig(
                "base_url must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, SyncError> {
    value
        .trim()
        .parse()
        .map_err(|_| SyncError::InvalidConfig(format!("{key} is not a number: {value:?}")))
}
