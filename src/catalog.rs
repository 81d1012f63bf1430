use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;
use tracing::debug;

use crate::config::CatalogSchema;
use crate::domain::{Catalog, DatasetId, DatasetRecord, RejectedEntry};
use crate::error::SyncError;

/// One GET per call, no retries. Used for both the catalog listing and the
/// CSV downloads.
pub trait MetastoreClient: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, SyncError>;
}

#[derive(Clone)]
pub struct MetastoreHttpClient {
    client: Client,
}

impl MetastoreHttpClient {
    pub fn new(timeout_secs: u64) -> Result<Self, SyncError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("cms-hospitals/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| SyncError::InvalidConfig(err.to_string()))?,
        );
        let timeout = (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| SyncError::Network(err.to_string()))?;
        Ok(Self { client })
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, SyncError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .ok()
            .map(|text| text.chars().take(200).collect::<String>())
            .filter(|text| !text.trim().is_empty())
            .unwrap_or_else(|| "request failed".to_string());
        Err(SyncError::HttpStatus { status, message })
    }
}

impl MetastoreClient for MetastoreHttpClient {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, SyncError> {
        debug!(url, "GET");
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| SyncError::Network(err.to_string()))?;
        let response = Self::handle_status(response)?;
        let bytes = response
            .bytes()
            .map_err(|err| SyncError::Network(err.to_string()))?;
        Ok(bytes.to_vec())
    }
}

/// Downloads the catalog listing and keeps the entries tagged with `theme`.
pub fn fetch_catalog<C: MetastoreClient + ?Sized>(
    client: &C,
    base_url: &str,
    schema: &CatalogSchema,
    theme: &str,
) -> Result<Catalog, SyncError> {
    let body = client.fetch(base_url)?;
    parse_catalog(&body, schema, theme)
}

pub fn parse_catalog(body: &[u8], schema: &CatalogSchema, theme: &str) -> Result<Catalog, SyncError> {
    let raw_json: Value = serde_json::from_slice(body)
        .map_err(|err| SyncError::Format(format!("catalog is not valid JSON: {err}")))?;
    let entries = raw_json
        .as_array()
        .ok_or_else(|| SyncError::Format("catalog is not a JSON array".to_string()))?;

    let mut catalog = Catalog {
        total_entries: entries.len(),
        ..Catalog::default()
    };

    for entry in entries {
        let themes = entry_themes(entry, &schema.theme);
        if !themes.iter().any(|value| value == theme) {
            continue;
        }

        let Some(identifier) = entry
            .get(&schema.identifier)
            .and_then(|value| value.as_str())
        else {
            catalog.rejected.push(RejectedEntry {
                identifier: "<unknown>".to_string(),
                reason: format!("no {:?} field", schema.identifier),
            });
            continue;
        };
        let Some(modified) = entry
            .get(&schema.modified)
            .and_then(|value| value.as_str())
        else {
            catalog.rejected.push(RejectedEntry {
                identifier: identifier.to_string(),
                reason: format!("no {:?} field", schema.modified),
            });
            continue;
        };

        let id = match identifier.parse::<DatasetId>() {
            Ok(id) => id,
            Err(err) => {
                catalog.rejected.push(RejectedEntry {
                    identifier: identifier.to_string(),
                    reason: err.to_string(),
                });
                continue;
            }
        };

        let Some(download_url) = first_download_url(entry, schema) else {
            catalog.rejected.push(RejectedEntry {
                identifier: identifier.to_string(),
                reason: "no download URL in catalog entry".to_string(),
            });
            continue;
        };

        let title = entry
            .get(&schema.title)
            .and_then(|value| value.as_str())
            .map(|value| value.to_string());

        catalog.records.push(DatasetRecord {
            id,
            title,
            download_url,
            modified: modified.to_string(),
            themes,
        });
    }

    Ok(catalog)
}

fn entry_themes(entry: &Value, field: &str) -> Vec<String> {
    match entry.get(field) {
        Some(Value::Array(values)) => values
            .iter()
            .filter_map(|value| value.as_str())
            .map(|value| value.to_string())
            .collect(),
        Some(Value::String(value)) => vec![value.clone()],
        _ => Vec::new(),
    }
}

fn first_download_url(entry: &Value, schema: &CatalogSchema) -> Option<String> {
    entry
        .get(&schema.distribution)
        .and_then(|value| value.as_array())?
        .iter()
        .filter_map(|dist| dist.get(&schema.download_url))
        .filter_map(|value| value.as_str())
        .map(|value| value.trim())
        .find(|value| !value.is_empty())
        .map(|value| value.to_string())
}
