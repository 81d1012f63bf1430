use std::sync::mpsc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::catalog::{MetastoreClient, fetch_catalog};
use crate::config::ResolvedConfig;
use crate::domain::{DatasetId, DatasetRecord, ProcessingOutcome};
use crate::error::SyncError;
use crate::processor::process_dataset;
use crate::runlog::RunLog;
use crate::store::OutputStore;
use crate::tracker::{RunMetadata, partition};

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Reprocess every matching dataset, ignoring run metadata.
    pub force: bool,
    /// Report what would be processed without downloading or writing.
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: String,
    pub finished_at: String,
    pub dry_run: bool,
    pub first_run: bool,
    pub catalog_entries: usize,
    pub matched: usize,
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub items: Vec<RunItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunItem {
    pub id: String,
    pub title: Option<String>,
    pub modified: Option<String>,
    pub outcome: String,
    pub path: Option<String>,
    pub rows: Option<usize>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResult {
    pub metadata_file: String,
    pub last_run: Option<String>,
    pub datasets: Vec<StatusEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusEntry {
    pub id: String,
    pub modified: String,
    pub output_path: String,
    pub output_exists: bool,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct App<C: MetastoreClient> {
    config: ResolvedConfig,
    client: C,
    store: OutputStore,
    log: RunLog,
}

impl<C: MetastoreClient> App<C> {
    pub fn new(config: ResolvedConfig, client: C) -> Self {
        let store = OutputStore::new(config.output_dir.clone());
        let log = RunLog::new(config.error_log.clone(), config.success_log.clone());
        Self {
            config,
            client,
            store,
            log,
        }
    }

    /// One full job: catalog, diff against run metadata, parallel downloads,
    /// metadata write. Only a catalog failure or a metadata write failure is
    /// returned as an error; individual datasets fail into the summary.
    pub fn run(&self, options: RunOptions, sink: &dyn ProgressSink) -> Result<RunSummary, SyncError> {
        let started_at = iso_timestamp();
        let start = Instant::now();

        let previous = RunMetadata::load(&self.config.metadata_file);
        let first_run = previous.is_none();
        let mut metadata = previous.unwrap_or_default();
        info!(
            path = %self.config.metadata_file,
            tracked = metadata.len(),
            first_run,
            "loaded run metadata"
        );

        sink.event(ProgressEvent {
            message: format!("phase=Catalog; fetching {}", self.config.base_url),
            elapsed: None,
        });
        let catalog = match fetch_catalog(
            &self.client,
            &self.config.base_url,
            &self.config.schema,
            &self.config.theme,
        ) {
            Ok(catalog) => catalog,
            Err(err) => {
                error!(error = %err, "catalog fetch failed");
                if !options.dry_run {
                    self.log
                        .error(&format!("Failed to fetch catalog {}: {err}", self.config.base_url));
                }
                return Err(err);
            }
        };
        let matched = catalog.records.len() + catalog.rejected.len();
        info!(
            total = catalog.total_entries,
            matched,
            theme = %self.config.theme,
            "catalog fetched"
        );

        let (changed, unchanged) = partition(catalog.records, &metadata, options.force);
        let mut items = Vec::with_capacity(matched);

        for record in &unchanged {
            if !options.dry_run {
                self.log
                    .success(&format!("{}: up to date ({}), skipped", record.id, record.modified));
            }
            items.push(item(record, &ProcessingOutcome::Skipped));
        }

        for rejected in &catalog.rejected {
            warn!(id = %rejected.identifier, reason = %rejected.reason, "catalog entry rejected");
            if !options.dry_run {
                self.log
                    .error(&format!("{}: {}", rejected.identifier, rejected.reason));
            }
            items.push(RunItem {
                id: rejected.identifier.clone(),
                title: None,
                modified: None,
                outcome: "failed".to_string(),
                path: None,
                rows: None,
                reason: Some(rejected.reason.clone()),
            });
        }

        if options.dry_run {
            for record in &changed {
                items.push(RunItem {
                    outcome: "pending".to_string(),
                    path: Some(self.store.dataset_path(&record.id).to_string()),
                    ..item(record, &ProcessingOutcome::Skipped)
                });
            }
            return Ok(self.summary(started_at, first_run, true, catalog.total_entries, matched, items));
        }

        sink.event(ProgressEvent {
            message: format!(
                "phase=Download; {} changed, {} unchanged, {} workers",
                changed.len(),
                unchanged.len(),
                self.config.workers
            ),
            elapsed: Some(start.elapsed()),
        });
        let outcomes = self.process_all(changed, sink)?;

        for (record, outcome) in outcomes {
            match &outcome {
                ProcessingOutcome::Success { path, rows } => {
                    metadata.record_processed(&record);
                    self.log.success(&format!(
                        "{}: processed {rows} rows -> {path} (modified {})",
                        record.id, record.modified
                    ));
                }
                ProcessingOutcome::Failed(reason) => {
                    self.log.error(&format!("{}: {reason}", record.id));
                }
                ProcessingOutcome::Skipped => {}
            }
            items.push(item(&record, &outcome));
        }

        metadata.mark_run(iso_timestamp());
        if let Err(err) = metadata.save(&self.config.metadata_file) {
            error!(error = %err, "cannot persist run metadata");
            self.log.error(&format!(
                "Failed to save run metadata {}: {err}",
                self.config.metadata_file
            ));
            return Err(err);
        }

        let summary = self.summary(started_at, first_run, false, catalog.total_entries, matched, items);
        self.log.success(&format!(
            "run complete: processed={} skipped={} failed={}",
            summary.processed, summary.skipped, summary.failed
        ));
        info!(
            processed = summary.processed,
            skipped = summary.skipped,
            failed = summary.failed,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "run complete"
        );
        Ok(summary)
    }

    /// Fans the changed records out over a bounded pool. Workers only send
    /// outcomes back; this thread is the single consumer.
    fn process_all(
        &self,
        changed: Vec<DatasetRecord>,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<(DatasetRecord, ProcessingOutcome)>, SyncError> {
        if changed.is_empty() {
            return Ok(Vec::new());
        }
        let total = changed.len();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers)
            .thread_name(|index| format!("cms-worker-{index}"))
            .build()
            .map_err(|err| SyncError::ThreadPool(err.to_string()))?;

        let (tx, rx) = mpsc::channel::<(DatasetRecord, ProcessingOutcome)>();
        let client = &self.client;
        let store = &self.store;

        let results = pool.in_place_scope(|scope| {
            for record in changed {
                let tx = tx.clone();
                scope.spawn(move |_| {
                    let start = Instant::now();
                    let outcome = process_dataset(client, &record, store);
                    match &outcome {
                        ProcessingOutcome::Failed(reason) => {
                            warn!(id = %record.id, %reason, "dataset failed");
                        }
                        _ => {
                            info!(
                                id = %record.id,
                                latency_ms = start.elapsed().as_millis() as u64,
                                "dataset processed"
                            );
                        }
                    }
                    let _ = tx.send((record, outcome));
                });
            }
            drop(tx);

            let mut results = Vec::with_capacity(total);
            for (record, outcome) in rx {
                sink.event(ProgressEvent {
                    message: format!(
                        "[{}/{total}] {} {}",
                        results.len() + 1,
                        record.id,
                        outcome.label()
                    ),
                    elapsed: None,
                });
                results.push((record, outcome));
            }
            results
        });
        Ok(results)
    }

    pub fn status(&self) -> StatusResult {
        let metadata = RunMetadata::load_or_default(&self.config.metadata_file);
        let datasets = metadata
            .processed_files
            .iter()
            .filter_map(|(key, modified)| match key.parse::<DatasetId>() {
                Ok(id) => Some(StatusEntry {
                    id: key.clone(),
                    modified: modified.clone(),
                    output_exists: self.store.exists(&id),
                    output_path: self.store.dataset_path(&id).to_string(),
                }),
                Err(err) => {
                    warn!(key = %key, error = %err, "ignoring unusable metadata key");
                    None
                }
            })
            .collect();
        StatusResult {
            metadata_file: self.config.metadata_file.to_string(),
            last_run: metadata.last_run,
            datasets,
        }
    }

    fn summary(
        &self,
        started_at: String,
        first_run: bool,
        dry_run: bool,
        catalog_entries: usize,
        matched: usize,
        mut items: Vec<RunItem>,
    ) -> RunSummary {
        items.sort_by(|a, b| a.id.cmp(&b.id));
        let count = |label: &str| items.iter().filter(|item| item.outcome == label).count();
        RunSummary {
            started_at,
            finished_at: iso_timestamp(),
            dry_run,
            first_run,
            catalog_entries,
            matched,
            processed: count("processed"),
            skipped: count("skipped"),
            failed: count("failed"),
            items,
        }
    }
}

fn item(record: &DatasetRecord, outcome: &ProcessingOutcome) -> RunItem {
    let (path, rows, reason) = match outcome {
        ProcessingOutcome::Success { path, rows } => (Some(path.to_string()), Some(*rows), None),
        ProcessingOutcome::Skipped => (None, None, None),
        ProcessingOutcome::Failed(reason) => (None, None, Some(reason.clone())),
    };
    RunItem {
        id: record.id.to_string(),
        title: record.title.clone(),
        modified: Some(record.modified.clone()),
        outcome: outcome.label().to_string(),
        path,
        rows,
        reason,
    }
}

fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}
