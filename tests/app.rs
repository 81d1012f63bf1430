use std::collections::HashMap;
use std::fs;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use cms_hospitals::app::{App, ProgressEvent, ProgressSink, RunOptions};
use cms_hospitals::catalog::MetastoreClient;
use cms_hospitals::config::ResolvedConfig;
use cms_hospitals::error::{ErrorKind, SyncError};
use cms_hospitals::tracker::RunMetadata;

const BASE: &str = "https://metastore.test/api/1/metastore/schemas/dataset/items";

struct NoopSink;

impl ProgressSink for NoopSink {
    fn event(&self, _event: ProgressEvent) {}
}

#[derive(Default)]
struct MockMetastore {
    responses: HashMap<String, Vec<u8>>,
    catalog_error: Option<String>,
}

impl MockMetastore {
    fn with_catalog(entries: &[(&str, &str)]) -> Self {
        let items: Vec<serde_json::Value> = entries
            .iter()
            .map(|(id, modified)| {
                serde_json::json!({
                    "identifier": id,
                    "title": format!("Dataset {id}"),
                    "modified": modified,
                    "theme": ["Hospitals"],
                    "distribution": [{"downloadURL": download_url(id)}]
                })
            })
            .collect();
        let mut mock = Self::default();
        mock.responses.insert(
            BASE.to_string(),
            serde_json::to_vec(&serde_json::Value::Array(items)).unwrap(),
        );
        mock
    }

    fn serve(mut self, id: &str, body: &[u8]) -> Self {
        self.responses.insert(download_url(id), body.to_vec());
        self
    }
}

impl MetastoreClient for MockMetastore {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, SyncError> {
        if url == BASE {
            if let Some(message) = &self.catalog_error {
                return Err(SyncError::Network(message.clone()));
            }
        }
        self.responses
            .get(url)
            .cloned()
            .ok_or_else(|| SyncError::HttpStatus {
                status: 404,
                message: "Not Found".to_string(),
            })
    }
}

fn download_url(id: &str) -> String {
    format!("https://files.test/{id}/data.csv")
}

struct Workspace {
    _temp: tempfile::TempDir,
    root: Utf8PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        Self { _temp: temp, root }
    }

    fn config(&self) -> ResolvedConfig {
        ResolvedConfig {
            base_url: BASE.to_string(),
            output_dir: self.root.join("hospital_data"),
            metadata_file: self.root.join("run_metadata.json"),
            error_log: self.root.join("errors.log"),
            success_log: self.root.join("success.log"),
            workers: 3,
            ..ResolvedConfig::default()
        }
    }

    fn output_files(&self) -> Vec<String> {
        let dir = self.root.join("hospital_data");
        if !dir.as_std_path().exists() {
            return Vec::new();
        }
        let mut names: Vec<String> = fs::read_dir(dir.as_std_path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    fn log_lines(&self, name: &str) -> Vec<String> {
        fs::read_to_string(self.root.join(name).as_std_path())
            .map(|text| text.lines().map(|line| line.to_string()).collect())
            .unwrap_or_default()
    }

    fn metadata(&self) -> Option<RunMetadata> {
        RunMetadata::load(&self.root.join("run_metadata.json"))
    }
}

#[test]
fn new_dataset_processed_and_unchanged_one_skipped() {
    let ws = Workspace::new();
    let mut seeded = RunMetadata::default();
    seeded
        .processed_files
        .insert("bbbb-0002".to_string(), "2024-01-01".to_string());
    seeded.save(&ws.root.join("run_metadata.json")).unwrap();

    let client = MockMetastore::with_catalog(&[("aaaa-0001", "2024-03-05"), ("bbbb-0002", "2024-01-01")])
        .serve("aaaa-0001", b"Facility ID,Hospital Type\n010001,Acute Care Hospitals\n")
        .serve("bbbb-0002", b"X\n1\n");
    let app = App::new(ws.config(), client);

    let summary = app.run(RunOptions::default(), &NoopSink).unwrap();
    assert_eq!((summary.processed, summary.skipped, summary.failed), (1, 1, 0));
    assert!(!summary.first_run);

    assert_eq!(ws.output_files(), vec!["aaaa-0001.csv"]);
    let written =
        fs::read_to_string(ws.root.join("hospital_data/aaaa-0001.csv").as_std_path()).unwrap();
    assert_eq!(written, "facility_id,hospital_type\n010001,Acute Care Hospitals\n");

    assert!(ws.log_lines("errors.log").is_empty());
    let success = ws.log_lines("success.log");
    let for_a: Vec<_> = success
        .iter()
        .filter(|line| line.contains("aaaa-0001"))
        .collect();
    assert_eq!(for_a.len(), 1);
    assert!(for_a[0].contains("processed"));

    let metadata = ws.metadata().unwrap();
    assert_eq!(metadata.processed_files["aaaa-0001"], "2024-03-05");
    assert_eq!(metadata.processed_files["bbbb-0002"], "2024-01-01");
    assert!(metadata.last_run.is_some());
}

#[test]
fn malformed_download_is_isolated() {
    let ws = Workspace::new();
    let client = MockMetastore::with_catalog(&[("cccc-0003", "2024-02-01"), ("dddd-0004", "2024-02-01")])
        .serve(
            "cccc-0003",
            b"<!DOCTYPE html><html><body><h1>502 Bad Gateway</h1></body></html>",
        )
        .serve("dddd-0004", b"State,Score\nAL,3\n");
    let app = App::new(ws.config(), client);

    let summary = app.run(RunOptions::default(), &NoopSink).unwrap();
    assert_eq!((summary.processed, summary.failed), (1, 1));

    assert_eq!(ws.output_files(), vec!["dddd-0004.csv"]);
    let errors = ws.log_lines("errors.log");
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("cccc-0003"));

    let metadata = ws.metadata().unwrap();
    assert!(!metadata.processed_files.contains_key("cccc-0003"));
    assert!(metadata.processed_files.contains_key("dddd-0004"));
}

#[test]
fn failed_dataset_is_retried_next_run() {
    let ws = Workspace::new();
    let app = App::new(
        ws.config(),
        MockMetastore::with_catalog(&[("eeee-0005", "2024-04-01")]),
    );
    let first = app.run(RunOptions::default(), &NoopSink).unwrap();
    assert_eq!(first.failed, 1);
    assert!(first.items[0].reason.as_deref().unwrap().contains("404"));

    let app = App::new(
        ws.config(),
        MockMetastore::with_catalog(&[("eeee-0005", "2024-04-01")]).serve("eeee-0005", b"A\n1\n"),
    );
    let second = app.run(RunOptions::default(), &NoopSink).unwrap();
    assert_eq!(second.processed, 1);
}

#[test]
fn catalog_failure_aborts_without_side_effects() {
    let ws = Workspace::new();
    let client = MockMetastore {
        catalog_error: Some("connection refused".to_string()),
        ..MockMetastore::default()
    };
    let app = App::new(ws.config(), client);

    let err = app.run(RunOptions::default(), &NoopSink).unwrap_err();
    assert_matches!(err, SyncError::Network(_));
    assert_eq!(err.kind(), ErrorKind::Network);

    assert!(ws.output_files().is_empty());
    assert!(ws.metadata().is_none());
    assert_eq!(ws.log_lines("errors.log").len(), 1);
}

#[test]
fn malformed_catalog_is_format_error() {
    let ws = Workspace::new();
    let mut client = MockMetastore::default();
    client
        .responses
        .insert(BASE.to_string(), b"<html>maintenance</html>".to_vec());
    let app = App::new(ws.config(), client);

    let err = app.run(RunOptions::default(), &NoopSink).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Format);
    assert!(ws.metadata().is_none());
}

#[test]
fn metadata_write_failure_aborts_run() {
    let ws = Workspace::new();
    fs::write(ws.root.join("blocker").as_std_path(), b"not a directory").unwrap();
    let config = ResolvedConfig {
        metadata_file: ws.root.join("blocker/run_metadata.json"),
        ..ws.config()
    };
    let client =
        MockMetastore::with_catalog(&[("ffff-0006", "2024-05-01")]).serve("ffff-0006", b"A\n1\n");
    let app = App::new(config, client);

    let err = app.run(RunOptions::default(), &NoopSink).unwrap_err();
    assert_matches!(err, SyncError::Filesystem(_));
    assert_eq!(ws.log_lines("errors.log").len(), 1);
}

#[test]
fn corrupt_metadata_reprocesses_everything() {
    let ws = Workspace::new();
    fs::write(ws.root.join("run_metadata.json").as_std_path(), b"{ truncated").unwrap();
    let client =
        MockMetastore::with_catalog(&[("gggg-0007", "2024-06-01")]).serve("gggg-0007", b"A\n1\n");
    let app = App::new(ws.config(), client);

    let summary = app.run(RunOptions::default(), &NoopSink).unwrap();
    assert!(summary.first_run);
    assert_eq!(summary.processed, 1);
    assert_eq!(ws.metadata().unwrap().len(), 1);
}

#[test]
fn rejected_catalog_entries_are_reported() {
    let ws = Workspace::new();
    let mut client = MockMetastore::default();
    client.responses.insert(
        BASE.to_string(),
        br#"[{"identifier": "hhhh-0008", "modified": "2024-01-01", "theme": ["Hospitals"], "distribution": []}]"#
            .to_vec(),
    );
    let app = App::new(ws.config(), client);

    let summary = app.run(RunOptions::default(), &NoopSink).unwrap();
    assert_eq!(summary.failed, 1);
    let errors = ws.log_lines("errors.log");
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("hhhh-0008"));
    assert!(ws.metadata().unwrap().is_empty());
}

#[test]
fn many_datasets_across_workers() {
    let ws = Workspace::new();
    let ids: Vec<String> = (0..24).map(|n| format!("ds{n:02}-xxxx")).collect();
    let entries: Vec<(&str, &str)> = ids.iter().map(|id| (id.as_str(), "2024-07-01")).collect();
    let mut client = MockMetastore::with_catalog(&entries);
    for id in &ids {
        client = client.serve(id, format!("Row ID,Value\n{id},1\n").as_bytes());
    }
    let app = App::new(ws.config(), client);

    let summary = app.run(RunOptions::default(), &NoopSink).unwrap();
    assert_eq!(summary.processed, 24);
    assert_eq!(ws.output_files().len(), 24);
    assert_eq!(ws.metadata().unwrap().len(), 24);

    let again = app.run(RunOptions::default(), &NoopSink).unwrap();
    assert_eq!((again.processed, again.skipped), (0, 24));
}

#[test]
fn dry_run_touches_nothing() {
    let ws = Workspace::new();
    let client =
        MockMetastore::with_catalog(&[("iiii-0009", "2024-08-01")]).serve("iiii-0009", b"A\n1\n");
    let app = App::new(ws.config(), client);

    let summary = app
        .run(
            RunOptions {
                force: false,
                dry_run: true,
            },
            &NoopSink,
        )
        .unwrap();
    assert!(summary.dry_run);
    assert_eq!(summary.items[0].outcome, "pending");
    assert!(ws.output_files().is_empty());
    assert!(ws.metadata().is_none());
    assert!(ws.log_lines("success.log").is_empty());
}

#[test]
fn incomplete_catalog_entry_does_not_abort_the_run() {
    let ws = Workspace::new();
    let mut client = MockMetastore::default().serve("jjjj-0010", b"Facility ID\n010001\n");
    client.responses.insert(
        BASE.to_string(),
        serde_json::to_vec(&serde_json::json!([
            {
                "identifier": "jjjj-0010",
                "modified": "2024-09-01",
                "theme": ["Hospitals"],
                "distribution": [{"downloadURL": download_url("jjjj-0010")}]
            },
            {
                "identifier": "kkkk-0011",
                "theme": ["Hospitals"],
                "distribution": [{"downloadURL": download_url("kkkk-0011")}]
            }
        ]))
        .unwrap(),
    );
    let app = App::new(ws.config(), client);

    let summary = app.run(RunOptions::default(), &NoopSink).unwrap();
    assert_eq!((summary.processed, summary.failed), (1, 1));
    assert_eq!(ws.output_files(), vec!["jjjj-0010.csv"]);
    let errors = ws.log_lines("errors.log");
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("kkkk-0011"));
    let metadata = ws.metadata().unwrap();
    assert!(!metadata.processed_files.contains_key("kkkk-0011"));
}

#[test]
fn status_reports_outputs_from_the_store() {
    let ws = Workspace::new();
    let client =
        MockMetastore::with_catalog(&[("llll-0012", "2024-10-01")]).serve("llll-0012", b"A\n1\n");
    let app = App::new(ws.config(), client);
    app.run(RunOptions::default(), &NoopSink).unwrap();
    fs::remove_file(ws.root.join("hospital_data/llll-0012.csv").as_std_path()).unwrap();

    let mut seeded = ws.metadata().unwrap();
    seeded
        .processed_files
        .insert("mmmm-0013".to_string(), "2024-10-01".to_string());
    seeded.save(&ws.root.join("run_metadata.json")).unwrap();
    fs::create_dir_all(ws.root.join("hospital_data").as_std_path()).unwrap();
    fs::write(ws.root.join("hospital_data/mmmm-0013.csv").as_std_path(), b"a\n").unwrap();

    let status = app.status();
    assert!(status.last_run.is_some());
    let entries: Vec<_> = status
        .datasets
        .iter()
        .map(|entry| (entry.id.as_str(), entry.output_exists))
        .collect();
    assert_eq!(entries, vec![("llll-0012", false), ("mmmm-0013", true)]);
    assert!(status.datasets[1].output_path.ends_with("hospital_data/mmmm-0013.csv"));
}
