use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use cms_hospitals::app::{App, RunOptions};
use cms_hospitals::catalog::{MetastoreClient, MetastoreHttpClient};
use cms_hospitals::config::{ConfigLoader, ConfigOverrides};
use cms_hospitals::error::{ErrorKind, SyncError};
use cms_hospitals::output::{HumanOutput, JsonOutput, OutputMode};

#[derive(Parser)]
#[command(name = "cms-hospitals")]
#[command(about = "Mirror CMS provider-data \"Hospitals\" datasets with snake_case headers")]
#[command(version)]
struct Cli {
    /// Print results as JSON on stdout.
    #[arg(long, global = true)]
    json: bool,

    /// JSON config file (default: ./cms-hospitals.json if present).
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(flatten)]
    overrides: OverrideArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args, Clone, Default)]
struct OverrideArgs {
    #[arg(long, global = true)]
    base_url: Option<String>,

    #[arg(long, global = true)]
    output_dir: Option<Utf8PathBuf>,

    #[arg(long, global = true)]
    metadata_file: Option<Utf8PathBuf>,

    #[arg(long, global = true)]
    theme: Option<String>,

    #[arg(long, global = true)]
    workers: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Download changed datasets (default)")]
    Sync(SyncArgs),
    #[command(about = "Show what the last runs recorded")]
    Status,
}

#[derive(Args, Clone, Copy, Default)]
struct SyncArgs {
    /// Reprocess every dataset, ignoring run metadata.
    #[arg(long)]
    force: bool,

    /// Only report which datasets would be downloaded.
    #[arg(long)]
    dry_run: bool,
}

fn main() -> ExitCode {
    let result = run();
    if let Err(report) = &result {
        eprintln!("{report:?}");
    }
    ExitCode::from(exit_status(&result))
}

fn exit_status(result: &miette::Result<()>) -> u8 {
    match result {
        Ok(()) => 0,
        Err(report) => report.downcast_ref::<SyncError>().map_or(1, map_exit_code),
    }
}

fn map_exit_code(error: &SyncError) -> u8 {
    match error.kind() {
        ErrorKind::Config => 2,
        ErrorKind::Network => 3,
        ErrorKind::Format => 4,
        ErrorKind::Io => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };
    let overrides = ConfigOverrides {
        base_url: cli.overrides.base_url,
        output_dir: cli.overrides.output_dir,
        metadata_file: cli.overrides.metadata_file,
        theme: cli.overrides.theme,
        workers: cli.overrides.workers,
    };
    let config = ConfigLoader::resolve(cli.config.as_deref(), &overrides)?;

    match cli.command.unwrap_or(Commands::Sync(SyncArgs::default())) {
        Commands::Sync(args) => {
            let client = MetastoreHttpClient::new(config.timeout_secs)?;
            let app = App::new(config, client);
            let options = RunOptions {
                force: args.force,
                dry_run: args.dry_run,
            };
            match output_mode {
                OutputMode::Json => {
                    let summary = app.run(options, &JsonOutput)?;
                    JsonOutput::print_summary(&summary).into_diagnostic()?;
                }
                OutputMode::Human => {
                    let summary = app.run(options, &HumanOutput)?;
                    HumanOutput::print_summary(&summary);
                }
            }
            Ok(())
        }
        Commands::Status => {
            let app = App::new(config, NopClient);
            let status = app.status();
            match output_mode {
                OutputMode::Json => JsonOutput::print_status(&status).into_diagnostic()?,
                OutputMode::Human => HumanOutput::print_status(&status),
            }
            Ok(())
        }
    }
}

struct NopClient;

impl MetastoreClient for NopClient {
    fn fetch(&self, _url: &str) -> Result<Vec<u8>, SyncError> {
        Err(SyncError::Network("network disabled for status".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use cms_hospitals::app::{ProgressEvent, ProgressSink};
    use cms_hospitals::config::ResolvedConfig;

    use super::*;

    const BASE: &str = "https://metastore.test/items";

    struct Quiet;

    impl ProgressSink for Quiet {
        fn event(&self, _event: ProgressEvent) {}
    }

    struct Canned(HashMap<String, Vec<u8>>);

    impl MetastoreClient for Canned {
        fn fetch(&self, url: &str) -> Result<Vec<u8>, SyncError> {
            self.0.get(url).cloned().ok_or_else(|| SyncError::HttpStatus {
                status: 503,
                message: "Service Unavailable".to_string(),
            })
        }
    }

    fn status_of(err: SyncError) -> u8 {
        exit_status(&Err(miette::Report::from(err)))
    }

    #[test]
    fn run_aborting_errors_exit_non_zero() {
        assert_eq!(status_of(SyncError::Network("connection reset".to_string())), 3);
        assert_eq!(
            status_of(SyncError::HttpStatus {
                status: 500,
                message: "Internal Server Error".to_string(),
            }),
            3
        );
        assert_eq!(status_of(SyncError::Format("catalog is not a JSON array".to_string())), 4);
        assert_eq!(status_of(SyncError::Filesystem("read-only file system".to_string())), 1);
        assert_eq!(status_of(SyncError::InvalidConfig("workers must be at least 1".to_string())), 2);
        assert_eq!(exit_status(&Err(miette::miette!("unexpected"))), 1);
    }

    #[test]
    fn completed_run_with_failed_datasets_exits_zero() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let mut responses = HashMap::new();
        responses.insert(
            BASE.to_string(),
            br#"[
                {"identifier": "good", "modified": "1", "theme": ["Hospitals"],
                 "distribution": [{"downloadURL": "https://files.test/good.csv"}]},
                {"identifier": "gone", "modified": "1", "theme": ["Hospitals"],
                 "distribution": [{"downloadURL": "https://files.test/gone.csv"}]}
            ]"#
            .to_vec(),
        );
        responses.insert("https://files.test/good.csv".to_string(), b"Col A\n1\n".to_vec());
        let config = ResolvedConfig {
            base_url: BASE.to_string(),
            output_dir: root.join("out"),
            metadata_file: root.join("run_metadata.json"),
            error_log: root.join("errors.log"),
            success_log: root.join("success.log"),
            workers: 2,
            ..ResolvedConfig::default()
        };
        let app = App::new(config, Canned(responses));

        let result = app.run(RunOptions::default(), &Quiet);
        let summary = result.as_ref().unwrap();
        assert_eq!((summary.processed, summary.failed), (1, 1));
        assert_eq!(exit_status(&result.map(|_| ()).map_err(miette::Report::from)), 0);
    }
}
