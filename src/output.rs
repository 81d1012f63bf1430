use std::io::{self, Write};

use serde::Serialize;

use crate::app::{ProgressEvent, ProgressSink, RunSummary, StatusResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_summary(result: &RunSummary) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_status(result: &StatusResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Progress lines on stderr, summary on stdout.
pub struct HumanOutput;

impl HumanOutput {
    pub fn print_summary(result: &RunSummary) {
        let green = "\x1b[32m";
        let yellow = "\x1b[33m";
        let cyan = "\x1b[36m";
        let red = "\x1b[31m";
        let reset = "\x1b[0m";

        let title = if result.dry_run {
            "cms-hospitals dry run"
        } else {
            "cms-hospitals summary"
        };
        println!("{cyan}{title}{reset}");
        println!(
            "catalog entries: {}, matching theme: {}",
            result.catalog_entries, result.matched
        );
        println!("{green}processed: {}{reset}", result.processed);
        println!("{yellow}skipped: {}{reset}", result.skipped);
        println!("{red}failed: {}{reset}", result.failed);

        for item in &result.items {
            let color = match item.outcome.as_str() {
                "processed" => green,
                "failed" => red,
                "pending" => cyan,
                _ => yellow,
            };
            println!("{color}  {} {}{reset}", item.outcome, item.id);
            if let Some(path) = &item.path {
                println!("{color}    -> {path}{reset}");
            }
            if let Some(reason) = &item.reason {
                println!("{color}    {reason}{reset}");
            }
        }
    }

    pub fn print_status(result: &StatusResult) {
        println!("metadata: {}", result.metadata_file);
        println!(
            "last run: {}",
            result.last_run.as_deref().unwrap_or("never")
        );
        println!("tracked datasets: {}", result.datasets.len());
        for entry in &result.datasets {
            let marker = if entry.output_exists { "" } else { " (output missing)" };
            println!("  {} modified {}{marker}", entry.id, entry.modified);
        }
    }
}

impl ProgressSink for HumanOutput {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => eprintln!("{} ({} ms)", event.message, elapsed.as_millis()),
            None => eprintln!("{}", event.message),
        }
    }
}
