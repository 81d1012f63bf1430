use csv::{ReaderBuilder, Terminator, WriterBuilder};
use tracing::debug;

use crate::catalog::MetastoreClient;
use crate::domain::{DatasetRecord, ProcessingOutcome};
use crate::error::SyncError;
use crate::normalize::normalize_headers;
use crate::store::OutputStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedCsv {
    pub headers: Vec<String>,
    pub rows: usize,
    pub content: Vec<u8>,
}

/// Downloads one dataset, rewrites its header row and stores it as
/// `<identifier>.csv`. Never returns an error: failures become
/// [`ProcessingOutcome::Failed`] and nothing is written for them.
pub fn process_dataset<C: MetastoreClient + ?Sized>(
    client: &C,
    record: &DatasetRecord,
    store: &OutputStore,
) -> ProcessingOutcome {
    match try_process(client, record, store) {
        Ok(outcome) => outcome,
        Err(err) => ProcessingOutcome::Failed(err.to_string()),
    }
}

fn try_process<C: MetastoreClient + ?Sized>(
    client: &C,
    record: &DatasetRecord,
    store: &OutputStore,
) -> Result<ProcessingOutcome, SyncError> {
    let body = client.fetch(&record.download_url)?;
    debug!(id = %record.id, bytes = body.len(), "downloaded");
    let normalized = normalize_csv(&body)?;
    debug!(id = %record.id, columns = normalized.headers.len(), rows = normalized.rows, "normalized");
    let path = store.write_dataset(&record.id, &normalized.content)?;
    Ok(ProcessingOutcome::Success {
        path,
        rows: normalized.rows,
    })
}

/// Validates `body` as CSV and replaces its header row with normalized
/// column names. Data rows are copied byte-for-byte.
pub fn normalize_csv(body: &[u8]) -> Result<NormalizedCsv, SyncError> {
    let body = body.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(body);
    let text = std::str::from_utf8(body)
        .map_err(|err| SyncError::Format(format!("body is not UTF-8 text: {err}")))?;
    match text.trim_start().as_bytes().first() {
        None => return Err(SyncError::Format("empty body".to_string())),
        Some(b'<') => {
            return Err(SyncError::Format(
                "body looks like HTML/XML, not CSV".to_string(),
            ));
        }
        Some(b'{' | b'[') => {
            return Err(SyncError::Format("body looks like JSON, not CSV".to_string()));
        }
        Some(_) => {}
    }

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_reader(body);
    let raw_headers = reader
        .headers()
        .map_err(|err| SyncError::Format(format!("unreadable header row: {err}")))?
        .clone();
    let (header_end, terminator) = header_boundary(body, reader.position().byte() as usize);
    let mut rows = 0usize;
    for result in reader.byte_records() {
        result.map_err(|err| SyncError::Format(format!("invalid CSV: {err}")))?;
        rows += 1;
    }

    let headers = normalize_headers(raw_headers.iter());
    let mut writer = WriterBuilder::new()
        .terminator(terminator)
        .from_writer(Vec::with_capacity(body.len()));
    writer
        .write_record(&headers)
        .map_err(|err| SyncError::Format(err.to_string()))?;
    let mut content = writer
        .into_inner()
        .map_err(|err| SyncError::Format(err.to_string()))?;
    content.extend_from_slice(&body[header_end..]);

    Ok(NormalizedCsv {
        headers,
        rows,
        content,
    })
}

// `parsed` is where the reader stopped after the header record. It may sit
// on either side of the record terminator, or between the `\r` and `\n` of a
// CRLF, so the terminator is completed here before slicing off the data rows.
fn header_boundary(body: &[u8], parsed: usize) -> (usize, Terminator) {
    let mut end = parsed.min(body.len());
    let ends_in_terminator = end > 0 && matches!(body[end - 1], b'\r' | b'\n');
    if !ends_in_terminator {
        match body.get(end) {
            Some(b'\r') => {
                end += 1;
                if body.get(end) == Some(&b'\n') {
                    end += 1;
                }
            }
            Some(b'\n') => end += 1,
            _ => {}
        }
    } else if body[end - 1] == b'\r' && body.get(end) == Some(&b'\n') {
        end += 1;
    }

    let terminator = match &body[..end] {
        [.., b'\r', b'\n'] => Terminator::CRLF,
        [.., b'\r'] => Terminator::Any(b'\r'),
        _ => Terminator::Any(b'\n'),
    };
    (end, terminator)
}
