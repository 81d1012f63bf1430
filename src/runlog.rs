use std::fs::{self, OpenOptions};
use std::io::Write;
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::warn;

/// The two append-only text logs kept next to the job: one for failures and
/// one for processed/skipped datasets. Each line is
/// `<local timestamp> - <message>`.
#[derive(Debug)]
pub struct RunLog {
    error_path: Utf8PathBuf,
    success_path: Utf8PathBuf,
    lock: Mutex<()>,
}

impl RunLog {
    pub fn new(error_path: Utf8PathBuf, success_path: Utf8PathBuf) -> Self {
        Self {
            error_path,
            success_path,
            lock: Mutex::new(()),
        }
    }

    pub fn error_path(&self) -> &Utf8Path {
        &self.error_path
    }

    pub fn success_path(&self) -> &Utf8Path {
        &self.success_path
    }

    pub fn error(&self, message: &str) {
        self.append(&self.error_path, message);
    }

    pub fn success(&self, message: &str) {
        self.append(&self.success_path, message);
    }

    // A log line that cannot be written must not fail the run.
    fn append(&self, path: &Utf8Path, message: &str) {
        let line = format!(
            "{} - {message}\n",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.6f")
        );
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(parent) = path.parent().filter(|parent| !parent.as_str().is_empty()) {
            if let Err(err) = fs::create_dir_all(parent.as_std_path()) {
                warn!(path = %path, error = %err, "cannot create log directory");
                return;
            }
        }
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_std_path())
            .and_then(|mut file| file.write_all(line.as_bytes()));
        if let Err(err) = result {
            warn!(path = %path, error = %err, "cannot append to run log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_timestamped_lines() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let log = RunLog::new(root.join("logs/errors.log"), root.join("logs/success.log"));

        log.success("xubh-q36u: processed");
        log.success("yv7e-xc69: skipped");
        log.error("abcd-1234: HTTP 404");

        let success = std::fs::read_to_string(log.success_path().as_std_path()).unwrap();
        let lines: Vec<_> = success.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(" - xubh-q36u: processed"));
        assert!(lines[1].ends_with(" - yv7e-xc69: skipped"));

        let errors = std::fs::read_to_string(log.error_path().as_std_path()).unwrap();
        assert_eq!(errors.lines().count(), 1);
    }
}
