//! Append-only JSONL log of rejected completions.
//!
//! Discarded attempts are product artifacts: no node keeps them, so the log
//! is their only durable record. One JSON object per line, appended as the
//! rejections happen.

use std::fs::{self, File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};

use crate::decision::{DiscardSink, DiscardedAttempt};

/// Sink that appends each rejected completion to a JSONL file. Shared across
/// concurrent workers, so appends serialize through a mutex.
pub struct JsonlDiscardLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlDiscardLog {
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open discard log {}", path.display()))?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DiscardSink for JsonlDiscardLog {
    fn record(&self, attempt: &DiscardedAttempt<'_>) -> std::io::Result<()> {
        let mut line = serde_json::to_vec(attempt).map_err(std::io::Error::other)?;
        line.push(b'\n');
        let mut file = self
            .file
            .lock()
            .map_err(|_| std::io::Error::other("discard log mutex poisoned"))?;
        file.write_all(&line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::Message;

    #[test]
    fn records_append_one_json_line_each() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = JsonlDiscardLog::create(temp.path().join("discards.jsonl")).expect("create");

        let messages = [Message::user("vote yes or no")];
        log.record(&DiscardedAttempt {
            messages: &messages,
            output: Some("maybe"),
            error: "choice \"maybe\" is not among the offered options".to_string(),
        })
        .expect("first");
        log.record(&DiscardedAttempt {
            messages: &messages,
            output: None,
            error: "malformed decision output: empty".to_string(),
        })
        .expect("second");

        let contents = fs::read_to_string(log.path()).expect("read");
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let value: serde_json::Value = serde_json::from_str(line).expect("json line");
            assert!(value.get("error").is_some());
        }
    }
}
