//! JSONL attempt log: one line per scrape attempt or pipeline step.
//!
//! The file is only ever appended to; prior lines are never rewritten.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{EnergyType, ZipCode};

/// File name of the attempt log inside the output directory.
pub const ATTEMPT_LOG_FILE: &str = "scrape_attempts.jsonl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Retrying,
    Failed,
    Cancelled,
}

/// A single logged attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptEntry {
    pub timestamp: DateTime<Utc>,
    pub zip_code: ZipCode,
    pub energy_type: EnergyType,
    pub stage: String,
    pub attempt: u32,
    pub outcome: Outcome,
    pub detail: Option<String>,
    pub elapsed_ms: u64,
}

/// Where attempt entries go.
pub trait AttemptSink: Send {
    fn record(&mut self, entry: &AttemptEntry);
}

/// Append-only JSONL file sink.
pub struct AttemptLog {
    file: File,
    path: PathBuf,
}

impl AttemptLog {
    /// Open or create the log file.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open attempt log: {}", path.display()))?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Open `scrape_attempts.jsonl` in `output_dir`.
    pub fn in_dir(output_dir: &Path) -> Result<Self> {
        Self::open(&output_dir.join(ATTEMPT_LOG_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, entry: &AttemptEntry) -> Result<()> {
        let json = serde_json::to_string(entry)?;
        writeln!(self.file, "{json}")
            .with_context(|| format!("failed to append to {}", self.path.display()))?;
        Ok(())
    }

    /// Read every entry back, skipping lines that do not parse.
    pub fn read_all(path: &Path) -> Result<Vec<AttemptEntry>> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Ok(text
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }
}

impl AttemptSink for AttemptLog {
    fn record(&mut self, entry: &AttemptEntry) {
        // Losing a log line must not fail the scrape.
        if let Err(e) = self.append(entry) {
            tracing::warn!("attempt log write failed: {e:#}");
        }
    }
}

/// Collects entries in memory.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    pub entries: Vec<AttemptEntry>,
}

impl AttemptSink for MemorySink {
    fn record(&mut self, entry: &AttemptEntry) {
        self.entries.push(entry.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(attempt: u32, outcome: Outcome) -> AttemptEntry {
        AttemptEntry {
            timestamp: Utc::now(),
            zip_code: ZipCode::parse("19103").unwrap(),
            energy_type: EnergyType::Gas,
            stage: "navigating".into(),
            attempt,
            outcome,
            detail: None,
            elapsed_ms: 12,
        }
    }

    #[test]
    fn test_log_appends_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut log = AttemptLog::in_dir(dir.path()).unwrap();
            log.record(&entry(1, Outcome::Retrying));
        }
        {
            let mut log = AttemptLog::in_dir(dir.path()).unwrap();
            log.record(&entry(2, Outcome::Success));
        }

        let entries = AttemptLog::read_all(&dir.path().join(ATTEMPT_LOG_FILE)).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].attempt, 1);
        assert_eq!(entries[1].outcome, Outcome::Success);
    }

    #[test]
    fn test_entry_json_shape() {
        let json = serde_json::to_value(entry(3, Outcome::Failed)).unwrap();
        assert_eq!(json["zip_code"], "19103");
        assert_eq!(json["energy_type"], "gas");
        assert_eq!(json["outcome"], "failed");
        assert_eq!(json["attempt"], 3);
    }
}
