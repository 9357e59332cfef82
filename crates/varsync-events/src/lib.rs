//! Append-only JSONL audit log for sync-job events.
//!
//! Every Main Worker dispatch, Sync Worker run, and reconciler pass appends
//! one [`SyncJobEvent`] per notable transition. The log is write-mostly: it
//! exists so an operator can reconstruct what happened to a `(repository,
//! branch)` after the fact, not as a queryable store.
//!
//! # Example
//!
//! ```
//! use varsync_events::{EventLog, SyncJobEvent, SyncEventKind};
//! use chrono::Utc;
//!
//! let mut log = EventLog::new();
//! log.record(SyncJobEvent {
//!     timestamp: Utc::now(),
//!     job_id: "job-1".to_string(),
//!     repository: "acme/app".to_string(),
//!     event_type: SyncEventKind::JobStarted {
//!         branch: "main".to_string(),
//!         trigger: "push".to_string(),
//!     },
//! });
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use varsync_types::MutationKind;

/// Default events file name.
pub const EVENTS_FILE: &str = "sync-events.jsonl";

/// The events file path for a state directory.
pub fn events_path(state_dir: &Path) -> PathBuf {
    state_dir.join(EVENTS_FILE)
}

/// The transition a [`SyncJobEvent`] records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncEventKind {
    /// A Sync Worker job began. `trigger` is `"push"`, `"pull_request"`, or
    /// `"reconcile"`.
    JobStarted { branch: String, trigger: String },
    /// The Commit Lifecycle Analyzer resolved the files to process.
    FilesResolved { count: usize },
    /// A Source fetch for one file failed.
    FileFetchFailed { path: String, reason: String },
    /// One row was appended to the Sink buffer.
    RowWritten {
        unique_key: String,
        key: String,
        kind: MutationKind,
    },
    /// The Sink buffer was flushed.
    SinkFlushed { written: usize, failed: usize },
    /// A prune candidate was reported but not deleted, protection matched.
    PruneSkipped { unique_key: String, reason: String },
    /// The job failed outright.
    JobFailed { reason: String },
    /// The job completed, successfully or with partial failures.
    JobCompleted { duration_ms: u64, rows_written: usize },
    /// A reconciler pass found drift between Git and the store.
    DriftDetected {
        unique_key: String,
        missing: usize,
        extra: usize,
        mismatch: usize,
    },
    /// A reconciliation schedule auto-disabled after repeated failures.
    ScheduleDisabled { consecutive_errors: u32 },
}

/// One audit-log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncJobEvent {
    pub timestamp: DateTime<Utc>,
    pub job_id: String,
    pub repository: String,
    #[serde(flatten)]
    pub event_type: SyncEventKind,
}

/// In-memory accumulator for [`SyncJobEvent`]s, flushed to a JSONL file.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Vec<SyncJobEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn record(&mut self, event: SyncJobEvent) {
        self.events.push(event);
    }

    /// Append all recorded events to `path` in JSONL format. Existing
    /// content is preserved.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create events dir {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open events file {}", path.display()))?;

        let mut writer = std::io::BufWriter::new(file);
        for event in &self.events {
            let line = serde_json::to_string(event).context("failed to serialize sync event")?;
            writeln!(writer, "{line}").context("failed to write event line")?;
        }
        writer.flush().context("failed to flush events file")?;

        Ok(())
    }

    /// Load every event from a JSONL file, or an empty log if it doesn't exist.
    pub fn read_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let file = File::open(path)
            .with_context(|| format!("failed to open events file {}", path.display()))?;
        let reader = BufReader::new(file);
        let mut events = Vec::new();

        for line in reader.lines() {
            let line = line.with_context(|| {
                format!("failed to read line from events file {}", path.display())
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let event: SyncJobEvent = serde_json::from_str(&line)
                .with_context(|| format!("failed to parse sync event from line: {line}"))?;
            events.push(event);
        }

        Ok(Self { events })
    }

    pub fn events_for_repository(&self, repository: &str) -> Vec<&SyncJobEvent> {
        self.events.iter().filter(|e| e.repository == repository).collect()
    }

    pub fn events_for_job(&self, job_id: &str) -> Vec<&SyncJobEvent> {
        self.events.iter().filter(|e| e.job_id == job_id).collect()
    }

    pub fn all_events(&self) -> &[SyncJobEvent] {
        &self.events
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_event(job_id: &str, repository: &str) -> SyncJobEvent {
        SyncJobEvent {
            timestamp: Utc::now(),
            job_id: job_id.to_string(),
            repository: repository.to_string(),
            event_type: SyncEventKind::JobStarted {
                branch: "main".to_string(),
                trigger: "push".to_string(),
            },
        }
    }

    #[test]
    fn new_event_log_is_empty() {
        let log = EventLog::new();
        assert!(log.is_empty());
        assert_eq!(log.len(), 0);
    }

    #[test]
    fn record_adds_event_to_log() {
        let mut log = EventLog::new();
        log.record(sample_event("job-1", "acme/app"));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn events_for_repository_filters_correctly() {
        let mut log = EventLog::new();
        log.record(sample_event("job-1", "acme/app"));
        log.record(sample_event("job-2", "acme/other"));
        log.record(sample_event("job-3", "acme/app"));

        assert_eq!(log.events_for_repository("acme/app").len(), 2);
        assert_eq!(log.events_for_repository("acme/other").len(), 1);
    }

    #[test]
    fn write_to_file_creates_jsonl_format() {
        let td = tempdir().expect("tempdir");
        let path = td.path().join("sync-events.jsonl");

        let mut log = EventLog::new();
        log.record(sample_event("job-1", "acme/app"));
        log.write_to_file(&path).expect("write");

        let content = fs::read_to_string(&path).expect("read");
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 1);
        let _: SyncJobEvent = serde_json::from_str(lines[0]).expect("parse");
    }

    #[test]
    fn write_to_file_appends_to_existing_file() {
        let td = tempdir().expect("tempdir");
        let path = td.path().join("sync-events.jsonl");

        let mut log1 = EventLog::new();
        log1.record(sample_event("job-1", "acme/app"));
        log1.write_to_file(&path).expect("write first");

        let mut log2 = EventLog::new();
        log2.record(sample_event("job-2", "acme/app"));
        log2.write_to_file(&path).expect("write second");

        let content = fs::read_to_string(&path).expect("read");
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn read_from_file_loads_all_events() {
        let td = tempdir().expect("tempdir");
        let path = td.path().join("sync-events.jsonl");

        let mut log = EventLog::new();
        log.record(sample_event("job-1", "acme/app"));
        log.record(sample_event("job-2", "acme/app"));
        log.write_to_file(&path).expect("write");

        let loaded = EventLog::read_from_file(&path).expect("read");
        assert_eq!(loaded.len(), 2);
    }

    #[test]
    fn read_from_file_returns_empty_log_when_missing() {
        let td = tempdir().expect("tempdir");
        let path = td.path().join("nonexistent.jsonl");

        let loaded = EventLog::read_from_file(&path).expect("read");
        assert!(loaded.is_empty());
    }

    #[test]
    fn event_kinds_round_trip_through_json() {
        let events = vec![
            SyncEventKind::JobStarted {
                branch: "main".into(),
                trigger: "push".into(),
            },
            SyncEventKind::FilesResolved { count: 3 },
            SyncEventKind::FileFetchFailed {
                path: "config.json".into(),
                reason: "404".into(),
            },
            SyncEventKind::RowWritten {
                unique_key: "acme-app-prod".into(),
                key: "db.host".into(),
                kind: MutationKind::Update,
            },
            SyncEventKind::SinkFlushed { written: 4, failed: 0 },
            SyncEventKind::PruneSkipped {
                unique_key: "acme-app-prod".into(),
                reason: "protected".into(),
            },
            SyncEventKind::JobFailed { reason: "timeout".into() },
            SyncEventKind::JobCompleted {
                duration_ms: 1200,
                rows_written: 4,
            },
            SyncEventKind::DriftDetected {
                unique_key: "acme-app-prod".into(),
                missing: 1,
                extra: 0,
                mismatch: 2,
            },
            SyncEventKind::ScheduleDisabled { consecutive_errors: 3 },
        ];

        for event_type in events {
            let event = SyncJobEvent {
                timestamp: Utc::now(),
                job_id: "job-1".into(),
                repository: "acme/app".into(),
                event_type,
            };
            let json = serde_json::to_string(&event).expect("serialize");
            let parsed: SyncJobEvent = serde_json::from_str(&json).expect("deserialize");
            assert_eq!(parsed.event_type, event.event_type);
        }
    }

    #[test]
    fn path_helper_returns_expected_path() {
        let base = PathBuf::from("x");
        assert_eq!(events_path(&base), PathBuf::from("x").join(EVENTS_FILE));
    }

    #[test]
    fn clear_removes_all_events() {
        let mut log = EventLog::new();
        log.record(sample_event("job-1", "acme/app"));
        log.record(sample_event("job-2", "acme/app"));
        log.clear();
        assert!(log.is_empty());
    }
}
