//! Core data model for copy runs.
//!
//! This module defines the main data structures:
//! - LogEntry / EntryStatus: one row of the status log and its outcome
//! - RunConfig: tunables for a run
//! - RunResult / LogSummary: what a finished run reports back

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

use crate::checksums::ChecksumAlgorithm;

/// Default number of processed entries between two checkpoints.
pub const DEFAULT_CHECKPOINT_INTERVAL: usize = 100;

/// The outcome recorded for a single source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryStatus {
    /// Not yet processed (or reset by hand to force a retry)
    Pending,
    /// Copied and verified
    Success,
    /// Copy reported success but the digests differ
    CorruptionDetected,
    /// Copy attempt failed; carries the diagnostic message
    Error(String),
    /// Cancellation was observed right before this entry
    Interrupted,
}

impl EntryStatus {
    /// Returns true if a run must skip this entry.
    ///
    /// Only `Success` counts as done; errors, corruption and interruptions
    /// are retried on the next run.
    pub fn is_done(&self) -> bool {
        matches!(self, EntryStatus::Success)
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryStatus::Pending => write!(f, "pending"),
            EntryStatus::Success => write!(f, "success"),
            EntryStatus::CorruptionDetected => write!(f, "corruption detected"),
            EntryStatus::Error(message) => write!(f, "error: {}", message),
            EntryStatus::Interrupted => write!(f, "interrupted"),
        }
    }
}

impl FromStr for EntryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let lower = trimmed.to_ascii_lowercase();

        match lower.as_str() {
            "pending" => return Ok(EntryStatus::Pending),
            "success" => return Ok(EntryStatus::Success),
            "corruption detected" | "corruption_detected" => {
                return Ok(EntryStatus::CorruptionDetected)
            }
            "interrupted" => return Ok(EntryStatus::Interrupted),
            _ => {}
        }

        if lower.starts_with("error:") {
            // "error:" is ASCII, so the byte offset is valid in the original text too
            let message = trimmed["error:".len()..].trim();
            if message.eq_ignore_ascii_case("interrupted") {
                // Marker written by older versions of the tool
                return Ok(EntryStatus::Interrupted);
            }
            return Ok(EntryStatus::Error(message.to_string()));
        }

        Err(format!("unrecognized status '{}'", trimmed))
    }
}

/// One row of the status log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Source file path, unique within a log
    pub path: PathBuf,

    /// Outcome of the latest attempt
    pub status: EntryStatus,
}

impl LogEntry {
    pub fn pending(path: impl Into<PathBuf>) -> Self {
        LogEntry {
            path: path.into(),
            status: EntryStatus::Pending,
        }
    }
}

/// Tunables for a copy run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Checkpoint after every N processed entries (0 disables periodic checkpoints)
    pub checkpoint_interval: usize,

    /// Digest used to verify each copy
    pub algorithm: ChecksumAlgorithm,
}

impl RunConfig {
    pub fn with_checkpoint_interval(mut self, interval: usize) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    pub fn with_algorithm(mut self, algorithm: ChecksumAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            algorithm: ChecksumAlgorithm::Md5,
        }
    }
}

/// Count of log entries per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LogSummary {
    pub pending: usize,
    pub success: usize,
    pub corruption_detected: usize,
    pub error: usize,
    pub interrupted: usize,
}

impl LogSummary {
    pub fn total(&self) -> usize {
        self.pending + self.success + self.corruption_detected + self.error + self.interrupted
    }

    /// True when every entry in the log is `success`.
    pub fn is_complete(&self) -> bool {
        self.success == self.total()
    }
}

/// What a run reports back to its caller.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    /// Identifier used to correlate log output for this run
    pub run_id: Uuid,

    /// Entries attempted during this run
    pub processed: usize,

    /// Entries skipped because they were already `success`
    pub skipped: usize,

    /// Entries in the log
    pub total: usize,

    /// True if the run stopped early because cancellation was requested
    pub cancelled: bool,

    /// Status counts after the final checkpoint
    pub summary: LogSummary,

    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
