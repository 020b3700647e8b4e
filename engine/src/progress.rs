//! Progress reporting.
//!
//! This module defines the ProgressCallback trait, which decouples the copy
//! engine from whatever renders progress (CLI spinner, GUI label, log file).
//! The engine pushes events; it never waits on the renderer.

use crossbeam_channel::Sender;
use std::path::Path;

use crate::model::{EntryStatus, RunResult};

const SPINNER: [char; 4] = ['|', '/', '-', '\\'];

/// Emitted once per entry after its outcome is known.
#[derive(Debug, Clone, Copy)]
pub struct ProgressEvent<'a> {
    /// Entries attempted so far in this run, including this one
    pub processed: usize,

    /// Entries in the log
    pub total: usize,

    /// Source path of the entry
    pub path: &'a Path,

    /// Outcome recorded for the entry
    pub status: &'a EntryStatus,
}

/// Trait for receiving progress updates from a run.
///
/// All methods are called synchronously on the worker thread, so
/// implementations must return quickly.
pub trait ProgressCallback: Send {
    /// Called once the log is loaded. `already_done` entries will be skipped.
    fn on_run_started(&self, _total: usize, _already_done: usize) {}

    /// Called when an entry resolves to a terminal status.
    fn on_entry_completed(&self, event: ProgressEvent<'_>);

    /// Called after a periodic checkpoint has been written.
    fn on_checkpoint(&self, _processed: usize) {}

    /// Called after the final checkpoint.
    fn on_run_finished(&self, _result: &RunResult) {}
}

/// Messages sent by [`ChannelProgress`].
#[derive(Debug, Clone)]
pub enum ProgressUpdate {
    RunStarted {
        total: usize,
        already_done: usize,
    },
    EntryCompleted {
        processed: usize,
        total: usize,
        display_name: String,
        status: EntryStatus,
    },
    Checkpointed {
        processed: usize,
    },
    RunFinished {
        result: RunResult,
    },
}

/// A ProgressCallback that forwards updates over a channel.
///
/// Sends never block on an unbounded channel and a dropped receiver is
/// ignored, so a slow or vanished UI cannot stall the run.
pub struct ChannelProgress {
    sender: Sender<ProgressUpdate>,
    max_display_len: usize,
}

impl ChannelProgress {
    pub fn new(sender: Sender<ProgressUpdate>, max_display_len: usize) -> Self {
        ChannelProgress {
            sender,
            max_display_len,
        }
    }
}

impl ProgressCallback for ChannelProgress {
    fn on_run_started(&self, total: usize, already_done: usize) {
        let _ = self.sender.try_send(ProgressUpdate::RunStarted {
            total,
            already_done,
        });
    }

    fn on_entry_completed(&self, event: ProgressEvent<'_>) {
        let display_name =
            shorten_display_name(&event.path.to_string_lossy(), self.max_display_len);
        let _ = self.sender.try_send(ProgressUpdate::EntryCompleted {
            processed: event.processed,
            total: event.total,
            display_name,
            status: event.status.clone(),
        });
    }

    fn on_checkpoint(&self, processed: usize) {
        let _ = self.sender.try_send(ProgressUpdate::Checkpointed { processed });
    }

    fn on_run_finished(&self, result: &RunResult) {
        let _ = self.sender.try_send(ProgressUpdate::RunFinished {
            result: result.clone(),
        });
    }
}

/// Spinner glyph for the given step.
pub fn spinner_frame(step: usize) -> char {
    SPINNER[step % SPINNER.len()]
}

/// Shorten `name` to about `max_len` characters, keeping its tail.
///
/// The cut is moved forward to the first path separator in the kept tail so
/// the result starts on a whole path segment, and is prefixed with `..`.
pub fn shorten_display_name(name: &str, max_len: usize) -> String {
    let len = name.chars().count();
    if len <= max_len {
        return name.to_string();
    }

    let separator = if name.contains('/') { '/' } else { '\\' };
    let tail: String = name.chars().skip(len - max_len).collect();
    match tail.find(separator) {
        Some(index) => format!("..{}", &tail[index..]),
        None => format!("..{}", tail),
    }
}
