//! # CopyLog Engine - Resumable, Verified Bulk Copy
//!
//! A headless engine that copies every file of a source tree into a
//! destination root exactly once, verifies each copy by content digest,
//! and records the outcome of every file in a CSV status log.
//! Designed as the foundation for thin front ends (CLI, GUI, automation).
//!
//! ## Overview
//!
//! - The status log is a snapshot of the source tree taken when it is
//!   created. An existing log is always reused, never rebuilt.
//! - Entries already marked `success` are never copied again, so an
//!   interrupted run resumes by simply running again.
//! - The log is checkpointed atomically (temp file + rename) every
//!   `checkpoint_interval` entries and at the end of every run.
//! - A copy whose digest does not match is marked `corruption detected`;
//!   any other per-file failure is marked `error: <message>`. Neither stops
//!   the run.
//! - Cancellation is cooperative and only takes effect between files.
//!
//! ## Basic Usage
//!
//! ```no_run
//! use engine::{initialize_run, run_copy, CancellationToken};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let source = Path::new("/data/photos");
//! let destination = Path::new("/mnt/backup/photos");
//! let log = Path::new("/mnt/backup/photos.csv");
//!
//! // Create the log (no-op if it already exists)
//! initialize_run(source, log)?;
//!
//! // Copy everything that is not yet `success`
//! let cancel = CancellationToken::new();
//! let result = run_copy(source, destination, log, None, &cancel)?;
//! println!("{} of {} files processed", result.processed, result.total);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **model**: Log entries, statuses, run configuration and results
//! - **error**: Run-level and per-file error types
//! - **fs_ops**: Source enumeration and the metadata-preserving copy
//! - **checksums**: Streaming content digests and verification
//! - **log_store**: The CSV status log and its atomic checkpoints
//! - **run**: The copy engine and its state machine
//! - **progress**: Progress callback trait and display helpers
//! - **cancel**: Cancellation token
//! - **worker**: Running the engine on a background thread

pub mod cancel;
pub mod checksums;
pub mod error;
pub mod fs_ops;
pub mod log_store;
pub mod model;
pub mod progress;
pub mod run;
pub mod worker;

// Re-export main types and functions
pub use cancel::{request_cancel, CancellationToken};
pub use checksums::{compute_file_checksum, verify_files, ChecksumAlgorithm, ChecksumValue};
pub use error::{EngineError, FileError};
pub use log_store::{summarize, LogStore};
pub use model::{EntryStatus, LogEntry, LogSummary, RunConfig, RunResult};
pub use progress::{
    shorten_display_name, spinner_frame, ChannelProgress, ProgressCallback, ProgressEvent,
    ProgressUpdate,
};
pub use run::{initialize_run, run_copy, CopyEngine, FileCopier, FsCopier};
pub use worker::{spawn_run, RunHandle, RunRequest};
