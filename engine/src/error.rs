//! Error types for the copy engine.
//!
//! Two layers of errors exist:
//! - `EngineError` represents run-level failures that abort a run
//!   (enumeration of the source tree, reading or checkpointing the log).
//! - `FileError` represents a failure confined to one log entry. It is
//!   recorded as `error: <message>` on that entry and never aborts the run.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort a run.
///
/// Per-file problems are never reported through this type; they are
/// recorded on the entry as [`FileError`] text instead.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Source directory does not exist
    #[error("Source directory not found: {}", path.display())]
    SourceNotFound { path: PathBuf },

    /// Path is not usable for the requested operation
    #[error("Invalid path: {} ({reason})", path.display())]
    InvalidPath { path: PathBuf, reason: String },

    /// Failed to enumerate a directory of the source tree
    #[error("Failed to enumerate directory: {}: {source}", path.display())]
    EnumerationFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The log file could not be created, read, or checkpointed
    #[error("Log file I/O failed: {}: {source}", path.display())]
    LogIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The log file exists but its table is not recognized
    #[error("Log file {} is malformed at line {line}: {reason}", path.display())]
    LogParse {
        path: PathBuf,
        line: u64,
        reason: String,
    },

    /// Another run is already active against the same log
    #[error("A run is already in progress for log {}", log.display())]
    RunInProgress { log: PathBuf },

    /// The worker thread ended without returning a result
    #[error("Copy worker terminated unexpectedly: {message}")]
    WorkerPanicked { message: String },
}

impl EngineError {
    /// Extract the OS error code from this error, if available.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::EnumerationFailed { source, .. } | Self::LogIo { source, .. } => {
                source.raw_os_error()
            }
            _ => None,
        }
    }

    pub(crate) fn log_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::LogIo {
            path: path.into(),
            source,
        }
    }
}

/// A failure while processing a single entry.
///
/// The `Display` output becomes the free-text message of an
/// `error: <message>` row, so it stays on one line.
#[derive(Debug, Error)]
pub enum FileError {
    /// The logged path does not live under the supplied source root
    #[error("{} is not under source root {}", path.display(), root.display())]
    OutsideSourceRoot { path: PathBuf, root: PathBuf },

    /// Source and destination name the same file
    #[error("{} and {} are the same file", path.display(), destination.display())]
    SameFile { path: PathBuf, destination: PathBuf },

    /// The destination parent directory could not be created
    #[error("cannot create directory {}: {source}", path.display())]
    DirectoryCreationFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Reading the source file failed
    #[error("cannot read {}: {source}", path.display())]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Writing the destination file failed
    #[error("cannot write {}: {source}", path.display())]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Computing a content digest failed after the copy
    #[error("cannot checksum {}: {source}", path.display())]
    DigestFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_error_message_is_single_line() {
        let err = FileError::ReadFailed {
            path: PathBuf::from("/src/a.txt"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        let text = err.to_string();
        assert!(text.starts_with("cannot read /src/a.txt"));
        assert!(!text.contains('\n'));
    }

    #[test]
    fn test_raw_os_error_only_for_io_variants() {
        let err = EngineError::log_io("/tmp/log.csv", io::Error::from_raw_os_error(13));
        assert_eq!(err.raw_os_error(), Some(13));

        let err = EngineError::SourceNotFound {
            path: PathBuf::from("/missing"),
        };
        assert_eq!(err.raw_os_error(), None);
    }
}
