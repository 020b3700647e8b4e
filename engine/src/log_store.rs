//! Durable status log.
//!
//! The log is a CSV table with a `file,status` header and one row per
//! source file, in enumeration order. It is the only state that survives
//! a run: a later run loads it, skips every `success` row and retries the
//! rest.
//!
//! Every write goes to a temporary sibling file that is flushed, synced
//! and then renamed into place, so a reader never sees a half-written
//! table.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::error::EngineError;
use crate::fs_ops;
use crate::model::{EntryStatus, LogEntry, LogSummary};

const HEADER: [&str; 2] = ["file", "status"];

#[derive(Debug, Serialize, Deserialize)]
struct LogRow {
    file: String,
    status: String,
}

/// Handle on a status log file.
#[derive(Debug, Clone)]
pub struct LogStore {
    path: PathBuf,
}

impl LogStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        LogStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Create the log by enumerating `source_root`, unless it already exists.
    ///
    /// An existing log is authoritative and is never touched, which is what
    /// lets an interrupted run resume. Returns true if a new log was written.
    ///
    /// # Errors
    /// Enumeration failures abort before anything is written; failures to
    /// write the log surface as `LogIo`.
    pub fn initialize(&self, source_root: &Path) -> Result<bool, EngineError> {
        if self.exists() {
            tracing::info!(log = %self.path.display(), "reusing existing log");
            return Ok(false);
        }

        let root = fs_ops::resolve_source_root(source_root)?;
        let entries: Vec<LogEntry> = fs_ops::enumerate_files(&root)?
            .into_iter()
            .map(LogEntry::pending)
            .collect();

        let temp = self.write_temp(&entries, None)?;
        let created = self.publish_new(temp)?;
        if created {
            tracing::info!(
                log = %self.path.display(),
                files = entries.len(),
                "created log"
            );
        }
        Ok(created)
    }

    /// Move a freshly written table into place unless a log appeared meanwhile.
    fn publish_new(&self, temp: NamedTempFile) -> Result<bool, EngineError> {
        match temp.persist_noclobber(&self.path) {
            Ok(_) => {
                sync_parent_dir(&self.path);
                Ok(true)
            }
            // Another process published a log first; theirs wins
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                tracing::info!(log = %self.path.display(), "log appeared concurrently, reusing it");
                Ok(false)
            }
            Err(e) => Err(EngineError::log_io(&self.path, e.error)),
        }
    }

    /// Read the full table into memory, in file order.
    ///
    /// # Errors
    /// `LogIo` if the file cannot be read, `LogParse` if the header, a row's
    /// shape or a status value is not recognized, or a path repeats.
    pub fn load(&self) -> Result<Vec<LogEntry>, EngineError> {
        let file = fs::File::open(&self.path).map_err(|e| EngineError::log_io(&self.path, e))?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(io::BufReader::new(file));

        let headers = reader
            .headers()
            .map_err(|e| self.csv_error(e))?
            .clone();
        let header_fields: Vec<&str> = headers.iter().map(str::trim).collect();
        if header_fields != HEADER {
            return Err(self.parse_error(
                1,
                format!("expected header 'file,status', found '{}'", header_fields.join(",")),
            ));
        }

        let mut entries = Vec::new();
        let mut seen = HashSet::new();
        for record in reader.records() {
            let record = record.map_err(|e| self.csv_error(e))?;
            let line = record.position().map(|p| p.line()).unwrap_or(0);
            let row: LogRow = record
                .deserialize(None)
                .map_err(|e| self.parse_error(line, e.to_string()))?;

            if row.file.is_empty() {
                return Err(self.parse_error(line, "empty file path".to_string()));
            }
            let status: EntryStatus = row
                .status
                .parse()
                .map_err(|reason| self.parse_error(line, reason))?;

            let path = PathBuf::from(row.file);
            if !seen.insert(path.clone()) {
                return Err(self.parse_error(
                    line,
                    format!("duplicate entry for {}", path.display()),
                ));
            }
            entries.push(LogEntry { path, status });
        }

        tracing::debug!(log = %self.path.display(), entries = entries.len(), "loaded log");
        Ok(entries)
    }

    /// Atomically replace the log with `entries`.
    ///
    /// The replacement keeps the permissions of the log it replaces.
    pub fn checkpoint(&self, entries: &[LogEntry]) -> Result<(), EngineError> {
        let permissions = fs::metadata(&self.path).ok().map(|m| m.permissions());
        let temp = self.write_temp(entries, permissions)?;
        temp.persist(&self.path)
            .map_err(|e| EngineError::log_io(&self.path, e.error))?;
        sync_parent_dir(&self.path);
        Ok(())
    }

    /// Write the table to a synced temporary file next to the log.
    ///
    /// Without explicit `permissions` the file gets the same mode as any
    /// other newly created file (0666 masked by the umask on unix).
    fn write_temp(
        &self,
        entries: &[LogEntry],
        permissions: Option<fs::Permissions>,
    ) -> Result<NamedTempFile, EngineError> {
        let log_io = |e| EngineError::log_io(&self.path, e);

        let dir = log_dir(&self.path);
        fs::create_dir_all(dir).map_err(log_io)?;
        let mut temp = new_temp_file(dir).map_err(log_io)?;

        {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(temp.as_file_mut());
            writer.write_record(HEADER).map_err(|e| self.csv_error(e))?;
            for entry in entries {
                writer
                    .serialize(LogRow {
                        file: entry.path.to_string_lossy().into_owned(),
                        status: entry.status.to_string(),
                    })
                    .map_err(|e| self.csv_error(e))?;
            }
            writer.flush().map_err(log_io)?;
        }
        if let Some(permissions) = permissions {
            temp.as_file().set_permissions(permissions).map_err(log_io)?;
        }
        temp.as_file().sync_all().map_err(log_io)?;
        Ok(temp)
    }

    fn parse_error(&self, line: u64, reason: String) -> EngineError {
        EngineError::LogParse {
            path: self.path.clone(),
            line,
            reason,
        }
    }

    fn csv_error(&self, err: csv::Error) -> EngineError {
        let line = err.position().map(|p| p.line()).unwrap_or(0);
        let message = err.to_string();
        match err.into_kind() {
            csv::ErrorKind::Io(e) => EngineError::log_io(&self.path, e),
            _ => self.parse_error(line, message),
        }
    }
}

/// Count the entries per status.
pub fn summarize(entries: &[LogEntry]) -> LogSummary {
    entries
        .iter()
        .fold(LogSummary::default(), |mut summary, entry| {
            match entry.status {
                EntryStatus::Pending => summary.pending += 1,
                EntryStatus::Success => summary.success += 1,
                EntryStatus::CorruptionDetected => summary.corruption_detected += 1,
                EntryStatus::Error(_) => summary.error += 1,
                EntryStatus::Interrupted => summary.interrupted += 1,
            }
            summary
        })
}

fn log_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

#[cfg(unix)]
fn new_temp_file(dir: &Path) -> io::Result<NamedTempFile> {
    use std::os::unix::fs::PermissionsExt;
    // The mode passes through open(2), so the umask still applies
    tempfile::Builder::new()
        .prefix(".copylog-")
        .permissions(fs::Permissions::from_mode(0o666))
        .tempfile_in(dir)
}

#[cfg(not(unix))]
fn new_temp_file(dir: &Path) -> io::Result<NamedTempFile> {
    tempfile::Builder::new().prefix(".copylog-").tempfile_in(dir)
}

/// Persist the rename itself; best effort, not every platform can open a directory.
fn sync_parent_dir(path: &Path) {
    #[cfg(unix)]
    if let Ok(dir) = fs::File::open(log_dir(path)) {
        let _ = dir.sync_all();
    }
    #[cfg(not(unix))]
    let _ = path;
}
