//! Background execution of a run.
//!
//! `spawn_run` moves a run onto its own thread so the caller's control
//! surface stays responsive. The caller keeps a [`RunHandle`] to request
//! cancellation and must `join` it before exiting, which guarantees the
//! final checkpoint has been written.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::thread::{self, JoinHandle};

use crate::cancel::CancellationToken;
use crate::error::EngineError;
use crate::log_store::LogStore;
use crate::model::{RunConfig, RunResult};
use crate::progress::ProgressCallback;
use crate::run::CopyEngine;

/// Everything a background run needs.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub source_root: PathBuf,
    pub dest_root: PathBuf,
    pub log_path: PathBuf,
    pub config: RunConfig,
}

/// Handle on a run executing in the background.
pub struct RunHandle {
    thread: JoinHandle<Result<RunResult, EngineError>>,
    cancel: CancellationToken,
}

impl RunHandle {
    /// Ask the run to stop before its next entry.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the run, including its final checkpoint, to finish.
    pub fn join(self) -> Result<RunResult, EngineError> {
        self.thread.join().map_err(|payload| {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            EngineError::WorkerPanicked { message }
        })?
    }
}

/// Start a run on a dedicated thread.
///
/// The log is created first if it does not exist yet. Only one run per log
/// may be active in this process; a second request for the same log fails
/// with `RunInProgress` until the first one finishes. A destination that
/// resolves to the source directory itself is refused with `InvalidPath`.
pub fn spawn_run(
    request: RunRequest,
    progress: Box<dyn ProgressCallback>,
    cancel: CancellationToken,
) -> Result<RunHandle, EngineError> {
    if same_directory(&request.source_root, &request.dest_root) {
        return Err(EngineError::InvalidPath {
            path: request.dest_root,
            reason: "destination is the source directory".to_string(),
        });
    }

    let guard = ActiveRunGuard::acquire(&request.log_path)?;
    let worker_cancel = cancel.clone();

    let thread = thread::Builder::new()
        .name("copy-worker".to_string())
        .spawn(move || {
            let _guard = guard;
            LogStore::new(&request.log_path).initialize(&request.source_root)?;
            CopyEngine::new(request.config).run(
                &request.source_root,
                &request.dest_root,
                &request.log_path,
                Some(progress.as_ref()),
                &worker_cancel,
            )
        })
        .map_err(|e| EngineError::WorkerPanicked {
            message: format!("failed to spawn worker thread: {}", e),
        })?;

    Ok(RunHandle { thread, cancel })
}

fn same_directory(a: &Path, b: &Path) -> bool {
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn active_logs() -> &'static Mutex<HashSet<PathBuf>> {
    static ACTIVE: OnceLock<Mutex<HashSet<PathBuf>>> = OnceLock::new();
    ACTIVE.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Marks a log as in use for as long as it lives.
struct ActiveRunGuard {
    key: PathBuf,
}

impl ActiveRunGuard {
    fn acquire(log_path: &Path) -> Result<Self, EngineError> {
        let key = guard_key(log_path);
        let mut active = active_logs().lock().unwrap_or_else(|e| e.into_inner());
        if !active.insert(key.clone()) {
            return Err(EngineError::RunInProgress {
                log: log_path.to_path_buf(),
            });
        }
        Ok(ActiveRunGuard { key })
    }
}

impl Drop for ActiveRunGuard {
    fn drop(&mut self) {
        let mut active = active_logs().lock().unwrap_or_else(|e| e.into_inner());
        active.remove(&self.key);
    }
}

/// Normalize a log path so different spellings of the same file collide.
///
/// The log itself may not exist yet, so the parent directory is resolved
/// instead.
fn guard_key(log_path: &Path) -> PathBuf {
    let file_name = match log_path.file_name() {
        Some(name) => name,
        None => return log_path.to_path_buf(),
    };
    let parent = match log_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    match std::fs::canonicalize(parent) {
        Ok(parent) => parent.join(file_name),
        Err(_) => log_path.to_path_buf(),
    }
}
