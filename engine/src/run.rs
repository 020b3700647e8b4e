//! Run orchestration.
//!
//! This module provides the caller-facing lifecycle:
//! - `initialize_run`: create the status log if it does not exist yet
//! - `run_copy` / `CopyEngine::run`: copy and verify every entry that is
//!   not already `success`, checkpointing the log as it goes
//!
//! Each entry is copied, then verified, then recorded, one at a time. A
//! failure only ever affects its own entry; only log and enumeration
//! failures end the run early.

use chrono::Utc;
use std::path::{Component, Path, PathBuf};
use uuid::Uuid;

use crate::cancel::CancellationToken;
use crate::checksums;
use crate::error::{EngineError, FileError};
use crate::fs_ops;
use crate::log_store::{self, LogStore};
use crate::model::{EntryStatus, LogEntry, RunConfig, RunResult};
use crate::progress::{ProgressCallback, ProgressEvent};

/// The copy primitive used for each entry.
///
/// The destination's parent directory exists when `copy` is called.
pub trait FileCopier: Send + Sync {
    /// Copy `src` to `dst`, returning the number of bytes written.
    fn copy(&self, src: &Path, dst: &Path) -> Result<u64, FileError>;
}

/// Copies through the local filesystem, preserving permissions and timestamps.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsCopier;

impl FileCopier for FsCopier {
    fn copy(&self, src: &Path, dst: &Path) -> Result<u64, FileError> {
        fs_ops::copy_file_with_metadata(src, dst)
    }
}

/// Drives one run over a status log.
pub struct CopyEngine {
    config: RunConfig,
    copier: Box<dyn FileCopier>,
}

impl CopyEngine {
    pub fn new(config: RunConfig) -> Self {
        CopyEngine {
            config,
            copier: Box::new(FsCopier),
        }
    }

    /// Replace the copy primitive.
    pub fn with_copier(mut self, copier: impl FileCopier + 'static) -> Self {
        self.copier = Box::new(copier);
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Copy every entry of the log at `log_path` that is not yet `success`.
    ///
    /// Entries are visited in log order. Before each one the cancellation
    /// token is checked; once it is set, that entry is marked `interrupted`
    /// and the loop stops, leaving later entries untouched. The log is
    /// checkpointed every `checkpoint_interval` processed entries and once
    /// more, unconditionally, when the loop ends.
    ///
    /// # Errors
    /// Returns EngineError only when the log cannot be read or written.
    /// Per-file failures are recorded in the log.
    pub fn run(
        &self,
        source_root: &Path,
        dest_root: &Path,
        log_path: &Path,
        progress: Option<&dyn ProgressCallback>,
        cancel: &CancellationToken,
    ) -> Result<RunResult, EngineError> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("copy_run", %run_id);
        let _enter = span.enter();

        let started_at = Utc::now();
        let store = LogStore::new(log_path);
        let mut entries = store.load()?;

        let source_root = match fs_ops::resolve_source_root(source_root) {
            Ok(root) => root,
            Err(e) => {
                // Entries will fail individually; the log still records why
                tracing::warn!(error = %e, "source root is not accessible");
                source_root.to_path_buf()
            }
        };

        let total = entries.len();
        let already_done = entries.iter().filter(|e| e.status.is_done()).count();
        tracing::info!(
            source = %source_root.display(),
            destination = %dest_root.display(),
            log = %log_path.display(),
            total,
            already_done,
            "starting run"
        );
        if let Some(callback) = progress {
            callback.on_run_started(total, already_done);
        }

        let mut processed = 0;
        let mut cancelled = false;

        for index in 0..entries.len() {
            if entries[index].status.is_done() {
                continue;
            }

            if cancel.is_cancelled() {
                tracing::info!(path = %entries[index].path.display(), "cancellation requested, stopping");
                entries[index].status = EntryStatus::Interrupted;
                cancelled = true;
                break;
            }

            let status = self.process_entry(&source_root, dest_root, &entries[index]);
            entries[index].status = status;
            processed += 1;

            if let Some(callback) = progress {
                callback.on_entry_completed(ProgressEvent {
                    processed,
                    total,
                    path: &entries[index].path,
                    status: &entries[index].status,
                });
            }

            if self.config.checkpoint_interval > 0
                && processed % self.config.checkpoint_interval == 0
            {
                store.checkpoint(&entries)?;
                tracing::info!(processed, "progress saved");
                if let Some(callback) = progress {
                    callback.on_checkpoint(processed);
                }
            }
        }

        store.checkpoint(&entries)?;

        let result = RunResult {
            run_id,
            processed,
            skipped: already_done,
            total,
            cancelled,
            summary: log_store::summarize(&entries),
            started_at,
            finished_at: Utc::now(),
        };
        tracing::info!(
            processed,
            cancelled,
            success = result.summary.success,
            errors = result.summary.error,
            corrupt = result.summary.corruption_detected,
            "run finished"
        );

        if let Some(callback) = progress {
            callback.on_run_finished(&result);
        }
        Ok(result)
    }

    /// Copy and verify one entry, folding every failure into its status.
    fn process_entry(&self, source_root: &Path, dest_root: &Path, entry: &LogEntry) -> EntryStatus {
        match self.copy_and_verify(source_root, dest_root, &entry.path) {
            Ok(true) => {
                tracing::debug!(path = %entry.path.display(), "copied and verified");
                EntryStatus::Success
            }
            Ok(false) => {
                tracing::warn!(path = %entry.path.display(), "corruption detected after copy");
                EntryStatus::CorruptionDetected
            }
            Err(e) => {
                tracing::warn!(path = %entry.path.display(), error = %e, "copy failed");
                EntryStatus::Error(e.to_string())
            }
        }
    }

    fn copy_and_verify(
        &self,
        source_root: &Path,
        dest_root: &Path,
        path: &Path,
    ) -> Result<bool, FileError> {
        let (src, dst) = resolve_entry_paths(source_root, dest_root, path)?;

        fs_ops::ensure_parent_dir_exists(&dst)?;
        fs_ops::ensure_distinct_files(&src, &dst)?;
        let bytes = self.copier.copy(&src, &dst)?;
        tracing::trace!(path = %src.display(), bytes, "copy finished, verifying");

        checksums::verify_files(&src, &dst, self.config.algorithm)
    }
}

impl Default for CopyEngine {
    fn default() -> Self {
        Self::new(RunConfig::default())
    }
}

/// Map a logged path to its source file and destination file.
///
/// Absolute paths must live under `source_root`; relative paths (from a
/// hand-written log) are taken relative to it. Neither may climb out of the
/// root with `..`.
fn resolve_entry_paths(
    source_root: &Path,
    dest_root: &Path,
    path: &Path,
) -> Result<(PathBuf, PathBuf), FileError> {
    let outside = || FileError::OutsideSourceRoot {
        path: path.to_path_buf(),
        root: source_root.to_path_buf(),
    };

    let (src, relative) = if path.is_absolute() {
        let relative = path.strip_prefix(source_root).map_err(|_| outside())?;
        (path.to_path_buf(), relative.to_path_buf())
    } else {
        (source_root.join(path), path.to_path_buf())
    };

    if relative.as_os_str().is_empty()
        || relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(outside());
    }

    Ok((src, dest_root.join(relative)))
}

/// Create the status log for `source_root` unless `log_path` already exists.
///
/// Returns true if a new log was written.
pub fn initialize_run(source_root: &Path, log_path: &Path) -> Result<bool, EngineError> {
    LogStore::new(log_path).initialize(source_root)
}

/// Run a copy with the default configuration.
pub fn run_copy(
    source_root: &Path,
    dest_root: &Path,
    log_path: &Path,
    progress: Option<&dyn ProgressCallback>,
    cancel: &CancellationToken,
) -> Result<RunResult, EngineError> {
    CopyEngine::default().run(source_root, dest_root, log_path, progress, cancel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    /// Source tree with `a.txt`, `b_dir/b.txt`, `c.txt` (visited in that order).
    struct Fixture {
        _temp_dir: tempfile::TempDir,
        src: PathBuf,
        dst: PathBuf,
        log: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
            let src = temp_dir.path().join("src");
            fs::create_dir_all(src.join("b_dir")).unwrap();
            fs::write(src.join("a.txt"), b"alpha").unwrap();
            fs::write(src.join("b_dir").join("b.txt"), b"bravo").unwrap();
            fs::write(src.join("c.txt"), b"charlie").unwrap();

            Fixture {
                src,
                dst: temp_dir.path().join("dst"),
                log: temp_dir.path().join("log.csv"),
                _temp_dir: temp_dir,
            }
        }

        fn init(&self) {
            assert!(initialize_run(&self.src, &self.log).expect("initialize"));
        }

        fn statuses(&self) -> Vec<EntryStatus> {
            LogStore::new(&self.log)
                .load()
                .expect("load")
                .into_iter()
                .map(|e| e.status)
                .collect()
        }
    }

    /// Cancels the token once `after` entries have been processed.
    struct CancelAfter {
        token: CancellationToken,
        after: usize,
    }

    impl ProgressCallback for CancelAfter {
        fn on_entry_completed(&self, event: ProgressEvent<'_>) {
            if event.processed == self.after {
                self.token.cancel();
            }
        }
    }

    /// Records every source path handed to the copy primitive.
    #[derive(Clone, Default)]
    struct RecordingCopier {
        copied: Arc<Mutex<Vec<PathBuf>>>,
    }

    impl FileCopier for RecordingCopier {
        fn copy(&self, src: &Path, dst: &Path) -> Result<u64, FileError> {
            self.copied.lock().unwrap().push(src.to_path_buf());
            fs_ops::copy_file_with_metadata(src, dst)
        }
    }

    /// Alters the destination right after a successful copy.
    struct CorruptingCopier;

    impl FileCopier for CorruptingCopier {
        fn copy(&self, src: &Path, dst: &Path) -> Result<u64, FileError> {
            let bytes = fs_ops::copy_file_with_metadata(src, dst)?;
            let mut permissions = fs::metadata(dst).unwrap().permissions();
            permissions.set_readonly(false);
            fs::set_permissions(dst, permissions).unwrap();
            let mut file = fs::OpenOptions::new().append(true).open(dst).unwrap();
            file.write_all(b"!").unwrap();
            Ok(bytes)
        }
    }

    #[test]
    fn test_full_run_copies_and_verifies_every_file() {
        let fx = Fixture::new();
        fx.init();

        let result = run_copy(&fx.src, &fx.dst, &fx.log, None, &CancellationToken::new())
            .expect("run");

        assert_eq!(result.processed, 3);
        assert_eq!(result.skipped, 0);
        assert_eq!(result.total, 3);
        assert!(!result.cancelled);
        assert!(result.summary.is_complete());
        assert_eq!(fx.statuses(), vec![EntryStatus::Success; 3]);

        assert_eq!(fs::read(fx.dst.join("a.txt")).unwrap(), b"alpha");
        assert_eq!(fs::read(fx.dst.join("b_dir").join("b.txt")).unwrap(), b"bravo");
        assert_eq!(fs::read(fx.dst.join("c.txt")).unwrap(), b"charlie");
    }

    #[test]
    fn test_rerun_never_recopies_success() {
        let fx = Fixture::new();
        fx.init();
        run_copy(&fx.src, &fx.dst, &fx.log, None, &CancellationToken::new()).expect("first run");

        // A recopy would restore the original bytes
        fs::write(fx.dst.join("a.txt"), b"left alone").unwrap();

        let copier = RecordingCopier::default();
        let result = CopyEngine::default()
            .with_copier(copier.clone())
            .run(&fx.src, &fx.dst, &fx.log, None, &CancellationToken::new())
            .expect("second run");

        assert_eq!(result.processed, 0);
        assert_eq!(result.skipped, 3);
        assert!(copier.copied.lock().unwrap().is_empty());
        assert_eq!(fs::read(fx.dst.join("a.txt")).unwrap(), b"left alone");
        assert_eq!(fx.statuses(), vec![EntryStatus::Success; 3]);
    }

    #[test]
    fn test_error_then_cancel_then_resume() {
        let fx = Fixture::new();
        fx.init();

        // A regular file where b_dir should be makes directory creation fail
        fs::create_dir_all(&fx.dst).unwrap();
        fs::write(fx.dst.join("b_dir"), b"blocker").unwrap();

        let token = CancellationToken::new();
        let cancel_after_b = CancelAfter {
            token: token.clone(),
            after: 2,
        };
        let result = run_copy(&fx.src, &fx.dst, &fx.log, Some(&cancel_after_b), &token)
            .expect("first run");

        assert!(result.cancelled);
        assert_eq!(result.processed, 2);
        let statuses = fx.statuses();
        assert_eq!(statuses[0], EntryStatus::Success);
        match &statuses[1] {
            EntryStatus::Error(message) => assert!(message.contains("b_dir"), "{}", message),
            other => panic!("expected error, got {:?}", other),
        }
        assert_eq!(statuses[2], EntryStatus::Interrupted);
        assert!(!fx.dst.join("c.txt").exists());

        fs::remove_file(fx.dst.join("b_dir")).unwrap();
        let copier = RecordingCopier::default();
        let result = CopyEngine::default()
            .with_copier(copier.clone())
            .run(&fx.src, &fx.dst, &fx.log, None, &CancellationToken::new())
            .expect("second run");

        assert!(!result.cancelled);
        assert_eq!(result.processed, 2);
        assert_eq!(result.skipped, 1);
        let copied: Vec<_> = copier
            .copied
            .lock()
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_owned())
            .collect();
        assert_eq!(copied, vec!["b.txt", "c.txt"]);
        assert_eq!(fx.statuses(), vec![EntryStatus::Success; 3]);
    }

    #[test]
    fn test_cancel_before_start_interrupts_first_pending_entry() {
        let fx = Fixture::new();
        fx.init();
        let token = CancellationToken::new();
        token.cancel();

        let result = run_copy(&fx.src, &fx.dst, &fx.log, None, &token).expect("run");

        assert!(result.cancelled);
        assert_eq!(result.processed, 0);
        assert_eq!(
            fx.statuses(),
            vec![EntryStatus::Interrupted, EntryStatus::Pending, EntryStatus::Pending]
        );
        assert!(!fx.dst.exists());
    }

    #[test]
    fn test_cancel_after_last_entry_is_not_a_cancelled_run() {
        let fx = Fixture::new();
        fx.init();
        let token = CancellationToken::new();
        let cancel_at_end = CancelAfter {
            token: token.clone(),
            after: 3,
        };

        let result = run_copy(&fx.src, &fx.dst, &fx.log, Some(&cancel_at_end), &token)
            .expect("run");

        assert!(!result.cancelled);
        assert_eq!(fx.statuses(), vec![EntryStatus::Success; 3]);
    }

    #[test]
    fn test_corruption_is_flagged_and_retried_next_run() {
        let fx = Fixture::new();
        fx.init();

        let result = CopyEngine::default()
            .with_copier(CorruptingCopier)
            .run(&fx.src, &fx.dst, &fx.log, None, &CancellationToken::new())
            .expect("corrupting run");

        assert_eq!(result.summary.corruption_detected, 3);
        assert_eq!(fx.statuses(), vec![EntryStatus::CorruptionDetected; 3]);

        let result = run_copy(&fx.src, &fx.dst, &fx.log, None, &CancellationToken::new())
            .expect("clean run");
        assert_eq!(result.processed, 3);
        assert_eq!(fx.statuses(), vec![EntryStatus::Success; 3]);
        assert_eq!(fs::read(fx.dst.join("c.txt")).unwrap(), b"charlie");
    }

    #[test]
    fn test_each_algorithm_verifies_copies() {
        for algorithm in [
            checksums::ChecksumAlgorithm::Md5,
            checksums::ChecksumAlgorithm::Sha256,
            checksums::ChecksumAlgorithm::Blake3,
        ] {
            let fx = Fixture::new();
            fx.init();
            let result = CopyEngine::new(RunConfig::default().with_algorithm(algorithm))
                .run(&fx.src, &fx.dst, &fx.log, None, &CancellationToken::new())
                .expect("run");
            assert!(result.summary.is_complete(), "{} run incomplete", algorithm);
        }
    }

    /// Reloads the log at each checkpoint and records what it saw.
    struct CheckpointSnapshots {
        log: PathBuf,
        seen: Mutex<Vec<(usize, Vec<EntryStatus>)>>,
    }

    impl ProgressCallback for CheckpointSnapshots {
        fn on_entry_completed(&self, _event: ProgressEvent<'_>) {}

        fn on_checkpoint(&self, processed: usize) {
            let statuses = LogStore::new(&self.log)
                .load()
                .expect("log readable at checkpoint")
                .into_iter()
                .map(|e| e.status)
                .collect();
            self.seen.lock().unwrap().push((processed, statuses));
        }
    }

    #[test]
    fn test_periodic_checkpoints_match_processed_entries() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("src");
        fs::create_dir(&src).unwrap();
        for i in 0..5 {
            fs::write(src.join(format!("file{}.txt", i)), format!("content {}", i)).unwrap();
        }
        let log = temp_dir.path().join("log.csv");
        initialize_run(&src, &log).unwrap();

        let snapshots = CheckpointSnapshots {
            log: log.clone(),
            seen: Mutex::new(Vec::new()),
        };
        CopyEngine::new(RunConfig::default().with_checkpoint_interval(2))
            .run(&src, &temp_dir.path().join("dst"), &log, Some(&snapshots), &CancellationToken::new())
            .expect("run");

        let seen = snapshots.seen.into_inner().unwrap();
        assert_eq!(seen.iter().map(|(n, _)| *n).collect::<Vec<_>>(), vec![2, 4]);
        for (processed, statuses) in seen {
            for (i, status) in statuses.iter().enumerate() {
                let expected = if i < processed {
                    EntryStatus::Success
                } else {
                    EntryStatus::Pending
                };
                assert_eq!(status, &expected, "entry {} at checkpoint {}", i, processed);
            }
        }
    }

    /// Replaces the log file with a directory during the first copy.
    struct LogSwappingCopier {
        log: PathBuf,
        copied: Mutex<usize>,
    }

    impl FileCopier for LogSwappingCopier {
        fn copy(&self, src: &Path, dst: &Path) -> Result<u64, FileError> {
            let mut copied = self.copied.lock().unwrap();
            if *copied == 0 {
                fs::remove_file(&self.log).unwrap();
                fs::create_dir(&self.log).unwrap();
            }
            *copied += 1;
            fs_ops::copy_file_with_metadata(src, dst)
        }
    }

    #[test]
    fn test_failed_checkpoint_aborts_run() {
        let fx = Fixture::new();
        fx.init();

        let copier = LogSwappingCopier {
            log: fx.log.clone(),
            copied: Mutex::new(0),
        };
        let result = CopyEngine::new(RunConfig::default().with_checkpoint_interval(1))
            .with_copier(copier)
            .run(&fx.src, &fx.dst, &fx.log, None, &CancellationToken::new());

        assert!(matches!(result, Err(EngineError::LogIo { .. })));
        assert!(fx.dst.join("a.txt").exists());
        assert!(!fx.dst.join("b_dir").exists());
        assert!(!fx.dst.join("c.txt").exists());
    }

    #[test]
    fn test_destination_equal_to_source_never_truncates() {
        let fx = Fixture::new();
        fx.init();

        let result = run_copy(&fx.src, &fx.src, &fx.log, None, &CancellationToken::new())
            .expect("run");

        assert_eq!(result.summary.error, 3);
        for status in fx.statuses() {
            assert!(
                matches!(&status, EntryStatus::Error(m) if m.contains("same file")),
                "{:?}",
                status
            );
        }
        assert_eq!(fs::read(fx.src.join("a.txt")).unwrap(), b"alpha");
        assert_eq!(fs::read(fx.src.join("b_dir").join("b.txt")).unwrap(), b"bravo");
        assert_eq!(fs::read(fx.src.join("c.txt")).unwrap(), b"charlie");
    }

    #[cfg(unix)]
    #[test]
    fn test_destination_reaching_source_through_symlink_is_refused() {
        let fx = Fixture::new();
        fx.init();
        std::os::unix::fs::symlink(&fx.src, &fx.dst).unwrap();

        let result = CopyEngine::default()
            .with_copier(RecordingCopier::default())
            .run(&fx.src, &fx.dst, &fx.log, None, &CancellationToken::new())
            .expect("run");

        assert_eq!(result.summary.error, 3);
        assert_eq!(fs::read(fx.src.join("c.txt")).unwrap(), b"charlie");
    }

    #[test]
    fn test_missing_log_is_fatal() {
        let fx = Fixture::new();
        let result = run_copy(&fx.src, &fx.dst, &fx.log, None, &CancellationToken::new());
        assert!(matches!(result, Err(EngineError::LogIo { .. })));
        assert!(!fx.dst.exists());
    }

    #[test]
    fn test_vanished_source_file_is_recorded_and_run_continues() {
        let fx = Fixture::new();
        fx.init();
        fs::remove_file(fx.src.join("a.txt")).unwrap();

        let result = run_copy(&fx.src, &fx.dst, &fx.log, None, &CancellationToken::new())
            .expect("run");

        assert_eq!(result.processed, 3);
        assert_eq!(result.summary.error, 1);
        let statuses = fx.statuses();
        assert!(matches!(&statuses[0], EntryStatus::Error(m) if m.starts_with("cannot read")));
        assert_eq!(&statuses[1..], &[EntryStatus::Success, EntryStatus::Success]);
    }

    #[test]
    fn test_hand_written_log_with_relative_and_foreign_paths() {
        let fx = Fixture::new();
        fs::write(
            &fx.log,
            "file,status\nb_dir/b.txt,pending\n/elsewhere/x.txt,pending\n../escape.txt,pending\n",
        )
        .unwrap();

        let result = run_copy(&fx.src, &fx.dst, &fx.log, None, &CancellationToken::new())
            .expect("run");

        assert_eq!(result.processed, 3);
        let statuses = fx.statuses();
        assert_eq!(statuses[0], EntryStatus::Success);
        assert!(matches!(&statuses[1], EntryStatus::Error(m) if m.contains("not under source root")));
        assert!(matches!(&statuses[2], EntryStatus::Error(m) if m.contains("not under source root")));
        assert_eq!(fs::read(fx.dst.join("b_dir").join("b.txt")).unwrap(), b"bravo");
    }

    #[test]
    fn test_log_is_a_snapshot_of_the_tree() {
        let fx = Fixture::new();
        fx.init();
        fs::write(fx.src.join("d.txt"), b"added later").unwrap();

        let result = run_copy(&fx.src, &fx.dst, &fx.log, None, &CancellationToken::new())
            .expect("run");

        assert_eq!(result.total, 3);
        assert!(!fx.dst.join("d.txt").exists());
    }
}
