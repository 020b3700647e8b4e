//! CopyLog - Command-line front end for the copy engine.
//!
//! Collects the source, destination and log paths, renders progress on
//! stderr and turns Ctrl-C into a cooperative stop: the file being copied
//! finishes, the next one is marked `interrupted`, and the log is saved
//! before the process exits.

use anyhow::{bail, Context};
use clap::Parser;
use crossbeam_channel::Receiver;
use engine::{
    initialize_run, request_cancel, spawn_run, spinner_frame, CancellationToken,
    ChannelProgress, ChecksumAlgorithm, EntryStatus, LogStore, ProgressUpdate, RunConfig,
    RunRequest, RunResult,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Failed entries listed in the final report
const MAX_REPORTED_FAILURES: usize = 20;

/// CopyLog - resumable, verified bulk copy
#[derive(Parser, Debug)]
#[command(name = "copylog")]
#[command(version)]
#[command(about = "Copy a directory tree once, verify every file, and resume where it stopped")]
struct Args {
    /// Source directory
    #[arg(long, value_name = "PATH")]
    src: PathBuf,

    /// Destination directory
    #[arg(long, value_name = "PATH")]
    dst: PathBuf,

    /// CSV status log (created on first run, reused afterwards)
    #[arg(long, value_name = "FILE")]
    log: PathBuf,

    /// Save the log after this many processed files (0: only at the end)
    #[arg(long, value_name = "N", default_value_t = 100)]
    checkpoint_interval: usize,

    /// Checksum algorithm for verification: md5, sha256, blake3
    #[arg(long, value_name = "ALGORITHM", default_value = "md5")]
    hash: String,

    /// Longest file name shown in the progress line
    #[arg(long, value_name = "CHARS", default_value_t = 48)]
    max_name_len: usize,

    /// Only create the log, do not copy anything
    #[arg(long)]
    init_only: bool,

    /// Enable verbose output
    #[arg(long)]
    verbose: bool,
}

/// How a CLI invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    /// Log created, nothing copied (`--init-only`)
    Initialized,
    /// Every entry is `success`
    Completed,
    /// The run finished but some entries are not `success`
    Incomplete,
    /// Stopped by Ctrl-C
    Cancelled,
}

impl Outcome {
    fn exit_code(self) -> ExitCode {
        match self {
            Outcome::Initialized | Outcome::Completed => ExitCode::SUCCESS,
            Outcome::Incomplete => ExitCode::from(1),
            Outcome::Cancelled => ExitCode::from(130),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    match run_cli(&args).await {
        Ok(outcome) => outcome.exit_code(),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Main CLI logic - separated for testability
async fn run_cli(args: &Args) -> anyhow::Result<Outcome> {
    // An existing log is enough to resume; its entries report a missing source
    if !args.log.exists() && !args.src.is_dir() {
        bail!("Source is not a directory: {}", args.src.display());
    }

    let algorithm = match ChecksumAlgorithm::from_name(&args.hash) {
        Some(algorithm) => algorithm,
        None => bail!(
            "Invalid hash algorithm '{}'. Must be 'md5', 'sha256', or 'blake3'",
            args.hash
        ),
    };

    if args.init_only {
        let created = initialize_run(&args.src, &args.log).context("Log creation failed")?;
        if created {
            eprintln!("Created log {}", args.log.display());
        } else {
            eprintln!("Log {} already exists; left unchanged", args.log.display());
        }
        return Ok(Outcome::Initialized);
    }

    let config = RunConfig::default()
        .with_checkpoint_interval(args.checkpoint_interval)
        .with_algorithm(algorithm);
    let request = RunRequest {
        source_root: args.src.clone(),
        dest_root: args.dst.clone(),
        log_path: args.log.clone(),
        config,
    };

    let (tx, rx) = crossbeam_channel::unbounded();
    let cancel = CancellationToken::new();
    let handle = spawn_run(
        request,
        Box::new(ChannelProgress::new(tx, args.max_name_len)),
        cancel.clone(),
    )?;

    let renderer = tokio::task::spawn_blocking(move || render_progress(rx));
    let worker = tokio::task::spawn_blocking(move || handle.join());
    tokio::pin!(worker);

    // The worker must finish (and write its final checkpoint) before we exit
    let joined = loop {
        tokio::select! {
            joined = &mut worker => break joined,
            signal = tokio::signal::ctrl_c() => {
                if signal.is_ok() {
                    if cancel.is_cancelled() {
                        eprintln!("\nStill stopping, waiting for the current file to finish...");
                    } else {
                        eprintln!("\nStopping process after current file...");
                    }
                    request_cancel(&cancel);
                }
            }
        }
    };
    let result = joined.context("Copy worker task failed")??;
    renderer.await.context("Progress renderer failed")?;

    print_report(args, &result);

    Ok(if result.cancelled {
        Outcome::Cancelled
    } else if result.summary.is_complete() {
        Outcome::Completed
    } else {
        Outcome::Incomplete
    })
}

/// Drive the progress line until the run finishes or the sender goes away.
fn render_progress(rx: Receiver<ProgressUpdate>) {
    let bar = ProgressBar::hidden();
    let style = ProgressStyle::with_template("{msg}\n[{bar:40}] {pos}/{len}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");

    for update in rx {
        match update {
            ProgressUpdate::RunStarted {
                total,
                already_done,
            } => {
                bar.set_draw_target(indicatif::ProgressDrawTarget::stderr());
                bar.set_style(style.clone());
                bar.set_length(total as u64);
                bar.set_position(already_done as u64);
                if already_done > 0 {
                    bar.println(format!(
                        "Resuming: {} of {} files already copied",
                        already_done, total
                    ));
                }
            }
            ProgressUpdate::EntryCompleted {
                processed,
                total,
                display_name,
                status,
            } => {
                bar.inc(1);
                bar.set_message(format!(
                    "{} Copied: {} out of {} - {}",
                    spinner_frame(processed),
                    processed,
                    total,
                    display_name
                ));
                if !status.is_done() {
                    bar.println(format!("  {}: {}", display_name, status));
                }
            }
            ProgressUpdate::Checkpointed { processed } => {
                tracing::debug!(processed, "progress saved");
            }
            ProgressUpdate::RunFinished { .. } => break,
        }
    }
    bar.finish_and_clear();
}

fn print_report(args: &Args, result: &RunResult) {
    let summary = &result.summary;
    let elapsed = (result.finished_at - result.started_at)
        .to_std()
        .unwrap_or_default();

    eprintln!();
    if result.cancelled {
        eprintln!("Copy stopped; run again with the same log to resume.");
    } else {
        eprintln!("File copying process completed.");
    }
    eprintln!(
        "Processed {} files this run ({} already done, {} in log)",
        result.processed, result.skipped, result.total
    );
    eprintln!(
        "Summary: {} success, {} error, {} corruption detected, {} interrupted, {} pending",
        summary.success,
        summary.error,
        summary.corruption_detected,
        summary.interrupted,
        summary.pending
    );
    eprintln!("Elapsed: {}", format_duration(elapsed));

    if summary.error + summary.corruption_detected == 0 {
        return;
    }

    // The log is the source of truth; list failures from it rather than from memory
    let entries = match LogStore::new(&args.log).load() {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(error = %e, "could not reload log for the report");
            return;
        }
    };
    eprintln!();
    eprintln!("Failed files:");
    for entry in entries
        .iter()
        .filter(|e| matches!(e.status, EntryStatus::Error(_) | EntryStatus::CorruptionDetected))
        .take(MAX_REPORTED_FAILURES)
    {
        eprintln!("  {}: {}", entry.path.display(), entry.status);
    }
    let failed = summary.error + summary.corruption_detected;
    if failed > MAX_REPORTED_FAILURES {
        eprintln!(
            "  ... and {} more (see {})",
            failed - MAX_REPORTED_FAILURES,
            args.log.display()
        );
    }
}

fn format_duration(elapsed: std::time::Duration) -> String {
    let secs = elapsed.as_secs();
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs = secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, mins, secs)
    } else if mins > 0 {
        format!("{}m {}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}
