//! Reference driver: one directory and one rayon worker per thread.
//!
//! Each worker creates and writes its files, re-checks them for a number of
//! passes, then empties its directory. Corrupted files are retained on disk.
//! Scheduling is intentionally plain; it exists to exercise the core.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fsverify_config::{log_driver_error, log_driver_info, Config};
use fsverify_core::{CheckOutcome, Directory, OsRandom};
use rayon::prelude::*;
use rayon::ThreadPool;

/// Upper bound on the automatically chosen worker count
pub const MAX_DEFAULT_WORKERS: usize = 8;

/// min(cpu_cores, MAX_DEFAULT_WORKERS)
pub fn default_worker_count() -> usize {
    num_cpus::get().clamp(1, MAX_DEFAULT_WORKERS)
}

fn create_thread_pool(threads: usize) -> Result<ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("fsverify-worker-{}", i))
        .build()
        .context("Failed to create worker thread pool")
}

/// Totals across all workers.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub workers: usize,
    pub files_written: usize,
    pub bytes_written: u64,
    pub checks: usize,
    pub short_or_long: usize,
    pub device_full: usize,
    pub sync_failed: usize,
    pub corruptions: usize,
    pub removed: usize,
    pub refused: usize,
}

impl RunSummary {
    fn merge(&mut self, other: &RunSummary) {
        self.workers += other.workers;
        self.files_written += other.files_written;
        self.bytes_written += other.bytes_written;
        self.checks += other.checks;
        self.short_or_long += other.short_or_long;
        self.device_full += other.device_full;
        self.sync_failed += other.sync_failed;
        self.corruptions += other.corruptions;
        self.removed += other.removed;
        self.refused += other.refused;
    }

    pub fn is_clean(&self) -> bool {
        self.corruptions == 0
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "fsverify summary")?;
        writeln!(f, "  workers:        {}", self.workers)?;
        writeln!(f, "  files written:  {}", self.files_written)?;
        writeln!(f, "  bytes written:  {}", self.bytes_written)?;
        writeln!(f, "  checks:         {}", self.checks)?;
        writeln!(f, "  size mismatch:  {}", self.short_or_long)?;
        writeln!(f, "  device full:    {}", self.device_full)?;
        writeln!(f, "  sync failures:  {}", self.sync_failed)?;
        writeln!(f, "  corruptions:    {}", self.corruptions)?;
        writeln!(f, "  removed:        {}", self.removed)?;
        write!(f, "  refused:        {}", self.refused)
    }
}

/// Run every worker under `root` and merge their summaries.
///
/// The first fatal error from any worker aborts the run.
pub fn run(root: &Path, config: &Config) -> Result<RunSummary> {
    let workers = config.run.threads.unwrap_or_else(default_worker_count);
    let pool = create_thread_pool(workers)?;

    log_driver_info!(
        "Starting run",
        root = display(root.display()),
        workers = workers,
        files_per_worker = config.run.files_per_worker,
        passes = config.run.passes,
    );

    let results: Vec<Result<RunSummary>> = pool.install(|| {
        (0..workers)
            .into_par_iter()
            .map(|index| {
                let dir = worker_dir(root, index);
                run_worker(&dir, config).with_context(|| format!("worker {} ({})", index, dir.display()))
            })
            .collect()
    });

    let mut summary = RunSummary::default();
    for result in results {
        summary.merge(&result?);
    }
    Ok(summary)
}

pub fn worker_dir(root: &Path, index: usize) -> PathBuf {
    root.join(format!("worker-{}", index))
}

fn run_worker(path: &Path, config: &Config) -> fsverify_core::Result<RunSummary> {
    let dir = Directory::create(path)?;
    let mut rng = OsRandom;
    let mut summary = RunSummary {
        workers: 1,
        ..RunSummary::default()
    };

    for _ in 0..config.run.files_per_worker {
        let file = dir.create_file(&config.files, &mut rng)?;
        let report = file.lock()?.write(&config.files)?;

        summary.files_written += 1;
        summary.bytes_written += report.bytes_written;
        summary.device_full += usize::from(report.device_full);
        summary.sync_failed += usize::from(report.sync_failed);
        if report.immediate.is_some() {
            summary.checks += 1;
        }
        if report.corruption_detected() {
            summary.corruptions += 1;
        }
    }

    for _ in 0..config.run.passes {
        for file in dir.files()? {
            match file.lock()?.check() {
                Ok(CheckOutcome::Skipped) => {}
                Ok(outcome) => {
                    summary.checks += 1;
                    if matches!(outcome, CheckOutcome::Short { .. } | CheckOutcome::Long { .. }) {
                        summary.short_or_long += 1;
                    }
                }
                Err(e) if e.is_corruption() => {
                    summary.checks += 1;
                    summary.corruptions += 1;
                    log_driver_error!("Check failed", error = display(&e));
                }
                Err(e) => return Err(e),
            }
        }
    }

    let deleted = dir.delete_all()?;
    summary.removed = deleted.removed;
    summary.refused = deleted.refused;
    Ok(summary)
}
