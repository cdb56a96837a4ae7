#![deny(unsafe_code)]
#![deny(missing_docs)]

//! # Overview
//!
//! `gus-engine` is the supervisor from spec §4.8/§9: it owns a single
//! run's state log, error log, progress aggregator, and cancellation
//! flag, constructs the scan/copy/verify/cleanup pipeline appropriate to
//! the run's [`Mode`](gus_core::Mode), and exposes the terminal
//! [`JobSnapshot`](gus_core::JobSnapshot) contract external adapters
//! consume.
//!
//! No global mutable state: every [`Supervisor`] instantiates its own
//! pools, logs, and queues, all torn down deterministically when
//! [`Supervisor::run`] returns (spec §5, §9). The transport
//! [`Adapter`](gus_adapter::Adapter) is constructed by the caller and
//! handed in — device discovery and external-tool path resolution are
//! out of scope for the engine (spec §1's "prerequisite checker"
//! collaborator) and live in whatever calls this crate.

use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gus_adapter::Adapter;
use gus_core::config::Mode;
use gus_core::snapshot::{ArtifactPaths, JobSnapshot, Lifecycle, SnapshotError};
use gus_core::{EngineError, RunConfig};
use gus_errorlog::{ErrorKind, ErrorLog};
use gus_progress::{ProgressAggregator, ProgressSubscriber, Ticker};
use gus_statelog::StateLog;

/// Capacity of the bounded scanner-to-worker channel (spec §4/§5: "a
/// bounded queue" — sized generously enough that a fast scanner rarely
/// blocks on a slower worker pool without buffering an unbounded backlog
/// in memory).
pub const BACKUP_QUEUE_CAPACITY: usize = 256;

/// How often the progress ticker emits automatic snapshots while a run
/// is active (spec §4.6 caps this at 10 Hz; this interval sits well
/// under that cap).
pub const TICKER_INTERVAL: Duration = Duration::from_millis(200);

/// Builds a job id unique enough to disambiguate concurrent runs against
/// the same destination in logs and snapshots: mode, process id, and a
/// wall-clock timestamp.
#[must_use]
pub fn generate_job_id(mode: Mode) -> String {
    let now = time::OffsetDateTime::now_utc();
    format!(
        "{:?}-{}-{}",
        mode,
        std::process::id(),
        now.unix_timestamp_nanos()
    )
    .to_lowercase()
}

/// Orchestrates one run of the engine end to end: constructs the
/// pipeline for `config.mode`, wires a shared cancellation flag through
/// every component, and produces the terminal job snapshot (spec §4.8,
/// §9).
pub struct Supervisor {
    job_id: String,
    config: RunConfig,
    adapter: Arc<dyn Adapter>,
    state_log: Arc<StateLog>,
    error_log: Arc<ErrorLog>,
    progress: Arc<ProgressAggregator>,
    cancel: Arc<AtomicBool>,
    user_canceled: Arc<AtomicBool>,
}

impl Supervisor {
    /// Constructs a supervisor for one run: creates `<dest>/<mode>/` if
    /// needed, opens the state log and error log there, and prepares a
    /// fresh progress aggregator. Fails fast with [`EngineError::ArtifactInit`]
    /// if the artifacts cannot be opened — this happens before any
    /// component starts work, matching the "fatal at start, never during
    /// run" classification spec §7 gives configuration failures.
    pub fn new(config: RunConfig, adapter: Arc<dyn Adapter>) -> Result<Self, EngineError> {
        let mode_root = config.mode_root();
        fs::create_dir_all(&mode_root)
            .map_err(|e| EngineError::ArtifactInit(format!("{}: {e}", mode_root.display())))?;

        let error_log = ErrorLog::open(config.error_log_path())
            .map_err(|e| EngineError::ArtifactInit(e.to_string()))?;
        let error_log = Arc::new(error_log);

        let state_log = StateLog::open(config.state_log_path(), &error_log)
            .map_err(|e| EngineError::ArtifactInit(e.to_string()))?;
        let state_log = Arc::new(state_log);

        let job_id = generate_job_id(config.mode);
        let artifacts = ArtifactPaths {
            state_log: config.state_log_path().display().to_string(),
            error_log: config.error_log_path().display().to_string(),
        };
        let progress = Arc::new(ProgressAggregator::new(job_id.clone(), config.mode, artifacts));

        Ok(Self {
            job_id,
            config,
            adapter,
            state_log,
            error_log,
            progress,
            cancel: Arc::new(AtomicBool::new(false)),
            user_canceled: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The id assigned to this run.
    #[must_use]
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Registers a snapshot subscriber. Per spec §9's `AddEmitter` hook,
    /// call this before [`Supervisor::run`] — a primary subscriber (the
    /// CLI or UI event bus) plus any number of secondaries (e.g. an HTTP
    /// mirror) may be added.
    pub fn add_subscriber(&self, subscriber: Arc<dyn ProgressSubscriber>) {
        self.progress.add_subscriber(subscriber);
    }

    /// A clone of the shared cancellation flag, for a caller that wants
    /// to observe it directly (e.g. a signal handler installed outside
    /// this crate).
    #[must_use]
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Requests cancellation. Idempotent: calling this more than once has
    /// no additional effect (spec §5).
    pub fn request_cancel(&self) {
        self.user_canceled.store(true, Ordering::Relaxed);
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Runs the pipeline appropriate to `config.mode` to completion (or
    /// until canceled / a circuit breaker trips), returning the single
    /// terminal snapshot (spec §8 property 6: exactly one terminal
    /// snapshot is emitted after cancellation, and none after).
    pub fn run(&self) -> JobSnapshot {
        self.progress.set_lifecycle(Lifecycle::Running);
        self.progress.set_phase("starting");
        let ticker = Ticker::spawn(Arc::clone(&self.progress), TICKER_INTERVAL);

        let result = match self.config.mode {
            Mode::Mount | Mode::Adb => self.run_backup(),
            Mode::Verify => self.run_verify(),
            Mode::Cleanup => self.run_cleanup(),
        };

        ticker.stop();
        self.finalize(result)
    }

    fn run_backup(&self) -> Result<(), EngineError> {
        self.progress.set_phase("scanning");

        let (sender, receiver) = crossbeam_channel::bounded(BACKUP_QUEUE_CAPACITY);
        let worker_pool = Arc::new(gus_worker::WorkerPool::new(
            Arc::clone(&self.adapter),
            self.config.clone(),
            Arc::clone(&self.state_log),
            Arc::clone(&self.error_log),
            Arc::clone(&self.progress),
            Arc::clone(&self.cancel),
        ));
        let handles = worker_pool.spawn(receiver);

        let scanner = gus_scanner::Scanner::new(
            Arc::clone(&self.adapter),
            self.config.clone(),
            Arc::clone(&self.state_log),
            Arc::clone(&self.error_log),
            Arc::clone(&self.progress),
            Arc::clone(&self.cancel),
        );
        let scan_result = scanner.run(&sender);
        drop(sender);

        if scan_result.is_err() {
            // The circuit breaker tripped: stop workers from claiming any
            // more in-flight items rather than draining the (now closed)
            // queue at their own pace.
            self.cancel.store(true, Ordering::Relaxed);
        }

        self.progress.set_phase("draining");
        for handle in handles {
            let _ = handle.join();
        }

        scan_result
    }

    fn run_verify(&self) -> Result<(), EngineError> {
        self.progress.set_phase("verifying");

        let verifier = gus_verify::Verifier::new(
            Arc::clone(&self.adapter),
            self.config.clone(),
            Arc::clone(&self.state_log),
            Arc::clone(&self.error_log),
            Arc::clone(&self.progress),
            Arc::clone(&self.cancel),
        );

        if self.config.reverify_on_mismatch {
            let (sender, receiver) = crossbeam_channel::unbounded();
            let worker_pool = Arc::new(gus_worker::WorkerPool::new(
                Arc::clone(&self.adapter),
                self.config.clone(),
                Arc::clone(&self.state_log),
                Arc::clone(&self.error_log),
                Arc::clone(&self.progress),
                Arc::clone(&self.cancel),
            ));
            let handles = worker_pool.spawn(receiver);
            verifier.run(Some(&sender));
            drop(sender);
            self.progress.set_phase("recopying");
            for handle in handles {
                let _ = handle.join();
            }
        } else {
            verifier.run(None);
        }

        Ok(())
    }

    fn run_cleanup(&self) -> Result<(), EngineError> {
        self.progress.set_phase("cleaning");
        gus_cleanup::preflight(&self.config, &self.state_log)?;

        let cleaner = gus_cleanup::Cleaner::new(
            Arc::clone(&self.adapter),
            Arc::clone(&self.state_log),
            Arc::clone(&self.error_log),
            Arc::clone(&self.progress),
            Arc::clone(&self.cancel),
        );
        cleaner.run(self.config.call_timeout);
        Ok(())
    }

    fn finalize(&self, result: Result<(), EngineError>) -> JobSnapshot {
        self.progress.set_phase("done");

        let critical_count = self
            .error_log
            .summarize()
            .ok()
            .and_then(|summary| summary.counts.get(&ErrorKind::Critical).copied())
            .unwrap_or(0);

        let snapshot_error = match &result {
            Err(err) => Some(SnapshotError {
                code: err.code().to_owned(),
                message: err.to_string(),
            }),
            Ok(()) if critical_count > 0 => Some(SnapshotError {
                code: "critical_error_logged".to_owned(),
                message: format!("{critical_count} critical error(s) recorded during the run; see the error log"),
            }),
            Ok(()) => None,
        };

        // A user-requested stop always reports as `Canceled`, even if the
        // run also logged a critical error or returned `Err` on its way
        // down — `request_cancel` is the more specific signal of the two.
        let lifecycle = if self.user_canceled.load(Ordering::Relaxed) {
            Lifecycle::Canceled
        } else if result.is_err() || critical_count > 0 {
            Lifecycle::Failed
        } else {
            Lifecycle::Succeeded
        };

        if let Err(err) = &result {
            tracing::error!(error = %err, "run aborted");
        }

        self.progress.set_lifecycle(lifecycle);
        self.progress.emit(snapshot_error)
    }

    /// Direct access to this run's state log, for a caller that wants to
    /// inspect per-file records after the run (e.g. to print a final
    /// summary by status).
    #[must_use]
    pub fn state_log(&self) -> &StateLog {
        &self.state_log
    }

    /// Direct access to this run's error log, e.g. to render a
    /// categorized summary alongside the terminal snapshot.
    #[must_use]
    pub fn error_log(&self) -> &ErrorLog {
        &self.error_log
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gus_adapter::mount::MountAdapter;
    use gus_core::{FileStatus, NormalizedPath};
    use std::fs as stdfs;

    fn config(source: &std::path::Path, dest: &std::path::Path, mode: Mode, workers: Option<usize>) -> RunConfig {
        RunConfig::new(source.to_path_buf(), dest.to_path_buf(), mode, workers).unwrap()
    }

    #[test]
    fn fresh_mount_backup_copies_and_excludes() {
        let source = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();

        stdfs::create_dir_all(source.path().join("DCIM")).unwrap();
        stdfs::write(source.path().join("DCIM/a.jpg"), b"0123456789").unwrap();
        stdfs::create_dir_all(source.path().join("Android/data/app")).unwrap();
        stdfs::write(source.path().join("Android/data/app/x.cache"), b"junk").unwrap();

        let cfg = config(source.path(), dest.path(), Mode::Mount, Some(2));
        let adapter: Arc<dyn Adapter> = Arc::new(MountAdapter::new(source.path().to_path_buf()));
        let supervisor = Supervisor::new(cfg, adapter).unwrap();

        let snapshot = supervisor.run();
        assert_eq!(snapshot.lifecycle, Lifecycle::Succeeded);
        assert!(snapshot.scan_complete);

        let copied = dest.path().join("mount/DCIM/a.jpg");
        assert_eq!(stdfs::read(&copied).unwrap(), b"0123456789");

        let record = supervisor.state_log().get(&NormalizedPath::new("DCIM/a.jpg")).unwrap();
        assert_eq!(record.status, FileStatus::BackedUp);
        assert_eq!(record.source_hash, record.dest_hash);

        let excluded = supervisor
            .state_log()
            .get(&NormalizedPath::new("Android/data/app/x.cache"))
            .unwrap();
        assert_eq!(excluded.status, FileStatus::SkippedExcluded);
    }

    #[test]
    fn second_backup_run_performs_zero_new_copies() {
        let source = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        stdfs::write(source.path().join("a.jpg"), b"hello").unwrap();

        let cfg = config(source.path(), dest.path(), Mode::Mount, Some(1));
        let adapter: Arc<dyn Adapter> = Arc::new(MountAdapter::new(source.path().to_path_buf()));
        let first = Supervisor::new(cfg.clone(), Arc::clone(&adapter)).unwrap();
        let first_snapshot = first.run();
        assert_eq!(first_snapshot.counters.completed, 1);

        let second = Supervisor::new(cfg, adapter).unwrap();
        let second_snapshot = second.run();
        assert_eq!(second_snapshot.lifecycle, Lifecycle::Succeeded);
        assert_eq!(second_snapshot.counters.completed, 0);
        assert_eq!(second_snapshot.counters.skipped, 1);
    }

    #[test]
    fn verify_after_backup_reports_no_mismatches() {
        let source = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        stdfs::write(source.path().join("a.jpg"), b"hello").unwrap();

        let backup_cfg = config(source.path(), dest.path(), Mode::Mount, Some(1));
        let adapter: Arc<dyn Adapter> = Arc::new(MountAdapter::new(source.path().to_path_buf()));
        let backup = Supervisor::new(backup_cfg, Arc::clone(&adapter)).unwrap();
        backup.run();

        let verify_cfg = config(source.path(), dest.path(), Mode::Verify, Some(1));
        let verify = Supervisor::new(verify_cfg, adapter).unwrap();
        let snapshot = verify.run();

        assert_eq!(snapshot.lifecycle, Lifecycle::Succeeded);
        let record = verify.state_log().get(&NormalizedPath::new("a.jpg")).unwrap();
        assert_eq!(record.status, FileStatus::Verified);
    }

    #[test]
    fn verify_flags_tampered_destination_as_mismatch() {
        let source = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        stdfs::write(source.path().join("a.jpg"), b"0123456789").unwrap();

        let backup_cfg = config(source.path(), dest.path(), Mode::Mount, Some(1));
        let adapter: Arc<dyn Adapter> = Arc::new(MountAdapter::new(source.path().to_path_buf()));
        let backup = Supervisor::new(backup_cfg, Arc::clone(&adapter)).unwrap();
        backup.run();

        stdfs::write(dest.path().join("mount/a.jpg"), b"tampered!!").unwrap();

        let verify_cfg = config(source.path(), dest.path(), Mode::Verify, Some(1));
        let verify = Supervisor::new(verify_cfg, adapter).unwrap();
        let snapshot = verify.run();

        assert_eq!(snapshot.lifecycle, Lifecycle::Succeeded);
        let record = verify.state_log().get(&NormalizedPath::new("a.jpg")).unwrap();
        assert_eq!(record.status, FileStatus::Mismatch);
        let summary = verify.error_log().summarize().unwrap();
        assert!(summary.counts.get(&ErrorKind::HashMismatch).copied().unwrap_or(0) >= 1);
    }

    #[test]
    fn backup_then_cleanup_then_backup_performs_zero_copies() {
        let source = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        stdfs::write(source.path().join("a.jpg"), b"hello").unwrap();

        let cfg = config(source.path(), dest.path(), Mode::Mount, Some(1));
        let adapter: Arc<dyn Adapter> = Arc::new(MountAdapter::new(source.path().to_path_buf()));
        Supervisor::new(cfg, Arc::clone(&adapter)).unwrap().run();

        let cleanup_cfg = config(source.path(), dest.path(), Mode::Cleanup, None);
        let cleanup = Supervisor::new(cleanup_cfg, Arc::clone(&adapter)).unwrap();
        let cleanup_snapshot = cleanup.run();
        assert_eq!(cleanup_snapshot.lifecycle, Lifecycle::Succeeded);
        assert!(!source.path().join("a.jpg").exists());

        let rebackup_cfg = config(source.path(), dest.path(), Mode::Mount, Some(1));
        let rebackup = Supervisor::new(rebackup_cfg, adapter).unwrap();
        let rebackup_snapshot = rebackup.run();
        assert_eq!(rebackup_snapshot.counters.completed, 0);
        let record = rebackup.state_log().get(&NormalizedPath::new("a.jpg")).unwrap();
        assert_eq!(record.status, FileStatus::DeletedFromSource);
    }

    #[test]
    fn cleanup_refuses_when_source_equals_dest() {
        let shared = tempfile::tempdir().unwrap();
        let error_log = Arc::new(ErrorLog::open(shared.path().join("cleanup/gus_errors.log")).unwrap());
        let state_log = Arc::new(StateLog::open(shared.path().join("cleanup/gus_state.md"), &error_log).unwrap());
        state_log
            .upsert(gus_core::FileRecord::new_pending(
                NormalizedPath::new("a.jpg"),
                1,
                time::OffsetDateTime::now_utc(),
                time::OffsetDateTime::now_utc(),
            ))
            .unwrap();

        let cfg = RunConfig {
            source_root: shared.path().to_path_buf(),
            dest_root: shared.path().to_path_buf(),
            mode: Mode::Cleanup,
            workers: 1,
            directory_timeout: Duration::from_secs(1),
            call_timeout: Duration::from_secs(1),
            priority_paths: Vec::new(),
            reverify_on_mismatch: false,
        };
        let err = gus_cleanup::preflight(&cfg, &state_log).unwrap_err();
        assert!(matches!(err, gus_core::CleanupRefusal::SourceEqualsDestination));
    }

    #[test]
    fn empty_source_backup_completes_with_zero_counts() {
        let source = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();

        let cfg = config(source.path(), dest.path(), Mode::Mount, Some(2));
        let adapter: Arc<dyn Adapter> = Arc::new(MountAdapter::new(source.path().to_path_buf()));
        let supervisor = Supervisor::new(cfg, adapter).unwrap();
        let snapshot = supervisor.run();

        assert_eq!(snapshot.lifecycle, Lifecycle::Succeeded);
        assert!(snapshot.scan_complete);
        assert_eq!(snapshot.counters.total_discovered, 0);
        assert_eq!(snapshot.counters.completed, 0);
    }

    #[test]
    fn cancellation_emits_a_single_terminal_snapshot() {
        let source = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        for i in 0..10 {
            stdfs::write(source.path().join(format!("f{i}.jpg")), b"hello world").unwrap();
        }

        let cfg = config(source.path(), dest.path(), Mode::Mount, Some(1));
        let adapter: Arc<dyn Adapter> = Arc::new(MountAdapter::new(source.path().to_path_buf()));
        let supervisor = Supervisor::new(cfg, adapter).unwrap();
        supervisor.request_cancel();

        let snapshot = supervisor.run();
        assert_eq!(snapshot.lifecycle, Lifecycle::Canceled);
    }

    #[test]
    fn explicit_cancellation_outranks_a_logged_critical_error() {
        let source = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        stdfs::write(source.path().join("f.jpg"), b"hello world").unwrap();

        let cfg = config(source.path(), dest.path(), Mode::Mount, Some(1));
        let adapter: Arc<dyn Adapter> = Arc::new(MountAdapter::new(source.path().to_path_buf()));
        let supervisor = Supervisor::new(cfg, adapter).unwrap();

        // Simulate a critical error having been logged earlier in the run
        // (e.g. a state-log write failure) ahead of an explicit user stop.
        supervisor.error_log().append(ErrorKind::Critical, None, "simulated critical failure").unwrap();
        supervisor.request_cancel();

        let snapshot = supervisor.run();
        assert_eq!(snapshot.lifecycle, Lifecycle::Canceled);
    }
}
