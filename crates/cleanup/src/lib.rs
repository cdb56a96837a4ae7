#![deny(unsafe_code)]
#![deny(missing_docs)]

//! # Overview
//!
//! `gus-cleanup` is the deletion pass from spec §4.9: once a file is
//! confirmed backed up, the cleaner re-stats the source to make sure it
//! still matches what was recorded, deletes it through the adapter, and
//! commits `deleted_from_source`. It runs single-threaded (spec §4.9 has
//! no concurrency section of its own, unlike the worker pool or
//! verifier) and only after pre-flight safety checks pass.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use gus_adapter::Adapter;
use gus_core::{CleanupRefusal, FileStatus, NormalizedPath, RunConfig};
use gus_errorlog::{ErrorKind, ErrorLog};
use gus_progress::ProgressAggregator;
use gus_statelog::StateLog;
use time::OffsetDateTime;

/// Checks the cleaner's pre-flight safety interlocks (spec §4.9): refuse
/// to run against an empty state log (nothing has been confirmed backed
/// up yet) or when source and destination resolve to the same path
/// (already checked at [`RunConfig`](gus_core::RunConfig) construction,
/// re-checked here since the cleaner can be invoked on its own).
pub fn preflight(config: &RunConfig, state_log: &StateLog) -> Result<(), CleanupRefusal> {
    if state_log.is_empty() {
        return Err(CleanupRefusal::EmptyStateLog);
    }
    if config.source_root == config.dest_root {
        return Err(CleanupRefusal::SourceEqualsDestination);
    }
    Ok(())
}

/// Deletes confirmed-backed-up source files, one at a time.
pub struct Cleaner {
    adapter: Arc<dyn Adapter>,
    state_log: Arc<StateLog>,
    error_log: Arc<ErrorLog>,
    progress: Arc<ProgressAggregator>,
    cancel: Arc<AtomicBool>,
}

impl Cleaner {
    /// Creates a cleaner for one run. Call [`preflight`] before [`Cleaner::run`].
    #[must_use]
    pub fn new(
        adapter: Arc<dyn Adapter>,
        state_log: Arc<StateLog>,
        error_log: Arc<ErrorLog>,
        progress: Arc<ProgressAggregator>,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            adapter,
            state_log,
            error_log,
            progress,
            cancel,
        }
    }

    /// Deletes every eligible record's source file.
    pub fn run(&self, call_timeout: std::time::Duration) {
        let candidates = self
            .state_log
            .iterate(|record| matches!(record.status, FileStatus::BackedUp | FileStatus::Verified));

        for record in candidates {
            if self.cancel.load(Ordering::Relaxed) {
                return;
            }
            self.progress.set_worker_status(0, format!("cleaning up {}", record.path));
            self.clean_one(&record.path, record.size, record.mtime, call_timeout);
        }
        self.progress.clear_worker_status(0);
    }

    fn clean_one(&self, path: &NormalizedPath, recorded_size: u64, recorded_mtime: OffsetDateTime, call_timeout: std::time::Duration) {
        match self.adapter.stat(path, call_timeout) {
            Ok(None) => {
                // Source is already gone; nothing left to delete.
                tracing::info!(path = %path, "source already absent at cleanup time");
                self.commit_deleted(path);
            }
            Ok(Some(entry)) if entry.size == recorded_size && entry.mtime == recorded_mtime => {
                match self.adapter.delete(path) {
                    Ok(()) => {
                        self.commit_deleted(path);
                        self.progress.record_completed(0);
                    }
                    Err(err) => {
                        let _ = self.error_log.append(ErrorKind::Other, Some(path), format!("failed to delete source file: {err}"));
                    }
                }
            }
            Ok(Some(_)) => {
                let _ = self.error_log.append(
                    ErrorKind::Other,
                    Some(path),
                    "source file changed since backup; refusing to delete",
                );
                self.progress.record_skipped();
            }
            Err(err) => {
                let _ = self.error_log.append(ErrorKind::Other, Some(path), format!("failed to stat source before delete: {err}"));
            }
        }
    }

    fn commit_deleted(&self, path: &NormalizedPath) {
        let Some(mut record) = self.state_log.get(path) else { return };
        record.status = FileStatus::DeletedFromSource;
        record.last_updated_at = OffsetDateTime::now_utc();
        if let Err(err) = self.state_log.upsert(record) {
            tracing::error!(path = %path, error = %err, "failed to commit deleted-from-source status");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gus_adapter::mount::MountAdapter;
    use gus_core::config::Mode;
    use gus_core::FileRecord;
    use std::fs;

    fn progress() -> Arc<ProgressAggregator> {
        Arc::new(ProgressAggregator::new(
            "job".to_owned(),
            Mode::Cleanup,
            gus_core::snapshot::ArtifactPaths::default(),
        ))
    }

    #[test]
    fn preflight_refuses_empty_state_log() {
        let source = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        let error_log = ErrorLog::open(dest.path().join("gus_errors.log")).unwrap();
        let state_log = StateLog::open(dest.path().join("gus_state.md"), &error_log).unwrap();
        let config = RunConfig::new(source.path().to_path_buf(), dest.path().to_path_buf(), Mode::Cleanup, None).unwrap();

        let err = preflight(&config, &state_log).unwrap_err();
        assert!(matches!(err, CleanupRefusal::EmptyStateLog));
    }

    #[test]
    fn matching_source_is_deleted_and_committed() {
        let source = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        fs::write(source.path().join("a.jpg"), b"hello").unwrap();
        let metadata = fs::metadata(source.path().join("a.jpg")).unwrap();
        let mtime: OffsetDateTime = metadata.modified().unwrap().into();

        let error_log = Arc::new(ErrorLog::open(dest.path().join("gus_errors.log")).unwrap());
        let state_log = Arc::new(StateLog::open(dest.path().join("gus_state.md"), &error_log).unwrap());

        let mut record = FileRecord::new_pending(NormalizedPath::new("a.jpg"), metadata.len(), mtime, mtime);
        record.status = FileStatus::BackedUp;
        state_log.upsert(record).unwrap();

        let adapter: Arc<dyn Adapter> = Arc::new(MountAdapter::new(source.path().to_path_buf()));
        let cleaner = Cleaner::new(adapter, Arc::clone(&state_log), error_log, progress(), Arc::new(AtomicBool::new(false)));
        cleaner.run(std::time::Duration::from_secs(5));

        assert!(!source.path().join("a.jpg").exists());
        let record = state_log.get(&NormalizedPath::new("a.jpg")).unwrap();
        assert_eq!(record.status, FileStatus::DeletedFromSource);
    }

    #[test]
    fn changed_source_is_not_deleted() {
        let source = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        fs::write(source.path().join("a.jpg"), b"hello").unwrap();

        let error_log = Arc::new(ErrorLog::open(dest.path().join("gus_errors.log")).unwrap());
        let state_log = Arc::new(StateLog::open(dest.path().join("gus_state.md"), &error_log).unwrap());

        let now = OffsetDateTime::now_utc();
        let mut record = FileRecord::new_pending(NormalizedPath::new("a.jpg"), 999, now, now);
        record.status = FileStatus::BackedUp;
        state_log.upsert(record).unwrap();

        let adapter: Arc<dyn Adapter> = Arc::new(MountAdapter::new(source.path().to_path_buf()));
        let cleaner = Cleaner::new(adapter, Arc::clone(&state_log), error_log, progress(), Arc::new(AtomicBool::new(false)));
        cleaner.run(std::time::Duration::from_secs(5));

        assert!(source.path().join("a.jpg").exists());
        let record = state_log.get(&NormalizedPath::new("a.jpg")).unwrap();
        assert_eq!(record.status, FileStatus::BackedUp);
    }
}
