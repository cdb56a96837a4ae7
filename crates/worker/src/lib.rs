#![deny(unsafe_code)]
#![deny(missing_docs)]

//! # Overview
//!
//! `gus-worker` is the consumer side of spec §4.5: a fixed-size pool of
//! `std::thread` workers draining a bounded [`WorkItem`] queue, streaming
//! each file through an [`Adapter`](gus_adapter::Adapter), confirming the
//! source and destination hashes match, and committing the terminal
//! state-log transition (`backed_up`, `failed`, or `missing_source`).
//!
//! A copy failure classified `transient` or `timeout` is retried with the
//! shared backoff schedule from [`gus_core::retry`] up to
//! [`gus_core::retry::DEFAULT_MAX_ATTEMPTS`]; `permanent` failures are
//! committed immediately. A state-log write failure is treated as fatal
//! to the whole run (the log's durability guarantee is void past that
//! point), so a worker that hits one trips the shared cancellation flag
//! rather than limping on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use gus_adapter::{Adapter, ProgressSink};
use gus_core::retry::{backoff_for_attempt, DEFAULT_MAX_ATTEMPTS};
use gus_core::{AdapterErrorKind, FileRecord, FileStatus, NormalizedPath, RunConfig, WorkItem};
use gus_errorlog::{ErrorKind, ErrorLog};
use gus_progress::ProgressAggregator;
use gus_statelog::{StateLog, StateLogError};
use time::OffsetDateTime;

/// Fixed-size pool of copy workers.
pub struct WorkerPool {
    adapter: Arc<dyn Adapter>,
    config: RunConfig,
    state_log: Arc<StateLog>,
    error_log: Arc<ErrorLog>,
    progress: Arc<ProgressAggregator>,
    cancel: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Creates a worker pool for one run.
    #[must_use]
    pub fn new(
        adapter: Arc<dyn Adapter>,
        config: RunConfig,
        state_log: Arc<StateLog>,
        error_log: Arc<ErrorLog>,
        progress: Arc<ProgressAggregator>,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            adapter,
            config,
            state_log,
            error_log,
            progress,
            cancel,
        }
    }

    /// Spawns `config.workers` threads draining `receiver`, returning
    /// their join handles so the caller can wait for the pool to drain
    /// once the scanner closes the queue.
    pub fn spawn(self: Arc<Self>, receiver: crossbeam_channel::Receiver<WorkItem>) -> Vec<JoinHandle<()>> {
        (0..self.config.workers.max(1) as u32)
            .map(|worker_id| {
                let pool = Arc::clone(&self);
                let receiver = receiver.clone();
                std::thread::spawn(move || pool.worker_loop(worker_id, &receiver))
            })
            .collect()
    }

    fn worker_loop(&self, worker_id: u32, receiver: &crossbeam_channel::Receiver<WorkItem>) {
        while let Ok(item) = receiver.recv() {
            if self.cancel.load(Ordering::Relaxed) {
                break;
            }
            self.process(worker_id, item);
        }
        self.progress.clear_worker_status(worker_id);
    }

    fn process(&self, worker_id: u32, item: WorkItem) {
        let dest_local = item.path.mirrored_under(&self.config.mode_root());
        let mut attempt: u32 = 0;

        loop {
            if self.cancel.load(Ordering::Relaxed) {
                return;
            }

            self.progress.set_worker_status(
                worker_id,
                format!("copying {} ({} bytes, attempt {})", item.path, item.size, attempt + 1),
            );

            if !self.mark_copying(&item.path) {
                return;
            }

            let mut sink = WorkerProgressSink {
                progress: &self.progress,
                worker_id,
                path: item.path.as_str(),
            };

            match self.adapter.copy_file(&item.path, &dest_local, self.config.call_timeout, &mut sink) {
                Ok(outcome) if outcome.src_hash == outcome.dest_hash => {
                    self.commit_backed_up(&item.path, &outcome);
                    self.progress.record_completed(outcome.bytes_copied);
                    self.progress.clear_worker_status(worker_id);
                    return;
                }
                Ok(outcome) => {
                    let _ = self.error_log.append(
                        ErrorKind::HashMismatch,
                        Some(&item.path),
                        format!("source/destination hash mismatch immediately after copy: {} != {}", outcome.src_hash, outcome.dest_hash),
                    );
                    if !self.retry_or_fail(&item.path, worker_id, attempt, "hash mismatch after copy") {
                        return;
                    }
                }
                Err(err) if err.kind == AdapterErrorKind::NotFound => {
                    self.commit_missing_source(&item.path);
                    self.progress.clear_worker_status(worker_id);
                    return;
                }
                Err(err) if err.kind == AdapterErrorKind::Permanent => {
                    let _ = self.error_log.append(ErrorKind::CopyError, Some(&item.path), err.message.clone());
                    self.commit_failed(&item.path, &err.message);
                    self.progress.record_failed();
                    self.progress.clear_worker_status(worker_id);
                    return;
                }
                Err(err) => {
                    let _ = self.error_log.append(ErrorKind::CopyError, Some(&item.path), err.message.clone());
                    if !self.retry_or_fail(&item.path, worker_id, attempt, &err.message) {
                        return;
                    }
                }
            }

            attempt += 1;
        }
    }

    /// Returns `false` if retries are exhausted (the caller must stop) or
    /// the retry was not possible due to a fatal state-log error. On
    /// `true`, the caller should back off and attempt again.
    fn retry_or_fail(&self, path: &NormalizedPath, worker_id: u32, attempt: u32, reason: &str) -> bool {
        if attempt + 1 >= DEFAULT_MAX_ATTEMPTS {
            self.commit_failed(path, reason);
            self.progress.record_failed();
            self.progress.clear_worker_status(worker_id);
            return false;
        }
        std::thread::sleep(backoff_for_attempt(attempt));
        true
    }

    fn mark_copying(&self, path: &NormalizedPath) -> bool {
        let now = OffsetDateTime::now_utc();
        let mut record = self
            .state_log
            .get(path)
            .unwrap_or_else(|| FileRecord::new_pending(path.clone(), 0, now, now));
        record.status = FileStatus::Copying;
        record.attempts += 1;
        record.last_updated_at = now;
        self.upsert_or_trip_cancel(record)
    }

    fn commit_backed_up(&self, path: &NormalizedPath, outcome: &gus_adapter::CopyOutcome) {
        let now = OffsetDateTime::now_utc();
        if let Some(mut record) = self.state_log.get(path) {
            if record.size != outcome.bytes_copied {
                tracing::debug!(path = %path, recorded = record.size, actual = outcome.bytes_copied, "correcting recorded size after copy");
                record.size = outcome.bytes_copied;
            }
            record.source_hash = Some(outcome.src_hash.clone());
            record.dest_hash = Some(outcome.dest_hash.clone());
            record.status = FileStatus::BackedUp;
            record.last_error = None;
            record.last_updated_at = now;
            let _ = self.upsert_or_trip_cancel(record);
        }
    }

    fn commit_missing_source(&self, path: &NormalizedPath) {
        let now = OffsetDateTime::now_utc();
        if let Some(mut record) = self.state_log.get(path) {
            record.status = FileStatus::MissingSource;
            record.last_updated_at = now;
            let _ = self.upsert_or_trip_cancel(record);
        }
        self.progress.record_skipped();
    }

    fn commit_failed(&self, path: &NormalizedPath, message: &str) {
        let now = OffsetDateTime::now_utc();
        if let Some(mut record) = self.state_log.get(path) {
            record.status = FileStatus::Failed;
            record.set_last_error(message);
            record.last_updated_at = now;
            let _ = self.upsert_or_trip_cancel(record);
        }
    }

    /// `StateLogError::InvalidTransition` means the in-memory record the
    /// worker fetched is stale relative to what the log already holds — a
    /// per-file race, not evidence the log itself is broken. Only an I/O or
    /// schema failure calls the log's own durability guarantee into
    /// question, so only those trip the shared cancellation flag; per spec
    /// §7 a rejected transition is recorded and the run continues.
    fn upsert_or_trip_cancel(&self, record: FileRecord) -> bool {
        match self.state_log.upsert(record) {
            Ok(()) => true,
            Err(err @ StateLogError::InvalidTransition { .. }) => {
                tracing::warn!(error = %err, "rejected stale state transition, leaving record as-is");
                let _ = self.error_log.append(ErrorKind::CopyError, None, format!("rejected state transition: {err}"));
                false
            }
            Err(err) => {
                tracing::error!(error = %err, "state log write failed, tripping cancellation");
                let _ = self.error_log.append(ErrorKind::Critical, None, format!("state log write failed: {err}"));
                self.cancel.store(true, Ordering::Relaxed);
                false
            }
        }
    }
}

struct WorkerProgressSink<'a> {
    progress: &'a ProgressAggregator,
    worker_id: u32,
    path: &'a str,
}

impl ProgressSink for WorkerProgressSink<'_> {
    fn on_bytes(&mut self, delta: u64) {
        if delta > 0 {
            self.progress
                .set_worker_status(self.worker_id, format!("copying {} (+{} bytes)", self.path, delta));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gus_adapter::mount::MountAdapter;
    use gus_core::config::Mode;
    use std::fs;

    fn setup() -> (tempfile::TempDir, tempfile::TempDir, RunConfig, Arc<StateLog>, Arc<ErrorLog>) {
        let source = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        let error_log = Arc::new(ErrorLog::open(dest.path().join("gus_errors.log")).unwrap());
        let state_log = Arc::new(StateLog::open(dest.path().join("gus_state.md"), &error_log).unwrap());
        let config = RunConfig::new(source.path().to_path_buf(), dest.path().to_path_buf(), Mode::Mount, Some(2)).unwrap();
        (source, dest, config, state_log, error_log)
    }

    fn progress() -> Arc<ProgressAggregator> {
        Arc::new(ProgressAggregator::new(
            "job".to_owned(),
            Mode::Mount,
            gus_core::snapshot::ArtifactPaths::default(),
        ))
    }

    #[test]
    fn successful_copy_is_committed_as_backed_up() {
        let (source, _dest, config, state_log, error_log) = setup();
        fs::write(source.path().join("a.jpg"), b"hello world").unwrap();
        let path = NormalizedPath::new("a.jpg");
        let now = OffsetDateTime::now_utc();
        state_log.upsert(FileRecord::new_pending(path.clone(), 11, now, now)).unwrap();

        let adapter: Arc<dyn Adapter> = Arc::new(MountAdapter::new(source.path().to_path_buf()));
        let pool = Arc::new(WorkerPool::new(adapter, config, Arc::clone(&state_log), error_log, progress(), Arc::new(AtomicBool::new(false))));

        let (sender, receiver) = crossbeam_channel::unbounded();
        sender.send(WorkItem { path: path.clone(), size: 11, priority_bucket: gus_core::work_item::PriorityBucket::REMAINDER }).unwrap();
        drop(sender);

        let handles = pool.spawn(receiver);
        for handle in handles {
            handle.join().unwrap();
        }

        let record = state_log.get(&path).unwrap();
        assert_eq!(record.status, FileStatus::BackedUp);
        assert!(record.source_hash.is_some());
        assert_eq!(record.source_hash, record.dest_hash);
    }

    #[test]
    fn missing_source_file_is_committed_as_missing_source() {
        let (source, _dest, config, state_log, error_log) = setup();
        let path = NormalizedPath::new("gone.jpg");
        let now = OffsetDateTime::now_utc();
        state_log.upsert(FileRecord::new_pending(path.clone(), 5, now, now)).unwrap();

        let adapter: Arc<dyn Adapter> = Arc::new(MountAdapter::new(source.path().to_path_buf()));
        let pool = Arc::new(WorkerPool::new(adapter, config, Arc::clone(&state_log), error_log, progress(), Arc::new(AtomicBool::new(false))));

        let (sender, receiver) = crossbeam_channel::unbounded();
        sender.send(WorkItem { path: path.clone(), size: 5, priority_bucket: gus_core::work_item::PriorityBucket::REMAINDER }).unwrap();
        drop(sender);

        for handle in pool.spawn(receiver) {
            handle.join().unwrap();
        }

        let record = state_log.get(&path).unwrap();
        assert_eq!(record.status, FileStatus::MissingSource);
    }

    #[test]
    fn reclaiming_a_previously_failed_record_does_not_trip_cancellation() {
        let (source, _dest, config, state_log, error_log) = setup();
        fs::write(source.path().join("a.jpg"), b"hello world").unwrap();
        let path = NormalizedPath::new("a.jpg");
        let now = OffsetDateTime::now_utc();
        let mut record = FileRecord::new_pending(path.clone(), 11, now, now);
        record.status = FileStatus::Failed;
        record.attempts = DEFAULT_MAX_ATTEMPTS;
        record.set_last_error("permission denied");
        state_log.upsert(record).unwrap();

        let cancel = Arc::new(AtomicBool::new(false));
        let adapter: Arc<dyn Adapter> = Arc::new(MountAdapter::new(source.path().to_path_buf()));
        let pool = Arc::new(WorkerPool::new(adapter, config, Arc::clone(&state_log), error_log, progress(), Arc::clone(&cancel)));

        let (sender, receiver) = crossbeam_channel::unbounded();
        sender.send(WorkItem { path: path.clone(), size: 11, priority_bucket: gus_core::work_item::PriorityBucket::REMAINDER }).unwrap();
        drop(sender);

        for handle in pool.spawn(receiver) {
            handle.join().unwrap();
        }

        assert!(!cancel.load(Ordering::Relaxed), "a stale failed record must not abort the whole run");
        let record = state_log.get(&path).unwrap();
        assert_eq!(record.status, FileStatus::BackedUp);
    }
}
