#![deny(unsafe_code)]
#![deny(missing_docs)]

//! # Overview
//!
//! `gus-scanner` is the producer side of spec §4.4: it walks the source
//! tree through an [`Adapter`](gus_adapter::Adapter), applies the
//! exclusion filter, schedules configured priority paths ahead of the
//! remainder, and hands off [`WorkItem`]s to the worker pool over a
//! bounded channel.
//!
//! Already-backed-up files (matching size and mtime in the state log)
//! are marked done without being re-enqueued. A directory whose
//! enumeration times out repeatedly trips a circuit breaker: past a
//! threshold of consecutive timeouts the scanner health-checks the
//! adapter and, if that also fails, aborts the run rather than limping
//! along against a dead transport.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use gus_adapter::{Adapter, Entry, EntryKind};
use gus_core::config::{
    DEFAULT_CONSECUTIVE_TIMEOUT_THRESHOLD, DEFAULT_HEALTH_PROBE_BACKOFF,
};
use gus_core::{EngineError, FileRecord, FileStatus, NormalizedPath, RunConfig, WorkItem};
use gus_core::work_item::PriorityBucket;
use gus_errorlog::{ErrorKind, ErrorLog};
use gus_progress::ProgressAggregator;
use gus_statelog::StateLog;

/// Walks the source tree and feeds a bounded work queue.
pub struct Scanner {
    adapter: Arc<dyn Adapter>,
    config: RunConfig,
    state_log: Arc<StateLog>,
    error_log: Arc<ErrorLog>,
    progress: Arc<ProgressAggregator>,
    cancel: Arc<AtomicBool>,
}

impl Scanner {
    /// Creates a scanner for one run.
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

    /// Walks the whole source tree, sending work items to `sender` in
    /// priority order, then closes the queue and marks the scan
    /// complete. Returns an error only when the circuit breaker trips.
    pub fn run(&self, sender: &crossbeam_channel::Sender<WorkItem>) -> Result<(), EngineError> {
        let mut consecutive_timeouts: u32 = 0;
        let mut covered_prefixes: HashSet<String> = HashSet::new();

        for (index, priority_path) in self.config.priority_paths.iter().enumerate() {
            if self.cancel.load(Ordering::Relaxed) {
                break;
            }
            let root = NormalizedPath::new(priority_path);
            let Some(entry) = self.stat_quiet(&root) else {
                continue;
            };
            if entry.kind != EntryKind::Dir {
                continue;
            }
            covered_prefixes.insert(root.as_str().to_owned());

            self.walk_dir(
                &root,
                PriorityBucket::priority(index as u16),
                &covered_prefixes,
                sender,
                &mut consecutive_timeouts,
            )?;
        }

        if !self.cancel.load(Ordering::Relaxed) {
            let root = NormalizedPath::new("");
            self.walk_dir(
                &root,
                PriorityBucket::REMAINDER,
                &covered_prefixes,
                sender,
                &mut consecutive_timeouts,
            )?;
        }

        self.progress.set_scan_complete(true);
        Ok(())
    }

    fn stat_quiet(&self, path: &NormalizedPath) -> Option<Entry> {
        self.adapter.stat(path, self.config.call_timeout).ok().flatten()
    }

    fn walk_dir(
        &self,
        root: &NormalizedPath,
        bucket: PriorityBucket,
        covered_prefixes: &HashSet<String>,
        sender: &crossbeam_channel::Sender<WorkItem>,
        consecutive_timeouts: &mut u32,
    ) -> Result<(), EngineError> {
        let mut queue: VecDeque<NormalizedPath> = VecDeque::new();
        queue.push_back(root.clone());

        while let Some(dir) = queue.pop_front() {
            if self.cancel.load(Ordering::Relaxed) {
                return Ok(());
            }

            let entries = match self.adapter.list_dir(&dir, self.config.directory_timeout) {
                Ok(entries) => {
                    *consecutive_timeouts = 0;
                    entries
                }
                Err(err) if err.kind == gus_core::AdapterErrorKind::Timeout => {
                    *consecutive_timeouts += 1;
                    self.progress.record_timeout_skip();
                    self.progress.set_consecutive_timeouts(*consecutive_timeouts);
                    let _ = self.error_log.append(
                        ErrorKind::DirectoryTimeout,
                        Some(&dir),
                        format!("directory enumeration timed out: {dir}"),
                    );
                    tracing::warn!(path = %dir, consecutive_timeouts = *consecutive_timeouts, "directory listing timed out");
                    self.record_directory_timeout(&dir);

                    if *consecutive_timeouts >= DEFAULT_CONSECUTIVE_TIMEOUT_THRESHOLD {
                        std::thread::sleep(DEFAULT_HEALTH_PROBE_BACKOFF);
                        if self.adapter.health_check(self.config.call_timeout).is_err() {
                            return Err(EngineError::ScannerCircuitTrip(format!(
                                "{} consecutive directory timeouts and the adapter health check failed",
                                *consecutive_timeouts
                            )));
                        }
                        *consecutive_timeouts = 0;
                    }
                    continue;
                }
                Err(err) => {
                    let _ = self.error_log.append(
                        ErrorKind::DirectoryError,
                        None,
                        format!("directory enumeration failed for {dir}: {err}"),
                    );
                    tracing::warn!(path = %dir, error = %err, "directory listing failed");
                    continue;
                }
            };

            for entry in entries {
                if self.cancel.load(Ordering::Relaxed) {
                    return Ok(());
                }

                let child_path = if dir.as_str().is_empty() {
                    NormalizedPath::new(&entry.name)
                } else {
                    NormalizedPath::new(format!("{dir}/{}", entry.name))
                };

                if gus_filters::exclude(child_path.as_str()) {
                    if entry.kind == EntryKind::File {
                        self.record_excluded(&child_path);
                    }
                    continue;
                }

                match entry.kind {
                    EntryKind::Dir => {
                        if covered_prefixes.contains(child_path.as_str()) {
                            continue;
                        }
                        queue.push_back(child_path);
                    }
                    EntryKind::File => {
                        self.handle_file(&child_path, &entry, bucket, sender);
                    }
                    EntryKind::Other => {}
                }
            }
        }

        Ok(())
    }

    /// Records a `skipped_timeout` state-log entry for the directory
    /// tree root itself, per spec §4.4: the subtree is not recursed into,
    /// so the directory path stands in for every file beneath it.
    fn record_directory_timeout(&self, dir: &NormalizedPath) {
        if self.state_log.get(dir).is_some() {
            return;
        }
        let now = time::OffsetDateTime::now_utc();
        let mut record = FileRecord::new_pending(dir.clone(), 0, now, now);
        record.status = FileStatus::SkippedTimeout;
        if let Err(err) = self.state_log.upsert(record) {
            tracing::warn!(path = %dir, error = %err, "failed to record directory timeout");
        }
    }

    fn record_excluded(&self, path: &NormalizedPath) {
        if self.state_log.get(path).is_some() {
            self.progress.record_skipped();
            return;
        }
        let now = time::OffsetDateTime::now_utc();
        let mut record = FileRecord::new_pending(path.clone(), 0, now, now);
        record.status = FileStatus::SkippedExcluded;
        if let Err(err) = self.state_log.upsert(record) {
            tracing::warn!(path = %path, error = %err, "failed to record excluded file");
        }
        self.progress.record_skipped();
    }

    fn handle_file(
        &self,
        path: &NormalizedPath,
        entry: &Entry,
        bucket: PriorityBucket,
        sender: &crossbeam_channel::Sender<WorkItem>,
    ) {
        self.progress.add_discovered(1);

        if let Some(existing) = self.state_log.get(path) {
            let already_done = matches!(existing.status, FileStatus::BackedUp | FileStatus::Verified)
                && existing.matches_observed(entry.size, entry.mtime);
            if already_done {
                self.progress.record_skipped();
                return;
            }
        } else {
            let now = time::OffsetDateTime::now_utc();
            let record = FileRecord::new_pending(path.clone(), entry.size, entry.mtime, now);
            if let Err(err) = self.state_log.upsert(record) {
                tracing::warn!(path = %path, error = %err, "failed to record discovered file");
                return;
            }
        }

        let item = WorkItem {
            path: path.clone(),
            size: entry.size,
            priority_bucket: bucket,
        };
        if sender.send(item).is_err() {
            tracing::debug!(path = %path, "work queue closed, scanner stopping early");
        }
    }
}
