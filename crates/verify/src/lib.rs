#![deny(unsafe_code)]
#![deny(missing_docs)]

//! # Overview
//!
//! `gus-verify` is the independent confirmation pass from spec §4.7: for
//! every record already marked `backed_up` (or previously `verified`, to
//! catch destination bit-rot on a repeat run), it re-stats the
//! destination, re-stats the source, and recomputes both content hashes
//! — never trusting the hashes recorded at copy time — before committing
//! `verified` or `mismatch`.
//!
//! A missing destination file is an error (the backup is incomplete); a
//! missing source file is informational only, per spec §9's resolution of
//! that open question: the source is allowed to change or disappear after
//! backup (the user may delete it from the device independently, or a
//! later cleanup run removes it deliberately), so the verifier simply
//! cannot compare and leaves the record untouched.

use std::fs::File;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use gus_adapter::Adapter;
use gus_core::{FileStatus, NormalizedPath, RunConfig, WorkItem};
use gus_core::work_item::PriorityBucket;
use gus_errorlog::{ErrorKind, ErrorLog};
use gus_progress::ProgressAggregator;
use gus_statelog::StateLog;
use time::OffsetDateTime;

/// Default cap on the verifier's own worker pool, per spec §4.5/§4.7.
pub const MAX_VERIFY_WORKERS: usize = 4;

/// Re-hashes backed-up files and cross-checks source against destination.
pub struct Verifier {
    adapter: Arc<dyn Adapter>,
    config: RunConfig,
    state_log: Arc<StateLog>,
    error_log: Arc<ErrorLog>,
    progress: Arc<ProgressAggregator>,
    cancel: Arc<AtomicBool>,
}

impl Verifier {
    /// Creates a verifier for one run.
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

    /// Worker-pool size for a verify run: `min(available_parallelism, 4)`.
    #[must_use]
    pub fn worker_count() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get().min(MAX_VERIFY_WORKERS))
            .unwrap_or(MAX_VERIFY_WORKERS)
    }

    /// Verifies every eligible record. When `recopy_sender` is given and
    /// `config.reverify_on_mismatch` is set, a mismatch is re-enqueued for
    /// recopy by the caller's worker pool after being committed.
    pub fn run(&self, recopy_sender: Option<&crossbeam_channel::Sender<WorkItem>>) {
        let candidates = self
            .state_log
            .iterate(|record| matches!(record.status, FileStatus::BackedUp | FileStatus::Verified));

        let (sender, receiver) = crossbeam_channel::unbounded();
        for record in candidates {
            let _ = sender.send(record.path);
        }
        drop(sender);

        let worker_count = Self::worker_count().min(self.config.workers.max(1));
        std::thread::scope(|scope| {
            for worker_id in 0..worker_count {
                let receiver = receiver.clone();
                scope.spawn(move || {
                    while let Ok(path) = receiver.recv() {
                        if self.cancel.load(Ordering::Relaxed) {
                            break;
                        }
                        self.verify_one(worker_id as u32, &path, recopy_sender);
                    }
                });
            }
        });
    }

    fn verify_one(&self, worker_id: u32, path: &NormalizedPath, recopy_sender: Option<&crossbeam_channel::Sender<WorkItem>>) {
        self.progress.set_worker_status(worker_id, format!("verifying {path}"));

        let dest_local = path.mirrored_under(&self.config.mode_root());
        if !dest_local.is_file() {
            self.commit_mismatch(path, "destination file is missing", recopy_sender);
            self.progress.clear_worker_status(worker_id);
            return;
        }

        let Ok(Some(_source_entry)) = self.adapter.stat(path, self.config.call_timeout) else {
            tracing::info!(path = %path, "source no longer present during verify; leaving record as-is");
            self.progress.record_skipped();
            self.progress.clear_worker_status(worker_id);
            return;
        };

        let dest_hash = match File::open(&dest_local).and_then(gus_hash::hash_reader) {
            Ok(hash) => hash,
            Err(err) => {
                let _ = self.error_log.append(ErrorKind::Other, Some(path), format!("failed to read destination for verify: {err}"));
                self.progress.clear_worker_status(worker_id);
                return;
            }
        };

        let src_hash = match self.adapter.hash_remote(path, self.config.call_timeout) {
            Ok(hash) => hash,
            Err(err) => {
                let _ = self.error_log.append(ErrorKind::Other, Some(path), format!("failed to hash source for verify: {err}"));
                self.progress.clear_worker_status(worker_id);
                return;
            }
        };

        if src_hash == dest_hash {
            self.commit_verified(path, &src_hash, &dest_hash);
            self.progress.record_completed(0);
        } else {
            let _ = self.error_log.append(
                ErrorKind::HashMismatch,
                Some(path),
                format!("source/destination hash mismatch on verify: {src_hash} != {dest_hash}"),
            );
            self.commit_mismatch(path, "source/destination hash mismatch", recopy_sender);
        }
        self.progress.clear_worker_status(worker_id);
    }

    fn commit_verified(&self, path: &NormalizedPath, src_hash: &str, dest_hash: &str) {
        let Some(mut record) = self.state_log.get(path) else { return };
        record.status = FileStatus::Verified;
        record.source_hash = Some(src_hash.to_owned());
        record.dest_hash = Some(dest_hash.to_owned());
        record.last_updated_at = OffsetDateTime::now_utc();
        if let Err(err) = self.state_log.upsert(record) {
            tracing::error!(path = %path, error = %err, "failed to commit verified status");
        }
    }

    fn commit_mismatch(&self, path: &NormalizedPath, reason: &str, recopy_sender: Option<&crossbeam_channel::Sender<WorkItem>>) {
        let Some(mut record) = self.state_log.get(path) else { return };
        let size = record.size;
        record.status = FileStatus::Mismatch;
        record.set_last_error(reason);
        record.last_updated_at = OffsetDateTime::now_utc();
        if let Err(err) = self.state_log.upsert(record) {
            tracing::error!(path = %path, error = %err, "failed to commit mismatch status");
            return;
        }

        if self.config.reverify_on_mismatch {
            if let Some(sender) = recopy_sender {
                let _ = sender.send(WorkItem {
                    path: path.clone(),
                    size,
                    priority_bucket: PriorityBucket::priority(0),
                });
            }
        }
    }
}
