#![deny(unsafe_code)]
#![deny(missing_docs)]

//! # Overview
//!
//! `gus-progress` merges atomic counters, per-worker status strings, and
//! throughput into periodic, self-sufficient [`JobSnapshot`]s and fans
//! them out to one or more subscribers (spec §4.6).
//!
//! Emission is best-effort per subscriber: a slow subscriber's inbox
//! filling up causes a dropped snapshot for that subscriber only, never a
//! blocked engine, because every snapshot stands alone (spec §3).

mod window;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use gus_core::snapshot::{ArtifactPaths, Counters, JobSnapshot, Lifecycle, SnapshotError, Throughput};
use gus_core::Mode;
use time::OffsetDateTime;

use window::ThroughputWindow;

/// Maximum snapshot emission rate, per spec §4.6.
pub const MAX_EMISSION_HZ: u32 = 10;

/// A destination for emitted snapshots. Implementors must not block; the
/// aggregator treats a full inbox as a dropped snapshot for that
/// subscriber, never a reason to stall other subscribers or the engine.
pub trait ProgressSubscriber: Send + Sync {
    /// Attempts to deliver `snapshot`. Returning is not a delivery
    /// guarantee — implementations that can't keep up should drop.
    fn emit(&self, snapshot: &JobSnapshot);
}

/// A [`ProgressSubscriber`] backed by a bounded channel; full channel
/// means a dropped snapshot, never a block (spec §4.6, §5).
pub struct ChannelSubscriber {
    sender: crossbeam_channel::Sender<JobSnapshot>,
}

impl ChannelSubscriber {
    /// Creates a channel subscriber and its paired receiver with
    /// `capacity` buffered snapshots.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, crossbeam_channel::Receiver<JobSnapshot>) {
        let (sender, receiver) = crossbeam_channel::bounded(capacity);
        (Self { sender }, receiver)
    }
}

impl ProgressSubscriber for ChannelSubscriber {
    fn emit(&self, snapshot: &JobSnapshot) {
        if self.sender.try_send(snapshot.clone()).is_err() {
            tracing::debug!(seq = snapshot.seq, "progress subscriber inbox full, snapshot dropped");
        }
    }
}

struct AtomicCounters {
    total_discovered: AtomicU64,
    completed: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    timeout_skips: AtomicU64,
    consecutive_timeouts: AtomicU32,
}

impl AtomicCounters {
    fn snapshot(&self) -> Counters {
        Counters {
            total_discovered: self.total_discovered.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timeout_skips: self.timeout_skips.load(Ordering::Relaxed),
            consecutive_timeouts: self.consecutive_timeouts.load(Ordering::Relaxed),
        }
    }
}

/// Aggregates counters, per-worker status, and throughput into snapshots
/// and fans them out to subscribers (spec §4.6).
pub struct ProgressAggregator {
    job_id: String,
    mode: Mode,
    artifacts: ArtifactPaths,
    seq: AtomicU64,
    counters: AtomicCounters,
    worker_status: DashMap<u32, String>,
    throughput: Mutex<ThroughputWindow>,
    phase: Mutex<String>,
    lifecycle: Mutex<Lifecycle>,
    scan_complete: AtomicBool,
    subscribers: Mutex<Vec<Arc<dyn ProgressSubscriber>>>,
}

impl ProgressAggregator {
    /// Creates a fresh aggregator for a new run. `job_id` and `artifacts`
    /// are fixed for the aggregator's lifetime.
    #[must_use]
    pub fn new(job_id: String, mode: Mode, artifacts: ArtifactPaths) -> Self {
        Self {
            job_id,
            mode,
            artifacts,
            seq: AtomicU64::new(0),
            counters: AtomicCounters {
                total_discovered: AtomicU64::new(0),
                completed: AtomicU64::new(0),
                skipped: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                timeout_skips: AtomicU64::new(0),
                consecutive_timeouts: AtomicU32::new(0),
            },
            worker_status: DashMap::new(),
            throughput: Mutex::new(ThroughputWindow::new(Duration::from_secs(5))),
            phase: Mutex::new("starting".to_owned()),
            lifecycle: Mutex::new(Lifecycle::Queued),
            scan_complete: AtomicBool::new(false),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Registers a new subscriber. Per spec §9's `AddEmitter` hook, call
    /// this before the run starts; a primary subscriber plus any number
    /// of secondaries (e.g. an HTTP mirror) may be added.
    pub fn add_subscriber(&self, subscriber: Arc<dyn ProgressSubscriber>) {
        self.subscribers
            .lock()
            .expect("subscriber list lock poisoned")
            .push(subscriber);
    }

    /// Increments the discovered-file counter by `n`.
    pub fn add_discovered(&self, n: u64) {
        self.counters.total_discovered.fetch_add(n, Ordering::Relaxed);
    }

    /// Records one completed file transfer of `bytes` bytes.
    pub fn record_completed(&self, bytes: u64) {
        self.counters.completed.fetch_add(1, Ordering::Relaxed);
        self.throughput.lock().expect("throughput lock poisoned").record(bytes);
    }

    /// Records one skipped (already-done or excluded) file.
    pub fn record_skipped(&self) {
        self.counters.skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one failed file.
    pub fn record_failed(&self) {
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one directory-timeout skip.
    pub fn record_timeout_skip(&self) {
        self.counters.timeout_skips.fetch_add(1, Ordering::Relaxed);
    }

    /// Sets the current consecutive-timeouts streak (spec §4.4).
    pub fn set_consecutive_timeouts(&self, n: u32) {
        self.counters.consecutive_timeouts.store(n, Ordering::Relaxed);
    }

    /// Sets (or clears, with an empty string) a worker's short status line.
    pub fn set_worker_status(&self, worker_id: u32, status: impl Into<String>) {
        self.worker_status.insert(worker_id, status.into());
    }

    /// Removes a worker's status entry once it has exited.
    pub fn clear_worker_status(&self, worker_id: u32) {
        self.worker_status.remove(&worker_id);
    }

    /// Sets the human-readable phase label.
    pub fn set_phase(&self, phase: impl Into<String>) {
        *self.phase.lock().expect("phase lock poisoned") = phase.into();
    }

    /// Updates the job-level lifecycle state.
    pub fn set_lifecycle(&self, lifecycle: Lifecycle) {
        *self.lifecycle.lock().expect("lifecycle lock poisoned") = lifecycle;
    }

    /// Marks the scanner as having closed the work queue.
    pub fn set_scan_complete(&self, complete: bool) {
        self.scan_complete.store(complete, Ordering::Relaxed);
    }

    /// Builds the current snapshot (incrementing `seq`) and fans it out
    /// to every registered subscriber. `error` is only meaningful when
    /// the lifecycle has reached `failed`.
    pub fn emit(&self, error: Option<SnapshotError>) -> JobSnapshot {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let worker_status: BTreeMap<u32, String> = self
            .worker_status
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        let snapshot = JobSnapshot {
            seq,
            job_id: self.job_id.clone(),
            mode: self.mode,
            lifecycle: *self.lifecycle.lock().expect("lifecycle lock poisoned"),
            phase: self.phase.lock().expect("phase lock poisoned").clone(),
            counters: self.counters.snapshot(),
            throughput: self.throughput.lock().expect("throughput lock poisoned").snapshot(),
            worker_status,
            scan_complete: self.scan_complete.load(Ordering::Relaxed),
            error,
            artifacts: self.artifacts.clone(),
            emitted_at: OffsetDateTime::now_utc(),
        };

        let subscribers = self.subscribers.lock().expect("subscriber list lock poisoned");
        for subscriber in subscribers.iter() {
            subscriber.emit(&snapshot);
        }
        snapshot
    }

    /// Throughput figures, without incrementing `seq` or notifying
    /// subscribers — used internally and by tests.
    #[must_use]
    pub fn throughput_snapshot(&self) -> Throughput {
        self.throughput.lock().expect("throughput lock poisoned").snapshot()
    }
}

/// Runs a ticker thread that calls [`ProgressAggregator::emit`] at a
/// bounded rate until stopped (spec §4.6, §9: "a simple interval timer").
pub struct Ticker {
    stop: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl Ticker {
    /// Spawns a ticker emitting snapshots from `aggregator` every
    /// `interval`, clamped to at most [`MAX_EMISSION_HZ`].
    #[must_use]
    pub fn spawn(aggregator: Arc<ProgressAggregator>, interval: Duration) -> Self {
        let min_interval = Duration::from_millis(1000 / u64::from(MAX_EMISSION_HZ));
        let interval = interval.max(min_interval);
        let stop = Arc::new(AtomicBool::new(false));
        let stop_clone = Arc::clone(&stop);

        let handle = std::thread::spawn(move || {
            while !stop_clone.load(Ordering::Relaxed) {
                std::thread::sleep(interval);
                if stop_clone.load(Ordering::Relaxed) {
                    break;
                }
                aggregator.emit(None);
            }
        });

        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Stops the ticker and waits for its thread to exit. After this
    /// returns, no further automatic snapshots are emitted — the caller
    /// is then responsible for the single terminal snapshot (spec §8
    /// property 6).
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
