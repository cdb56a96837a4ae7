//! The job-snapshot contract consumed by external adapters (spec §3, §6).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::config::Mode;

/// Job-level lifecycle. Transitions only ever move forward:
/// `queued -> running -> {succeeded | failed | canceled}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    /// Constructed but not yet started.
    Queued,
    /// Actively scanning, copying, verifying, or cleaning.
    Running,
    /// Completed with no run-level error.
    Succeeded,
    /// Aborted by a run-level error (e.g. circuit breaker trip).
    Failed,
    /// Stopped in response to cancellation.
    Canceled,
}

impl Lifecycle {
    /// Returns `true` once the job has reached a terminal lifecycle state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

/// Monotonic counters carried by every snapshot.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct Counters {
    /// Total files discovered by the scanner so far.
    pub total_discovered: u64,
    /// Files that reached a terminal success state (`backed_up`/`verified`/
    /// already-done).
    pub completed: u64,
    /// Files excluded by the filter or already backed up (skip, not an error).
    pub skipped: u64,
    /// Files that reached `failed`.
    pub failed: u64,
    /// Files recorded as `skipped_timeout`.
    pub timeout_skips: u64,
    /// Current streak of consecutive directory-enumeration timeouts.
    pub consecutive_timeouts: u32,
}

/// Throughput figures over the aggregator's sliding window.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct Throughput {
    /// Instantaneous bytes/sec over the sliding window.
    pub bytes_per_sec: f64,
    /// Total bytes transferred so far this run.
    pub bytes_total: u64,
}

/// A run-level error surfaced in a terminal snapshot.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SnapshotError {
    /// Stable, machine-matchable error code (e.g. `"scanner_circuit_trip"`).
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

/// Paths to the two durable artifacts a run maintains.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ArtifactPaths {
    /// Path to the state log (`gus_state.md`).
    pub state_log: String,
    /// Path to the error log (`gus_errors.log`).
    pub error_log: String,
}

/// The authoritative UI/API state for a run (spec §3).
///
/// Self-sufficient: a fresh consumer must be able to reconstruct current UI
/// state from the latest snapshot alone.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobSnapshot {
    /// Strictly increasing within a run; consumers discard any snapshot
    /// whose `seq` is not strictly greater than the last one they accepted.
    pub seq: u64,
    /// Identifier for this run.
    pub job_id: String,
    /// Mode this run was started in.
    pub mode: Mode,
    /// Job-level lifecycle state.
    pub lifecycle: Lifecycle,
    /// Short human-readable phase label (e.g. `"scanning"`, `"copying"`).
    pub phase: String,
    /// Monotonic counters.
    pub counters: Counters,
    /// Throughput figures.
    pub throughput: Throughput,
    /// Per-worker short status strings, keyed by worker id.
    pub worker_status: BTreeMap<u32, String>,
    /// Set once the scanner has closed the work queue.
    pub scan_complete: bool,
    /// Present only on a terminal `failed` snapshot.
    pub error: Option<SnapshotError>,
    /// Paths to the state log and error log for this run.
    pub artifacts: ArtifactPaths,
    /// Wall-clock timestamp this snapshot was produced.
    #[serde(with = "time::serde::rfc3339")]
    pub emitted_at: OffsetDateTime,
}
