//! Retry/backoff constants shared by the worker pool, verifier, and
//! scanner health-probe logic (spec §4.8), named here once instead of
//! duplicated as magic numbers across crates.

use std::time::Duration;

/// Backoff delays applied on successive retries of a `timeout`/`transient`
/// adapter error: 250 ms, then 1 s, then 4 s.
pub const BACKOFF_SCHEDULE: [Duration; 3] = [
    Duration::from_millis(250),
    Duration::from_secs(1),
    Duration::from_secs(4),
];

/// Default cap on retry attempts for a single file before it is committed
/// as `failed`.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Returns the backoff duration for the given zero-based attempt number,
/// clamped to the last entry in [`BACKOFF_SCHEDULE`] if attempts exceed it.
#[must_use]
pub fn backoff_for_attempt(attempt: u32) -> Duration {
    let index = (attempt as usize).min(BACKOFF_SCHEDULE.len() - 1);
    BACKOFF_SCHEDULE[index]
}
