//! Bounded-worker timeout helper shared by both adapter variants (spec
//! §4.1: "Timeouts implemented by running each call on a bounded worker
//! and abandoning the result on deadline").

use std::time::Duration;

/// Runs `work` on a dedicated thread and waits up to `timeout` for it to
/// finish. Returns `None` on timeout; the spawned thread is detached and
/// left to finish in the background rather than forcibly killed — Rust
/// has no safe thread-cancellation primitive, so "abandon" means "stop
/// waiting", not "stop running". Callers must not assume the abandoned
/// work has actually stopped touching shared state.
pub fn run_with_timeout<T, F>(timeout: Duration, work: F) -> Option<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = crossbeam_channel::bounded(1);
    std::thread::spawn(move || {
        let result = work();
        // The receiver may already be gone if we hit the deadline; that's
        // fine, the send simply fails silently.
        let _ = tx.send(result);
    });
    rx.recv_timeout(timeout).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_work_completes_within_timeout() {
        let result = run_with_timeout(Duration::from_secs(1), || 42);
        assert_eq!(result, Some(42));
    }

    #[test]
    fn slow_work_times_out() {
        let result = run_with_timeout(Duration::from_millis(20), || {
            std::thread::sleep(Duration::from_millis(500));
            42
        });
        assert_eq!(result, None);
    }
}
