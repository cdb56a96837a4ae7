//! Sliding-window throughput tracking.
//!
//! Grounded on the teacher's bandwidth limiter, which keeps a rolling
//! window of recent transfer samples to derive an instantaneous rate
//! rather than an all-time average that reacts too slowly to stalls.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use gus_core::snapshot::Throughput;

/// Tracks bytes transferred over a trailing time window, plus an
/// all-time total, and derives an instantaneous bytes/sec figure.
pub struct ThroughputWindow {
    window: Duration,
    samples: VecDeque<(Instant, u64)>,
    windowed_bytes: u64,
    bytes_total: u64,
}

impl ThroughputWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: VecDeque::new(),
            windowed_bytes: 0,
            bytes_total: 0,
        }
    }

    pub fn record(&mut self, bytes: u64) {
        let now = Instant::now();
        self.samples.push_back((now, bytes));
        self.windowed_bytes += bytes;
        self.bytes_total += bytes;
        self.evict_stale(now);
    }

    pub fn snapshot(&mut self) -> Throughput {
        self.evict_stale(Instant::now());
        let bytes_per_sec = if self.samples.is_empty() {
            0.0
        } else {
            let span = self
                .samples
                .back()
                .map_or(self.window, |(newest, _)| {
                    newest.saturating_duration_since(self.samples.front().unwrap().0)
                })
                .max(Duration::from_millis(1));
            self.windowed_bytes as f64 / span.as_secs_f64().max(span_floor())
        };

        Throughput {
            bytes_per_sec,
            bytes_total: self.bytes_total,
        }
    }

    fn evict_stale(&mut self, now: Instant) {
        while let Some((ts, bytes)) = self.samples.front().copied() {
            if now.saturating_duration_since(ts) > self.window {
                self.windowed_bytes = self.windowed_bytes.saturating_sub(bytes);
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Floor applied to the elapsed-span denominator so a single sample
/// (zero elapsed time) doesn't divide by zero and report infinity.
fn span_floor() -> f64 {
    0.001
}
