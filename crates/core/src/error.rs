//! Error taxonomy (spec §7), grounded on the teacher workspace's
//! convention of a `thiserror` enum per failure domain rather than a
//! single catch-all error type.

use std::path::PathBuf;

use thiserror::Error;

use crate::path::NormalizedPath;

/// Classification of an adapter-level failure, consumed by the retry
/// policy (spec §4.1, §4.8).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdapterErrorKind {
    /// The path does not exist on the transport.
    NotFound,
    /// The call did not complete within its timeout.
    Timeout,
    /// A transient failure (e.g. device briefly unavailable); worth retrying.
    Transient,
    /// A permanent failure (e.g. permission denied); not worth retrying.
    Permanent,
}

/// Error returned by a transport adapter operation (spec §4.1).
#[derive(Debug, Error)]
#[error("{kind:?} on {path}: {message}")]
pub struct AdapterError {
    /// Classification consumed by the retry policy.
    pub kind: AdapterErrorKind,
    /// Path the operation targeted, if any.
    pub path: String,
    /// Human-readable diagnostic.
    pub message: String,
}

impl AdapterError {
    /// Builds a `timeout`-classified error for `path`.
    #[must_use]
    pub fn timeout(path: &NormalizedPath) -> Self {
        Self {
            kind: AdapterErrorKind::Timeout,
            path: path.as_str().to_owned(),
            message: "operation timed out".to_owned(),
        }
    }

    /// Builds a `not_found`-classified error for `path`.
    #[must_use]
    pub fn not_found(path: &NormalizedPath) -> Self {
        Self {
            kind: AdapterErrorKind::NotFound,
            path: path.as_str().to_owned(),
            message: "path not found".to_owned(),
        }
    }

    /// Wraps a [`std::io::Error`] into an [`AdapterError`], classifying it
    /// by `io::ErrorKind` the way upstream transports distinguish
    /// retryable from terminal OS errors.
    #[must_use]
    pub fn from_io(path: &NormalizedPath, source: &std::io::Error) -> Self {
        let kind = match source.kind() {
            std::io::ErrorKind::NotFound => AdapterErrorKind::NotFound,
            std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::WouldBlock
            | std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted => AdapterErrorKind::Transient,
            _ => AdapterErrorKind::Permanent,
        };
        Self {
            kind,
            path: path.as_str().to_owned(),
            message: source.to_string(),
        }
    }
}

/// Fatal-at-start configuration errors (spec §7).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// `-mode cleanup` with `-source` and `-dest` resolving to the same path.
    #[error("cleanup refuses to run: source and destination are the same path")]
    SourceEqualsDestination,
    /// `-source` does not exist.
    #[error("source path does not exist: {0}")]
    SourceNotFound(PathBuf),
    /// Destination root exists but is not writable.
    #[error("destination is not writable: {0}")]
    DestinationNotWritable(PathBuf),
    /// `-workers 0` was requested for a mode that needs at least one worker.
    #[error("worker count must be at least 1")]
    ZeroWorkers,
}

/// Pre-flight refusal reasons for the cleaner (spec §4.9).
#[derive(Debug, Error)]
pub enum CleanupRefusal {
    /// The state log has no records at all.
    #[error("cleanup refuses to run: state log is empty")]
    EmptyStateLog,
    /// Source and destination resolve to the same path.
    #[error("cleanup refuses to run: source and destination are the same path")]
    SourceEqualsDestination,
}

/// Run-level errors that abort the supervisor (spec §7).
#[derive(Debug, Error)]
pub enum EngineError {
    /// Fatal configuration problem, surfaced before any component starts.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The state log could not be written to; the run cannot continue
    /// because future writes are not guaranteed durable.
    #[error("state log write failed: {0}")]
    StateLogWrite(String),
    /// The scanner's consecutive-timeouts threshold tripped and the
    /// subsequent health probe also failed.
    #[error("scanner circuit breaker tripped: {0}")]
    ScannerCircuitTrip(String),
    /// The cleaner's pre-flight safety check refused to run.
    #[error(transparent)]
    CleanupRefused(#[from] CleanupRefusal),
    /// The state log or error log could not be opened/created at the
    /// start of a run, before any component started work.
    #[error("failed to initialize run artifacts: {0}")]
    ArtifactInit(String),
}

impl EngineError {
    /// A stable, machine-matchable code for [`crate::snapshot::SnapshotError`].
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "configuration_error",
            Self::StateLogWrite(_) => "state_log_write_failure",
            Self::ScannerCircuitTrip(_) => "scanner_circuit_trip",
            Self::CleanupRefused(_) => "cleanup_refused",
            Self::ArtifactInit(_) => "artifact_init_failure",
        }
    }
}
