#![deny(unsafe_code)]
#![deny(missing_docs)]

//! # Overview
//!
//! `gus-logging` wires the engine's [`tracing`] instrumentation to a
//! concrete subscriber. The rest of the workspace only ever emits
//! `tracing` events; this crate is the single place a binary decides
//! where those events go.
//!
//! In `-json` mode, stdout is reserved for the event stream (spec §6), so
//! tracing output is routed to stderr regardless of verbosity.

use tracing_subscriber::EnvFilter;

/// Verbosity level requested on the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verbosity {
    /// Warnings and errors only.
    Quiet,
    /// Info-level progress narration (the default).
    Normal,
    /// Debug-level detail, including per-file classification.
    Verbose,
}

impl Verbosity {
    fn filter_directive(self) -> &'static str {
        match self {
            Self::Quiet => "warn",
            Self::Normal => "info",
            Self::Verbose => "debug",
        }
    }
}

/// Installs a process-global `tracing` subscriber writing to stderr.
///
/// Returns an error if a subscriber is already installed (e.g. called
/// twice, or in a test harness that installs its own); callers that don't
/// care may discard the result.
pub fn init(verbosity: Verbosity) -> Result<(), tracing::subscriber::SetGlobalDefaultError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.filter_directive()));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_directives_are_distinct() {
        assert_ne!(
            Verbosity::Quiet.filter_directive(),
            Verbosity::Verbose.filter_directive()
        );
    }
}
