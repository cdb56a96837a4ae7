#![deny(unsafe_code)]
#![deny(missing_docs)]

//! # Overview
//!
//! `gus_sync` is the library half of the `gus-sync` binary: flag parsing,
//! adapter construction, and the JSON/human event sinks live here so the
//! binary's `main.rs` stays a one-liner and the whole surface is testable
//! by capturing stdout/stderr into an in-memory buffer.

use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use clap::{Parser, ValueEnum};
use gus_adapter::bridge::DeviceBridgeAdapter;
use gus_adapter::mount::MountAdapter;
use gus_adapter::Adapter;
use gus_core::config::Mode;
use gus_core::snapshot::JobSnapshot;
use gus_core::{ExitCode, Lifecycle, RunConfig};
use gus_engine::Supervisor;
use gus_logging::Verbosity;
use gus_progress::ProgressSubscriber;

/// Mode selector exposed on the command line. Mirrors
/// [`gus_core::config::Mode`] one-to-one; kept as a distinct type so
/// `gus-core` itself stays free of a `clap` dependency.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum CliMode {
    /// Source is an already-mounted local filesystem path.
    Mount,
    /// Source is reached through the device-bridge adapter.
    Adb,
    /// Re-hash destination files and cross-check against the state log.
    Verify,
    /// Delete source files already recorded as backed up.
    Cleanup,
}

impl From<CliMode> for Mode {
    fn from(value: CliMode) -> Self {
        match value {
            CliMode::Mount => Mode::Mount,
            CliMode::Adb => Mode::Adb,
            CliMode::Verify => Mode::Verify,
            CliMode::Cleanup => Mode::Cleanup,
        }
    }
}

/// GusSync: back up an Android device to a local destination, verify the
/// copy, and optionally clean up the source once confirmed safe.
#[derive(Parser, Debug)]
#[command(name = "gus-sync", version, about)]
pub struct Cli {
    /// Which pipeline to run.
    #[arg(long, value_enum)]
    pub mode: CliMode,

    /// Root of the source tree (mount mode) or the device-bridge mount
    /// point used for path arithmetic (adb mode). Ignored by `verify`/
    /// `cleanup`, which resolve against whichever transport directory a
    /// prior backup run already created under `--dest`.
    #[arg(long)]
    pub source: PathBuf,

    /// Root of the destination tree.
    #[arg(long)]
    pub dest: PathBuf,

    /// Worker pool size. Defaults to the mode-appropriate value when omitted.
    #[arg(long)]
    pub workers: Option<usize>,

    /// Path to the external device-bridge tool (adb mode only).
    #[arg(long)]
    pub tool_path: Option<PathBuf>,

    /// Device serial to select with the device-bridge tool (adb mode only).
    #[arg(long)]
    pub device_serial: Option<String>,

    /// Re-enqueue mismatched files for recopy during a verify run.
    #[arg(long)]
    pub reverify: bool,

    /// Emit one JSON event object per line on stdout instead of a
    /// human-readable summary. Human-readable log narration always goes to
    /// stderr regardless of this flag.
    #[arg(long)]
    pub json: bool,

    /// Suppress informational log output; only warnings and errors.
    #[arg(long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Emit debug-level log output, including per-file classification.
    #[arg(long)]
    pub verbose: bool,
}

impl Cli {
    fn verbosity(&self) -> Verbosity {
        if self.quiet {
            Verbosity::Quiet
        } else if self.verbose {
            Verbosity::Verbose
        } else {
            Verbosity::Normal
        }
    }

    fn build_adapter(&self) -> Result<Arc<dyn Adapter>, String> {
        match Mode::from(self.mode) {
            Mode::Mount => Ok(Arc::new(MountAdapter::new(self.source.clone()))),
            Mode::Adb => {
                let tool_path = self
                    .tool_path
                    .clone()
                    .ok_or_else(|| "--tool-path is required in adb mode".to_owned())?;
                Ok(Arc::new(DeviceBridgeAdapter::new(tool_path, self.device_serial.clone())))
            }
            Mode::Verify | Mode::Cleanup => {
                // Verify/cleanup operate purely against the destination's
                // existing transport directory and never call back out to
                // the adapter's enumeration path, so a mount adapter rooted
                // at `source` is sufficient for the stat/hash/delete calls
                // they do make.
                Ok(Arc::new(MountAdapter::new(self.source.clone())))
            }
        }
    }
}

/// A [`ProgressSubscriber`] writing one JSON object per line to a shared
/// writer (spec §6: stdout is reserved for this stream in `--json` mode).
struct JsonSubscriber<W: Write + Send> {
    out: Arc<Mutex<W>>,
}

impl<W: Write + Send> ProgressSubscriber for JsonSubscriber<W> {
    fn emit(&self, snapshot: &JobSnapshot) {
        let Ok(line) = serde_json::to_string(&Event::progress(snapshot)) else {
            return;
        };
        let mut out = self.out.lock().expect("json subscriber writer lock poisoned");
        let _ = writeln!(out, "{line}");
        let _ = out.flush();
    }
}

fn write_json_event<W: Write>(out: &Arc<Mutex<W>>, event: &Event<'_>) {
    let Ok(line) = serde_json::to_string(event) else { return };
    let mut out = out.lock().expect("json event writer lock poisoned");
    let _ = writeln!(out, "{line}");
    let _ = out.flush();
}

#[derive(serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Event<'a> {
    Start {
        job_id: &'a str,
        mode: Mode,
    },
    Progress {
        #[serde(flatten)]
        snapshot: &'a JobSnapshot,
    },
    Complete {
        #[serde(flatten)]
        snapshot: &'a JobSnapshot,
    },
    ErrorSummary {
        #[serde(flatten)]
        summary: &'a gus_errorlog::ErrorSummary,
    },
}

impl<'a> Event<'a> {
    fn progress(snapshot: &'a JobSnapshot) -> Self {
        if snapshot.lifecycle.is_terminal() {
            Event::Complete { snapshot }
        } else {
            Event::Progress { snapshot }
        }
    }
}

/// A [`ProgressSubscriber`] printing a short human-readable line per
/// snapshot to a shared writer (the default, non-`--json` sink).
struct HumanSubscriber<W: Write + Send> {
    out: Arc<Mutex<W>>,
}

impl<W: Write + Send> ProgressSubscriber for HumanSubscriber<W> {
    fn emit(&self, snapshot: &JobSnapshot) {
        let mut out = self.out.lock().expect("human subscriber writer lock poisoned");
        if snapshot.lifecycle.is_terminal() {
            let _ = writeln!(
                out,
                "{:?}: {} completed, {} skipped, {} failed ({:?})",
                snapshot.mode, snapshot.counters.completed, snapshot.counters.skipped, snapshot.counters.failed, snapshot.lifecycle
            );
            if let Some(error) = &snapshot.error {
                let _ = writeln!(out, "error: {} ({})", error.message, error.code);
            }
        } else {
            let _ = writeln!(
                out,
                "[{}] {}: {} completed, {} discovered",
                snapshot.phase, snapshot.seq, snapshot.counters.completed, snapshot.counters.total_discovered
            );
        }
        let _ = out.flush();
    }
}

/// Parses `args`, runs the engine to completion, and writes the event
/// stream / summary to `stdout`/`stderr`. Never calls [`std::process::exit`]
/// directly so it can be exercised in tests with in-memory buffers.
pub fn run_with(args: impl IntoIterator<Item = String>, stdout: impl Write + Send + 'static, stderr: impl Write + Send + 'static) -> ExitCode {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return ExitCode::Failure;
        }
    };

    let _ = gus_logging::init(cli.verbosity());

    let adapter = match cli.build_adapter() {
        Ok(adapter) => adapter,
        Err(message) => {
            tracing::error!(error = %message, "failed to build transport adapter");
            return ExitCode::Failure;
        }
    };

    let mut config = match RunConfig::new(cli.source.clone(), cli.dest.clone(), cli.mode.into(), cli.workers) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "configuration rejected");
            return ExitCode::Failure;
        }
    };
    config.reverify_on_mismatch = cli.reverify;

    let supervisor = match Supervisor::new(config, adapter) {
        Ok(supervisor) => supervisor,
        Err(err) => {
            tracing::error!(error = %err, "failed to start run");
            return ExitCode::Failure;
        }
    };

    let stdout = Arc::new(Mutex::new(stdout));
    if cli.json {
        write_json_event(
            &stdout,
            &Event::Start {
                job_id: supervisor.job_id(),
                mode: cli.mode.into(),
            },
        );
        supervisor.add_subscriber(Arc::new(JsonSubscriber { out: Arc::clone(&stdout) }));
    } else {
        supervisor.add_subscriber(Arc::new(HumanSubscriber { out: Arc::clone(&stdout) }));
    }

    install_cancel_handler(supervisor.cancel_handle());

    let snapshot = supervisor.run();

    let mut stderr = stderr;
    if let Ok(summary) = supervisor.error_log().summarize() {
        if summary.total() > 0 {
            if cli.json {
                write_json_event(&stdout, &Event::ErrorSummary { summary: &summary });
            }
            let _ = writeln!(
                stderr,
                "{} error(s) logged; see {}",
                summary.total(),
                supervisor.error_log().path().display()
            );
        }
    }

    exit_code_from(snapshot.lifecycle)
}

/// Maps a terminal [`Lifecycle`] to the process exit code (spec §6: `0`
/// on success, `1` on any failure or cancellation).
#[must_use]
pub fn exit_code_from(lifecycle: Lifecycle) -> ExitCode {
    match lifecycle {
        Lifecycle::Succeeded => ExitCode::Success,
        Lifecycle::Failed | Lifecycle::Canceled | Lifecycle::Queued | Lifecycle::Running => ExitCode::Failure,
    }
}

/// Registers `SIGINT`/`SIGTERM` to flip the shared cancellation flag
/// (spec §5: "a single cancellation token propagated to every ... thread").
/// A second signal is not distinguished from the first; setting an
/// already-set flag is a no-op, matching [`Supervisor::request_cancel`]'s
/// idempotence.
#[cfg(unix)]
fn install_cancel_handler(cancel: Arc<std::sync::atomic::AtomicBool>) {
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        if let Err(err) = signal_hook::flag::register(signal, Arc::clone(&cancel)) {
            tracing::warn!(signal, error = %err, "failed to register cancellation signal handler");
        }
    }
}

#[cfg(not(unix))]
fn install_cancel_handler(_cancel: Arc<std::sync::atomic::AtomicBool>) {}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Vec<String> {
        let mut v = vec!["gus-sync".to_owned()];
        v.extend(extra.iter().map(|s| (*s).to_owned()));
        v
    }

    #[test]
    fn fresh_mount_backup_exits_success() {
        let source = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        std::fs::write(source.path().join("a.jpg"), b"hello").unwrap();

        let code = run_with(
            args(&[
                "--mode",
                "mount",
                "--source",
                source.path().to_str().unwrap(),
                "--dest",
                dest.path().to_str().unwrap(),
                "--workers",
                "1",
            ]),
            Vec::new(),
            Vec::new(),
        );
        assert_eq!(code, ExitCode::Success);
        assert!(dest.path().join("mount/a.jpg").exists());
    }

    #[test]
    fn cleanup_with_identical_source_and_dest_exits_failure() {
        let shared = tempfile::tempdir().unwrap();
        let code = run_with(
            args(&[
                "--mode",
                "cleanup",
                "--source",
                shared.path().to_str().unwrap(),
                "--dest",
                shared.path().to_str().unwrap(),
            ]),
            Vec::new(),
            Vec::new(),
        );
        assert_eq!(code, ExitCode::Failure);
    }

    #[test]
    fn missing_source_exits_failure_without_panicking() {
        let dest = tempfile::tempdir().unwrap();
        let code = run_with(
            args(&[
                "--mode",
                "mount",
                "--source",
                "/does/not/exist/ever",
                "--dest",
                dest.path().to_str().unwrap(),
            ]),
            Vec::new(),
            Vec::new(),
        );
        assert_eq!(code, ExitCode::Failure);
    }

    #[test]
    fn json_mode_emits_a_terminal_event_line() {
        let source = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        std::fs::write(source.path().join("a.jpg"), b"hello").unwrap();

        let stdout = Arc::new(Mutex::new(Vec::new()));
        let stdout_clone = Arc::clone(&stdout);
        let code = run_with(
            args(&[
                "--mode",
                "mount",
                "--source",
                source.path().to_str().unwrap(),
                "--dest",
                dest.path().to_str().unwrap(),
                "--workers",
                "1",
                "--json",
            ]),
            SharedWriter(stdout_clone),
            Vec::new(),
        );
        assert_eq!(code, ExitCode::Success);
        let output = stdout.lock().unwrap();
        let text = String::from_utf8_lossy(&output);
        assert!(text.lines().any(|line| line.contains("\"type\":\"complete\"")));
        assert!(text.lines().next().is_some_and(|line| line.contains("\"type\":\"start\"")));
    }

    struct SharedWriter(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
