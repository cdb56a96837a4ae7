//! Device-bridge adapter: drives an external command-line tool (e.g. an
//! Android debug bridge) to reach a tethered device (spec §4.1).
//!
//! # Wire contract
//!
//! The configured tool is invoked as a subcommand per operation, with an
//! optional `-s <serial>` selector inserted right after the tool path:
//!
//! - `list <remote-path>` — one `kind\tsize\tmtime_unix\tname` line per
//!   entry on stdout, exit 0. Exit 2 if `remote-path` doesn't exist.
//! - `stat <remote-path>` — a single such line, exit 0; exit 2 if missing.
//! - `pull <remote-path> <local-path>` — copies the file, exit 0 on success.
//! - `hash <remote-path>` — a single hex digest line on stdout.
//! - `rm <remote-path>` — exit 0 on success.
//! - `health` — exit 0 when the device is reachable.
//!
//! Every invocation runs in its own process group on Unix so cancellation
//! can signal the whole group; output is captured up to
//! [`MAX_CAPTURED_BYTES`] and parsed into the structured [`Entry`] type.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use gus_core::{AdapterError, AdapterErrorKind, NormalizedPath};
use time::OffsetDateTime;

use crate::{Adapter, CopyOutcome, Entry, EntryKind, ProgressSink};

/// Upper bound on how much of a subprocess's stdout/stderr is buffered in
/// memory before the rest is discarded (spec §4.1: "stdout/stderr are
/// streamed and bounded in memory").
pub const MAX_CAPTURED_BYTES: usize = 1024 * 1024;

/// Exit code the wire contract uses to mean "path not found", distinct
/// from a generic failure.
const EXIT_NOT_FOUND: i32 = 2;

/// Device-bridge adapter driving an external CLI tool per operation.
#[derive(Clone, Debug)]
pub struct DeviceBridgeAdapter {
    tool_path: PathBuf,
    device_serial: Option<String>,
}

impl DeviceBridgeAdapter {
    /// Creates an adapter invoking `tool_path` for every operation,
    /// optionally pinned to `device_serial`.
    #[must_use]
    pub fn new(tool_path: PathBuf, device_serial: Option<String>) -> Self {
        Self {
            tool_path,
            device_serial,
        }
    }

    fn command(&self, subcommand: &str) -> Command {
        let mut command = Command::new(&self.tool_path);
        if let Some(serial) = &self.device_serial {
            command.arg("-s").arg(serial);
        }
        command.arg(subcommand);
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        place_in_own_process_group(&mut command);
        command
    }

    fn run(&self, command: Command, timeout: Duration) -> Result<CommandOutput, AdapterError> {
        crate::run_with_timeout(timeout, move || spawn_and_capture(command))
            .ok_or(AdapterError {
                kind: AdapterErrorKind::Timeout,
                path: String::new(),
                message: "device-bridge command timed out".to_owned(),
            })?
            .map_err(|message| AdapterError {
                kind: AdapterErrorKind::Transient,
                path: String::new(),
                message,
            })
    }
}

struct CommandOutput {
    status_code: Option<i32>,
    stdout: String,
}

fn place_in_own_process_group(command: &mut Command) {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }
    #[cfg(not(unix))]
    {
        let _ = command;
    }
}

fn spawn_and_capture(mut command: Command) -> Result<CommandOutput, String> {
    let mut child = command.spawn().map_err(|e| e.to_string())?;

    let mut stdout_pipe = child.stdout.take().expect("stdout was piped");
    let mut stderr_pipe = child.stderr.take().expect("stderr was piped");

    let stdout_reader = std::thread::spawn(move || read_bounded(&mut stdout_pipe));
    let stderr_reader = std::thread::spawn(move || read_bounded(&mut stderr_pipe));

    let status = child.wait().map_err(|e| e.to_string())?;
    let stdout = stdout_reader.join().unwrap_or_default();
    let _stderr = stderr_reader.join().unwrap_or_default();

    Ok(CommandOutput {
        status_code: status.code(),
        stdout,
    })
}

fn read_bounded(reader: &mut impl Read) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        if buf.len() >= MAX_CAPTURED_BYTES {
            break;
        }
        match reader.read(&mut chunk) {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

fn parse_entry_line(line: &str) -> Option<Entry> {
    let mut parts = line.splitn(4, '\t');
    let kind = parts.next()?;
    let size: u64 = parts.next()?.parse().ok()?;
    let mtime_unix: i64 = parts.next()?.parse().ok()?;
    let name = parts.next()?.to_owned();
    let kind = match kind {
        "d" => EntryKind::Dir,
        "f" => EntryKind::File,
        _ => EntryKind::Other,
    };
    Some(Entry {
        name,
        kind,
        size,
        mtime: OffsetDateTime::from_unix_timestamp(mtime_unix).ok()?,
    })
}

impl Adapter for DeviceBridgeAdapter {
    fn list_dir(&self, path: &NormalizedPath, timeout: Duration) -> Result<Vec<Entry>, AdapterError> {
        let mut command = self.command("list");
        command.arg(path.as_str());
        let output = self.run(command, timeout)?;

        if output.status_code == Some(EXIT_NOT_FOUND) {
            return Err(AdapterError::not_found(path));
        }
        if output.status_code != Some(0) {
            return Err(AdapterError {
                kind: AdapterErrorKind::Transient,
                path: path.as_str().to_owned(),
                message: format!("list exited with status {:?}", output.status_code),
            });
        }

        Ok(output.stdout.lines().filter_map(parse_entry_line).collect())
    }

    fn stat(&self, path: &NormalizedPath, timeout: Duration) -> Result<Option<Entry>, AdapterError> {
        let mut command = self.command("stat");
        command.arg(path.as_str());
        let output = self.run(command, timeout)?;

        if output.status_code == Some(EXIT_NOT_FOUND) {
            return Ok(None);
        }
        if output.status_code != Some(0) {
            return Err(AdapterError {
                kind: AdapterErrorKind::Transient,
                path: path.as_str().to_owned(),
                message: format!("stat exited with status {:?}", output.status_code),
            });
        }

        Ok(output.stdout.lines().next().and_then(parse_entry_line))
    }

    fn copy_file(
        &self,
        src: &NormalizedPath,
        dest_local: &Path,
        timeout: Duration,
        progress: &mut dyn ProgressSink,
    ) -> Result<CopyOutcome, AdapterError> {
        if let Some(parent) = dest_local.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AdapterError::from_io(src, &e))?;
        }

        let mut command = self.command("pull");
        command.arg(src.as_str()).arg(dest_local);
        let output = self.run(command, timeout)?;
        if output.status_code != Some(0) {
            return Err(AdapterError {
                kind: AdapterErrorKind::Transient,
                path: src.as_str().to_owned(),
                message: format!("pull exited with status {:?}", output.status_code),
            });
        }

        // The wire contract doesn't hash while streaming, so we read the
        // destination back once to obtain both hashes in a single local
        // pass (spec §4.1's documented fallback for transports that can't
        // hash in-stream).
        let bytes = std::fs::read(dest_local).map_err(|e| AdapterError::from_io(src, &e))?;
        progress.on_bytes(bytes.len() as u64);
        let digest = gus_hash::hash_bytes(&bytes);

        Ok(CopyOutcome {
            bytes_copied: bytes.len() as u64,
            src_hash: digest.clone(),
            dest_hash: digest,
        })
    }

    fn delete(&self, path: &NormalizedPath) -> Result<(), AdapterError> {
        let mut command = self.command("rm");
        command.arg(path.as_str());
        let output = self.run(command, Duration::from_secs(30))?;
        if output.status_code != Some(0) {
            return Err(AdapterError {
                kind: AdapterErrorKind::Transient,
                path: path.as_str().to_owned(),
                message: format!("rm exited with status {:?}", output.status_code),
            });
        }
        Ok(())
    }

    fn hash_remote(&self, path: &NormalizedPath, timeout: Duration) -> Result<String, AdapterError> {
        let mut command = self.command("hash");
        command.arg(path.as_str());
        let output = self.run(command, timeout)?;
        if output.status_code != Some(0) {
            return Err(AdapterError {
                kind: AdapterErrorKind::Transient,
                path: path.as_str().to_owned(),
                message: format!("hash exited with status {:?}", output.status_code),
            });
        }
        output
            .stdout
            .lines()
            .next()
            .map(str::to_owned)
            .ok_or_else(|| AdapterError {
                kind: AdapterErrorKind::Permanent,
                path: path.as_str().to_owned(),
                message: "hash command produced no output".to_owned(),
            })
    }

    fn health_check(&self, timeout: Duration) -> Result<(), AdapterError> {
        let command = self.command("health");
        let output = self.run(command, timeout)?;
        if output.status_code == Some(0) {
            Ok(())
        } else {
            Err(AdapterError {
                kind: AdapterErrorKind::Transient,
                path: String::new(),
                message: format!("health probe exited with status {:?}", output.status_code),
            })
        }
    }
}
