#![deny(unsafe_code)]
#![deny(missing_docs)]

//! # Overview
//!
//! `gus-adapter` defines the uniform transport capability set from spec
//! §4.1 — enumerate a directory, stat a path, copy a file to a local
//! path, delete a file, compute/obtain a content hash — and two
//! implementations: [`mount::MountAdapter`] over a local filesystem path,
//! and [`bridge::DeviceBridgeAdapter`] over a shelled-out command-line
//! tool.
//!
//! Every call honors an explicit `timeout: Duration` parameter; no
//! adapter call is allowed to block indefinitely (spec §5). The
//! [`timeout`] helper centralizes the bounded-worker-thread pattern both
//! implementations use to enforce that.

pub mod bridge;
pub mod mount;
mod timeout_helper;

use std::path::Path;
use std::time::Duration;

use gus_core::{AdapterError, NormalizedPath};
use time::OffsetDateTime;

pub use timeout_helper::run_with_timeout;

/// Kind of a directory entry returned by [`Adapter::list_dir`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    /// A regular file.
    File,
    /// A directory.
    Dir,
    /// Anything else (symlink, device node, etc.) — never recursed into,
    /// never copied.
    Other,
}

/// One entry returned by [`Adapter::list_dir`] or [`Adapter::stat`].
#[derive(Clone, Debug)]
pub struct Entry {
    /// Entry name, relative to the directory listed (not a full path).
    pub name: String,
    /// Kind of entry.
    pub kind: EntryKind,
    /// Size in bytes as reported by the transport. Authoritative only for
    /// files; meaningless for directories.
    pub size: u64,
    /// Modification time as reported by the transport.
    pub mtime: OffsetDateTime,
}

/// Result of a successful [`Adapter::copy_file`] call.
#[derive(Clone, Debug)]
pub struct CopyOutcome {
    /// Bytes actually copied, as observed by the adapter (may differ from
    /// the size recorded at scan time; spec §4.5 treats that alone as
    /// non-fatal and corrects the record).
    pub bytes_copied: u64,
    /// Content hash of the bytes read from the source during the copy.
    pub src_hash: String,
    /// Content hash of the bytes that landed at the destination.
    pub dest_hash: String,
}

/// Callback invoked by [`Adapter::copy_file`] as bytes are streamed, so a
/// caller (the worker) can forward incremental progress without the
/// adapter knowing about the progress aggregator.
pub trait ProgressSink: Send {
    /// Called with the number of additional bytes copied since the last call.
    fn on_bytes(&mut self, delta: u64);
}

/// A [`ProgressSink`] that discards every update, for callers that don't
/// need incremental progress (e.g. the verifier, which only cares about
/// the final hash).
pub struct NullProgressSink;

impl ProgressSink for NullProgressSink {
    fn on_bytes(&mut self, _delta: u64) {}
}

/// The uniform transport capability every adapter variant implements
/// (spec §4.1).
pub trait Adapter: Send + Sync {
    /// Enumerates the immediate children of `path`. Honors `timeout`;
    /// returns [`AdapterError`] with kind `timeout` if enumeration does
    /// not complete in time, leaving no background work running.
    fn list_dir(&self, path: &NormalizedPath, timeout: Duration) -> Result<Vec<Entry>, AdapterError>;

    /// Stats a single path. Returns `Ok(None)` if the path does not exist
    /// (distinct from an error).
    fn stat(&self, path: &NormalizedPath, timeout: Duration) -> Result<Option<Entry>, AdapterError>;

    /// Copies `src` to `dest_local`, creating parent directories as
    /// needed. Computes the source hash in-stream while copying where
    /// possible; falls back to a second read when the transport can't
    /// hash and copy in a single pass.
    fn copy_file(
        &self,
        src: &NormalizedPath,
        dest_local: &Path,
        timeout: Duration,
        progress: &mut dyn ProgressSink,
    ) -> Result<CopyOutcome, AdapterError>;

    /// Deletes `path` from the transport.
    fn delete(&self, path: &NormalizedPath) -> Result<(), AdapterError>;

    /// Computes (or obtains) a content hash for a remote file without
    /// copying it locally; used by the verifier (spec §4.7).
    fn hash_remote(&self, path: &NormalizedPath, timeout: Duration) -> Result<String, AdapterError>;

    /// Health-check probe. The mount adapter always succeeds; the
    /// device-bridge adapter actually pings the external tool. Called
    /// before opening a run and after any cluster of timeouts (spec §4.1,
    /// §4.4).
    fn health_check(&self, timeout: Duration) -> Result<(), AdapterError> {
        let _ = timeout;
        Ok(())
    }
}
