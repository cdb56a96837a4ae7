#![deny(unsafe_code)]
#![deny(missing_docs)]

//! # Overview
//!
//! `gus-core` holds the data model and error taxonomy shared by every other
//! `gus-*` crate: the normalized path type, [`FileRecord`] and its status
//! machine, the [`JobSnapshot`] contract consumed by external adapters, the
//! per-run [`RunConfig`], and the adapter/run-level error enums.
//!
//! Nothing in this crate touches the filesystem or spawns a thread — it is
//! the vocabulary the rest of the workspace is written against.

pub mod config;
pub mod error;
pub mod path;
pub mod record;
pub mod retry;
pub mod snapshot;
pub mod work_item;

pub use config::{Mode, RunConfig};
pub use error::{AdapterError, AdapterErrorKind, CleanupRefusal, ConfigError, EngineError};
pub use path::NormalizedPath;
pub use record::{FileRecord, FileStatus};
pub use snapshot::{JobSnapshot, Lifecycle};
pub use work_item::{PriorityBucket, WorkItem};

/// Exit codes returned by the `gus-sync` binary, matching §6 of the spec:
/// `0` on success, `1` on any failure or cancellation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ExitCode {
    /// The run completed successfully.
    Success = 0,
    /// The run failed or was canceled.
    Failure = 1,
}

impl ExitCode {
    /// Returns the raw process exit code.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }
}
