//! [`FileRecord`] and its status state machine.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::path::NormalizedPath;

/// Lifecycle status of a single source file, per spec §3/§4.8.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    /// Discovered but not yet claimed by a worker.
    Pending,
    /// A worker has claimed the file and is streaming it.
    Copying,
    /// Copy succeeded; hashes matched.
    BackedUp,
    /// Copy failed after exhausting retries, or was classified permanent.
    Failed,
    /// Excluded by the exclusion filter at scan time.
    SkippedExcluded,
    /// Its containing directory timed out during enumeration.
    SkippedTimeout,
    /// The source file disappeared between scan and copy (or re-stat).
    MissingSource,
    /// A verify pass re-hashed the destination and it matched the source.
    Verified,
    /// A verify pass found the destination hash did not match the source.
    Mismatch,
    /// The cleaner deleted the source file after a successful backup.
    DeletedFromSource,
}

impl FileStatus {
    /// Returns `true` if transitioning from `self` to `next` is permitted
    /// by the state machine in spec §4.8.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use FileStatus::{
            BackedUp, Copying, DeletedFromSource, Failed, Mismatch, MissingSource, Pending,
            SkippedExcluded, SkippedTimeout, Verified,
        };

        match (self, next) {
            (Pending, Copying)
            | (Copying, BackedUp)
            | (Copying, Failed)
            | (BackedUp, Verified)
            | (Mismatch, Copying)
            | (BackedUp, Mismatch)
            | (Verified, Mismatch)
            | (BackedUp, DeletedFromSource)
            | (Verified, DeletedFromSource) => true,

            (Pending | Copying, MissingSource) => true,

            // A re-scan can rediscover a path last left in any of these
            // terminal-ish states — a prior permanent failure, a source that
            // reappeared after being missing, a directory that timed out and
            // is now enumerable, or a `backed_up` record whose source has
            // since changed size/mtime. Each is a legitimate re-attempt, not
            // a corrupt log, so a worker claiming the path is allowed to move
            // it straight to `copying` rather than tripping the state log's
            // transition guard.
            (Failed | BackedUp | MissingSource | SkippedTimeout | SkippedExcluded | Verified, Copying) => true,

            // `skipped_excluded` is only ever assigned at first sight, so any
            // not-yet-recorded state (modeled here as `Pending`, the record's
            // initial status) may move to it.
            (Pending, SkippedExcluded) => true,
            (Pending, SkippedTimeout) => true,

            (a, b) if a == b => true,
            _ => false,
        }
    }
}

/// One per-file record in the state log.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileRecord {
    /// Normalized, source-root-relative path. Unique key.
    pub path: NormalizedPath,
    /// Source-declared size in bytes at scan time; corrected post-copy if
    /// the adapter reports a different actual size.
    pub size: u64,
    /// Source modification time at last successful action.
    #[serde(with = "time::serde::rfc3339")]
    pub mtime: OffsetDateTime,
    /// Content digest of the source, once computed.
    pub source_hash: Option<String>,
    /// Content digest of the destination, once computed.
    pub dest_hash: Option<String>,
    /// Current lifecycle status.
    pub status: FileStatus,
    /// Monotonic count of copy/verify attempts.
    pub attempts: u32,
    /// Truncated diagnostic string from the most recent failure, if any.
    pub last_error: Option<String>,
    /// When this path was first discovered.
    #[serde(with = "time::serde::rfc3339")]
    pub first_seen_at: OffsetDateTime,
    /// When this record was last mutated.
    #[serde(with = "time::serde::rfc3339")]
    pub last_updated_at: OffsetDateTime,

    /// Unknown fields from a newer schema version are preserved verbatim
    /// on read and re-emitted on the next write, per §6 forward
    /// compatibility. Never populated by this crate's own writers.
    #[serde(flatten, default)]
    pub unknown_fields: serde_json::Map<String, serde_json::Value>,
}

/// Truncation length applied to [`FileRecord::last_error`] before storage.
pub const LAST_ERROR_MAX_LEN: usize = 512;

impl FileRecord {
    /// Creates a brand-new `pending` record for a freshly discovered path.
    #[must_use]
    pub fn new_pending(path: NormalizedPath, size: u64, mtime: OffsetDateTime, now: OffsetDateTime) -> Self {
        Self {
            path,
            size,
            mtime,
            source_hash: None,
            dest_hash: None,
            status: FileStatus::Pending,
            attempts: 0,
            last_error: None,
            first_seen_at: now,
            last_updated_at: now,
            unknown_fields: serde_json::Map::new(),
        }
    }

    /// Returns `true` if `size`/`mtime` match what the scanner observed on
    /// the source right now — used by the scanner to decide whether a
    /// `backed_up` record can be treated as already-done (spec §4.4).
    #[must_use]
    pub fn matches_observed(&self, size: u64, mtime: OffsetDateTime) -> bool {
        self.size == size && self.mtime == mtime
    }

    /// Truncates `message` to [`LAST_ERROR_MAX_LEN`] bytes at a char
    /// boundary and stores it as `last_error`.
    pub fn set_last_error(&mut self, message: &str) {
        let mut truncated = message.to_string();
        if truncated.len() > LAST_ERROR_MAX_LEN {
            let mut end = LAST_ERROR_MAX_LEN;
            while !truncated.is_char_boundary(end) {
                end -= 1;
            }
            truncated.truncate(end);
        }
        self.last_error = Some(truncated);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH
    }

    #[test]
    fn pending_to_copying_allowed() {
        assert!(FileStatus::Pending.can_transition_to(FileStatus::Copying));
    }

    #[test]
    fn backed_up_to_pending_forbidden() {
        assert!(!FileStatus::BackedUp.can_transition_to(FileStatus::Pending));
    }

    #[test]
    fn mismatch_to_copying_allowed_as_explicit_recopy() {
        assert!(FileStatus::Mismatch.can_transition_to(FileStatus::Copying));
    }

    #[test]
    fn verified_to_pending_forbidden() {
        assert!(!FileStatus::Verified.can_transition_to(FileStatus::Pending));
    }

    #[test]
    fn stale_terminal_states_may_be_reclaimed_for_copying() {
        assert!(FileStatus::Failed.can_transition_to(FileStatus::Copying));
        assert!(FileStatus::BackedUp.can_transition_to(FileStatus::Copying));
        assert!(FileStatus::MissingSource.can_transition_to(FileStatus::Copying));
        assert!(FileStatus::SkippedTimeout.can_transition_to(FileStatus::Copying));
        assert!(FileStatus::SkippedExcluded.can_transition_to(FileStatus::Copying));
        assert!(FileStatus::Verified.can_transition_to(FileStatus::Copying));
    }

    #[test]
    fn deleted_from_source_to_copying_still_forbidden() {
        assert!(!FileStatus::DeletedFromSource.can_transition_to(FileStatus::Copying));
    }

    #[test]
    fn last_error_is_truncated_at_char_boundary() {
        let mut record = FileRecord::new_pending(NormalizedPath::new("a"), 0, now(), now());
        let long = "x".repeat(LAST_ERROR_MAX_LEN + 100);
        record.set_last_error(&long);
        assert_eq!(record.last_error.unwrap().len(), LAST_ERROR_MAX_LEN);
    }
}
