//! Work items flowing from the scanner to the worker pool.

use crate::path::NormalizedPath;

/// Scheduling bucket a discovered path falls into, per spec §4.4's
/// priority-path policy. Lower numbers are scheduled first; ordering
/// between buckets is preserved, ordering within a bucket is not
/// guaranteed to consumers (spec §5).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PriorityBucket(pub u16);

impl PriorityBucket {
    /// Bucket for the configured priority paths, in list order.
    #[must_use]
    pub const fn priority(index: u16) -> Self {
        Self(index)
    }

    /// Bucket for everything else in the source tree, scheduled after all
    /// priority paths.
    pub const REMAINDER: Self = Self(u16::MAX);
}

/// A single unit of scanner-to-worker handoff.
///
/// Ownership passes from the scanner to exactly one worker, which either
/// commits a terminal state to the state log or releases the item as
/// `failed` with a diagnostic (spec §3).
#[derive(Clone, Debug)]
pub struct WorkItem {
    /// Normalized path of the file to copy.
    pub path: NormalizedPath,
    /// Source-declared size in bytes at scan time.
    pub size: u64,
    /// Priority bucket this item was discovered in.
    pub priority_bucket: PriorityBucket,
}
