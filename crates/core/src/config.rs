//! Per-run configuration, validated once at construction (spec §7.2).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Which pipeline a run executes, selected by `-mode` on the CLI (spec §6).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Source is a mounted local filesystem path.
    Mount,
    /// Source is reached through the device-bridge (adb-like) adapter.
    Adb,
    /// Re-hash destination files and cross-check against the state log.
    Verify,
    /// Delete source files already recorded as backed up.
    Cleanup,
}

impl Mode {
    /// The directory name this mode's artifacts and mirrored files live
    /// under, relative to `-dest` (spec §6 destination layout).
    #[must_use]
    pub const fn dir_name(self) -> &'static str {
        match self {
            Self::Mount => "mount",
            Self::Adb => "adb",
            Self::Verify => "verify",
            Self::Cleanup => "cleanup",
        }
    }

    /// `true` for modes that read from source and copy into destination
    /// (as opposed to verify/cleanup, which operate on an existing run).
    #[must_use]
    pub const fn is_backup(self) -> bool {
        matches!(self, Self::Mount | Self::Adb)
    }
}

/// Default worker-pool size for a backup run, per spec §4.5.
pub const DEFAULT_BACKUP_WORKERS: usize = 2;

/// Default per-directory enumeration timeout (spec §4.4).
pub const DEFAULT_DIRECTORY_TIMEOUT: Duration = Duration::from_secs(20);

/// Default per-adapter-call timeout for non-enumeration operations.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Default consecutive-timeouts threshold before the scanner pauses and
/// health-probes (spec §4.4).
pub const DEFAULT_CONSECUTIVE_TIMEOUT_THRESHOLD: u32 = 8;

/// Default backoff before a health probe after the threshold trips.
pub const DEFAULT_HEALTH_PROBE_BACKOFF: Duration = Duration::from_secs(5);

/// Soft shutdown deadline after cancellation (spec §5).
pub const DEFAULT_CANCEL_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Validated configuration for a single run, threaded by reference through
/// every component the way `ClientConfig` is threaded through
/// `run_client` in the teacher workspace.
#[derive(Clone, Debug)]
pub struct RunConfig {
    /// Root of the source tree (mount mode) or the device-bridge mount
    /// point used for path arithmetic (adb mode).
    pub source_root: PathBuf,
    /// Root of the destination tree; `<dest>/<mode>/` is this run's root.
    pub dest_root: PathBuf,
    /// Selected mode.
    pub mode: Mode,
    /// Worker pool size. Defaults applied by [`RunConfig::new`] when `None`.
    pub workers: usize,
    /// Per-directory enumeration timeout.
    pub directory_timeout: Duration,
    /// Per-adapter-call timeout for non-enumeration operations.
    pub call_timeout: Duration,
    /// Configured priority paths, in schedule order (spec §4.4).
    pub priority_paths: Vec<String>,
    /// If `true`, verify mismatches are re-enqueued for re-copy (spec §4.7
    /// policy flag).
    pub reverify_on_mismatch: bool,
}

/// Priority paths scheduled ahead of the remainder of the source tree by
/// default (spec §4.4): camera, pictures, documents, downloads, movies,
/// music, screenshots, a messaging app's media tree, a generic app-shared
/// media tree, and app-data.
#[must_use]
pub fn default_priority_paths() -> Vec<String> {
    [
        "DCIM/Camera",
        "Pictures",
        "Documents",
        "Download",
        "Movies",
        "Music",
        "Pictures/Screenshots",
        "Android/media/com.whatsapp/WhatsApp/Media",
        "Android/media",
        "Android/data",
    ]
    .into_iter()
    .map(str::to_owned)
    .collect()
}

impl RunConfig {
    /// Builds and validates a [`RunConfig`].
    ///
    /// `workers` of `None` applies the mode default: `DEFAULT_BACKUP_WORKERS`
    /// for `mount`/`adb`, `min(available_parallelism, 4)` for `verify`.
    /// `cleanup` ignores worker count entirely (it runs single-threaded per
    /// spec §4.9, which has no concurrency section of its own).
    pub fn new(
        source_root: PathBuf,
        dest_root: PathBuf,
        mode: Mode,
        workers: Option<usize>,
    ) -> Result<Self, ConfigError> {
        if mode == Mode::Cleanup && paths_equal(&source_root, &dest_root) {
            return Err(ConfigError::SourceEqualsDestination);
        }
        if mode.is_backup() && !source_root.exists() {
            return Err(ConfigError::SourceNotFound(source_root.clone()));
        }

        let workers = workers.unwrap_or_else(|| default_workers_for(mode));
        if mode != Mode::Cleanup && workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }

        Ok(Self {
            source_root,
            dest_root,
            mode,
            workers,
            directory_timeout: DEFAULT_DIRECTORY_TIMEOUT,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            priority_paths: default_priority_paths(),
            reverify_on_mismatch: false,
        })
    }

    /// The backup-transport directory name this run's artifacts live
    /// under. `mount`/`adb` use their own name directly; `verify`/`cleanup`
    /// have no transport of their own on the CLI surface (spec §6 defines
    /// no separate flag for them), so they resolve to whichever of
    /// `mount`/`adb` already exists under `-dest`, preferring `mount`
    /// when both or neither do. This makes `-mode verify`/`-mode cleanup`
    /// operate on the same state log a prior `mount`/`adb` run produced,
    /// rather than starting a disconnected one of their own.
    #[must_use]
    pub fn resolved_transport_dir_name(&self) -> &'static str {
        match self.mode {
            Mode::Mount => "mount",
            Mode::Adb => "adb",
            Mode::Verify | Mode::Cleanup => {
                let mount_dir = self.dest_root.join("mount");
                let adb_dir = self.dest_root.join("adb");
                if !mount_dir.is_dir() && adb_dir.is_dir() {
                    "adb"
                } else {
                    "mount"
                }
            }
        }
    }

    /// `<dest>/<mode>/`, the root for this run's artifacts and mirrored
    /// files (spec §6).
    #[must_use]
    pub fn mode_root(&self) -> PathBuf {
        self.dest_root.join(self.resolved_transport_dir_name())
    }

    /// `<dest>/<mode>/gus_state.md`.
    #[must_use]
    pub fn state_log_path(&self) -> PathBuf {
        self.mode_root().join("gus_state.md")
    }

    /// `<dest>/<mode>/gus_errors.log`.
    #[must_use]
    pub fn error_log_path(&self) -> PathBuf {
        self.mode_root().join("gus_errors.log")
    }
}

fn default_workers_for(mode: Mode) -> usize {
    match mode {
        Mode::Verify => std::thread::available_parallelism()
            .map(|n| n.get().min(4))
            .unwrap_or(4),
        Mode::Cleanup => 1,
        Mode::Mount | Mode::Adb => DEFAULT_BACKUP_WORKERS,
    }
}

fn paths_equal(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleanup_rejects_identical_source_and_dest() {
        let dir = tempfile::tempdir().unwrap();
        let err = RunConfig::new(
            dir.path().to_path_buf(),
            dir.path().to_path_buf(),
            Mode::Cleanup,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::SourceEqualsDestination));
    }

    #[test]
    fn mount_rejects_missing_source() {
        let dest = tempfile::tempdir().unwrap();
        let err = RunConfig::new(
            PathBuf::from("/does/not/exist/ever"),
            dest.path().to_path_buf(),
            Mode::Mount,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::SourceNotFound(_)));
    }

    #[test]
    fn verify_worker_default_is_capped_at_four() {
        let src = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        let config = RunConfig::new(
            src.path().to_path_buf(),
            dest.path().to_path_buf(),
            Mode::Verify,
            None,
        )
        .unwrap();
        assert!(config.workers <= 4 && config.workers >= 1);
    }

    #[test]
    fn verify_mode_resolves_to_existing_mount_dir() {
        let src = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dest.path().join("mount")).unwrap();
        let config = RunConfig::new(src.path().to_path_buf(), dest.path().to_path_buf(), Mode::Verify, Some(1)).unwrap();
        assert_eq!(config.mode_root(), dest.path().join("mount"));
    }

    #[test]
    fn verify_mode_resolves_to_adb_dir_when_only_adb_exists() {
        let src = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dest.path().join("adb")).unwrap();
        let config = RunConfig::new(src.path().to_path_buf(), dest.path().to_path_buf(), Mode::Verify, Some(1)).unwrap();
        assert_eq!(config.mode_root(), dest.path().join("adb"));
    }

    #[test]
    fn mode_root_nests_under_dest() {
        let src = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        let config = RunConfig::new(
            src.path().to_path_buf(),
            dest.path().to_path_buf(),
            Mode::Mount,
            Some(2),
        )
        .unwrap();
        assert_eq!(config.mode_root(), dest.path().join("mount"));
    }
}
