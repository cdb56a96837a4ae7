//! Thin wrapper over local-filesystem primitives (spec §4.1).

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use gus_core::{AdapterError, AdapterErrorKind, NormalizedPath};
use gus_hash::ContentHasher;
use time::OffsetDateTime;

use crate::{Adapter, CopyOutcome, Entry, EntryKind, ProgressSink};

/// Adapter variant treating the source as an already-mounted local
/// filesystem path.
#[derive(Clone, Debug)]
pub struct MountAdapter {
    root: PathBuf,
}

impl MountAdapter {
    /// Creates a mount adapter rooted at `root`. `root` itself is not
    /// validated; [`gus_core::RunConfig::new`] already checked it exists.
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn full_path(&self, path: &NormalizedPath) -> PathBuf {
        path.mirrored_under(&self.root)
    }
}

fn entry_kind(file_type: fs::FileType) -> EntryKind {
    if file_type.is_dir() {
        EntryKind::Dir
    } else if file_type.is_file() {
        EntryKind::File
    } else {
        EntryKind::Other
    }
}

fn system_time_to_offset(time: std::time::SystemTime) -> OffsetDateTime {
    OffsetDateTime::from(time)
}

fn read_entry(path: &Path) -> std::io::Result<Entry> {
    let metadata = fs::symlink_metadata(path)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(Entry {
        name,
        kind: entry_kind(metadata.file_type()),
        size: metadata.len(),
        mtime: system_time_to_offset(metadata.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH)),
    })
}

impl Adapter for MountAdapter {
    fn list_dir(&self, path: &NormalizedPath, timeout: Duration) -> Result<Vec<Entry>, AdapterError> {
        let dir = self.full_path(path);
        crate::run_with_timeout(timeout, move || -> std::io::Result<Vec<Entry>> {
            let mut entries = Vec::new();
            for item in fs::read_dir(&dir)? {
                let item = item?;
                entries.push(read_entry(&item.path())?);
            }
            Ok(entries)
        })
        .ok_or_else(|| AdapterError::timeout(path))?
        .map_err(|e| AdapterError::from_io(path, &e))
    }

    fn stat(&self, path: &NormalizedPath, timeout: Duration) -> Result<Option<Entry>, AdapterError> {
        let full = self.full_path(path);
        let result = crate::run_with_timeout(timeout, move || read_entry(&full))
            .ok_or_else(|| AdapterError::timeout(path))?;
        match result {
            Ok(entry) => Ok(Some(entry)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AdapterError::from_io(path, &e)),
        }
    }

    fn copy_file(
        &self,
        src: &NormalizedPath,
        dest_local: &Path,
        timeout: Duration,
        progress: &mut dyn ProgressSink,
    ) -> Result<CopyOutcome, AdapterError> {
        let source_path = self.full_path(src);
        let dest_path = dest_local.to_path_buf();

        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent).map_err(|e| AdapterError::from_io(src, &e))?;
        }

        // Single-pass: read the source once, hashing as we go, and write
        // the same bytes to the destination (spec §4.1's preferred path).
        let bytes_copied_and_hash = crate::run_with_timeout(timeout, {
            let source_path = source_path.clone();
            let dest_path = dest_path.clone();
            move || -> std::io::Result<(u64, String)> {
                let mut source = File::open(&source_path)?;
                let mut dest = File::create(&dest_path)?;
                let mut hasher = ContentHasher::new();
                let mut buf = [0u8; 256 * 1024];
                let mut total = 0u64;
                loop {
                    let n = source.read(&mut buf)?;
                    if n == 0 {
                        break;
                    }
                    hasher.update(&buf[..n]);
                    dest.write_all(&buf[..n])?;
                    total += n as u64;
                }
                dest.sync_all()?;
                Ok((total, hasher.finalize_hex()))
            }
        })
        .ok_or_else(|| AdapterError::timeout(src))?
        .map_err(|e| AdapterError::from_io(src, &e))?;

        let (bytes_copied, src_hash) = bytes_copied_and_hash;
        progress.on_bytes(bytes_copied);

        // Re-read the destination to confirm the bytes that actually
        // landed on disk, guarding against a write that silently
        // truncated or corrupted data.
        let dest_hash = gus_hash::hash_reader(File::open(&dest_path).map_err(|e| AdapterError::from_io(src, &e))?)
            .map_err(|e| AdapterError::from_io(src, &e))?;

        Ok(CopyOutcome {
            bytes_copied,
            src_hash,
            dest_hash,
        })
    }

    fn delete(&self, path: &NormalizedPath) -> Result<(), AdapterError> {
        let full = self.full_path(path);
        fs::remove_file(&full).map_err(|e| AdapterError::from_io(path, &e))
    }

    fn hash_remote(&self, path: &NormalizedPath, timeout: Duration) -> Result<String, AdapterError> {
        let full = self.full_path(path);
        crate::run_with_timeout(timeout, move || -> std::io::Result<String> {
            gus_hash::hash_reader(File::open(&full)?)
        })
        .ok_or_else(|| AdapterError::timeout(path))?
        .map_err(|e| AdapterError::from_io(path, &e))
    }

    fn health_check(&self, _timeout: Duration) -> Result<(), AdapterError> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(AdapterError {
                kind: AdapterErrorKind::Permanent,
                path: self.root.display().to_string(),
                message: "mount root is no longer a directory".to_owned(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NullProgressSink;
    use std::time::Duration;

    fn timeout() -> Duration {
        Duration::from_secs(5)
    }

    #[test]
    fn list_dir_returns_children() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"hello").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let adapter = MountAdapter::new(dir.path().to_path_buf());
        let mut entries = adapter
            .list_dir(&NormalizedPath::new(""), timeout())
            .unwrap();
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "a.jpg");
        assert_eq!(entries[0].kind, EntryKind::File);
        assert_eq!(entries[1].kind, EntryKind::Dir);
    }

    #[test]
    fn stat_missing_path_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = MountAdapter::new(dir.path().to_path_buf());
        let result = adapter
            .stat(&NormalizedPath::new("nope.jpg"), timeout())
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn copy_file_hashes_match_and_bytes_land() {
        let src_dir = tempfile::tempdir().unwrap();
        let dest_dir = tempfile::tempdir().unwrap();
        std::fs::write(src_dir.path().join("a.jpg"), b"0123456789").unwrap();

        let adapter = MountAdapter::new(src_dir.path().to_path_buf());
        let dest_path = dest_dir.path().join("DCIM/a.jpg");
        let mut sink = NullProgressSink;
        let outcome = adapter
            .copy_file(&NormalizedPath::new("a.jpg"), &dest_path, timeout(), &mut sink)
            .unwrap();

        assert_eq!(outcome.bytes_copied, 10);
        assert_eq!(outcome.src_hash, outcome.dest_hash);
        assert_eq!(std::fs::read(&dest_path).unwrap(), b"0123456789");
    }

    #[test]
    fn delete_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"x").unwrap();
        let adapter = MountAdapter::new(dir.path().to_path_buf());
        adapter.delete(&NormalizedPath::new("a.jpg")).unwrap();
        assert!(!dir.path().join("a.jpg").exists());
    }

    #[test]
    fn health_check_fails_once_root_disappears() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("gone");
        std::fs::create_dir(&root).unwrap();
        let adapter = MountAdapter::new(root.clone());
        assert!(adapter.health_check(timeout()).is_ok());
        std::fs::remove_dir(&root).unwrap();
        assert!(adapter.health_check(timeout()).is_err());
    }
}
