#![deny(unsafe_code)]
#![deny(missing_docs)]

//! # Overview
//!
//! `gus-statelog` is the durable, human-readable, append-only journal of
//! per-file decisions from spec §4.2: one newline-delimited JSON object
//! per line, first-seen order, crash-safe (every mutation is fsynced
//! before being acknowledged to the caller), with in-place updates
//! expressed as supersede records — the read path always returns the
//! last-written record for a given key.
//!
//! # Invariants
//!
//! - A crash mid-write leaves the log with either the old record or a
//!   complete new record, never a mix.
//! - A corrupt trailing line on reopen is truncated back to the last
//!   complete newline; a warning is appended to the accompanying error
//!   log (spec §4.2).
//! - Single-writer discipline: all mutation goes through one [`Mutex`].

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use gus_core::{FileRecord, FileStatus, NormalizedPath};
use gus_errorlog::{ErrorKind, ErrorLog};
use thiserror::Error;

/// Schema version written in the state log's header line.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(serde::Serialize, serde::Deserialize)]
struct Header {
    schema_version: u32,
}

/// Errors produced by this crate.
#[derive(Debug, Error)]
pub enum StateLogError {
    /// The underlying file could not be opened, written, read, or synced.
    #[error("state log I/O failure: {0}")]
    Io(#[from] io::Error),
    /// The header line declared a schema version newer than this crate
    /// understands.
    #[error("state log schema version {0} is not supported by this build")]
    UnsupportedSchemaVersion(u32),
    /// The caller attempted a status transition the state machine
    /// forbids (spec §4.8).
    #[error("invalid transition for {path}: {from:?} -> {to:?}")]
    InvalidTransition {
        /// Path the mutation targeted.
        path: String,
        /// Status before the attempted mutation.
        from: FileStatus,
        /// Status the caller attempted to move to.
        to: FileStatus,
    },
}

/// Durable per-file state journal.
pub struct StateLog {
    path: PathBuf,
    writer: Mutex<File>,
    index: RwLock<BTreeMap<NormalizedPath, FileRecord>>,
}

impl StateLog {
    /// Opens (or creates) the state log at `path`. On reopen, replays
    /// every record to rebuild the in-memory index; a corrupt trailing
    /// line is truncated and a warning appended to `error_log`.
    pub fn open(path: PathBuf, error_log: &ErrorLog) -> Result<Self, StateLogError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let existed = path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        let index = if existed {
            recover_and_index(&mut file, &path, error_log)?
        } else {
            write_header(&mut file)?;
            BTreeMap::new()
        };

        Ok(Self {
            path,
            writer: Mutex::new(file),
            index: RwLock::new(index),
        })
    }

    /// Path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the current record for `path`, if one has ever been written.
    #[must_use]
    pub fn get(&self, path: &NormalizedPath) -> Option<FileRecord> {
        self.index
            .read()
            .expect("state log index lock poisoned")
            .get(path)
            .cloned()
    }

    /// Appends `record`, validating the status transition against any
    /// existing record for the same path, then fsyncs before returning.
    pub fn upsert(&self, record: FileRecord) -> Result<(), StateLogError> {
        {
            let index = self.index.read().expect("state log index lock poisoned");
            if let Some(existing) = index.get(&record.path) {
                if !existing.status.can_transition_to(record.status) {
                    return Err(StateLogError::InvalidTransition {
                        path: record.path.as_str().to_owned(),
                        from: existing.status,
                        to: record.status,
                    });
                }
            }
        }

        let mut line = serde_json::to_string(&record).expect("FileRecord always serializes");
        line.push('\n');

        {
            let mut file = self.writer.lock().expect("state log writer lock poisoned");
            file.write_all(line.as_bytes())?;
            file.sync_all()?;
        }

        self.index
            .write()
            .expect("state log index lock poisoned")
            .insert(record.path.clone(), record);
        Ok(())
    }

    /// Returns a snapshot of every record matching `filter`.
    #[must_use]
    pub fn iterate(&self, filter: impl Fn(&FileRecord) -> bool) -> Vec<FileRecord> {
        self.index
            .read()
            .expect("state log index lock poisoned")
            .values()
            .filter(|record| filter(record))
            .cloned()
            .collect()
    }

    /// Returns counts of records per status.
    #[must_use]
    pub fn summary(&self) -> BTreeMap<FileStatus, u64> {
        let mut counts = BTreeMap::new();
        for record in self.index.read().expect("state log index lock poisoned").values() {
            *counts.entry(record.status).or_insert(0u64) += 1;
        }
        counts
    }

    /// Flushes and releases the log. After this call the log must not be
    /// used again; construct a new [`StateLog`] to resume.
    pub fn close(self) -> Result<(), StateLogError> {
        self.writer
            .lock()
            .expect("state log writer lock poisoned")
            .sync_all()?;
        Ok(())
    }

    /// Returns `true` if the log contains no records at all (spec §4.9:
    /// the cleaner refuses to run against an empty log).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.read().expect("state log index lock poisoned").is_empty()
    }
}

fn write_header(file: &mut File) -> Result<(), StateLogError> {
    let header = Header {
        schema_version: SCHEMA_VERSION,
    };
    let mut line = serde_json::to_string(&header).expect("Header always serializes");
    line.push('\n');
    file.write_all(line.as_bytes())?;
    file.sync_all()?;
    Ok(())
}

/// Replays the file from the start, truncating a corrupt trailing line if
/// present, and rebuilds the in-memory index keyed by path (last write
/// wins — a later line for the same path supersedes an earlier one).
fn recover_and_index(
    file: &mut File,
    path: &Path,
    error_log: &ErrorLog,
) -> Result<BTreeMap<NormalizedPath, FileRecord>, StateLogError> {
    file.seek(SeekFrom::Start(0))?;

    let mut raw = Vec::new();
    file.read_to_end(&mut raw)?;

    if !raw.ends_with(b"\n") {
        // Trailing partial line: truncate back to the last complete
        // newline and tell the error log about the recovery.
        let last_newline = raw.iter().rposition(|&b| b == b'\n');
        let truncate_at = last_newline.map_or(0, |idx| idx + 1);
        raw.truncate(truncate_at);
        file.set_len(truncate_at as u64)?;
        file.seek(SeekFrom::Start(0))?;
        file.seek(SeekFrom::End(0))?;

        let _ = error_log.append(
            ErrorKind::Other,
            None,
            format!(
                "state log at {} had a corrupt trailing line; truncated to last complete record",
                path.display()
            ),
        );
        tracing::warn!(path = %path.display(), "state log trailing line truncated on open");
    }

    let mut lines = BufReader::new(raw.as_slice()).lines();
    let header_line = lines
        .next()
        .transpose()?
        .ok_or(StateLogError::Io(io::Error::new(io::ErrorKind::UnexpectedEof, "missing header")))?;
    let header: Header = serde_json::from_str(&header_line)
        .map_err(|e| StateLogError::Io(io::Error::new(io::ErrorKind::InvalidData, e)))?;
    if header.schema_version > SCHEMA_VERSION {
        return Err(StateLogError::UnsupportedSchemaVersion(header.schema_version));
    }

    let mut index = BTreeMap::new();
    for line in lines {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: FileRecord = match serde_json::from_str(&line) {
            Ok(record) => record,
            Err(_) => continue,
        };
        index.insert(record.path.clone(), record);
    }
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gus_core::FileStatus;
    use time::OffsetDateTime;

    fn now() -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }

    fn errlog(dir: &tempfile::TempDir) -> ErrorLog {
        ErrorLog::open(dir.path().join("gus_errors.log")).unwrap()
    }

    #[test]
    fn upsert_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let errors = errlog(&dir);
        let log = StateLog::open(dir.path().join("gus_state.md"), &errors).unwrap();

        let record = FileRecord::new_pending(NormalizedPath::new("a.jpg"), 10, now(), now());
        log.upsert(record.clone()).unwrap();

        let fetched = log.get(&NormalizedPath::new("a.jpg")).unwrap();
        assert_eq!(fetched.size, 10);
        assert_eq!(fetched.status, FileStatus::Pending);
    }

    #[test]
    fn invalid_transition_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let errors = errlog(&dir);
        let log = StateLog::open(dir.path().join("gus_state.md"), &errors).unwrap();

        let mut record = FileRecord::new_pending(NormalizedPath::new("a.jpg"), 10, now(), now());
        record.status = FileStatus::BackedUp;
        log.upsert(record.clone()).unwrap();

        let mut regressed = record;
        regressed.status = FileStatus::Pending;
        let err = log.upsert(regressed).unwrap_err();
        assert!(matches!(err, StateLogError::InvalidTransition { .. }));
    }

    #[test]
    fn reopen_preserves_last_written_record_per_key() {
        let dir = tempfile::tempdir().unwrap();
        let state_path = dir.path().join("gus_state.md");
        {
            let errors = errlog(&dir);
            let log = StateLog::open(state_path.clone(), &errors).unwrap();
            let mut record = FileRecord::new_pending(NormalizedPath::new("a.jpg"), 10, now(), now());
            log.upsert(record.clone()).unwrap();
            record.status = FileStatus::Copying;
            log.upsert(record.clone()).unwrap();
            record.status = FileStatus::BackedUp;
            record.source_hash = Some("abc".to_owned());
            record.dest_hash = Some("abc".to_owned());
            log.upsert(record).unwrap();
        }

        let errors = errlog(&dir);
        let log = StateLog::open(state_path, &errors).unwrap();
        let record = log.get(&NormalizedPath::new("a.jpg")).unwrap();
        assert_eq!(record.status, FileStatus::BackedUp);
    }

    #[test]
    fn corrupt_trailing_line_is_truncated_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let state_path = dir.path().join("gus_state.md");
        {
            let errors = errlog(&dir);
            let log = StateLog::open(state_path.clone(), &errors).unwrap();
            let record = FileRecord::new_pending(NormalizedPath::new("a.jpg"), 10, now(), now());
            log.upsert(record).unwrap();
        }

        // Simulate a crash mid-write: append a truncated, newline-less
        // JSON fragment directly to the file.
        {
            let mut file = OpenOptions::new().append(true).open(&state_path).unwrap();
            file.write_all(br#"{"path":"b.jpg","size":5,"#).unwrap();
        }

        let errors = errlog(&dir);
        let log = StateLog::open(state_path, &errors).unwrap();
        assert!(log.get(&NormalizedPath::new("a.jpg")).is_some());
        assert!(log.get(&NormalizedPath::new("b.jpg")).is_none());
        assert!(errors.summarize().unwrap().total() >= 1);
    }

    #[test]
    fn is_empty_reflects_record_presence() {
        let dir = tempfile::tempdir().unwrap();
        let errors = errlog(&dir);
        let log = StateLog::open(dir.path().join("gus_state.md"), &errors).unwrap();
        assert!(log.is_empty());
        log.upsert(FileRecord::new_pending(NormalizedPath::new("a.jpg"), 1, now(), now()))
            .unwrap();
        assert!(!log.is_empty());
    }

    proptest::proptest! {
        #[test]
        fn summary_counts_never_exceed_total_records(n in 0usize..50) {
            let dir = tempfile::tempdir().unwrap();
            let errors = errlog(&dir);
            let log = StateLog::open(dir.path().join("gus_state.md"), &errors).unwrap();
            for i in 0..n {
                log.upsert(FileRecord::new_pending(
                    NormalizedPath::new(format!("f{i}.jpg")),
                    i as u64,
                    now(),
                    now(),
                ))
                .unwrap();
            }
            let total: u64 = log.summary().values().sum();
            assert_eq!(total as usize, n);
        }
    }
}
