#![deny(unsafe_code)]
#![deny(missing_docs)]

//! # Overview
//!
//! `gus-errorlog` is the append-only, newline-delimited error stream from
//! spec §4.10: every run-relevant failure that doesn't abort the
//! supervisor gets one line here, and [`ErrorLog::summarize`] turns the
//! file into counts-per-kind plus capped representative path lists for
//! the terminal snapshot.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use gus_core::NormalizedPath;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

/// Category of an error-log entry (spec §4.10).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// A directory's enumeration did not complete within its timeout.
    DirectoryTimeout,
    /// A directory-level operation failed for a reason other than timeout.
    DirectoryError,
    /// A verify pass found source and destination hashes differ.
    HashMismatch,
    /// A file copy failed.
    CopyError,
    /// Anything not covered by a more specific kind.
    Other,
    /// A run-aborting failure (e.g. scanner circuit breaker trip).
    Critical,
}

/// One line in the error log.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// When the error was recorded.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// Category.
    pub kind: ErrorKind,
    /// Path the error relates to, if any.
    pub path: Option<NormalizedPath>,
    /// Free-form diagnostic message.
    pub message: String,
}

/// Errors this crate itself can produce.
#[derive(Debug, Error)]
pub enum ErrorLogError {
    /// The underlying file could not be opened, written, or read.
    #[error("error log I/O failure: {0}")]
    Io(#[from] io::Error),
}

/// Append-only error log, mutex-guarded, one JSON object per line.
pub struct ErrorLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl ErrorLog {
    /// Opens (creating if necessary) the error log at `path`, appending to
    /// any existing content.
    pub fn open(path: PathBuf) -> Result<Self, ErrorLogError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Appends one record, writing a single complete line and fsyncing
    /// before returning (line-atomic: a crash mid-write never interleaves
    /// with another writer because the file is mutex-guarded in-process
    /// and opened in append mode at the OS level).
    pub fn append(&self, kind: ErrorKind, path: Option<&NormalizedPath>, message: impl Into<String>) -> Result<(), ErrorLogError> {
        let record = ErrorRecord {
            timestamp: OffsetDateTime::now_utc(),
            kind,
            path: path.cloned(),
            message: message.into(),
        };
        let mut line = serde_json::to_string(&record).expect("ErrorRecord always serializes");
        line.push('\n');

        let mut file = self.file.lock().expect("error log mutex poisoned");
        file.write_all(line.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    /// Path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the whole log and produces a categorized summary.
    pub fn summarize(&self) -> Result<ErrorSummary, ErrorLogError> {
        // Flush before reading so a summary taken mid-run sees every
        // append issued so far.
        self.file.lock().expect("error log mutex poisoned").sync_all()?;

        let reader = BufReader::new(File::open(&self.path)?);
        let mut summary = ErrorSummary::default();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let Ok(record) = serde_json::from_str::<ErrorRecord>(&line) else {
                continue;
            };
            summary.record(&record);
        }
        Ok(summary)
    }
}

/// Maximum number of representative paths kept per kind in a summary.
pub const MAX_REPRESENTATIVE_PATHS: usize = 10;

/// Post-run categorized summary of the error log (spec §4.10).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ErrorSummary {
    /// Count of entries per kind.
    pub counts: std::collections::BTreeMap<ErrorKind, u64>,
    /// Up to [`MAX_REPRESENTATIVE_PATHS`] example paths per kind.
    pub representative_paths: std::collections::BTreeMap<ErrorKind, Vec<String>>,
}

impl ErrorSummary {
    fn record(&mut self, record: &ErrorRecord) {
        *self.counts.entry(record.kind).or_insert(0) += 1;

        let Some(path) = &record.path else { return };
        let paths = self.representative_paths.entry(record.kind).or_default();
        if paths.len() < MAX_REPRESENTATIVE_PATHS {
            paths.push(path.as_str().to_owned());
        } else {
            tracing::warn!(
                kind = ?record.kind,
                "error summary dropped a representative path past the cap of {}",
                MAX_REPRESENTATIVE_PATHS
            );
        }
    }

    /// Total number of entries of any kind.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_then_summarize_counts_by_kind() {
        let dir = tempfile::tempdir().unwrap();
        let log = ErrorLog::open(dir.path().join("gus_errors.log")).unwrap();
        log.append(ErrorKind::CopyError, Some(&NormalizedPath::new("a.jpg")), "boom")
            .unwrap();
        log.append(ErrorKind::CopyError, Some(&NormalizedPath::new("b.jpg")), "boom2")
            .unwrap();
        log.append(ErrorKind::DirectoryTimeout, None, "slow dir").unwrap();

        let summary = log.summarize().unwrap();
        assert_eq!(summary.counts[&ErrorKind::CopyError], 2);
        assert_eq!(summary.counts[&ErrorKind::DirectoryTimeout], 1);
        assert_eq!(summary.total(), 3);
    }

    #[test]
    fn representative_paths_are_capped() {
        let dir = tempfile::tempdir().unwrap();
        let log = ErrorLog::open(dir.path().join("gus_errors.log")).unwrap();
        for i in 0..(MAX_REPRESENTATIVE_PATHS + 5) {
            log.append(
                ErrorKind::HashMismatch,
                Some(&NormalizedPath::new(format!("f{i}.jpg"))),
                "mismatch",
            )
            .unwrap();
        }
        let summary = log.summarize().unwrap();
        assert_eq!(summary.counts[&ErrorKind::HashMismatch] as usize, MAX_REPRESENTATIVE_PATHS + 5);
        assert_eq!(summary.representative_paths[&ErrorKind::HashMismatch].len(), MAX_REPRESENTATIVE_PATHS);
    }

    #[test]
    fn reopening_preserves_prior_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gus_errors.log");
        {
            let log = ErrorLog::open(path.clone()).unwrap();
            log.append(ErrorKind::Other, None, "first").unwrap();
        }
        let log = ErrorLog::open(path).unwrap();
        log.append(ErrorKind::Other, None, "second").unwrap();
        assert_eq!(log.summarize().unwrap().total(), 2);
    }
}
