//! Normalized, source-root-relative path keys.
//!
//! Every cross-component identifier in GusSync — state-log keys, work
//! items, error-log entries — is a [`NormalizedPath`]: forward-slash,
//! case-preserving, with the source root already stripped.

use std::fmt;
use std::path::Path;

/// A source-root-relative path, normalized to forward slashes.
///
/// Construction never fails: any input is normalized, not validated. A
/// path containing `..` components is left as-is (the scanner never
/// produces one, since it only ever descends from the source root) rather
/// than rejected, keeping this type a pure value with no I/O.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NormalizedPath(String);

impl NormalizedPath {
    /// Normalizes `path`, which must already be relative to the source
    /// root (the caller strips the root before calling this).
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        let mut out = String::new();
        for component in path.as_ref().components() {
            let part = component.as_os_str().to_string_lossy();
            if part.is_empty() {
                continue;
            }
            if !out.is_empty() {
                out.push('/');
            }
            out.push_str(&part.replace('\\', "/"));
        }
        Self(out)
    }

    /// Builds a normalized path directly from an already-slash-separated
    /// string, without touching `std::path`. Used by the state log reader,
    /// which deserializes keys straight from disk.
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the normalized path as a plain string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the final path component (the file's basename), or the
    /// whole path if it has no `/` separator.
    #[must_use]
    pub fn basename(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Joins this normalized path onto a local filesystem root, producing
    /// the mirrored destination path.
    #[must_use]
    pub fn mirrored_under(&self, root: &Path) -> std::path::PathBuf {
        let mut out = root.to_path_buf();
        for part in self.0.split('/') {
            out.push(part);
        }
        out
    }
}

impl fmt::Display for NormalizedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl serde::Serialize for NormalizedPath {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for NormalizedPath {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        String::deserialize(deserializer).map(Self::from_raw)
    }
}
