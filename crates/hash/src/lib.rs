#![deny(unsafe_code)]
#![deny(missing_docs)]

//! # Overview
//!
//! `gus-hash` exposes the single content-hash primitive used to compare
//! source and destination bytes throughout the engine: copy verification
//! (spec §4.5), the independent verifier pass (spec §4.7), and the
//! cleaner's re-stat check all compare digests produced here.
//!
//! A streaming [`ContentHasher`] lets an adapter hash bytes in-stream
//! while copying (the preferred path in spec §4.1); [`hash_reader`] covers
//! the fallback where a transport must read the source twice.

use std::io::{self, Read};

use sha2::{Digest, Sha256};

/// Streaming hasher over the content-hash algorithm GusSync standardizes
/// on. Callers feed bytes incrementally via [`ContentHasher::update`] and
/// obtain the final digest through [`ContentHasher::finalize`].
#[derive(Clone, Debug, Default)]
pub struct ContentHasher {
    inner: Sha256,
}

/// Hex-encoded content digest, stored verbatim in a `FileRecord`'s
/// `source_hash`/`dest_hash` fields.
pub type Digest32 = [u8; 32];

impl ContentHasher {
    /// Creates a hasher with empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds additional bytes into the digest state.
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Finalizes the digest and returns the raw 32-byte SHA-256 output.
    #[must_use]
    pub fn finalize(self) -> Digest32 {
        self.inner.finalize().into()
    }

    /// Finalizes the digest and returns its lowercase hex encoding, the
    /// form stored in the state log.
    #[must_use]
    pub fn finalize_hex(self) -> String {
        hex_encode(&self.finalize())
    }
}

/// Hashes an entire reader in one call, for transports that cannot hash
/// in-stream while copying and must read the source a second time (spec
/// §4.1).
pub fn hash_reader<R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = ContentHasher::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize_hex())
}

/// Hashes a byte slice in one call.
#[must_use]
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = ContentHasher::new();
    hasher.update(data);
    hasher.finalize_hex()
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write as _;

    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        write!(&mut out, "{byte:02x}").expect("write! to String cannot fail");
    }
    out
}
