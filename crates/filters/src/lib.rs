#![deny(unsafe_code)]
#![deny(missing_docs)]

//! # Overview
//!
//! `gus-filters` implements the exclusion filter from spec §4.3: a pure,
//! total, I/O-free function deciding whether a normalized source path is
//! ever touched by the engine. The policy is evaluated in a fixed order;
//! the first matching rule wins.
//!
//! # Invariants
//!
//! - [`exclude`] never panics and never performs I/O for any `&str` input.
//! - Matching is case-insensitive on the path.
//! - Evaluation order is fixed: filename, extension, pattern, app-sandbox
//!   prefix (with the shared-media carve-out), cache-directory substring,
//!   vendor paths, then — for the carve-out only — an extension allowlist.

use std::sync::OnceLock;

use globset::{Glob, GlobSet, GlobSetBuilder};

/// Exact (case-folded) filenames that are always excluded: hidden
/// metadata files Android and desktop OSes scatter through a tree.
const EXCLUDED_FILENAMES: &[&str] = &[
    ".nomedia",
    ".ds_store",
    "thumbs.db",
    "desktop.ini",
    ".trashinfo",
];

/// File extensions (without the dot, case-folded) that are always
/// excluded: caches, partial downloads, journals, crash dumps.
const EXCLUDED_EXTENSIONS: &[&str] = &[
    "cache", "tmp", "partial", "journal", "crash", "dmp", "bak", "~",
];

/// Glob patterns (matched case-insensitively against the whole path)
/// covering thumbnail prefixes and cache-image suffixes that don't fit a
/// plain extension rule.
const EXCLUDED_PATTERNS: &[&str] = &[
    "**/thumb_*",
    "**/.thumbnails/**",
    "**/*_thumbnail.*",
    "**/*.thumb.*",
];

/// Path prefixes (normalized, forward-slash) that are app-sandbox trees:
/// private per-app storage the user never intends to back up directly.
const APP_SANDBOX_PREFIXES: &[&str] = &["Android/data/", "Android/obb/"];

/// The one allowlisted carve-out under the app-sandbox trees: app-shared
/// media, which users do want backed up. Files under this prefix skip the
/// app-sandbox exclusion but are still subject to the extension allowlist
/// in rule 7.
const SHARED_MEDIA_PREFIX: &str = "Android/media/";

/// Substrings that mark a path component as a cache directory regardless
/// of where in the tree it appears.
const CACHE_DIR_SUBSTRINGS: &[&str] = &["/cache/", "/.cache/", "/webcache/"];

/// Vendor-specific junk paths observed across common Android OEM skins.
const VENDOR_PATH_PREFIXES: &[&str] = &[
    "lost.dir/",
    "system volume information/",
    ".android_secure/",
    ".trash/",
];

/// Extensions allowed under [`SHARED_MEDIA_PREFIX`]: images, video, audio,
/// and common document formats. Anything else under that prefix is
/// excluded even though it escaped the app-sandbox rule.
const SHARED_MEDIA_ALLOWED_EXTENSIONS: &[&str] = &[
    // images
    "jpg", "jpeg", "png", "gif", "webp", "heic", "bmp",
    // video
    "mp4", "mov", "mkv", "3gp", "webm", "avi",
    // audio
    "mp3", "m4a", "wav", "ogg", "opus", "flac", "aac",
    // documents
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "txt", "odt",
];

fn pattern_set() -> &'static GlobSet {
    static SET: OnceLock<GlobSet> = OnceLock::new();
    SET.get_or_init(|| {
        let mut builder = GlobSetBuilder::new();
        for pattern in EXCLUDED_PATTERNS {
            builder.add(
                Glob::new(pattern).expect("exclusion patterns are fixed and valid at compile time"),
            );
        }
        builder
            .build()
            .expect("exclusion pattern set is fixed and valid at compile time")
    })
}

fn extension_of(lower_path: &str) -> Option<&str> {
    let basename = lower_path.rsplit('/').next().unwrap_or(lower_path);
    basename.rsplit_once('.').map(|(_, ext)| ext)
}

/// Decides whether `path` (a normalized, source-root-relative path) should
/// be excluded from the backup.
///
/// Pure: no I/O, no panics, deterministic for any input, case-insensitive.
#[must_use]
pub fn exclude(path: &str) -> bool {
    let lower = path.to_lowercase();
    let basename = lower.rsplit('/').next().unwrap_or(&lower);

    // 1. Specific filename matches.
    if EXCLUDED_FILENAMES.contains(&basename) {
        return true;
    }

    // 2. Extension blacklist.
    if let Some(ext) = extension_of(&lower) {
        if EXCLUDED_EXTENSIONS.contains(&ext) {
            return true;
        }
    }

    // 3. Pattern-based exclusions.
    if pattern_set().is_match(&lower) {
        return true;
    }

    // 4. App-sandbox prefixes, with the shared-media carve-out.
    let in_shared_media = lower.starts_with(SHARED_MEDIA_PREFIX);
    if !in_shared_media && APP_SANDBOX_PREFIXES.iter().any(|p| lower.starts_with(p)) {
        return true;
    }

    // 5. Cache-directory substring exclusions.
    let bounded = format!("/{lower}/");
    if CACHE_DIR_SUBSTRINGS.iter().any(|s| bounded.contains(s)) {
        return true;
    }

    // 6. Vendor-specific path exclusions.
    if VENDOR_PATH_PREFIXES.iter().any(|p| lower.starts_with(p)) {
        return true;
    }

    // 7. Extension allowlist, shared-media carve-out only.
    if in_shared_media {
        let allowed = extension_of(&lower)
            .is_some_and(|ext| SHARED_MEDIA_ALLOWED_EXTENSIONS.contains(&ext));
        if !allowed {
            return true;
        }
    }

    false
}
