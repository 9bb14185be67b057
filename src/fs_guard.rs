//! Guarded file reads for untrusted attestation inputs.
//!
//! Every driver that reads attestation files from disk (filesystem scans,
//! JSONL bundles, downloaded release assets) routes through
//! [`read_validated`]. Two invariants are enforced before any content is
//! read:
//!
//! 1. Symlinks are refused, so a crafted bundle cannot point the collector
//!    at files outside the scanned directory.
//! 2. Files larger than the caller's `max_bytes` bound are refused.
//!
//! There is a check-to-use gap between `symlink_metadata()` and the read;
//! the local filesystem is trusted infrastructure in this crate's threat
//! model, so the gap is accepted.

use std::fs;
use std::path::Path;

use crate::errors::{Error, Result};

/// Default size bound for a single attestation file (100 MiB).
pub const MAX_ATTESTATION_BYTES: u64 = 100 * 1024 * 1024;

/// Reads a file after verifying it is not a symlink and is within
/// `max_bytes`.
///
/// # Errors
///
/// Returns an error if the path does not exist or is unreadable, is a
/// symlink, or exceeds `max_bytes`.
pub fn read_validated(path: &Path, max_bytes: u64) -> Result<Vec<u8>> {
    let meta = fs::symlink_metadata(path).map_err(|source| Error::Io {
        context: format!("stat {}", path.display()),
        source,
    })?;
    if meta.file_type().is_symlink() {
        return Err(Error::parse(
            path.display().to_string(),
            "refusing to read symlink",
        ));
    }
    if meta.len() > max_bytes {
        return Err(Error::parse(
            path.display().to_string(),
            format!("file too large: {} bytes, max {max_bytes}", meta.len()),
        ));
    }
    fs::read(path).map_err(|source| Error::Io {
        context: format!("read {}", path.display()),
        source,
    })
}
