//! Content hashing for attestation provenance.
//!
//! Every envelope that enters the collector is content-addressed: the
//! parser records the sha256 of the exact bytes it consumed into the
//! predicate origin, and drivers may extend that record with a source URI.
//! Hashing failures are fatal to the surrounding parse call.

use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256, Sha512};

use crate::attestation::ResourceDescriptor;
use crate::errors::{Error, Result};

/// Algorithm name used as the digest-map key for SHA-256.
pub const ALGO_SHA256: &str = "sha256";

/// Algorithm name used as the digest-map key for SHA-512.
pub const ALGO_SHA512: &str = "sha512";

/// Computes the hex-encoded sha256 of a byte slice.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Computes the hex-encoded sha512 of a byte slice.
pub fn sha512_hex(data: &[u8]) -> String {
    hex::encode(Sha512::digest(data))
}

/// Hashes a byte slice and returns a resource descriptor carrying the
/// sha256 digest. Name and URI are left empty for the caller to fill.
pub fn hash_bytes(data: &[u8]) -> ResourceDescriptor {
    ResourceDescriptor::new().with_digest(ALGO_SHA256, sha256_hex(data))
}

/// Hashes a byte slice with both sha256 and sha512.
pub fn hash_bytes_full(data: &[u8]) -> ResourceDescriptor {
    ResourceDescriptor::new()
        .with_digest(ALGO_SHA256, sha256_hex(data))
        .with_digest(ALGO_SHA512, sha512_hex(data))
}

/// Streams a reader through sha256 with a 64 KiB buffer and returns the
/// hex digest and the number of bytes read.
pub fn sha256_reader<R: Read>(mut reader: R) -> Result<(String, u64)> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut total: u64 = 0;
    loop {
        let n = reader.read(&mut buf).map_err(|source| Error::Io {
            context: "reading stream for hashing".to_string(),
            source,
        })?;
        if n == 0 {
            break;
        }
        total += n as u64;
        hasher.update(&buf[..n]);
    }
    Ok((hex::encode(hasher.finalize()), total))
}

/// Hashes a file's contents (streaming) and returns a resource descriptor
/// whose name is the file's base name and whose URI is `file:<path>`.
pub fn hash_file(path: &Path) -> Result<ResourceDescriptor> {
    let file = std::fs::File::open(path).map_err(|source| Error::Io {
        context: format!("opening {} for hashing", path.display()),
        source,
    })?;
    let (digest, _) = sha256_reader(file)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    Ok(ResourceDescriptor::new()
        .with_name(name)
        .with_uri(format!("file:{}", path.display()))
        .with_digest(ALGO_SHA256, digest))
}
