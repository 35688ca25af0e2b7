//! Content checksums for downloaded files.
//!
//! Hashing streams the file in fixed-size chunks so memory stays bounded for
//! large payloads, and runs on a blocking thread so it never stalls sibling
//! download tasks.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use md5::Md5;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

const BUF_SIZE: usize = 64 * 1024;

/// Supported digest algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    /// MD5, as published by the hosting provider's metadata API.
    Md5,
    /// SHA-256.
    Sha256,
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Md5 => f.write_str("md5"),
            Self::Sha256 => f.write_str("sha256"),
        }
    }
}

/// An expected digest, stored as lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
    algorithm: ChecksumAlgorithm,
    hex: String,
}

impl Checksum {
    /// Creates a checksum, or `None` when `hex` is blank.
    #[must_use]
    pub fn new(algorithm: ChecksumAlgorithm, hex: &str) -> Option<Self> {
        let hex = hex.trim().to_ascii_lowercase();
        if hex.is_empty() {
            return None;
        }
        Some(Self { algorithm, hex })
    }

    /// Shorthand for an MD5 checksum.
    #[must_use]
    pub fn md5(hex: &str) -> Option<Self> {
        Self::new(ChecksumAlgorithm::Md5, hex)
    }

    #[must_use]
    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    #[must_use]
    pub fn hex(&self) -> &str {
        &self.hex
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

/// Result of comparing a file against an expected checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// Digest matches.
    Match,
    /// Digest differs; carries the computed value.
    Mismatch {
        /// Lowercase hex digest of the file on disk.
        actual: String,
    },
}

impl Verification {
    #[must_use]
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Match)
    }
}

/// Error raised when a file cannot be read for hashing.
#[derive(Debug, thiserror::Error)]
#[error("failed to hash {path}: {source}")]
pub struct VerifyError {
    /// File that could not be hashed.
    pub path: PathBuf,
    /// Underlying IO error.
    #[source]
    pub source: io::Error,
}

/// Computes the lowercase hex digest of a file with the given algorithm.
///
/// # Errors
///
/// Returns [`VerifyError`] if the file cannot be opened or read.
pub fn checksum_file_blocking(
    path: &Path,
    algorithm: ChecksumAlgorithm,
) -> Result<String, VerifyError> {
    match algorithm {
        ChecksumAlgorithm::Md5 => digest_file::<Md5>(path),
        ChecksumAlgorithm::Sha256 => digest_file::<Sha256>(path),
    }
}

fn digest_file<D: Digest>(path: &Path) -> Result<String, VerifyError> {
    let map_err = |source| VerifyError {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::open(path).map_err(map_err)?;
    let mut hasher = D::new();
    let mut buf = vec![0u8; BUF_SIZE];
    loop {
        let n = file.read(&mut buf).map_err(map_err)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Computes a file digest on the blocking pool.
///
/// # Errors
///
/// Returns [`VerifyError`] if the file cannot be read or the hashing task dies.
pub async fn checksum_file(
    path: &Path,
    algorithm: ChecksumAlgorithm,
) -> Result<String, VerifyError> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || checksum_file_blocking(&owned, algorithm))
        .await
        .map_err(|join_err| VerifyError {
            path: path.to_path_buf(),
            source: io::Error::other(join_err),
        })?
}

/// Hashes `path` and compares it to `expected`.
///
/// # Errors
///
/// Returns [`VerifyError`] if the file cannot be read.
#[instrument(skip(expected), fields(path = %path.display(), expected = %expected))]
pub async fn verify_file(path: &Path, expected: &Checksum) -> Result<Verification, VerifyError> {
    let actual = checksum_file(path, expected.algorithm()).await?;
    if actual == expected.hex() {
        debug!("checksum matches");
        Ok(Verification::Match)
    } else {
        debug!(%actual, "checksum mismatch");
        Ok(Verification::Mismatch { actual })
    }
}
