//! Error types for work list persistence.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or persisting the work list file.
#[derive(Debug, Error)]
pub enum WorkListError {
    /// The work list file could not be read. Fatal at startup.
    #[error("cannot read work list {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A snapshot could not be written or moved into place.
    #[error("cannot persist work list {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl WorkListError {
    #[must_use]
    pub fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
        }
    }

    #[must_use]
    pub fn persist(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persist {
            path: path.into(),
            source,
        }
    }
}
