//! Error taxonomy for snapshot operations

use std::io;
use std::path::{Path, PathBuf};

/// Errors raised by hashing, copying, pruning and the action store
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Filesystem read/write/stat/delete failure
    #[error("I/O failure at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Fingerprint computation failed. Callers fall back to copying.
    #[error("failed to fingerprint {}: {source}", .path.display())]
    Hash {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The action store could not be written to durable storage
    #[error("failed to persist {}: {source}", .path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The action store file exists but cannot be parsed
    #[error("malformed action store {}: {source}", .path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl Error {
    /// Path the failing operation was working on
    pub fn path(&self) -> &Path {
        match self {
            Error::Io { path, .. }
            | Error::Hash { path, .. }
            | Error::Persist { path, .. }
            | Error::Malformed { path, .. } => path,
        }
    }

    pub fn is_hash_failure(&self) -> bool {
        matches!(self, Error::Hash { .. })
    }

    /// Reclassify an I/O failure as a hash failure.
    pub(crate) fn into_hash(self) -> Self {
        match self {
            Error::Io { path, source } => Error::Hash { path, source },
            other => other,
        }
    }
}

/// Attach a path to `std::io` results
pub trait IoResultExt<T> {
    fn at(self, path: impl AsRef<Path>) -> Result<T, Error>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn at(self, path: impl AsRef<Path>) -> Result<T, Error> {
        self.map_err(|source| Error::Io {
            path: path.as_ref().to_path_buf(),
            source,
        })
    }
}

/// Convert a walkdir failure, keeping the path it failed on when known
pub(crate) fn from_walk(err: walkdir::Error, root: &Path) -> Error {
    let path = err.path().unwrap_or(root).to_path_buf();
    Error::Io {
        path,
        source: io::Error::from(err),
    }
}
