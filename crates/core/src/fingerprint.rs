//! Directory tree fingerprinting
//!
//! A fingerprint summarises every regular file under a root: its relative
//! path, permission bits and byte content. Siblings are visited in sorted
//! order so the result does not depend on the order the filesystem returns
//! entries in, and each file is hashed on its own before being folded into
//! the running digest, so memory use stays flat regardless of tree size.

use crate::error::{self, Error};
use crate::hash::{hash_file, IncrementalHasher};
use crate::{IoResultExt, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, Metadata};
use std::io;
use std::path::Path;
use walkdir::WalkDir;

/// Prefix identifying the digest scheme inside the stored string
const SCHEME: &str = "b3:";

/// Domain separator absorbed before any file record
const FORMAT_TAG: &[u8] = b"keepsake-tree-v1\0";

/// Opaque, comparable summary of a directory tree
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Fingerprint {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source of tree fingerprints.
///
/// The scheduler only depends on this seam, which lets tests substitute a
/// hasher that fails on demand.
pub trait ContentHasher: Send + Sync {
    fn fingerprint(&self, root: &Path) -> Result<Fingerprint>;
}

/// The production hasher: BLAKE3 over a sorted walk
#[derive(Debug, Default, Clone, Copy)]
pub struct DirHasher;

impl ContentHasher for DirHasher {
    fn fingerprint(&self, root: &Path) -> Result<Fingerprint> {
        fingerprint(root)
    }
}

/// Fingerprint the tree rooted at `root`.
///
/// Every failure is reported as [`Error::Hash`].
pub fn fingerprint(root: &Path) -> Result<Fingerprint> {
    fingerprint_tree(root).map_err(Error::into_hash)
}

fn fingerprint_tree(root: &Path) -> Result<Fingerprint> {
    let meta = fs::metadata(root).at(root)?;
    if !meta.is_dir() {
        return Err(Error::Io {
            path: root.to_path_buf(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "not a directory"),
        });
    }

    let mut combined = IncrementalHasher::new();
    combined.update(FORMAT_TAG);
    let mut files = 0usize;

    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|e| error::from_walk(e, root))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let meta = entry.metadata().map_err(|e| error::from_walk(e, root))?;
        let content = hash_file(entry.path())?;

        combined
            .update(&relative_key(relative))
            .update(&[0])
            .update(&permission_bits(&meta).to_le_bytes())
            .update(&meta.len().to_le_bytes())
            .update(content.as_bytes());
        files += 1;
    }

    tracing::trace!(root = %root.display(), files, "fingerprinted tree");
    Ok(Fingerprint(format!("{}{}", SCHEME, combined.finalize().to_hex())))
}

/// `/`-separated relative path, independent of the host separator
#[cfg(unix)]
fn relative_key(relative: &Path) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;

    let mut key = Vec::new();
    for (i, component) in relative.iter().enumerate() {
        if i > 0 {
            key.push(b'/');
        }
        key.extend_from_slice(component.as_bytes());
    }
    key
}

#[cfg(not(unix))]
fn relative_key(relative: &Path) -> Vec<u8> {
    relative
        .iter()
        .map(|c| c.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
        .into_bytes()
}

#[cfg(unix)]
fn permission_bits(meta: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permission_bits(meta: &Metadata) -> u32 {
    if meta.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}
