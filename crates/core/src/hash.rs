//! BLAKE3 digest primitives

use crate::{IoResultExt, Result};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Files at or above this size are memory-mapped instead of streamed
pub const MMAP_THRESHOLD: u64 = 4 * 1024 * 1024;

/// A BLAKE3 digest (32 bytes)
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct Digest([u8; 32]);

impl Digest {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex encoding
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl From<blake3::Hash> for Digest {
    fn from(hash: blake3::Hash) -> Self {
        Self(*hash.as_bytes())
    }
}

impl std::fmt::Debug for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Hash a file's content, streaming small files and mapping large ones
pub fn hash_file(path: &Path) -> Result<Digest> {
    let file = File::open(path).at(path)?;
    let len = file.metadata().at(path)?.len();

    if len >= MMAP_THRESHOLD {
        // SAFETY: the map is read once and dropped before returning. A concurrent
        // writer can change what we hash, which is the same race a streaming read has.
        let map = unsafe { memmap2::Mmap::map(&file) }.at(path)?;
        return Ok(blake3::hash(&map).into());
    }

    let mut reader = BufReader::new(file);
    let mut hasher = blake3::Hasher::new();
    let mut buffer = [0u8; 16 * 1024];
    loop {
        let read = reader.read(&mut buffer).at(path)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hasher.finalize().into())
}

/// Incremental hasher for combining many records into one digest
pub struct IncrementalHasher {
    inner: blake3::Hasher,
}

impl IncrementalHasher {
    pub fn new() -> Self {
        Self {
            inner: blake3::Hasher::new(),
        }
    }

    pub fn update(&mut self, data: &[u8]) -> &mut Self {
        self.inner.update(data);
        self
    }

    pub fn finalize(self) -> Digest {
        self.inner.finalize().into()
    }
}

impl Default for IncrementalHasher {
    fn default() -> Self {
        Self::new()
    }
}
