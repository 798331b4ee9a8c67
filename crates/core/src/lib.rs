//! keepsake core - filesystem primitives for the snapshot engine
//!
//! This crate provides the leaf operations the scheduler is built from:
//! - BLAKE3 digest helpers
//! - Directory tree fingerprinting (content, names, permissions)
//! - Full-tree copying into a new snapshot directory
//! - Crash-safe file replacement
//! - The error taxonomy shared by every layer above

pub mod atomic;
pub mod copy;
pub mod error;
pub mod fingerprint;
pub mod hash;

// Re-export main types for convenience
pub use copy::{copy_tree, CopyStats};
pub use error::{Error, IoResultExt};
pub use fingerprint::{fingerprint, ContentHasher, DirHasher, Fingerprint};
pub use hash::{Digest, IncrementalHasher};

/// Common result type used throughout keepsake
pub type Result<T> = std::result::Result<T, Error>;
