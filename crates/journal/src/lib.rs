//! Action history and snapshot bookkeeping
//!
//! This crate provides:
//! - Backup job definitions
//! - The persistent per-job action store
//! - Snapshot naming and discovery in a destination folder
//! - Count-based retention
//! - Startup recovery of each job's effective last action time

pub mod action;
pub mod job;
pub mod journal;
pub mod recovery;
pub mod retention;
pub mod snapshot;

// Re-exports
pub use action::{ActionKind, ActionRecord};
pub use job::{Job, Toggle};
pub use journal::ActionStore;
pub use recovery::{initial_delay, recover_effective_last_action, Recovery, RecoveryBasis};
pub use retention::{Pruner, RetentionManager, RetentionPolicy, RetentionReport};
pub use snapshot::{latest_snapshot_time, list_snapshots, snapshot_name, Snapshot};

/// Result type for journal operations
pub type Result<T> = ks_core::Result<T>;
