//! Per-job backup scheduling
//!
//! Each configured job gets a [`JobScheduler`] running as its own task. On
//! every tick it fingerprints the source, compares against the last recorded
//! action and either records a skip or copies a new snapshot and prunes old
//! ones. Progress is published through a [`StatusSink`].

pub mod scheduler;
pub mod status;

pub use scheduler::{CopyReason, Decision, JobScheduler, TickOutcome};
pub use status::{JobPhase, JobStatus, StatusEntry, StatusSink, StatusTable};
