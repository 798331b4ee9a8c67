//! Startup recovery of each job's scheduling baseline
//!
//! On start a job needs to know when it last did useful work so it neither
//! copies immediately after a restart nor waits a full interval when a run
//! is overdue. The on-disk snapshots and the last recorded skip are
//! reconciled into one effective last-action time (ELT):
//!
//! - hash check disabled: newest snapshot time
//! - last record is a skip and the source still fingerprints the same: the
//!   skip time
//! - last record is a skip but the source changed since: unknown, run now
//! - last record is a skip but fingerprinting failed: newest snapshot time
//! - otherwise: newest snapshot time

use crate::snapshot::latest_snapshot_time;
use crate::{ActionKind, ActionStore, Job};
use chrono::{DateTime, Utc};
use ks_core::ContentHasher;
use std::time::Duration;

/// Where the effective last-action time came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryBasis {
    /// Newest snapshot directory's modification time (or none)
    SnapshotFolder,
    /// The last skip, with the source verified unchanged since
    VerifiedSkip,
    /// The source changed after the last skip
    ContentChangedSinceSkip,
    /// Verifying the last skip failed; fell back to snapshot time
    HashFailedFallback,
}

impl RecoveryBasis {
    pub fn describe(&self) -> &'static str {
        match self {
            RecoveryBasis::SnapshotFolder => "latest snapshot",
            RecoveryBasis::VerifiedSkip => "verified skip",
            RecoveryBasis::ContentChangedSinceSkip => "content changed since skip",
            RecoveryBasis::HashFailedFallback => "hash failed, latest snapshot",
        }
    }
}

/// Result of startup recovery for one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recovery {
    pub effective_last: Option<DateTime<Utc>>,
    pub basis: RecoveryBasis,
}

impl Recovery {
    pub fn initial_delay(&self, now: DateTime<Utc>, interval: Duration) -> Duration {
        initial_delay(self.effective_last, now, interval)
    }

    /// Instant of the first run
    pub fn next_due(&self, now: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
        let delay = self.initial_delay(now, interval);
        now + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero())
    }
}

/// Compute the ELT for `job`.
///
/// Never fails: an unreadable destination counts as having no snapshots and
/// a failed fingerprint falls back to snapshot time.
pub fn recover_effective_last_action(
    job: &Job,
    store: &ActionStore,
    hasher: &dyn ContentHasher,
) -> Recovery {
    let folder = job.source_folder_name();
    let from_snapshots = |basis| Recovery {
        effective_last: latest_snapshot_time(&job.destination, &folder),
        basis,
    };

    if !job.hash_check_enabled() {
        return from_snapshots(RecoveryBasis::SnapshotFolder);
    }

    let Some(record) = store.get(&job.name) else {
        return from_snapshots(RecoveryBasis::SnapshotFolder);
    };
    let skipped_at = match (record.kind, record.action_time()) {
        (ActionKind::Skip, Some(at)) => at,
        _ => return from_snapshots(RecoveryBasis::SnapshotFolder),
    };

    match hasher.fingerprint(&job.source) {
        Ok(current) if current == record.fingerprint => Recovery {
            effective_last: Some(skipped_at),
            basis: RecoveryBasis::VerifiedSkip,
        },
        Ok(_) => Recovery {
            effective_last: None,
            basis: RecoveryBasis::ContentChangedSinceSkip,
        },
        Err(err) => {
            tracing::warn!(job = %job.name, error = %err, "could not verify last skip");
            from_snapshots(RecoveryBasis::HashFailedFallback)
        }
    }
}

/// Time to wait before the first run: `interval - (now - last)`, floored at 0.
///
/// Unknown `last` means run immediately. A `last` in the future (the clock
/// moved backwards) waits at most one interval.
pub fn initial_delay(
    effective_last: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    interval: Duration,
) -> Duration {
    let Some(last) = effective_last else {
        return Duration::ZERO;
    };
    let elapsed = (now - last).to_std().unwrap_or(Duration::ZERO);
    interval.saturating_sub(elapsed)
}
