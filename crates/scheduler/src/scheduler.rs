//! Job scheduler: decide, copy or skip, prune, record

use crate::status::{JobPhase, StatusSink};
use chrono::{DateTime, Local, Utc};
use journal::{
    recover_effective_last_action, snapshot_name, ActionKind, ActionStore, Job, Pruner,
    Recovery, RecoveryBasis, RetentionManager,
};
use ks_core::{copy_tree, ContentHasher, CopyStats, Fingerprint, IoResultExt, Result};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::Instrument;

/// Why a tick decided to copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyReason {
    HashCheckDisabled,
    NoPriorRecord,
    ContentChanged,
    /// Fingerprinting failed; copying is the safe choice
    HashFailed,
}

impl CopyReason {
    pub fn describe(&self) -> &'static str {
        match self {
            CopyReason::HashCheckDisabled => "hash check disabled",
            CopyReason::NoPriorRecord => "no previous action",
            CopyReason::ContentChanged => "content changed",
            CopyReason::HashFailed => "fingerprint failed",
        }
    }
}

/// Outcome of the deciding step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Skip {
        fingerprint: Fingerprint,
    },
    Copy {
        /// Fingerprint taken before copying, when one was computed
        fingerprint: Option<Fingerprint>,
        reason: CopyReason,
    },
}

/// What one tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Skipped {
        fingerprint: Fingerprint,
    },
    Copied {
        snapshot: PathBuf,
        stats: CopyStats,
        pruned: usize,
    },
    /// Shutdown was requested between steps
    Cancelled,
}

/// Drives one job: startup recovery, then a tick per interval until shutdown.
pub struct JobScheduler {
    job: Job,
    store: Arc<ActionStore>,
    status: Arc<dyn StatusSink>,
    hasher: Arc<dyn ContentHasher>,
    retention: Arc<dyn Pruner>,
}

impl JobScheduler {
    pub fn new(
        job: Job,
        store: Arc<ActionStore>,
        status: Arc<dyn StatusSink>,
        hasher: Arc<dyn ContentHasher>,
    ) -> Self {
        let retention: Arc<dyn Pruner> = Arc::new(RetentionManager::for_job(&job));
        Self {
            job,
            store,
            status,
            hasher,
            retention,
        }
    }

    /// Replace the retention step, which defaults to the job's [`RetentionManager`]
    pub fn with_pruner(mut self, pruner: Arc<dyn Pruner>) -> Self {
        self.retention = pruner;
        self
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    /// Effective last-action time from snapshots and the action store
    pub fn recover(&self) -> Recovery {
        recover_effective_last_action(&self.job, &self.store, self.hasher.as_ref())
    }

    /// Publish the recovered state and return the delay before the first tick.
    pub fn seed_status(&self, recovery: &Recovery, now: DateTime<Utc>) -> Duration {
        let delay = recovery.initial_delay(now, self.job.interval);
        // Every other basis is a snapshot folder's time
        let kind = match recovery.basis {
            RecoveryBasis::VerifiedSkip => ActionKind::Skip,
            _ => ActionKind::Copy,
        };
        let last = recovery.effective_last.map(|at| (at, kind));
        self.status
            .seed(&self.job.name, last, recovery.next_due(now, self.job.interval));
        self.status.set_phase(&self.job.name, JobPhase::Idle);
        delay
    }

    /// Compare the source's current fingerprint with the last recorded one.
    ///
    /// A fingerprint failure never suppresses a copy.
    pub fn decide(&self) -> Decision {
        if !self.job.hash_check_enabled() {
            return Decision::Copy {
                fingerprint: None,
                reason: CopyReason::HashCheckDisabled,
            };
        }

        let current = match self.hasher.fingerprint(&self.job.source) {
            Ok(fingerprint) => fingerprint,
            Err(err) => {
                tracing::warn!(error = %err, "fingerprint failed, copying anyway");
                return Decision::Copy {
                    fingerprint: None,
                    reason: CopyReason::HashFailed,
                };
            }
        };

        match self.store.get(&self.job.name) {
            Some(record) if record.fingerprint == current => Decision::Skip {
                fingerprint: current,
            },
            Some(_) => Decision::Copy {
                fingerprint: Some(current),
                reason: CopyReason::ContentChanged,
            },
            None => Decision::Copy {
                fingerprint: Some(current),
                reason: CopyReason::NoPriorRecord,
            },
        }
    }

    /// Run one decide/act cycle synchronously.
    ///
    /// `cancel` is checked before hashing, before copying and before pruning.
    /// A copy or prune failure is returned and leaves the action store and
    /// status untouched; a failure to persist the action record is only
    /// logged, since the snapshot it describes already exists.
    pub fn tick(&self, cancel: &watch::Receiver<bool>) -> Result<TickOutcome> {
        let name = self.job.name.as_str();
        if is_cancelled(cancel) {
            return Ok(TickOutcome::Cancelled);
        }

        self.status.set_phase(name, JobPhase::Deciding);
        let decision = self.decide();
        if is_cancelled(cancel) {
            return Ok(TickOutcome::Cancelled);
        }

        match decision {
            Decision::Skip { fingerprint } => {
                self.status.set_phase(name, JobPhase::Skipping);
                let now = Utc::now();
                self.persist_action(&fingerprint, ActionKind::Skip, now);
                self.status
                    .report_completed(name, ActionKind::Skip, now, self.job.interval);
                Ok(TickOutcome::Skipped { fingerprint })
            }
            Decision::Copy {
                fingerprint,
                reason,
            } => {
                self.status.set_phase(name, JobPhase::Copying);
                tracing::debug!(reason = reason.describe(), "copying");
                self.copy(fingerprint, cancel)
            }
        }
    }

    fn copy(
        &self,
        fingerprint: Option<Fingerprint>,
        cancel: &watch::Receiver<bool>,
    ) -> Result<TickOutcome> {
        let folder = self.job.source_folder_name();
        let destination = &self.job.destination;
        let snapshot = destination.join(snapshot_name(&folder, Local::now()));

        fs::create_dir_all(destination).at(destination)?;
        let stats = copy_tree(&self.job.source, &snapshot)?;
        if is_cancelled(cancel) {
            tracing::info!(snapshot = %snapshot.display(), "shutdown requested, skipping prune");
            return Ok(TickOutcome::Cancelled);
        }

        let report = self.retention.prune(destination, &folder)?;

        let now = Utc::now();
        self.status
            .report_completed(&self.job.name, ActionKind::Copy, now, self.job.interval);

        if self.job.hash_check_enabled() {
            let fingerprint = fingerprint.or_else(|| self.recompute_fingerprint());
            match fingerprint {
                Some(fingerprint) => self.persist_action(&fingerprint, ActionKind::Copy, now),
                None => tracing::warn!("no fingerprint available, copy not recorded"),
            }
        }

        Ok(TickOutcome::Copied {
            snapshot,
            stats,
            pruned: report.deleted.len(),
        })
    }

    fn recompute_fingerprint(&self) -> Option<Fingerprint> {
        match self.hasher.fingerprint(&self.job.source) {
            Ok(fingerprint) => Some(fingerprint),
            Err(err) => {
                tracing::warn!(error = %err, "fingerprint failed again after copy");
                None
            }
        }
    }

    fn persist_action(&self, fingerprint: &Fingerprint, kind: ActionKind, at: DateTime<Utc>) {
        if let Err(err) = self
            .store
            .record_at(&self.job.name, fingerprint.clone(), kind, at)
        {
            tracing::error!(error = %err, kind = %kind, "failed to persist action record");
        }
    }

    /// Run until `shutdown` turns true or its sender is dropped.
    ///
    /// The first tick fires after the recovered initial delay; later ticks
    /// follow at fixed intervals from that first deadline.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let span = tracing::info_span!("job", name = %self.job.name);
        async move {
            let recovery = {
                let this = Arc::clone(&self);
                tokio::task::spawn_blocking(move || this.recover()).await
            };
            let recovery = match recovery {
                Ok(recovery) => recovery,
                Err(err) => {
                    tracing::error!(error = %err, "startup recovery panicked");
                    self.status.set_phase(&self.job.name, JobPhase::Stopped);
                    return;
                }
            };

            let delay = self.seed_status(&recovery, Utc::now());
            tracing::info!(
                basis = recovery.basis.describe(),
                delay_secs = delay.as_secs(),
                interval_secs = self.job.interval.as_secs(),
                "scheduler started"
            );

            let mut ticker = tokio::time::interval_at(Instant::now() + delay, self.job.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = wait_for_shutdown(&mut shutdown) => break,
                    _ = ticker.tick() => {}
                }

                let this = Arc::clone(&self);
                let cancel = shutdown.clone();
                let span = tracing::Span::current();
                let outcome =
                    tokio::task::spawn_blocking(move || span.in_scope(|| this.tick(&cancel))).await;

                match outcome {
                    Ok(Ok(TickOutcome::Skipped { .. })) => {
                        tracing::info!("content unchanged, skipped");
                    }
                    Ok(Ok(TickOutcome::Copied {
                        snapshot,
                        stats,
                        pruned,
                    })) => {
                        tracing::info!(
                            snapshot = %snapshot.display(),
                            files = stats.files,
                            bytes = stats.bytes,
                            pruned,
                            "snapshot created"
                        );
                    }
                    Ok(Ok(TickOutcome::Cancelled)) => break,
                    Ok(Err(err)) => {
                        tracing::error!(error = %err, "backup failed, retrying next interval");
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "backup task panicked");
                    }
                }
                self.status.set_phase(&self.job.name, JobPhase::Idle);
            }

            self.status.set_phase(&self.job.name, JobPhase::Stopped);
            tracing::info!("scheduler stopped");
        }
        .instrument(span)
        .await
    }
}

fn is_cancelled(cancel: &watch::Receiver<bool>) -> bool {
    *cancel.borrow()
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    // A dropped sender also means stop
    let _ = shutdown.wait_for(|stop| *stop).await;
}
