//! Shared status table read by the status display

use chrono::{DateTime, Utc};
use journal::ActionKind;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::time::Duration;

/// Where a job's scheduler currently is
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum JobPhase {
    /// Waiting for the next tick
    #[default]
    Idle,
    Deciding,
    Copying,
    Skipping,
    Stopped,
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            JobPhase::Idle => "idle",
            JobPhase::Deciding => "deciding",
            JobPhase::Copying => "copying",
            JobPhase::Skipping => "skipping",
            JobPhase::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

/// Receiver of scheduler progress.
///
/// Implementations must be cheap and non-blocking; they are called from the
/// scheduler's blocking worker between filesystem steps.
pub trait StatusSink: Send + Sync {
    /// Initial state computed at startup
    fn seed(&self, job: &str, last: Option<(DateTime<Utc>, ActionKind)>, next: DateTime<Utc>);

    /// A tick finished successfully: last = `at`, next = `at + interval`
    fn report_completed(&self, job: &str, kind: ActionKind, at: DateTime<Utc>, interval: Duration);

    fn set_phase(&self, job: &str, phase: JobPhase);
}

/// Latest known state of one job
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobStatus {
    pub last: Option<DateTime<Utc>>,
    pub last_kind: Option<ActionKind>,
    pub next: Option<DateTime<Utc>>,
    pub phase: JobPhase,
}

/// One side of the aggregate view: which job, when, and whether it skipped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    pub job: String,
    pub at: DateTime<Utc>,
    pub skipped: bool,
}

/// In-memory [`StatusSink`] shared by all schedulers
#[derive(Debug, Default)]
pub struct StatusTable {
    jobs: RwLock<BTreeMap<String, JobStatus>>,
}

impl StatusTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, job: &str) -> Option<JobStatus> {
        self.jobs.read().get(job).cloned()
    }

    pub fn entries(&self) -> Vec<(String, JobStatus)> {
        self.jobs
            .read()
            .iter()
            .map(|(name, status)| (name.clone(), status.clone()))
            .collect()
    }

    /// Most recent completed action across all jobs
    pub fn most_recent(&self) -> Option<StatusEntry> {
        self.jobs
            .read()
            .iter()
            .filter_map(|(name, status)| {
                status.last.map(|at| StatusEntry {
                    job: name.clone(),
                    at,
                    skipped: status.last_kind == Some(ActionKind::Skip),
                })
            })
            .max_by_key(|entry| entry.at)
    }

    /// Soonest upcoming run across all jobs
    pub fn soonest_next(&self) -> Option<StatusEntry> {
        self.jobs
            .read()
            .iter()
            .filter_map(|(name, status)| {
                status.next.map(|at| StatusEntry {
                    job: name.clone(),
                    at,
                    skipped: status.last_kind == Some(ActionKind::Skip),
                })
            })
            .min_by_key(|entry| entry.at)
    }

    /// `Last: 5 minutes ago (Documents) [S]`
    pub fn last_line(&self, now: DateTime<Utc>) -> String {
        let Some(entry) = self.most_recent() else {
            return "Last: Never".to_string();
        };
        let marker = if entry.skipped { " [S]" } else { "" };
        match rounded_minutes(now - entry.at) {
            0 => format!("Last: Just now ({}){}", entry.job, marker),
            minutes => format!(
                "Last: {} {} ago ({}){}",
                minutes,
                minute_word(minutes),
                entry.job,
                marker
            ),
        }
    }

    /// `Next: 12 minutes (Documents)`
    pub fn next_line(&self, now: DateTime<Utc>) -> String {
        let Some(entry) = self.soonest_next() else {
            return "Next: Unknown".to_string();
        };
        match rounded_minutes(entry.at - now) {
            minutes if minutes <= 0 => format!("Next: Due now ({})", entry.job),
            minutes => format!("Next: {} {} ({})", minutes, minute_word(minutes), entry.job),
        }
    }
}

impl StatusSink for StatusTable {
    fn seed(&self, job: &str, last: Option<(DateTime<Utc>, ActionKind)>, next: DateTime<Utc>) {
        let mut jobs = self.jobs.write();
        let status = jobs.entry(job.to_string()).or_default();
        status.last = last.map(|(at, _)| at);
        status.last_kind = last.map(|(_, kind)| kind);
        status.next = Some(next);
    }

    fn report_completed(&self, job: &str, kind: ActionKind, at: DateTime<Utc>, interval: Duration) {
        let next = chrono::Duration::from_std(interval)
            .ok()
            .and_then(|delta| at.checked_add_signed(delta));
        let mut jobs = self.jobs.write();
        let status = jobs.entry(job.to_string()).or_default();
        status.last = Some(at);
        status.last_kind = Some(kind);
        status.next = next;
    }

    fn set_phase(&self, job: &str, phase: JobPhase) {
        self.jobs.write().entry(job.to_string()).or_default().phase = phase;
    }
}

fn rounded_minutes(delta: chrono::Duration) -> i64 {
    (delta.num_seconds() as f64 / 60.0).round() as i64
}

fn minute_word(minutes: i64) -> &'static str {
    if minutes == 1 {
        "minute"
    } else {
        "minutes"
    }
}
