//! The last recorded decision for a job

use chrono::{DateTime, Utc};
use ks_core::Fingerprint;
use serde::{Deserialize, Serialize};

/// What a completed run did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    /// A new snapshot was written
    #[serde(alias = "backup")]
    Copy,
    /// Content matched the previous run, nothing was written
    #[serde(alias = "skipped")]
    Skip,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Copy => "copy",
            ActionKind::Skip => "skip",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted per-job state: fingerprint seen, action taken, and when.
///
/// Field aliases accept files written by older tooling
/// (`lastHash`, `lastActionType`, `lastActionTime`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    #[serde(alias = "lastHash")]
    pub fingerprint: Fingerprint,
    #[serde(alias = "lastActionType")]
    pub kind: ActionKind,
    #[serde(alias = "lastActionTime")]
    pub timestamp: DateTime<Utc>,
}

impl ActionRecord {
    pub fn new(fingerprint: Fingerprint, kind: ActionKind, timestamp: DateTime<Utc>) -> Self {
        Self {
            fingerprint,
            kind,
            timestamp,
        }
    }

    /// The action time, or `None` when the stored value is a zero placeholder.
    ///
    /// Older files carry `0001-01-01T00:00:00Z` for "never".
    pub fn action_time(&self) -> Option<DateTime<Utc>> {
        (self.timestamp > DateTime::UNIX_EPOCH).then_some(self.timestamp)
    }
}
