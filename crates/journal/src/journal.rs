//! Persistent per-job action store backed by a JSON file

use crate::{ActionKind, ActionRecord, Result};
use chrono::{DateTime, Utc};
use ks_core::atomic::atomic_write;
use ks_core::{Error, Fingerprint};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Last action per job, shared by every scheduler.
///
/// Reads are served from memory. Each [`record`](Self::record) rewrites the
/// whole file atomically before the new state becomes visible, so the file
/// and the in-memory map never disagree after a successful call.
pub struct ActionStore {
    path: PathBuf,
    records: RwLock<BTreeMap<String, ActionRecord>>,
    /// Serialises snapshot-and-write so concurrent writers cannot reorder files
    persist_lock: Mutex<()>,
}

impl ActionStore {
    /// Load the store at `path`, starting empty when the file is absent or blank.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records = match fs::read(&path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| Error::Malformed {
                path: path.clone(),
                source,
            })?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no action store yet, starting empty");
                BTreeMap::new()
            }
            Err(source) => return Err(Error::Io { path, source }),
        };

        tracing::debug!(path = %path.display(), jobs = records.len(), "action store loaded");
        Ok(Self {
            path,
            records: RwLock::new(records),
            persist_lock: Mutex::new(()),
        })
    }

    pub fn get(&self, job: &str) -> Option<ActionRecord> {
        self.records.read().get(job).cloned()
    }

    /// Record an action stamped with the current time
    pub fn record(
        &self,
        job: &str,
        fingerprint: Fingerprint,
        kind: ActionKind,
    ) -> Result<ActionRecord> {
        self.record_at(job, fingerprint, kind, Utc::now())
    }

    /// Record an action with an explicit timestamp.
    ///
    /// On a persist failure the previous record stays in effect.
    pub fn record_at(
        &self,
        job: &str,
        fingerprint: Fingerprint,
        kind: ActionKind,
        timestamp: DateTime<Utc>,
    ) -> Result<ActionRecord> {
        let record = ActionRecord::new(fingerprint, kind, timestamp);
        let _persist = self.persist_lock.lock();

        let mut next = self.records.read().clone();
        next.insert(job.to_string(), record.clone());
        self.persist(&next)?;

        self.records.write().insert(job.to_string(), record.clone());
        tracing::debug!(job, kind = %record.kind, "action recorded");
        Ok(record)
    }

    /// Names of every job with a record, sorted
    pub fn job_ids(&self) -> Vec<String> {
        self.records.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, records: &BTreeMap<String, ActionRecord>) -> Result<()> {
        let data = serde_json::to_vec_pretty(records).map_err(|err| Error::Persist {
            path: self.path.clone(),
            source: io::Error::other(err),
        })?;
        atomic_write(&self.path, &data).map_err(|err| match err {
            Error::Io { path, source } => Error::Persist { path, source },
            other => other,
        })
    }
}
