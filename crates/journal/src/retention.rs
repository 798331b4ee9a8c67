//! Count-based snapshot retention

use crate::snapshot::{list_snapshots, Snapshot};
use crate::{Job, Result};
use ks_core::{Error, IoResultExt};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;
use walkdir::WalkDir;

/// Retention policy configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Number of snapshots to keep (at least 1)
    pub retain_count: usize,
}

impl RetentionPolicy {
    pub fn new(retain_count: usize) -> Self {
        Self {
            retain_count: retain_count.max(1),
        }
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self { retain_count: 5 }
    }
}

/// Outcome of one retention pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionReport {
    /// Qualifying snapshots found before pruning
    pub examined: usize,
    /// Snapshot directories removed, oldest first
    pub deleted: Vec<PathBuf>,
    pub duration_ms: u64,
}

impl RetentionReport {
    pub fn retained(&self) -> usize {
        self.examined - self.deleted.len()
    }

    pub fn log_summary(&self, destination: &Path) {
        if self.deleted.is_empty() {
            tracing::debug!(
                destination = %destination.display(),
                examined = self.examined,
                "retention: nothing to prune"
            );
        } else {
            tracing::info!(
                destination = %destination.display(),
                deleted = self.deleted.len(),
                retained = self.retained(),
                duration_ms = self.duration_ms,
                "retention: pruned old snapshots"
            );
        }
    }
}

/// Deletes the oldest snapshots beyond the policy's count
pub struct RetentionManager {
    policy: RetentionPolicy,
}

impl RetentionManager {
    pub fn new(policy: RetentionPolicy) -> Self {
        Self { policy }
    }

    pub fn for_job(job: &Job) -> Self {
        Self::new(RetentionPolicy::new(job.retention))
    }

    /// Snapshots that would be deleted, oldest first.
    ///
    /// Ordered by modification time, ties by name, so the result never
    /// contains a snapshot newer than one it leaves behind.
    pub fn plan(&self, mut snapshots: Vec<Snapshot>) -> Vec<Snapshot> {
        if snapshots.len() <= self.policy.retain_count {
            return Vec::new();
        }
        snapshots.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.name.cmp(&b.name)));
        let excess = snapshots.len() - self.policy.retain_count;
        snapshots.truncate(excess);
        snapshots
    }

    /// Prune snapshots of `source_folder` under `destination`.
    ///
    /// Stops at the first failed deletion and returns that error; snapshots
    /// already removed stay removed.
    pub fn enforce(&self, destination: &Path, source_folder: &str) -> Result<RetentionReport> {
        let start = Instant::now();
        let snapshots = list_snapshots(destination, source_folder)?;
        let mut report = RetentionReport {
            examined: snapshots.len(),
            ..Default::default()
        };

        for snapshot in self.plan(snapshots) {
            remove_snapshot(&snapshot.path)?;
            tracing::info!(snapshot = %snapshot.name, "snapshot pruned");
            report.deleted.push(snapshot.path);
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        report.log_summary(destination);
        Ok(report)
    }

    /// Prune using the job's destination, source folder name and retention count
    pub fn enforce_job(job: &Job) -> Result<RetentionReport> {
        Self::for_job(job).enforce(&job.destination, &job.source_folder_name())
    }
}

/// Applies retention after a copy
pub trait Pruner: Send + Sync {
    fn prune(&self, destination: &Path, source_folder: &str) -> Result<RetentionReport>;
}

impl Pruner for RetentionManager {
    fn prune(&self, destination: &Path, source_folder: &str) -> Result<RetentionReport> {
        self.enforce(destination, source_folder)
    }
}

/// Delete a snapshot tree, including directories copied read-only from the source
fn remove_snapshot(path: &Path) -> Result<()> {
    make_removable(path)?;
    fs::remove_dir_all(path).at(path)
}

/// Give the owner full access to every directory so its entries can be unlinked.
///
/// Walkdir yields a directory before reading it, so a directory is fixed up
/// before we descend into it.
#[cfg(unix)]
fn make_removable(root: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|err| walk_error(err, root))?;
        if !entry.file_type().is_dir() {
            continue;
        }
        let mode = entry
            .metadata()
            .map_err(|err| walk_error(err, root))?
            .permissions()
            .mode();
        if mode & 0o700 != 0o700 {
            fs::set_permissions(entry.path(), fs::Permissions::from_mode(mode | 0o700))
                .at(entry.path())?;
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn make_removable(root: &Path) -> Result<()> {
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|err| walk_error(err, root))?;
        let mut permissions = entry
            .metadata()
            .map_err(|err| walk_error(err, root))?
            .permissions();
        if permissions.readonly() {
            permissions.set_readonly(false);
            fs::set_permissions(entry.path(), permissions).at(entry.path())?;
        }
    }
    Ok(())
}

fn walk_error(err: walkdir::Error, root: &Path) -> Error {
    let path = err.path().unwrap_or(root).to_path_buf();
    Error::Io {
        path,
        source: io::Error::from(err),
    }
}
