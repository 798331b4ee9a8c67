//! Snapshot naming and discovery
//!
//! The destination directory is the only record of which snapshots exist.
//! Nothing here caches a listing: every call rescans, so snapshots deleted or
//! added by hand are picked up on the next decision.
//!
//! A snapshot of source folder `Documents` taken at 14:05:09 on 3 March 2025
//! is named `03-03-2025_14-05-09_Documents`. Ordering and retention use the
//! directory's modification time, not the embedded timestamp.

use crate::Result;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use ks_core::{Error, IoResultExt};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// `strftime` pattern for the timestamp prefix
pub const SNAPSHOT_TIME_FORMAT: &str = "%d-%m-%Y_%H-%M-%S";

/// Width of a rendered [`SNAPSHOT_TIME_FORMAT`] timestamp
pub const SNAPSHOT_TIME_LEN: usize = 19;

/// A snapshot directory found under a destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub path: PathBuf,
    pub name: String,
    pub modified: DateTime<Utc>,
}

/// Directory name for a snapshot of `source_folder` taken at `at`
pub fn snapshot_name(source_folder: &str, at: DateTime<Local>) -> String {
    format!("{}_{}", at.format(SNAPSHOT_TIME_FORMAT), source_folder)
}

/// Timestamp part of `name`, when it names a snapshot of `source_folder`
fn timestamp_prefix<'a>(name: &'a str, source_folder: &str) -> Option<&'a str> {
    let prefix = name.strip_suffix(source_folder)?.strip_suffix('_')?;
    (prefix.len() >= SNAPSHOT_TIME_LEN).then_some(prefix)
}

/// Whether `name` qualifies as a snapshot of `source_folder`.
///
/// Short coincidental matches such as `old_Documents` are rejected.
pub fn is_snapshot_name(name: &str, source_folder: &str) -> bool {
    timestamp_prefix(name, source_folder).is_some()
}

/// Creation time embedded in a snapshot name, interpreted as local time
pub fn parse_snapshot_time(name: &str, source_folder: &str) -> Option<DateTime<Local>> {
    let prefix = timestamp_prefix(name, source_folder)?;
    let naive = NaiveDateTime::parse_from_str(prefix, SNAPSHOT_TIME_FORMAT).ok()?;
    Local.from_local_datetime(&naive).earliest()
}

/// Every qualifying snapshot of `source_folder` under `destination`, unordered.
///
/// A missing destination yields an empty list. Entries whose metadata cannot
/// be read are skipped.
pub fn list_snapshots(destination: &Path, source_folder: &str) -> Result<Vec<Snapshot>> {
    let entries = match fs::read_dir(destination) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(Error::Io {
                path: destination.to_path_buf(),
                source,
            })
        }
    };

    let mut snapshots = Vec::new();
    for entry in entries {
        let entry = entry.at(destination)?;
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if !is_snapshot_name(&name, source_folder) {
            continue;
        }

        match entry.metadata() {
            Ok(meta) if meta.is_dir() => match meta.modified() {
                Ok(modified) => snapshots.push(Snapshot {
                    path: entry.path(),
                    name,
                    modified: modified.into(),
                }),
                Err(err) => tracing::debug!(name = %name, error = %err, "no modification time, skipping"),
            },
            Ok(_) => {}
            Err(err) => tracing::debug!(name = %name, error = %err, "cannot stat entry, skipping"),
        }
    }
    Ok(snapshots)
}

/// Modification time of the newest snapshot, or `None` when there is none
pub fn latest_snapshot_time(destination: &Path, source_folder: &str) -> Option<DateTime<Utc>> {
    match list_snapshots(destination, source_folder) {
        Ok(snapshots) => snapshots.into_iter().map(|s| s.modified).max(),
        Err(err) => {
            tracing::debug!(
                destination = %destination.display(),
                error = %err,
                "destination unreadable, treating as no snapshots"
            );
            None
        }
    }
}
