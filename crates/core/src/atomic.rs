//! Crash-safe file replacement

use crate::{IoResultExt, Result};
use std::fs;
use std::io::Write;
use std::path::Path;

/// Replace `target` with `data` so readers only ever see the old or the new content.
///
/// Writes a temp file next to the target, fsyncs it, renames it into place
/// and fsyncs the parent directory. A crash at any point leaves the previous
/// file intact.
pub fn atomic_write(target: &Path, data: &[u8]) -> Result<()> {
    let parent = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).at(parent)?;

    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = parent.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

    let result = write_and_rename(&temp_path, target, data);
    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result?;

    // Directory fsync is best-effort; not every platform supports it
    if let Ok(dir) = fs::File::open(parent) {
        let _ = dir.sync_all();
    }
    Ok(())
}

fn write_and_rename(temp_path: &Path, target: &Path, data: &[u8]) -> Result<()> {
    let mut temp_file = fs::File::create(temp_path).at(temp_path)?;
    temp_file.write_all(data).at(temp_path)?;
    temp_file.sync_all().at(temp_path)?;
    drop(temp_file);

    fs::rename(temp_path, target).at(target)
}
