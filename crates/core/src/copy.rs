//! Full-tree copy that materialises a snapshot
//!
//! The first unrecoverable error aborts the copy. Whatever was already written
//! under the destination stays on disk; the caller decides what a failed
//! snapshot means.

use crate::error;
use crate::{IoResultExt, Result};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// What a completed copy wrote
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyStats {
    pub files: u64,
    pub directories: u64,
    pub symlinks: u64,
    pub bytes: u64,
}

/// Recursively copy `source` into `destination`, mirroring structure and permissions.
///
/// `destination` itself is created if missing. Files are streamed, never
/// buffered whole.
pub fn copy_tree(source: &Path, destination: &Path) -> Result<CopyStats> {
    let mut stats = CopyStats::default();
    // Directory modes are applied last, deepest first, so a read-only source
    // directory does not stop us writing its children.
    let mut directory_modes: Vec<(PathBuf, fs::Permissions)> = Vec::new();

    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry.map_err(|e| error::from_walk(e, source))?;
        let relative = entry.path().strip_prefix(source).unwrap_or(entry.path());
        let target = destination.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target).at(&target)?;
            let meta = entry.metadata().map_err(|e| error::from_walk(e, source))?;
            directory_modes.push((target, meta.permissions()));
            stats.directories += 1;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target, &mut stats)?;
        } else {
            stats.bytes += copy_file(entry.path(), &target)?;
            stats.files += 1;
        }
    }

    for (dir, permissions) in directory_modes.into_iter().rev() {
        fs::set_permissions(&dir, permissions).at(&dir)?;
    }

    tracing::debug!(
        source = %source.display(),
        destination = %destination.display(),
        files = stats.files,
        bytes = stats.bytes,
        "tree copied"
    );
    Ok(stats)
}

/// Stream one file and give it the source's permission bits
fn copy_file(source: &Path, target: &Path) -> Result<u64> {
    let mut reader = File::open(source).at(source)?;
    let mut writer = File::create(target).at(target)?;
    let written = io::copy(&mut reader, &mut writer).at(target)?;
    writer.sync_all().at(target)?;
    drop(writer);

    let permissions = reader.metadata().at(source)?.permissions();
    fs::set_permissions(target, permissions).at(target)?;
    Ok(written)
}

#[cfg(unix)]
fn copy_symlink(source: &Path, target: &Path, stats: &mut CopyStats) -> Result<()> {
    let link = fs::read_link(source).at(source)?;
    std::os::unix::fs::symlink(&link, target).at(target)?;
    stats.symlinks += 1;
    Ok(())
}

#[cfg(not(unix))]
fn copy_symlink(source: &Path, target: &Path, stats: &mut CopyStats) -> Result<()> {
    // No portable symlink creation: copy what the link points at.
    stats.bytes += copy_file(source, target)?;
    stats.files += 1;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::fingerprint;
    use tempfile::TempDir;

    fn populate(root: &Path) {
        fs::create_dir_all(root.join("docs/drafts")).unwrap();
        fs::create_dir_all(root.join("empty")).unwrap();
        fs::write(root.join("readme.md"), b"# hello").unwrap();
        fs::write(root.join("docs/a.txt"), b"aaaa").unwrap();
        fs::write(root.join("docs/drafts/b.txt"), vec![7u8; 64 * 1024]).unwrap();
    }

    #[test]
    fn test_copy_mirrors_tree() -> Result<()> {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        populate(src.path());
        let target = dst.path().join("snap");

        let stats = copy_tree(src.path(), &target)?;

        assert_eq!(stats.files, 3);
        // root, docs, docs/drafts, empty
        assert_eq!(stats.directories, 4);
        assert_eq!(stats.bytes, 7 + 4 + 64 * 1024);
        assert!(target.join("empty").is_dir());
        assert_eq!(fs::read(target.join("docs/a.txt")).unwrap(), b"aaaa");
        assert_eq!(fingerprint(src.path())?, fingerprint(&target)?);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_preserves_permissions_and_symlinks() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        populate(src.path());
        let script = src.path().join("run.sh");
        fs::write(&script, b"#!/bin/sh\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o750)).unwrap();
        std::os::unix::fs::symlink("readme.md", src.path().join("link")).unwrap();

        let target = dst.path().join("snap");
        let stats = copy_tree(src.path(), &target)?;

        assert_eq!(stats.symlinks, 1);
        let mode = fs::metadata(target.join("run.sh")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o750);
        assert_eq!(
            fs::read_link(target.join("link")).unwrap(),
            PathBuf::from("readme.md")
        );
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_of_read_only_directory_succeeds() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let locked = src.path().join("locked");
        fs::create_dir(&locked).unwrap();
        fs::write(locked.join("inner.txt"), b"inner").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o555)).unwrap();

        let target = dst.path().join("snap");
        let result = copy_tree(src.path(), &target);

        // Restore write access so TempDir can clean up
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        let copied_locked = target.join("locked");
        let copied_mode = fs::metadata(&copied_locked).unwrap().permissions().mode();
        fs::set_permissions(&copied_locked, fs::Permissions::from_mode(0o755)).unwrap();

        result?;
        assert_eq!(copied_mode & 0o777, 0o555);
        assert_eq!(fs::read(copied_locked.join("inner.txt")).unwrap(), b"inner");
        Ok(())
    }

    #[test]
    fn test_missing_source_aborts() {
        let dst = TempDir::new().unwrap();
        let missing = dst.path().join("nope");
        let err = copy_tree(&missing, &dst.path().join("snap")).unwrap_err();
        assert!(!err.is_hash_failure());
    }
}
