//! Lock file that keeps a single keepsake instance per state directory

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Exclusive instance lock, released and removed on drop
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
    #[allow(dead_code)]
    file: File,
}

/// Lock file content
#[derive(Debug, Serialize, Deserialize)]
pub struct LockContent {
    pub pid: u32,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl InstanceLock {
    /// Acquire the lock at `lock_path`.
    ///
    /// Fails when another live process holds it. A lock left by a dead
    /// process is reclaimed.
    pub fn acquire(lock_path: &Path) -> Result<Self> {
        Self::acquire_inner(lock_path, true)
    }

    fn acquire_inner(lock_path: &Path, reclaim_stale: bool) -> Result<Self> {
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create state directory")?;
        }

        let mut file = match open_lock_file(lock_path)? {
            Some(file) => file,
            None if reclaim_stale && is_reclaimable(lock_path) => {
                tracing::warn!("Removing stale lock {}", lock_path.display());
                std::fs::remove_file(lock_path).context("Failed to remove stale lock")?;
                return Self::acquire_inner(lock_path, false);
            }
            None => match Self::holder(lock_path) {
                Some(h) => anyhow::bail!(
                    "Another keepsake instance is running (pid {}, since {})",
                    h.pid,
                    crate::util::format_local(h.started_at)
                ),
                None => anyhow::bail!(
                    "Another keepsake instance holds {}",
                    lock_path.display()
                ),
            },
        };

        write_lock_content(&mut file)?;
        tracing::debug!("Acquired lock {}", lock_path.display());
        Ok(Self {
            path: lock_path.to_path_buf(),
            file,
        })
    }

    /// Current holder, if the lock file exists and is readable
    pub fn holder(lock_path: &Path) -> Option<LockContent> {
        let mut contents = String::new();
        File::open(lock_path).ok()?.read_to_string(&mut contents).ok()?;
        serde_json::from_str(&contents).ok()
    }

    /// Holder of the lock, if that process is still alive
    pub fn live_holder(lock_path: &Path) -> Option<LockContent> {
        Self::holder(lock_path).filter(|h| is_process_alive(h.pid))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn write_lock_content(file: &mut File) -> Result<()> {
    let content = LockContent {
        pid: std::process::id(),
        started_at: chrono::Utc::now(),
    };
    let serialized = serde_json::to_string(&content).context("Failed to serialize lock content")?;

    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(serialized.as_bytes())?;
    file.sync_all()?;
    Ok(())
}

/// Open and lock the file; `None` when someone else holds it
#[cfg(unix)]
fn open_lock_file(lock_path: &Path) -> Result<Option<File>> {
    use nix::fcntl::{flock, FlockArg};
    use std::os::unix::io::AsRawFd;

    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(lock_path)
        .context("Failed to open lock file")?;

    #[allow(deprecated)]
    match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
        Ok(()) => Ok(Some(file)),
        Err(nix::errno::Errno::EWOULDBLOCK) => Ok(None),
        Err(e) => Err(e).context("Failed to lock instance file"),
    }
}

#[cfg(not(unix))]
fn open_lock_file(lock_path: &Path) -> Result<Option<File>> {
    match OpenOptions::new()
        .create_new(true)
        .read(true)
        .write(true)
        .open(lock_path)
    {
        Ok(file) => Ok(Some(file)),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
        Err(e) => Err(e).context("Failed to open lock file"),
    }
}

/// A refused flock always has a live holder: the kernel drops a dead process's lock
#[cfg(unix)]
fn is_reclaimable(_lock_path: &Path) -> bool {
    false
}

/// Left behind by a process that is gone, or never written
#[cfg(not(unix))]
fn is_reclaimable(lock_path: &Path) -> bool {
    InstanceLock::holder(lock_path).map_or(true, |h| !is_process_alive(h.pid))
}

#[cfg(target_os = "linux")]
fn is_process_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{}", pid)).exists()
}

#[cfg(all(unix, not(target_os = "linux")))]
fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), None) {
        Ok(_) => true,
        Err(nix::errno::Errno::ESRCH) => false,
        // Permission denied: exists but not ours
        Err(_) => true,
    }
}

#[cfg(not(unix))]
fn is_process_alive(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lock_records_pid_and_removes_on_drop() -> Result<()> {
        let temp = TempDir::new()?;
        let path = temp.path().join("state/keepsake.lock");

        let lock = InstanceLock::acquire(&path)?;
        let holder = InstanceLock::holder(&path).unwrap();
        assert_eq!(holder.pid, std::process::id());
        assert_eq!(lock.path(), path.as_path());

        drop(lock);
        assert!(!path.exists());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_second_acquire_is_refused_while_held() -> Result<()> {
        let temp = TempDir::new()?;
        let path = temp.path().join("keepsake.lock");

        let _held = InstanceLock::acquire(&path)?;
        let err = InstanceLock::acquire(&path).unwrap_err();
        assert!(err.to_string().contains("Another keepsake instance"));
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_blank_lock_file_under_flock_is_not_taken() -> Result<()> {
        use nix::fcntl::{flock, FlockArg};
        use std::os::unix::io::AsRawFd;

        let temp = TempDir::new()?;
        let path = temp.path().join("keepsake.lock");
        // Another process between its flock and writing its pid
        let other = File::create(&path)?;
        #[allow(deprecated)]
        flock(other.as_raw_fd(), FlockArg::LockExclusiveNonblock)?;

        let err = InstanceLock::acquire(&path).unwrap_err();
        assert!(err.to_string().contains("Another keepsake instance"));
        assert!(path.exists());
        assert_eq!(std::fs::read_to_string(&path)?, "");
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_stale_lock_file_is_reclaimed() -> Result<()> {
        let temp = TempDir::new()?;
        let path = temp.path().join("keepsake.lock");
        // Left behind by a crashed run and not locked by anyone
        std::fs::write(&path, r#"{"pid":4294967,"started_at":"2024-01-01T00:00:00Z"}"#)?;

        let lock = InstanceLock::acquire(&path)?;
        assert_eq!(InstanceLock::holder(&path).unwrap().pid, std::process::id());
        drop(lock);
        Ok(())
    }
}
