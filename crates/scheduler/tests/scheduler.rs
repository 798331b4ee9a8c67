//! End-to-end tests for the job scheduler against real temp directories

use chrono::Utc;
use journal::{ActionKind, ActionStore, Job, Pruner, RecoveryBasis, RetentionReport, Toggle};
use ks_core::{ContentHasher, DirHasher, Error, Fingerprint};
use scheduler::{CopyReason, Decision, JobPhase, JobScheduler, StatusTable, TickOutcome};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use tokio::sync::watch;

const INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Fails the first `failures` calls, then hashes for real
struct FlakyHasher {
    failures: usize,
    calls: AtomicUsize,
}

impl FlakyHasher {
    fn failing(failures: usize) -> Self {
        Self {
            failures,
            calls: AtomicUsize::new(0),
        }
    }
}

impl ContentHasher for FlakyHasher {
    fn fingerprint(&self, root: &Path) -> ks_core::Result<Fingerprint> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
            return Err(Error::Hash {
                path: root.to_path_buf(),
                source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
            });
        }
        DirHasher.fingerprint(root)
    }
}

/// Retention that always fails, as when a snapshot cannot be removed
struct FailingPruner;

impl Pruner for FailingPruner {
    fn prune(&self, destination: &Path, _source_folder: &str) -> ks_core::Result<RetentionReport> {
        Err(Error::Io {
            path: destination.to_path_buf(),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        })
    }
}

struct Harness {
    temp: TempDir,
    store: Arc<ActionStore>,
    status: Arc<StatusTable>,
}

impl Harness {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("data");
        fs::create_dir_all(source.join("nested")).unwrap();
        fs::write(source.join("notes.txt"), b"first draft").unwrap();
        fs::write(source.join("nested/figure.bin"), vec![3u8; 2048]).unwrap();

        let store = Arc::new(ActionStore::open(temp.path().join("state/actions.json")).unwrap());
        Self {
            temp,
            store,
            status: Arc::new(StatusTable::new()),
        }
    }

    fn source(&self) -> PathBuf {
        self.temp.path().join("data")
    }

    fn destination(&self) -> PathBuf {
        self.temp.path().join("backups")
    }

    fn job(&self, retention: usize) -> Job {
        Job::new("Data", self.source(), self.destination(), INTERVAL, retention)
    }

    fn scheduler(&self, job: Job, hasher: Arc<dyn ContentHasher>) -> JobScheduler {
        JobScheduler::new(job, Arc::clone(&self.store), self.status.clone(), hasher)
    }

    fn snapshots(&self) -> Vec<String> {
        let mut names: Vec<_> = match fs::read_dir(self.destination()) {
            Ok(entries) => entries
                .map(|e| e.unwrap().file_name().into_string().unwrap())
                .collect(),
            Err(_) => Vec::new(),
        };
        names.sort();
        names
    }
}

fn live() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    // Keep the sender alive for the whole test
    std::mem::forget(tx);
    rx
}

fn stage_snapshot(destination: &Path, name: &str, age: Duration) {
    let path = destination.join(name);
    fs::create_dir_all(&path).unwrap();
    fs::File::open(&path)
        .unwrap()
        .set_modified(SystemTime::now() - age)
        .unwrap();
}

#[test]
fn test_first_tick_copies_then_unchanged_content_skips() -> anyhow::Result<()> {
    let h = Harness::new();
    let scheduler = h.scheduler(h.job(5), Arc::new(DirHasher));

    let first = scheduler.tick(&live())?;
    let TickOutcome::Copied { snapshot, stats, pruned } = first else {
        panic!("expected a copy, got {first:?}");
    };
    assert_eq!(stats.files, 2);
    assert_eq!(pruned, 0);
    assert!(snapshot.join("nested/figure.bin").is_file());
    assert!(snapshot
        .file_name()
        .unwrap()
        .to_string_lossy()
        .ends_with("_data"));
    assert_eq!(h.store.get("Data").unwrap().kind, ActionKind::Copy);

    let second = scheduler.tick(&live())?;
    assert!(matches!(second, TickOutcome::Skipped { .. }), "{second:?}");
    assert_eq!(h.snapshots().len(), 1);
    assert_eq!(h.store.get("Data").unwrap().kind, ActionKind::Skip);

    let status = h.status.get("Data").unwrap();
    assert_eq!(status.last_kind, Some(ActionKind::Skip));
    assert!(h.status.last_line(Utc::now()).ends_with("(Data) [S]"));
    Ok(())
}

#[test]
fn test_changed_content_copies_again() -> anyhow::Result<()> {
    let h = Harness::new();
    let scheduler = h.scheduler(h.job(5), Arc::new(DirHasher));
    scheduler.tick(&live())?;

    fs::write(h.source().join("notes.txt"), b"second draft")?;
    match scheduler.decide() {
        Decision::Copy { reason, fingerprint } => {
            assert_eq!(reason, CopyReason::ContentChanged);
            assert!(fingerprint.is_some());
        }
        other => panic!("expected copy, got {other:?}"),
    }
    Ok(())
}

#[test]
fn test_retention_after_copy_with_hash_check_disabled() -> anyhow::Result<()> {
    let h = Harness::new();
    let job = h.job(3).with_hash_check(Toggle::Disabled);
    for (i, minutes) in [300u64, 250, 200, 150, 100, 50].iter().enumerate() {
        stage_snapshot(
            &h.destination(),
            &format!("0{}-01-2020_08-00-00_data", i + 1),
            Duration::from_secs(minutes * 60),
        );
    }

    let scheduler = h.scheduler(job, Arc::new(DirHasher));
    assert_eq!(
        scheduler.decide(),
        Decision::Copy {
            fingerprint: None,
            reason: CopyReason::HashCheckDisabled
        }
    );

    let outcome = scheduler.tick(&live())?;
    let TickOutcome::Copied { snapshot, pruned, .. } = outcome else {
        panic!("expected a copy, got {outcome:?}");
    };
    assert_eq!(pruned, 4);

    let left = h.snapshots();
    assert_eq!(left.len(), 3);
    assert!(left.contains(&"05-01-2020_08-00-00_data".to_string()));
    assert!(left.contains(&"06-01-2020_08-00-00_data".to_string()));
    assert!(left.contains(&snapshot.file_name().unwrap().to_string_lossy().into_owned()));

    // No fingerprint exists, so nothing is recorded
    assert!(h.store.get("Data").is_none());
    Ok(())
}

#[test]
fn test_copy_failure_leaves_store_and_status_untouched() {
    let h = Harness::new();
    let mut job = h.job(3).with_hash_check(Toggle::Disabled);
    job.source = h.temp.path().join("vanished");

    let scheduler = h.scheduler(job, Arc::new(DirHasher));
    let err = scheduler.tick(&live()).unwrap_err();
    assert!(!err.is_hash_failure());

    assert!(h.store.is_empty());
    let status = h.status.get("Data").unwrap();
    assert_eq!(status.last, None);
    assert_eq!(status.next, None);
}

#[test]
fn test_prune_failure_after_copy_leaves_store_and_status_untouched() -> anyhow::Result<()> {
    let h = Harness::new();
    let scheduler = h.scheduler(h.job(3), Arc::new(DirHasher));
    assert!(matches!(scheduler.tick(&live())?, TickOutcome::Copied { .. }));
    let recorded = h.store.get("Data").unwrap();
    let status = h.status.get("Data").unwrap();

    fs::write(h.source().join("notes.txt"), b"second draft")?;
    std::thread::sleep(Duration::from_millis(1100));
    let failing = h
        .scheduler(h.job(3), Arc::new(DirHasher))
        .with_pruner(Arc::new(FailingPruner));

    let err = failing.tick(&live()).unwrap_err();
    assert_eq!(err.path(), h.destination().as_path());

    // The copy itself stands, but it is not credited
    assert_eq!(h.snapshots().len(), 2);
    assert_eq!(h.store.get("Data").unwrap(), recorded);
    let after = h.status.get("Data").unwrap();
    assert_eq!(after.last, status.last);
    assert_eq!(after.next, status.next);
    Ok(())
}

#[cfg(unix)]
#[test]
fn test_read_only_source_directory_does_not_block_retention() -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let h = Harness::new();
    let locked = h.source().join("locked");
    fs::create_dir(&locked)?;
    fs::write(locked.join("inner.txt"), b"inner")?;
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o555))?;

    let scheduler = h.scheduler(h.job(1).with_hash_check(Toggle::Disabled), Arc::new(DirHasher));
    let first = scheduler.tick(&live());
    // Snapshot names have one-second resolution
    std::thread::sleep(Duration::from_millis(1100));
    let second = scheduler.tick(&live());

    // Let TempDir clean up whatever is left
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755))?;
    for name in h.snapshots() {
        let copied = h.destination().join(name).join("locked");
        if copied.exists() {
            fs::set_permissions(&copied, fs::Permissions::from_mode(0o755))?;
        }
    }

    assert!(matches!(first?, TickOutcome::Copied { pruned: 0, .. }));
    assert!(matches!(second?, TickOutcome::Copied { pruned: 1, .. }));
    assert_eq!(h.snapshots().len(), 1);
    Ok(())
}

#[test]
fn test_hash_failure_still_copies_and_records_recomputed_fingerprint() -> anyhow::Result<()> {
    let h = Harness::new();
    let scheduler = h.scheduler(h.job(3), Arc::new(FlakyHasher::failing(1)));

    assert!(matches!(scheduler.tick(&live())?, TickOutcome::Copied { .. }));
    let record = h.store.get("Data").unwrap();
    assert_eq!(record.kind, ActionKind::Copy);
    assert_eq!(record.fingerprint, DirHasher.fingerprint(&h.source())?);
    Ok(())
}

#[test]
fn test_persistent_hash_failure_copies_without_record() -> anyhow::Result<()> {
    let h = Harness::new();
    let scheduler = h.scheduler(h.job(3), Arc::new(FlakyHasher::failing(usize::MAX)));

    assert!(matches!(scheduler.tick(&live())?, TickOutcome::Copied { .. }));
    assert_eq!(h.snapshots().len(), 1);
    assert!(h.store.get("Data").is_none());
    assert!(h.status.get("Data").unwrap().last.is_some());
    Ok(())
}

#[test]
fn test_cancelled_tick_does_nothing() -> anyhow::Result<()> {
    let h = Harness::new();
    let scheduler = h.scheduler(h.job(3), Arc::new(DirHasher));
    let (tx, rx) = watch::channel(false);
    tx.send(true)?;

    assert_eq!(scheduler.tick(&rx)?, TickOutcome::Cancelled);
    assert!(h.snapshots().is_empty());
    assert!(h.store.is_empty());
    Ok(())
}

#[test]
fn test_seed_status_matches_initial_delay() -> anyhow::Result<()> {
    let h = Harness::new();
    let half = INTERVAL / 2;
    stage_snapshot(&h.destination(), "01-01-2025_10-00-00_data", half);
    let scheduler = h.scheduler(h.job(3), Arc::new(DirHasher));

    let now = Utc::now();
    let recovery = scheduler.recover();
    let delay = scheduler.seed_status(&recovery, now);
    assert!(delay <= half && delay >= half - Duration::from_secs(2), "{delay:?}");

    let status = h.status.get("Data").unwrap();
    assert_eq!(status.phase, JobPhase::Idle);
    assert_eq!(status.last, recovery.effective_last);
    assert_eq!(status.next, Some(now + chrono::Duration::from_std(delay)?));
    assert_eq!(h.status.next_line(now), "Next: 15 minutes (Data)");
    Ok(())
}

#[test]
fn test_seeded_last_action_from_snapshot_is_not_marked_skipped() -> anyhow::Result<()> {
    let h = Harness::new();
    stage_snapshot(&h.destination(), "01-01-2025_10-00-00_data", INTERVAL / 2);
    // An old skip whose fingerprint can no longer be verified
    h.store.record_at(
        "Data",
        Fingerprint::from("b3:stale".to_string()),
        ActionKind::Skip,
        Utc::now() - chrono::Duration::minutes(5),
    )?;

    let scheduler = h.scheduler(h.job(3), Arc::new(FlakyHasher::failing(usize::MAX)));
    let recovery = scheduler.recover();
    assert_eq!(recovery.basis, RecoveryBasis::HashFailedFallback);
    scheduler.seed_status(&recovery, Utc::now());

    let status = h.status.get("Data").unwrap();
    assert_eq!(status.last_kind, Some(ActionKind::Copy));
    assert!(!h.status.last_line(Utc::now()).ends_with("[S]"));
    Ok(())
}

#[test]
fn test_seeded_verified_skip_is_marked_skipped() -> anyhow::Result<()> {
    let h = Harness::new();
    let fingerprint = DirHasher.fingerprint(&h.source())?;
    h.store.record_at(
        "Data",
        fingerprint,
        ActionKind::Skip,
        Utc::now() - chrono::Duration::minutes(5),
    )?;

    let scheduler = h.scheduler(h.job(3), Arc::new(DirHasher));
    let recovery = scheduler.recover();
    assert_eq!(recovery.basis, RecoveryBasis::VerifiedSkip);
    scheduler.seed_status(&recovery, Utc::now());

    assert_eq!(h.status.get("Data").unwrap().last_kind, Some(ActionKind::Skip));
    assert!(h.status.last_line(Utc::now()).ends_with("(Data) [S]"));
    Ok(())
}

#[tokio::test]
async fn test_run_ticks_immediately_and_stops_on_shutdown() -> anyhow::Result<()> {
    let h = Harness::new();
    let scheduler = Arc::new(h.scheduler(h.job(3), Arc::new(DirHasher)));
    let (tx, rx) = watch::channel(false);

    let handle = tokio::spawn(Arc::clone(&scheduler).run(rx));

    // No history, so the first tick is immediate
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while h.status.get("Data").and_then(|s| s.last).is_none() {
        assert!(tokio::time::Instant::now() < deadline, "first tick never ran");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    tx.send(true)?;
    tokio::time::timeout(Duration::from_secs(10), handle).await??;

    assert_eq!(h.status.get("Data").unwrap().phase, JobPhase::Stopped);
    assert_eq!(h.snapshots().len(), 1);
    assert_eq!(h.store.get("Data").unwrap().kind, ActionKind::Copy);
    Ok(())
}

#[tokio::test]
async fn test_run_waits_out_recovered_delay() -> anyhow::Result<()> {
    let h = Harness::new();
    // A snapshot from a minute ago means the next run is ~29 minutes away
    stage_snapshot(&h.destination(), "01-01-2025_10-00-00_data", Duration::from_secs(60));
    let scheduler = Arc::new(h.scheduler(h.job(3), Arc::new(DirHasher)));
    let (tx, rx) = watch::channel(false);

    let handle = tokio::spawn(Arc::clone(&scheduler).run(rx));
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while h.status.get("Data").and_then(|s| s.next).is_none() {
        assert!(tokio::time::Instant::now() < deadline, "scheduler never seeded");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    drop(tx);
    tokio::time::timeout(Duration::from_secs(10), handle).await??;

    assert_eq!(h.snapshots(), vec!["01-01-2025_10-00-00_data".to_string()]);
    assert_eq!(h.status.get("Data").unwrap().phase, JobPhase::Stopped);
    Ok(())
}
