//! Foreground scheduler process (`ks run`)

use crate::config::Config;
use crate::locks::InstanceLock;
use anyhow::{Context, Result};
use chrono::Utc;
use journal::ActionStore;
use ks_core::{ContentHasher, DirHasher};
use scheduler::{JobScheduler, StatusTable, TickOutcome};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Running scheduler process
pub struct Daemon {
    schedulers: Vec<Arc<JobScheduler>>,
    status: Arc<StatusTable>,
    status_refresh: Duration,
    _lock: InstanceLock,
}

impl Daemon {
    /// Take the instance lock, load the action store and build one scheduler per enabled job.
    pub fn new(config: &Config) -> Result<Self> {
        let lock = InstanceLock::acquire(&config.lock_path()?)
            .context("Failed to acquire instance lock")?;

        let actions_path = config.actions_path()?;
        let store = Arc::new(
            ActionStore::open(&actions_path)
                .with_context(|| format!("Failed to load {}", actions_path.display()))?,
        );
        let status = Arc::new(StatusTable::new());
        let hasher: Arc<dyn ContentHasher> = Arc::new(DirHasher);

        let schedulers = config
            .enabled_jobs()
            .map(|job| {
                Arc::new(JobScheduler::new(
                    job.to_job(),
                    Arc::clone(&store),
                    status.clone(),
                    Arc::clone(&hasher),
                ))
            })
            .collect();

        Ok(Self {
            schedulers,
            status,
            status_refresh: Duration::from_secs(config.status_refresh_secs),
            _lock: lock,
        })
    }

    /// Run every job until SIGINT/SIGTERM
    pub async fn run(self) -> Result<()> {
        tracing::info!(
            "keepsake started (PID: {}, {} jobs)",
            std::process::id(),
            self.schedulers.len()
        );
        if self.schedulers.is_empty() {
            tracing::warn!("No enabled jobs; nothing to do");
            return Ok(());
        }
        let shutdown = shutdown_signal().context("Failed to install signal handlers")?;
        tokio::pin!(shutdown);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles: Vec<JoinHandle<()>> = self
            .schedulers
            .iter()
            .map(|scheduler| tokio::spawn(Arc::clone(scheduler).run(shutdown_rx.clone())))
            .collect();

        let mut heartbeat = tokio::time::interval(self.status_refresh);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it so schedulers can seed
        heartbeat.tick().await;

        loop {
            tokio::select! {
                signal = &mut shutdown => {
                    tracing::info!("Received {}, shutting down", signal);
                    break;
                }
                _ = heartbeat.tick() => {
                    self.log_status();
                }
            }
        }

        let _ = shutdown_tx.send(true);
        tracing::info!("Waiting for in-flight backups to finish");
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!("Scheduler task failed: {}", e);
            }
        }
        tracing::info!("Shutdown complete");
        Ok(())
    }

    /// One tick per job, sequentially, then exit
    pub async fn run_once(self) -> Result<usize> {
        let (_keep_alive, cancel) = watch::channel(false);
        let mut failures = 0;

        for scheduler in &self.schedulers {
            let name = scheduler.job().name.clone();
            let this = Arc::clone(scheduler);
            let cancel = cancel.clone();
            let outcome = tokio::task::spawn_blocking(move || this.tick(&cancel))
                .await
                .context("Backup task panicked")?;

            match outcome {
                Ok(TickOutcome::Copied { snapshot, stats, pruned }) => tracing::info!(
                    "{}: copied {} files ({}) to {} ({} pruned)",
                    name,
                    stats.files,
                    crate::util::format_size(stats.bytes),
                    snapshot.display(),
                    pruned
                ),
                Ok(TickOutcome::Skipped { .. }) => {
                    tracing::info!("{}: content unchanged, skipped", name)
                }
                Ok(TickOutcome::Cancelled) => {}
                Err(e) => {
                    failures += 1;
                    tracing::error!("{}: backup failed: {}", name, e);
                }
            }
        }
        Ok(failures)
    }

    fn log_status(&self) {
        let now = Utc::now();
        tracing::info!("{}", self.status.last_line(now));
        tracing::info!("{}", self.status.next_line(now));
        for (job, status) in self.status.entries() {
            tracing::debug!(job = %job, phase = %status.phase, "job state");
        }
    }
}

/// Register signal handlers now; the returned future resolves on the first signal
#[cfg(unix)]
fn shutdown_signal() -> Result<impl Future<Output = &'static str>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    Ok(async move {
        tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
        }
    })
}

#[cfg(not(unix))]
fn shutdown_signal() -> Result<impl Future<Output = &'static str>> {
    Ok(async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => "Ctrl-C",
            Err(e) => {
                tracing::error!("Cannot listen for Ctrl-C: {}", e);
                std::future::pending().await
            }
        }
    })
}

/// Start all enabled jobs and block until a shutdown signal
pub async fn start(config: &Config) -> Result<()> {
    Daemon::new(config)?.run().await
}
