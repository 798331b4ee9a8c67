//! Offline job report: records, snapshots and the next due time

use crate::config::{Config, JobConfig};
use crate::locks::InstanceLock;
use crate::util;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use journal::snapshot::parse_snapshot_time;
use journal::{list_snapshots, recover_effective_last_action, ActionStore};
use ks_core::DirHasher;
use owo_colors::OwoColorize;
use std::path::Path;

pub async fn run(config_path: &Path) -> Result<()> {
    let config = Config::load(config_path)?;
    let actions_path = config.actions_path()?;
    let store = ActionStore::open(&actions_path)
        .with_context(|| format!("Failed to load {}", actions_path.display()))?;
    let now = Utc::now();

    println!("{}", "keepsake status".bold());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!();
    println!("Config:        {}", config_path.display().to_string().cyan());
    println!("Actions:       {}", actions_path.display());
    match InstanceLock::live_holder(&config.lock_path()?) {
        Some(holder) => println!(
            "Scheduler:     {} (PID {}, since {})",
            "Running".green(),
            holder.pid,
            util::format_local(holder.started_at)
        ),
        None => println!("Scheduler:     {}", "Not running".dimmed()),
    }

    if config.jobs.is_empty() {
        println!();
        println!("{}", "No jobs configured".dimmed());
        return Ok(());
    }

    for job in &config.jobs {
        println!();
        print_job(job, &store, now);
    }
    Ok(())
}

fn print_job(job_config: &JobConfig, store: &ActionStore, now: DateTime<Utc>) {
    let job = job_config.to_job();

    let mut flags = Vec::new();
    if !job_config.is_enabled() {
        flags.push("disabled".red().to_string());
    }
    if !job.hash_check_enabled() {
        flags.push("no hash check".yellow().to_string());
    }
    if flags.is_empty() {
        println!("{}", job.name.bold());
    } else {
        println!("{}  [{}]", job.name.bold(), flags.join(", "));
    }

    println!("  Source:      {}", job.source.display());
    println!("  Destination: {}", job.destination.display());
    println!(
        "  Schedule:    {}, keep {}",
        util::format_interval(job.interval),
        job.retention
    );

    match store.get(&job.name) {
        Some(record) => println!(
            "  Recorded:    {} {} ({})",
            record.kind,
            util::format_relative(record.timestamp, now),
            util::format_local(record.timestamp).dimmed()
        ),
        None => println!("  Recorded:    {}", "nothing yet".dimmed()),
    }

    let folder = job.source_folder_name();
    match list_snapshots(&job.destination, &folder) {
        Ok(snapshots) => {
            match snapshots.iter().max_by_key(|s| s.modified) {
                Some(newest) => {
                    let named = parse_snapshot_time(&newest.name, &folder)
                        .map(|t| format!(", named {}", util::format_local(t.with_timezone(&Utc))))
                        .unwrap_or_default();
                    println!(
                        "  Snapshots:   {} (newest {}{})",
                        snapshots.len(),
                        util::format_relative(newest.modified, now),
                        named
                    );
                }
                None => println!("  Snapshots:   {}", "none".dimmed()),
            }
        }
        Err(e) => println!("  Snapshots:   {} {}", "unreadable:".red(), e),
    }

    if !job_config.is_enabled() {
        return;
    }

    let recovery = recover_effective_last_action(&job, store, &DirHasher);
    let delay = recovery.initial_delay(now, job.interval);
    let next = if delay.is_zero() {
        "due now".yellow().to_string()
    } else {
        format!(
            "in {} ({})",
            util::format_duration(delay),
            util::format_local(recovery.next_due(now, job.interval)).dimmed()
        )
    };
    println!("  Next run:    {} [{}]", next, recovery.basis.describe());
}
