//! Fingerprint a job's source and predict the next decision

use crate::config::Config;
use anyhow::{Context, Result};
use chrono::Utc;
use journal::ActionStore;
use owo_colors::OwoColorize;
use std::path::Path;

pub async fn run(config_path: &Path, name: &str) -> Result<()> {
    let config = Config::load(config_path)?;
    let job = config
        .find_job(name)
        .ok_or_else(|| anyhow::anyhow!("No job named '{}'", name))?
        .to_job();

    let fingerprint = ks_core::fingerprint(&job.source)
        .with_context(|| format!("Failed to fingerprint {}", job.source.display()))?;
    println!("{}", fingerprint);

    if !job.hash_check_enabled() {
        println!("{}", "hash_check is off: every run copies".dimmed());
        return Ok(());
    }

    let store = ActionStore::open(config.actions_path()?)?;
    let verdict = match store.get(&job.name) {
        Some(record) if record.fingerprint == fingerprint => format!(
            "{} since last {} ({}): next run would skip",
            "Unchanged".green(),
            record.kind,
            crate::util::format_relative(record.timestamp, Utc::now())
        ),
        Some(record) => format!(
            "{} since last {}: next run would copy",
            "Changed".yellow(),
            record.kind
        ),
        None => format!("{}: next run would copy", "No recorded action".yellow()),
    };
    println!("{}", verdict);
    Ok(())
}
