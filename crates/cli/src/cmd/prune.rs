//! Apply retention without copying

use crate::config::{Config, JobConfig};
use crate::locks::InstanceLock;
use anyhow::{Context, Result};
use journal::RetentionManager;
use owo_colors::OwoColorize;
use std::path::Path;

pub async fn run(config_path: &Path, job: Option<String>) -> Result<()> {
    let config = Config::load(config_path)?;

    // A running scheduler may be pruning the same destinations
    let _lock = InstanceLock::acquire(&config.lock_path()?)
        .context("Cannot prune while keepsake is running")?;

    let jobs: Vec<&JobConfig> = match &job {
        Some(name) => vec![config
            .find_job(name)
            .ok_or_else(|| anyhow::anyhow!("No job named '{}'", name))?],
        None => config.enabled_jobs().collect(),
    };

    if jobs.is_empty() {
        println!("{}", "No enabled jobs".dimmed());
        return Ok(());
    }

    for job_config in jobs {
        let job = job_config.to_job();
        let report = RetentionManager::enforce_job(&job)
            .with_context(|| format!("Retention failed for '{}'", job.name))?;

        println!(
            "{}: kept {}, deleted {}",
            job.name.bold(),
            report.retained(),
            report.deleted.len()
        );
        for path in &report.deleted {
            println!("  - {}", path.display().to_string().dimmed());
        }
    }
    Ok(())
}
