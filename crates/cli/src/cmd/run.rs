//! Run the scheduler in the foreground

use crate::config::Config;
use crate::daemon::{self, Daemon};
use anyhow::Result;
use std::path::Path;

pub async fn run(config_path: &Path, once: bool) -> Result<()> {
    let config = Config::load(config_path)?;

    if !once {
        return daemon::start(&config).await;
    }

    let failures = Daemon::new(&config)?.run_once().await?;
    if failures > 0 {
        anyhow::bail!("{} job(s) failed", failures);
    }
    Ok(())
}
