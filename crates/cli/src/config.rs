//! keepsake configuration
//!
//! The config lives at `~/.config/keepsake/config.toml` (Linux/macOS) or
//! `%APPDATA%\keepsake\config.toml` (Windows) unless `--config` points
//! elsewhere. It lists the backup jobs plus where runtime state is kept:
//!
//! ```toml
//! status_refresh_secs = 60
//!
//! [[jobs]]
//! name = "Documents"
//! source = "/home/me/Documents"
//! destination = "/mnt/backup/documents"
//! interval_minutes = 60
//! retention = 24
//! ```

use anyhow::{Context, Result};
use journal::{Job, Toggle};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "keepsake";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where the action store and lock file live (default: platform data dir)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,

    /// How often `ks run` logs the Last/Next status lines (default: 60)
    pub status_refresh_secs: u64,

    pub jobs: Vec<JobConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_dir: None,
            status_refresh_secs: 60,
            jobs: Vec::new(),
        }
    }
}

/// One `[[jobs]]` entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub name: String,
    pub source: PathBuf,
    pub destination: PathBuf,
    pub interval_minutes: u64,

    /// Snapshots kept after each copy
    #[serde(alias = "rotation_count")]
    pub retention: usize,

    /// Defaults to enabled when absent
    #[serde(default, skip_serializing_if = "Toggle::is_unspecified")]
    pub enabled: Toggle,

    /// Defaults to enabled when absent
    #[serde(default, skip_serializing_if = "Toggle::is_unspecified")]
    pub hash_check: Toggle,
}

impl JobConfig {
    pub fn is_enabled(&self) -> bool {
        self.enabled.resolve(true)
    }

    pub fn to_job(&self) -> Job {
        Job::new(
            self.name.clone(),
            self.source.clone(),
            self.destination.clone(),
            Duration::from_secs(self.interval_minutes.saturating_mul(60)),
            self.retention,
        )
        .with_hash_check(self.hash_check)
    }
}

impl Config {
    /// Load and validate the config at `path`.
    ///
    /// Validation warnings are logged; errors fail the load.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).with_context(|| {
            format!(
                "Failed to read config at {} (run `ks init` to create one)",
                path.display()
            )
        })?;
        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config at {}", path.display()))?;

        let base = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let base = std::env::current_dir()
            .context("Failed to determine working directory")?
            .join(base);
        config.resolve_paths(&base);

        for warning in config.validate()? {
            tracing::warn!("{}", warning);
        }
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Make every configured path absolute, relative paths being taken from `base`
    pub fn resolve_paths(&mut self, base: &Path) {
        self.state_dir = self.state_dir.as_deref().map(|dir| absolutize(dir, base));
        for job in &mut self.jobs {
            job.source = absolutize(&job.source, base);
            job.destination = absolutize(&job.destination, base);
        }
    }

    /// Check job definitions; returns non-fatal warnings
    pub fn validate(&self) -> Result<Vec<String>> {
        let mut warnings = Vec::new();
        let mut names = HashSet::new();

        if self.status_refresh_secs == 0 {
            anyhow::bail!("status_refresh_secs must be at least 1");
        }

        for job in &self.jobs {
            if job.name.trim().is_empty() {
                anyhow::bail!("Job with source {} has an empty name", job.source.display());
            }
            if !names.insert(job.name.as_str()) {
                anyhow::bail!("Duplicate job name '{}'", job.name);
            }
            if job.interval_minutes == 0 {
                anyhow::bail!("Job '{}': interval_minutes must be at least 1", job.name);
            }
            // Keeps interval arithmetic well inside chrono's range
            if job.interval_minutes > 60 * 24 * 365 * 100 {
                anyhow::bail!("Job '{}': interval_minutes is unreasonably large", job.name);
            }
            if job.retention == 0 {
                anyhow::bail!("Job '{}': retention must be at least 1", job.name);
            }
            if job.source.file_name().is_none() {
                anyhow::bail!(
                    "Job '{}': source {} has no folder name to label snapshots with",
                    job.name,
                    job.source.display()
                );
            }
            if nested(&job.source, &job.destination) {
                anyhow::bail!(
                    "Job '{}': source and destination must not contain each other",
                    job.name
                );
            }
        }

        let enabled: Vec<_> = self.jobs.iter().filter(|j| j.is_enabled()).collect();
        for (i, a) in enabled.iter().enumerate() {
            for b in &enabled[i + 1..] {
                if same_path(&a.destination, &b.destination) {
                    warnings.push(format!(
                        "Jobs '{}' and '{}' share destination {}",
                        a.name,
                        b.name,
                        a.destination.display()
                    ));
                }
            }
        }
        if enabled.is_empty() {
            warnings.push("No enabled jobs configured".to_string());
        }

        Ok(warnings)
    }

    pub fn enabled_jobs(&self) -> impl Iterator<Item = &JobConfig> {
        self.jobs.iter().filter(|j| j.is_enabled())
    }

    pub fn find_job(&self, name: &str) -> Option<&JobConfig> {
        self.jobs.iter().find(|j| j.name == name)
    }

    /// Runtime state directory
    pub fn state_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.state_dir {
            return Ok(dir.clone());
        }
        dirs::data_local_dir()
            .map(|d| d.join(APP_DIR))
            .ok_or_else(|| anyhow::anyhow!("Could not determine a state directory; set state_dir"))
    }

    pub fn actions_path(&self) -> Result<PathBuf> {
        Ok(self.state_dir()?.join("actions.json"))
    }

    pub fn lock_path(&self) -> Result<PathBuf> {
        Ok(self.state_dir()?.join("keepsake.lock"))
    }
}

/// Get the config directory path
pub fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        dirs::home_dir().map(|h| h.join(".config").join(APP_DIR))
    }

    #[cfg(not(target_os = "macos"))]
    {
        dirs::config_dir().map(|c| c.join(APP_DIR))
    }
}

/// Config path used when `--config` is not given
pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}

/// Resolve the `--config` flag against the default location
pub fn resolve_path(flag: Option<&Path>) -> Result<PathBuf> {
    match flag {
        Some(path) => Ok(path.to_path_buf()),
        None => default_config_path()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory; pass --config")),
    }
}

/// Example config written by `ks init`
pub fn example_config() -> String {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/home/me"));
    let config = Config {
        jobs: vec![JobConfig {
            name: "Documents".to_string(),
            source: home.join("Documents"),
            destination: home.join("Backups").join("Documents"),
            interval_minutes: 60,
            retention: 24,
            enabled: Toggle::Unspecified,
            hash_check: Toggle::Unspecified,
        }],
        ..Config::default()
    };

    let mut content = String::from("# keepsake configuration\n");
    content.push_str("#\n");
    content.push_str("# Each [[jobs]] entry snapshots `source` into timestamped folders under\n");
    content.push_str("# `destination` every `interval_minutes`, keeping the newest `retention`.\n");
    content.push_str("# Optional per job: enabled = false, hash_check = false\n");
    content.push_str("# Optional: state_dir = \"/path/for/actions.json\"\n\n");
    content.push_str(&toml::to_string_pretty(&config).unwrap_or_default());
    content
}

/// Write the example config unless a file already exists. Returns whether it wrote.
pub fn write_example(path: &Path) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory at {}", parent.display()))?;
    }
    fs::write(path, example_config())
        .with_context(|| format!("Failed to write config to {}", path.display()))?;
    tracing::info!("Wrote example config to {}", path.display());
    Ok(true)
}

/// Join onto `base` and drop `.` and `..` lexically
fn absolutize(path: &Path, base: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in base.join(path).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

fn nested(a: &Path, b: &Path) -> bool {
    let (a, b) = (normalize(a), normalize(b));
    a.starts_with(&b) || b.starts_with(&a)
}

fn same_path(a: &Path, b: &Path) -> bool {
    normalize(a) == normalize(b)
}

/// Canonical form when the path exists, otherwise as written
fn normalize(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
