//! Shared fixture for driving the `ks` binary against temp directories

#![allow(dead_code)]

use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

/// A scratch tree holding a config, a state dir, one source and one destination
pub struct Fixture {
    pub temp: TempDir,
}

impl Fixture {
    /// Source `Docs` with two files, job `Docs` keeping `retention` snapshots
    pub fn new(retention: usize) -> Result<Self> {
        Self::with_job_options(retention, "")
    }

    /// Like [`Fixture::new`], with extra `key = value` lines for the job
    pub fn with_job_options(retention: usize, extra: &str) -> Result<Self> {
        let fixture = Self {
            temp: TempDir::new()?,
        };
        fs::create_dir_all(fixture.source().join("sub"))?;
        fs::write(fixture.source().join("a.txt"), b"alpha")?;
        fs::write(fixture.source().join("sub/b.txt"), b"beta")?;

        let config = format!(
            "state_dir = {state:?}\n\n\
             [[jobs]]\n\
             name = \"Docs\"\n\
             source = {source:?}\n\
             destination = {dest:?}\n\
             interval_minutes = 60\n\
             retention = {retention}\n\
             {extra}\n",
            state = fixture.state_dir().display().to_string(),
            source = fixture.source().display().to_string(),
            dest = fixture.destination().display().to_string(),
        );
        fs::write(fixture.config_path(), config)?;
        Ok(fixture)
    }

    pub fn config_path(&self) -> PathBuf {
        self.temp.path().join("config.toml")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.temp.path().join("state")
    }

    pub fn source(&self) -> PathBuf {
        self.temp.path().join("Docs")
    }

    pub fn destination(&self) -> PathBuf {
        self.temp.path().join("backups")
    }

    pub fn actions_path(&self) -> PathBuf {
        self.state_dir().join("actions.json")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.state_dir().join("keepsake.lock")
    }

    /// `ks --config <fixture config> <args>`
    pub fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(ks_bin());
        cmd.arg("--config").arg(self.config_path()).args(args);
        cmd.env_remove("RUST_LOG");
        cmd
    }

    pub fn run(&self, args: &[&str]) -> Result<Output> {
        Ok(self.command(args).output()?)
    }

    /// Snapshot directory names under the destination, sorted
    pub fn snapshots(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(self.destination())
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Recorded action kind for the `Docs` job, if any
    pub fn recorded_kind(&self) -> Option<String> {
        let content = fs::read_to_string(self.actions_path()).ok()?;
        let value: serde_json::Value = serde_json::from_str(&content).ok()?;
        value["Docs"]["kind"].as_str().map(str::to_string)
    }

    /// Create a snapshot directory whose mtime is `age` in the past
    pub fn stage_snapshot(&self, name: &str, age: Duration) -> Result<()> {
        let path = self.destination().join(name);
        fs::create_dir_all(&path)?;
        fs::File::open(&path)?.set_modified(SystemTime::now() - age)?;
        Ok(())
    }
}

pub fn ks_bin() -> &'static Path {
    Path::new(env!("CARGO_BIN_EXE_ks"))
}

pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}
