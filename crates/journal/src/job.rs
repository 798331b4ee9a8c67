//! Backup job definitions

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::PathBuf;
use std::time::Duration;

/// A boolean setting that remembers whether it was set at all.
///
/// Absent keys in the config file resolve to a caller-chosen default, so
/// `hash_check = false` and a missing `hash_check` stay distinguishable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Toggle {
    #[default]
    Unspecified,
    Enabled,
    Disabled,
}

impl Toggle {
    pub fn resolve(self, default: bool) -> bool {
        match self {
            Toggle::Unspecified => default,
            Toggle::Enabled => true,
            Toggle::Disabled => false,
        }
    }

    pub fn is_unspecified(&self) -> bool {
        matches!(self, Toggle::Unspecified)
    }
}

impl From<Option<bool>> for Toggle {
    fn from(value: Option<bool>) -> Self {
        match value {
            None => Toggle::Unspecified,
            Some(true) => Toggle::Enabled,
            Some(false) => Toggle::Disabled,
        }
    }
}

impl From<Toggle> for Option<bool> {
    fn from(value: Toggle) -> Self {
        match value {
            Toggle::Unspecified => None,
            Toggle::Enabled => Some(true),
            Toggle::Disabled => Some(false),
        }
    }
}

impl Serialize for Toggle {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        Option::<bool>::from(*self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Toggle {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Option::<bool>::deserialize(deserializer)?.into())
    }
}

/// One scheduled folder backup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Unique display name, also the key in the action store
    pub name: String,
    pub source: PathBuf,
    /// Parent folder that receives timestamped snapshot directories
    pub destination: PathBuf,
    pub interval: Duration,
    /// Number of snapshots kept after pruning (at least 1)
    pub retention: usize,
    pub hash_check: Toggle,
}

impl Job {
    pub fn new(
        name: impl Into<String>,
        source: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
        interval: Duration,
        retention: usize,
    ) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            destination: destination.into(),
            interval,
            retention,
            hash_check: Toggle::Unspecified,
        }
    }

    pub fn with_hash_check(mut self, hash_check: Toggle) -> Self {
        self.hash_check = hash_check;
        self
    }

    /// Whether content fingerprints gate each copy. Defaults to on.
    pub fn hash_check_enabled(&self) -> bool {
        self.hash_check.resolve(true)
    }

    /// Final path component of the source, used as the snapshot name suffix
    pub fn source_folder_name(&self) -> String {
        self.source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "root".to_string())
    }
}
