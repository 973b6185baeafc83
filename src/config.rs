use crate::error::{PlanningError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// What to do when a batch names a PO, department, project, category, IO or HR
/// category that has no row yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceMode {
    /// Reject the row with an `unresolved <kind>` reason.
    #[default]
    Reject,
    /// Insert the missing reference row, then use its new id.
    Create,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadMode {
    /// Append only rows whose key is not present yet.
    #[default]
    Merge,
    /// Delete existing facts for every year present in the batch, then append.
    ReplaceYears,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanningConfig {
    pub database_path: PathBuf,

    #[serde(default)]
    pub reference_mode: ReferenceMode,

    #[serde(default)]
    pub upload_mode: UploadMode,

    /// Keep only the first of several batch rows sharing a key.
    #[serde(default = "default_dedup_within_batch")]
    pub dedup_within_batch: bool,

    /// How long a writer waits on SQLite's lock before giving up.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_dedup_within_batch() -> bool {
    true
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

impl Default for PlanningConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("my_local_database.db"),
            reference_mode: ReferenceMode::default(),
            upload_mode: UploadMode::default(),
            dedup_within_batch: default_dedup_within_batch(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl PlanningConfig {
    pub fn with_database(path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: path.into(),
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            return Err(PlanningError::InvalidConfig(
                "database_path must not be empty".to_string(),
            ));
        }
        if self.busy_timeout_ms > 600_000 {
            return Err(PlanningError::InvalidConfig(format!(
                "busy_timeout_ms {} exceeds the 10 minute ceiling",
                self.busy_timeout_ms
            )));
        }
        Ok(())
    }
}
