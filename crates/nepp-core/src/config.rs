use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::fetch::{RetryPolicy, MAX_CHUNK_DAYS};
use crate::storage::DataLayout;
use crate::windowing::DEFAULT_LOOK_BACK;

pub const DEFAULT_CONFIG_FILE: &str = "nepp.toml";
pub const DATA_DIR_ENV: &str = "NEPP_DATA_DIR";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub data_dir: PathBuf,
    pub fetch: FetchConfig,
    pub cleaning: CleaningConfig,
    pub windowing: WindowingConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            fetch: FetchConfig::default(),
            cleaning: CleaningConfig::default(),
            windowing: WindowingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub max_attempts: u32,
    pub retry_delay_secs: u64,
    pub max_chunk_days: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_secs: 5,
            max_chunk_days: MAX_CHUNK_DAYS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleaningConfig {
    pub fill_missing_hours: bool,
}

impl Default for CleaningConfig {
    fn default() -> Self {
        Self {
            fill_missing_hours: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowingConfig {
    pub look_back: usize,
}

impl Default for WindowingConfig {
    fn default() -> Self {
        Self {
            look_back: DEFAULT_LOOK_BACK,
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|err| PipelineError::Config(format!("invalid configuration: {err}")))
    }

    /// Loads configuration and applies environment overrides.
    ///
    /// An explicit `path` must exist. Without one, `nepp.toml` in the working directory is
    /// used when present and defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::from_file(default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|err| {
            PipelineError::Config(format!("cannot read {}: {err}", path.display()))
        })?;
        toml::from_str(&content).map_err(|err| {
            PipelineError::Config(format!("invalid configuration in {}: {err}", path.display()))
        })
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
            if !dir.trim().is_empty() {
                self.data_dir = PathBuf::from(dir);
            }
        }
    }

    pub fn layout(&self) -> DataLayout {
        DataLayout::new(&self.data_dir)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.fetch.max_attempts.max(1),
            delay: Duration::from_secs(self.fetch.retry_delay_secs),
        }
    }

    pub fn max_chunk_days(&self) -> u32 {
        self.fetch.max_chunk_days.clamp(1, MAX_CHUNK_DAYS)
    }
}
