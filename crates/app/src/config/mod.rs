use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::sync::SyncStrategy;

const DEFAULT_STRATEGY: &str = "auto";
const DEFAULT_DEBOUNCE_MS: u64 = 500;
const DEFAULT_WATCH_POLL_MS: u64 = 250;

/// Sync tuning read from `config.toml`. Missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// `"auto"` or an interval in whole seconds.
    pub default_strategy: String,
    pub debounce_ms: u64,
    pub watch_poll_ms: u64,
    pub rollup_batch_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            default_strategy: DEFAULT_STRATEGY.to_string(),
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            watch_poll_ms: DEFAULT_WATCH_POLL_MS,
            rollup_batch_size: usage_db::DEFAULT_ROLLUP_BATCH_SIZE,
        }
    }
}

impl SyncConfig {
    pub fn default_strategy(&self) -> Result<SyncStrategy> {
        SyncStrategy::parse(&self.default_strategy)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn watch_poll(&self) -> Duration {
        Duration::from_millis(self.watch_poll_ms.max(1))
    }

    pub fn validate(&self) -> Result<()> {
        self.default_strategy()?;
        if self.rollup_batch_size == 0 {
            return Err(AppError::Config(
                "rollup_batch_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ConfigLoad {
    pub config: SyncConfig,
    pub file: PathBuf,
    pub created: bool,
}

/// Reads `path`, or writes the defaults there when it does not exist yet.
pub fn load_or_create(path: &Path) -> Result<ConfigLoad> {
    if path.exists() {
        let contents = fs::read_to_string(path)?;
        let config: SyncConfig = toml::from_str(&contents)
            .map_err(|err| AppError::Config(format!("parse {}: {}", path.display(), err)))?;
        config.validate()?;
        return Ok(ConfigLoad {
            config,
            file: path.to_path_buf(),
            created: false,
        });
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let config = SyncConfig::default();
    let contents = toml::to_string_pretty(&config)
        .map_err(|err| AppError::Config(format!("serialize config: {}", err)))?;
    fs::write(path, contents)?;
    Ok(ConfigLoad {
        config,
        file: path.to_path_buf(),
        created: true,
    })
}
