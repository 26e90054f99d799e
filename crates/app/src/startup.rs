use std::path::PathBuf;

use usage_db::Db;

use crate::config::SyncConfig;
use crate::error::Result;

const APP_DIR_NAME: &str = "usage-tracker";

#[derive(Clone, Debug)]
pub struct AppPaths {
    pub app_data_dir: PathBuf,
    pub db_path: PathBuf,
    pub config_path: PathBuf,
}

impl AppPaths {
    pub fn new(app_data_dir: PathBuf) -> Self {
        let db_path = app_data_dir.join("usage.sqlite");
        let config_path = app_data_dir.join("config.toml");
        Self {
            app_data_dir,
            db_path,
            config_path,
        }
    }

    /// `$XDG_DATA_HOME/usage-tracker`, else `~/.local/share/usage-tracker`,
    /// else a relative directory.
    pub fn default_location() -> Self {
        let base = std::env::var("XDG_DATA_HOME")
            .ok()
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|home| PathBuf::from(home).join(".local/share"))
            })
            .unwrap_or_else(|| PathBuf::from("."));
        Self::new(base.join(APP_DIR_NAME))
    }
}

pub fn ensure_app_data_dir(paths: &AppPaths) -> Result<()> {
    std::fs::create_dir_all(&paths.app_data_dir)?;
    Ok(())
}

/// Opens the store with the schema applied and the configured batch size.
pub fn open_store(db_path: &std::path::Path, config: &SyncConfig) -> Result<Db> {
    let mut db = Db::open(db_path)?;
    db.migrate()?;
    db.set_rollup_batch_size(config.rollup_batch_size)?;
    Ok(db)
}
