mod error;
mod events;
mod helpers;
mod ingest;
mod migrations;
mod rollups;
mod sessions;
mod settings;
mod sources;
mod types;

use std::path::Path;

use rusqlite::Connection;

pub use error::{DbError, Result};
pub use rollups::DEFAULT_ROLLUP_BATCH_SIZE;
pub use settings::SYNC_STRATEGY_KEY;
pub use types::{AppliedBatch, StatMetric};

/// Handle to the local usage store.
pub struct Db {
    conn: Connection,
    rollup_batch_size: usize,
}

impl Db {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "temp_store", "MEMORY")?;
        conn.pragma_update(None, "cache_size", -20_000)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn,
            rollup_batch_size: DEFAULT_ROLLUP_BATCH_SIZE,
        })
    }

    pub fn rollup_batch_size(&self) -> usize {
        self.rollup_batch_size
    }

    /// Caps how many events a rollup scan holds in memory at once.
    pub fn set_rollup_batch_size(&mut self, batch_size: usize) -> Result<()> {
        if batch_size == 0 {
            return Err(DbError::InvalidArgument(
                "rollup batch size must be positive".to_string(),
            ));
        }
        self.rollup_batch_size = batch_size;
        Ok(())
    }
}
