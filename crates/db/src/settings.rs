use rusqlite::{OptionalExtension, params};

use crate::Db;
use crate::error::Result;

pub const SYNC_STRATEGY_KEY: &str = "sync_strategy";

impl Db {
    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM app_setting WHERE key = ?1",
                [key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO app_setting (key, value)
            VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
            params![key, value],
        )?;
        Ok(())
    }

    /// Raw persisted strategy string; parsing belongs to the sync layer.
    pub fn get_sync_strategy(&self) -> Result<Option<String>> {
        self.get_setting(SYNC_STRATEGY_KEY)
    }

    pub fn set_sync_strategy(&self, value: &str) -> Result<()> {
        self.set_setting(SYNC_STRATEGY_KEY, value)
    }
}
