use std::collections::HashSet;

use rusqlite::{Connection, OptionalExtension, params};
use usage_core::{SourceMetadata, SourceStatus};

use crate::Db;
use crate::error::Result;
use crate::helpers::{SOURCE_COLUMNS, row_to_source};

pub(crate) fn write_source(conn: &Connection, source: &SourceMetadata) -> Result<()> {
    let mut stmt = conn.prepare_cached(
        r#"
        INSERT INTO source_metadata (
          source_key, tool_id, content_hash, last_synced_at, event_count,
          first_event_at, last_event_at, source_exists
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        ON CONFLICT(source_key) DO UPDATE SET
          tool_id = excluded.tool_id,
          content_hash = excluded.content_hash,
          last_synced_at = excluded.last_synced_at,
          event_count = excluded.event_count,
          first_event_at = excluded.first_event_at,
          last_event_at = excluded.last_event_at,
          source_exists = excluded.source_exists
        "#,
    )?;
    stmt.execute(params![
        source.source_key,
        source.tool_id,
        source.content_hash,
        source.last_synced_at,
        source.event_count as i64,
        source.first_event_at,
        source.last_event_at,
        source.exists as i64,
    ])?;
    Ok(())
}

impl Db {
    pub fn get_source(&self, source_key: &str) -> Result<Option<SourceMetadata>> {
        let source = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM source_metadata WHERE source_key = ?1",
                    SOURCE_COLUMNS
                ),
                [source_key],
                row_to_source,
            )
            .optional()?;
        Ok(source)
    }

    /// Compares a freshly computed fingerprint with the stored one. A source
    /// previously marked as vanished counts as modified when it reappears.
    pub fn classify_source(&self, source_key: &str, content_hash: &str) -> Result<SourceStatus> {
        let status = match self.get_source(source_key)? {
            None => SourceStatus::New,
            Some(stored) if !stored.exists || stored.content_hash != content_hash => {
                SourceStatus::Modified
            }
            Some(_) => SourceStatus::Unchanged,
        };
        Ok(status)
    }

    pub fn record_source(&self, source: &SourceMetadata) -> Result<()> {
        write_source(&self.conn, source)
    }

    pub fn list_sources(&self, tool_id: &str) -> Result<Vec<SourceMetadata>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM source_metadata WHERE tool_id = ?1 ORDER BY source_key",
            SOURCE_COLUMNS
        ))?;
        let rows = stmt.query_map([tool_id], row_to_source)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Flags every known source of `tool_id` that is absent from `present`.
    /// Events already ingested from them are kept.
    pub fn mark_missing_sources(&mut self, tool_id: &str, present: &HashSet<String>) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let known: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT source_key FROM source_metadata WHERE tool_id = ?1 AND source_exists = 1",
            )?;
            let rows = stmt.query_map([tool_id], |row| row.get::<_, String>(0))?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };
        let mut marked = 0usize;
        for source_key in known.iter().filter(|key| !present.contains(*key)) {
            marked += tx.execute(
                "UPDATE source_metadata SET source_exists = 0 WHERE source_key = ?1",
                [source_key],
            )?;
        }
        tx.commit()?;
        Ok(marked)
    }
}
