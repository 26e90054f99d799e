use std::collections::BTreeSet;

use rusqlite::{Connection, OptionalExtension, params};
use usage_core::{Event, TimeRange, timestamp_in_range};

use crate::Db;
use crate::error::{DbError, Result};
use crate::helpers::{EVENT_COLUMNS, row_to_event};
use crate::types::AppliedBatch;

const INSERT_EVENT_SQL: &str = r#"
    INSERT OR IGNORE INTO usage_event (
      id, session_id, role, created_at, completed_at, provider_id, model_id,
      agent, mode, variant, project_root, cwd, tool_id,
      input_tokens, output_tokens, reasoning_tokens, cache_read_tokens, cache_write_tokens,
      cost_usd, diff_additions, diff_deletions, diff_files, finish
    ) VALUES (
      ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18,
      ?19, ?20, ?21, ?22, ?23
    )
"#;

fn check_timestamps(event: &Event) -> Result<()> {
    let completed_ok = event.completed_at.is_none_or(timestamp_in_range);
    if timestamp_in_range(event.created_at) && completed_ok {
        return Ok(());
    }
    Err(DbError::InvalidArgument(format!(
        "event {} has a timestamp outside the calendar range",
        event.id
    )))
}

/// Inserts events, ignoring ids that already exist. Only sessions that
/// received a new row are reported as affected. A batch holding any event
/// with an unrepresentable timestamp is rejected before anything is written.
pub(crate) fn insert_events(conn: &Connection, events: &[Event]) -> Result<AppliedBatch> {
    for event in events {
        check_timestamps(event)?;
    }
    let mut applied = AppliedBatch::default();
    let mut stmt = conn.prepare_cached(INSERT_EVENT_SQL)?;
    for event in events {
        let rows = stmt.execute(params![
            event.id,
            event.session_id,
            event.role.as_str(),
            event.created_at,
            event.completed_at,
            event.provider_id,
            event.model_id,
            event.agent,
            event.mode,
            event.variant,
            event.project_root,
            event.cwd,
            event.tool_id,
            event.tokens.input.map(|value| value as i64),
            event.tokens.output.map(|value| value as i64),
            event.tokens.reasoning.map(|value| value as i64),
            event.tokens.cache_read as i64,
            event.tokens.cache_write as i64,
            event.cost_usd,
            event.diff.map(|diff| diff.additions as i64),
            event.diff.map(|diff| diff.deletions as i64),
            event.diff.map(|diff| diff.files as i64),
            event.finish,
        ])?;
        if rows > 0 {
            applied.events_inserted += 1;
            applied.affected_sessions.insert(event.session_id.clone());
        }
    }
    Ok(applied)
}

pub(crate) fn load_session_events(conn: &Connection, session_id: &str) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {} FROM usage_event WHERE session_id = ?1 ORDER BY created_at, id",
        EVENT_COLUMNS
    ))?;
    let rows = stmt.query_map([session_id], row_to_event)?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

pub(crate) fn load_sessions_events(
    conn: &Connection,
    session_ids: &BTreeSet<String>,
) -> Result<Vec<Event>> {
    let mut events = Vec::new();
    for session_id in session_ids {
        events.extend(load_session_events(conn, session_id)?);
    }
    Ok(events)
}

/// One keyset page of events in `range`, ordered by `(created_at, id)` and
/// strictly after `after` when given.
pub(crate) fn load_event_page(
    conn: &Connection,
    range: TimeRange,
    after: Option<(i64, &str)>,
    limit: usize,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare_cached(&format!(
        r#"
        SELECT {}
        FROM usage_event
        WHERE created_at >= ?1 AND created_at < ?2
          AND (?3 IS NULL OR created_at > ?3 OR (created_at = ?3 AND id > ?4))
        ORDER BY created_at, id
        LIMIT ?5
        "#,
        EVENT_COLUMNS
    ))?;
    let (after_ts, after_id) = match after {
        Some((ts, id)) => (Some(ts), Some(id)),
        None => (None, None),
    };
    let rows = stmt.query_map(
        params![range.start_ms, range.end_ms, after_ts, after_id, limit as i64],
        row_to_event,
    )?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

impl Db {
    /// Event-store write: idempotent on event id, first write wins. The batch
    /// commits atomically or not at all.
    pub fn upsert_events(&mut self, events: &[Event]) -> Result<BTreeSet<String>> {
        let tx = self.conn.transaction()?;
        let applied = insert_events(&tx, events)?;
        tx.commit()?;
        Ok(applied.affected_sessions)
    }

    pub fn upsert_event(&mut self, event: &Event) -> Result<BTreeSet<String>> {
        self.upsert_events(std::slice::from_ref(event))
    }

    pub fn get_event(&self, id: &str) -> Result<Option<Event>> {
        let event = self
            .conn
            .query_row(
                &format!("SELECT {} FROM usage_event WHERE id = ?1", EVENT_COLUMNS),
                [id],
                row_to_event,
            )
            .optional()?;
        Ok(event)
    }

    pub fn list_session_events(&self, session_id: &str) -> Result<Vec<Event>> {
        load_session_events(&self.conn, session_id)
    }

    pub fn list_events_in_range(&self, range: TimeRange) -> Result<Vec<Event>> {
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT {}
            FROM usage_event
            WHERE created_at >= ?1 AND created_at < ?2
            ORDER BY created_at, id
            "#,
            EVENT_COLUMNS
        ))?;
        let rows = stmt.query_map(params![range.start_ms, range.end_ms], row_to_event)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn count_events(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM usage_event", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}
