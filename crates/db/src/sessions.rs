use std::collections::BTreeSet;

use rusqlite::{Connection, OptionalExtension, params};
use usage_core::{Event, Role, SessionSummary, project_name_from_root};

use crate::Db;
use crate::error::Result;
use crate::events::load_session_events;
use crate::helpers::{EVENT_COLUMNS, SESSION_COLUMNS, row_to_event, row_to_session};
use crate::rollups;

/// Folds a session's events, ordered by `(created_at, id)`, into its summary.
/// Both the full rebuild and the targeted recalculation go through here.
pub(crate) fn summarize_session(session_id: &str, events: &[Event]) -> Option<SessionSummary> {
    let first = events.first()?;
    let mut summary = SessionSummary {
        session_id: session_id.to_string(),
        first_event_at: first.created_at,
        last_event_at: first.created_at,
        ..SessionSummary::default()
    };
    for event in events {
        summary.first_event_at = summary.first_event_at.min(event.created_at);
        summary.last_event_at = summary
            .last_event_at
            .max(event.created_at)
            .max(event.completed_at.unwrap_or(event.created_at));
        match event.role {
            Role::User => summary.user_messages += 1,
            Role::Assistant => summary.agent_messages += 1,
            Role::System => {}
        }
        summary.input_tokens += event.tokens.input_or_zero();
        summary.output_tokens += event.tokens.output_or_zero();
        summary.reasoning_tokens += event.tokens.reasoning_or_zero();
        summary.cache_read_tokens += event.tokens.cache_read;
        summary.cache_write_tokens += event.tokens.cache_write;
        summary.cost_usd += event.cost_usd;
        if let Some(diff) = event.diff {
            summary.additions += diff.additions;
            summary.deletions += diff.deletions;
            summary.files_changed += diff.files;
        }
        if summary.project_root.is_none()
            && let Some(root) = event.project_root.as_deref()
            && project_name_from_root(root).is_some()
        {
            summary.project_root = Some(root.to_string());
        }
        if let Some(finish) = event.finish.as_ref() {
            summary.finish_state = Some(finish.clone());
        }
    }
    summary.project_name = summary
        .project_root
        .as_deref()
        .and_then(project_name_from_root);
    summary.is_orphan = summary.project_name.is_none();
    Some(summary)
}

fn write_session(conn: &Connection, summary: &SessionSummary) -> Result<()> {
    let mut stmt = conn.prepare_cached(&format!(
        r#"
        INSERT OR REPLACE INTO session_summary ({})
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
        "#,
        SESSION_COLUMNS
    ))?;
    stmt.execute(params![
        summary.session_id,
        summary.first_event_at,
        summary.last_event_at,
        summary.user_messages as i64,
        summary.agent_messages as i64,
        summary.input_tokens as i64,
        summary.output_tokens as i64,
        summary.reasoning_tokens as i64,
        summary.cache_read_tokens as i64,
        summary.cache_write_tokens as i64,
        summary.cost_usd,
        summary.additions as i64,
        summary.deletions as i64,
        summary.files_changed as i64,
        summary.is_orphan as i64,
        summary.project_root,
        summary.project_name,
        summary.finish_state,
    ])?;
    Ok(())
}

fn delete_session_row(conn: &Connection, session_id: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM session_summary WHERE session_id = ?1",
        [session_id],
    )?;
    Ok(())
}

/// Replaces the summary rows of exactly the named sessions.
pub(crate) fn recalculate_sessions(
    conn: &Connection,
    session_ids: &BTreeSet<String>,
) -> Result<()> {
    for session_id in session_ids {
        let events = load_session_events(conn, session_id)?;
        match summarize_session(session_id, &events) {
            Some(summary) => write_session(conn, &summary)?,
            None => delete_session_row(conn, session_id)?,
        }
    }
    Ok(())
}

/// Recomputes every session from the event table, streaming one session at
/// a time.
pub(crate) fn rebuild_all_sessions(conn: &Connection) -> Result<usize> {
    conn.execute("DELETE FROM session_summary", [])?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM usage_event ORDER BY session_id, created_at, id",
        EVENT_COLUMNS
    ))?;
    let mut rows = stmt.query([])?;
    let mut written = 0usize;
    let mut current: Vec<Event> = Vec::new();
    while let Some(row) = rows.next()? {
        let event = row_to_event(row)?;
        if let Some(last) = current.last()
            && last.session_id != event.session_id
        {
            if let Some(summary) = summarize_session(&last.session_id, &current) {
                write_session(conn, &summary)?;
                written += 1;
            }
            current.clear();
        }
        current.push(event);
    }
    if let Some(last) = current.last()
        && let Some(summary) = summarize_session(&last.session_id, &current)
    {
        write_session(conn, &summary)?;
        written += 1;
    }
    Ok(written)
}

impl Db {
    pub fn rebuild_all_sessions(&mut self) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let written = rebuild_all_sessions(&tx)?;
        tx.commit()?;
        Ok(written)
    }

    pub fn recalculate_sessions(&mut self, session_ids: &BTreeSet<String>) -> Result<()> {
        let tx = self.conn.transaction()?;
        recalculate_sessions(&tx, session_ids)?;
        tx.commit()?;
        Ok(())
    }

    /// Removes a session together with its events and withdraws their
    /// contribution from the stat tables, atomically.
    pub fn delete_session(&mut self, session_id: &str) -> Result<bool> {
        let batch_size = self.rollup_batch_size;
        let tx = self.conn.transaction()?;
        let scope = load_session_events(&tx, session_id)?;
        let deleted_events =
            tx.execute("DELETE FROM usage_event WHERE session_id = ?1", [session_id])?;
        delete_session_row(&tx, session_id)?;
        rollups::recalculate_scope(&tx, &scope, batch_size)?;
        tx.commit()?;
        Ok(deleted_events > 0)
    }

    pub fn get_session(&self, session_id: &str) -> Result<Option<SessionSummary>> {
        let summary = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM session_summary WHERE session_id = ?1",
                    SESSION_COLUMNS
                ),
                [session_id],
                row_to_session,
            )
            .optional()?;
        Ok(summary)
    }

    /// Most recently active sessions first.
    pub fn list_sessions(&self, limit: usize) -> Result<Vec<SessionSummary>> {
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT {}
            FROM session_summary
            ORDER BY last_event_at DESC, session_id
            LIMIT ?1
            "#,
            SESSION_COLUMNS
        ))?;
        let rows = stmt.query_map([limit as i64], row_to_session)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn count_sessions(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM session_summary", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use usage_core::{CodeDiff, TokenCounts};

    fn event(id: &str, created_at: i64, role: Role, root: Option<&str>) -> Event {
        Event {
            id: id.to_string(),
            session_id: "s1".to_string(),
            role,
            created_at,
            completed_at: None,
            provider_id: "openai".to_string(),
            model_id: "gpt-5".to_string(),
            agent: None,
            mode: None,
            variant: None,
            project_root: root.map(str::to_string),
            cwd: None,
            tool_id: "opencode".to_string(),
            tokens: TokenCounts {
                input: Some(10),
                output: Some(5),
                reasoning: None,
                cache_read: 1,
                cache_write: 0,
            },
            cost_usd: 0.5,
            diff: None,
            finish: None,
        }
    }

    #[test]
    fn summary_counts_roles_and_sums_tokens() {
        let mut assistant = event("e2", 2_000, Role::Assistant, Some("/srv/app/"));
        assistant.completed_at = Some(9_000);
        assistant.diff = Some(CodeDiff {
            additions: 4,
            deletions: 1,
            files: 2,
        });
        assistant.finish = Some("stop".to_string());
        let events = vec![
            event("e1", 1_000, Role::User, None),
            assistant,
            event("e3", 3_000, Role::System, Some("/srv/other")),
        ];
        let summary = summarize_session("s1", &events).expect("summary");
        assert_eq!(summary.user_messages, 1);
        assert_eq!(summary.agent_messages, 1);
        assert_eq!(summary.input_tokens, 30);
        assert_eq!(summary.reasoning_tokens, 0);
        assert_eq!(summary.first_event_at, 1_000);
        assert_eq!(summary.last_event_at, 9_000);
        assert_eq!(summary.additions, 4);
        assert_eq!(summary.files_changed, 2);
        assert_eq!(summary.project_name.as_deref(), Some("app"));
        assert!(!summary.is_orphan);
        assert_eq!(summary.finish_state.as_deref(), Some("stop"));
    }

    #[test]
    fn summary_without_root_is_orphan() {
        let events = vec![event("e1", 1_000, Role::User, Some("/"))];
        let summary = summarize_session("s1", &events).expect("summary");
        assert!(summary.is_orphan);
        assert_eq!(summary.project_root, None);
    }

    #[test]
    fn empty_session_has_no_summary() {
        assert!(summarize_session("s1", &[]).is_none());
    }
}
