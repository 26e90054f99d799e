use rusqlite::Row;
use rusqlite::types::Type;
use usage_core::{
    BucketMetrics, CodeDiff, DimensionKey, Event, Granularity, Role, SessionSummary,
    SourceMetadata, StatBucket, TokenCounts,
};

pub(crate) const EVENT_COLUMNS: &str = r#"
    id, session_id, role, created_at, completed_at, provider_id, model_id,
    agent, mode, variant, project_root, cwd, tool_id,
    input_tokens, output_tokens, reasoning_tokens, cache_read_tokens, cache_write_tokens,
    cost_usd, diff_additions, diff_deletions, diff_files, finish
"#;

pub(crate) const SESSION_COLUMNS: &str = r#"
    session_id, first_event_at, last_event_at, user_messages, agent_messages,
    input_tokens, output_tokens, reasoning_tokens, cache_read_tokens, cache_write_tokens,
    cost_usd, additions, deletions, files_changed, is_orphan, project_root, project_name,
    finish_state
"#;

pub(crate) const SOURCE_COLUMNS: &str = r#"
    source_key, tool_id, content_hash, last_synced_at, event_count,
    first_event_at, last_event_at, source_exists
"#;

pub(crate) const STAT_COLUMNS: &str = r#"
    bucket_start, project, provider, model, role, agent, tool,
    session_count, message_count, input_tokens, output_tokens, reasoning_tokens,
    cache_read_tokens, cache_write_tokens, duration_ms, cost_usd, net_code_lines,
    file_count, last_event_at
"#;

fn get_u64(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    Ok(row.get::<_, i64>(idx)? as u64)
}

fn get_opt_u64(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<u64>> {
    Ok(row.get::<_, Option<i64>>(idx)?.map(|value| value as u64))
}

fn get_role(row: &Row<'_>, idx: usize) -> rusqlite::Result<Role> {
    let raw: String = row.get(idx)?;
    Role::parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unknown role: {}", raw).into(),
        )
    })
}

pub(crate) fn row_to_event(row: &Row<'_>) -> rusqlite::Result<Event> {
    let additions = get_opt_u64(row, 19)?;
    let deletions = get_opt_u64(row, 20)?;
    let files = get_opt_u64(row, 21)?;
    let diff = if additions.is_some() || deletions.is_some() || files.is_some() {
        Some(CodeDiff {
            additions: additions.unwrap_or(0),
            deletions: deletions.unwrap_or(0),
            files: files.unwrap_or(0),
        })
    } else {
        None
    };
    Ok(Event {
        id: row.get(0)?,
        session_id: row.get(1)?,
        role: get_role(row, 2)?,
        created_at: row.get(3)?,
        completed_at: row.get(4)?,
        provider_id: row.get(5)?,
        model_id: row.get(6)?,
        agent: row.get(7)?,
        mode: row.get(8)?,
        variant: row.get(9)?,
        project_root: row.get(10)?,
        cwd: row.get(11)?,
        tool_id: row.get(12)?,
        tokens: TokenCounts {
            input: get_opt_u64(row, 13)?,
            output: get_opt_u64(row, 14)?,
            reasoning: get_opt_u64(row, 15)?,
            cache_read: get_u64(row, 16)?,
            cache_write: get_u64(row, 17)?,
        },
        cost_usd: row.get(18)?,
        diff,
        finish: row.get(22)?,
    })
}

pub(crate) fn row_to_session(row: &Row<'_>) -> rusqlite::Result<SessionSummary> {
    Ok(SessionSummary {
        session_id: row.get(0)?,
        first_event_at: row.get(1)?,
        last_event_at: row.get(2)?,
        user_messages: get_u64(row, 3)?,
        agent_messages: get_u64(row, 4)?,
        input_tokens: get_u64(row, 5)?,
        output_tokens: get_u64(row, 6)?,
        reasoning_tokens: get_u64(row, 7)?,
        cache_read_tokens: get_u64(row, 8)?,
        cache_write_tokens: get_u64(row, 9)?,
        cost_usd: row.get(10)?,
        additions: get_u64(row, 11)?,
        deletions: get_u64(row, 12)?,
        files_changed: get_u64(row, 13)?,
        is_orphan: row.get::<_, i64>(14)? != 0,
        project_root: row.get(15)?,
        project_name: row.get(16)?,
        finish_state: row.get(17)?,
    })
}

pub(crate) fn row_to_source(row: &Row<'_>) -> rusqlite::Result<SourceMetadata> {
    Ok(SourceMetadata {
        source_key: row.get(0)?,
        tool_id: row.get(1)?,
        content_hash: row.get(2)?,
        last_synced_at: row.get(3)?,
        event_count: get_u64(row, 4)?,
        first_event_at: row.get(5)?,
        last_event_at: row.get(6)?,
        exists: row.get::<_, i64>(7)? != 0,
    })
}

pub(crate) fn row_to_stat_bucket(
    granularity: Granularity,
    row: &Row<'_>,
) -> rusqlite::Result<StatBucket> {
    Ok(StatBucket {
        granularity,
        bucket_start: row.get(0)?,
        dimension: DimensionKey {
            project: row.get(1)?,
            provider: row.get(2)?,
            model: row.get(3)?,
            role: row.get(4)?,
            agent: row.get(5)?,
            tool: row.get(6)?,
        },
        metrics: BucketMetrics {
            session_count: get_u64(row, 7)?,
            message_count: get_u64(row, 8)?,
            input_tokens: get_u64(row, 9)?,
            output_tokens: get_u64(row, 10)?,
            reasoning_tokens: get_u64(row, 11)?,
            cache_read_tokens: get_u64(row, 12)?,
            cache_write_tokens: get_u64(row, 13)?,
            duration_ms: row.get(14)?,
            cost_usd: row.get(15)?,
            net_code_lines: row.get(16)?,
            file_count: get_u64(row, 17)?,
            last_event_at: row.get(18)?,
        },
    })
}
