#![allow(dead_code)]

use std::path::PathBuf;

use chrono::DateTime;
use tempfile::TempDir;
use usage_core::{Event, Role, SourceMetadata, TokenCounts};
use usage_db::Db;

pub struct TestDb {
    pub _dir: TempDir,
    pub db: Db,
    pub path: PathBuf,
}

pub fn setup_db() -> TestDb {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("test.sqlite");
    let mut db = Db::open(&path).expect("open db");
    db.migrate().expect("migrate db");
    TestDb {
        _dir: dir,
        db,
        path,
    }
}

pub fn ts(rfc3339: &str) -> i64 {
    DateTime::parse_from_rfc3339(rfc3339)
        .expect("timestamp")
        .timestamp_millis()
}

pub fn make_event(id: &str, session_id: &str, at: &str, input_tokens: u64) -> Event {
    Event {
        id: id.to_string(),
        session_id: session_id.to_string(),
        role: Role::Assistant,
        created_at: ts(at),
        completed_at: None,
        provider_id: "anthropic".to_string(),
        model_id: "claude-sonnet".to_string(),
        agent: Some("build".to_string()),
        mode: None,
        variant: None,
        project_root: Some("/work/usage".to_string()),
        cwd: None,
        tool_id: "opencode".to_string(),
        tokens: TokenCounts {
            input: Some(input_tokens),
            output: Some(input_tokens / 2),
            reasoning: None,
            cache_read: 3,
            cache_write: 1,
        },
        cost_usd: input_tokens as f64 / 1_000.0,
        diff: None,
        finish: None,
    }
}

pub fn make_source(source_key: &str, hash: &str, events: &[Event]) -> SourceMetadata {
    SourceMetadata {
        source_key: source_key.to_string(),
        tool_id: "opencode".to_string(),
        content_hash: hash.to_string(),
        last_synced_at: 1,
        event_count: events.len() as u64,
        first_event_at: events.iter().map(|event| event.created_at).min(),
        last_event_at: events.iter().map(|event| event.created_at).max(),
        exists: true,
    }
}
