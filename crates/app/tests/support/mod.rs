#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver};

use ingest::{AdapterRegistry, MessageFileParser, Parser, SourceKind, ToolAdapter};
use parking_lot::Mutex;
use tempfile::TempDir;
use usage_app::{DataChangedListener, SyncConfig, SyncCoordinator};

pub struct TestEnv {
    pub _dir: TempDir,
    pub db_path: PathBuf,
    pub messages: PathBuf,
}

pub fn setup_env() -> TestEnv {
    let dir = tempfile::tempdir().expect("temp dir");
    let db_path = dir.path().join("usage.sqlite");
    let messages = dir.path().join("messages");
    fs::create_dir_all(&messages).expect("messages dir");
    TestEnv {
        _dir: dir,
        db_path,
        messages,
    }
}

pub fn write_message(dir: &Path, id: &str, session: &str, created: i64, input: u64) -> PathBuf {
    let path = dir.join(format!("{id}.json"));
    let body = format!(
        r#"{{"id":"{id}","sessionID":"{session}","role":"assistant","time":{{"created":{created}}},
            "providerID":"openai","modelID":"gpt-5","tokens":{{"input":{input},"output":2}}}}"#
    );
    fs::write(&path, body).expect("write message");
    path
}

pub fn adapter(tool_id: &str, dir: &Path, parser: Arc<dyn Parser>) -> ToolAdapter {
    ToolAdapter::with_dir(
        tool_id,
        tool_id,
        SourceKind::json_files(),
        parser,
        dir.to_path_buf(),
    )
}

pub fn file_registry(dir: &Path) -> AdapterRegistry {
    let mut registry = AdapterRegistry::new();
    registry.register(adapter("opencode", dir, Arc::new(MessageFileParser)));
    registry
}

pub fn fast_config(strategy: &str) -> SyncConfig {
    SyncConfig {
        default_strategy: strategy.to_string(),
        debounce_ms: 50,
        watch_poll_ms: 20,
        ..SyncConfig::default()
    }
}

/// Listener that reports every data-changed notification on a channel.
pub fn channel_listener(coordinator: &SyncCoordinator) -> Receiver<()> {
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let listener: DataChangedListener = Arc::new(move || {
        let _ = tx.lock().send(());
    });
    coordinator.subscribe(listener);
    rx
}
