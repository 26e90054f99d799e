mod support;

use std::path::Path;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;

use ingest::{AdapterRegistry, MessageFileParser, ParseError, ParsedSource, Parser};
use parking_lot::Mutex;
use support::{
    adapter, channel_listener, fast_config, file_registry, setup_env, write_message,
};
use usage_app::{AppError, SyncConfig, SyncCoordinator, SyncState, SyncStrategy, open_store};
use usage_core::{Event, Role, TokenCounts};

/// Parser that announces entry and then waits for a release signal.
struct GateParser {
    entered: Mutex<Sender<()>>,
    release: Mutex<Receiver<()>>,
}

impl Parser for GateParser {
    fn parse(&self, path: &Path) -> Result<ParsedSource, ParseError> {
        let _ = self.entered.lock().send(());
        let _ = self.release.lock().recv_timeout(Duration::from_secs(10));
        MessageFileParser.parse(path)
    }
}

#[test]
fn overlapping_requests_are_coalesced() {
    let env = setup_env();
    write_message(&env.messages, "m1", "s1", 1_000, 10);
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let gate = GateParser {
        entered: Mutex::new(entered_tx),
        release: Mutex::new(release_rx),
    };
    let mut registry = AdapterRegistry::new();
    registry.register(adapter("gated", &env.messages, Arc::new(gate)));
    let coordinator = SyncCoordinator::new(env.db_path.clone(), SyncConfig::default(), registry);

    let pending = coordinator.spawn_full_sync();
    entered_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("pass entered parser");
    assert!(coordinator.is_syncing());
    let coalesced = coordinator.perform_full_sync().expect("second request");
    assert!(coalesced.is_none());

    release_tx.send(()).expect("release");
    let report = pending
        .recv_timeout(Duration::from_secs(10))
        .expect("completion")
        .expect("pass")
        .expect("report");
    assert_eq!(report.progress.events_inserted, 1);
    assert!(!coordinator.is_syncing());
    assert!(coordinator.perform_full_sync().expect("third").is_some());
}

#[test]
fn failing_adapter_does_not_block_the_others() {
    let env = setup_env();
    write_message(&env.messages, "m1", "s1", 1_000, 10);
    let not_a_dir = write_message(env._dir.path(), "stray", "s0", 1, 1);
    let mut registry = file_registry(&env.messages);
    registry.register(adapter("broken", &not_a_dir, Arc::new(MessageFileParser)));
    let coordinator = SyncCoordinator::new(env.db_path.clone(), SyncConfig::default(), registry);
    let changes = channel_listener(&coordinator);

    let report = coordinator
        .perform_full_sync()
        .expect("pass")
        .expect("report");
    assert_eq!(report.adapters_attempted, 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].tool_id, "broken");
    assert_eq!(report.progress.events_inserted, 1);
    assert!(changes.try_recv().is_ok());

    let quiet = coordinator
        .perform_full_sync()
        .expect("pass")
        .expect("report");
    assert_eq!(quiet.progress.events_inserted, 0);
    assert!(changes.try_recv().is_err());
}

#[test]
fn total_adapter_failure_is_an_error() {
    let env = setup_env();
    let not_a_dir = write_message(env._dir.path(), "stray", "s0", 1, 1);
    let mut registry = AdapterRegistry::new();
    registry.register(adapter("broken", &not_a_dir, Arc::new(MessageFileParser)));
    let coordinator = SyncCoordinator::new(env.db_path.clone(), SyncConfig::default(), registry);

    let err = coordinator.perform_full_sync().expect_err("all failed");
    assert!(matches!(err, AppError::AllAdaptersFailed(1)));
    assert!(!coordinator.is_syncing());
}

#[test]
fn strategy_changes_switch_modes_and_persist() {
    let env = setup_env();
    let coordinator = SyncCoordinator::new(
        env.db_path.clone(),
        fast_config("3600"),
        file_registry(&env.messages),
    );
    assert_eq!(coordinator.state(), SyncState::Idle);

    coordinator.start().expect("start");
    assert_eq!(
        coordinator.state(),
        SyncState::Scheduled(Duration::from_secs(3600))
    );

    coordinator.set_strategy(SyncStrategy::Auto).expect("auto");
    assert_eq!(coordinator.state(), SyncState::Watching);

    coordinator
        .set_strategy(SyncStrategy::Interval(Duration::from_secs(120)))
        .expect("interval");
    assert_eq!(
        coordinator.state(),
        SyncState::Scheduled(Duration::from_secs(120))
    );

    coordinator.stop();
    assert_eq!(coordinator.state(), SyncState::Idle);

    let reopened = SyncCoordinator::new(
        env.db_path.clone(),
        fast_config("auto"),
        file_registry(&env.messages),
    );
    assert_eq!(
        reopened.configured_strategy().expect("strategy"),
        SyncStrategy::Interval(Duration::from_secs(120))
    );
}

#[test]
fn scheduled_mode_runs_passes_on_the_timer() {
    let env = setup_env();
    let coordinator = SyncCoordinator::new(
        env.db_path.clone(),
        fast_config("1"),
        file_registry(&env.messages),
    );
    let changes = channel_listener(&coordinator);
    coordinator.start().expect("start");
    assert!(changes.try_recv().is_err());

    write_message(&env.messages, "m1", "s1", 1_000, 10);
    changes
        .recv_timeout(Duration::from_secs(5))
        .expect("timer pass imported");
    coordinator.stop();

    let db = open_store(&env.db_path, &SyncConfig::default()).expect("open");
    assert_eq!(db.count_events().expect("count"), 1);
}

#[test]
fn watching_mode_syncs_after_file_changes() {
    let env = setup_env();
    let coordinator = SyncCoordinator::new(
        env.db_path.clone(),
        fast_config("auto"),
        file_registry(&env.messages),
    );
    let changes = channel_listener(&coordinator);
    coordinator.start().expect("start");
    assert_eq!(coordinator.state(), SyncState::Watching);

    write_message(&env.messages, "m1", "s1", 1_000, 10);
    changes
        .recv_timeout(Duration::from_secs(5))
        .expect("watch pass imported");
    coordinator.stop();
}

#[test]
fn watching_mode_picks_up_a_source_dir_created_later() {
    let env = setup_env();
    let later = env._dir.path().join("later/messages");
    let coordinator = SyncCoordinator::new(
        env.db_path.clone(),
        fast_config("auto"),
        file_registry(&later),
    );
    let changes = channel_listener(&coordinator);
    let report = coordinator.start().expect("start").expect("report");
    assert_eq!(report.progress.total, 0);
    assert_eq!(coordinator.state(), SyncState::Watching);

    std::fs::create_dir_all(&later).expect("create source dir");
    write_message(&later, "m1", "s1", 1_000, 10);
    changes
        .recv_timeout(Duration::from_secs(5))
        .expect("pass after dir appeared");
    coordinator.stop();

    let db = open_store(&env.db_path, &SyncConfig::default()).expect("open");
    assert_eq!(db.count_events().expect("count"), 1);
}

#[test]
fn initial_sync_repairs_missing_derived_tables() {
    let env = setup_env();
    let mut db = open_store(&env.db_path, &SyncConfig::default()).expect("open");
    let event = Event {
        id: "e1".to_string(),
        session_id: "s1".to_string(),
        role: Role::User,
        created_at: 1_000,
        completed_at: None,
        provider_id: "openai".to_string(),
        model_id: "gpt-5".to_string(),
        agent: None,
        mode: None,
        variant: None,
        project_root: None,
        cwd: None,
        tool_id: "opencode".to_string(),
        tokens: TokenCounts::default(),
        cost_usd: 0.0,
        diff: None,
        finish: None,
    };
    db.upsert_event(&event).expect("raw upsert");
    assert!(db.get_session("s1").expect("get").is_none());

    let coordinator = SyncCoordinator::new(
        env.db_path.clone(),
        SyncConfig::default(),
        AdapterRegistry::new(),
    );
    let changes = channel_listener(&coordinator);
    let report = coordinator
        .perform_initial_sync()
        .expect("initial")
        .expect("report");
    assert!(report.repaired);
    assert!(changes.try_recv().is_ok());
    assert!(db.get_session("s1").expect("get").is_some());
    assert!(!db.derived_tables_need_rebuild().expect("check"));
}
