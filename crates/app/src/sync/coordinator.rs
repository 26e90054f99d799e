use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use ingest::{AdapterRegistry, SourceKind, SyncProgress};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use usage_db::Db;

use crate::config::SyncConfig;
use crate::error::{AppError, Result};
use crate::startup::open_store;
use crate::sync::scheduler::IntervalScheduler;
use crate::sync::strategy::SyncStrategy;
use crate::sync::watcher::{BatchHandler, SyncWatcher, WatchTarget};

pub type DataChangedListener = Arc<dyn Fn() + Send + Sync>;

/// Observable state of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Watching,
    Scheduled(Duration),
}

enum ActiveMode {
    Idle,
    Watching(SyncWatcher),
    Scheduled {
        interval: Duration,
        scheduler: IntervalScheduler,
    },
}

impl ActiveMode {
    fn state(&self) -> SyncState {
        match self {
            Self::Idle => SyncState::Idle,
            Self::Watching(_) => SyncState::Watching,
            Self::Scheduled { interval, .. } => SyncState::Scheduled(*interval),
        }
    }

    fn shutdown(self) {
        match self {
            Self::Idle => {}
            Self::Watching(mut watcher) => watcher.stop(),
            Self::Scheduled { mut scheduler, .. } => scheduler.stop(),
        }
    }
}

/// An adapter whose whole directory pass failed.
#[derive(Debug, Clone)]
pub struct AdapterFailure {
    pub tool_id: String,
    pub message: String,
}

/// Outcome of one full pass over every registered adapter.
#[derive(Debug, Clone, Default)]
pub struct PassReport {
    pub progress: SyncProgress,
    pub adapters_attempted: usize,
    pub failures: Vec<AdapterFailure>,
    pub repaired: bool,
}

impl PassReport {
    pub fn changed(&self) -> bool {
        self.repaired || self.progress.events_inserted > 0
    }
}

/// Clears the in-flight flag when the pass ends, however it ends.
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct Inner {
    db_path: PathBuf,
    config: SyncConfig,
    registry: AdapterRegistry,
    mode: Mutex<ActiveMode>,
    in_flight: AtomicBool,
    listeners: Mutex<Vec<DataChangedListener>>,
}

impl Inner {
    fn open_db(&self) -> Result<Db> {
        open_store(&self.db_path, &self.config)
    }

    fn notify_listeners(&self) {
        let listeners = self.listeners.lock().clone();
        for listener in listeners {
            listener();
        }
    }

    fn run_pass(&self, repair: bool) -> Result<Option<PassReport>> {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            debug!("sync pass already running; request coalesced");
            return Ok(None);
        };
        let mut db = self.open_db()?;
        let mut report = PassReport::default();

        if repair && db.derived_tables_need_rebuild()? {
            info!("derived tables missing; rebuilding sessions and rollups");
            db.rebuild_all()?;
            report.repaired = true;
        }

        for adapter in self.registry.iter() {
            report.adapters_attempted += 1;
            match ingest::sync_adapter(&mut db, adapter) {
                Ok(progress) => report.progress.merge(progress),
                Err(err) => {
                    error!("{} sync failed: {}", adapter.tool_id, err);
                    report.failures.push(AdapterFailure {
                        tool_id: adapter.tool_id.clone(),
                        message: err.to_string(),
                    });
                }
            }
        }

        info!(
            "sync pass: adapters={} failed={} imported={} skipped={} events={}",
            report.adapters_attempted,
            report.failures.len(),
            report.progress.imported,
            report.progress.skipped,
            report.progress.events_inserted
        );
        if report.changed() {
            self.notify_listeners();
        }
        if report.adapters_attempted > 0 && report.failures.len() == report.adapters_attempted {
            return Err(AppError::AllAdaptersFailed(report.adapters_attempted));
        }
        Ok(Some(report))
    }

    fn trigger(&self, reason: &str) {
        debug!("sync triggered by {}", reason);
        if let Err(err) = self.run_pass(false) {
            error!("{} sync failed: {}", reason, err);
        }
    }

    fn watch_targets(&self) -> Vec<WatchTarget> {
        self.registry
            .iter()
            .filter_map(|adapter| {
                let dir = adapter.resolve_dir()?;
                let recursive = matches!(adapter.kind, SourceKind::Files { .. });
                Some(WatchTarget { dir, recursive })
            })
            .collect()
    }

    fn enter(self: &Arc<Self>, strategy: SyncStrategy) -> Result<ActiveMode> {
        let weak: Weak<Self> = Arc::downgrade(self);
        match strategy {
            SyncStrategy::Auto => {
                let on_batch: BatchHandler = Arc::new(move |paths: Vec<PathBuf>| {
                    if let Some(inner) = weak.upgrade() {
                        debug!("{} changed paths", paths.len());
                        inner.trigger("file change");
                    }
                });
                let watcher = SyncWatcher::start(
                    &self.watch_targets(),
                    self.config.debounce(),
                    self.config.watch_poll(),
                    on_batch,
                )?;
                Ok(ActiveMode::Watching(watcher))
            }
            SyncStrategy::Interval(interval) => {
                let scheduler = IntervalScheduler::start(interval, move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.trigger("timer");
                    }
                })?;
                Ok(ActiveMode::Scheduled {
                    interval,
                    scheduler,
                })
            }
        }
    }

    fn apply_strategy(self: &Arc<Self>, strategy: SyncStrategy) -> Result<()> {
        let mut mode = self.mode.lock();
        let previous = std::mem::replace(&mut *mode, ActiveMode::Idle);
        let previous_state = previous.state();
        previous.shutdown();
        *mode = self.enter(strategy)?;
        info!("sync mode {:?} -> {:?}", previous_state, mode.state());
        Ok(())
    }
}

/// Drives ingestion for every registered adapter: an initial catch-up pass,
/// then either a debounced file watch or a fixed-interval schedule. At most
/// one pass runs at a time and at most one steady-state mode is active.
#[derive(Clone)]
pub struct SyncCoordinator {
    inner: Arc<Inner>,
}

impl SyncCoordinator {
    pub fn new(db_path: PathBuf, config: SyncConfig, registry: AdapterRegistry) -> Self {
        Self {
            inner: Arc::new(Inner {
                db_path,
                config,
                registry,
                mode: Mutex::new(ActiveMode::Idle),
                in_flight: AtomicBool::new(false),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn subscribe(&self, listener: DataChangedListener) {
        self.inner.listeners.lock().push(listener);
    }

    pub fn state(&self) -> SyncState {
        self.inner.mode.lock().state()
    }

    pub fn is_syncing(&self) -> bool {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// Persisted strategy, else the configured default. An unreadable
    /// stored value is ignored.
    pub fn configured_strategy(&self) -> Result<SyncStrategy> {
        let db = self.inner.open_db()?;
        if let Some(raw) = db.get_sync_strategy()? {
            match SyncStrategy::parse(&raw) {
                Ok(strategy) => return Ok(strategy),
                Err(err) => warn!("ignoring stored sync strategy: {}", err),
            }
        }
        self.inner.config.default_strategy()
    }

    /// Catch-up pass, then the steady-state mode for the configured strategy.
    pub fn start(&self) -> Result<Option<PassReport>> {
        let report = match self.perform_initial_sync() {
            Ok(report) => report,
            Err(AppError::AllAdaptersFailed(count)) => {
                warn!("initial sync: all {} adapters failed", count);
                None
            }
            Err(err) => return Err(err),
        };
        let strategy = self.configured_strategy()?;
        self.inner.apply_strategy(strategy)?;
        Ok(report)
    }

    /// Persists `strategy` and switches to it.
    pub fn set_strategy(&self, strategy: SyncStrategy) -> Result<()> {
        let db = self.inner.open_db()?;
        db.set_sync_strategy(&strategy.to_setting())?;
        self.on_strategy_changed(strategy)
    }

    /// Tears down the current mode and enters the one for `strategy`.
    pub fn on_strategy_changed(&self, strategy: SyncStrategy) -> Result<()> {
        self.inner.apply_strategy(strategy)
    }

    pub fn stop(&self) {
        let previous = std::mem::replace(&mut *self.inner.mode.lock(), ActiveMode::Idle);
        previous.shutdown();
    }

    /// Repairs missing derived tables, then runs one full pass.
    pub fn perform_initial_sync(&self) -> Result<Option<PassReport>> {
        self.inner.run_pass(true)
    }

    /// One pass over every adapter. `Ok(None)` when another pass was already
    /// running.
    pub fn perform_full_sync(&self) -> Result<Option<PassReport>> {
        self.inner.run_pass(false)
    }

    /// Runs a full pass on a background thread; the receiver yields its
    /// result once.
    pub fn spawn_full_sync(&self) -> Receiver<Result<Option<PassReport>>> {
        let (tx, rx) = mpsc::channel();
        let inner = self.inner.clone();
        thread::spawn(move || {
            let _ = tx.send(inner.run_pass(false));
        });
        rx
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let previous = std::mem::replace(self.mode.get_mut(), ActiveMode::Idle);
        previous.shutdown();
    }
}
