use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;

use crate::error::Result;
use crate::sync::scheduler::join_unless_current;

pub(crate) type BatchHandler = Arc<dyn Fn(Vec<PathBuf>) + Send + Sync>;

/// A directory to watch and whether its subdirectories count.
#[derive(Debug, Clone)]
pub(crate) struct WatchTarget {
    pub(crate) dir: PathBuf,
    pub(crate) recursive: bool,
}

impl WatchTarget {
    fn mode(&self) -> RecursiveMode {
        if self.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        }
    }
}

#[derive(Default)]
struct Pending {
    paths: Vec<PathBuf>,
    last_event: Option<Instant>,
}

fn is_scratch_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
        return true;
    };
    name.ends_with(".swp") || name.ends_with(".tmp") || name.ends_with('~') || name == "4913"
}

/// Attaches every target whose directory now exists and queues the
/// directory itself, so files written before the watch began are picked up
/// by the next pass. Returns the targets that are still missing.
fn attach_appeared(
    watcher: &Mutex<RecommendedWatcher>,
    missing: Vec<WatchTarget>,
    pending: &Mutex<Pending>,
) -> Vec<WatchTarget> {
    let mut still_missing = Vec::new();
    for target in missing {
        if !target.dir.is_dir() {
            still_missing.push(target);
            continue;
        }
        if let Err(err) = watcher.lock().watch(&target.dir, target.mode()) {
            warn!("cannot watch {} yet: {:?}", target.dir.display(), err);
            still_missing.push(target);
            continue;
        }
        info!("watching {} after it appeared", target.dir.display());
        let mut pending = pending.lock();
        pending.last_event = Some(Instant::now());
        if !pending.paths.contains(&target.dir) {
            pending.paths.push(target.dir);
        }
    }
    still_missing
}

/// File-system watcher that batches change notifications and hands a batch
/// to `on_batch` once no new change arrived for the debounce window.
/// Targets missing at start are re-checked every poll tick and attached
/// once their directory exists.
pub(crate) struct SyncWatcher {
    _watcher: Arc<Mutex<RecommendedWatcher>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SyncWatcher {
    pub(crate) fn start(
        targets: &[WatchTarget],
        debounce: Duration,
        poll: Duration,
        on_batch: BatchHandler,
    ) -> Result<Self> {
        let pending = Arc::new(Mutex::new(Pending::default()));
        let pending_events = pending.clone();
        let config = Config::default().with_poll_interval(poll);
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if !(event.kind.is_create() || event.kind.is_modify() || event.kind.is_remove()) {
                        return;
                    }
                    let mut pending = pending_events.lock();
                    pending.last_event = Some(Instant::now());
                    for path in event.paths {
                        if !is_scratch_file(&path) && !pending.paths.contains(&path) {
                            pending.paths.push(path);
                        }
                    }
                }
                Err(err) => error!("file watcher error: {:?}", err),
            },
            config,
        )?;

        let mut missing = Vec::new();
        for target in targets {
            if !target.dir.is_dir() {
                warn!(
                    "{} not found; watching for it to appear",
                    target.dir.display()
                );
                missing.push(target.clone());
                continue;
            }
            watcher.watch(&target.dir, target.mode())?;
            info!("watching {}", target.dir.display());
        }
        let watcher = Arc::new(Mutex::new(watcher));
        let attach_watcher = watcher.clone();

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let handle = thread::Builder::new()
            .name("sync-watcher".to_string())
            .spawn(move || {
                while !stop_flag.load(Ordering::SeqCst) {
                    thread::sleep(poll);
                    if !missing.is_empty() {
                        missing = attach_appeared(&attach_watcher, missing, &pending);
                    }
                    let batch = {
                        let mut pending = pending.lock();
                        let quiet = pending
                            .last_event
                            .is_some_and(|last| last.elapsed() >= debounce);
                        if pending.paths.is_empty() || !quiet {
                            continue;
                        }
                        std::mem::take(&mut pending.paths)
                    };
                    if stop_flag.load(Ordering::SeqCst) {
                        break;
                    }
                    debug!("dispatching {} changed paths", batch.len());
                    on_batch(batch);
                }
            })?;

        Ok(Self {
            _watcher: watcher,
            stop,
            handle: Some(handle),
        })
    }

    pub(crate) fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            join_unless_current(handle);
        }
    }
}

impl Drop for SyncWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
