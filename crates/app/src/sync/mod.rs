mod coordinator;
mod scheduler;
mod strategy;
mod watcher;

pub use coordinator::{
    AdapterFailure, DataChangedListener, PassReport, SyncCoordinator, SyncState,
};
pub use strategy::SyncStrategy;
