pub mod config;
pub mod error;
pub mod startup;
pub mod sync;

pub use config::{ConfigLoad, SyncConfig, load_or_create};
pub use error::{AppError, Result};
pub use startup::{AppPaths, ensure_app_data_dir, open_store};
pub use sync::{
    AdapterFailure, DataChangedListener, PassReport, SyncCoordinator, SyncState, SyncStrategy,
};
