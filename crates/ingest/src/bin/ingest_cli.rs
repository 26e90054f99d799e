use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use ingest::{
    AdapterRegistry, MessageDbParser, MessageFileParser, OPENCODE_DB_TOOL_ID, OPENCODE_TOOL_ID,
    SourceKind, SyncProgress, ToolAdapter, sync_adapter,
};
use log::error;
use usage_db::Db;

fn adapter_for(dir: PathBuf) -> ToolAdapter {
    if dir.is_file() {
        let file_name = dir
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        let parent = dir.parent().map(PathBuf::from).unwrap_or_default();
        return ToolAdapter::with_dir(
            OPENCODE_DB_TOOL_ID,
            "OpenCode (database)",
            SourceKind::Database { file_name },
            Arc::new(MessageDbParser),
            parent,
        );
    }
    ToolAdapter::with_dir(
        OPENCODE_TOOL_ID,
        "OpenCode",
        SourceKind::json_files(),
        Arc::new(MessageFileParser),
        dir,
    )
}

fn print_progress(label: &str, progress: &SyncProgress) {
    println!("[{}]", label);
    println!("total {}", progress.total);
    println!("imported {}", progress.imported);
    println!("skipped {}", progress.skipped);
    println!("failed {}", progress.failed);
    println!("events_inserted {}", progress.events_inserted);
    for issue in &progress.issues {
        println!("issue {:?} {}: {}", issue.kind, issue.file_path, issue.message);
    }
}

fn main() {
    env_logger::init();
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 || args.len() > 3 {
        eprintln!("usage: ingest_cli <db-path> [source-dir|database-file]");
        std::process::exit(2);
    }

    let mut db = Db::open(&args[1]).unwrap_or_else(|err| {
        eprintln!("failed to open {}: {}", args[1], err);
        std::process::exit(1);
    });
    if let Err(err) = db.migrate() {
        eprintln!("failed to migrate {}: {}", args[1], err);
        std::process::exit(1);
    }

    let adapters: Vec<ToolAdapter> = match args.get(2) {
        Some(path) => vec![adapter_for(PathBuf::from(path))],
        None => AdapterRegistry::with_defaults().iter().cloned().collect(),
    };

    let mut failures = 0usize;
    for adapter in &adapters {
        match sync_adapter(&mut db, adapter) {
            Ok(progress) => print_progress(&adapter.tool_id, &progress),
            Err(err) => {
                error!("{} failed: {}", adapter.tool_id, err);
                failures += 1;
            }
        }
    }
    if failures == adapters.len() {
        std::process::exit(3);
    }
}
