use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use log::{debug, info, warn};
use usage_core::{Event, SourceMetadata, SourceStatus};
use usage_db::Db;
use walkdir::WalkDir;

use crate::adapter::{SourceKind, ToolAdapter};
use crate::change::{Fingerprinted, display_path, fingerprint_all, source_key, unkeyable};
use crate::parser::ParseError;
use crate::types::{IngestError, IngestIssue, Result, SourceOutcome, SyncProgress};

fn stamp_tool_id(events: &mut [Event], tool_id: &str) {
    for event in events.iter_mut().filter(|event| event.tool_id.is_empty()) {
        event.tool_id = tool_id.to_string();
    }
}

fn source_metadata(key: String, tool_id: &str, hash: String, events: &[Event]) -> SourceMetadata {
    SourceMetadata {
        source_key: key,
        tool_id: tool_id.to_string(),
        content_hash: hash,
        last_synced_at: Utc::now().timestamp_millis(),
        event_count: events.len() as u64,
        first_event_at: events.iter().map(|event| event.created_at).min(),
        last_event_at: events.iter().map(|event| event.created_at).max(),
        exists: true,
    }
}

fn parse_error(path: &Path, err: ParseError) -> IngestError {
    match err {
        ParseError::Io(source) => IngestError::SourceUnreadable {
            path: path.to_path_buf(),
            source,
        },
        ParseError::Malformed(message) => IngestError::ParseFailure {
            path: path.to_path_buf(),
            message,
        },
    }
}

fn ingest_with_hash(
    db: &mut Db,
    adapter: &ToolAdapter,
    path: &Path,
    hash: String,
) -> Result<SourceOutcome> {
    let key = source_key(path).ok_or_else(|| IngestError::SourceUnreadable {
        path: path.to_path_buf(),
        source: unkeyable(path),
    })?;
    if db.classify_source(&key, &hash)? == SourceStatus::Unchanged {
        return Ok(SourceOutcome::Unchanged);
    }

    let parse_start = Instant::now();
    let mut parsed = adapter
        .parser
        .parse(path)
        .map_err(|err| parse_error(path, err))?;
    stamp_tool_id(&mut parsed.events, &adapter.tool_id);
    let parse_ms = parse_start.elapsed().as_millis();

    let db_start = Instant::now();
    let metadata = source_metadata(key, &adapter.tool_id, hash, &parsed.events);
    let applied = db.apply_source_batch(&parsed.events, &metadata)?;
    debug!(
        "ingest source: {} parse={}ms db={}ms events={} inserted={} sessions={}",
        path.display(),
        parse_ms,
        db_start.elapsed().as_millis(),
        parsed.events.len(),
        applied.events_inserted,
        applied.affected_sessions.len()
    );
    Ok(SourceOutcome::Imported {
        events_inserted: applied.events_inserted,
    })
}

/// Runs the per-source procedure: classify, parse, write events together
/// with their session and rollup updates, then record the new fingerprint.
/// Nothing is recorded when any step fails, so the source is retried on the
/// next pass.
pub fn ingest_source(db: &mut Db, adapter: &ToolAdapter, path: &Path) -> Result<SourceOutcome> {
    let hash = adapter
        .parser
        .fingerprint(path)
        .map_err(|source| IngestError::SourceUnreadable {
            path: path.to_path_buf(),
            source,
        })?;
    ingest_with_hash(db, adapter, path, hash)
}

fn record_issue(progress: &mut SyncProgress, path: &Path, err: &IngestError) {
    warn!("skipping source {}: {}", path.display(), err);
    progress.failed += 1;
    progress.issues.push(IngestIssue {
        file_path: display_path(path),
        kind: err.kind(),
        message: err.to_string(),
    });
}

fn collect_candidates(adapter: &ToolAdapter, dir: &Path, progress: &mut SyncProgress) -> Vec<PathBuf> {
    let walker = match adapter.kind {
        SourceKind::Files { .. } => WalkDir::new(dir),
        SourceKind::Database { .. } => WalkDir::new(dir).max_depth(1),
    };
    let mut candidates = Vec::new();
    for entry in walker.follow_links(false).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let path = err.path().map(Path::to_path_buf).unwrap_or_else(|| dir.to_path_buf());
                progress.total += 1;
                let err = IngestError::SourceUnreadable {
                    path: path.clone(),
                    source: err.into(),
                };
                record_issue(progress, &path, &err);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        progress.total += 1;
        let path = entry.path();
        if !adapter.kind.accepts(dir, path) {
            progress.skipped += 1;
            progress.skipped_paths.push(display_path(path));
        } else if source_key(path).is_none() {
            let err = IngestError::SourceUnreadable {
                path: path.to_path_buf(),
                source: unkeyable(path),
            };
            record_issue(progress, path, &err);
        } else {
            candidates.push(path.to_path_buf());
        }
    }
    candidates
}

/// One pass over an adapter's directory. Per-source failures are collected
/// in the returned progress. The pass itself fails only when `dir` is not a
/// directory or the vanished-source update cannot be stored; a directory
/// that does not exist yet is an empty pass.
pub fn sync_directory(db: &mut Db, adapter: &ToolAdapter, dir: &Path) -> Result<SyncProgress> {
    let mut progress = SyncProgress::default();
    if !dir.exists() {
        debug!("{}: source directory {} not found", adapter.tool_id, dir.display());
        return Ok(progress);
    }
    if !dir.is_dir() {
        return Err(IngestError::SourceUnreadable {
            path: dir.to_path_buf(),
            source: std::io::Error::other("not a directory"),
        });
    }
    let pass_start = Instant::now();

    let candidates = collect_candidates(adapter, dir, &mut progress);
    let present: HashSet<String> = candidates
        .iter()
        .filter_map(|path| source_key(path))
        .collect();
    let hash_start = Instant::now();
    let fingerprinted = fingerprint_all(adapter.parser.as_ref(), candidates);
    let hash_ms = hash_start.elapsed().as_millis();

    for Fingerprinted { path, hash } in fingerprinted {
        let outcome = match hash {
            Ok(hash) => ingest_with_hash(db, adapter, &path, hash),
            Err(source) => Err(IngestError::SourceUnreadable {
                path: path.clone(),
                source,
            }),
        };
        match outcome {
            Ok(SourceOutcome::Imported { events_inserted }) => {
                progress.imported += 1;
                progress.events_inserted += events_inserted;
            }
            Ok(SourceOutcome::Unchanged) => {
                progress.skipped += 1;
                progress.skipped_paths.push(display_path(&path));
            }
            Err(err) => record_issue(&mut progress, &path, &err),
        }
    }

    progress.missing_marked = db.mark_missing_sources(&adapter.tool_id, &present)?;
    info!(
        "{}: total={} imported={} skipped={} failed={} events={} missing={} hash={}ms total={}ms",
        adapter.tool_id,
        progress.total,
        progress.imported,
        progress.skipped,
        progress.failed,
        progress.events_inserted,
        progress.missing_marked,
        hash_ms,
        pass_start.elapsed().as_millis()
    );
    Ok(progress)
}

/// Resolves the adapter's directory and syncs it.
pub fn sync_adapter(db: &mut Db, adapter: &ToolAdapter) -> Result<SyncProgress> {
    match adapter.resolve_dir() {
        Some(dir) => sync_directory(db, adapter, &dir),
        None => {
            debug!("{}: no source directory", adapter.tool_id);
            Ok(SyncProgress::default())
        }
    }
}
