use serde::Serialize;
use std::io;
use std::path::PathBuf;

/// Which stage of the per-source procedure rejected a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    SourceUnreadable,
    ParseFailure,
    StorageFailure,
}

/// Non-fatal, per-source problem recorded during a directory pass.
#[derive(Debug, Clone, Serialize)]
pub struct IngestIssue {
    pub file_path: String,
    pub kind: IssueKind,
    pub message: String,
}

/// Result of a single `ingest_source` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceOutcome {
    Imported { events_inserted: usize },
    Unchanged,
}

/// Aggregate progress of one `sync_directory` pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncProgress {
    pub total: usize,
    pub imported: usize,
    pub skipped: usize,
    pub failed: usize,
    pub events_inserted: usize,
    pub missing_marked: usize,
    pub skipped_paths: Vec<String>,
    pub issues: Vec<IngestIssue>,
}

impl SyncProgress {
    pub fn merge(&mut self, other: SyncProgress) {
        self.total += other.total;
        self.imported += other.imported;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.events_inserted += other.events_inserted;
        self.missing_marked += other.missing_marked;
        self.skipped_paths.extend(other.skipped_paths);
        self.issues.extend(other.issues);
    }
}

/// Errors emitted by the ingest pipeline.
#[derive(Debug)]
pub enum IngestError {
    SourceUnreadable { path: PathBuf, source: io::Error },
    ParseFailure { path: PathBuf, message: String },
    Storage(usage_db::DbError),
}

impl IngestError {
    pub fn kind(&self) -> IssueKind {
        match self {
            Self::SourceUnreadable { .. } => IssueKind::SourceUnreadable,
            Self::ParseFailure { .. } => IssueKind::ParseFailure,
            Self::Storage(_) => IssueKind::StorageFailure,
        }
    }
}

impl std::fmt::Display for IngestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SourceUnreadable { path, source } => {
                write!(f, "cannot read {}: {}", path.display(), source)
            }
            Self::ParseFailure { path, message } => {
                write!(f, "cannot parse {}: {}", path.display(), message)
            }
            Self::Storage(err) => write!(f, "storage error: {}", err),
        }
    }
}

impl std::error::Error for IngestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::SourceUnreadable { source, .. } => Some(source),
            Self::Storage(err) => Some(err),
            Self::ParseFailure { .. } => None,
        }
    }
}

impl From<usage_db::DbError> for IngestError {
    fn from(err: usage_db::DbError) -> Self {
        Self::Storage(err)
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn each_error_maps_to_its_issue_kind() {
        let unreadable = IngestError::SourceUnreadable {
            path: PathBuf::from("/tmp/a.json"),
            source: io::Error::other("denied"),
        };
        assert_eq!(unreadable.kind(), IssueKind::SourceUnreadable);
        assert!(unreadable.source().is_some());
        assert!(unreadable.to_string().contains("/tmp/a.json"));

        let malformed = IngestError::ParseFailure {
            path: PathBuf::from("/tmp/b.json"),
            message: "eof".to_string(),
        };
        assert_eq!(malformed.kind(), IssueKind::ParseFailure);
        assert!(malformed.source().is_none());

        let storage = IngestError::from(usage_db::DbError::InvalidArgument("x".to_string()));
        assert_eq!(storage.kind(), IssueKind::StorageFailure);
    }
}
