mod adapter;
mod change;
mod message;
mod parser;
mod paths;
mod pipeline;
mod types;

pub use adapter::{
    AdapterRegistry, DirResolver, OPENCODE_DB_TOOL_ID, OPENCODE_TOOL_ID, SourceKind, ToolAdapter,
};
pub use parser::{MessageDbParser, MessageFileParser, ParseError, ParsedSource, Parser, sha256_hex};
pub use paths::{default_opencode_data_dir, default_opencode_message_dir};
pub use pipeline::{ingest_source, sync_adapter, sync_directory};
pub use types::{IngestError, IngestIssue, IssueKind, Result, SourceOutcome, SyncProgress};
