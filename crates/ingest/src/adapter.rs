use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::parser::{MessageDbParser, MessageFileParser, Parser};
use crate::paths::{default_opencode_data_dir, default_opencode_message_dir};

pub const OPENCODE_TOOL_ID: &str = "opencode";
pub const OPENCODE_DB_TOOL_ID: &str = "opencode-db";

/// Shape of the sources an adapter reads from its directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    /// Every file below the directory whose extension is listed.
    Files { extensions: Vec<String> },
    /// One embedded database file directly inside the directory.
    Database { file_name: String },
}

impl SourceKind {
    pub fn json_files() -> Self {
        Self::Files {
            extensions: vec!["json".to_string()],
        }
    }

    pub fn accepts(&self, dir: &Path, path: &Path) -> bool {
        match self {
            Self::Files { extensions } => path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext))),
            Self::Database { file_name } => path == dir.join(file_name),
        }
    }
}

pub type DirResolver = Arc<dyn Fn() -> Option<PathBuf> + Send + Sync>;

/// Capability record for one tool: how to find its sources and how to read
/// them.
#[derive(Clone)]
pub struct ToolAdapter {
    pub tool_id: String,
    pub display_name: String,
    pub kind: SourceKind,
    pub parser: Arc<dyn Parser>,
    pub source_dir: DirResolver,
}

impl ToolAdapter {
    pub fn new(
        tool_id: impl Into<String>,
        display_name: impl Into<String>,
        kind: SourceKind,
        parser: Arc<dyn Parser>,
        source_dir: DirResolver,
    ) -> Self {
        Self {
            tool_id: tool_id.into(),
            display_name: display_name.into(),
            kind,
            parser,
            source_dir,
        }
    }

    /// Adapter reading a fixed directory.
    pub fn with_dir(
        tool_id: impl Into<String>,
        display_name: impl Into<String>,
        kind: SourceKind,
        parser: Arc<dyn Parser>,
        dir: PathBuf,
    ) -> Self {
        Self::new(
            tool_id,
            display_name,
            kind,
            parser,
            Arc::new(move || Some(dir.clone())),
        )
    }

    pub fn resolve_dir(&self) -> Option<PathBuf> {
        (self.source_dir)()
    }
}

impl std::fmt::Debug for ToolAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolAdapter")
            .field("tool_id", &self.tool_id)
            .field("display_name", &self.display_name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Tool id to adapter, iterated in id order.
#[derive(Debug, Clone, Default)]
pub struct AdapterRegistry {
    adapters: BTreeMap<String, ToolAdapter>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the bundled OpenCode adapters (message files and the
    /// embedded database).
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(ToolAdapter::new(
            OPENCODE_TOOL_ID,
            "OpenCode",
            SourceKind::json_files(),
            Arc::new(MessageFileParser),
            Arc::new(default_opencode_message_dir),
        ));
        registry.register(ToolAdapter::new(
            OPENCODE_DB_TOOL_ID,
            "OpenCode (database)",
            SourceKind::Database {
                file_name: "opencode.db".to_string(),
            },
            Arc::new(MessageDbParser),
            Arc::new(default_opencode_data_dir),
        ));
        registry
    }

    /// Adds or replaces the adapter for its tool id.
    pub fn register(&mut self, adapter: ToolAdapter) -> Option<ToolAdapter> {
        self.adapters.insert(adapter.tool_id.clone(), adapter)
    }

    pub fn get(&self, tool_id: &str) -> Option<&ToolAdapter> {
        self.adapters.get(tool_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolAdapter> {
        self.adapters.values()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
