mod bucket;

use serde::{Deserialize, Serialize};

pub use bucket::{Granularity, bucket_spans, timestamp_in_range};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

/// Token counters reported by a tool. Input/output/reasoning may be missing
/// upstream; sums treat a missing counter as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCounts {
    pub input: Option<u64>,
    pub output: Option<u64>,
    pub reasoning: Option<u64>,
    pub cache_read: u64,
    pub cache_write: u64,
}

impl TokenCounts {
    pub fn input_or_zero(&self) -> u64 {
        self.input.unwrap_or(0)
    }

    pub fn output_or_zero(&self) -> u64 {
        self.output.unwrap_or(0)
    }

    pub fn reasoning_or_zero(&self) -> u64 {
        self.reasoning.unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeDiff {
    pub additions: u64,
    pub deletions: u64,
    pub files: u64,
}

impl CodeDiff {
    pub fn net_lines(&self) -> i64 {
        self.additions as i64 - self.deletions as i64
    }
}

/// Canonical usage event as produced by a tool parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub session_id: String,
    pub role: Role,
    pub created_at: i64,
    pub completed_at: Option<i64>,
    pub provider_id: String,
    pub model_id: String,
    pub agent: Option<String>,
    pub mode: Option<String>,
    pub variant: Option<String>,
    pub project_root: Option<String>,
    pub cwd: Option<String>,
    pub tool_id: String,
    pub tokens: TokenCounts,
    pub cost_usd: f64,
    pub diff: Option<CodeDiff>,
    pub finish: Option<String>,
}

impl Event {
    /// Wall time between creation and completion; zero while incomplete.
    pub fn duration_ms(&self) -> i64 {
        match self.completed_at {
            Some(completed) => completed.saturating_sub(self.created_at).max(0),
            None => 0,
        }
    }

    pub fn project_name(&self) -> Option<String> {
        self.project_root.as_deref().and_then(project_name_from_root)
    }

    pub fn dimension(&self) -> DimensionKey {
        DimensionKey {
            project: self.project_name().unwrap_or_default(),
            provider: self.provider_id.clone(),
            model: self.model_id.clone(),
            role: self.role.as_str().to_string(),
            agent: self.agent.clone().unwrap_or_default(),
            tool: self.tool_id.clone(),
        }
    }
}

/// Grouping tuple shared by the hourly, daily and monthly stat tables
/// (the bucket start is kept alongside it).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DimensionKey {
    pub project: String,
    pub provider: String,
    pub model: String,
    pub role: String,
    pub agent: String,
    pub tool: String,
}

/// Per-session rollup derived from its events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub first_event_at: i64,
    pub last_event_at: i64,
    pub user_messages: u64,
    pub agent_messages: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub reasoning_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
    pub cost_usd: f64,
    pub additions: u64,
    pub deletions: u64,
    pub files_changed: u64,
    pub is_orphan: bool,
    pub project_root: Option<String>,
    pub project_name: Option<String>,
    pub finish_state: Option<String>,
}

/// Additive metrics stored per stat bucket row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BucketMetrics {
    pub session_count: u64,
    pub message_count: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub reasoning_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
    pub duration_ms: i64,
    pub cost_usd: f64,
    pub net_code_lines: i64,
    pub file_count: u64,
    pub last_event_at: i64,
}

impl BucketMetrics {
    /// Adds one event's contribution; session counting is handled by the caller.
    pub fn add_event(&mut self, event: &Event) {
        self.message_count += 1;
        self.input_tokens += event.tokens.input_or_zero();
        self.output_tokens += event.tokens.output_or_zero();
        self.reasoning_tokens += event.tokens.reasoning_or_zero();
        self.cache_read_tokens += event.tokens.cache_read;
        self.cache_write_tokens += event.tokens.cache_write;
        self.duration_ms += event.duration_ms();
        self.cost_usd += event.cost_usd;
        if let Some(diff) = event.diff {
            self.net_code_lines += diff.net_lines();
            self.file_count += diff.files;
        }
        self.last_event_at = self.last_event_at.max(event.created_at);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatBucket {
    pub granularity: Granularity,
    pub bucket_start: i64,
    pub dimension: DimensionKey,
    pub metrics: BucketMetrics,
}

/// Change-tracking row kept per source file or database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub source_key: String,
    pub tool_id: String,
    pub content_hash: String,
    pub last_synced_at: i64,
    pub event_count: u64,
    pub first_event_at: Option<i64>,
    pub last_event_at: Option<i64>,
    pub exists: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    New,
    Unchanged,
    Modified,
}

/// Half-open `[start_ms, end_ms)` window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl TimeRange {
    pub fn all() -> Self {
        Self {
            start_ms: i64::MIN,
            end_ms: i64::MAX,
        }
    }
}

/// Last non-empty segment of a project root, ignoring trailing separators.
pub fn project_name_from_root(root: &str) -> Option<String> {
    let trimmed = root.trim().trim_end_matches(['/', '\\']);
    trimmed
        .rsplit(['/', '\\'])
        .find(|segment| !segment.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(role: Role) -> Event {
        Event {
            id: "e1".to_string(),
            session_id: "s1".to_string(),
            role,
            created_at: 1_000,
            completed_at: Some(4_500),
            provider_id: "anthropic".to_string(),
            model_id: "claude-sonnet".to_string(),
            agent: None,
            mode: None,
            variant: None,
            project_root: Some("/home/dev/widgets/".to_string()),
            cwd: None,
            tool_id: "opencode".to_string(),
            tokens: TokenCounts {
                input: Some(10),
                output: None,
                reasoning: Some(2),
                cache_read: 3,
                cache_write: 4,
            },
            cost_usd: 0.25,
            diff: Some(CodeDiff {
                additions: 7,
                deletions: 9,
                files: 2,
            }),
            finish: None,
        }
    }

    #[test]
    fn project_name_strips_trailing_separators() {
        assert_eq!(
            project_name_from_root("/home/dev/widgets/").as_deref(),
            Some("widgets")
        );
        assert_eq!(
            project_name_from_root("/home/dev/widgets//").as_deref(),
            Some("widgets")
        );
        assert_eq!(
            project_name_from_root(r"C:\work\gadgets\").as_deref(),
            Some("gadgets")
        );
        assert_eq!(project_name_from_root("plain").as_deref(), Some("plain"));
    }

    #[test]
    fn project_name_is_none_for_root_or_empty() {
        assert_eq!(project_name_from_root("/"), None);
        assert_eq!(project_name_from_root(""), None);
        assert_eq!(project_name_from_root("   "), None);
    }

    #[test]
    fn role_parse_is_case_insensitive() {
        assert_eq!(Role::parse("Assistant"), Some(Role::Assistant));
        assert_eq!(Role::parse(" user "), Some(Role::User));
        assert_eq!(Role::parse("tool"), None);
    }

    #[test]
    fn dimension_uses_project_name_and_empty_agent() {
        let key = event(Role::User).dimension();
        assert_eq!(key.project, "widgets");
        assert_eq!(key.role, "user");
        assert_eq!(key.agent, "");
        assert_eq!(key.tool, "opencode");
    }

    #[test]
    fn metrics_treat_missing_tokens_as_zero() {
        let mut metrics = BucketMetrics::default();
        metrics.add_event(&event(Role::Assistant));
        assert_eq!(metrics.message_count, 1);
        assert_eq!(metrics.input_tokens, 10);
        assert_eq!(metrics.output_tokens, 0);
        assert_eq!(metrics.reasoning_tokens, 2);
        assert_eq!(metrics.duration_ms, 3_500);
        assert_eq!(metrics.net_code_lines, -2);
        assert_eq!(metrics.file_count, 2);
        assert_eq!(metrics.last_event_at, 1_000);
    }

    #[test]
    fn duration_is_zero_when_incomplete_or_inverted() {
        let mut pending = event(Role::Assistant);
        pending.completed_at = None;
        assert_eq!(pending.duration_ms(), 0);
        pending.completed_at = Some(500);
        assert_eq!(pending.duration_ms(), 0);
    }
}
