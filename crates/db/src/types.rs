use std::collections::BTreeSet;

/// Outcome of writing a batch of events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedBatch {
    pub events_inserted: usize,
    pub affected_sessions: BTreeSet<String>,
}

/// Metric columns shared by the three stat tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatMetric {
    SessionCount,
    MessageCount,
    InputTokens,
    OutputTokens,
    ReasoningTokens,
    CacheReadTokens,
    CacheWriteTokens,
    DurationMs,
    CostUsd,
    NetCodeLines,
    FileCount,
}

impl StatMetric {
    pub const ALL: [StatMetric; 11] = [
        StatMetric::SessionCount,
        StatMetric::MessageCount,
        StatMetric::InputTokens,
        StatMetric::OutputTokens,
        StatMetric::ReasoningTokens,
        StatMetric::CacheReadTokens,
        StatMetric::CacheWriteTokens,
        StatMetric::DurationMs,
        StatMetric::CostUsd,
        StatMetric::NetCodeLines,
        StatMetric::FileCount,
    ];

    pub fn column(self) -> &'static str {
        match self {
            Self::SessionCount => "session_count",
            Self::MessageCount => "message_count",
            Self::InputTokens => "input_tokens",
            Self::OutputTokens => "output_tokens",
            Self::ReasoningTokens => "reasoning_tokens",
            Self::CacheReadTokens => "cache_read_tokens",
            Self::CacheWriteTokens => "cache_write_tokens",
            Self::DurationMs => "duration_ms",
            Self::CostUsd => "cost_usd",
            Self::NetCodeLines => "net_code_lines",
            Self::FileCount => "file_count",
        }
    }
}
