use std::fmt;
use std::time::Duration;

use crate::error::{AppError, Result};

const AUTO: &str = "auto";

/// Steady-state sync mode: watch the source directories, or run a full
/// pass on a fixed interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    Auto,
    Interval(Duration),
}

impl SyncStrategy {
    /// Accepts `"auto"` (any case) or a whole number of seconds, at least 1.
    pub fn parse(raw: &str) -> Result<Self> {
        let value = raw.trim();
        if value.eq_ignore_ascii_case(AUTO) {
            return Ok(Self::Auto);
        }
        match value.parse::<u64>() {
            Ok(secs) if secs >= 1 => Ok(Self::Interval(Duration::from_secs(secs))),
            _ => Err(AppError::InvalidStrategy(raw.to_string())),
        }
    }

    /// Form stored in the settings table.
    pub fn to_setting(self) -> String {
        self.to_string()
    }
}

impl fmt::Display for SyncStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => f.write_str(AUTO),
            Self::Interval(interval) => write!(f, "{}", interval.as_secs()),
        }
    }
}
