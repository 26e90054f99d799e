use serde::Deserialize;
use serde::de::{self, Deserializer, MapAccess, Visitor};
use usage_core::{CodeDiff, Event, Role, TokenCounts, timestamp_in_range};

const UNKNOWN: &str = "unknown";

/// Integer that may arrive as a JSON number, float or numeric string.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct LenientI64(pub(crate) i64);

impl<'de> Deserialize<'de> for LenientI64 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct LenientVisitor;
        impl Visitor<'_> for LenientVisitor {
            type Value = i64;
            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("an integer, a float or a numeric string")
            }
            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
                Ok(v)
            }
            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
                Ok(i64::try_from(v).unwrap_or(i64::MAX))
            }
            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E> {
                Ok(v as i64)
            }
            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                let trimmed = v.trim();
                trimmed
                    .parse::<i64>()
                    .or_else(|_| trimmed.parse::<f64>().map(|f| f as i64))
                    .map_err(de::Error::custom)
            }
        }
        deserializer.deserialize_any(LenientVisitor).map(LenientI64)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct LenientF64(pub(crate) f64);

impl<'de> Deserialize<'de> for LenientF64 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct LenientVisitor;
        impl Visitor<'_> for LenientVisitor {
            type Value = f64;
            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a float, an integer or a string")
            }
            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E> {
                Ok(v)
            }
            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
                Ok(v as f64)
            }
            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
                Ok(v as f64)
            }
            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                v.trim().parse::<f64>().map_err(de::Error::custom)
            }
        }
        deserializer.deserialize_any(LenientVisitor).map(LenientF64)
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct LenientString(pub(crate) String);

impl<'de> Deserialize<'de> for LenientString {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct LenientVisitor;
        impl Visitor<'_> for LenientVisitor {
            type Value = String;
            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a string or a number")
            }
            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E> {
                Ok(v.to_string())
            }
            fn visit_string<E>(self, v: String) -> Result<Self::Value, E> {
                Ok(v)
            }
            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
                Ok(v.to_string())
            }
            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
                Ok(v.to_string())
            }
            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E> {
                Ok(v.to_string())
            }
        }
        deserializer
            .deserialize_any(LenientVisitor)
            .map(LenientString)
    }
}

impl LenientString {
    fn non_empty(value: Option<Self>) -> Option<String> {
        value.map(|s| s.0).filter(|s| !s.trim().is_empty())
    }
}

#[derive(Deserialize, Default)]
struct CacheData {
    read: Option<LenientI64>,
    write: Option<LenientI64>,
}

#[derive(Deserialize, Default)]
struct TokensData {
    input: Option<LenientI64>,
    output: Option<LenientI64>,
    reasoning: Option<LenientI64>,
    cache: Option<CacheData>,
}

#[derive(Deserialize, Default)]
struct DiffItem {
    additions: Option<LenientI64>,
    deletions: Option<LenientI64>,
}

#[derive(Deserialize, Default)]
struct Summary {
    diffs: Option<Vec<DiffItem>>,
}

#[derive(Deserialize, Default)]
struct TimeData {
    created: Option<LenientI64>,
    completed: Option<LenientI64>,
}

#[derive(Deserialize, Default)]
struct PathData {
    cwd: Option<String>,
    root: Option<String>,
}

#[derive(Deserialize, Default)]
struct ModelData {
    #[serde(rename = "providerID")]
    provider_id: Option<LenientString>,
    #[serde(rename = "modelID")]
    model_id: Option<LenientString>,
}

/// One message record in the OpenCode storage layout. Every field is
/// optional; `into_event` decides what is required.
#[derive(Deserialize, Default)]
pub(crate) struct RawMessage {
    id: Option<LenientString>,
    #[serde(rename = "sessionID")]
    session_id: Option<LenientString>,
    role: Option<LenientString>,
    agent: Option<LenientString>,
    mode: Option<LenientString>,
    variant: Option<LenientString>,
    #[serde(rename = "providerID")]
    provider_id: Option<LenientString>,
    #[serde(rename = "modelID")]
    model_id: Option<LenientString>,
    model: Option<ModelData>,
    time: Option<TimeData>,
    tokens: Option<TokensData>,
    #[serde(default, deserialize_with = "deserialize_lenient_summary")]
    summary: Option<Summary>,
    path: Option<PathData>,
    cost: Option<LenientF64>,
    finish: Option<LenientString>,
}

fn non_negative(value: Option<LenientI64>) -> Option<u64> {
    value.map(|v| v.0.max(0) as u64)
}

impl RawMessage {
    /// Fills identity fields a storage row carries outside the JSON body.
    pub(crate) fn with_fallbacks(
        mut self,
        id: Option<&str>,
        session_id: Option<&str>,
        created_at: Option<i64>,
    ) -> Self {
        if self.id.is_none() {
            self.id = id.map(|v| LenientString(v.to_string()));
        }
        if self.session_id.is_none() {
            self.session_id = session_id.map(|v| LenientString(v.to_string()));
        }
        let time = self.time.get_or_insert_with(TimeData::default);
        if time.created.is_none() {
            time.created = created_at.map(LenientI64);
        }
        self
    }

    /// Canonical event, or `None` when id, session, role or creation time
    /// is missing. A time outside the calendar range counts as missing.
    /// The tool id is left empty for the caller to stamp.
    pub(crate) fn into_event(self) -> Option<Event> {
        let id = LenientString::non_empty(self.id)?;
        let session_id = LenientString::non_empty(self.session_id)?;
        let role = Role::parse(&self.role?.0)?;
        let time = self.time.unwrap_or_default();
        let created_at = time.created.map(|v| v.0).filter(|ts| timestamp_in_range(*ts))?;
        let completed_at = time.completed.map(|v| v.0).filter(|ts| timestamp_in_range(*ts));

        let model = self.model.unwrap_or_default();
        let provider_id = LenientString::non_empty(self.provider_id)
            .or_else(|| LenientString::non_empty(model.provider_id))
            .unwrap_or_else(|| UNKNOWN.to_string());
        let model_id = LenientString::non_empty(self.model_id)
            .or_else(|| LenientString::non_empty(model.model_id))
            .unwrap_or_else(|| UNKNOWN.to_string());

        let tokens = self.tokens.unwrap_or_default();
        let cache = tokens.cache.unwrap_or_default();
        let path = self.path.unwrap_or_default();

        let diff = self.summary.and_then(|s| s.diffs).map(|diffs| CodeDiff {
            additions: diffs.iter().filter_map(|d| non_negative(d.additions)).sum(),
            deletions: diffs.iter().filter_map(|d| non_negative(d.deletions)).sum(),
            files: diffs.len() as u64,
        });

        Some(Event {
            id,
            session_id,
            role,
            created_at,
            completed_at,
            provider_id,
            model_id,
            agent: LenientString::non_empty(self.agent),
            mode: LenientString::non_empty(self.mode),
            variant: LenientString::non_empty(self.variant),
            project_root: path.root.filter(|v| !v.trim().is_empty()),
            cwd: path.cwd.filter(|v| !v.trim().is_empty()),
            tool_id: String::new(),
            tokens: TokenCounts {
                input: non_negative(tokens.input),
                output: non_negative(tokens.output),
                reasoning: non_negative(tokens.reasoning),
                cache_read: non_negative(cache.read).unwrap_or(0),
                cache_write: non_negative(cache.write).unwrap_or(0),
            },
            cost_usd: self.cost.map(|c| c.0).filter(|c| c.is_finite()).unwrap_or(0.0),
            diff,
            finish: LenientString::non_empty(self.finish),
        })
    }
}

// `summary` is an object on assistant messages but a bare boolean on some
// user messages.
fn deserialize_lenient_summary<'de, D>(deserializer: D) -> Result<Option<Summary>, D::Error>
where
    D: Deserializer<'de>,
{
    struct SummaryVisitor;

    impl<'de> Visitor<'de> for SummaryVisitor {
        type Value = Option<Summary>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a summary object, boolean, or null")
        }

        fn visit_none<E>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_bool<E>(self, _: bool) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_map<A>(self, map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let summary = Summary::deserialize(de::value::MapAccessDeserializer::new(map))?;
            Ok(Some(summary))
        }
    }

    deserializer.deserialize_any(SummaryVisitor)
}
