use std::collections::{BTreeSet, HashMap, HashSet};

use rusqlite::{Connection, params};
use usage_core::{
    BucketMetrics, DimensionKey, Event, Granularity, StatBucket, TimeRange, bucket_spans,
};

use crate::Db;
use crate::error::Result;
use crate::events::{load_event_page, load_sessions_events};
use crate::helpers::{STAT_COLUMNS, row_to_stat_bucket};
use crate::types::StatMetric;

pub const DEFAULT_ROLLUP_BATCH_SIZE: usize = 5_000;

type RowKey = (Granularity, i64, DimensionKey);

/// Sums event contributions per stat row for one scan.
///
/// Rows are flushed after every batch and merged into the table additively,
/// so a bucket split across batches ends up with the combined total. The
/// sessions seen per row are kept until the scan moves past the bucket, which
/// keeps `session_count` distinct across batch boundaries.
struct RollupAccumulator {
    granularities: Vec<Granularity>,
    dimensions: Option<HashSet<DimensionKey>>,
    rows: HashMap<RowKey, BucketMetrics>,
    open_sessions: HashMap<RowKey, HashSet<String>>,
}

impl RollupAccumulator {
    fn new(granularities: &[Granularity], dimensions: Option<HashSet<DimensionKey>>) -> Self {
        Self {
            granularities: granularities.to_vec(),
            dimensions,
            rows: HashMap::new(),
            open_sessions: HashMap::new(),
        }
    }

    fn add(&mut self, event: &Event) {
        let dimension = event.dimension();
        if let Some(allowed) = self.dimensions.as_ref()
            && !allowed.contains(&dimension)
        {
            return;
        }
        for granularity in &self.granularities {
            let key = (
                *granularity,
                granularity.truncate(event.created_at),
                dimension.clone(),
            );
            let first_for_row = self
                .open_sessions
                .entry(key.clone())
                .or_default()
                .insert(event.session_id.clone());
            let metrics = self.rows.entry(key).or_default();
            metrics.add_event(event);
            if first_for_row {
                metrics.session_count += 1;
            }
        }
    }

    fn flush(&mut self, conn: &Connection) -> Result<usize> {
        let mut written = 0usize;
        for ((granularity, bucket_start, dimension), metrics) in self.rows.drain() {
            merge_row(conn, granularity, bucket_start, &dimension, &metrics)?;
            written += 1;
        }
        Ok(written)
    }

    /// Forgets session sets of buckets that end at or before `watermark`;
    /// events arrive in time order so those rows cannot grow again.
    fn close_buckets_before(&mut self, watermark: i64) {
        self.open_sessions
            .retain(|(granularity, start, _), _| granularity.next_bucket(*start) > watermark);
    }
}

fn merge_row(
    conn: &Connection,
    granularity: Granularity,
    bucket_start: i64,
    dimension: &DimensionKey,
    metrics: &BucketMetrics,
) -> Result<()> {
    let mut stmt = conn.prepare_cached(&format!(
        r#"
        INSERT INTO {table} ({columns})
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                ?18, ?19)
        ON CONFLICT(bucket_start, project, provider, model, role, agent, tool) DO UPDATE SET
          session_count = session_count + excluded.session_count,
          message_count = message_count + excluded.message_count,
          input_tokens = input_tokens + excluded.input_tokens,
          output_tokens = output_tokens + excluded.output_tokens,
          reasoning_tokens = reasoning_tokens + excluded.reasoning_tokens,
          cache_read_tokens = cache_read_tokens + excluded.cache_read_tokens,
          cache_write_tokens = cache_write_tokens + excluded.cache_write_tokens,
          duration_ms = duration_ms + excluded.duration_ms,
          cost_usd = cost_usd + excluded.cost_usd,
          net_code_lines = net_code_lines + excluded.net_code_lines,
          file_count = file_count + excluded.file_count,
          last_event_at = MAX(last_event_at, excluded.last_event_at)
        "#,
        table = granularity.table_name(),
        columns = STAT_COLUMNS,
    ))?;
    stmt.execute(params![
        bucket_start,
        dimension.project,
        dimension.provider,
        dimension.model,
        dimension.role,
        dimension.agent,
        dimension.tool,
        metrics.session_count as i64,
        metrics.message_count as i64,
        metrics.input_tokens as i64,
        metrics.output_tokens as i64,
        metrics.reasoning_tokens as i64,
        metrics.cache_read_tokens as i64,
        metrics.cache_write_tokens as i64,
        metrics.duration_ms,
        metrics.cost_usd,
        metrics.net_code_lines,
        metrics.file_count as i64,
        metrics.last_event_at,
    ])?;
    Ok(())
}

fn delete_rows(
    conn: &Connection,
    granularity: Granularity,
    span: (i64, i64),
    dimensions: &HashSet<DimensionKey>,
) -> Result<usize> {
    let mut stmt = conn.prepare_cached(&format!(
        r#"
        DELETE FROM {}
        WHERE bucket_start >= ?1 AND bucket_start < ?2
          AND project = ?3 AND provider = ?4 AND model = ?5
          AND role = ?6 AND agent = ?7 AND tool = ?8
        "#,
        granularity.table_name()
    ))?;
    let mut deleted = 0usize;
    for dimension in dimensions {
        deleted += stmt.execute(params![
            span.0,
            span.1,
            dimension.project,
            dimension.provider,
            dimension.model,
            dimension.role,
            dimension.agent,
            dimension.tool,
        ])?;
    }
    Ok(deleted)
}

/// Streams events of `range` in `(created_at, id)` order through the
/// accumulator, one bounded page at a time.
fn scan_range(
    conn: &Connection,
    range: TimeRange,
    batch_size: usize,
    accumulator: &mut RollupAccumulator,
) -> Result<usize> {
    let mut scanned = 0usize;
    let mut cursor: Option<(i64, String)> = None;
    loop {
        let after = cursor.as_ref().map(|(ts, id)| (*ts, id.as_str()));
        let page = load_event_page(conn, range, after, batch_size)?;
        let Some(last) = page.last() else {
            break;
        };
        for event in &page {
            accumulator.add(event);
        }
        accumulator.flush(conn)?;
        accumulator.close_buckets_before(last.created_at);
        scanned += page.len();
        if page.len() < batch_size {
            break;
        }
        cursor = Some((last.created_at, last.id.clone()));
    }
    Ok(scanned)
}

pub(crate) fn rebuild_all_rollups(conn: &Connection, batch_size: usize) -> Result<usize> {
    for granularity in Granularity::ALL {
        conn.execute(&format!("DELETE FROM {}", granularity.table_name()), [])?;
    }
    let mut accumulator = RollupAccumulator::new(&Granularity::ALL, None);
    scan_range(conn, TimeRange::all(), batch_size, &mut accumulator)
}

/// Recomputes the stat rows touched by `scope`: for each granularity, the
/// rows whose bucket falls in a span covered by the scope's events and whose
/// dimension tuple appears among them. Everything else is left as is.
pub(crate) fn recalculate_scope(
    conn: &Connection,
    scope: &[Event],
    batch_size: usize,
) -> Result<usize> {
    if scope.is_empty() {
        return Ok(0);
    }
    let dimensions: HashSet<DimensionKey> = scope.iter().map(Event::dimension).collect();
    let mut scanned = 0usize;
    for granularity in Granularity::ALL {
        let spans = bucket_spans(granularity, scope.iter().map(|event| event.created_at));
        for span in spans {
            delete_rows(conn, granularity, span, &dimensions)?;
            let mut accumulator = RollupAccumulator::new(&[granularity], Some(dimensions.clone()));
            let range = TimeRange {
                start_ms: span.0,
                end_ms: span.1,
            };
            scanned += scan_range(conn, range, batch_size, &mut accumulator)?;
        }
    }
    Ok(scanned)
}

pub(crate) fn recalculate_affected(
    conn: &Connection,
    session_ids: &BTreeSet<String>,
    batch_size: usize,
) -> Result<usize> {
    let scope = load_sessions_events(conn, session_ids)?;
    recalculate_scope(conn, &scope, batch_size)
}

impl Db {
    /// Drops and recomputes all three stat tables from the event table.
    pub fn rebuild_all_rollups(&mut self) -> Result<usize> {
        let batch_size = self.rollup_batch_size;
        let tx = self.conn.transaction()?;
        let scanned = rebuild_all_rollups(&tx, batch_size)?;
        tx.commit()?;
        Ok(scanned)
    }

    pub fn recalculate_affected_rollups(&mut self, session_ids: &BTreeSet<String>) -> Result<usize> {
        let batch_size = self.rollup_batch_size;
        let tx = self.conn.transaction()?;
        let scanned = recalculate_affected(&tx, session_ids, batch_size)?;
        tx.commit()?;
        Ok(scanned)
    }

    /// Full repair of every derived table in a single transaction.
    pub fn rebuild_all(&mut self) -> Result<()> {
        let batch_size = self.rollup_batch_size;
        let tx = self.conn.transaction()?;
        crate::sessions::rebuild_all_sessions(&tx)?;
        rebuild_all_rollups(&tx, batch_size)?;
        tx.commit()?;
        Ok(())
    }

    /// True when events exist but a derived table was never populated.
    pub fn derived_tables_need_rebuild(&self) -> Result<bool> {
        if self.count_events()? == 0 {
            return Ok(false);
        }
        if self.count_sessions()? == 0 {
            return Ok(true);
        }
        for granularity in Granularity::ALL {
            if self.count_stat_rows(granularity)? == 0 {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn count_stat_rows(&self, granularity: Granularity) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", granularity.table_name()),
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn list_stat_buckets(
        &self,
        granularity: Granularity,
        range: TimeRange,
    ) -> Result<Vec<StatBucket>> {
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT {}
            FROM {}
            WHERE bucket_start >= ?1 AND bucket_start < ?2
            ORDER BY bucket_start, project, provider, model, role, agent, tool
            "#,
            STAT_COLUMNS,
            granularity.table_name()
        ))?;
        let rows = stmt.query_map(params![range.start_ms, range.end_ms], |row| {
            row_to_stat_bucket(granularity, row)
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn sum_stat_metric(&self, granularity: Granularity, metric: StatMetric) -> Result<f64> {
        let total: f64 = self.conn.query_row(
            &format!(
                "SELECT COALESCE(SUM({}), 0) FROM {}",
                metric.column(),
                granularity.table_name()
            ),
            [],
            |row| row.get(0),
        )?;
        Ok(total)
    }
}
