//! Query and export of visible logs
//!
//! A log row is visible when it belongs to the newest generation of its
//! run whose start covers its number. Reads never see superseded rows.
//!
//! [`LogCursor`] walks the matching runs in `(experiment name, run name,
//! run id)` order. Inside a run, the visible rows of each generation form
//! one number range, which is read by seeking the `(generation, number)`
//! index past the last number handed out. A page therefore costs the same
//! at any depth of the export, and the cursor holds at most one page in
//! memory.

use std::collections::VecDeque;

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, Row};
use serde_json::Map;
use tracing::{debug, instrument};

use super::logs::gap_ctes;
use super::LogStore;
use crate::codec::{IdCodec, IdKind};
use crate::experiment::{LastLog, LogRecord, RunStatus};
use crate::filter::{Conditions, LogFilter};
use crate::Result;

/// Joins of the visible-log view. Aliases: `v` (logs), `g`
/// (generations), `r` (runs), `e` (experiments).
const VISIBLE_LOGS: &str = "\
    FROM logs v \
    JOIN generations g ON g.generation_id = v.generation_id \
    JOIN runs r ON r.run_id = g.run_id \
    JOIN experiments e ON e.experiment_id = r.experiment_id \
    WHERE v.number >= g.start_number \
      AND NOT EXISTS ( \
          SELECT 1 FROM generations newer \
          WHERE newer.run_id = g.run_id \
            AND newer.generation_number > g.generation_number \
            AND newer.start_number <= v.number)";

/// Columns read by [`log_from_row`].
const LOG_COLUMNS: &str = "\
    v.log_id, e.experiment_id, e.name AS experiment_name, r.run_id, \
    r.name AS run_name, r.status AS run_status, v.number, v.log_type, v.log_values";

/// Columns read by [`RunEntry::from_row`].
const RUN_ENTRY_COLUMNS: &str = "r.run_id, r.name, r.status, e.experiment_id, e.name";

/// Export ordering of runs; null run names sort first, run id breaks
/// ties between runs sharing a name.
const RUN_ORDER: &str = "e.name, COALESCE(r.name, ''), r.run_id";

fn values_from(values: Option<serde_json::Value>) -> Map<String, serde_json::Value> {
    match values {
        Some(serde_json::Value::Object(map)) => map,
        _ => Map::new(),
    }
}

fn log_from_row(row: &Row<'_>, codec: &IdCodec) -> rusqlite::Result<LogRecord> {
    Ok(LogRecord {
        log_id: codec.encode(IdKind::Log, row.get(0)?),
        experiment_id: codec.encode(IdKind::Experiment, row.get(1)?),
        experiment_name: row.get(2)?,
        run_id: codec.encode(IdKind::Run, row.get(3)?),
        run_name: row.get(4)?,
        run_status: row.get(5)?,
        number: row.get(6)?,
        log_type: row.get(7)?,
        values: values_from(row.get(8)?),
    })
}

/// Where a run sits in export order.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RunPosition {
    experiment_name: String,
    run_name: String,
    run_key: i64,
}

/// Position of the last row handed out by a cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SortKey {
    run: RunPosition,
    number: i64,
}

/// Visible number range `start..end` of one generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Segment {
    generation_id: i64,
    start: i64,
    end: i64,
}

/// A run being exported, with the fields its log records carry.
#[derive(Debug, Clone)]
struct RunEntry {
    run_key: i64,
    run_name: Option<String>,
    status: RunStatus,
    experiment_key: i64,
    experiment_name: String,
}

impl RunEntry {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            run_key: row.get(0)?,
            run_name: row.get(1)?,
            status: row.get(2)?,
            experiment_key: row.get(3)?,
            experiment_name: row.get(4)?,
        })
    }

    fn position(&self) -> RunPosition {
        RunPosition {
            experiment_name: self.experiment_name.clone(),
            run_name: self.run_name.clone().unwrap_or_default(),
            run_key: self.run_key,
        }
    }

    /// First matching run at or after `from` in export order; strictly
    /// after it unless `inclusive`.
    fn seek(
        conn: &Connection,
        runs: &Conditions,
        from: Option<&RunPosition>,
        inclusive: bool,
    ) -> Result<Option<Self>> {
        let mut conditions = runs.clone();
        if let Some(from) = from {
            let op = if inclusive { ">=" } else { ">" };
            conditions.push(
                format!("(e.name, COALESCE(r.name, ''), r.run_id) {op} (?, ?, ?)"),
                [
                    Value::Text(from.experiment_name.clone()),
                    Value::Text(from.run_name.clone()),
                    Value::Integer(from.run_key),
                ],
            );
        }
        let sql = format!(
            "SELECT {RUN_ENTRY_COLUMNS} FROM runs r \
             JOIN experiments e ON e.experiment_id = r.experiment_id \
             WHERE {} ORDER BY {RUN_ORDER} LIMIT 1",
            conditions.sql()
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let mut rows = stmt.query(params_from_iter(conditions.params()))?;
        let entry = rows.next()?.map(Self::from_row).transpose()?;
        Ok(entry)
    }

    /// Visible ranges of every generation of the run, in number order.
    fn segments(&self, conn: &Connection) -> Result<Vec<Segment>> {
        let mut stmt = conn.prepare_cached(
            "SELECT g.generation_id, g.start_number, ( \
                 SELECT MIN(newer.start_number) FROM generations newer \
                 WHERE newer.run_id = g.run_id \
                   AND newer.generation_number > g.generation_number) \
             FROM generations g WHERE g.run_id = ?1 \
             ORDER BY g.start_number, g.generation_number",
        )?;
        let rows = stmt.query_map([self.run_key], |row| {
            let end: Option<i64> = row.get(2)?;
            Ok(Segment {
                generation_id: row.get(0)?,
                start: row.get(1)?,
                end: end.unwrap_or(i64::MAX),
            })
        })?;
        let mut segments = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        segments.retain(|segment| segment.start < segment.end);
        Ok(segments)
    }

    /// Up to `limit` visible logs of `segment` numbered above `after`.
    fn read_segment(
        &self,
        conn: &Connection,
        codec: &IdCodec,
        types: &Conditions,
        segment: Segment,
        after: i64,
        limit: usize,
    ) -> Result<Vec<LogRecord>> {
        let mut params = vec![
            Value::Integer(segment.generation_id),
            Value::Integer(after.max(segment.start - 1)),
            Value::Integer(segment.end),
        ];
        params.extend(types.params().iter().cloned());
        params.push(Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));

        let mut stmt = conn.prepare_cached(&segment_sql(types))?;
        let rows = stmt.query_map(params_from_iter(params), |row| {
            Ok(LogRecord {
                log_id: codec.encode(IdKind::Log, row.get(0)?),
                experiment_id: codec.encode(IdKind::Experiment, self.experiment_key),
                experiment_name: self.experiment_name.clone(),
                run_id: codec.encode(IdKind::Run, self.run_key),
                run_name: self.run_name.clone(),
                run_status: self.status,
                number: row.get(1)?,
                log_type: row.get(2)?,
                values: values_from(row.get(3)?),
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

/// Index seek over one generation: `generation_id = ?`, then
/// `? < number < ?`, the type filter and the row limit.
fn segment_sql(types: &Conditions) -> String {
    format!(
        "SELECT v.log_id, v.number, v.log_type, v.log_values FROM logs v \
         WHERE v.generation_id = ? AND v.number > ? AND v.number < ? AND {} \
         ORDER BY v.number LIMIT ?",
        types.sql()
    )
}

fn read_page(
    conn: &Connection,
    codec: &IdCodec,
    filter: &PageFilter,
    after: Option<SortKey>,
    limit: usize,
) -> Result<(Vec<LogRecord>, Option<SortKey>)> {
    let mut run = RunEntry::seek(conn, &filter.runs, after.as_ref().map(|key| &key.run), true)?;
    let mut page = Vec::with_capacity(limit);
    let mut last = None;

    while let Some(entry) = run.take() {
        let mut after_number = match &after {
            Some(key) if key.run.run_key == entry.run_key => key.number,
            _ => 0,
        };
        let read_before = page.len();
        for segment in entry.segments(conn)? {
            if page.len() == limit {
                break;
            }
            let logs = entry.read_segment(
                conn,
                codec,
                &filter.types,
                segment,
                after_number,
                limit - page.len(),
            )?;
            if let Some(log) = logs.last() {
                after_number = log.number;
            }
            page.extend(logs);
        }
        if page.len() > read_before {
            last = Some(SortKey {
                run: entry.position(),
                number: after_number,
            });
        }
        if page.len() == limit {
            break;
        }
        run = RunEntry::seek(conn, &filter.runs, Some(&entry.position()), false)?;
    }
    Ok((page, last))
}

/// Run and log-type conditions of a cursor.
#[derive(Debug, Clone)]
struct PageFilter {
    runs: Conditions,
    types: Conditions,
}

/// Lazy, single-pass cursor over visible logs.
///
/// Created by [`LogStore::get_logs`]. Pages are fetched on demand; each
/// page sees every write committed before it was fetched. Dropping the
/// cursor stops fetching.
#[derive(Debug)]
pub struct LogCursor {
    store: LogStore,
    filter: PageFilter,
    page_size: usize,
    after: Option<SortKey>,
    buffer: VecDeque<LogRecord>,
    exhausted: bool,
    pages: usize,
}

impl LogCursor {
    /// Next visible log, or `None` once the result is exhausted.
    ///
    /// # Errors
    ///
    /// Returns error if a page cannot be read; the cursor stays at its
    /// current position and the call may be retried.
    pub async fn next(&mut self) -> Result<Option<LogRecord>> {
        if self.buffer.is_empty() && !self.exhausted {
            self.fetch_page().await?;
        }
        Ok(self.buffer.pop_front())
    }

    /// Drain the cursor into a vector.
    ///
    /// # Errors
    ///
    /// Returns error if any page cannot be read.
    pub async fn collect_all(mut self) -> Result<Vec<LogRecord>> {
        let mut logs = Vec::new();
        while let Some(log) = self.next().await? {
            logs.push(log);
        }
        Ok(logs)
    }

    /// Number of pages fetched so far.
    #[must_use]
    pub const fn pages_fetched(&self) -> usize {
        self.pages
    }

    async fn fetch_page(&mut self) -> Result<()> {
        let filter = self.filter.clone();
        let after = self.after.clone();
        let limit = self.page_size;
        let (page, last) = self
            .store
            .with_conn(move |conn, codec| read_page(conn, codec, &filter, after, limit))
            .await?;

        self.pages += 1;
        self.exhausted = page.len() < limit;
        if last.is_some() {
            self.after = last;
        }
        debug!(rows = page.len(), page = self.pages, "fetched log page");
        self.buffer.extend(page);
        Ok(())
    }
}

impl LogStore {
    /// Visible logs matching `filter`, ordered by experiment name, run
    /// name, run id, then number.
    ///
    /// Nothing is read until the cursor is polled.
    #[must_use]
    pub fn get_logs(&self, filter: &LogFilter) -> LogCursor {
        LogCursor {
            store: self.clone(),
            filter: PageFilter {
                runs: filter.run.conditions(&self.codec()),
                types: filter.type_conditions(),
            },
            page_size: self.page_size(),
            after: None,
            buffer: VecDeque::new(),
            exhausted: false,
            pages: 0,
        }
    }

    /// For every (run, type) pair, the visible log with the greatest
    /// number below the run's first missing number.
    ///
    /// The cutoff is the first missing number of the whole run, not of
    /// each type: a gap before a log hides it whatever the gap's type.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read.
    #[instrument(skip(self))]
    pub async fn get_last_logs(&self, filter: &LogFilter) -> Result<Vec<LastLog>> {
        let codec = self.codec();
        let run_conditions = filter.run.conditions(&codec);
        let log_conditions = filter.conditions(&codec);
        let sql = format!(
            "WITH {}, \
             cutoff AS (SELECT run_id, MIN(first_number) AS first_missing FROM gaps GROUP BY run_id), \
             ranked AS ( \
                 SELECT {LOG_COLUMNS}, \
                        ROW_NUMBER() OVER (PARTITION BY r.run_id, v.log_type ORDER BY v.number DESC) AS position \
                 {VISIBLE_LOGS} AND {} \
                   AND v.number < COALESCE( \
                       (SELECT first_missing FROM cutoff c WHERE c.run_id = r.run_id), \
                       9223372036854775807) \
             ) \
             SELECT log_id, experiment_id, experiment_name, run_id, run_name, run_status, \
                    number, log_type, log_values \
             FROM ranked WHERE position = 1 \
             ORDER BY experiment_name, COALESCE(run_name, ''), run_id, log_type",
            gap_ctes(&run_conditions.sql()),
            log_conditions.sql(),
        );
        // Parameters follow placeholder order: gap CTEs first, then the log filter.
        let conditions = run_conditions.and(log_conditions);
        self.with_conn(move |conn, codec| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(conditions.params()), |row| {
                let log = log_from_row(row, codec)?;
                Ok(LastLog {
                    run_id: log.run_id.clone(),
                    log_type: log.log_type.clone(),
                    log,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    /// Sorted distinct value names of the visible logs matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read.
    pub async fn get_log_value_names(&self, filter: &LogFilter) -> Result<Vec<String>> {
        let conditions = filter.conditions(&self.codec());
        self.with_conn(move |conn, _| {
            let sql = format!(
                "SELECT DISTINCT n.name FROM log_value_names n \
                 WHERE n.log_id IN (SELECT v.log_id {VISIBLE_LOGS} AND {}) \
                 ORDER BY n.name",
                conditions.sql()
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(conditions.params()), |row| row.get(0))?;
            Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
        })
        .await
    }
}
