//! Log sequence engine
//!
//! Each run owns an append-only list of generations. A generation covers
//! the numbers from its `start_number` upwards, and the newest generation
//! covering a number decides its current value, so a resume after `R`
//! (a new generation starting at `R + 1`) hides everything at or above
//! `R + 1` in older generations without touching their rows.
//!
//! Only the newest (active) generation accepts writes. Writing number `N`
//! reserves every number between the first unfilled number and `N`; the
//! reserved span of a generation is therefore always
//! `start_number..=MAX(number)` and its unfilled (missing) numbers are the
//! gaps in that span.

use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use rustc_hash::FxHashSet;
use serde_json::Value;
use tracing::{debug, instrument};

use super::{load_run, run_key, LogStore};
use crate::codec::{IdCodec, IdKind};
use crate::experiment::{MissingLog, MissingRange, NewLog, PendingCount, RunRecord, RunStatus};
use crate::filter::{Conditions, RunFilter};
use crate::{Error, Result};

/// Highest number a log may carry; one past it must stay representable.
pub(crate) const MAX_LOG_NUMBER: i64 = i64::MAX - 1;

/// One epoch of a run's log sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Generation {
    pub id: i64,
    pub number: i64,
    pub start: i64,
}

/// How far a generation has been filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FillState {
    pub filled: i64,
    pub max_filled: Option<i64>,
}

impl FillState {
    /// Reserved but unfilled numbers.
    #[allow(clippy::cast_sign_loss)]
    pub const fn pending(&self, start: i64) -> u64 {
        let Some(max) = self.max_filled else {
            return 0;
        };
        let pending = max.saturating_sub(start).saturating_add(1).saturating_sub(self.filled);
        if pending > 0 {
            pending as u64
        } else {
            0
        }
    }

    /// One past the highest filled number, or `start` if nothing is filled.
    pub const fn first_unfilled(&self, start: i64) -> i64 {
        match self.max_filled {
            Some(max) => max.saturating_add(1),
            None => start,
        }
    }
}

impl Generation {
    pub fn insert(conn: &Connection, run_key: i64, number: i64, start: i64) -> Result<Self> {
        conn.execute(
            "INSERT INTO generations (run_id, generation_number, start_number) VALUES (?1, ?2, ?3)",
            params![run_key, number, start],
        )?;
        Ok(Self {
            id: conn.last_insert_rowid(),
            number,
            start,
        })
    }

    /// The newest generation of a run.
    pub fn active(conn: &Connection, run_key: i64) -> Result<Self> {
        Ok(conn.query_row(
            "SELECT generation_id, generation_number, start_number FROM generations \
             WHERE run_id = ?1 ORDER BY generation_number DESC LIMIT 1",
            [run_key],
            |row| {
                Ok(Self {
                    id: row.get(0)?,
                    number: row.get(1)?,
                    start: row.get(2)?,
                })
            },
        )?)
    }

    pub fn fill_state(&self, conn: &Connection) -> Result<FillState> {
        Ok(conn.query_row(
            "SELECT COUNT(*), MAX(number) FROM logs WHERE generation_id = ?1",
            [self.id],
            |row| {
                Ok(FillState {
                    filled: row.get(0)?,
                    max_filled: row.get(1)?,
                })
            },
        )?)
    }

    /// Lowest unfilled number inside the reserved span, if any.
    pub fn first_missing(&self, conn: &Connection, state: FillState) -> Result<Option<i64>> {
        if state.pending(self.start) == 0 {
            return Ok(None);
        }
        let lowest: i64 = conn.query_row(
            "SELECT MIN(number) FROM logs WHERE generation_id = ?1",
            [self.id],
            |row| row.get(0),
        )?;
        if lowest > self.start {
            return Ok(Some(self.start));
        }
        Ok(conn
            .query_row(
                "SELECT number + 1 FROM ( \
                     SELECT number, LEAD(number) OVER (ORDER BY number) AS next_number \
                     FROM logs WHERE generation_id = ?1 \
                 ) WHERE next_number > number + 1 ORDER BY number LIMIT 1",
                [self.id],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Smallest `after + 1` a resume may use without skipping a hole.
    pub fn min_resumable(&self, conn: &Connection) -> Result<i64> {
        let state = self.fill_state(conn)?;
        Ok(self
            .first_missing(conn, state)?
            .unwrap_or_else(|| state.first_unfilled(self.start)))
    }
}

/// CTEs `active`, `seq` and `gaps` over the active generations of the
/// runs matching `run_condition` (aliases `r`, `e`). `gaps` has columns
/// `run_id, first_number, last_number`.
pub(crate) fn gap_ctes(run_condition: &str) -> String {
    format!(
        "active AS ( \
             SELECT g.generation_id, g.run_id, g.start_number \
             FROM generations g \
             JOIN runs r ON r.run_id = g.run_id \
             JOIN experiments e ON e.experiment_id = r.experiment_id \
             WHERE {run_condition} \
               AND g.generation_number = ( \
                   SELECT MAX(generation_number) FROM generations WHERE run_id = g.run_id) \
         ), \
         seq AS ( \
             SELECT a.run_id, a.start_number, l.number, \
                    LEAD(l.number) OVER (PARTITION BY a.generation_id ORDER BY l.number) AS next_number, \
                    ROW_NUMBER() OVER (PARTITION BY a.generation_id ORDER BY l.number) AS position \
             FROM active a JOIN logs l ON l.generation_id = a.generation_id \
         ), \
         gaps AS ( \
             SELECT run_id, start_number AS first_number, number - 1 AS last_number \
             FROM seq WHERE position = 1 AND number > start_number \
             UNION ALL \
             SELECT run_id, number + 1, next_number - 1 \
             FROM seq WHERE next_number > number + 1 \
         )"
    )
}

fn missing_ranges(conn: &Connection, codec: &IdCodec, conditions: &Conditions) -> Result<Vec<MissingRange>> {
    let sql = format!(
        "WITH {} SELECT run_id, first_number, last_number FROM gaps ORDER BY run_id, first_number",
        gap_ctes(&conditions.sql())
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(conditions.params()), |row| {
        Ok(MissingRange {
            run_id: codec.encode(IdKind::Run, row.get(0)?),
            first: row.get(1)?,
            last: row.get(2)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation)
}

impl LogStore {
    /// Write numbered log entries to the active generation of a run.
    ///
    /// Returns the new log ids in input order. The call is atomic: if any
    /// entry is rejected nothing is written. An idle run receiving logs
    /// becomes running.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the run does not exist
    /// - `RunEnded` if the run is completed or canceled
    /// - `InvalidLogNumber` if a number is below the active generation's
    ///   start or above [`i64::MAX`] - 1, or if the batch would leave the
    ///   run with more than `max_pending_logs` missing numbers
    /// - `DuplicateNumber` if a number is already filled or repeated in the batch
    #[instrument(skip(self, logs), fields(count = logs.len()))]
    pub async fn add_logs(&self, run_id: &str, logs: Vec<NewLog>) -> Result<Vec<String>> {
        let id = run_id.to_string();
        let key = run_key(&self.codec(), &id)?;
        let max_pending = self.max_pending_logs();
        self.with_conn(move |conn, codec| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let run = load_run(&tx, codec, key, &id)?;
            if run.status().is_ended() {
                debug!(code = "RUN_ENDED", status = %run.status(), "logs rejected");
                return Err(Error::RunEnded {
                    run_id: id,
                    status: run.status(),
                });
            }

            let generation = Generation::active(&tx, key)?;
            let mut seen = FxHashSet::default();
            for log in &logs {
                if log.number() < generation.start {
                    debug!(code = "INVALID_LOG_NUMBER", number = log.number(), "logs rejected");
                    return Err(Error::InvalidLogNumber(format!(
                        "{} is below the start ({}) of the active generation",
                        log.number(),
                        generation.start
                    )));
                }
                if log.number() > MAX_LOG_NUMBER {
                    debug!(code = "INVALID_LOG_NUMBER", number = log.number(), "logs rejected");
                    return Err(Error::InvalidLogNumber(format!(
                        "{} is above the largest log number {MAX_LOG_NUMBER}",
                        log.number()
                    )));
                }
                if !seen.insert(log.number()) {
                    debug!(code = "DUPLICATE_NUMBER", number = log.number(), "logs rejected");
                    return Err(Error::DuplicateNumber {
                        number: log.number(),
                    });
                }
            }

            let before = generation.fill_state(&tx)?;
            let mut ids = Vec::with_capacity(logs.len());
            {
                let mut insert_log = tx.prepare_cached(
                    "INSERT INTO logs (generation_id, number, log_type, log_values) VALUES (?1, ?2, ?3, ?4)",
                )?;
                let mut insert_name = tx.prepare_cached(
                    "INSERT INTO log_value_names (log_id, name) VALUES (?1, ?2)",
                )?;
                for log in logs {
                    let (number, log_type, values) = log.into_parts();
                    let names: Vec<String> = values.keys().cloned().collect();
                    let values = (!values.is_empty()).then_some(Value::Object(values));

                    match insert_log.execute(params![generation.id, number, log_type, values]) {
                        Ok(_) => {}
                        Err(e) if is_unique_violation(&e) => {
                            debug!(code = "DUPLICATE_NUMBER", number, "logs rejected");
                            return Err(Error::DuplicateNumber { number });
                        }
                        Err(e) => return Err(e.into()),
                    }
                    let log_key = tx.last_insert_rowid();
                    for name in names {
                        insert_name.execute(params![log_key, name])?;
                    }
                    ids.push(codec.encode(IdKind::Log, log_key));
                }
            }

            if run.status() == RunStatus::Idle && !ids.is_empty() {
                tx.execute(
                    "UPDATE runs SET status = ?1 WHERE run_id = ?2",
                    params![RunStatus::Running, key],
                )?;
                debug!("idle run started by first logs");
            }

            let state = generation.fill_state(&tx)?;
            let pending = state.pending(generation.start);
            if state.max_filled > before.max_filled && pending > max_pending {
                debug!(code = "INVALID_LOG_NUMBER", pending, max_pending, "logs rejected");
                return Err(Error::InvalidLogNumber(format!(
                    "writing up to {} would leave {pending} logs missing (limit {max_pending})",
                    state.first_unfilled(generation.start) - 1
                )));
            }
            tx.commit()?;

            debug!(
                written = ids.len(),
                generation = generation.number,
                first_unfilled = state.first_unfilled(generation.start),
                pending,
                "logs added"
            );
            Ok(ids)
        })
        .await
    }

    /// Resume a run after log number `after`.
    ///
    /// Opens a new generation starting at `after + 1`, which supersedes
    /// every number from `after + 1` upwards written by earlier attempts,
    /// and sets the run status to running.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the run does not exist
    /// - `RunEnded` if the run is completed or canceled
    /// - `InvalidLogNumber` if `after` is negative or [`i64::MAX`], or if
    ///   resuming would skip a number that is still missing
    #[instrument(skip(self))]
    pub async fn resume_run(&self, run_id: &str, after: i64) -> Result<RunRecord> {
        let id = run_id.to_string();
        let key = run_key(&self.codec(), &id)?;
        self.with_conn(move |conn, codec| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let run = load_run(&tx, codec, key, &id)?;
            if run.status().is_ended() {
                debug!(code = "RUN_ENDED", status = %run.status(), "resume rejected");
                return Err(Error::RunEnded {
                    run_id: id,
                    status: run.status(),
                });
            }
            if after < 0 {
                debug!(code = "INVALID_LOG_NUMBER", after, "resume rejected");
                return Err(Error::InvalidLogNumber(format!(
                    "cannot resume after negative number {after}"
                )));
            }
            let Some(start) = after.checked_add(1) else {
                debug!(code = "INVALID_LOG_NUMBER", after, "resume rejected");
                return Err(Error::InvalidLogNumber(format!(
                    "cannot resume after {after}: no log number follows it"
                )));
            };

            let active = Generation::active(&tx, key)?;
            let min_resumable = active.min_resumable(&tx)?;
            if start > min_resumable {
                debug!(code = "INVALID_LOG_NUMBER", min_resumable, "resume rejected");
                return Err(Error::InvalidLogNumber(format!(
                    "cannot resume after {after}: log {min_resumable} is missing"
                )));
            }

            let generation = Generation::insert(&tx, key, active.number + 1, start)?;
            tx.execute(
                "UPDATE runs SET status = ?1 WHERE run_id = ?2",
                params![RunStatus::Running, key],
            )?;
            tx.commit()?;

            debug!(
                generation = generation.number,
                start = generation.start,
                "run resumed"
            );
            Ok(run.with_status(RunStatus::Running))
        })
        .await
    }

    /// Gaps in the active generation of every run matching `filter`,
    /// ordered by run then number.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read.
    pub async fn get_missing_log_ranges(&self, filter: &RunFilter) -> Result<Vec<MissingRange>> {
        let conditions = filter.conditions(&self.codec());
        self.with_conn(move |conn, codec| missing_ranges(conn, codec, &conditions))
            .await
    }

    /// Every missing number in the active generation of every run matching
    /// `filter`, ordered by run then number.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read.
    pub async fn get_missing_logs(&self, filter: &RunFilter) -> Result<Vec<MissingLog>> {
        let ranges = self.get_missing_log_ranges(filter).await?;
        Ok(ranges
            .into_iter()
            .flat_map(|range| {
                (range.first..=range.last).map(move |number| MissingLog {
                    run_id: range.run_id.clone(),
                    number,
                })
            })
            .collect())
    }

    /// Number of missing logs for every run matching `filter`, including
    /// runs with none, ordered by run.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read.
    pub async fn get_pending_log_counts(&self, filter: &RunFilter) -> Result<Vec<PendingCount>> {
        let conditions = filter.conditions(&self.codec());
        self.with_conn(move |conn, codec| {
            let sql = format!(
                "SELECT g.run_id, g.start_number, COUNT(l.log_id), MAX(l.number) \
                 FROM generations g \
                 JOIN runs r ON r.run_id = g.run_id \
                 JOIN experiments e ON e.experiment_id = r.experiment_id \
                 LEFT JOIN logs l ON l.generation_id = g.generation_id \
                 WHERE {} AND g.generation_number = ( \
                     SELECT MAX(generation_number) FROM generations WHERE run_id = g.run_id) \
                 GROUP BY g.generation_id ORDER BY g.run_id",
                conditions.sql()
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(conditions.params()), |row| {
                let start: i64 = row.get(1)?;
                let state = FillState {
                    filled: row.get(2)?,
                    max_filled: row.get(3)?,
                };
                Ok(PendingCount {
                    run_id: codec.encode(IdKind::Run, row.get(0)?),
                    count: state.pending(start),
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }
}
