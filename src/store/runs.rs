//! Run registry and status changes

use chrono::Utc;
use rusqlite::{params, params_from_iter, OptionalExtension, TransactionBehavior};
use tracing::{debug, instrument};

use super::logs::Generation;
use super::{load_run, run_from_row, run_key, LogStore, RUN_COLUMNS};
use crate::codec::IdKind;
use crate::experiment::{NewRun, RunRecord, RunStatus};
use crate::filter::RunFilter;
use crate::{Error, Result};

impl LogStore {
    /// Register a run together with its first generation (start 1).
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the experiment does not exist, or
    /// `AlreadyExists` if a non-canceled run of the same experiment has
    /// the same name.
    #[instrument(skip(self, run), fields(experiment_id = %run.experiment_id, name = ?run.name))]
    pub async fn add_run(&self, run: NewRun) -> Result<RunRecord> {
        let Some(experiment_key) = self.codec().decode(IdKind::Experiment, &run.experiment_id) else {
            return Err(Error::experiment_not_found(run.experiment_id));
        };
        self.with_conn(move |conn, codec| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let exists = tx
                .query_row(
                    "SELECT 1 FROM experiments WHERE experiment_id = ?1",
                    [experiment_key],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            if !exists {
                return Err(Error::experiment_not_found(run.experiment_id));
            }

            let live_name = run.name.as_ref().filter(|_| run.status != RunStatus::Canceled);
            if let Some(name) = live_name {
                let taken: bool = tx.query_row(
                    "SELECT EXISTS (SELECT 1 FROM runs \
                     WHERE experiment_id = ?1 AND name = ?2 AND status <> 'canceled')",
                    params![experiment_key, name],
                    |row| row.get(0),
                )?;
                if taken {
                    debug!(code = "ALREADY_EXISTS", "run rejected");
                    return Err(Error::AlreadyExists {
                        kind: "run",
                        name: name.clone(),
                    });
                }
            }

            let created_at = Utc::now();
            tx.execute(
                "INSERT INTO runs (experiment_id, name, status, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![experiment_key, run.name, run.status, created_at],
            )?;
            let key = tx.last_insert_rowid();
            Generation::insert(&tx, key, 1, 1)?;
            tx.commit()?;

            let record = RunRecord::new(
                codec.encode(IdKind::Run, key),
                run.experiment_id,
                run.name,
                run.status,
                created_at,
            );
            debug!(run_id = %record.run_id(), status = %record.status(), "run added");
            Ok(record)
        })
        .await
    }

    /// Get a run by id.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no run has this id.
    pub async fn get_run(&self, run_id: &str) -> Result<RunRecord> {
        let id = run_id.to_string();
        let key = run_key(&self.codec(), &id)?;
        self.with_conn(move |conn, codec| load_run(conn, codec, key, &id)).await
    }

    /// List runs matching `filter`, most recently created first.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read.
    pub async fn get_runs(&self, filter: &RunFilter) -> Result<Vec<RunRecord>> {
        let conditions = filter.conditions(&self.codec());
        self.with_conn(move |conn, codec| {
            let sql = format!(
                "SELECT {RUN_COLUMNS} FROM runs r \
                 JOIN experiments e ON e.experiment_id = r.experiment_id \
                 WHERE {} ORDER BY r.created_at DESC, r.run_id DESC",
                conditions.sql()
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(conditions.params()), |row| {
                run_from_row(row, codec)
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    /// Change the status of a run.
    ///
    /// Setting the current status again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `RunEnded` when leaving completed (other than to
    /// canceled) or canceled, `InvalidTransition` for any other change
    /// outside the table, and `PendingLogs` when completing a run with
    /// missing numbers.
    #[instrument(skip(self), fields(status = %status))]
    pub async fn set_run_status(&self, run_id: &str, status: RunStatus) -> Result<RunRecord> {
        let id = run_id.to_string();
        let key = run_key(&self.codec(), &id)?;
        self.with_conn(move |conn, codec| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let run = load_run(&tx, codec, key, &id)?;
            let from = run.status();
            if from == status {
                return Ok(run);
            }
            if let Err(e) = from.check_transition(status, &id) {
                debug!(code = e.code(), from = %from, "status change rejected");
                return Err(e);
            }

            if status == RunStatus::Completed {
                let generation = Generation::active(&tx, key)?;
                let pending = generation.fill_state(&tx)?.pending(generation.start);
                if pending > 0 {
                    debug!(pending, "completion rejected");
                    return Err(Error::PendingLogs {
                        run_id: id,
                        count: pending,
                    });
                }
            }

            tx.execute(
                "UPDATE runs SET status = ?1 WHERE run_id = ?2",
                params![status, key],
            )?;
            tx.commit()?;

            debug!(from = %from, "run status changed");
            Ok(run.with_status(status))
        })
        .await
    }
}
