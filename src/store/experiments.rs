//! Experiment catalog

use chrono::Utc;
use rusqlite::{params, params_from_iter, OptionalExtension, TransactionBehavior};
use tracing::{debug, instrument};

use super::{experiment_from_row, LogStore, EXPERIMENT_COLUMNS};
use crate::codec::IdKind;
use crate::experiment::ExperimentRecord;
use crate::filter::ExperimentFilter;
use crate::{Error, Result};

impl LogStore {
    /// Create an experiment.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if an experiment with this name exists.
    #[instrument(skip(self))]
    pub async fn add_experiment(&self, name: &str) -> Result<ExperimentRecord> {
        let name = name.to_string();
        self.with_conn(move |conn, codec| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let taken: bool = tx.query_row(
                "SELECT EXISTS (SELECT 1 FROM experiments WHERE name = ?1)",
                [&name],
                |row| row.get(0),
            )?;
            if taken {
                debug!(code = "ALREADY_EXISTS", "experiment rejected");
                return Err(Error::AlreadyExists {
                    kind: "experiment",
                    name,
                });
            }

            let created_at = Utc::now();
            tx.execute(
                "INSERT INTO experiments (name, created_at) VALUES (?1, ?2)",
                params![name, created_at],
            )?;
            let key = tx.last_insert_rowid();
            tx.commit()?;

            let record = ExperimentRecord::new(codec.encode(IdKind::Experiment, key), name, created_at);
            debug!(experiment_id = %record.experiment_id(), "experiment added");
            Ok(record)
        })
        .await
    }

    /// Get an experiment by id.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no experiment has this id.
    pub async fn get_experiment(&self, experiment_id: &str) -> Result<ExperimentRecord> {
        let id = experiment_id.to_string();
        let Some(key) = self.codec().decode(IdKind::Experiment, &id) else {
            return Err(Error::experiment_not_found(id));
        };
        self.with_conn(move |conn, codec| {
            conn.query_row(
                &format!("SELECT {EXPERIMENT_COLUMNS} FROM experiments e WHERE e.experiment_id = ?1"),
                [key],
                |row| experiment_from_row(row, codec),
            )
            .optional()?
            .ok_or_else(|| Error::experiment_not_found(id))
        })
        .await
    }

    /// List experiments matching `filter`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read.
    pub async fn get_experiments(&self, filter: &ExperimentFilter) -> Result<Vec<ExperimentRecord>> {
        let conditions = filter.conditions(&self.codec());
        self.with_conn(move |conn, codec| {
            let sql = format!(
                "SELECT {EXPERIMENT_COLUMNS} FROM experiments e WHERE {} \
                 ORDER BY e.created_at, e.experiment_id",
                conditions.sql()
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(conditions.params()), |row| {
                experiment_from_row(row, codec)
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }
}
