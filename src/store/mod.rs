//! Log store: SQLite-backed experiment catalog, run registry, log
//! sequence engine and query engine.
//!
//! Every public operation is `async` and executes as one SQLite
//! transaction on tokio's blocking pool. The connection lives behind a
//! mutex, so operations on the same store are serialized; a failed
//! operation drops its transaction and leaves the store untouched.
//!
//! Operations are split by component:
//!
//! - `experiments` - experiment catalog
//! - `runs` - run registry and status changes
//! - `logs` - numbered writes, resumes and missing-number tracking
//! - `query` - visible-log reads and streamed export

mod experiments;
mod logs;
mod query;
mod runs;
mod schema;

pub use query::LogCursor;

use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{Connection, OptionalExtension, Row, ToSql};
use tracing::{debug, info};

use crate::codec::{IdCodec, IdKind};
use crate::config::StoreConfig;
use crate::experiment::{ExperimentRecord, RunRecord, RunStatus};
use crate::{Error, Result};

/// Handle to an open log store.
///
/// Cloning is cheap; clones share the same connection. Call
/// [`migrate`](Self::migrate) once after opening and
/// [`close`](Self::close) when done.
///
/// ```rust
/// use trueno_runlog::{LogStore, StoreConfig};
/// use trueno_runlog::experiment::{NewLog, NewRun};
///
/// # async fn example() -> trueno_runlog::Result<()> {
/// let store = LogStore::open(StoreConfig::in_memory())?;
/// store.migrate().await?;
///
/// let experiment = store.add_experiment("stroop").await?;
/// let run = store.add_run(NewRun::new(experiment.experiment_id()).name("p01")).await?;
/// store
///     .add_logs(run.run_id(), vec![NewLog::new(1, "trial"), NewLog::new(3, "trial")])
///     .await?;
///
/// let missing = store.get_missing_logs(&Default::default()).await?;
/// assert_eq!(missing.len(), 1);
/// store.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LogStore {
    inner: Arc<Inner>,
}

struct Inner {
    conn: Mutex<Option<Connection>>,
    codec: IdCodec,
    page_size: usize,
    max_pending_logs: u64,
}

impl fmt::Debug for LogStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogStore")
            .field("page_size", &self.inner.page_size)
            .finish_non_exhaustive()
    }
}

impl LogStore {
    /// Create a new store builder
    #[must_use]
    pub fn builder() -> crate::StoreBuilder {
        crate::StoreBuilder::default()
    }

    /// Open the database described by `config`.
    ///
    /// The schema is not touched; call [`migrate`](Self::migrate) next.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid or the database
    /// cannot be opened.
    pub fn open(config: StoreConfig) -> Result<Self> {
        config.validate()?;

        let conn = match &config.path {
            Some(path) => {
                let conn = Connection::open(path)?;
                let mode: String =
                    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
                debug!(path = %path.display(), journal_mode = %mode, "opened store");
                conn
            }
            None => Connection::open_in_memory()?,
        };
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.busy_timeout(config.busy_timeout())?;

        Ok(Self {
            inner: Arc::new(Inner {
                conn: Mutex::new(Some(conn)),
                codec: IdCodec::new(config.id_key),
                page_size: config.page_size,
                max_pending_logs: config.max_pending_logs,
            }),
        })
    }

    /// Bring the schema up to date. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `MigrationFailed` if any migration step fails; the store
    /// should be considered unusable.
    pub async fn migrate(&self) -> Result<()> {
        let applied = self.with_conn(|conn, _| schema::migrate(conn)).await?;
        info!(applied, version = schema::VERSION, "schema ready");
        Ok(())
    }

    /// Close the underlying connection. Later operations fail with
    /// `Closed`; closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns error if SQLite refuses to close the connection.
    pub async fn close(&self) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let mut guard = inner
                .conn
                .lock()
                .map_err(|_| Error::TaskFailed("connection lock poisoned".to_string()))?;
            if let Some(conn) = guard.take() {
                conn.close().map_err(|(_, e)| Error::Sqlite(e))?;
                debug!("store closed");
            }
            Ok(())
        })
        .await
        .map_err(|e| Error::TaskFailed(e.to_string()))?
    }

    /// Page size used by [`get_logs`](Self::get_logs) cursors.
    #[must_use]
    pub fn page_size(&self) -> usize {
        self.inner.page_size
    }

    pub(crate) fn max_pending_logs(&self) -> u64 {
        self.inner.max_pending_logs
    }

    pub(crate) fn codec(&self) -> IdCodec {
        self.inner.codec
    }

    /// Run `f` against the connection on the blocking pool, inside the
    /// caller's tracing span.
    pub(crate) async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection, &IdCodec) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let span = tracing::Span::current();
        tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            let mut guard = inner
                .conn
                .lock()
                .map_err(|_| Error::TaskFailed("connection lock poisoned".to_string()))?;
            let conn = guard.as_mut().ok_or(Error::Closed)?;
            f(conn, &inner.codec)
        })
        .await
        .map_err(|e| Error::TaskFailed(e.to_string()))?
    }
}

impl ToSql for RunStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for RunStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: Error| FromSqlError::Other(Box::new(e)))
    }
}

/// Columns: `experiment_id, name, created_at`.
pub(crate) const EXPERIMENT_COLUMNS: &str = "e.experiment_id, e.name, e.created_at";

pub(crate) fn experiment_from_row(row: &Row<'_>, codec: &IdCodec) -> rusqlite::Result<ExperimentRecord> {
    let key: i64 = row.get(0)?;
    let created_at: DateTime<Utc> = row.get(2)?;
    Ok(ExperimentRecord::new(
        codec.encode(IdKind::Experiment, key),
        row.get(1)?,
        created_at,
    ))
}

/// Columns: `run_id, experiment_id, name, status, created_at`.
pub(crate) const RUN_COLUMNS: &str = "r.run_id, r.experiment_id, r.name, r.status, r.created_at";

pub(crate) fn run_from_row(row: &Row<'_>, codec: &IdCodec) -> rusqlite::Result<RunRecord> {
    let key: i64 = row.get(0)?;
    let experiment_key: i64 = row.get(1)?;
    Ok(RunRecord::new(
        codec.encode(IdKind::Run, key),
        codec.encode(IdKind::Experiment, experiment_key),
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

/// Load a run by internal key; `run_id` is only used for error messages.
pub(crate) fn load_run(conn: &Connection, codec: &IdCodec, key: i64, run_id: &str) -> Result<RunRecord> {
    conn.query_row(
        &format!("SELECT {RUN_COLUMNS} FROM runs r WHERE r.run_id = ?1"),
        [key],
        |row| run_from_row(row, codec),
    )
    .optional()?
    .ok_or_else(|| Error::run_not_found(run_id))
}

/// Decode a run id, mapping undecodable ids to `NotFound`.
pub(crate) fn run_key(codec: &IdCodec, run_id: &str) -> Result<i64> {
    codec
        .decode(IdKind::Run, run_id)
        .ok_or_else(|| Error::run_not_found(run_id))
}
