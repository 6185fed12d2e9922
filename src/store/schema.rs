//! Schema migrations
//!
//! Migrations are applied in order, each in its own transaction, and the
//! applied version is tracked in SQLite's `user_version` pragma.
//!
//! Placeholders for unfilled numbers are not stored: the reserved span of
//! a generation is always `start_number..=MAX(number)`, so missing numbers
//! are the gaps in `logs` within that span.

use rusqlite::Connection;
use tracing::info;

use crate::{Error, Result};

const MIGRATIONS: &[&str] = &[
    // 1: experiments, runs, generations, logs, property index
    "
    CREATE TABLE experiments (
        experiment_id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        created_at TEXT NOT NULL
    );

    CREATE TABLE runs (
        run_id INTEGER PRIMARY KEY AUTOINCREMENT,
        experiment_id INTEGER NOT NULL REFERENCES experiments (experiment_id),
        name TEXT,
        status TEXT NOT NULL
            CHECK (status IN ('idle', 'running', 'interrupted', 'completed', 'canceled')),
        created_at TEXT NOT NULL
    );
    CREATE INDEX runs_experiment ON runs (experiment_id);
    CREATE UNIQUE INDEX runs_live_name ON runs (experiment_id, name)
        WHERE name IS NOT NULL AND status <> 'canceled';

    CREATE TABLE generations (
        generation_id INTEGER PRIMARY KEY AUTOINCREMENT,
        run_id INTEGER NOT NULL REFERENCES runs (run_id),
        generation_number INTEGER NOT NULL CHECK (generation_number >= 1),
        start_number INTEGER NOT NULL CHECK (start_number >= 1),
        UNIQUE (run_id, generation_number)
    );

    CREATE TABLE logs (
        log_id INTEGER PRIMARY KEY AUTOINCREMENT,
        generation_id INTEGER NOT NULL REFERENCES generations (generation_id),
        number INTEGER NOT NULL,
        log_type TEXT NOT NULL,
        log_values TEXT,
        UNIQUE (generation_id, number)
    );
    CREATE INDEX logs_type ON logs (log_type);

    CREATE TABLE log_value_names (
        log_id INTEGER NOT NULL REFERENCES logs (log_id),
        name TEXT NOT NULL,
        PRIMARY KEY (log_id, name)
    ) WITHOUT ROWID;
    CREATE INDEX log_value_names_name ON log_value_names (name);
    ",
];

/// Schema version after all migrations.
#[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
pub(crate) const VERSION: i64 = MIGRATIONS.len() as i64;

/// Apply pending migrations, returning how many were applied.
pub(crate) fn migrate(conn: &mut Connection) -> Result<usize> {
    let current: i64 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(|e| Error::MigrationFailed(format!("cannot read schema version: {e}")))?;
    if current > VERSION {
        return Err(Error::MigrationFailed(format!(
            "database schema version {current} is newer than supported version {VERSION}"
        )));
    }

    let mut applied = 0;
    for (version, sql) in (1..).zip(MIGRATIONS).skip(usize::try_from(current).unwrap_or(0)) {
        apply(conn, version, sql)
            .map_err(|e| Error::MigrationFailed(format!("migration {version}: {e}")))?;
        info!(version, "applied migration");
        applied += 1;
    }
    Ok(applied)
}

fn apply(conn: &mut Connection, version: i64, sql: &str) -> rusqlite::Result<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(sql)?;
    tx.pragma_update(None, "user_version", version)?;
    tx.commit()
}
