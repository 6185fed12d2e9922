//! Error types for trueno-runlog
//!
//! Toyota Way: Clear error messages with actionable guidance (Respect for People)

use thiserror::Error;

use crate::experiment::RunStatus;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// trueno-runlog error types
#[derive(Error, Debug)]
pub enum Error {
    /// Experiment or run name collision
    #[error("{kind} already exists: {name}")]
    AlreadyExists {
        /// Record kind ("experiment" or "run")
        kind: &'static str,
        /// Colliding name
        name: String,
    },

    /// Referenced record does not exist
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Record kind ("experiment" or "run")
        kind: &'static str,
        /// Opaque id as supplied by the caller
        id: String,
    },

    /// Run status change outside the transition table
    #[error("Invalid run status transition: {from} -> {to}")]
    InvalidTransition {
        /// Current status
        from: RunStatus,
        /// Requested status
        to: RunStatus,
    },

    /// Completion requested while numbers are still missing
    #[error("Run {run_id} cannot be completed: {count} pending log(s)\nFill the missing numbers or resume the run before completing it.")]
    PendingLogs {
        /// Opaque run id
        run_id: String,
        /// Number of missing log numbers in the active generation
        count: u64,
    },

    /// Mutation against a completed or canceled run
    #[error("Run {run_id} has ended (status: {status})")]
    RunEnded {
        /// Opaque run id
        run_id: String,
        /// Terminal status of the run
        status: RunStatus,
    },

    /// Log number already filled in the active generation
    #[error("Log number {number} is already filled")]
    DuplicateNumber {
        /// Offending log number
        number: i64,
    },

    /// Log number below the active start, or a resume that would skip a hole
    #[error("Invalid log number: {0}")]
    InvalidLogNumber(String),

    /// Schema bring-up failed (fatal)
    #[error("Migration failed: {0}\nThe store is not usable until the schema is brought up.")]
    MigrationFailed(String),

    /// Operation attempted on a closed store
    #[error("Store is closed")]
    Closed,

    /// Invalid caller-supplied argument or configuration
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Blocking store task panicked or was aborted
    #[error("Store task failed: {0}")]
    TaskFailed(String),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl Error {
    /// Stable error code for the outer request layer.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::AlreadyExists { .. } => "ALREADY_EXISTS",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::InvalidTransition { .. } | Self::PendingLogs { .. } => "INVALID_TRANSITION",
            Self::RunEnded { .. } => "RUN_ENDED",
            Self::DuplicateNumber { .. } => "DUPLICATE_NUMBER",
            Self::InvalidLogNumber(_) => "INVALID_LOG_NUMBER",
            Self::MigrationFailed(_) => "MIGRATION_FAILED",
            Self::Closed => "CLOSED",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::TaskFailed(_) | Self::Sqlite(_) => "STORAGE",
        }
    }

    pub(crate) fn experiment_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "experiment",
            id: id.into(),
        }
    }

    pub(crate) fn run_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "run",
            id: id.into(),
        }
    }
}
