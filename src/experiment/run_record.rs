//! Run Record - execution instance of an experiment

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Run is created but not yet started.
    Idle,
    /// Run is currently executing.
    Running,
    /// Run was interrupted and may be resumed.
    Interrupted,
    /// Run finished with every log number filled.
    Completed,
    /// Run was canceled by user or system.
    Canceled,
}

impl RunStatus {
    /// Every status, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::Idle,
        Self::Running,
        Self::Interrupted,
        Self::Completed,
        Self::Canceled,
    ];

    /// Lowercase name used in storage and filters.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Interrupted => "interrupted",
            Self::Completed => "completed",
            Self::Canceled => "canceled",
        }
    }

    /// Completed and canceled runs no longer accept logs or resumes.
    #[must_use]
    pub const fn is_ended(self) -> bool {
        matches!(self, Self::Completed | Self::Canceled)
    }

    /// Whether `self -> to` is an edge of the transition table.
    ///
    /// ```text
    /// idle ──> running ──> interrupted ──> running
    ///  │         │  └────> completed ──> canceled
    ///  └─────────┴──────────────────────> canceled
    /// ```
    ///
    /// Staying in the same status is not an edge; callers treat it as a no-op.
    #[must_use]
    pub const fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Idle, Self::Running | Self::Canceled)
                | (Self::Running, Self::Interrupted | Self::Canceled | Self::Completed)
                | (Self::Interrupted, Self::Running | Self::Canceled)
                | (Self::Completed, Self::Canceled)
        )
    }

    /// Validate a status change without touching storage.
    ///
    /// # Errors
    ///
    /// `RunEnded` when leaving a terminal status (other than
    /// completed -> canceled), `InvalidTransition` for any other pair
    /// outside the table.
    pub fn check_transition(self, to: Self, run_id: &str) -> Result<()> {
        if self == to || self.can_transition_to(to) {
            return Ok(());
        }
        if self.is_ended() {
            return Err(Error::RunEnded {
                run_id: run_id.to_string(),
                status: self,
            });
        }
        Err(Error::InvalidTransition { from: self, to })
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("unknown run status: {s}")))
    }
}

/// Run Record represents a single execution of an experiment.
///
/// Each experiment can have multiple runs. Run names are unique among the
/// non-canceled runs of an experiment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    run_id: String,
    experiment_id: String,
    name: Option<String>,
    status: RunStatus,
    created_at: DateTime<Utc>,
}

impl RunRecord {
    pub(crate) const fn new(
        run_id: String,
        experiment_id: String,
        name: Option<String>,
        status: RunStatus,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            run_id,
            experiment_id,
            name,
            status,
            created_at,
        }
    }

    pub(crate) const fn with_status(mut self, status: RunStatus) -> Self {
        self.status = status;
        self
    }

    /// Get the run ID.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Get the parent experiment ID.
    #[must_use]
    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    /// Get the run name, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Get the current run status.
    #[must_use]
    pub const fn status(&self) -> RunStatus {
        self.status
    }

    /// Get the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Parameters for registering a run.
#[derive(Debug, Clone)]
pub struct NewRun {
    pub(crate) experiment_id: String,
    pub(crate) name: Option<String>,
    pub(crate) status: RunStatus,
}

impl NewRun {
    /// A run of `experiment_id`, unnamed and idle.
    #[must_use]
    pub fn new(experiment_id: impl Into<String>) -> Self {
        Self {
            experiment_id: experiment_id.into(),
            name: None,
            status: RunStatus::Idle,
        }
    }

    /// Set the run name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the initial status.
    #[must_use]
    pub const fn status(mut self, status: RunStatus) -> Self {
        self.status = status;
        self
    }
}
