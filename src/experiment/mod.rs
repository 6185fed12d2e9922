//! Experiment Tracking Records
//!
//! Record types returned by the store and the pure run-status state
//! machine.
//!
//! ## Schema Overview
//!
//! ```text
//! ExperimentRecord (1) ──< RunRecord (N)
//!                              │
//!                              └──< Generation (N) ──< LogRecord (N) [numbered]
//! ```
//!
//! Generations are internal to the store; a log number resolves to the
//! newest generation whose start covers it.
//!
//! ## Usage
//!
//! ```rust
//! use trueno_runlog::experiment::{NewLog, RunStatus};
//!
//! assert!(RunStatus::Idle.can_transition_to(RunStatus::Running));
//! assert!(!RunStatus::Canceled.can_transition_to(RunStatus::Running));
//!
//! let log = NewLog::new(1, "trial").value("score", 0.5);
//! assert_eq!(log.number(), 1);
//! ```

mod experiment_record;
mod log_record;
mod run_record;

pub use experiment_record::ExperimentRecord;
pub use log_record::{LastLog, LogRecord, MissingLog, MissingRange, NewLog, PendingCount};
pub use run_record::{NewRun, RunRecord, RunStatus};
