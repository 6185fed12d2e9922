//! # trueno-runlog: Resumable, Gap-Aware Run Log Storage
//!
//! **Version**: 0.1.0
//!
//! trueno-runlog stores numbered telemetry ("logs") written by long-running,
//! resumable experiment sessions ("runs") and serves ordered, filtered reads
//! over them. It is built on an embedded SQLite database.
//!
//! ## Design Principles (Toyota Way Aligned)
//!
//! - **Poka-Yoke**: Every operation is one transaction; a rejected batch
//!   leaves no trace
//! - **Jidoka**: Missing numbers are tracked on every write and block run
//!   completion until filled
//! - **Muda elimination**: Resumes supersede old attempts without rewriting
//!   their rows
//! - **Heijunka**: Exports are paged with keyset continuation, so memory
//!   stays flat on large result sets
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use trueno_runlog::experiment::{NewLog, NewRun};
//! use trueno_runlog::{LogFilter, LogStore};
//!
//! # async fn example() -> trueno_runlog::Result<()> {
//! let store = LogStore::builder().path("runs.db").page_size(500).open()?;
//! store.migrate().await?;
//!
//! let experiment = store.add_experiment("visual-search").await?;
//! let run = store.add_run(NewRun::new(experiment.experiment_id()).name("p01")).await?;
//!
//! // Logs may arrive out of order; number 2 is tracked as missing.
//! store
//!     .add_logs(run.run_id(), vec![NewLog::new(1, "trial"), NewLog::new(3, "trial")])
//!     .await?;
//!
//! // The client restarts after log 1: everything from 2 on is superseded.
//! store.resume_run(run.run_id(), 1).await?;
//!
//! let mut logs = store.get_logs(&LogFilter::all());
//! while let Some(log) = logs.next().await? {
//!     println!("{} #{}: {}", log.run_id(), log.number(), log.log_type());
//! }
//! store.close().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod codec;
pub mod config;
pub mod error;
pub mod experiment;
pub mod filter;
pub mod store;

pub use config::StoreConfig;
pub use error::{Error, Result};
pub use filter::{ExperimentFilter, LogFilter, RunFilter, StatusFilter};
pub use store::{LogCursor, LogStore};

use std::path::PathBuf;

/// Store builder
#[derive(Debug, Default)]
pub struct StoreBuilder {
    config: StoreConfig,
}

impl StoreBuilder {
    /// Store the database in this file instead of memory
    #[must_use]
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.path = Some(path.into());
        self
    }

    /// Set the `get_logs` page size (bounds export memory)
    #[must_use]
    pub const fn page_size(mut self, page_size: usize) -> Self {
        self.config.page_size = page_size;
        self
    }

    /// Set the SQLite busy timeout in milliseconds
    #[must_use]
    pub const fn busy_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config.busy_timeout_ms = timeout_ms;
        self
    }

    /// Set the most missing logs a run may accumulate
    #[must_use]
    pub const fn max_pending_logs(mut self, limit: u64) -> Self {
        self.config.max_pending_logs = limit;
        self
    }

    /// Set the identifier permutation key
    #[must_use]
    pub const fn id_key(mut self, key: u64) -> Self {
        self.config.id_key = key;
        self
    }

    /// Get the configuration built so far
    #[must_use]
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Open the store
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid or the database
    /// cannot be opened
    pub fn open(self) -> Result<LogStore> {
        LogStore::open(self.config)
    }
}
