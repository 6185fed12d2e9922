//! Store configuration

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::DEFAULT_ID_KEY;
use crate::{Error, Result};

/// Default number of log entries fetched per `get_logs` page.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Default SQLite busy timeout.
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

/// Default bound on the missing logs a single run may accumulate.
pub const DEFAULT_MAX_PENDING_LOGS: u64 = 1_000_000;

/// Configuration of a [`LogStore`](crate::LogStore).
///
/// Deserializable so that a host process can embed it in its own config
/// file; every field has a default.
///
/// ```rust
/// use trueno_runlog::StoreConfig;
///
/// let config: StoreConfig = serde_json::from_str(r#"{"page_size": 250}"#)?;
/// assert_eq!(config.page_size, 250);
/// assert!(config.path.is_none());
/// # Ok::<(), serde_json::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database file. `None` opens a private in-memory database.
    pub path: Option<PathBuf>,
    /// Keyset page size used by `get_logs`.
    pub page_size: usize,
    /// How long a writer waits on a locked database before failing.
    pub busy_timeout_ms: u64,
    /// Most missing logs a run may have after a write. A batch whose
    /// highest number would reserve more is rejected.
    pub max_pending_logs: u64,
    /// Key of the identifier permutation. Changing it invalidates every
    /// id handed out before.
    pub id_key: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            page_size: DEFAULT_PAGE_SIZE,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            max_pending_logs: DEFAULT_MAX_PENDING_LOGS,
            id_key: DEFAULT_ID_KEY,
        }
    }
}

impl StoreConfig {
    /// In-memory configuration.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// File-backed configuration.
    #[must_use]
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Busy timeout as a `Duration`.
    #[must_use]
    pub const fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Check the configuration before opening a store.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if `page_size` or `max_pending_logs` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(Error::InvalidInput("page_size must be positive".to_string()));
        }
        if self.max_pending_logs == 0 {
            return Err(Error::InvalidInput("max_pending_logs must be positive".to_string()));
        }
        Ok(())
    }
}
